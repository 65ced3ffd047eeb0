/// PROTOCOL HOST RUNTIME
///
/// Owns the whole protocol world (ledger, fee schedule, whitelists, the
/// escalation engine with its voting authority, and every registered consumer)
/// and applies operations to it one at a time.
///
/// Each operation is a transaction: the world is snapshotted, the operation
/// runs, every callback the engine queued is delivered to its consumer (which
/// may queue more), and if any step fails the snapshot is restored.

use std::collections::BTreeMap;
use std::path::Path;

use thiserror::Error;
use tracing::{debug, info, info_span, warn};
use vouch_consumers::{
    AssertionRatifier, InsuranceArbitrator, InsuranceError, MarketError, MarketTerms, PolicyId,
    PredictionMarket, RatifierError,
};
use vouch_core::{
    Address, Amount, CoreError, Currency, FeeSchedule, Identifier, OracleConfig, Outcome,
    RequestKey, SupportRegistry, Timestamp, TokenLedger,
};
use vouch_oracle::{
    EscalationEngine, Env, OracleCallback, OracleError, PriceRequest, Question, RequestState,
    VotingAuthority,
};

pub type Engine = EscalationEngine<VotingAuthority>;

/// A module that receives engine callbacks
#[derive(Debug, Clone)]
pub enum Consumer {
    Market(PredictionMarket),
    Insurance(InsuranceArbitrator),
    Ratifier(AssertionRatifier),
}

impl Consumer {
    pub fn kind(&self) -> &'static str {
        match self {
            Consumer::Market(_) => "market",
            Consumer::Insurance(_) => "insurance",
            Consumer::Ratifier(_) => "ratifier",
        }
    }
}

/// Well-known accounts of a protocol deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    pub engine: Address,
    pub authority: Address,
    pub fee_collector: Address,
}

impl Default for Deployment {
    fn default() -> Self {
        Deployment {
            engine: Address::from("optimistic-oracle"),
            authority: Address::from("voting-authority"),
            fee_collector: Address::from("fee-store"),
        }
    }
}

/// Everything a transaction may touch
#[derive(Debug, Clone)]
pub struct World {
    pub ledger: TokenLedger,
    pub fees: FeeSchedule,
    pub support: SupportRegistry,
    pub engine: Engine,
    pub consumers: BTreeMap<Address, Consumer>,
    pub now: Timestamp,
    pub block: u64,
}

pub struct Protocol {
    config: OracleConfig,
    world: World,
}

impl Protocol {
    pub fn new(config: OracleConfig, deployment: Deployment) -> HostResult<Self> {
        config.validate()?;
        let authority = VotingAuthority::new(deployment.authority, deployment.fee_collector);
        let engine = EscalationEngine::new(deployment.engine, config.clone(), authority);
        Ok(Protocol {
            config,
            world: World {
                ledger: TokenLedger::new(),
                fees: FeeSchedule::new(),
                support: SupportRegistry::new(),
                engine,
                consumers: BTreeMap::new(),
                now: 0,
                block: 0,
            },
        })
    }

    /// Build a protocol from an optional config file plus `VOUCH_*` overrides
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let config = OracleConfig::load(path)?;
        Ok(Protocol::new(config, Deployment::default())?)
    }

    pub fn config(&self) -> &OracleConfig {
        &self.config
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn engine(&self) -> &Engine {
        &self.world.engine
    }

    pub fn engine_address(&self) -> &Address {
        self.world.engine.address()
    }

    pub fn now(&self) -> Timestamp {
        self.world.now
    }

    pub fn set_time(&mut self, now: Timestamp) {
        self.world.now = now;
    }

    pub fn advance_time(&mut self, seconds: Timestamp) {
        self.world.now = self.world.now.saturating_add(seconds);
    }

    // ---- Administration ----

    pub fn mint(&mut self, currency: &Currency, to: &Address, amount: Amount) -> HostResult<()> {
        self.world.ledger.mint(currency, to, amount)?;
        Ok(())
    }

    pub fn approve(&mut self, currency: &Currency, owner: &Address, spender: &Address, amount: Amount) {
        self.world.ledger.approve(currency, owner, spender, amount);
    }

    pub fn transfer(&mut self, currency: &Currency, from: &Address, to: &Address, amount: Amount) -> HostResult<()> {
        self.world.ledger.transfer(currency, from, to, amount)?;
        Ok(())
    }

    pub fn balance_of(&self, currency: &Currency, account: &Address) -> Amount {
        self.world.ledger.balance_of(currency, account)
    }

    pub fn set_final_fee(&mut self, currency: &Currency, fee: Amount) -> u64 {
        self.world.fees.set_final_fee(currency, fee, self.world.now)
    }

    pub fn support_identifier(&mut self, identifier: impl Into<Identifier>) {
        self.world.support.identifiers.add(identifier.into());
    }

    pub fn support_collateral(&mut self, currency: impl Into<Currency>) {
        self.world.support.collateral.add(currency.into());
    }

    pub fn register_market(&mut self, address: Address, mut terms: MarketTerms) -> HostResult<()> {
        if terms.liveness == 0 {
            terms.liveness = self.config.market_liveness;
        }
        let market = PredictionMarket::new(address.clone(), self.engine_address().clone(), terms);
        self.register(address, Consumer::Market(market))
    }

    pub fn register_insurance(&mut self, address: Address, currency: Currency) -> HostResult<()> {
        let insurer = InsuranceArbitrator::new(
            address.clone(),
            self.engine_address().clone(),
            currency,
            &self.config,
        );
        self.register(address, Consumer::Insurance(insurer))
    }

    pub fn register_ratifier(&mut self, address: Address) -> HostResult<()> {
        let ratifier = AssertionRatifier::new(address.clone());
        self.register(address, Consumer::Ratifier(ratifier))
    }

    fn register(&mut self, address: Address, consumer: Consumer) -> HostResult<()> {
        if self.world.consumers.contains_key(&address) {
            return Err(HostError::ConsumerExists(address.to_string()));
        }
        info!(consumer = %address, kind = consumer.kind(), "registered consumer");
        self.world.consumers.insert(address, consumer);
        Ok(())
    }

    pub fn market(&self, address: &Address) -> Option<&PredictionMarket> {
        match self.world.consumers.get(address) {
            Some(Consumer::Market(market)) => Some(market),
            _ => None,
        }
    }

    pub fn insurer(&self, address: &Address) -> Option<&InsuranceArbitrator> {
        match self.world.consumers.get(address) {
            Some(Consumer::Insurance(insurer)) => Some(insurer),
            _ => None,
        }
    }

    // ---- Engine surface ----

    pub fn request_price(&mut self, caller: &Address, params: PriceRequest) -> HostResult<RequestKey> {
        self.execute("request_price", |world, env| {
            Ok(world.engine.request_price(env, caller, params)?)
        })
    }

    pub fn propose_price(&mut self, caller: &Address, key: &RequestKey, proposed: Outcome) -> HostResult<Amount> {
        self.execute("propose_price", |world, env| {
            Ok(world.engine.propose_price(env, caller, key, proposed)?)
        })
    }

    pub fn dispute_price(&mut self, caller: &Address, key: &RequestKey) -> HostResult<Amount> {
        self.execute("dispute_price", |world, env| {
            Ok(world.engine.dispute_price(env, caller, key)?)
        })
    }

    pub fn settle(&mut self, caller: &Address, key: &RequestKey) -> HostResult<Outcome> {
        self.execute("settle", |world, env| {
            Ok(world.engine.settle_and_get_price(env, caller, key)?)
        })
    }

    pub fn get_price(&self, key: &RequestKey) -> HostResult<Outcome> {
        Ok(self.world.engine.get_price(key)?)
    }

    pub fn get_state(&mut self, key: &RequestKey) -> RequestState {
        let world = &mut self.world;
        let env = Env::new(&mut world.ledger, &world.fees, &world.support, world.now);
        world.engine.get_state(&env, key)
    }

    pub fn verify_escrow(&mut self) -> HostResult<()> {
        let world = &mut self.world;
        let env = Env::new(&mut world.ledger, &world.fees, &world.support, world.now);
        world.engine.verify_escrow(&env)?;
        world.engine.authority().verify_escrow(&env)?;
        Ok(())
    }

    /// Deliver the voters' answer for the escalation of `key`
    pub fn resolve_escalation(&mut self, key: &RequestKey, outcome: Outcome) -> HostResult<bool> {
        let escalation = self
            .world
            .engine
            .get_request(key)
            .and_then(|request| request.escalation.clone())
            .ok_or_else(|| HostError::NotEscalated(key.to_string()))?;
        let fresh = self
            .world
            .engine
            .authority_mut()
            .push_price(Question::from(&escalation), outcome);
        info!(request = %key, %outcome, fresh, "vote delivered");
        Ok(fresh)
    }

    /// Escalated questions the voters have not answered yet
    pub fn pending_votes(&self) -> Vec<Question> {
        self.world.engine.authority().pending_questions()
    }

    // ---- Prediction market ----

    pub fn initialize_market(&mut self, market: &Address, creator: &Address) -> HostResult<RequestKey> {
        self.execute("initialize_market", |world, env| {
            let target = market_mut(world.consumers, market)?;
            Ok(target.initialize(world.engine, env, creator)?)
        })
    }

    pub fn create_pairs(&mut self, market: &Address, holder: &Address, pairs: Amount) -> HostResult<()> {
        self.execute("create_pairs", |world, env| {
            Ok(market_mut(world.consumers, market)?.create(env.ledger, holder, pairs)?)
        })
    }

    pub fn redeem_pairs(&mut self, market: &Address, holder: &Address, pairs: Amount) -> HostResult<()> {
        self.execute("redeem_pairs", |world, env| {
            Ok(market_mut(world.consumers, market)?.redeem(env.ledger, holder, pairs)?)
        })
    }

    pub fn settle_tokens(
        &mut self,
        market: &Address,
        holder: &Address,
        long: Amount,
        short: Amount,
    ) -> HostResult<Amount> {
        self.execute("settle_tokens", |world, env| {
            Ok(market_mut(world.consumers, market)?.settle(env.ledger, holder, long, short)?)
        })
    }

    // ---- Insurance ----

    pub fn issue_insurance(
        &mut self,
        insurer: &Address,
        caller: &Address,
        event: &str,
        beneficiary: &Address,
        amount: Amount,
    ) -> HostResult<PolicyId> {
        self.execute("issue_insurance", |world, env| {
            let block = world.block;
            Ok(insurer_mut(world.consumers, insurer)?
                .issue_insurance(env.ledger, block, caller, event, beneficiary, amount)?)
        })
    }

    pub fn submit_claim(&mut self, insurer: &Address, caller: &Address, policy: &PolicyId) -> HostResult<RequestKey> {
        self.execute("submit_claim", |world, env| {
            let target = insurer_mut(world.consumers, insurer)?;
            Ok(target.submit_claim(world.engine, env, caller, policy)?)
        })
    }

    // ---- Ratifier ----

    pub fn make_assertion(
        &mut self,
        ratifier: &Address,
        caller: &Address,
        params: PriceRequest,
        value: Outcome,
    ) -> HostResult<RequestKey> {
        self.execute("make_assertion", |world, env| {
            let target = ratifier_ref(world.consumers, ratifier)?;
            Ok(target.make_assertion(world.engine, env, caller, params, value)?)
        })
    }

    pub fn ratify_assertion(&mut self, ratifier: &Address, caller: &Address, key: &RequestKey) -> HostResult<Amount> {
        self.execute("ratify_assertion", |world, env| {
            let target = ratifier_ref(world.consumers, ratifier)?;
            Ok(target.ratify_assertion(world.engine, env, caller, key)?)
        })
    }

    pub fn assert_and_ratify(
        &mut self,
        ratifier: &Address,
        caller: &Address,
        params: PriceRequest,
        value: Outcome,
    ) -> HostResult<RequestKey> {
        self.execute("assert_and_ratify", |world, env| {
            let target = ratifier_ref(world.consumers, ratifier)?;
            Ok(target.assert_and_ratify(world.engine, env, caller, params, value)?)
        })
    }

    // ---- Transactions ----

    /// Run `op` and deliver every callback it causes; restore the world on failure
    fn execute<T, F>(&mut self, label: &'static str, op: F) -> HostResult<T>
    where
        F: FnOnce(&mut Parts<'_>, &mut Env<'_>) -> HostResult<T>,
    {
        let span = info_span!("tx", op = label, block = self.world.block, now = self.world.now);
        let _enter = span.enter();

        let snapshot = self.world.clone();
        let result = run_transaction(&mut self.world, op);
        match &result {
            Ok(_) => {
                self.world.block += 1;
                debug!("committed");
            }
            Err(err) => {
                warn!(error = %err, "rolled back");
                self.world = snapshot;
            }
        }
        result
    }
}

/// The parts of the world an operation works on besides its `Env`
struct Parts<'a> {
    engine: &'a mut Engine,
    consumers: &'a mut BTreeMap<Address, Consumer>,
    block: u64,
}

fn run_transaction<T, F>(world: &mut World, op: F) -> HostResult<T>
where
    F: FnOnce(&mut Parts<'_>, &mut Env<'_>) -> HostResult<T>,
{
    let World {
        ledger,
        fees,
        support,
        engine,
        consumers,
        now,
        block,
    } = world;
    let mut env = Env::new(ledger, &*fees, &*support, *now);
    let mut parts = Parts {
        engine,
        consumers,
        block: *block,
    };

    let value = op(&mut parts, &mut env)?;
    dispatch_callbacks(&mut parts, &mut env)?;
    Ok(value)
}

/// Deliver queued callbacks until the engine stops producing them
fn dispatch_callbacks(parts: &mut Parts<'_>, env: &mut Env<'_>) -> HostResult<()> {
    loop {
        let queued = parts.engine.drain_callbacks();
        if queued.is_empty() {
            return Ok(());
        }
        let engine_address = parts.engine.address().clone();
        for callback in queued {
            let recipient = callback.recipient().clone();
            let consumer = match parts.consumers.get_mut(&recipient) {
                Some(consumer) => consumer,
                None => {
                    debug!(%recipient, "no consumer registered; callback dropped");
                    continue;
                }
            };
            debug!(%recipient, kind = consumer.kind(), ?callback, "delivering callback");

            match (consumer, callback) {
                (Consumer::Market(market), OracleCallback::PriceDisputed { key, refund }) => {
                    market.price_disputed(parts.engine, env, &engine_address, &key, refund)?;
                }
                (Consumer::Market(market), OracleCallback::PriceSettled { key, outcome }) => {
                    market.price_settled(parts.engine, env, &engine_address, &key, outcome)?;
                }
                (Consumer::Insurance(insurer), OracleCallback::PriceSettled { key, outcome }) => {
                    insurer.price_settled(env.ledger, &engine_address, &key, outcome)?;
                }
                _ => {}
            }
        }
    }
}

fn market_mut<'a>(
    consumers: &'a mut BTreeMap<Address, Consumer>,
    address: &Address,
) -> HostResult<&'a mut PredictionMarket> {
    match consumers.get_mut(address) {
        Some(Consumer::Market(market)) => Ok(market),
        _ => Err(HostError::UnknownConsumer(address.to_string())),
    }
}

fn insurer_mut<'a>(
    consumers: &'a mut BTreeMap<Address, Consumer>,
    address: &Address,
) -> HostResult<&'a mut InsuranceArbitrator> {
    match consumers.get_mut(address) {
        Some(Consumer::Insurance(insurer)) => Ok(insurer),
        _ => Err(HostError::UnknownConsumer(address.to_string())),
    }
}

fn ratifier_ref<'a>(
    consumers: &'a BTreeMap<Address, Consumer>,
    address: &Address,
) -> HostResult<&'a AssertionRatifier> {
    match consumers.get(address) {
        Some(Consumer::Ratifier(ratifier)) => Ok(ratifier),
        _ => Err(HostError::UnknownConsumer(address.to_string())),
    }
}

pub type HostResult<T> = Result<T, HostError>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum HostError {
    #[error("No consumer of the requested kind at {0}")]
    UnknownConsumer(String),
    #[error("Consumer already registered at {0}")]
    ConsumerExists(String),
    #[error("Request {0} has not been escalated")]
    NotEscalated(String),
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error(transparent)]
    Oracle(#[from] OracleError),
    #[error(transparent)]
    Market(#[from] MarketError),
    #[error(transparent)]
    Insurance(#[from] InsuranceError),
    #[error(transparent)]
    Ratifier(#[from] RatifierError),
}
