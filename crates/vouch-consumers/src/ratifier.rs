/// ASSERTION RATIFIER
///
/// Stateless pass-through that lets a single caller assert a value and, if they
/// choose, force it straight to the higher authority. All funding is pulled from
/// the caller. Anything else the ratifier happens to hold is left where it is.

use log::info;
use thiserror::Error;
use vouch_core::{Address, Amount, CoreError, Currency, Outcome, RequestKey};
use vouch_oracle::{EscalationAuthority, EscalationEngine, Env, OracleError, PriceRequest};

#[derive(Debug, Clone)]
pub struct AssertionRatifier {
    address: Address,
}

impl AssertionRatifier {
    pub fn new(address: Address) -> Self {
        AssertionRatifier { address }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Request `params` and propose `value` on the caller's behalf, pulling
    /// reward + bond + final fee from the caller
    pub fn make_assertion<A: EscalationAuthority + Clone>(
        &self,
        engine: &mut EscalationEngine<A>,
        env: &mut Env<'_>,
        caller: &Address,
        params: PriceRequest,
        value: Outcome,
    ) -> RatifierResult<RequestKey> {
        let currency = params.currency.clone();
        let reward = params.reward;
        let stake = params
            .bond
            .checked_add(env.fees.final_fee(&currency))
            .ok_or(RatifierError::Overflow("assertion stake"))?;
        let total = reward
            .checked_add(stake)
            .ok_or(RatifierError::Overflow("assertion funding"))?;

        let baseline = env.ledger.balance_of(&currency, &self.address);
        env.ledger
            .transfer_from(&currency, &self.address, caller, &self.address, total)?;

        env.ledger
            .approve(&currency, &self.address, engine.address(), reward);
        let key = engine.request_price(env, &self.address, params)?;
        env.ledger
            .approve(&currency, &self.address, engine.address(), stake);
        engine.propose_price_for(env, &self.address, caller, &key, value)?;

        self.sweep(env, &currency, caller, engine.address().clone(), baseline)?;
        info!("{} asserted {} for {}", caller, value, key);
        Ok(key)
    }

    /// Dispute an existing assertion on the caller's behalf
    pub fn ratify_assertion<A: EscalationAuthority + Clone>(
        &self,
        engine: &mut EscalationEngine<A>,
        env: &mut Env<'_>,
        caller: &Address,
        key: &RequestKey,
    ) -> RatifierResult<Amount> {
        let currency = engine
            .get_request(key)
            .map(|request| request.currency.clone())
            .ok_or_else(|| OracleError::RequestNotFound(key.to_string()))?;
        let required = engine.dispute_stake(env, key)?;

        let baseline = env.ledger.balance_of(&currency, &self.address);
        env.ledger
            .transfer_from(&currency, &self.address, caller, &self.address, required)?;
        env.ledger
            .approve(&currency, &self.address, engine.address(), required);
        let pulled = engine.dispute_price_for(env, &self.address, caller, key)?;

        self.sweep(env, &currency, caller, engine.address().clone(), baseline)?;
        info!("{} sent {} to the higher authority", caller, key);
        Ok(pulled)
    }

    /// Assert and immediately dispute with zero bond and reward, so the only
    /// cost is two final fees
    pub fn assert_and_ratify<A: EscalationAuthority + Clone>(
        &self,
        engine: &mut EscalationEngine<A>,
        env: &mut Env<'_>,
        caller: &Address,
        params: PriceRequest,
        value: Outcome,
    ) -> RatifierResult<RequestKey> {
        let params = PriceRequest {
            reward: 0,
            bond: 0,
            ..params
        };
        let key = self.make_assertion(engine, env, caller, params, value)?;
        self.ratify_assertion(engine, env, caller, &key)?;
        Ok(key)
    }

    /// Clear the engine allowance and hand back to the caller whatever this
    /// call left above `baseline`
    fn sweep(
        &self,
        env: &mut Env<'_>,
        currency: &Currency,
        caller: &Address,
        engine: Address,
        baseline: Amount,
    ) -> RatifierResult<()> {
        env.ledger.approve(currency, &self.address, &engine, 0);
        let leftover = env
            .ledger
            .balance_of(currency, &self.address)
            .saturating_sub(baseline);
        if leftover > 0 {
            env.ledger
                .transfer(currency, &self.address, caller, leftover)?;
        }
        Ok(())
    }
}

pub type RatifierResult<T> = Result<T, RatifierError>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RatifierError {
    #[error("Arithmetic overflow in {0}")]
    Overflow(&'static str),
    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),
    #[error("Funds error: {0}")]
    Funds(#[from] CoreError),
}
