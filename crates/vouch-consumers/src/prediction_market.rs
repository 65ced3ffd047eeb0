/// BINARY PREDICTION MARKET
///
/// Long and short tokens are minted and redeemed in equal pairs against one unit
/// of collateral each, so until settlement the market holds exactly one unit of
/// collateral per outstanding pair.
///
/// The market's question is asked at the escalation engine on initialization.
/// When that request is disputed the engine refunds the reward and the market
/// asks again at the current time; a settlement that arrives later for the
/// superseded request is ignored. A `TooEarly` answer re-asks as well.
///
/// Settlement maps the answer to the long side's share of one unit:
/// >= 1e18 pays long in full, <= 0 pays short in full, anything in between
/// splits linearly.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use vouch_core::{
    scale_by_fraction, Address, AncillaryData, Amount, CoreError, Currency, Identifier, Outcome, RequestKey,
    Timestamp, TokenLedger, FIXED_POINT_SCALE, YES_OR_NO_QUERY,
};
use vouch_oracle::{
    yes_or_no_question, CallbackSettings, EscalationAuthority, EscalationEngine, Env,
    OracleError, PriceRequest,
};

const FULL_UNIT: Amount = FIXED_POINT_SCALE as Amount;

/// Terms a market is created with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketTerms {
    /// Prefix of the long/short token symbols
    pub name: String,
    pub title: String,
    pub description: String,
    pub collateral: Currency,
    /// Paid by the creator to whoever answers the question
    pub reward: Amount,
    pub bond: Amount,
    pub liveness: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionMarket {
    address: Address,
    engine: Address,
    collateral: Currency,
    long_token: Currency,
    short_token: Currency,
    question: AncillaryData,
    reward: Amount,
    bond: Amount,
    liveness: Timestamp,
    /// Timestamp of the request whose answer the market will accept
    request_timestamp: Option<Timestamp>,
    /// Long side's share of one unit, once settled
    long_fraction: Option<Amount>,
    outstanding_pairs: Amount,
}

impl PredictionMarket {
    pub fn new(address: Address, engine: Address, terms: MarketTerms) -> Self {
        PredictionMarket {
            long_token: Currency::new(format!("{}-LONG", terms.name)),
            short_token: Currency::new(format!("{}-SHORT", terms.name)),
            question: yes_or_no_question(&terms.title, &terms.description),
            address,
            engine,
            collateral: terms.collateral,
            reward: terms.reward,
            bond: terms.bond,
            liveness: terms.liveness,
            request_timestamp: None,
            long_fraction: None,
            outstanding_pairs: 0,
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn long_token(&self) -> &Currency {
        &self.long_token
    }

    pub fn short_token(&self) -> &Currency {
        &self.short_token
    }

    pub fn collateral(&self) -> &Currency {
        &self.collateral
    }

    pub fn request_timestamp(&self) -> Option<Timestamp> {
        self.request_timestamp
    }

    pub fn settled_fraction(&self) -> Option<Amount> {
        self.long_fraction
    }

    pub fn is_settled(&self) -> bool {
        self.long_fraction.is_some()
    }

    pub fn outstanding_pairs(&self) -> Amount {
        self.outstanding_pairs
    }

    /// Key of the request the market currently listens to
    pub fn current_request(&self) -> Option<RequestKey> {
        self.request_timestamp.map(|timestamp| {
            RequestKey::new(
                self.address.clone(),
                Identifier::from(YES_OR_NO_QUERY),
                timestamp,
                self.question.clone(),
            )
        })
    }

    /// Pull the reward from `creator` and ask the question
    pub fn initialize<A: EscalationAuthority + Clone>(
        &mut self,
        engine: &mut EscalationEngine<A>,
        env: &mut Env<'_>,
        creator: &Address,
    ) -> MarketResult<RequestKey> {
        if self.request_timestamp.is_some() {
            return Err(MarketError::AlreadyInitialized);
        }
        env.ledger.transfer_from(
            &self.collateral,
            &self.address,
            creator,
            &self.address,
            self.reward,
        )?;
        self.ask(engine, env, self.reward)
    }

    fn ask<A: EscalationAuthority + Clone>(
        &mut self,
        engine: &mut EscalationEngine<A>,
        env: &mut Env<'_>,
        reward: Amount,
    ) -> MarketResult<RequestKey> {
        env.ledger
            .approve(&self.collateral, &self.address, engine.address(), reward);
        let key = engine.request_price(
            env,
            &self.address,
            PriceRequest {
                identifier: Identifier::from(YES_OR_NO_QUERY),
                timestamp: env.now,
                ancillary: self.question.clone(),
                currency: self.collateral.clone(),
                reward,
                bond: self.bond,
                liveness: self.liveness,
            },
        )?;
        engine.set_callbacks(
            &self.address,
            &key,
            CallbackSettings {
                on_disputed: true,
                on_settled: true,
                ..CallbackSettings::default()
            },
        )?;
        engine.set_refund_on_dispute(&self.address, &key)?;

        self.request_timestamp = Some(env.now);
        info!("Market {} asked {} (reward {})", self.address, key, reward);
        Ok(key)
    }

    /// Lock `pairs` collateral from `holder` and mint `pairs` long and short tokens
    pub fn create(&mut self, ledger: &mut TokenLedger, holder: &Address, pairs: Amount) -> MarketResult<()> {
        if self.is_settled() {
            return Err(MarketError::AlreadySettled);
        }
        let outstanding = self
            .outstanding_pairs
            .checked_add(pairs)
            .ok_or(MarketError::Overflow("outstanding pairs"))?;

        ledger.transfer_from(&self.collateral, &self.address, holder, &self.address, pairs)?;
        ledger.mint(&self.long_token, holder, pairs)?;
        ledger.mint(&self.short_token, holder, pairs)?;
        self.outstanding_pairs = outstanding;
        Ok(())
    }

    /// Burn `pairs` long and short tokens and return their collateral
    pub fn redeem(&mut self, ledger: &mut TokenLedger, holder: &Address, pairs: Amount) -> MarketResult<()> {
        self.require_tokens(ledger, &self.long_token, holder, pairs)?;
        self.require_tokens(ledger, &self.short_token, holder, pairs)?;

        ledger.burn(&self.long_token, holder, pairs)?;
        ledger.burn(&self.short_token, holder, pairs)?;
        ledger.transfer(&self.collateral, &self.address, holder, pairs)?;
        self.outstanding_pairs = self.outstanding_pairs.saturating_sub(pairs);
        Ok(())
    }

    /// Dispute notification from the engine: ask again at the current time
    /// with whatever reward came back
    pub fn price_disputed<A: EscalationAuthority + Clone>(
        &mut self,
        engine: &mut EscalationEngine<A>,
        env: &mut Env<'_>,
        caller: &Address,
        key: &RequestKey,
        refund: Amount,
    ) -> MarketResult<Option<RequestKey>> {
        self.authenticate(caller)?;
        if self.is_settled() || Some(key.timestamp) != self.request_timestamp {
            warn!("Market {} ignoring dispute of superseded request {}", self.address, key);
            return Ok(None);
        }
        self.ask(engine, env, refund).map(Some)
    }

    /// Settlement notification from the engine
    pub fn price_settled<A: EscalationAuthority + Clone>(
        &mut self,
        engine: &mut EscalationEngine<A>,
        env: &mut Env<'_>,
        caller: &Address,
        key: &RequestKey,
        outcome: Outcome,
    ) -> MarketResult<()> {
        self.authenticate(caller)?;
        if self.is_settled() || Some(key.timestamp) != self.request_timestamp {
            warn!(
                "Market {} ignoring settlement {} of superseded request {}",
                self.address, outcome, key
            );
            return Ok(());
        }

        match outcome {
            Outcome::TooEarly => {
                info!("Market {} got an early answer; asking again", self.address);
                self.ask(engine, env, 0)?;
            }
            Outcome::Value(value) => {
                let fraction = long_fraction(value);
                self.long_fraction = Some(fraction);
                info!("Market {} settled: long fraction {}", self.address, fraction);
            }
        }
        Ok(())
    }

    /// Burn settled tokens and pay `long * f + short * (1 - f)` collateral
    pub fn settle(
        &mut self,
        ledger: &mut TokenLedger,
        holder: &Address,
        long: Amount,
        short: Amount,
    ) -> MarketResult<Amount> {
        let fraction = self.long_fraction.ok_or(MarketError::NotSettled)?;
        self.require_tokens(ledger, &self.long_token, holder, long)?;
        self.require_tokens(ledger, &self.short_token, holder, short)?;

        let long_payout =
            scale_by_fraction(long, fraction).ok_or(MarketError::Overflow("long payout"))?;
        let short_payout = scale_by_fraction(short, FULL_UNIT - fraction)
            .ok_or(MarketError::Overflow("short payout"))?;
        let payout = long_payout
            .checked_add(short_payout)
            .ok_or(MarketError::Overflow("settlement payout"))?;

        ledger.burn(&self.long_token, holder, long)?;
        ledger.burn(&self.short_token, holder, short)?;
        ledger.transfer(&self.collateral, &self.address, holder, payout)?;
        Ok(payout)
    }

    /// Collateral held must cover every outstanding pair until settlement
    pub fn verify_collateral(&self, ledger: &TokenLedger) -> MarketResult<()> {
        let held = ledger.balance_of(&self.collateral, &self.address);
        if !self.is_settled() && held != self.outstanding_pairs {
            return Err(MarketError::CollateralMismatch {
                held,
                pairs: self.outstanding_pairs,
            });
        }
        Ok(())
    }

    fn authenticate(&self, caller: &Address) -> MarketResult<()> {
        if caller != &self.engine {
            return Err(MarketError::Unauthorized(caller.to_string()));
        }
        Ok(())
    }

    fn require_tokens(
        &self,
        ledger: &TokenLedger,
        token: &Currency,
        holder: &Address,
        amount: Amount,
    ) -> MarketResult<()> {
        let available = ledger.balance_of(token, holder);
        if available < amount {
            return Err(MarketError::InsufficientTokens {
                token: token.to_string(),
                available,
                required: amount,
            });
        }
        Ok(())
    }
}

/// Long side's share of one unit for a resolved value
pub fn long_fraction(value: i128) -> Amount {
    value.clamp(0, FIXED_POINT_SCALE) as Amount
}

pub type MarketResult<T> = Result<T, MarketError>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum MarketError {
    #[error("Market already initialized")]
    AlreadyInitialized,
    #[error("Market already settled")]
    AlreadySettled,
    #[error("Market not settled")]
    NotSettled,
    #[error("Callback from unexpected caller: {0}")]
    Unauthorized(String),
    #[error("Insufficient {token}: have {available}, need {required}")]
    InsufficientTokens {
        token: String,
        available: Amount,
        required: Amount,
    },
    #[error("Collateral mismatch: held {held}, outstanding pairs {pairs}")]
    CollateralMismatch { held: Amount, pairs: Amount },
    #[error("Arithmetic overflow in {0}")]
    Overflow(&'static str),
    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),
    #[error("Funds error: {0}")]
    Funds(#[from] CoreError),
}
