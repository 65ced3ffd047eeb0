/// VOUCH CONSUMERS
///
/// Modules that ask the escalation engine questions and act on the answers:
/// - `prediction_market`: binary long/short market settled by a yes/no question
/// - `insurance`: policies paid out when a claim is confirmed
/// - `ratifier`: assert-and-escalate pass-through

pub mod insurance;
pub mod prediction_market;
pub mod ratifier;

pub use insurance::{InsuranceArbitrator, InsuranceError, InsuranceResult, Policy, PolicyId};
pub use prediction_market::{
    long_fraction, MarketError, MarketResult, MarketTerms, PredictionMarket,
};
pub use ratifier::{AssertionRatifier, RatifierError, RatifierResult};
