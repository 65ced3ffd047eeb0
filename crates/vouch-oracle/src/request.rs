use serde::{Deserialize, Serialize};
use vouch_core::{
    Address, AncillaryData, Amount, Currency, Identifier, Outcome, RequestKey, Timestamp,
};

use crate::callbacks::CallbackSettings;

/// Parameters of a new price request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceRequest {
    pub identifier: Identifier,
    pub timestamp: Timestamp,
    pub ancillary: AncillaryData,
    pub currency: Currency,
    /// Paid to a successful proposer
    pub reward: Amount,
    /// Stake each side posts on top of the final fee
    pub bond: Amount,
    /// Dispute window after a proposal; 0 selects the configured default
    pub liveness: Timestamp,
}

impl PriceRequest {
    pub fn key_for(&self, requester: &Address) -> RequestKey {
        RequestKey::new(
            requester.clone(),
            self.identifier.clone(),
            self.timestamp,
            self.ancillary.clone(),
        )
    }
}

/// Lifecycle position of a request, as observed at a given time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestState {
    /// Never requested
    Invalid,
    /// Open, waiting for a proposal
    Requested,
    /// Proposed, inside the dispute window
    Proposed,
    /// Proposed, dispute window over, not yet settled
    Expired,
    /// Disputed, escalation unresolved
    Disputed,
    /// Disputed, escalation resolved, not yet settled
    Resolved,
    /// Final
    Settled,
}

/// Engine-owned record of one request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub proposer: Option<Address>,
    pub disputer: Option<Address>,
    pub currency: Currency,
    pub reward: Amount,
    pub bond: Amount,
    /// Fee each side carries; re-sampled at proposal and at dispute
    pub final_fee: Amount,
    pub liveness: Timestamp,
    pub expiration_time: Option<Timestamp>,
    pub proposed: Option<Outcome>,
    pub resolved: Option<Outcome>,
    pub settled: bool,
    pub callbacks: CallbackSettings,
    pub refund_on_dispute: bool,
    /// Key of the sub-request opened at the higher authority on dispute
    pub escalation: Option<RequestKey>,
}

impl Request {
    pub fn new(params: &PriceRequest, liveness: Timestamp, final_fee: Amount) -> Self {
        Request {
            proposer: None,
            disputer: None,
            currency: params.currency.clone(),
            reward: params.reward,
            bond: params.bond,
            final_fee,
            liveness,
            expiration_time: None,
            proposed: None,
            resolved: None,
            settled: false,
            callbacks: CallbackSettings::default(),
            refund_on_dispute: false,
            escalation: None,
        }
    }

    /// State without consulting the higher authority (a disputed request
    /// reports `Disputed` even when its escalation already has a value)
    pub fn local_state(&self, now: Timestamp) -> RequestState {
        if self.settled {
            return RequestState::Settled;
        }
        if self.disputer.is_some() {
            return RequestState::Disputed;
        }
        match (self.proposer.as_ref(), self.expiration_time) {
            (Some(_), Some(expiration)) if now > expiration => RequestState::Expired,
            (Some(_), _) => RequestState::Proposed,
            (None, _) => RequestState::Requested,
        }
    }

    /// Stake each side has to post at the current fee
    pub fn stake(&self) -> Option<Amount> {
        self.bond.checked_add(self.final_fee)
    }
}
