use serde::{Deserialize, Serialize};
use vouch_core::{Address, Amount, Outcome, RequestKey};

/// Which lifecycle events the requester wants pushed back to it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackSettings {
    pub on_proposed: bool,
    pub on_disputed: bool,
    pub on_settled: bool,
}

impl CallbackSettings {
    pub fn all() -> Self {
        CallbackSettings {
            on_proposed: true,
            on_disputed: true,
            on_settled: true,
        }
    }
}

/// A notification queued by the engine for the requesting consumer. The host
/// drains the queue after each operation and delivers these in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OracleCallback {
    PriceProposed { key: RequestKey, proposed: Outcome },
    /// `refund` is the reward returned to the requester, if refund-on-dispute was set
    PriceDisputed { key: RequestKey, refund: Amount },
    PriceSettled { key: RequestKey, outcome: Outcome },
}

impl OracleCallback {
    pub fn key(&self) -> &RequestKey {
        match self {
            OracleCallback::PriceProposed { key, .. }
            | OracleCallback::PriceDisputed { key, .. }
            | OracleCallback::PriceSettled { key, .. } => key,
        }
    }

    pub fn recipient(&self) -> &Address {
        &self.key().requester
    }
}
