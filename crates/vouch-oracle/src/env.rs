use vouch_core::{FinalFeeSource, SupportRegistry, Timestamp, TokenLedger};

/// Host state an operation runs against: the shared ledger, the external fee
/// schedule, the whitelists and the current block time.
pub struct Env<'a> {
    pub ledger: &'a mut TokenLedger,
    pub fees: &'a dyn FinalFeeSource,
    pub support: &'a SupportRegistry,
    pub now: Timestamp,
}

impl<'a> Env<'a> {
    pub fn new(
        ledger: &'a mut TokenLedger,
        fees: &'a dyn FinalFeeSource,
        support: &'a SupportRegistry,
        now: Timestamp,
    ) -> Self {
        Env {
            ledger,
            fees,
            support,
            now,
        }
    }
}
