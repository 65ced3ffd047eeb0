/// VOUCH CORE
///
/// Building blocks shared by every layer of the optimistic escalation protocol:
/// - Typed accounts, currencies, identifiers and request keys
/// - A fungible ledger with allowance-based pulls and escrow accounting
/// - The time-varying final fee schedule
/// - Identifier and collateral whitelists
/// - Protocol configuration

pub mod config;
pub mod error;
pub mod fees;
pub mod ledger;
pub mod support;
pub mod types;

pub use config::{OracleConfig, MAX_LIVENESS};
pub use error::{CoreError, CoreResult};
pub use fees::{FeeChange, FeeSchedule, FinalFeeSource};
pub use ledger::{EscrowBook, LedgerCheckpoint, TokenLedger};
pub use support::{SupportRegistry, Whitelist};
pub use types::{
    scale_by_fraction, Address, AncillaryData, Amount, Currency, Identifier, Outcome, RequestKey,
    Timestamp, CANONICAL_FALSE, CANONICAL_TRUE, FIXED_POINT_SCALE, YES_OR_NO_QUERY,
};

#[cfg(any(test, feature = "mocks"))]
pub use fees::MockFinalFeeSource;
