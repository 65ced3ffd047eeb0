use thiserror::Error;
use vouch_core::{Amount, CoreError, Timestamp};

/// Coarse classification of engine failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A request already exists at the key
    KeyConflict,
    /// The request is not in the state the operation requires
    StateViolation,
    /// The operation happened on the wrong side of a time boundary
    TimingViolation,
    /// The caller is not allowed to perform the operation
    Authorization,
    /// A pull or payout could not be honoured
    Funds,
    /// Parameters rejected by whitelists or protocol limits
    Configuration,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum OracleError {
    #[error("Request already exists: {0}")]
    RequestAlreadyExists(String),
    #[error("Request not found: {0}")]
    RequestNotFound(String),
    #[error("Request already proposed")]
    AlreadyProposed,
    #[error("Request has no proposal")]
    NotProposed,
    #[error("Request already disputed")]
    AlreadyDisputed,
    #[error("Request already settled")]
    AlreadySettled,
    #[error("Request not settled")]
    NotSettled,
    #[error("Request settings can only change before a proposal")]
    SettingsLocked,
    #[error("Escalated request has not been resolved yet")]
    EscalationPending,
    #[error("Timestamp {timestamp} is in the future (now {now})")]
    FutureTimestamp { timestamp: Timestamp, now: Timestamp },
    #[error("Liveness has not elapsed (expires {expiration}, now {now})")]
    LivenessNotElapsed { expiration: Timestamp, now: Timestamp },
    #[error("Liveness has elapsed (expired {expiration}, now {now})")]
    LivenessExpired { expiration: Timestamp, now: Timestamp },
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Funds error: {0}")]
    Funds(#[from] CoreError),
    #[error("Escrow mismatch: expected {expected}, got {actual}")]
    EscrowMismatch { expected: Amount, actual: Amount },
    #[error("Unsupported identifier: {0}")]
    UnsupportedIdentifier(String),
    #[error("Unsupported currency: {0}")]
    UnsupportedCurrency(String),
    #[error("Ancillary data too long: {len} bytes (limit {limit})")]
    AncillaryTooLong { len: usize, limit: usize },
    #[error("Invalid liveness: {0}")]
    InvalidLiveness(Timestamp),
    #[error("Arithmetic overflow in {0}")]
    Overflow(&'static str),
}

impl OracleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OracleError::RequestAlreadyExists(_) => ErrorKind::KeyConflict,
            OracleError::RequestNotFound(_)
            | OracleError::AlreadyProposed
            | OracleError::NotProposed
            | OracleError::AlreadyDisputed
            | OracleError::AlreadySettled
            | OracleError::NotSettled
            | OracleError::SettingsLocked
            | OracleError::EscalationPending => ErrorKind::StateViolation,
            OracleError::FutureTimestamp { .. }
            | OracleError::LivenessNotElapsed { .. }
            | OracleError::LivenessExpired { .. } => ErrorKind::TimingViolation,
            OracleError::Unauthorized(_) => ErrorKind::Authorization,
            OracleError::Funds(_)
            | OracleError::EscrowMismatch { .. }
            | OracleError::Overflow(_) => ErrorKind::Funds,
            OracleError::UnsupportedIdentifier(_)
            | OracleError::UnsupportedCurrency(_)
            | OracleError::AncillaryTooLong { .. }
            | OracleError::InvalidLiveness(_) => ErrorKind::Configuration,
        }
    }
}

pub type OracleResult<T> = Result<T, OracleError>;
