use crate::types::{Address, Amount, Currency};
use thiserror::Error;

/// Failures raised by the ledger primitive, escrow accounting and configuration
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoreError {
    #[error("Insufficient balance: {account} holds {available} {currency}, needs {required}")]
    InsufficientBalance {
        account: Address,
        currency: Currency,
        available: Amount,
        required: Amount,
    },
    #[error("Insufficient allowance: {spender} may move {available} {currency} of {owner}, needs {required}")]
    InsufficientAllowance {
        owner: Address,
        spender: Address,
        currency: Currency,
        available: Amount,
        required: Amount,
    },
    #[error("Arithmetic overflow in {0}")]
    Overflow(&'static str),
    #[error("Escrow underflow: {held} held, {requested} requested")]
    EscrowUnderflow { held: Amount, requested: Amount },
    #[error("Escrow mismatch for {currency}: book {book}, ledger {ledger}")]
    EscrowMismatch {
        currency: Currency,
        book: Amount,
        ledger: Amount,
    },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
