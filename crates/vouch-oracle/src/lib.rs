/// VOUCH ORACLE
///
/// The optimistic escalation engine and the layer a dispute escalates into.
/// Consumers talk to `EscalationEngine`; the engine talks to any
/// `EscalationAuthority`, including another engine.

pub mod ancillary;
pub mod authority;
pub mod callbacks;
pub mod engine;
pub mod env;
pub mod error;
pub mod request;

pub use ancillary::{
    child_request_digest, stamp_child_request, yes_or_no_question, CHILD_REQUEST_KEY, CHILD_STAMP_LEN,
};
pub use authority::{EscalationAuthority, Question, VotingAuthority};
pub use callbacks::{CallbackSettings, OracleCallback};
pub use engine::EscalationEngine;
pub use env::Env;
pub use error::{ErrorKind, OracleError, OracleResult};
pub use request::{PriceRequest, Request, RequestState};
