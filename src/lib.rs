/// VOUCH
///
/// Optimistic assertion and escalation protocol: anyone can assert an answer by
/// posting a bond, the answer stands unless disputed inside its liveness window,
/// and disputes escalate to a higher authority whose answer is final.
///
/// This crate hosts the protocol: it owns the world state, runs each operation
/// as a transaction and delivers engine callbacks to consumer modules.

pub mod runtime;

pub use runtime::{Consumer, Deployment, Engine, HostError, HostResult, Protocol, World};

use tracing_subscriber::EnvFilter;

/// Install a `RUST_LOG`-driven subscriber. Records from the `log` facade used
/// by the library crates are forwarded too. Calling it twice is harmless.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init();
}
