use crate::tier::Tier;
use thiserror::Error;

/// Switchboard error types covering bring-up, deadline enforcement, and board resources.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SbError {
    /// A lifecycle hook reported failure during bring-up.
    #[error("bring-up failed: {0} returned false")]
    BringUp(&'static str),

    /// Configuration or initialization error.
    #[error("configuration error: {0}")]
    Config(String),

    /// A periodic function did not complete inside its tier's time slot.
    #[error("{tier} deadline overrun at count {count}: budget {budget_ns}ns, elapsed {elapsed_ns}ns")]
    DeadlineOverrun {
        /// Tier whose budget was exceeded.
        tier: Tier,
        /// Invocation count passed to the overrunning call.
        count: u32,
        /// Tier budget in nanoseconds.
        budget_ns: u64,
        /// Measured execution time in nanoseconds.
        elapsed_ns: u64,
    },

    /// Watchdog timer expired without being kicked.
    #[error("watchdog timeout: {0}")]
    WatchdogTimeout(String),

    /// Board resource could not be acquired (pin claimed, unknown pin, ...).
    #[error("board resource error: {0}")]
    Resource(String),

    /// Generic runtime fault.
    #[error("runtime fault: {0}")]
    Fault(String),

    /// I/O operation error.
    #[error("I/O error: {0}")]
    Io(String),

    /// Invalid lifecycle transition attempted.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Source state.
        from: String,
        /// Attempted target state.
        to: String,
    },
}

/// Convenience type alias for Switchboard operations.
pub type SbResult<T> = Result<T, SbError>;
