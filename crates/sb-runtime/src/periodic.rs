//! Contract between the dispatcher and the application's periodic functions.
//!
//! The dispatcher calls [`PeriodicTasks::init`] and
//! [`PeriodicTasks::register_telemetry`] exactly once, in that order, before
//! any tier fires. It then calls [`PeriodicTasks::run`] for each due tier with
//! the number of times that tier has fired so far (starting at 0, +1 per call).
//!
//! Implementations of `run` must not block, must not do unbounded work, and
//! must return strictly inside the tier's slot ([`Tier::period`]). A call that
//! takes longer is a fatal deadline overrun.

use crate::board::Board;
use sb_common::tier::Tier;

/// Periodic functions driven by the dispatcher.
pub trait PeriodicTasks {
    /// One-time initialization before dispatch and before any interrupt can
    /// fire. Returns `false` on failure, which aborts bring-up.
    fn init(&mut self, board: &mut dyn Board) -> bool;

    /// Register telemetry variables. Returns `false` on failure, which
    /// aborts bring-up.
    fn register_telemetry(&mut self) -> bool {
        true
    }

    /// Invoke the function of `tier` with that tier's invocation count.
    fn run(&mut self, tier: Tier, count: u32);

    /// Drive every output to its safe level. Called when dispatch stops or
    /// faults.
    fn safe_state(&mut self) {}
}
