//! End-to-end tests through the dispatcher with a simulated board.

mod common;
mod dispatch_test;
mod fault_test;
mod pulse_test;
