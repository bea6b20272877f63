#![doc = "Periodic dispatch engine for Switchboard: tier scheduling, wake signals, and board I/O."]

pub mod board;
pub mod fault;
pub mod periodic;
pub mod realtime;
pub mod scheduler;
pub mod sim;
pub mod wake;
pub mod watchdog;

pub use board::*;
pub use fault::*;
pub use periodic::*;
pub use realtime::*;
pub use scheduler::*;
pub use sim::*;
pub use wake::*;
pub use watchdog::*;
