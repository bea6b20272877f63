#![doc = "Periodic tasks for Switchboard: the timed pulse and the application callbacks."]

pub mod pulse;
pub mod switchboard;

pub use pulse::*;
pub use switchboard::*;
