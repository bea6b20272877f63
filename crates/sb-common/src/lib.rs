#![doc = "Common types shared across the Switchboard workspace."]

pub mod config;
pub mod error;
pub mod metrics;
pub mod pin;
pub mod state;
pub mod tier;

pub use config::*;
pub use error::*;
pub use metrics::*;
pub use pin::*;
pub use state::*;
pub use tier::*;
