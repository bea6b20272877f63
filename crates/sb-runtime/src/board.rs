//! Board capabilities consumed by periodic tasks.
//!
//! These traits are the seam between the dispatcher's tasks and the pin
//! drivers. Pin-level operations are infallible and idempotent; only
//! acquiring a resource can fail.

use crate::wake::EdgeSink;
use sb_common::error::SbResult;
use sb_common::pin::{Edge, PinId};
use std::sync::Arc;

/// A GPIO configured as a push-pull output.
pub trait DigitalOutput: Send {
    /// Drive the pin high.
    fn set_high(&mut self);

    /// Drive the pin low.
    fn set_low(&mut self);

    /// Current driven level.
    fn is_high(&self) -> bool;

    /// Drive the pin to `high`.
    fn set(&mut self, high: bool) {
        if high {
            self.set_high();
        } else {
            self.set_low();
        }
    }
}

/// On-board indicator LEDs addressed by channel (1-based).
pub trait Indicators: Send {
    /// Flip one indicator. Unknown channels are ignored.
    fn toggle(&mut self, channel: u8);

    /// Drive every indicator off.
    fn all_off(&mut self);
}

/// Resources a lifecycle hook may acquire.
pub trait Board {
    /// Claim `pin` and configure it as an output, initially low.
    ///
    /// # Errors
    ///
    /// Returns [`sb_common::SbError::Resource`] if the pin is already claimed.
    fn output(&mut self, pin: PinId) -> SbResult<Box<dyn DigitalOutput>>;

    /// Register `sink` to be signalled on each `edge` of `pin`.
    ///
    /// # Errors
    ///
    /// Returns [`sb_common::SbError::Resource`] if the pin is already an output.
    fn on_edge(&mut self, pin: PinId, edge: Edge, sink: Arc<dyn EdgeSink>) -> SbResult<()>;
}
