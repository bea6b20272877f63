//! The switchboard application: one indicator per fast tier and an
//! edge-triggered timed pulse on the 10 Hz tier.
//!
//! | Tier    | Action                                        |
//! |---------|-----------------------------------------------|
//! | 1 Hz    | toggle indicator 1                            |
//! | 10 Hz   | consume pending edge, step pulse, drive pin   |
//! | 100 Hz  | toggle indicator 3                            |
//! | 1000 Hz | toggle indicator 4                            |
//!
//! Falling edges on the input pin arrive through an edge latch, so contact
//! bounce collapses into a single trigger per 10 Hz tick.

use crate::pulse::{PulseGenerator, PulseState};
use sb_common::config::SwitchboardConfig;
use sb_common::pin::Edge;
use sb_common::tier::Tier;
use sb_runtime::board::{Board, DigitalOutput, Indicators};
use sb_runtime::periodic::PeriodicTasks;
use sb_runtime::wake::{edge_latch, EdgeReceiver};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Indicator toggled by the 1 Hz tier.
pub const LED_1HZ: u8 = 1;
/// Indicator toggled by the 100 Hz tier.
pub const LED_100HZ: u8 = 3;
/// Indicator toggled by the 1000 Hz tier.
pub const LED_1000HZ: u8 = 4;

/// Counters exposed for final statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SwitchboardStats {
    /// Pulses started from idle.
    pub pulses_started: u64,
    /// Pulses restarted by an edge while already high.
    pub pulses_restarted: u64,
    /// Edges that armed the latch.
    pub accepted_edges: u64,
    /// Edges absorbed by the debounce guard.
    pub suppressed_edges: u64,
    /// Pulse state after the last tick.
    pub pulse: PulseState,
}

/// Periodic tasks of the switchboard application.
pub struct SwitchBoard {
    config: SwitchboardConfig,
    indicators: Box<dyn Indicators>,
    output: Option<Box<dyn DigitalOutput>>,
    edges: Option<EdgeReceiver>,
    pulse: PulseGenerator,
    pulses_started: u64,
    pulses_restarted: u64,
}

impl std::fmt::Debug for SwitchBoard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwitchBoard")
            .field("config", &self.config)
            .field("pulse", &self.pulse)
            .field("initialized", &self.output.is_some())
            .finish_non_exhaustive()
    }
}

impl SwitchBoard {
    /// Create the application. Pins are claimed in [`PeriodicTasks::init`].
    pub fn new(indicators: Box<dyn Indicators>, config: SwitchboardConfig) -> Self {
        let pulse = PulseGenerator::new(config.pulse_ticks);
        Self {
            config,
            indicators,
            output: None,
            edges: None,
            pulse,
            pulses_started: 0,
            pulses_restarted: 0,
        }
    }

    /// Pulse generator state.
    pub fn pulse(&self) -> &PulseGenerator {
        &self.pulse
    }

    /// Level currently driven on the pulse output.
    pub fn output_high(&self) -> bool {
        self.output.as_ref().is_some_and(|o| o.is_high())
    }

    /// Snapshot of the application counters.
    pub fn stats(&self) -> SwitchboardStats {
        SwitchboardStats {
            pulses_started: self.pulses_started,
            pulses_restarted: self.pulses_restarted,
            accepted_edges: self.edges.as_ref().map_or(0, EdgeReceiver::accepted_edges),
            suppressed_edges: self.edges.as_ref().map_or(0, EdgeReceiver::suppressed_edges),
            pulse: self.pulse.state(),
        }
    }

    fn step_pulse(&mut self, count: u32) {
        let triggered = self.edges.as_ref().is_some_and(EdgeReceiver::try_take);
        let was_active = self.pulse.is_active();

        let high = self.pulse.step(count, triggered);
        if let Some(out) = self.output.as_mut() {
            out.set(high);
        }

        if triggered {
            let deadline = self.pulse.deadline();
            if was_active {
                self.pulses_restarted += 1;
                debug!(count, ?deadline, "Pulse restarted");
            } else {
                self.pulses_started += 1;
                info!(count, ?deadline, "Pulse started");
            }
        } else if was_active && !high {
            info!(count, "Pulse ended");
        }
    }
}

impl PeriodicTasks for SwitchBoard {
    fn init(&mut self, board: &mut dyn Board) -> bool {
        let (trigger, receiver) = edge_latch();

        let mut output = match board.output(self.config.pulse_output) {
            Ok(output) => output,
            Err(e) => {
                error!(pin = %self.config.pulse_output, error = %e, "Failed to claim pulse output");
                return false;
            }
        };
        output.set_low();
        self.output = Some(output);
        self.edges = Some(receiver);
        self.pulse.reset();

        // Last, so no edge can arrive before the receiving side exists
        if let Err(e) = board.on_edge(self.config.edge_input, Edge::Falling, Arc::new(trigger)) {
            error!(pin = %self.config.edge_input, error = %e, "Failed to register edge handler");
            return false;
        }

        info!(
            output = %self.config.pulse_output,
            input = %self.config.edge_input,
            pulse_ticks = self.pulse.length(),
            "Switchboard initialized"
        );
        true
    }

    fn run(&mut self, tier: Tier, count: u32) {
        match tier {
            Tier::Hz1 => self.indicators.toggle(LED_1HZ),
            Tier::Hz10 => self.step_pulse(count),
            Tier::Hz100 => self.indicators.toggle(LED_100HZ),
            Tier::Hz1000 => self.indicators.toggle(LED_1000HZ),
        }
    }

    fn safe_state(&mut self) {
        if let Some(out) = self.output.as_mut() {
            out.set_low();
        }
        self.pulse.reset();
        self.indicators.all_off();
    }
}
