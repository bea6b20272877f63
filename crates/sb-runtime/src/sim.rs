//! Simulated board for host execution and tests.
//!
//! [`SimBoard`] hands out output pins and an indicator bank backed by atomics,
//! and plays the role of the external-interrupt controller: [`SimBoard::fire_edge`]
//! invokes registered handlers directly, and [`SimBoard::drive_input`] derives
//! edges from input level changes the way a pin-change interrupt would.
//!
//! Cloning a `SimBoard` yields another handle onto the same board, so a test
//! can keep one handle for inspection while the dispatcher owns another.

use crate::board::{Board, DigitalOutput, Indicators};
use crate::wake::EdgeSink;
use sb_common::error::{SbError, SbResult};
use sb_common::pin::{Edge, PinId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace};

/// Number of indicator channels on the simulated board.
pub const INDICATOR_CHANNELS: usize = 4;

/// Level-change edge detector for a single input line.
///
/// Reports a rising edge on a FALSE→TRUE transition and a falling edge on
/// TRUE→FALSE, once per transition.
#[derive(Debug, Clone, Copy)]
pub struct EdgeDetector {
    prev: bool,
}

impl EdgeDetector {
    /// Create a detector that assumes the line currently sits at `level`.
    #[must_use]
    pub const fn with_level(level: bool) -> Self {
        Self { prev: level }
    }

    /// Sample the line, returning the edge if the level changed.
    pub fn sample(&mut self, level: bool) -> Option<Edge> {
        let edge = match (self.prev, level) {
            (false, true) => Some(Edge::Rising),
            (true, false) => Some(Edge::Falling),
            _ => None,
        };
        self.prev = level;
        edge
    }

    /// Last sampled level.
    #[must_use]
    pub fn level(&self) -> bool {
        self.prev
    }
}

#[derive(Debug, Default)]
struct PinLine {
    level: AtomicBool,
    rising: AtomicU64,
    falling: AtomicU64,
}

impl PinLine {
    fn drive(&self, high: bool) {
        let was = self.level.swap(high, Ordering::AcqRel);
        match (was, high) {
            (false, true) => {
                self.rising.fetch_add(1, Ordering::Relaxed);
            }
            (true, false) => {
                self.falling.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }
}

#[derive(Debug, Default)]
struct IndicatorBank {
    levels: [AtomicBool; INDICATOR_CHANNELS],
    toggles: [AtomicU64; INDICATOR_CHANNELS],
}

struct Registration {
    edge: Edge,
    sink: Arc<dyn EdgeSink>,
}

#[derive(Default)]
struct SimInner {
    outputs: Mutex<HashMap<PinId, Arc<PinLine>>>,
    handlers: Mutex<HashMap<PinId, Vec<Registration>>>,
    inputs: Mutex<HashMap<PinId, EdgeDetector>>,
    indicators: Arc<IndicatorBank>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Simulated board.
#[derive(Clone, Default)]
pub struct SimBoard {
    inner: Arc<SimInner>,
}

impl std::fmt::Debug for SimBoard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimBoard")
            .field("outputs", &lock(&self.inner.outputs).len())
            .field("edge_pins", &lock(&self.inner.handlers).len())
            .finish()
    }
}

impl SimBoard {
    /// Create a board with nothing claimed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle onto the indicator bank.
    #[must_use]
    pub fn indicators(&self) -> SimIndicators {
        SimIndicators {
            bank: Arc::clone(&self.inner.indicators),
        }
    }

    /// Level of a claimed output pin.
    #[must_use]
    pub fn output_level(&self, pin: PinId) -> Option<bool> {
        lock(&self.inner.outputs)
            .get(&pin)
            .map(|line| line.level.load(Ordering::Acquire))
    }

    /// Number of low-to-high transitions on an output (pulses started).
    #[must_use]
    pub fn rising_transitions(&self, pin: PinId) -> u64 {
        lock(&self.inner.outputs)
            .get(&pin)
            .map_or(0, |line| line.rising.load(Ordering::Relaxed))
    }

    /// Number of high-to-low transitions on an output (pulses ended).
    #[must_use]
    pub fn falling_transitions(&self, pin: PinId) -> u64 {
        lock(&self.inner.outputs)
            .get(&pin)
            .map_or(0, |line| line.falling.load(Ordering::Relaxed))
    }

    /// Current level of indicator `channel` (1-based).
    #[must_use]
    pub fn indicator(&self, channel: u8) -> bool {
        channel_index(channel).is_some_and(|i| self.inner.indicators.levels[i].load(Ordering::Acquire))
    }

    /// Times indicator `channel` (1-based) has been toggled.
    #[must_use]
    pub fn indicator_toggles(&self, channel: u8) -> u64 {
        channel_index(channel).map_or(0, |i| self.inner.indicators.toggles[i].load(Ordering::Relaxed))
    }

    /// Number of handlers registered on `pin`.
    #[must_use]
    pub fn handler_count(&self, pin: PinId) -> usize {
        lock(&self.inner.handlers).get(&pin).map_or(0, Vec::len)
    }

    /// Deliver `edge` on `pin` to every matching handler, as the interrupt
    /// controller would. Returns the number of handlers invoked.
    pub fn fire_edge(&self, pin: PinId, edge: Edge) -> usize {
        // Clone the sinks out so handlers run without the registry lock held
        let sinks: Vec<Arc<dyn EdgeSink>> = lock(&self.inner.handlers)
            .get(&pin)
            .map(|regs| {
                regs.iter()
                    .filter(|r| r.edge == edge)
                    .map(|r| Arc::clone(&r.sink))
                    .collect()
            })
            .unwrap_or_default();

        trace!(%pin, %edge, handlers = sinks.len(), "Edge interrupt");
        for sink in &sinks {
            sink.signal();
        }
        sinks.len()
    }

    /// Set the level of an input line. Inputs idle high (pull-up), so the
    /// first `false` produces a falling edge.
    pub fn drive_input(&self, pin: PinId, high: bool) -> Option<Edge> {
        let edge = lock(&self.inner.inputs)
            .entry(pin)
            .or_insert_with(|| EdgeDetector::with_level(true))
            .sample(high);
        if let Some(edge) = edge {
            self.fire_edge(pin, edge);
        }
        edge
    }

    /// Simulate a button press with contact bounce: the line falls, then
    /// chatters `bounces` times before settling low.
    pub fn press(&self, pin: PinId, bounces: u32) {
        self.drive_input(pin, false);
        for _ in 0..bounces {
            self.drive_input(pin, true);
            self.drive_input(pin, false);
        }
    }

    /// Release a pressed button.
    pub fn release(&self, pin: PinId) {
        self.drive_input(pin, true);
    }
}

impl Board for SimBoard {
    fn output(&mut self, pin: PinId) -> SbResult<Box<dyn DigitalOutput>> {
        if lock(&self.inner.handlers).contains_key(&pin) {
            return Err(SbError::Resource(format!("{pin} is configured as an edge input")));
        }

        let mut outputs = lock(&self.inner.outputs);
        if outputs.contains_key(&pin) {
            return Err(SbError::Resource(format!("{pin} is already claimed")));
        }
        let line = Arc::new(PinLine::default());
        outputs.insert(pin, Arc::clone(&line));

        debug!(%pin, "Output pin claimed");
        Ok(Box::new(SimOutput { pin, line }))
    }

    fn on_edge(&mut self, pin: PinId, edge: Edge, sink: Arc<dyn EdgeSink>) -> SbResult<()> {
        if lock(&self.inner.outputs).contains_key(&pin) {
            return Err(SbError::Resource(format!("{pin} is configured as an output")));
        }

        lock(&self.inner.handlers)
            .entry(pin)
            .or_default()
            .push(Registration { edge, sink });

        debug!(%pin, %edge, "Edge handler registered");
        Ok(())
    }
}

/// Output pin handed out by [`SimBoard`].
#[derive(Debug)]
pub struct SimOutput {
    pin: PinId,
    line: Arc<PinLine>,
}

impl SimOutput {
    /// Pin this handle drives.
    #[must_use]
    pub fn pin(&self) -> PinId {
        self.pin
    }
}

impl DigitalOutput for SimOutput {
    fn set_high(&mut self) {
        self.line.drive(true);
    }

    fn set_low(&mut self) {
        self.line.drive(false);
    }

    fn is_high(&self) -> bool {
        self.line.level.load(Ordering::Acquire)
    }
}

/// Indicator bank handed out by [`SimBoard`].
#[derive(Debug, Clone)]
pub struct SimIndicators {
    bank: Arc<IndicatorBank>,
}

fn channel_index(channel: u8) -> Option<usize> {
    let idx = usize::from(channel).checked_sub(1)?;
    (idx < INDICATOR_CHANNELS).then_some(idx)
}

impl Indicators for SimIndicators {
    fn toggle(&mut self, channel: u8) {
        if let Some(i) = channel_index(channel) {
            self.bank.levels[i].fetch_xor(true, Ordering::AcqRel);
            self.bank.toggles[i].fetch_add(1, Ordering::Relaxed);
        }
    }

    fn all_off(&mut self) {
        for level in &self.bank.levels {
            level.store(false, Ordering::Release);
        }
    }
}
