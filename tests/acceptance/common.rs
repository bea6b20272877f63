//! Shared harness for acceptance tests.

#![allow(dead_code)] // Not every test module uses every helper

use sb_common::config::{DispatcherConfig, OverrunPolicy};
use sb_common::pin::PinId;
use sb_common::tier::Tier;
use sb_runtime::scheduler::Dispatcher;
use sb_runtime::sim::SimBoard;
use sb_tasks::switchboard::SwitchBoard;

/// Default pulse output pin.
pub const OUT: PinId = PinId::new(2, 0);
/// Default edge input pin.
pub const IN: PinId = PinId::new(2, 1);

/// Configuration for functional tests: a preempted test thread must not turn
/// into a deadline fault.
pub fn relaxed() -> DispatcherConfig {
    DispatcherConfig {
        on_overrun: OverrunPolicy::Warn,
        ..Default::default()
    }
}

/// A running dispatcher with the switchboard application on a simulated board.
pub struct Harness {
    pub board: SimBoard,
    pub dispatcher: Dispatcher<SwitchBoard>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(relaxed())
    }

    pub fn with_config(config: DispatcherConfig) -> Self {
        let mut board = SimBoard::new();
        let app = SwitchBoard::new(Box::new(board.indicators()), config.switchboard.clone());
        let mut dispatcher = Dispatcher::new(app, &config);
        dispatcher.initialize(&mut board).unwrap();
        dispatcher.start().unwrap();
        Self { board, dispatcher }
    }

    /// Run base ticks until the 10 Hz tier has fired once more. Returns the
    /// count that invocation received and the output level it left behind.
    pub fn step_10hz(&mut self) -> (u32, bool) {
        loop {
            let result = self.dispatcher.run_tick().unwrap();
            if result.fired.contains(Tier::Hz10) {
                let count = self.dispatcher.counter(Tier::Hz10) - 1;
                return (count, self.output());
            }
        }
    }

    /// Step the 10 Hz tier until it has been invoked with `count`.
    pub fn run_through(&mut self, count: u32) {
        while self.dispatcher.counter(Tier::Hz10) <= count {
            self.step_10hz();
        }
    }

    /// Step `n` 10 Hz invocations, collecting `(count, level)` pairs.
    pub fn trace(&mut self, n: usize) -> Vec<(u32, bool)> {
        (0..n).map(|_| self.step_10hz()).collect()
    }

    /// Run `n` base ticks.
    pub fn ticks(&mut self, n: u64) {
        for _ in 0..n {
            self.dispatcher.run_tick().unwrap();
        }
    }

    pub fn output(&self) -> bool {
        self.board.output_level(OUT).unwrap_or(false)
    }

    /// Press the button, with `bounces` contact chatter, then release it.
    pub fn click(&self, bounces: u32) {
        self.board.press(IN, bounces);
        self.board.release(IN);
    }
}

/// Counts at which the output was high.
pub fn high_counts(trace: &[(u32, bool)]) -> Vec<u32> {
    trace.iter().filter(|(_, high)| *high).map(|&(c, _)| c).collect()
}
