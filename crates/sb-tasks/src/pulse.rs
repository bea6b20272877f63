//! Timed pulse driven by the 10 Hz tier.
//!
//! A trigger starts (or restarts) a pulse that holds the output high for a
//! fixed number of ticks, measured on the 10 Hz invocation count:
//!
//! ```text
//! trigger   ^ (count N)        ^ (count M, N < M < N+5)
//! output    ____|‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾|____
//!               N                              M+5
//! ```
//!
//! The trigger is applied before the deadline check, so a trigger on the
//! boundary tick (`count == deadline`) extends the pulse instead of letting it
//! end. Retriggering restarts the window; pulses never stack.

use serde::{Deserialize, Serialize};

/// Default pulse length in 10 Hz ticks (500 ms).
pub const DEFAULT_PULSE_TICKS: u32 = 5;

/// State of the pulse generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PulseState {
    /// Output low.
    #[default]
    Idle,
    /// Output high until `count` reaches `deadline`.
    Pulsing {
        /// First count at which the output goes low again.
        deadline: u32,
    },
}

/// Two-state pulse generator.
///
/// Pure logic: it owns no pin and reads no clock, so it can be stepped in
/// tests without timing.
#[derive(Debug, Clone)]
pub struct PulseGenerator {
    length: u32,
    state: PulseState,
}

impl Default for PulseGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_PULSE_TICKS)
    }
}

impl PulseGenerator {
    /// Create an idle generator producing pulses of `length` ticks.
    #[must_use]
    pub fn new(length: u32) -> Self {
        Self {
            length,
            state: PulseState::Idle,
        }
    }

    /// Advance one tick. Returns the level the output must be driven to.
    ///
    /// The deadline wraps with the counter and the comparison uses the
    /// wrapping distance to it, so a pulse straddling `u32::MAX` keeps its
    /// full length.
    pub fn step(&mut self, count: u32, triggered: bool) -> bool {
        if triggered {
            self.state = PulseState::Pulsing {
                deadline: count.wrapping_add(self.length),
            };
        }

        match self.state {
            PulseState::Pulsing { deadline }
                if (1..=self.length).contains(&deadline.wrapping_sub(count)) =>
            {
                true
            }
            PulseState::Pulsing { .. } => {
                self.state = PulseState::Idle;
                false
            }
            PulseState::Idle => false,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> PulseState {
        self.state
    }

    /// Whether the output is being held high.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self.state, PulseState::Pulsing { .. })
    }

    /// Deadline of the running pulse.
    #[must_use]
    pub fn deadline(&self) -> Option<u32> {
        match self.state {
            PulseState::Pulsing { deadline } => Some(deadline),
            PulseState::Idle => None,
        }
    }

    /// Pulse length in ticks.
    #[must_use]
    pub fn length(&self) -> u32 {
        self.length
    }

    /// Return to idle.
    pub fn reset(&mut self) {
        self.state = PulseState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Step counts `from..to` with a trigger at each count in `triggers`,
    /// returning the output levels.
    fn run(pulse: &mut PulseGenerator, from: u32, to: u32, triggers: &[u32]) -> Vec<bool> {
        (from..to)
            .map(|c| pulse.step(c, triggers.contains(&c)))
            .collect()
    }

    #[test]
    fn test_starts_idle() {
        let pulse = PulseGenerator::default();
        assert_eq!(pulse.state(), PulseState::Idle);
        assert!(!pulse.is_active());
        assert_eq!(pulse.length(), DEFAULT_PULSE_TICKS);
    }

    #[test]
    fn test_pulse_is_exactly_five_ticks() {
        let mut pulse = PulseGenerator::new(5);
        let levels = run(&mut pulse, 10, 20, &[12]);

        // high for 12..=16, low from 17
        assert_eq!(
            levels,
            vec![false, false, true, true, true, true, true, false, false, false]
        );
        assert_eq!(pulse.state(), PulseState::Idle);
    }

    #[test]
    fn test_retrigger_restarts_window() {
        let mut pulse = PulseGenerator::new(5);
        let levels = run(&mut pulse, 0, 12, &[1, 3]);

        // Continuous high from 1 through 7, low at 8
        let expected: Vec<bool> = (0..12).map(|c| (1..8).contains(&c)).collect();
        assert_eq!(levels, expected);
    }

    #[test]
    fn test_boundary_tick_ends_pulse() {
        let mut pulse = PulseGenerator::new(5);
        assert!(pulse.step(0, true));
        assert_eq!(pulse.deadline(), Some(5));
        assert!(pulse.step(4, false));
        assert!(!pulse.step(5, false));
        assert!(!pulse.is_active());
    }

    #[test]
    fn test_trigger_on_boundary_extends() {
        let mut pulse = PulseGenerator::new(5);
        pulse.step(0, true);
        for c in 1..5 {
            assert!(pulse.step(c, false));
        }

        assert!(pulse.step(5, true));
        assert_eq!(pulse.deadline(), Some(10));
    }

    #[test]
    fn test_idle_stays_low() {
        let mut pulse = PulseGenerator::new(5);
        assert!(run(&mut pulse, 0, 100, &[]).iter().all(|&high| !high));
        assert_eq!(pulse.state(), PulseState::Idle);
    }

    #[test]
    fn test_pulse_spans_counter_wrap() {
        let mut pulse = PulseGenerator::new(5);
        assert!(pulse.step(u32::MAX - 2, true));
        assert_eq!(pulse.deadline(), Some(2));
        assert!(pulse.step(u32::MAX - 1, false));
        assert!(pulse.step(u32::MAX, false));
        assert!(pulse.step(0, false));
        assert!(pulse.step(1, false));
        assert!(!pulse.step(2, false));
        assert!(!pulse.is_active());
    }

    #[test]
    fn test_trigger_on_last_count_is_full_length() {
        let mut pulse = PulseGenerator::new(5);
        let mut levels = vec![pulse.step(u32::MAX, true)];
        levels.extend(run(&mut pulse, 0, 6, &[]));

        assert_eq!(levels, vec![true, true, true, true, true, false, false]);
    }

    #[test]
    fn test_zero_length_never_goes_high() {
        let mut pulse = PulseGenerator::new(0);
        assert!(!pulse.step(3, true));
        assert!(!pulse.is_active());
    }

    #[test]
    fn test_reset() {
        let mut pulse = PulseGenerator::new(5);
        pulse.step(0, true);
        pulse.reset();
        assert!(!pulse.is_active());
        assert!(!pulse.step(1, false));
    }
}
