//! Dispatch tiers.
//!
//! The dispatcher runs four harmonically related frequencies. Each tier's
//! period is also its hard execution budget: a callback must return strictly
//! before the next slot of the same tier begins.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// One of the four fixed dispatch frequencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Tier {
    /// 1 Hz, 1000 ms slot.
    #[serde(rename = "1Hz")]
    Hz1,
    /// 10 Hz, 100 ms slot.
    #[serde(rename = "10Hz")]
    Hz10,
    /// 100 Hz, 10 ms slot.
    #[serde(rename = "100Hz")]
    Hz100,
    /// 1000 Hz, 1 ms slot.
    #[serde(rename = "1000Hz")]
    Hz1000,
}

impl Tier {
    /// All tiers, slowest first.
    pub const ALL: [Tier; 4] = [Tier::Hz1, Tier::Hz10, Tier::Hz100, Tier::Hz1000];

    /// All tiers in dispatch order (fastest first, rate-monotonic).
    pub const DISPATCH_ORDER: [Tier; 4] = [Tier::Hz1000, Tier::Hz100, Tier::Hz10, Tier::Hz1];

    /// Invocation frequency in hertz.
    #[must_use]
    pub const fn frequency_hz(self) -> u32 {
        match self {
            Tier::Hz1 => 1,
            Tier::Hz10 => 10,
            Tier::Hz100 => 100,
            Tier::Hz1000 => 1000,
        }
    }

    /// Slot length, which is also the execution budget of one invocation.
    #[must_use]
    pub const fn period(self) -> Duration {
        Duration::from_millis(1000 / self.frequency_hz() as u64)
    }

    /// Dense index for per-tier arrays.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Tier::Hz1 => 0,
            Tier::Hz10 => 1,
            Tier::Hz100 => 2,
            Tier::Hz1000 => 3,
        }
    }

    /// Number of base ticks between two invocations of this tier.
    ///
    /// `base_hz` must be a multiple of this tier's frequency.
    #[must_use]
    pub const fn divisor(self, base_hz: u32) -> u32 {
        base_hz / self.frequency_hz()
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}Hz", self.frequency_hz())
    }
}

/// Compact set of tiers, used to report which tiers fired on a base tick
/// without allocating.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TierSet(u8);

impl TierSet {
    /// Empty set.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Add a tier.
    pub fn insert(&mut self, tier: Tier) {
        self.0 |= 1 << tier.index();
    }

    /// Check membership.
    #[must_use]
    pub fn contains(self, tier: Tier) -> bool {
        self.0 & (1 << tier.index()) != 0
    }

    /// True when no tier is present.
    #[must_use]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Number of tiers present.
    #[must_use]
    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Iterate members, slowest first.
    pub fn iter(self) -> impl Iterator<Item = Tier> {
        Tier::ALL.into_iter().filter(move |t| self.contains(*t))
    }
}
