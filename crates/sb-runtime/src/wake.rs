//! Interrupt-to-task signaling.
//!
//! Two primitives live here:
//!
//! - [`WakeSignal`]: a binary semaphore with non-blocking `give` / `try_take`.
//!   It holds at most one unit; repeated gives before a take collapse into one.
//! - [`edge_latch`]: a debounced edge latch built on a [`WakeSignal`] plus an
//!   edge-trigger flag. It is split into an interrupt-side [`EdgeTrigger`],
//!   whose only operation is [`EdgeSink::signal`], and a task-side
//!   [`EdgeReceiver`] that consumes the wake unit and re-arms the latch.
//!
//! # Ordering
//!
//! The trigger sets the flag and then gives the signal (release). The receiver
//! takes the signal (acquire) and only then clears the flag (release), so an
//! interrupt that observes the cleared flag also observes the consumed signal.
//!
//! Both sides are wait-free and never allocate.

use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Binary cross-context signal.
#[derive(Debug, Default)]
pub struct WakeSignal {
    available: AtomicBool,
}

impl WakeSignal {
    /// Create an empty signal.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            available: AtomicBool::new(false),
        }
    }

    /// Make one unit available. Safe to call from interrupt context.
    #[inline]
    pub fn give(&self) {
        self.available.store(true, Ordering::Release);
    }

    /// Take the unit if present. Never blocks.
    #[inline]
    pub fn try_take(&self) -> bool {
        self.available.swap(false, Ordering::AcqRel)
    }

    /// Peek without consuming.
    #[inline]
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }
}

/// Handler registered with an edge-detection facility.
///
/// The interrupt side of the system may only signal; it never touches
/// task-owned state.
pub trait EdgeSink: Send + Sync {
    /// Called once per detected edge, possibly from interrupt context.
    fn signal(&self);
}

#[derive(Debug)]
struct LatchShared {
    /// Edge-trigger flag: set by the trigger, cleared by the receiver.
    latched: CachePadded<AtomicBool>,
    wake: CachePadded<WakeSignal>,
    /// Edges dropped because the latch was already set.
    suppressed: AtomicU64,
    /// Edges that armed the latch.
    accepted: AtomicU64,
}

/// Create a connected trigger/receiver pair with the latch clear and the
/// wake signal empty.
#[must_use]
pub fn edge_latch() -> (EdgeTrigger, EdgeReceiver) {
    let shared = Arc::new(LatchShared {
        latched: CachePadded::new(AtomicBool::new(false)),
        wake: CachePadded::new(WakeSignal::new()),
        suppressed: AtomicU64::new(0),
        accepted: AtomicU64::new(0),
    });
    (
        EdgeTrigger {
            shared: Arc::clone(&shared),
        },
        EdgeReceiver { shared },
    )
}

/// Interrupt-side handle of an edge latch.
#[derive(Debug, Clone)]
pub struct EdgeTrigger {
    shared: Arc<LatchShared>,
}

impl EdgeSink for EdgeTrigger {
    /// Set the latch and give the wake signal, unless the latch is already set.
    #[inline]
    fn signal(&self) {
        let s = &self.shared;
        if s
            .latched
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            s.suppressed.fetch_add(1, Ordering::Relaxed);
            return;
        }
        s.accepted.fetch_add(1, Ordering::Relaxed);
        s.wake.give();
    }
}

/// Task-side handle of an edge latch.
#[derive(Debug)]
pub struct EdgeReceiver {
    shared: Arc<LatchShared>,
}

impl EdgeReceiver {
    /// Consume a pending edge without blocking.
    ///
    /// On success the latch is re-armed so the next physical edge is accepted.
    #[inline]
    pub fn try_take(&self) -> bool {
        if !self.shared.wake.try_take() {
            return false;
        }
        self.shared.latched.store(false, Ordering::Release);
        true
    }

    /// Whether the latch is currently set (an edge is pending consumption).
    #[must_use]
    pub fn is_latched(&self) -> bool {
        self.shared.latched.load(Ordering::Acquire)
    }

    /// Edges that armed the latch since creation.
    #[must_use]
    pub fn accepted_edges(&self) -> u64 {
        self.shared.accepted.load(Ordering::Relaxed)
    }

    /// Edges absorbed by the debounce guard since creation.
    #[must_use]
    pub fn suppressed_edges(&self) -> u64 {
        self.shared.suppressed.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_wake_signal_holds_one_unit() {
        let wake = WakeSignal::new();
        assert!(!wake.try_take());

        wake.give();
        wake.give();
        wake.give();
        assert!(wake.is_available());

        assert!(wake.try_take());
        assert!(!wake.try_take());
    }

    #[test]
    fn test_latch_starts_clear() {
        let (_trigger, receiver) = edge_latch();
        assert!(!receiver.is_latched());
        assert!(!receiver.try_take());
    }

    #[test]
    fn test_repeated_signals_are_debounced() {
        let (trigger, receiver) = edge_latch();

        trigger.signal();
        assert!(receiver.is_latched());

        for _ in 0..10 {
            trigger.signal();
        }

        assert_eq!(receiver.accepted_edges(), 1);
        assert_eq!(receiver.suppressed_edges(), 10);

        assert!(receiver.try_take());
        assert!(!receiver.try_take());
    }

    #[test]
    fn test_take_rearms_latch() {
        let (trigger, receiver) = edge_latch();

        trigger.signal();
        assert!(receiver.try_take());
        assert!(!receiver.is_latched());

        trigger.signal();
        assert!(receiver.is_latched());
        assert!(receiver.try_take());
        assert_eq!(receiver.accepted_edges(), 2);
    }

    #[test]
    fn test_concurrent_signals_give_one_unit() {
        let (trigger, receiver) = edge_latch();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let trigger = trigger.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        trigger.signal();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(receiver.accepted_edges(), 1);
        assert_eq!(receiver.suppressed_edges(), 7999);
        assert!(receiver.try_take());
        assert!(!receiver.try_take());
    }
}
