//! Software watchdog for the dispatcher loop.
//!
//! Deadline checks catch a tier that returns late. They cannot catch a tier
//! that never returns; the watchdog covers that case. The dispatcher kicks it
//! once per base tick, and a monitor thread runs the expiry callback if no
//! kick arrives within the timeout. The callback fires at most once per start.

use sb_common::error::{SbError, SbResult};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

#[derive(Debug)]
struct Shared {
    epoch: Instant,
    last_kick_ns: AtomicU64,
    expired: AtomicBool,
    stop: AtomicBool,
}

impl Shared {
    fn now_ns(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }

    fn kick(&self) {
        self.last_kick_ns.store(self.now_ns(), Ordering::Release);
    }

    fn since_kick_ns(&self) -> u64 {
        self.now_ns()
            .saturating_sub(self.last_kick_ns.load(Ordering::Acquire))
    }
}

/// Watchdog monitoring the dispatcher.
#[derive(Debug)]
pub struct Watchdog {
    shared: Arc<Shared>,
    timeout: Duration,
    monitor: Option<JoinHandle<()>>,
}

impl Watchdog {
    /// Create a stopped watchdog. Call [`Watchdog::start`] to arm it.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                epoch: Instant::now(),
                last_kick_ns: AtomicU64::new(0),
                expired: AtomicBool::new(false),
                stop: AtomicBool::new(false),
            }),
            timeout,
            monitor: None,
        }
    }

    /// Configured timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Arm the watchdog and spawn the monitor thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the watchdog is already running or the monitor
    /// thread cannot be spawned.
    pub fn start<F>(&mut self, on_expire: F) -> SbResult<()>
    where
        F: Fn() + Send + 'static,
    {
        if self.is_running() {
            return Err(SbError::Config("watchdog already running".into()));
        }

        self.shared.stop.store(false, Ordering::Release);
        self.shared.expired.store(false, Ordering::Release);
        self.shared.kick();

        let shared = Arc::clone(&self.shared);
        let timeout_ns = u64::try_from(self.timeout.as_nanos()).unwrap_or(u64::MAX);
        let poll = (self.timeout / 4).max(Duration::from_millis(1));

        let handle = thread::Builder::new()
            .name("sb-watchdog".into())
            .spawn(move || {
                debug!("Watchdog monitor started");
                while !shared.stop.load(Ordering::Acquire) {
                    thread::sleep(poll);
                    if shared.stop.load(Ordering::Acquire) {
                        break;
                    }
                    if shared.since_kick_ns() > timeout_ns
                        && !shared.expired.swap(true, Ordering::AcqRel)
                    {
                        error!(
                            since_kick_ms = shared.since_kick_ns() / 1_000_000,
                            "Watchdog expired: dispatcher stopped responding"
                        );
                        on_expire();
                    }
                }
                debug!("Watchdog monitor stopped");
            })
            .map_err(|e| SbError::Config(format!("failed to spawn watchdog thread: {e}")))?;

        info!(timeout_ms = self.timeout.as_millis(), "Watchdog armed");
        self.monitor = Some(handle);
        Ok(())
    }

    /// Signal that the dispatcher is alive.
    #[inline]
    pub fn kick(&self) {
        self.shared.kick();
    }

    /// Whether the watchdog has expired since it was last started or reset.
    #[inline]
    #[must_use]
    pub fn has_expired(&self) -> bool {
        self.shared.expired.load(Ordering::Acquire)
    }

    /// Acknowledge an expiry and kick.
    pub fn reset(&self) {
        self.shared.expired.store(false, Ordering::Release);
        self.shared.kick();
    }

    /// Time since the last kick.
    #[must_use]
    pub fn time_since_kick(&self) -> Duration {
        Duration::from_nanos(self.shared.since_kick_ns())
    }

    /// Whether the monitor thread is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.monitor.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the monitor thread and wait for it to exit.
    pub fn stop(&mut self) {
        let Some(handle) = self.monitor.take() else {
            return;
        };
        self.shared.stop.store(true, Ordering::Release);
        if handle.join().is_err() {
            warn!("Watchdog monitor thread panicked");
        }
        info!("Watchdog disarmed");
    }

    /// Stop, then start again with a new callback.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`Watchdog::start`].
    pub fn restart<F>(&mut self, on_expire: F) -> SbResult<()>
    where
        F: Fn() + Send + 'static,
    {
        self.stop();
        self.start(on_expire)
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.stop();
    }
}
