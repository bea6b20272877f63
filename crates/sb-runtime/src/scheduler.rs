//! Fixed-rate periodic dispatcher.
//!
//! The dispatcher runs a single base tick (1 ms with the 1 kHz tier, 10 ms
//! without) and on each tick invokes every due tier, fastest first:
//! 1. Kick watchdog
//! 2. Fire each due tier with its invocation count
//! 3. Check each call against its tier's budget
//! 4. Wait for the next absolute tick deadline
//!
//! All tiers fire on tick 0. A tier whose call takes its whole slot or longer
//! has overrun; under the default policy that stops dispatch in FAULT.

use crate::board::Board;
use crate::fault::FaultReport;
use crate::periodic::PeriodicTasks;
use crate::watchdog::Watchdog;
use sb_common::config::{DispatcherConfig, OverrunPolicy};
use sb_common::error::{SbError, SbResult};
use sb_common::metrics::TierMetrics;
use sb_common::state::{DispatcherState, StateMachine};
use sb_common::tier::{Tier, TierSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Watchdog expiry callback.
pub type ExpiryCallback = Arc<dyn Fn() + Send + Sync>;

/// Result of a single base tick.
#[derive(Debug, Clone, Copy)]
pub struct TickResult {
    /// Base tick number that was executed.
    pub tick: u64,
    /// Tiers invoked on this tick.
    pub fired: TierSet,
    /// Time spent in tier calls.
    pub elapsed: Duration,
}

fn as_ns(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

/// Periodic dispatcher driving a [`PeriodicTasks`] implementation.
pub struct Dispatcher<T: PeriodicTasks> {
    tasks: T,
    state: StateMachine,
    base_hz: u32,
    base_period: Duration,
    enabled: TierSet,
    tick: u64,
    counters: [u32; 4],
    /// Indexed by [`Tier::index`]; empty when metrics are disabled.
    metrics: Vec<TierMetrics>,
    overrun_policy: OverrunPolicy,
    watchdog: Option<Watchdog>,
    on_watchdog: Option<ExpiryCallback>,
    next_deadline: Option<Instant>,
    resyncs: u64,
    last_fault: Option<FaultReport>,
}

impl<T: PeriodicTasks> std::fmt::Debug for Dispatcher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("state", &self.state.state())
            .field("base_hz", &self.base_hz)
            .field("tick", &self.tick)
            .field("counters", &self.counters)
            .finish_non_exhaustive()
    }
}

impl<T: PeriodicTasks> Dispatcher<T> {
    /// Create a dispatcher for `tasks`.
    pub fn new(tasks: T, config: &DispatcherConfig) -> Self {
        let base_hz = config.base_hz();

        let mut enabled = TierSet::empty();
        for tier in Tier::ALL {
            if tier != Tier::Hz1000 || config.run_1khz {
                enabled.insert(tier);
            }
        }

        let metrics = if config.metrics.enabled {
            Tier::ALL
                .iter()
                .map(|t| TierMetrics::new(config.metrics.histogram_size, t.period()))
                .collect()
        } else {
            Vec::new()
        };

        Self {
            tasks,
            state: StateMachine::new(),
            base_hz,
            base_period: config.base_period(),
            enabled,
            tick: 0,
            counters: [0; 4],
            metrics,
            overrun_policy: config.on_overrun,
            watchdog: None,
            on_watchdog: None,
            next_deadline: None,
            resyncs: 0,
            last_fault: None,
        }
    }

    /// Create a dispatcher with default configuration.
    pub fn with_defaults(tasks: T) -> Self {
        Self::new(tasks, &DispatcherConfig::default())
    }

    /// Attach a watchdog, armed on [`Dispatcher::start`].
    pub fn set_watchdog(&mut self, watchdog: Watchdog, on_expire: Option<ExpiryCallback>) {
        self.watchdog = Some(watchdog);
        self.on_watchdog = on_expire;
    }

    /// Current lifecycle state.
    pub fn state(&self) -> DispatcherState {
        self.state.state()
    }

    /// Number of base ticks executed.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Base tick rate in hertz.
    pub fn base_hz(&self) -> u32 {
        self.base_hz
    }

    /// Base tick period.
    pub fn base_period(&self) -> Duration {
        self.base_period
    }

    /// Tiers this dispatcher fires.
    pub fn enabled_tiers(&self) -> TierSet {
        self.enabled
    }

    /// Number of times `tier` has fired (wrapping).
    pub fn counter(&self, tier: Tier) -> u32 {
        self.counters[tier.index()]
    }

    /// All tier counters, indexed by [`Tier::index`].
    pub fn counters(&self) -> [u32; 4] {
        self.counters
    }

    /// Execution metrics of `tier`, if collected.
    pub fn metrics(&self, tier: Tier) -> Option<&TierMetrics> {
        self.metrics.get(tier.index())
    }

    /// Times the loop fell behind and resynchronized its deadline.
    pub fn resyncs(&self) -> u64 {
        self.resyncs
    }

    /// Report frozen by the last fault.
    pub fn last_fault(&self) -> Option<&FaultReport> {
        self.last_fault.as_ref()
    }

    /// Whether the watchdog has expired.
    pub fn watchdog_expired(&self) -> bool {
        self.watchdog.as_ref().is_some_and(Watchdog::has_expired)
    }

    /// The periodic tasks.
    pub fn tasks(&self) -> &T {
        &self.tasks
    }

    /// The periodic tasks, mutably.
    pub fn tasks_mut(&mut self) -> &mut T {
        &mut self.tasks
    }

    /// Run the lifecycle hooks.
    ///
    /// Transitions BOOT → INIT → READY, or INIT → FAULT if a hook fails.
    ///
    /// # Errors
    ///
    /// Returns [`SbError::BringUp`] naming the hook that returned false, or
    /// an invalid-transition error if called twice.
    pub fn initialize(&mut self, board: &mut dyn Board) -> SbResult<()> {
        info!(base_hz = self.base_hz, "Initializing dispatcher");

        self.state.transition(DispatcherState::Init)?;

        if !self.tasks.init(board) {
            return Err(self.fail_bring_up("init"));
        }
        if !self.tasks.register_telemetry() {
            return Err(self.fail_bring_up("register_telemetry"));
        }

        self.state.transition(DispatcherState::Ready)?;
        info!("Dispatcher initialized, state: READY");
        Ok(())
    }

    fn fail_bring_up(&mut self, hook: &'static str) -> SbError {
        let err = SbError::BringUp(hook);
        self.enter_fault(&err);
        err
    }

    /// Start dispatching.
    ///
    /// Transitions READY → RUNNING and arms the watchdog.
    ///
    /// # Errors
    ///
    /// Returns an error if the dispatcher is not READY or the watchdog
    /// thread cannot be started.
    pub fn start(&mut self) -> SbResult<()> {
        self.state.transition(DispatcherState::Running)?;

        if let Some(wd) = self.watchdog.as_mut() {
            let callback = self.on_watchdog.clone();
            wd.start(move || {
                if let Some(cb) = &callback {
                    cb();
                }
            })?;
        }

        info!(
            base_period_us = self.base_period.as_micros(),
            tiers = self.enabled.len(),
            "Starting periodic dispatch"
        );
        self.next_deadline = Some(Instant::now() + self.base_period);
        Ok(())
    }

    /// Execute one base tick without waiting.
    ///
    /// # Errors
    ///
    /// Returns an error if the dispatcher is not RUNNING, the watchdog has
    /// expired, or a tier overran under [`OverrunPolicy::Fault`].
    pub fn run_tick(&mut self) -> SbResult<TickResult> {
        if self.state.state() != DispatcherState::Running {
            return Err(SbError::Fault(format!(
                "cannot dispatch in state {}",
                self.state.state()
            )));
        }

        if let Some(wd) = &self.watchdog {
            if wd.has_expired() {
                let err = SbError::WatchdogTimeout(format!(
                    "no tick for {} ms",
                    wd.time_since_kick().as_millis()
                ));
                self.enter_fault(&err);
                return Err(err);
            }
            wd.kick();
        }

        let tick = self.tick;
        let mut fired = TierSet::empty();
        let tick_start = Instant::now();

        for tier in Tier::DISPATCH_ORDER {
            if !self.enabled.contains(tier) || tick % u64::from(tier.divisor(self.base_hz)) != 0 {
                continue;
            }

            let idx = tier.index();
            let count = self.counters[idx];
            let call_start = Instant::now();
            self.tasks.run(tier, count);
            let elapsed = call_start.elapsed();

            self.counters[idx] = count.wrapping_add(1);
            fired.insert(tier);
            if let Some(m) = self.metrics.get_mut(idx) {
                m.record(elapsed);
            }

            if elapsed >= tier.period() {
                self.handle_overrun(tier, count, elapsed)?;
            }
        }

        self.tick += 1;
        let elapsed = tick_start.elapsed();
        trace!(tick, fired = fired.len(), elapsed_us = elapsed.as_micros(), "Tick complete");

        Ok(TickResult {
            tick,
            fired,
            elapsed,
        })
    }

    fn fastest_tier(&self) -> Option<Tier> {
        Tier::DISPATCH_ORDER
            .into_iter()
            .find(|&tier| self.enabled.contains(tier))
    }

    fn handle_overrun(&mut self, tier: Tier, count: u32, elapsed: Duration) -> SbResult<()> {
        match self.overrun_policy {
            OverrunPolicy::Ignore => Ok(()),
            OverrunPolicy::Warn => {
                warn!(
                    %tier,
                    count,
                    elapsed_us = elapsed.as_micros(),
                    budget_us = tier.period().as_micros(),
                    "Deadline overrun (policy: warn)"
                );
                Ok(())
            }
            OverrunPolicy::Fault => {
                let err = SbError::DeadlineOverrun {
                    tier,
                    count,
                    budget_ns: as_ns(tier.period()),
                    elapsed_ns: as_ns(elapsed),
                };
                self.enter_fault(&err);
                Err(err)
            }
        }
    }

    /// Execute one base tick, then sleep until the next tick deadline.
    ///
    /// Finishing a tick a full base period or more past the next deadline
    /// means the fastest enabled tier missed its slot. Under
    /// [`OverrunPolicy::Fault`] that is a deadline overrun for that tier;
    /// otherwise the deadline is resynchronized and the slots are skipped.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`Dispatcher::run_tick`], and returns
    /// [`SbError::DeadlineOverrun`] for a missed slot under the fault policy.
    pub fn run_cycle(&mut self) -> SbResult<TickResult> {
        let result = self.run_tick()?;

        if let Some(deadline) = self.next_deadline {
            let now = Instant::now();
            if now >= deadline + self.base_period {
                if self.overrun_policy == OverrunPolicy::Fault {
                    if let Some(tier) = self.fastest_tier() {
                        let count = self.counters[tier.index()];
                        self.handle_overrun(tier, count, now - deadline)?;
                    }
                }
                self.resyncs += 1;
                warn!(
                    tick = result.tick,
                    behind_us = (now - deadline).as_micros(),
                    "Dispatcher fell behind, resynchronizing"
                );
                self.next_deadline = Some(now + self.base_period);
            } else {
                wait_until(deadline);
                self.next_deadline = Some(deadline + self.base_period);
            }
        }

        Ok(result)
    }

    /// Dispatch until `stop` is raised, `max_ticks` ticks have run, or a
    /// fault occurs. Blocks the calling thread.
    ///
    /// A requested stop drives the outputs safe before returning.
    ///
    /// # Errors
    ///
    /// Returns the error that faulted dispatch.
    pub fn run(&mut self, stop: &AtomicBool, max_ticks: Option<u64>) -> SbResult<()> {
        info!("Entering dispatch loop");

        while self.state.state() == DispatcherState::Running {
            if stop.load(Ordering::Acquire) || max_ticks.is_some_and(|max| self.tick >= max) {
                self.stop()?;
                break;
            }
            self.run_cycle()?;
        }

        info!(
            final_state = %self.state.state(),
            ticks = self.tick,
            "Dispatch loop exited"
        );
        Ok(())
    }

    /// Stop dispatching and drive outputs safe.
    ///
    /// Transitions READY/RUNNING → STOPPED. Calling it after a fault only
    /// re-applies the safe state.
    ///
    /// # Errors
    ///
    /// Returns an invalid-transition error from BOOT or INIT.
    pub fn stop(&mut self) -> SbResult<()> {
        info!("Stopping dispatcher");

        if !self.state.state().is_terminal() {
            self.state.transition(DispatcherState::Stopped)?;
        }
        if let Some(wd) = self.watchdog.as_mut() {
            wd.stop();
        }
        self.tasks.safe_state();
        Ok(())
    }

    /// Enter FAULT: drive outputs safe, disarm the watchdog, and freeze a
    /// [`FaultReport`] for `error`.
    pub fn enter_fault(&mut self, error: &SbError) {
        error!(%error, tick = self.tick, "Entering FAULT state");

        self.state.enter_fault();
        if let Some(wd) = self.watchdog.as_mut() {
            wd.stop();
        }

        debug!("Driving outputs to safe state");
        self.tasks.safe_state();

        let mut report = FaultReport::from_error(error, self.tick, self.counters);
        for tier in Tier::ALL {
            if let Some(m) = self.metrics.get(tier.index()) {
                report = report.with_metrics(tier, m.snapshot());
            }
        }
        self.last_fault = Some(report);
    }
}

/// Sleep until `deadline` using an absolute monotonic sleep.
#[cfg(target_os = "linux")]
#[allow(unsafe_code, clippy::cast_possible_wrap, clippy::cast_possible_truncation)]
fn wait_until(deadline: Instant) {
    let now = Instant::now();
    if deadline <= now {
        return;
    }
    let remaining = deadline - now;

    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `ts` is a valid out-pointer
    if unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) } != 0 {
        std::thread::sleep(remaining);
        return;
    }

    let mut nsec = i64::from(ts.tv_nsec) + i64::from(remaining.subsec_nanos());
    let mut sec = i64::from(ts.tv_sec) + remaining.as_secs() as i64;
    if nsec >= 1_000_000_000 {
        nsec -= 1_000_000_000;
        sec += 1;
    }
    let target = libc::timespec {
        tv_sec: sec as libc::time_t,
        tv_nsec: nsec as libc::c_long,
    };

    loop {
        // SAFETY: `target` is a valid timespec; the remainder pointer may be
        // null for absolute sleeps
        let rc = unsafe {
            libc::clock_nanosleep(
                libc::CLOCK_MONOTONIC,
                libc::TIMER_ABSTIME,
                &target,
                std::ptr::null_mut(),
            )
        };
        if rc != libc::EINTR {
            break;
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn wait_until(deadline: Instant) {
    let now = Instant::now();
    if deadline > now {
        std::thread::sleep(deadline - now);
    }
}

/// Builder for configuring the dispatcher.
pub struct DispatcherBuilder<T: PeriodicTasks> {
    tasks: T,
    config: DispatcherConfig,
    watchdog_timeout: Option<Duration>,
    on_watchdog: Option<ExpiryCallback>,
}

impl<T: PeriodicTasks> DispatcherBuilder<T> {
    /// Create a builder with default configuration.
    pub fn new(tasks: T) -> Self {
        Self {
            tasks,
            config: DispatcherConfig::default(),
            watchdog_timeout: None,
            on_watchdog: None,
        }
    }

    /// Use a full configuration.
    #[must_use]
    pub fn config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    /// Enable or disable the 1 kHz tier.
    #[must_use]
    pub fn run_1khz(mut self, enabled: bool) -> Self {
        self.config.run_1khz = enabled;
        self
    }

    /// Set the overrun policy.
    #[must_use]
    pub fn overrun_policy(mut self, policy: OverrunPolicy) -> Self {
        self.config.on_overrun = policy;
        self
    }

    /// Attach a watchdog with the given timeout.
    #[must_use]
    pub fn watchdog_timeout(mut self, timeout: Duration) -> Self {
        self.watchdog_timeout = Some(timeout);
        self
    }

    /// Run `f` when the watchdog expires.
    #[must_use]
    pub fn on_watchdog_expire<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_watchdog = Some(Arc::new(f));
        self
    }

    /// Build the dispatcher.
    pub fn build(self) -> Dispatcher<T> {
        let mut dispatcher = Dispatcher::new(self.tasks, &self.config);
        if let Some(timeout) = self.watchdog_timeout {
            dispatcher.set_watchdog(Watchdog::new(timeout), self.on_watchdog);
        }
        dispatcher
    }
}
