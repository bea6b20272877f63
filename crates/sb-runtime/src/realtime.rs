//! Real-time setup for the dispatcher thread.
//!
//! Called from the dispatcher thread itself before the first tick:
//! - Memory locking (mlockall) so no tier takes a page fault
//! - SCHED_FIFO/SCHED_RR priority so the tiers sit above everything else
//! - CPU affinity to keep housekeeping off the dispatcher's core
//!
//! Missing privileges degrade to warnings unless `fail_fast` is set.

#![allow(unused_imports)] // Platform-specific code may not use all imports

use sb_common::config::{CpuAffinity, RealtimeConfig, SchedPolicy};
use sb_common::error::{SbError, SbResult};
use tracing::{debug, error, info, warn};

/// What the real-time setup actually achieved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RealtimeStatus {
    /// Memory locked with mlockall.
    pub memory_locked: bool,
    /// Applied scheduler policy.
    pub scheduler_policy: Option<SchedPolicy>,
    /// Applied priority.
    pub scheduler_priority: Option<u8>,
    /// Cores the thread is pinned to.
    pub cpu_affinity: Option<Vec<usize>>,
}

/// Apply the real-time configuration to the calling thread.
///
/// # Errors
///
/// Returns an error if `fail_fast` validation fails or a system call fails
/// for a reason other than missing privileges.
pub fn init_realtime(config: &RealtimeConfig) -> SbResult<RealtimeStatus> {
    if !config.enabled {
        info!("Real-time scheduling disabled in configuration");
        return Ok(RealtimeStatus::default());
    }

    if config.fail_fast {
        validate_rt_capabilities(config)?;
    }

    let status = RealtimeStatus {
        memory_locked: config.lock_memory && lock_memory()?,
        cpu_affinity: set_cpu_affinity(&config.cpu_affinity)?,
        ..set_scheduler(config.policy, config.priority)?
    };

    info!(?status, "Real-time initialization complete");
    Ok(status)
}

#[cfg(target_os = "linux")]
fn lock_memory() -> SbResult<bool> {
    use nix::sys::mman::{mlockall, MlockAllFlags};

    match mlockall(MlockAllFlags::MCL_CURRENT | MlockAllFlags::MCL_FUTURE) {
        Ok(()) => {
            info!("Memory locked");
            Ok(true)
        }
        Err(nix::errno::Errno::EPERM) => {
            warn!("mlockall failed with EPERM (no CAP_IPC_LOCK); tiers may take page faults");
            Ok(false)
        }
        Err(e) => Err(SbError::Config(format!("mlockall failed: {e}"))),
    }
}

#[cfg(not(target_os = "linux"))]
fn lock_memory() -> SbResult<bool> {
    warn!("mlockall not available on this platform");
    Ok(false)
}

#[cfg(target_os = "linux")]
fn set_scheduler(policy: SchedPolicy, priority: u8) -> SbResult<RealtimeStatus> {
    let linux_policy = match policy {
        SchedPolicy::Fifo => libc::SCHED_FIFO,
        SchedPolicy::Rr => libc::SCHED_RR,
        SchedPolicy::Other => {
            debug!("Using SCHED_OTHER (non-RT) scheduling");
            return Ok(RealtimeStatus {
                scheduler_policy: Some(SchedPolicy::Other),
                ..RealtimeStatus::default()
            });
        }
    };

    let clamped = priority.clamp(1, 99);
    if clamped != priority {
        warn!(requested = priority, clamped, "Scheduler priority clamped to 1-99");
    }

    let param = libc::sched_param {
        sched_priority: i32::from(clamped),
    };
    // SAFETY: pid 0 targets the calling thread and `param` outlives the call
    let result = unsafe { libc::sched_setscheduler(0, linux_policy, &param) };

    if result == -1 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EPERM) {
            warn!("sched_setscheduler failed with EPERM (no CAP_SYS_NICE); running without RT priority");
            return Ok(RealtimeStatus::default());
        }
        return Err(SbError::Config(format!("sched_setscheduler failed: {err}")));
    }

    info!(?policy, priority = clamped, "Real-time scheduler configured");
    Ok(RealtimeStatus {
        scheduler_policy: Some(policy),
        scheduler_priority: Some(clamped),
        ..RealtimeStatus::default()
    })
}

#[cfg(not(target_os = "linux"))]
fn set_scheduler(policy: SchedPolicy, priority: u8) -> SbResult<RealtimeStatus> {
    warn!(?policy, priority, "Real-time scheduling not available on this platform");
    Ok(RealtimeStatus::default())
}

#[cfg(target_os = "linux")]
fn set_cpu_affinity(affinity: &CpuAffinity) -> SbResult<Option<Vec<usize>>> {
    use nix::sched::{sched_setaffinity, CpuSet};
    use nix::unistd::Pid;

    let cpus = affinity.cpus();
    if cpus.is_empty() {
        return Ok(None);
    }

    let mut cpu_set = CpuSet::new();
    for &cpu in &cpus {
        cpu_set
            .set(cpu)
            .map_err(|e| SbError::Config(format!("invalid CPU index {cpu}: {e}")))?;
    }

    match sched_setaffinity(Pid::from_raw(0), &cpu_set) {
        Ok(()) => {
            info!(?cpus, "CPU affinity set");
            Ok(Some(cpus))
        }
        Err(nix::errno::Errno::EINVAL) => {
            warn!(?cpus, "Invalid CPU set, affinity not applied");
            Ok(None)
        }
        Err(e) => Err(SbError::Config(format!("sched_setaffinity failed: {e}"))),
    }
}

#[cfg(not(target_os = "linux"))]
fn set_cpu_affinity(affinity: &CpuAffinity) -> SbResult<Option<Vec<usize>>> {
    if !affinity.cpus().is_empty() {
        warn!("CPU affinity not available on this platform");
    }
    Ok(None)
}

/// Real-time capabilities of the running process.
#[derive(Debug, Clone, Default)]
pub struct RtCapabilities {
    /// Running as root.
    pub is_root: bool,
    /// `RLIMIT_RTPRIO` soft limit.
    pub rtprio_limit: Option<u64>,
    /// `RLIMIT_MEMLOCK` soft limit.
    pub memlock_limit: Option<u64>,
    /// Kernel built with `PREEMPT_RT`.
    pub preempt_rt: bool,
}

impl RtCapabilities {
    /// RT scheduling is likely to succeed.
    #[must_use]
    pub fn can_use_rt_scheduling(&self) -> bool {
        self.is_root || self.rtprio_limit.is_some_and(|l| l > 0)
    }

    /// Memory locking is likely to succeed.
    #[must_use]
    pub fn can_lock_memory(&self) -> bool {
        #[cfg(unix)]
        {
            self.is_root || self.memlock_limit == Some(libc::RLIM_INFINITY)
        }
        #[cfg(not(unix))]
        {
            self.is_root
        }
    }
}

/// Probe the process for RT capabilities.
#[cfg(target_os = "linux")]
#[must_use]
pub fn check_rt_capabilities() -> RtCapabilities {
    // SAFETY: geteuid has no preconditions
    let mut caps = RtCapabilities {
        is_root: unsafe { libc::geteuid() } == 0,
        ..Default::default()
    };

    let mut rlim = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: `rlim` is a valid out-pointer for the duration of each call
    if unsafe { libc::getrlimit(libc::RLIMIT_RTPRIO, &mut rlim) } == 0 {
        caps.rtprio_limit = Some(rlim.rlim_cur);
    }
    if unsafe { libc::getrlimit(libc::RLIMIT_MEMLOCK, &mut rlim) } == 0 {
        caps.memlock_limit = Some(rlim.rlim_cur);
    }

    if let Ok(version) = std::fs::read_to_string("/proc/version") {
        caps.preempt_rt = version.contains("PREEMPT_RT") || version.contains("PREEMPT RT");
    }

    caps
}

/// Probe the process for RT capabilities.
#[cfg(not(target_os = "linux"))]
#[must_use]
pub fn check_rt_capabilities() -> RtCapabilities {
    RtCapabilities::default()
}

/// Fail if the configuration asks for RT features the process cannot get.
///
/// A missing `PREEMPT_RT` kernel only warns.
///
/// # Errors
///
/// Returns [`SbError::Config`] listing every unmet requirement.
pub fn validate_rt_capabilities(config: &RealtimeConfig) -> SbResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let caps = check_rt_capabilities();
    let mut issues = Vec::new();

    if !caps.preempt_rt {
        warn!("PREEMPT_RT kernel not detected; tier deadlines may be missed under load");
    }

    if config.policy != SchedPolicy::Other && !caps.can_use_rt_scheduling() {
        issues.push(format!(
            "cannot use SCHED_{:?}: RLIMIT_RTPRIO={:?}, root={}",
            config.policy, caps.rtprio_limit, caps.is_root
        ));
    }

    if config.lock_memory && !caps.can_lock_memory() {
        issues.push(format!(
            "cannot lock memory: RLIMIT_MEMLOCK={:?}, root={}",
            caps.memlock_limit, caps.is_root
        ));
    }

    if issues.is_empty() {
        info!("Real-time capabilities validated");
        Ok(())
    } else {
        let message = format!("real-time requirements not met: {}", issues.join("; "));
        error!("{message}");
        Err(SbError::Config(message))
    }
}
