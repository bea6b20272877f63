//! Signal handling for graceful daemon shutdown.
//!
//! SIGINT and SIGTERM raise a process-wide stop flag. The dispatcher polls the
//! same flag once per base tick, so a signal stops dispatch at the next tick
//! boundary with outputs driven safe. Handlers only touch atomics, which keeps
//! them async-signal-safe.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use tracing::{debug, info};

static SHUTDOWN: AtomicBool = AtomicBool::new(false);
static SIGNAL_COUNT: AtomicU32 = AtomicU32::new(0);
static LAST_SIGNAL: AtomicI32 = AtomicI32::new(0);

/// Signals that stop the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// SIGTERM - Graceful termination request.
    Terminate,
    /// SIGINT - Interrupt (Ctrl+C).
    Interrupt,
}

impl SignalKind {
    #[cfg(unix)]
    fn from_raw(signum: i32) -> Option<Self> {
        match signum {
            libc::SIGTERM => Some(Self::Terminate),
            libc::SIGINT => Some(Self::Interrupt),
            _ => None,
        }
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalKind::Terminate => write!(f, "SIGTERM"),
            SignalKind::Interrupt => write!(f, "SIGINT"),
        }
    }
}

#[cfg(unix)]
extern "C" fn on_signal(signum: libc::c_int) {
    SIGNAL_COUNT.fetch_add(1, Ordering::Relaxed);
    LAST_SIGNAL.store(signum, Ordering::Relaxed);
    SHUTDOWN.store(true, Ordering::Release);
}

/// Handle onto the process-wide stop flag.
#[derive(Debug, Clone, Copy)]
pub struct SignalHandler {
    _installed: (),
}

impl SignalHandler {
    /// Register handlers for SIGINT and SIGTERM.
    ///
    /// # Errors
    ///
    /// Returns the OS error if a handler cannot be registered.
    pub fn install() -> std::io::Result<Self> {
        #[cfg(unix)]
        {
            for signum in [libc::SIGINT, libc::SIGTERM] {
                // SAFETY: `on_signal` only stores to atomics
                #[allow(unsafe_code)]
                let previous = unsafe { libc::signal(signum, on_signal as libc::sighandler_t) };
                if previous == libc::SIG_ERR {
                    return Err(std::io::Error::last_os_error());
                }
            }
            debug!("Signal handlers registered for SIGINT and SIGTERM");
        }

        Ok(Self { _installed: () })
    }

    /// The flag raised by a stop signal. The dispatcher loop polls it.
    #[must_use]
    pub fn shutdown_flag(&self) -> &'static AtomicBool {
        &SHUTDOWN
    }

    /// Whether a stop has been requested.
    #[inline]
    #[must_use]
    pub fn shutdown_requested(&self) -> bool {
        SHUTDOWN.load(Ordering::Acquire)
    }

    /// Request a stop from inside the process.
    pub fn request_shutdown(&self) {
        if !SHUTDOWN.swap(true, Ordering::AcqRel) {
            info!("Shutdown requested");
        }
    }

    /// Number of stop signals received.
    #[must_use]
    pub fn signal_count(&self) -> u32 {
        SIGNAL_COUNT.load(Ordering::Relaxed)
    }

    /// Most recent stop signal, if any arrived.
    #[must_use]
    pub fn last_signal(&self) -> Option<SignalKind> {
        #[cfg(unix)]
        {
            SignalKind::from_raw(LAST_SIGNAL.load(Ordering::Relaxed))
        }
        #[cfg(not(unix))]
        {
            None
        }
    }
}
