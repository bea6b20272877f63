//! Fault reports for postmortem diagnosis.
//!
//! When dispatch stops on a fault the dispatcher freezes a [`FaultReport`]
//! describing what failed, at which tick, and how far every tier had counted.
//! The daemon persists it as JSON so the cause survives the process exit.

use sb_common::error::{SbError, SbResult};
use sb_common::metrics::MetricsSnapshot;
use sb_common::tier::Tier;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

/// Why dispatch faulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FaultReason {
    /// A tier did not return inside its slot.
    DeadlineOverrun,
    /// The dispatcher loop stopped kicking the watchdog.
    WatchdogTimeout,
    /// A lifecycle hook returned false.
    BringUp,
    /// Any other runtime fault.
    Other,
}

impl std::fmt::Display for FaultReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DeadlineOverrun => write!(f, "DEADLINE_OVERRUN"),
            Self::WatchdogTimeout => write!(f, "WATCHDOG_TIMEOUT"),
            Self::BringUp => write!(f, "BRING_UP"),
            Self::Other => write!(f, "OTHER"),
        }
    }
}

/// Frozen state of the dispatcher at the moment it faulted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaultReport {
    /// Fault category.
    pub reason: FaultReason,
    /// Human-readable description.
    pub message: String,
    /// Tier that overran, if any.
    pub tier: Option<Tier>,
    /// Invocation count passed to the overrunning call.
    pub count: Option<u32>,
    /// Base tick on which the fault occurred.
    pub tick: u64,
    /// Budget of the overrunning tier in nanoseconds.
    pub budget_ns: Option<u64>,
    /// Measured execution time of the overrunning call in nanoseconds.
    pub elapsed_ns: Option<u64>,
    /// Invocation counter of every tier when dispatch stopped.
    pub counters: BTreeMap<Tier, u32>,
    /// Per-tier execution metrics, when collected.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metrics: BTreeMap<Tier, MetricsSnapshot>,
}

impl FaultReport {
    /// Build a report from the error that stopped dispatch.
    #[must_use]
    pub fn from_error(error: &SbError, tick: u64, counters: [u32; 4]) -> Self {
        let mut report = Self {
            reason: FaultReason::Other,
            message: error.to_string(),
            tier: None,
            count: None,
            tick,
            budget_ns: None,
            elapsed_ns: None,
            counters: Tier::ALL.iter().map(|&t| (t, counters[t.index()])).collect(),
            metrics: BTreeMap::new(),
        };

        match *error {
            SbError::DeadlineOverrun {
                tier,
                count,
                budget_ns,
                elapsed_ns,
            } => {
                report.reason = FaultReason::DeadlineOverrun;
                report.tier = Some(tier);
                report.count = Some(count);
                report.budget_ns = Some(budget_ns);
                report.elapsed_ns = Some(elapsed_ns);
            }
            SbError::WatchdogTimeout(_) => report.reason = FaultReason::WatchdogTimeout,
            SbError::BringUp(_) => report.reason = FaultReason::BringUp,
            _ => {}
        }

        report
    }

    /// Attach a metrics snapshot for `tier`.
    #[must_use]
    pub fn with_metrics(mut self, tier: Tier, snapshot: MetricsSnapshot) -> Self {
        self.metrics.insert(tier, snapshot);
        self
    }

    /// Render the report as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns [`SbError::Io`] if serialization fails.
    pub fn to_json(&self) -> SbResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| SbError::Io(format!("fault report: {e}")))
    }

    /// Write the report as JSON to `path`, replacing any previous report.
    ///
    /// # Errors
    ///
    /// Returns [`SbError::Io`] if the file cannot be written.
    pub fn write_json(&self, path: &Path) -> SbResult<()> {
        let json = self.to_json()?;
        std::fs::write(path, json)
            .map_err(|e| SbError::Io(format!("failed to write {}: {e}", path.display())))?;
        info!(path = %path.display(), reason = %self.reason, "Fault report written");
        Ok(())
    }
}
