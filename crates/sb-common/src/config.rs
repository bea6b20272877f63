//! Configuration structures for the dispatcher and the switchboard application.
//!
//! Every field has a default, so an empty TOML file is a valid configuration.

use crate::pin::PinId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Run the 1000 Hz tier. When disabled the base tick drops to 10 ms.
    pub run_1khz: bool,

    /// Watchdog timeout for the dispatcher loop.
    #[serde(with = "humantime_serde")]
    pub watchdog_timeout: Duration,

    /// What to do when a tier misses its deadline.
    pub on_overrun: OverrunPolicy,

    /// Where to write the JSON fault report after a fatal overrun.
    pub fault_report: Option<PathBuf>,

    /// Real-time configuration of the dispatcher thread.
    pub realtime: RealtimeConfig,

    /// Execution-time metrics.
    pub metrics: MetricsConfig,

    /// Pulse application settings.
    pub switchboard: SwitchboardConfig,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            run_1khz: true,
            watchdog_timeout: Duration::from_secs(2),
            on_overrun: OverrunPolicy::Fault,
            fault_report: None,
            realtime: RealtimeConfig::default(),
            metrics: MetricsConfig::default(),
            switchboard: SwitchboardConfig::default(),
        }
    }
}

impl DispatcherConfig {
    /// Base tick rate in hertz: 1000 with the 1 kHz tier, 100 without.
    #[must_use]
    pub fn base_hz(&self) -> u32 {
        if self.run_1khz {
            1000
        } else {
            100
        }
    }

    /// Base tick period.
    #[must_use]
    pub fn base_period(&self) -> Duration {
        Duration::from_micros(1_000_000 / u64::from(self.base_hz()))
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or fails validation.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let sb = &self.switchboard;
        if sb.pulse_ticks == 0 {
            return Err(ConfigError::Invalid("switchboard.pulse_ticks must be at least 1".into()));
        }
        if sb.pulse_output == sb.edge_input {
            return Err(ConfigError::Invalid(format!(
                "switchboard.pulse_output and switchboard.edge_input are both {}",
                sb.pulse_output
            )));
        }
        if self.watchdog_timeout <= self.base_period() {
            return Err(ConfigError::Invalid(format!(
                "watchdog_timeout ({}) must exceed the base tick ({})",
                humantime::format_duration(self.watchdog_timeout),
                humantime::format_duration(self.base_period())
            )));
        }
        Ok(())
    }
}

/// Policy for handling deadline overruns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OverrunPolicy {
    /// Enter fault state on overrun (hard real-time contract).
    #[default]
    Fault,
    /// Log a warning and keep dispatching.
    Warn,
    /// Count the overrun in metrics only.
    Ignore,
}

/// Pulse application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchboardConfig {
    /// Output pin driven by the 10 Hz pulse.
    pub pulse_output: PinId,
    /// Input pin watched for falling edges.
    pub edge_input: PinId,
    /// Pulse length in 10 Hz ticks.
    pub pulse_ticks: u32,
}

impl Default for SwitchboardConfig {
    fn default() -> Self {
        Self {
            pulse_output: PinId::new(2, 0),
            edge_input: PinId::new(2, 1),
            pulse_ticks: 5,
        }
    }
}

/// Real-time scheduling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Enable real-time scheduling (requires privileges).
    pub enabled: bool,

    /// Scheduler policy: "fifo", "rr" or "other".
    pub policy: SchedPolicy,

    /// Scheduler priority (1-99 for RT policies).
    pub priority: u8,

    /// CPU affinity for the dispatcher thread.
    pub cpu_affinity: CpuAffinity,

    /// Lock all memory pages (mlockall).
    pub lock_memory: bool,

    /// Fail at startup if RT requirements cannot be met.
    pub fail_fast: bool,

    /// Stack size of the dispatcher thread in bytes.
    pub stack_size: usize,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            policy: SchedPolicy::Fifo,
            priority: 90,
            cpu_affinity: CpuAffinity::None,
            lock_memory: true,
            fail_fast: false,
            stack_size: 256 * 1024,
        }
    }
}

/// Scheduler policy for real-time threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SchedPolicy {
    /// `SCHED_FIFO`.
    #[default]
    Fifo,
    /// `SCHED_RR`.
    Rr,
    /// `SCHED_OTHER` (non-RT).
    Other,
}

/// CPU affinity specification: absent, one core, or a list of cores.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CpuAffinity {
    /// OS chooses.
    #[default]
    None,
    /// Pin to a single core.
    Single(usize),
    /// Pin to a set of cores.
    Set(Vec<usize>),
}

impl CpuAffinity {
    /// Cores named by this affinity, empty for [`CpuAffinity::None`].
    #[must_use]
    pub fn cpus(&self) -> Vec<usize> {
        match self {
            Self::None => Vec::new(),
            Self::Single(cpu) => vec![*cpu],
            Self::Set(cpus) => cpus.clone(),
        }
    }
}

impl Serialize for CpuAffinity {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            CpuAffinity::None => serializer.serialize_none(),
            CpuAffinity::Single(cpu) => serializer.serialize_u64(*cpu as u64),
            CpuAffinity::Set(cpus) => cpus.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for CpuAffinity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::{self, Visitor};

        struct AffinityVisitor;

        impl<'de> Visitor<'de> for AffinityVisitor {
            type Value = CpuAffinity;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("null, a core index, or an array of core indices")
            }

            fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
                Ok(CpuAffinity::None)
            }

            fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
                Ok(CpuAffinity::None)
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
                usize::try_from(value)
                    .map(CpuAffinity::Single)
                    .map_err(|_| de::Error::custom("core index out of range"))
            }

            fn visit_i64<E: de::Error>(self, value: i64) -> Result<Self::Value, E> {
                usize::try_from(value)
                    .map(CpuAffinity::Single)
                    .map_err(|_| de::Error::custom("core index cannot be negative"))
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: de::SeqAccess<'de>,
            {
                let mut cpus = Vec::new();
                while let Some(cpu) = seq.next_element::<usize>()? {
                    cpus.push(cpu);
                }
                Ok(CpuAffinity::Set(cpus))
            }
        }

        deserializer.deserialize_any(AffinityVisitor)
    }
}

/// Execution-time metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable per-tier metrics collection.
    pub enabled: bool,

    /// Samples retained per tier for percentile computation.
    pub histogram_size: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            histogram_size: 1024,
        }
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error.
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Parsed values violate a constraint.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Serde helper module for `Duration` using humantime format.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(&humantime::format_duration(*duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
