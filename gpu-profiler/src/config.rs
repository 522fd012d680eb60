//! Configuration for measurement sessions

use crate::device::DeviceId;
use crate::error::{ProfilerError, Result};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// How elapsed time is broken down
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimingMode {
    /// Only the total wall-clock time of the session
    #[default]
    Aggregate,
    /// Total time plus named regions timed with device events
    Events,
}

impl std::str::FromStr for TimingMode {
    type Err = ProfilerError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "aggregate" => Ok(TimingMode::Aggregate),
            "events" => Ok(TimingMode::Events),
            _ => Err(ProfilerError::InvalidConfig(format!("unknown timing mode: {}", s))),
        }
    }
}

/// How a session isolates its peak-memory reading
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeakTracking {
    /// Reset the device-global peak counters at begin, so the reported peak
    /// belongs to the session. Concurrent sessions on the same device see
    /// each other's resets.
    #[default]
    Reset,
    /// Leave device counters alone; capture a baseline at begin and report
    /// growth against it. The reported peak is the device's lifetime peak.
    Snapshot,
}

impl std::str::FromStr for PeakTracking {
    type Err = ProfilerError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "snapshot" => Ok(PeakTracking::Snapshot),
            "reset" => Ok(PeakTracking::Reset),
            _ => Err(ProfilerError::InvalidConfig(format!("unknown peak tracking: {}", s))),
        }
    }
}

/// Session configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilerConfig {
    /// Device the session is expected to run on
    pub device: DeviceId,

    /// Read and report memory counters
    pub profile_memory: bool,

    pub timing: TimingMode,

    /// Ignored unless `profile_memory` is set
    pub peak_tracking: PeakTracking,
}

impl ProfilerConfig {
    /// Configuration for `device` with memory profiling on and no env lookups
    pub fn new(device: DeviceId) -> Self {
        Self {
            device,
            profile_memory: true,
            timing: TimingMode::default(),
            peak_tracking: PeakTracking::default(),
        }
    }

    pub fn profile_memory(mut self, enabled: bool) -> Self {
        self.profile_memory = enabled;
        self
    }

    pub fn timing(mut self, timing: TimingMode) -> Self {
        self.timing = timing;
        self
    }

    pub fn peak_tracking(mut self, peak_tracking: PeakTracking) -> Self {
        self.peak_tracking = peak_tracking;
        self
    }

    /// Defaults overridden by `GPUPERF_DEVICE`, `GPUPERF_PROFILE_MEMORY`,
    /// `GPUPERF_TIMING` and `GPUPERF_PEAK_TRACKING`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::new(DeviceId::default());

        if let Ok(device) = std::env::var("GPUPERF_DEVICE") {
            config.device = device.parse()?;
        }
        if let Ok(flag) = std::env::var("GPUPERF_PROFILE_MEMORY") {
            config.profile_memory = parse_flag(&flag).ok_or_else(|| {
                ProfilerError::InvalidConfig(format!("GPUPERF_PROFILE_MEMORY={}", flag))
            })?;
        }
        if let Ok(timing) = std::env::var("GPUPERF_TIMING") {
            config.timing = timing.parse()?;
        }
        if let Ok(tracking) = std::env::var("GPUPERF_PEAK_TRACKING") {
            config.peak_tracking = tracking.parse()?;
        }

        Ok(config)
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| ProfilerError::InvalidConfig(e.to_string()))
    }

    /// Load a TOML configuration file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self::new(DeviceId::default())
    }
}

fn parse_flag(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
