//! Compute device abstraction
//!
//! A measurement session only needs a handful of device services: a
//! synchronization barrier, the allocator's memory counters and a pair of
//! timing events. Backends implement [`Device`]; the session never talks to a
//! runtime directly.

#[cfg(feature = "cuda")]
pub mod cuda;
pub mod simulated;

use crate::error::{ProfilerError, Result};
use gpuperf_shared::MemoryStats;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Device backend family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Cuda,
    Sim,
}

impl DeviceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Cuda => "cuda",
            DeviceKind::Sim => "sim",
        }
    }
}

/// Device identifier such as `cuda`, `cuda:1` or `sim:0`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceId {
    pub kind: DeviceKind,
    pub index: u32,
}

impl DeviceId {
    pub const fn new(kind: DeviceKind, index: u32) -> Self {
        Self { kind, index }
    }

    pub const fn cuda(index: u32) -> Self {
        Self::new(DeviceKind::Cuda, index)
    }

    pub const fn sim(index: u32) -> Self {
        Self::new(DeviceKind::Sim, index)
    }
}

impl Default for DeviceId {
    fn default() -> Self {
        Self::cuda(0)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.index)
    }
}

impl FromStr for DeviceId {
    type Err = ProfilerError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        let (kind, index) = match s.split_once(':') {
            Some((kind, index)) => (kind, Some(index)),
            None => (s, None),
        };

        let kind = match kind.to_lowercase().as_str() {
            "cuda" | "gpu" => DeviceKind::Cuda,
            "sim" | "simulated" => DeviceKind::Sim,
            _ => return Err(ProfilerError::InvalidDevice(s.to_string())),
        };

        let index = match index {
            Some(index) => index
                .parse()
                .map_err(|_| ProfilerError::InvalidDevice(s.to_string()))?,
            None => 0,
        };

        Ok(Self { kind, index })
    }
}

impl TryFrom<String> for DeviceId {
    type Error = ProfilerError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DeviceId> for String {
    fn from(id: DeviceId) -> Self {
        id.to_string()
    }
}

/// Services a measurement session consumes from a compute device.
///
/// All calls are blocking. Memory counters are device-global: resetting the
/// peak statistics affects every observer of the same device.
pub trait Device: Send + Sync {
    /// Timing marker recorded on the device's work queue
    type Event: Send;

    fn id(&self) -> DeviceId;

    /// Block until all previously queued work on the device has finished
    fn synchronize(&self) -> Result<()>;

    /// Reset the peak allocated/reserved watermarks to the current values
    fn reset_peak_memory_stats(&self) -> Result<()>;

    /// Query the allocator counters
    fn memory_stats(&self) -> Result<MemoryStats>;

    /// Record a timing event at the current position of the work queue
    fn record_event(&self) -> Result<Self::Event>;

    /// Milliseconds between two recorded events. Both events must have
    /// completed, which a preceding [`Device::synchronize`] guarantees.
    fn elapsed_ms(&self, start: &Self::Event, end: &Self::Event) -> Result<f64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_device_ids() {
        assert_eq!("cuda".parse::<DeviceId>().unwrap(), DeviceId::cuda(0));
        assert_eq!("cuda:1".parse::<DeviceId>().unwrap(), DeviceId::cuda(1));
        assert_eq!("CUDA:2".parse::<DeviceId>().unwrap(), DeviceId::cuda(2));
        assert_eq!("sim".parse::<DeviceId>().unwrap(), DeviceId::sim(0));
        assert_eq!(" sim:3 ".parse::<DeviceId>().unwrap(), DeviceId::sim(3));
    }

    #[test]
    fn test_parse_invalid_device_ids() {
        assert!("tpu:0".parse::<DeviceId>().is_err());
        assert!("cuda:".parse::<DeviceId>().is_err());
        assert!("cuda:-1".parse::<DeviceId>().is_err());
        assert!("".parse::<DeviceId>().is_err());
    }

    #[test]
    fn test_display_is_canonical() {
        let id: DeviceId = "cuda".parse().unwrap();
        assert_eq!(id.to_string(), "cuda:0");
        assert_eq!(id.to_string().parse::<DeviceId>().unwrap(), id);
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&DeviceId::sim(1)).unwrap();
        assert_eq!(json, "\"sim:1\"");
        let back: DeviceId = serde_json::from_str("\"cuda:4\"").unwrap();
        assert_eq!(back, DeviceId::cuda(4));
        assert!(serde_json::from_str::<DeviceId>("\"npu\"").is_err());
    }
}
