//! Device memory statistics
//!
//! A device backend answers a memory-stats query with a flat, string-keyed
//! counter map (e.g. `allocated_bytes.all.peak`) and, when the allocator keeps
//! one, an ordered registry of discrete memory events.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Peak bytes allocated since the last peak reset
pub const ALLOCATED_PEAK: &str = "allocated_bytes.all.peak";

/// Bytes currently allocated
pub const ALLOCATED_CURRENT: &str = "allocated_bytes.all.current";

/// Peak bytes reserved by the allocator cache since the last peak reset
pub const RESERVED_PEAK: &str = "reserved_bytes.all.peak";

/// Bytes currently reserved by the allocator cache
pub const RESERVED_CURRENT: &str = "reserved_bytes.all.current";

/// Lookup failure on a [`MemoryStats`] snapshot
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StatError {
    #[error("memory stat `{0}` not reported by device")]
    Missing(String),
}

/// A discrete allocator event exposed by the device (e.g. a named checkpoint)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEventRecord {
    /// Event name as registered with the allocator
    pub name: String,

    /// `allocated_bytes.all.current` at the time of the event
    pub allocated_bytes: u64,

    /// Seconds since UNIX epoch
    pub timestamp: f64,
}

/// Snapshot of the device memory counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    counters: BTreeMap<String, u64>,

    /// `None` when the device keeps no event registry at all, which is
    /// different from a registry that happens to be empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    events: Option<Vec<MemoryEventRecord>>,
}

impl MemoryStats {
    /// Create an empty snapshot without an event registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style counter insertion
    pub fn with_counter(mut self, key: impl Into<String>, value: u64) -> Self {
        self.insert(key, value);
        self
    }

    /// Builder-style event registry
    pub fn with_events(mut self, events: Vec<MemoryEventRecord>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: u64) {
        self.counters.insert(key.into(), value);
    }

    /// Look up a counter by its full key
    pub fn get(&self, key: &str) -> Result<u64, StatError> {
        self.counters
            .get(key)
            .copied()
            .ok_or_else(|| StatError::Missing(key.to_string()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.counters.contains_key(key)
    }

    pub fn peak_allocated(&self) -> Result<u64, StatError> {
        self.get(ALLOCATED_PEAK)
    }

    pub fn current_allocated(&self) -> Result<u64, StatError> {
        self.get(ALLOCATED_CURRENT)
    }

    pub fn peak_reserved(&self) -> Result<u64, StatError> {
        self.get(RESERVED_PEAK)
    }

    /// Discrete memory events, in registration order
    pub fn events(&self) -> Option<&[MemoryEventRecord]> {
        self.events.as_deref()
    }

    /// Signed change of a counter relative to an earlier snapshot
    pub fn delta_since(&self, baseline: &MemoryStats, key: &str) -> Result<i64, StatError> {
        let now = self.get(key)? as i128;
        let then = baseline.get(key)? as i128;
        Ok((now - then).clamp(i64::MIN as i128, i64::MAX as i128) as i64)
    }

    /// Iterate over all counters in key order
    pub fn counters(&self) -> impl Iterator<Item = (&str, u64)> {
        self.counters.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

/// One point of a session's memory timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemorySample {
    /// Event name, `None` for plain current-usage samples
    pub label: Option<String>,

    /// Allocated size in megabytes
    pub size_mb: f64,

    /// Seconds since UNIX epoch
    pub timestamp: f64,
}

impl MemorySample {
    pub fn unlabeled(size_mb: f64, timestamp: f64) -> Self {
        Self {
            label: None,
            size_mb,
            timestamp,
        }
    }

    pub fn labeled(label: impl Into<String>, size_mb: f64, timestamp: f64) -> Self {
        Self {
            label: Some(label.into()),
            size_mb,
            timestamp,
        }
    }
}
