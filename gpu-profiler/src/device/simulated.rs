//! In-process device model
//!
//! Models a caching allocator and an asynchronous work queue closely enough
//! to drive measurement sessions without a GPU: allocations grow the reserved
//! pool in fixed segments that are kept on free, launched work completes in
//! the background, and every device call is logged for inspection.

use super::{Device, DeviceId};
use crate::error::{ProfilerError, Result};
use gpuperf_shared::types::memory::{
    ALLOCATED_CURRENT, ALLOCATED_PEAK, RESERVED_CURRENT, RESERVED_PEAK,
};
use gpuperf_shared::utils::time::system_time_secs_f64;
use gpuperf_shared::{MemoryEventRecord, MemoryStats};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Reservation granularity of the simulated caching allocator
pub const SEGMENT_BYTES: u64 = 2 * 1024 * 1024;

/// Number of most recent device calls kept in the call log
pub const CALL_LOG_CAPACITY: usize = 4096;

/// Device calls recorded by [`SimulatedDevice`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceCall {
    Synchronize,
    ResetPeakMemoryStats,
    MemoryStats,
    RecordEvent,
    ElapsedTime,
}

impl DeviceCall {
    fn operation(&self) -> &'static str {
        match self {
            DeviceCall::Synchronize => "synchronize",
            DeviceCall::ResetPeakMemoryStats => "reset_peak_memory_stats",
            DeviceCall::MemoryStats => "memory_stats",
            DeviceCall::RecordEvent => "record_event",
            DeviceCall::ElapsedTime => "elapsed_time",
        }
    }

    /// Whether the call touches the memory subsystem
    pub fn is_memory_call(&self) -> bool {
        matches!(self, DeviceCall::ResetPeakMemoryStats | DeviceCall::MemoryStats)
    }
}

/// Timing event: the instant at which the queue position it marks completes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimEvent {
    ready_at: Instant,
}

/// Handle to a live simulated allocation
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Allocation {
    id: u64,
    bytes: u64,
}

impl Allocation {
    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

#[derive(Default)]
struct State {
    allocated: u64,
    allocated_peak: u64,
    reserved: u64,
    reserved_peak: u64,
    live: HashMap<u64, u64>,
    next_id: u64,
    queue_drains_at: Option<Instant>,
    memory_events: Vec<MemoryEventRecord>,
    calls: VecDeque<DeviceCall>,
    failing: HashSet<DeviceCall>,
}

impl State {
    fn enter(&mut self, id: DeviceId, call: DeviceCall) -> Result<()> {
        if self.calls.len() == CALL_LOG_CAPACITY {
            self.calls.pop_front();
        }
        self.calls.push_back(call);
        if self.failing.contains(&call) {
            return Err(ProfilerError::device(id, call.operation(), "injected failure"));
        }
        Ok(())
    }

    fn queue_tail(&self, now: Instant) -> Instant {
        self.queue_drains_at.map_or(now, |t| t.max(now))
    }
}

/// A simulated accelerator
pub struct SimulatedDevice {
    id: DeviceId,
    capacity: Option<u64>,
    event_registry: bool,
    state: Mutex<State>,
}

impl SimulatedDevice {
    pub fn new(index: u32) -> Self {
        Self {
            id: DeviceId::sim(index),
            capacity: None,
            event_registry: false,
            state: Mutex::new(State::default()),
        }
    }

    /// Expose named memory events through [`Device::memory_stats`]
    pub fn with_event_registry(mut self) -> Self {
        self.event_registry = true;
        self
    }

    /// Fail allocations that would push reserved memory past `bytes`
    pub fn with_capacity(mut self, bytes: u64) -> Self {
        self.capacity = Some(bytes);
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Allocate `bytes`, growing the reserved pool segment by segment
    pub fn allocate(&self, bytes: u64) -> Result<Allocation> {
        let mut state = self.state();
        let allocated = state.allocated.saturating_add(bytes);
        let reserved = state.reserved.max(round_up(allocated, SEGMENT_BYTES));

        if let Some(capacity) = self.capacity {
            if reserved > capacity {
                return Err(ProfilerError::device(
                    self.id,
                    "allocate",
                    format!("out of memory: {} bytes requested, {} reserved", bytes, state.reserved),
                ));
            }
        }

        state.allocated = allocated;
        state.reserved = reserved;
        state.allocated_peak = state.allocated_peak.max(allocated);
        state.reserved_peak = state.reserved_peak.max(reserved);

        let id = state.next_id;
        state.next_id += 1;
        state.live.insert(id, bytes);
        trace!(device = %self.id, bytes, allocated, "allocate");

        Ok(Allocation { id, bytes })
    }

    /// Release an allocation. The reserved pool keeps its segments.
    pub fn free(&self, allocation: Allocation) -> Result<()> {
        let mut state = self.state();
        match state.live.remove(&allocation.id) {
            Some(bytes) => {
                // allocate() saturates, so the sum of live sizes can exceed it
                state.allocated = state.allocated.saturating_sub(bytes);
                Ok(())
            }
            None => Err(ProfilerError::device(
                self.id,
                "free",
                format!("allocation {} is not live", allocation.id),
            )),
        }
    }

    /// Return unused cached segments to the system
    pub fn empty_cache(&self) {
        let mut state = self.state();
        state.reserved = round_up(state.allocated, SEGMENT_BYTES);
    }

    /// Queue work that completes `duration` after the queue drains
    pub fn launch(&self, duration: Duration) {
        let mut state = self.state();
        let tail = state.queue_tail(Instant::now());
        state.queue_drains_at = Some(tail + duration);
    }

    /// Register a named memory event carrying the current allocation.
    /// No-op unless the event registry is enabled.
    pub fn record_memory_event(&self, name: impl Into<String>) {
        if !self.event_registry {
            return;
        }
        let mut state = self.state();
        let record = MemoryEventRecord {
            name: name.into(),
            allocated_bytes: state.allocated,
            timestamp: system_time_secs_f64(),
        };
        state.memory_events.push(record);
    }

    /// Make every subsequent `call` fail
    pub fn fail_on(&self, call: DeviceCall) {
        self.state().failing.insert(call);
    }

    pub fn clear_failures(&self) {
        self.state().failing.clear();
    }

    /// Most recent device calls, oldest first
    pub fn calls(&self) -> Vec<DeviceCall> {
        self.state().calls.iter().copied().collect()
    }

    pub fn call_count(&self, call: DeviceCall) -> usize {
        self.state().calls.iter().filter(|c| **c == call).count()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Device for SimulatedDevice {
    type Event = SimEvent;

    fn id(&self) -> DeviceId {
        self.id
    }

    fn synchronize(&self) -> Result<()> {
        let drains_at = {
            let mut state = self.state();
            state.enter(self.id, DeviceCall::Synchronize)?;
            state.queue_drains_at.take()
        };

        if let Some(drains_at) = drains_at {
            let remaining = drains_at.saturating_duration_since(Instant::now());
            debug!(device = %self.id, ?remaining, "waiting for queued work");
            std::thread::sleep(remaining);
        }
        Ok(())
    }

    fn reset_peak_memory_stats(&self) -> Result<()> {
        let mut state = self.state();
        state.enter(self.id, DeviceCall::ResetPeakMemoryStats)?;
        state.allocated_peak = state.allocated;
        state.reserved_peak = state.reserved;
        Ok(())
    }

    fn memory_stats(&self) -> Result<MemoryStats> {
        let mut state = self.state();
        state.enter(self.id, DeviceCall::MemoryStats)?;

        let stats = MemoryStats::new()
            .with_counter(ALLOCATED_PEAK, state.allocated_peak)
            .with_counter(ALLOCATED_CURRENT, state.allocated)
            .with_counter(RESERVED_PEAK, state.reserved_peak)
            .with_counter(RESERVED_CURRENT, state.reserved);

        Ok(if self.event_registry {
            stats.with_events(state.memory_events.clone())
        } else {
            stats
        })
    }

    fn record_event(&self) -> Result<SimEvent> {
        let mut state = self.state();
        state.enter(self.id, DeviceCall::RecordEvent)?;
        Ok(SimEvent {
            ready_at: state.queue_tail(Instant::now()),
        })
    }

    fn elapsed_ms(&self, start: &SimEvent, end: &SimEvent) -> Result<f64> {
        self.state().enter(self.id, DeviceCall::ElapsedTime)?;
        let elapsed = end.ready_at.saturating_duration_since(start.ready_at);
        Ok(elapsed.as_nanos() as f64 / 1_000_000.0)
    }
}

fn round_up(bytes: u64, granularity: u64) -> u64 {
    bytes.div_ceil(granularity).saturating_mul(granularity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpuperf_shared::utils::mb_to_bytes;

    #[test]
    fn test_allocator_counters() {
        let device = SimulatedDevice::new(0);
        let a = device.allocate(mb_to_bytes(3)).unwrap();
        let b = device.allocate(mb_to_bytes(1)).unwrap();
        device.free(a).unwrap();

        let stats = device.memory_stats().unwrap();
        assert_eq!(stats.current_allocated().unwrap(), mb_to_bytes(1));
        assert_eq!(stats.peak_allocated().unwrap(), mb_to_bytes(4));
        assert_eq!(stats.peak_reserved().unwrap(), mb_to_bytes(4));
        assert_eq!(stats.get(RESERVED_CURRENT).unwrap(), mb_to_bytes(4));

        device.free(b).unwrap();
        device.empty_cache();
        let stats = device.memory_stats().unwrap();
        assert_eq!(stats.get(RESERVED_CURRENT).unwrap(), 0);
        assert_eq!(stats.peak_reserved().unwrap(), mb_to_bytes(4));
    }

    #[test]
    fn test_reserved_grows_in_segments() {
        let device = SimulatedDevice::new(0);
        let _a = device.allocate(1).unwrap();
        let stats = device.memory_stats().unwrap();
        assert_eq!(stats.get(RESERVED_CURRENT).unwrap(), SEGMENT_BYTES);
    }

    #[test]
    fn test_reset_peak_drops_to_current() {
        let device = SimulatedDevice::new(0);
        let a = device.allocate(mb_to_bytes(10)).unwrap();
        device.free(a).unwrap();
        device.reset_peak_memory_stats().unwrap();

        let stats = device.memory_stats().unwrap();
        assert_eq!(stats.peak_allocated().unwrap(), 0);
    }

    #[test]
    fn test_double_free_is_rejected() {
        let device = SimulatedDevice::new(0);
        let a = device.allocate(16).unwrap();
        let forged = Allocation { id: a.id, bytes: a.bytes };
        device.free(a).unwrap();
        assert!(device.free(forged).is_err());
    }

    #[test]
    fn test_capacity_limit() {
        let device = SimulatedDevice::new(0).with_capacity(mb_to_bytes(4));
        let _a = device.allocate(mb_to_bytes(4)).unwrap();
        assert!(device.allocate(1).is_err());
        assert_eq!(device.memory_stats().unwrap().current_allocated().unwrap(), mb_to_bytes(4));
    }

    #[test]
    fn test_synchronize_waits_for_queued_work() {
        let device = SimulatedDevice::new(0);
        device.launch(Duration::from_millis(20));
        let start = Instant::now();
        device.synchronize().unwrap();
        assert!(start.elapsed() >= Duration::from_millis(15));

        // Queue is drained now
        let start = Instant::now();
        device.synchronize().unwrap();
        assert!(start.elapsed() < Duration::from_millis(15));
    }

    #[test]
    fn test_event_timing_follows_queue() {
        let device = SimulatedDevice::new(0);
        let start = device.record_event().unwrap();
        device.launch(Duration::from_millis(30));
        let end = device.record_event().unwrap();
        device.synchronize().unwrap();

        let ms = device.elapsed_ms(&start, &end).unwrap();
        assert!(ms >= 30.0, "elapsed {}ms", ms);
    }

    #[test]
    fn test_event_registry_only_when_enabled() {
        let plain = SimulatedDevice::new(0);
        plain.record_memory_event("ignored");
        assert!(plain.memory_stats().unwrap().events().is_none());
        assert!(plain.state().memory_events.is_empty());

        let device = SimulatedDevice::new(0).with_event_registry();
        let _a = device.allocate(mb_to_bytes(2)).unwrap();
        device.record_memory_event("after_alloc");
        let stats = device.memory_stats().unwrap();
        let events = stats.events().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, "after_alloc");
        assert_eq!(events[0].allocated_bytes, mb_to_bytes(2));
    }

    #[test]
    fn test_call_log_and_failure_injection() {
        let device = SimulatedDevice::new(0);
        device.synchronize().unwrap();
        device.fail_on(DeviceCall::MemoryStats);
        assert!(device.memory_stats().is_err());
        assert_eq!(device.calls(), vec![DeviceCall::Synchronize, DeviceCall::MemoryStats]);

        device.clear_failures();
        device.clear_calls();
        assert!(device.memory_stats().is_ok());
        assert_eq!(device.call_count(DeviceCall::MemoryStats), 1);
    }

    #[test]
    fn test_free_after_saturated_allocation() {
        let device = SimulatedDevice::new(0);
        let small = device.allocate(1).unwrap();
        let huge = device.allocate(u64::MAX).unwrap();
        assert_eq!(device.memory_stats().unwrap().current_allocated().unwrap(), u64::MAX);

        device.free(small).unwrap();
        device.free(huge).unwrap();
        assert_eq!(device.memory_stats().unwrap().current_allocated().unwrap(), 0);
    }

    #[test]
    fn test_call_log_keeps_most_recent_calls() {
        let device = SimulatedDevice::new(0);
        for _ in 0..CALL_LOG_CAPACITY {
            device.synchronize().unwrap();
        }
        device.memory_stats().unwrap();

        let calls = device.calls();
        assert_eq!(calls.len(), CALL_LOG_CAPACITY);
        assert_eq!(calls.last(), Some(&DeviceCall::MemoryStats));
        assert_eq!(device.call_count(DeviceCall::Synchronize), CALL_LOG_CAPACITY - 1);
    }
}
