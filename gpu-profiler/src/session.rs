//! Measurement sessions
//!
//! A [`Session`] brackets a unit of device work. [`Session::begin`]
//! synchronizes the device and starts the clock; [`Session::end`] (or the
//! drop guard, when the scope is left early or by panic) synchronizes again,
//! reads the memory counters and emits a [`SessionReport`] to the configured
//! sink.

use crate::config::{PeakTracking, ProfilerConfig, TimingMode};
use crate::device::{Device, DeviceId};
use crate::error::{ProfilerError, Result};
use crate::sink::{ReportSink, StdoutSink};
use crate::timing::RegionTracker;
use chrono::{DateTime, Utc};
use gpuperf_shared::types::memory::{ALLOCATED_CURRENT, ALLOCATED_PEAK};
use gpuperf_shared::utils::time::system_time_secs_f64;
use gpuperf_shared::utils::{bytes_to_mb, delta_to_mb};
use gpuperf_shared::{
    MemorySample, MemoryStats, MemorySummary, MemoryTimeline, SessionReport, TimelineSource,
};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, error, warn};

/// Result of a measured call together with its report
#[derive(Debug, Clone)]
pub struct Measured<R> {
    pub value: R,
    pub report: SessionReport,
}

impl<R> Measured<R> {
    pub fn into_inner(self) -> R {
        self.value
    }
}

/// Run `f` inside a session on `device` and return its value with the report
pub fn measure<D, R>(device: &D, config: &ProfilerConfig, f: impl FnOnce() -> R) -> Result<Measured<R>>
where
    D: Device + ?Sized,
{
    let session = Session::begin(device, config)?;
    let value = f();
    let report = session.end()?;
    Ok(Measured { value, report })
}

/// An in-progress measurement on one device
pub struct Session<'a, D: Device + ?Sized> {
    device: &'a D,
    config: ProfilerConfig,
    label: Option<String>,
    sink: Arc<dyn ReportSink>,
    started_at: SystemTime,
    start: Instant,
    baseline: Option<MemoryStats>,
    regions: RegionTracker<D::Event>,
    checkpoints: Vec<MemorySample>,
    finished: bool,
}

impl<'a, D: Device + ?Sized> Session<'a, D> {
    /// Begin an unlabeled session reporting to stdout
    pub fn begin(device: &'a D, config: &ProfilerConfig) -> Result<Self> {
        Self::begin_with(device, config, None, Arc::new(StdoutSink))
    }

    /// Begin a session.
    ///
    /// With memory profiling enabled this either resets the device peak
    /// counters (reset tracking) or captures a baseline snapshot after the
    /// synchronize (snapshot tracking).
    pub fn begin_with(
        device: &'a D,
        config: &ProfilerConfig,
        label: Option<String>,
        sink: Arc<dyn ReportSink>,
    ) -> Result<Self> {
        let actual = device.id();
        if actual != config.device {
            return Err(ProfilerError::DeviceMismatch {
                expected: config.device.to_string(),
                actual: actual.to_string(),
            });
        }

        let tracking = config.profile_memory.then_some(config.peak_tracking);
        if tracking == Some(PeakTracking::Reset) {
            device.reset_peak_memory_stats()?;
        }

        device.synchronize()?;

        let baseline = match tracking {
            Some(PeakTracking::Snapshot) => Some(device.memory_stats()?),
            _ => None,
        };

        debug!(
            device = %actual,
            label = label.as_deref().unwrap_or("-"),
            profile_memory = config.profile_memory,
            "measurement session started"
        );

        Ok(Self {
            device,
            config: config.clone(),
            label,
            sink,
            started_at: SystemTime::now(),
            start: Instant::now(),
            baseline,
            regions: RegionTracker::new(),
            checkpoints: Vec::new(),
            finished: false,
        })
    }

    pub fn device_id(&self) -> DeviceId {
        self.device.id()
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn config(&self) -> &ProfilerConfig {
        &self.config
    }

    pub fn started_at(&self) -> SystemTime {
        self.started_at
    }

    /// Host time since begin. Does not wait for queued device work.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Samples taken with [`Session::checkpoint`] so far
    pub fn checkpoints(&self) -> &[MemorySample] {
        &self.checkpoints
    }

    /// Start timing a region called `name`, closing the open one if any
    pub fn mark(&mut self, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        if self.config.timing == TimingMode::Aggregate {
            debug!(region = %name, "aggregate timing, region ignored");
            return Ok(());
        }
        if self.regions.is_open() {
            return self.record(name);
        }
        let event = self.device.record_event()?;
        self.regions.open(name, event);
        Ok(())
    }

    /// Close the open region and start timing the next one
    pub fn record(&mut self, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        if self.config.timing == TimingMode::Aggregate {
            debug!(region = %name, "aggregate timing, region ignored");
            return Ok(());
        }
        self.close_region()?;
        let event = self.device.record_event()?;
        self.regions.open(name, event);
        Ok(())
    }

    /// Close the open region
    pub fn close_region(&mut self) -> Result<()> {
        if self.config.timing == TimingMode::Aggregate {
            return Ok(());
        }
        if !self.regions.is_open() {
            return Err(ProfilerError::NoOpenRegion);
        }
        let event = self.device.record_event()?;
        self.regions.close(event)
    }

    /// Record a labeled memory sample mid-session. Returns `None` without
    /// touching the device when memory profiling is off.
    pub fn checkpoint(&mut self, label: impl Into<String>) -> Result<Option<MemorySample>> {
        if !self.config.profile_memory {
            return Ok(None);
        }
        let current = self.device.memory_stats()?.current_allocated()?;
        let sample = MemorySample::labeled(label, bytes_to_mb(current), system_time_secs_f64());
        self.checkpoints.push(sample.clone());
        Ok(Some(sample))
    }

    /// Finish the session after the measured operation completed
    pub fn end(mut self) -> Result<SessionReport> {
        self.finish(true)
    }

    /// Finish the session, marking it incomplete if `outcome` is an error.
    /// The outcome itself is left to the caller.
    pub fn end_with<T, E>(mut self, outcome: &std::result::Result<T, E>) -> Result<SessionReport> {
        self.finish(outcome.is_ok())
    }

    fn finish(&mut self, completed: bool) -> Result<SessionReport> {
        self.finished = true;

        let closing = if self.config.timing == TimingMode::Events && self.regions.is_open() {
            self.close_region()
        } else {
            Ok(())
        };

        self.device.synchronize()?;
        let elapsed = self.start.elapsed();

        let mut report = SessionReport {
            device: self.device.id().to_string(),
            label: self.label.clone(),
            started_at: DateTime::<Utc>::from(self.started_at),
            ended_at: DateTime::<Utc>::from(self.started_at + elapsed),
            elapsed_ms: elapsed.as_secs_f64() * 1000.0,
            completed,
            regions: Vec::new(),
            memory: None,
            checkpoints: std::mem::take(&mut self.checkpoints),
            timeline: None,
        };

        // The timing part is reported even if the rest cannot be collected
        let collected = closing.and_then(|_| self.collect(&mut report));
        self.sink.emit(&report);

        debug!(
            device = %report.device,
            elapsed_ms = report.elapsed_ms,
            completed,
            "measurement session finished"
        );
        collected.map(|_| report)
    }

    fn collect(&self, report: &mut SessionReport) -> Result<()> {
        if self.config.timing == TimingMode::Events {
            report.regions = self.regions.timings(self.device)?;
        }

        if !self.config.profile_memory {
            return Ok(());
        }

        let stats = self.device.memory_stats()?;
        let peak = stats.peak_allocated()?;
        let current = stats.current_allocated()?;
        let reserved = stats.peak_reserved()?;

        let (current_growth_mb, peak_growth_mb) = match &self.baseline {
            Some(baseline) => (
                Some(delta_to_mb(stats.delta_since(baseline, ALLOCATED_CURRENT)?)),
                Some(delta_to_mb(stats.delta_since(baseline, ALLOCATED_PEAK)?)),
            ),
            None => (None, None),
        };

        report.memory = Some(MemorySummary {
            peak_allocated_mb: bytes_to_mb(peak),
            current_allocated_mb: bytes_to_mb(current),
            peak_reserved_mb: bytes_to_mb(reserved),
            current_growth_mb,
            peak_growth_mb,
        });
        report.timeline = Some(timeline(&stats, current));
        Ok(())
    }
}

/// Current usage first, then either every registered memory event or a
/// second current-usage sample when the device keeps no registry.
fn timeline(stats: &MemoryStats, current: u64) -> MemoryTimeline {
    let mut samples = vec![MemorySample::unlabeled(bytes_to_mb(current), system_time_secs_f64())];

    let source = match stats.events() {
        Some(events) => {
            samples.extend(events.iter().map(|event| {
                MemorySample::labeled(
                    event.name.clone(),
                    bytes_to_mb(event.allocated_bytes),
                    event.timestamp,
                )
            }));
            TimelineSource::Events
        }
        None => {
            samples.push(MemorySample::unlabeled(bytes_to_mb(current), system_time_secs_f64()));
            TimelineSource::CurrentUsage
        }
    };

    MemoryTimeline { source, samples }
}

impl<D: Device + ?Sized> Drop for Session<'_, D> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }

        // Leaving the scope without end() means the operation did not finish:
        // a panic, or an early return through `?`.
        if !std::thread::panicking() {
            warn!(device = %self.config.device, "session dropped without end()");
        }
        if let Err(e) = self.finish(false) {
            error!(device = %self.config.device, "failed to finish measurement session: {}", e);
        }
    }
}
