//! Session report
//!
//! The result of one measurement session, suitable for printing line by line
//! or serializing to JSON.

use crate::types::memory::MemorySample;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Elapsed time of one named region delimited by device timing events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionTiming {
    pub name: String,
    pub elapsed_ms: f64,
}

/// Memory counters read at the end of a session, in megabytes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemorySummary {
    pub peak_allocated_mb: f64,
    pub current_allocated_mb: f64,
    pub peak_reserved_mb: f64,

    /// Change of current allocation since session begin (snapshot tracking only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_growth_mb: Option<f64>,

    /// Growth of the peak watermark since session begin (snapshot tracking only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peak_growth_mb: Option<f64>,
}

/// Where the memory timeline came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineSource {
    /// The device exposed a registry of discrete memory events
    Events,
    /// No registry; a single current-usage sample was taken
    CurrentUsage,
}

/// Memory samples collected at the end of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryTimeline {
    pub source: TimelineSource,

    /// Chronological samples. The first one is always the current allocation
    /// at report time.
    pub samples: Vec<MemorySample>,
}

/// Complete result of a measurement session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    /// Canonical device identifier (e.g. `cuda:0`)
    pub device: String,

    /// Name of the measured function or block, if known
    pub label: Option<String>,

    /// Wall-clock time of session begin
    pub started_at: DateTime<Utc>,

    /// Wall-clock time of session end
    pub ended_at: DateTime<Utc>,

    /// Monotonic elapsed time between begin and end
    pub elapsed_ms: f64,

    /// False when the measured operation failed (panicked or returned an
    /// error that was handed to the session)
    pub completed: bool,

    /// Closed timed regions, in the order they were recorded
    pub regions: Vec<RegionTiming>,

    pub memory: Option<MemorySummary>,

    /// Labeled samples taken while the session was running
    #[serde(default)]
    pub checkpoints: Vec<MemorySample>,

    pub timeline: Option<MemoryTimeline>,
}

impl SessionReport {
    /// Render the human-readable report, one line per entry
    pub fn lines(&self) -> Vec<String> {
        let mut lines = Vec::new();

        for (i, region) in self.regions.iter().enumerate() {
            lines.push(format!(
                "Event {}: {:.3}ms ({})",
                i + 1,
                region.elapsed_ms,
                region.name
            ));
        }

        lines.push(format!("Total Time: {:.3}ms", self.elapsed_ms));

        if let Some(memory) = &self.memory {
            lines.push(format!("Peak Memory Usage: {:.2}MB", memory.peak_allocated_mb));
            lines.push(format!(
                "Total Memory Allocated: {:.2}MB",
                memory.current_allocated_mb
            ));
            lines.push(format!("Memory Cached: {:.2}MB", memory.peak_reserved_mb));
            if let (Some(current), Some(peak)) = (memory.current_growth_mb, memory.peak_growth_mb) {
                lines.push(format!("Memory Growth: {:+.2}MB (peak {:+.2}MB)", current, peak));
            }
        }

        for (i, sample) in self.checkpoints.iter().enumerate() {
            lines.push(format!(
                "Checkpoint {}: {:.2}MB, {}, Time (s): {:.4}",
                i + 1,
                sample.size_mb,
                sample.label.as_deref().unwrap_or("<unnamed>"),
                sample.timestamp
            ));
        }

        if let Some(timeline) = &self.timeline {
            let recorded = timeline.samples.iter().skip(1);
            match timeline.source {
                TimelineSource::Events => {
                    for (i, sample) in recorded.enumerate() {
                        lines.push(format!(
                            "Memory Event {}: {:.2}MB, {}, Time (s): {:.4}",
                            i + 1,
                            sample.size_mb,
                            sample.label.as_deref().unwrap_or("<unnamed>"),
                            sample.timestamp
                        ));
                    }
                }
                TimelineSource::CurrentUsage => {
                    if let Some(sample) = recorded.last() {
                        lines.push(format!("Memory Usage: {:.2}MB", sample.size_mb));
                    }
                }
            }
        }

        lines
    }

    /// Total time spent in timed regions
    pub fn regions_total_ms(&self) -> f64 {
        self.regions.iter().map(|r| r.elapsed_ms).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> SessionReport {
        let now = Utc::now();
        SessionReport {
            device: "cuda:0".to_string(),
            label: Some("forward".to_string()),
            started_at: now,
            ended_at: now,
            elapsed_ms: 12.5,
            completed: true,
            regions: Vec::new(),
            memory: None,
            checkpoints: Vec::new(),
            timeline: None,
        }
    }

    #[test]
    fn test_time_only_report() {
        assert_eq!(report().lines(), vec!["Total Time: 12.500ms".to_string()]);
    }

    #[test]
    fn test_regions_precede_total() {
        let mut report = report();
        report.regions = vec![
            RegionTiming {
                name: "load".to_string(),
                elapsed_ms: 1.0,
            },
            RegionTiming {
                name: "compute".to_string(),
                elapsed_ms: 2.25,
            },
        ];
        let lines = report.lines();
        assert_eq!(lines[0], "Event 1: 1.000ms (load)");
        assert_eq!(lines[1], "Event 2: 2.250ms (compute)");
        assert_eq!(lines[2], "Total Time: 12.500ms");
        assert!((report.regions_total_ms() - 3.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_memory_lines_with_event_timeline() {
        let mut report = report();
        report.memory = Some(MemorySummary {
            peak_allocated_mb: 100.0,
            current_allocated_mb: 50.0,
            peak_reserved_mb: 128.0,
            current_growth_mb: None,
            peak_growth_mb: None,
        });
        report.timeline = Some(MemoryTimeline {
            source: TimelineSource::Events,
            samples: vec![
                MemorySample::unlabeled(50.0, 10.0),
                MemorySample::labeled("alloc", 25.0, 1.23456),
            ],
        });

        let lines = report.lines();
        assert_eq!(
            &lines[1..],
            &[
                "Peak Memory Usage: 100.00MB".to_string(),
                "Total Memory Allocated: 50.00MB".to_string(),
                "Memory Cached: 128.00MB".to_string(),
                "Memory Event 1: 25.00MB, alloc, Time (s): 1.2346".to_string(),
            ]
        );
    }

    #[test]
    fn test_current_usage_timeline_and_growth() {
        let mut report = report();
        report.memory = Some(MemorySummary {
            peak_allocated_mb: 1.0,
            current_allocated_mb: 1.0,
            peak_reserved_mb: 2.0,
            current_growth_mb: Some(-0.5),
            peak_growth_mb: Some(0.25),
        });
        report.timeline = Some(MemoryTimeline {
            source: TimelineSource::CurrentUsage,
            samples: vec![
                MemorySample::unlabeled(1.0, 10.0),
                MemorySample::unlabeled(1.0, 10.1),
            ],
        });

        report.checkpoints = vec![MemorySample::labeled("warmup", 0.75, 9.5)];

        let lines = report.lines();
        assert!(lines.contains(&"Checkpoint 1: 0.75MB, warmup, Time (s): 9.5000".to_string()));
        assert!(lines.contains(&"Memory Growth: -0.50MB (peak +0.25MB)".to_string()));
        assert_eq!(lines.last().unwrap(), "Memory Usage: 1.00MB");
    }
}
