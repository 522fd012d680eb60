//! Report destinations

use gpuperf_shared::SessionReport;
use std::sync::{Arc, Mutex};
use tracing::info;

/// Receives the report of every finished session
pub trait ReportSink: Send + Sync {
    fn emit(&self, report: &SessionReport);
}

/// Print report lines to standard output
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

impl ReportSink for StdoutSink {
    fn emit(&self, report: &SessionReport) {
        for line in report.lines() {
            println!("{}", line);
        }
    }
}

/// Route report lines through `tracing` at info level
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ReportSink for TracingSink {
    fn emit(&self, report: &SessionReport) {
        let label = report.label.as_deref().unwrap_or("-");
        for line in report.lines() {
            info!(device = %report.device, label, "{}", line);
        }
    }
}

/// Keep reports in memory
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    reports: Arc<Mutex<Vec<SessionReport>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<SessionReport> {
        self.reports
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Rendered lines of all reports, in emission order
    pub fn lines(&self) -> Vec<String> {
        self.reports().iter().flat_map(|r| r.lines()).collect()
    }

    pub fn len(&self) -> usize {
        self.reports
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ReportSink for MemorySink {
    fn emit(&self, report: &SessionReport) {
        self.reports
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(report.clone());
    }
}

/// Forward each report to several sinks
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn ReportSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl ReportSink for FanoutSink {
    fn emit(&self, report: &SessionReport) {
        for sink in &self.sinks {
            sink.emit(report);
        }
    }
}
