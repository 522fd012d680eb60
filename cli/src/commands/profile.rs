//! Profile command implementation

use crate::output;
use crate::workload::{self, SyntheticDevice, WorkloadSpec};
use anyhow::{Context, Result};
use clap::Args;
use gpuperf::{
    DeviceId, DeviceKind, PeakTracking, ProfilerConfig, ReportSink, Session,
    SessionReport, SimulatedDevice, StdoutSink, TimingMode, TracingSink,
};
use gpuperf_shared::utils::mb_to_bytes;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Args, Debug)]
pub struct ProfileArgs {
    /// Device to run on (e.g. "sim:0", "cuda:1"); defaults to GPUPERF_DEVICE or cuda:0
    #[arg(short, long)]
    pub device: Option<String>,

    /// Megabytes allocated per iteration
    #[arg(short, long, default_value = "64")]
    pub alloc_mb: u64,

    /// Number of iterations
    #[arg(short, long, default_value = "3")]
    pub iterations: u32,

    /// Simulated device time per iteration in milliseconds
    #[arg(short, long, default_value = "5")]
    pub work_ms: u64,

    /// Disable memory profiling
    #[arg(long)]
    pub no_memory: bool,

    /// Timing mode: "aggregate" or "events"
    #[arg(long)]
    pub timing: Option<String>,

    /// Peak tracking: "reset" (default) or "snapshot"
    #[arg(long)]
    pub peak_tracking: Option<String>,

    /// TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Also write the report in JSON format
    #[arg(long)]
    pub json: Option<PathBuf>,

    /// Send report lines to the log instead of stdout
    #[arg(long)]
    pub log_report: bool,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl ProfileArgs {
    /// Resolve the session configuration: file (or environment), then flags
    pub fn profiler_config(&self) -> Result<ProfilerConfig> {
        let mut config = match &self.config {
            Some(path) => ProfilerConfig::load(path)?,
            None => ProfilerConfig::from_env().context("Invalid GPUPERF_* environment")?,
        };

        if let Some(device) = &self.device {
            config.device = device.parse::<DeviceId>()?;
        }
        if self.no_memory {
            config.profile_memory = false;
        }
        if let Some(timing) = &self.timing {
            config.timing = timing.parse::<TimingMode>()?;
        }
        if let Some(tracking) = &self.peak_tracking {
            config.peak_tracking = tracking.parse::<PeakTracking>()?;
        }

        Ok(config)
    }

    pub fn workload(&self) -> WorkloadSpec {
        WorkloadSpec {
            bytes: mb_to_bytes(self.alloc_mb),
            iterations: self.iterations,
            work: Duration::from_millis(self.work_ms),
        }
    }
}

pub fn run(args: ProfileArgs) -> Result<()> {
    let config = args.profiler_config()?;
    let spec = args.workload();

    info!(
        "Profiling {} iteration(s) of {}MB on {}",
        spec.iterations, args.alloc_mb, config.device
    );

    let sink: Arc<dyn ReportSink> = if args.log_report {
        Arc::new(TracingSink)
    } else {
        Arc::new(StdoutSink)
    };

    let report = match config.device.kind {
        DeviceKind::Sim => {
            let device = SimulatedDevice::new(config.device.index).with_event_registry();
            measure_workload(&device, &config, spec, sink)?
        }
        DeviceKind::Cuda => run_cuda(&config, spec, sink)?,
    };

    if let Some(path) = &args.json {
        write_json(&report, path)?;
        output::success(&format!("Report written to {}", path.display()));
    }

    Ok(())
}

#[cfg(feature = "cuda")]
fn run_cuda(config: &ProfilerConfig, spec: WorkloadSpec, sink: Arc<dyn ReportSink>) -> Result<SessionReport> {
    let device = gpuperf::CudaDevice::open(config.device.index)?;
    measure_workload(&device, config, spec, sink)
}

#[cfg(not(feature = "cuda"))]
fn run_cuda(config: &ProfilerConfig, _spec: WorkloadSpec, _sink: Arc<dyn ReportSink>) -> Result<SessionReport> {
    output::info("Use --device sim:0 to run on the simulated device");
    anyhow::bail!(
        "{} requested but gpuperf was built without CUDA support (rebuild with --features cuda)",
        config.device
    )
}

fn measure_workload<D: SyntheticDevice>(
    device: &D,
    config: &ProfilerConfig,
    spec: WorkloadSpec,
    sink: Arc<dyn ReportSink>,
) -> Result<SessionReport> {
    let mut session = Session::begin_with(device, config, Some("synthetic".to_string()), sink)
        .context("Failed to begin measurement session")?;
    workload::run(device, &mut session, spec).context("Workload failed")?;
    session.end().context("Failed to finish measurement session")
}

fn write_json(report: &SessionReport, path: &Path) -> Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(file, report).context("Failed to serialize report")?;
    Ok(())
}
