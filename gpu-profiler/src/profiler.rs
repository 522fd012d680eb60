//! Function wrapping
//!
//! [`profile`] builds a [`Profiler`] for one device and configuration. Every
//! call made through it, directly with [`Profiler::run`] or through a
//! callable returned by [`Profiler::wrap`], runs inside a fresh
//! [`Session`].

use crate::config::ProfilerConfig;
use crate::device::Device;
use crate::error::Result;
use crate::session::{Measured, Session};
use crate::sink::{ReportSink, StdoutSink};
use std::sync::Arc;
use tracing::{error, info_span};

/// Create a profiler for `device`
pub fn profile<D: Device + ?Sized>(device: Arc<D>, config: ProfilerConfig) -> Profiler<D> {
    Profiler::new(device, config)
}

/// Instruments calls with measurement sessions
pub struct Profiler<D: Device + ?Sized> {
    device: Arc<D>,
    config: ProfilerConfig,
    sink: Arc<dyn ReportSink>,
}

impl<D: Device + ?Sized> Clone for Profiler<D> {
    fn clone(&self) -> Self {
        Self {
            device: Arc::clone(&self.device),
            config: self.config.clone(),
            sink: Arc::clone(&self.sink),
        }
    }
}

impl<D: Device + ?Sized> Profiler<D> {
    pub fn new(device: Arc<D>, config: ProfilerConfig) -> Self {
        Self {
            device,
            config,
            sink: Arc::new(StdoutSink),
        }
    }

    /// Send reports to `sink` instead of stdout
    pub fn with_sink(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    pub fn config(&self) -> &ProfilerConfig {
        &self.config
    }

    /// Begin a session by hand
    pub fn session(&self, label: Option<String>) -> Result<Session<'_, D>> {
        Session::begin_with(&*self.device, &self.config, label, Arc::clone(&self.sink))
    }

    /// Run `f` in a session and hand back its value untouched.
    ///
    /// Device failures are logged; `f` runs even if the session cannot begin.
    /// A panic in `f` is reported by the session before it resumes unwinding.
    pub fn run<R>(&self, label: &str, f: impl FnOnce() -> R) -> R {
        let span = info_span!("profiled", function = label);
        let _entered = span.enter();

        let session = match self.session(Some(label.to_string())) {
            Ok(session) => session,
            Err(e) => {
                error!("failed to begin measurement session: {}", e);
                return f();
            }
        };

        let value = f();
        if let Err(e) = session.end() {
            error!("failed to finish measurement session: {}", e);
        }
        value
    }

    /// Like [`Profiler::run`], but device failures are returned
    pub fn try_run<R>(&self, label: &str, f: impl FnOnce() -> R) -> Result<Measured<R>> {
        self.try_run_with(label, |_| f())
    }

    /// Run `f` with access to the session, e.g. to time regions
    pub fn try_run_with<R>(
        &self,
        label: &str,
        f: impl FnOnce(&mut Session<'_, D>) -> R,
    ) -> Result<Measured<R>> {
        let span = info_span!("profiled", function = label);
        let _entered = span.enter();

        let mut session = self.session(Some(label.to_string()))?;
        let value = f(&mut session);
        let report = session.end()?;
        Ok(Measured { value, report })
    }

    /// Wrap `f` so that every call is measured. The report label is the
    /// type name of `f`. Multi-argument callables take a tuple.
    pub fn wrap<A, R, F>(&self, f: F) -> impl Fn(A) -> R
    where
        F: Fn(A) -> R,
    {
        self.wrap_named(function_name::<F>(), f)
    }

    /// Like [`Profiler::wrap`] with an explicit label
    pub fn wrap_named<A, R, F>(&self, name: impl Into<String>, f: F) -> impl Fn(A) -> R
    where
        F: Fn(A) -> R,
    {
        let profiler = self.clone();
        let name = name.into();
        move |args| profiler.run(&name, || f(args))
    }

    /// Wrap a stateful callable
    pub fn wrap_mut<A, R, F>(&self, mut f: F) -> impl FnMut(A) -> R
    where
        F: FnMut(A) -> R,
    {
        let profiler = self.clone();
        let name = function_name::<F>();
        move |args| profiler.run(&name, || f(args))
    }
}

/// Readable name of a callable type: the item path for functions, the
/// enclosing item for closures.
fn function_name<F>() -> String {
    let name = std::any::type_name::<F>();
    name.strip_suffix("::{{closure}}").unwrap_or(name).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::simulated::{DeviceCall, SimulatedDevice};
    use crate::device::DeviceId;
    use crate::sink::MemorySink;

    fn profiler(sink: &MemorySink) -> Profiler<SimulatedDevice> {
        profile(Arc::new(SimulatedDevice::new(0)), ProfilerConfig::new(DeviceId::sim(0)))
            .with_sink(Arc::new(sink.clone()))
    }

    fn add(pair: (i32, i32)) -> i32 {
        pair.0 + pair.1
    }

    #[test]
    fn test_wrap_preserves_args_and_return() {
        let sink = MemorySink::new();
        let wrapped = profiler(&sink).wrap(add);

        assert_eq!(wrapped((2, 3)), 5);
        assert_eq!(wrapped((-1, 1)), 0);
        assert_eq!(sink.len(), 2);
    }

    #[test]
    fn test_wrap_labels_with_function_name() {
        let sink = MemorySink::new();
        let wrapped = profiler(&sink).wrap(add);
        wrapped((1, 1));

        let label = sink.reports()[0].label.clone().unwrap();
        assert!(label.ends_with("::add"), "label was {}", label);
    }

    #[test]
    fn test_wrap_named_and_result_passthrough() {
        let sink = MemorySink::new();
        let parse = profiler(&sink).wrap_named("parse", |s: String| s.parse::<u32>());

        assert_eq!(parse("17".to_string()), Ok(17));
        assert!(parse("x".to_string()).is_err());
        let reports = sink.reports();
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| r.label.as_deref() == Some("parse")));
    }

    #[test]
    fn test_wrap_mut_keeps_state() {
        let sink = MemorySink::new();
        let mut total = 0;
        {
            let mut accumulate = profiler(&sink).wrap_mut(|x: i32| {
                total += x;
                total
            });
            assert_eq!(accumulate(2), 2);
            assert_eq!(accumulate(3), 5);
        }
        assert_eq!(total, 5);
    }

    #[test]
    fn test_each_call_gets_a_fresh_session() {
        let sink = MemorySink::new();
        let profiler = profiler(&sink);
        let wrapped = profiler.wrap(|n: u64| n * 2);
        wrapped(1);
        wrapped(2);

        // begin + end synchronize per call
        assert_eq!(profiler.device().call_count(DeviceCall::Synchronize), 4);
    }

    #[test]
    fn test_run_reports_on_panic() {
        let sink = MemorySink::new();
        let profiler = profiler(&sink);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            profiler.run("explode", || panic!("boom"))
        }));

        assert!(result.is_err());
        assert_eq!(sink.len(), 1);
        assert!(!sink.reports()[0].completed);
    }

    #[test]
    fn test_run_survives_device_failure() {
        let sink = MemorySink::new();
        let profiler = profiler(&sink);
        profiler.device().fail_on(DeviceCall::Synchronize);

        assert_eq!(profiler.run("work", || "done"), "done");
        assert!(sink.is_empty());
    }

    #[test]
    fn test_try_run_surfaces_device_failure() {
        let sink = MemorySink::new();
        let profiler = profiler(&sink);
        profiler.device().fail_on(DeviceCall::Synchronize);

        let mut ran = false;
        assert!(profiler.try_run("work", || ran = true).is_err());
        assert!(!ran);
    }

    #[test]
    fn test_try_run_with_regions() {
        let sink = MemorySink::new();
        let profiler = profile(
            Arc::new(SimulatedDevice::new(0)),
            ProfilerConfig::new(DeviceId::sim(0)).timing(crate::config::TimingMode::Events),
        )
        .with_sink(Arc::new(sink.clone()));

        let measured = profiler
            .try_run_with("pipeline", |session| -> Result<u8> {
                session.mark("stage-1")?;
                session.record("stage-2")?;
                Ok(7)
            })
            .unwrap();

        assert_eq!(measured.value.unwrap(), 7);
        assert_eq!(measured.report.regions.len(), 2);
        assert_eq!(measured.report.label.as_deref(), Some("pipeline"));
    }

    #[test]
    fn test_function_name_strips_closure_suffix() {
        fn name_of<F>(_: &F) -> String {
            function_name::<F>()
        }

        let closure = |x: u8| x;
        let name = name_of(&closure);
        assert!(!name.ends_with("{{closure}}"), "name was {}", name);
        assert!(name.contains("test_function_name_strips_closure_suffix"));
    }
}
