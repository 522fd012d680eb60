//! Named regions delimited by device timing events

use crate::device::Device;
use crate::error::{ProfilerError, Result};
use gpuperf_shared::RegionTiming;

/// Regions recorded during one session. At most one region is open.
pub(crate) struct RegionTracker<E> {
    open: Option<(String, E)>,
    closed: Vec<(String, E, E)>,
}

impl<E> RegionTracker<E> {
    pub(crate) fn new() -> Self {
        Self {
            open: None,
            closed: Vec::new(),
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open.is_some()
    }

    /// Open `name` at `event`
    pub(crate) fn open(&mut self, name: String, event: E) {
        self.open = Some((name, event));
    }

    /// Close the open region at `end`
    pub(crate) fn close(&mut self, end: E) -> Result<()> {
        let (name, start) = self.open.take().ok_or(ProfilerError::NoOpenRegion)?;
        self.closed.push((name, start, end));
        Ok(())
    }

    /// Elapsed time of all closed regions, in recording order
    pub(crate) fn timings<D>(&self, device: &D) -> Result<Vec<RegionTiming>>
    where
        D: Device<Event = E> + ?Sized,
    {
        self.closed
            .iter()
            .map(|(name, start, end)| {
                Ok(RegionTiming {
                    name: name.clone(),
                    elapsed_ms: device.elapsed_ms(start, end)?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::simulated::SimulatedDevice;
    use std::time::Duration;

    #[test]
    fn test_close_without_open_region() {
        let mut tracker: RegionTracker<u32> = RegionTracker::new();
        assert!(matches!(tracker.close(1), Err(ProfilerError::NoOpenRegion)));
    }

    #[test]
    fn test_regions_are_timed_in_order() {
        let device = SimulatedDevice::new(0);
        let mut tracker = RegionTracker::new();

        tracker.open("first".to_string(), device.record_event().unwrap());
        device.launch(Duration::from_millis(10));
        tracker.close(device.record_event().unwrap()).unwrap();
        tracker.open("second".to_string(), device.record_event().unwrap());
        tracker.close(device.record_event().unwrap()).unwrap();
        device.synchronize().unwrap();

        assert!(!tracker.is_open());
        let timings = tracker.timings(&device).unwrap();
        assert_eq!(timings.len(), 2);
        assert_eq!(timings[0].name, "first");
        assert!(timings[0].elapsed_ms >= 10.0);
        assert_eq!(timings[1].name, "second");
        assert!(timings[1].elapsed_ms < 10.0);
    }
}
