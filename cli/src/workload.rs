//! Synthetic device workload

use gpuperf::{Device, Result, Session, SimulatedDevice};
use std::time::Duration;

/// Shape of the synthetic workload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkloadSpec {
    /// Bytes allocated per iteration
    pub bytes: u64,
    pub iterations: u32,
    /// Device time per iteration (simulated device only)
    pub work: Duration,
}

/// Devices the CLI can put synthetic load on
pub trait SyntheticDevice: Device {
    type Buffer;

    fn alloc(&self, bytes: u64) -> Result<Self::Buffer>;

    /// Queue work touching `buffer`
    fn busy(&self, buffer: &Self::Buffer, work: Duration) -> Result<()>;

    fn release(&self, buffer: Self::Buffer) -> Result<()>;

    /// Register a named memory event if the device keeps a registry
    fn note(&self, _name: &str) {}
}

impl SyntheticDevice for SimulatedDevice {
    type Buffer = gpuperf::device::simulated::Allocation;

    fn alloc(&self, bytes: u64) -> Result<Self::Buffer> {
        self.allocate(bytes)
    }

    fn busy(&self, _buffer: &Self::Buffer, work: Duration) -> Result<()> {
        self.launch(work);
        Ok(())
    }

    fn release(&self, buffer: Self::Buffer) -> Result<()> {
        self.free(buffer)
    }

    fn note(&self, name: &str) {
        self.record_memory_event(name);
    }
}

#[cfg(feature = "cuda")]
impl SyntheticDevice for gpuperf::CudaDevice {
    type Buffer = gpuperf::CudaBuffer;

    fn alloc(&self, bytes: u64) -> Result<Self::Buffer> {
        self.allocate(bytes)
    }

    fn busy(&self, buffer: &Self::Buffer, _work: Duration) -> Result<()> {
        self.fill(buffer, 0xA5)
    }

    fn release(&self, buffer: Self::Buffer) -> Result<()> {
        drop(buffer);
        Ok(())
    }
}

/// Run the workload inside `session`, one timed region and one memory
/// checkpoint per iteration. Buffers are held until the last iteration so
/// the peak grows with the iteration count.
pub fn run<D: SyntheticDevice + ?Sized>(
    device: &D,
    session: &mut Session<'_, D>,
    spec: WorkloadSpec,
) -> Result<()> {
    let mut buffers = Vec::with_capacity(spec.iterations as usize);

    for i in 1..=spec.iterations {
        let name = format!("iteration-{}", i);
        session.mark(name.as_str())?;

        let buffer = device.alloc(spec.bytes)?;
        device.busy(&buffer, spec.work)?;
        device.note(&name);
        session.checkpoint(name)?;
        buffers.push(buffer);
    }

    for buffer in buffers {
        device.release(buffer)?;
    }
    Ok(())
}
