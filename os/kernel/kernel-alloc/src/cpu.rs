/// Tells the allocator which CPU is calling, to pick the local free list.
///
/// The answer only has to be stable for the duration of one allocator call.
pub trait CpuIdentity: Send + Sync {
    fn current(&self) -> usize;
}

/// Everything runs on CPU 0; used during boot and by single-CPU tools.
#[derive(Debug, Default, Clone, Copy)]
pub struct BootCpu;

impl CpuIdentity for BootCpu {
    fn current(&self) -> usize {
        0
    }
}

impl<F> CpuIdentity for F
where
    F: Fn() -> usize + Send + Sync,
{
    fn current(&self) -> usize {
        self()
    }
}
