use kernel_info::param::NCPU;
use kernel_proc::ProcError;
use kernel_vmem::VmError;

/// Why the machine could not boot.
#[derive(Debug, thiserror::Error)]
pub enum BootError {
    #[error("{0} cpus requested, supported are 1 to {NCPU}")]
    BadCpuCount(usize),
    #[error("{0} pages of RAM leave nothing after the kernel image")]
    TooLittleRam(u64),
    #[error("kernel page table: {0}")]
    KernelPageTable(#[from] VmError),
    #[error("process table: {0}")]
    Processes(#[from] ProcError),
    #[error("cannot start thread: {0}")]
    Spawn(#[from] std::io::Error),
}
