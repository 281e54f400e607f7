use kernel_memory_addresses::VirtualAddress;
use kernel_vmem::VmError;

use crate::Pid;

/// Recoverable failures of process operations. The system call layer turns
/// every one of them into `-1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ProcError {
    #[error("no free process slot")]
    NoFreeSlot,
    #[error("out of memory")]
    OutOfMemory,
    #[error("no children to wait for")]
    NoChildren,
    #[error("no process with pid {0}")]
    NoSuchProcess(Pid),
    #[error("process was killed")]
    Killed,
    #[error("bad user address {0}")]
    BadAddress(VirtualAddress),
    #[error("bad file descriptor {0}")]
    BadDescriptor(i32),
    #[error("file descriptor table full")]
    DescriptorTableFull,
    #[error("file is not open for writing")]
    NotWritable,
    #[error("kernel buffer of {len} bytes, {needed} needed")]
    ShortBuffer { len: usize, needed: usize },
    #[error(transparent)]
    Vm(#[from] VmError),
}
