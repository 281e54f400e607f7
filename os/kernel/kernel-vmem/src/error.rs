use kernel_memory_addresses::VirtualAddress;

/// Recoverable virtual-memory failures.
///
/// Invariant violations (remapping a valid entry, unmapping a hole) are not
/// represented here; they panic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum VmError {
    #[error("out of memory")]
    OutOfMemory,
    #[error("virtual address {0} is beyond MAXVA")]
    OutOfRange(VirtualAddress),
    #[error("virtual address {0} is not mapped")]
    NotMapped(VirtualAddress),
    #[error("access to {0} is not permitted")]
    AccessDenied(VirtualAddress),
    #[error("string is not NUL-terminated within the limit")]
    NoTerminator,
}
