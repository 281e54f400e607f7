use kernel_vmem::VmError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AllocError {
    #[error("out of physical memory")]
    OutOfMemory,
}

impl From<AllocError> for VmError {
    fn from(value: AllocError) -> Self {
        match value {
            AllocError::OutOfMemory => Self::OutOfMemory,
        }
    }
}
