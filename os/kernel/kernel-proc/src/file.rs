//! What the process layer needs from the file system: shared handles for
//! open files and directories. Closing a file or releasing a directory is
//! dropping the last handle.

use crate::error::ProcError;
use crate::table::{CopySrc, ProcessTable};
use std::sync::Arc;

/// An open file.
pub trait File: Send + Sync {
    /// Short description for diagnostics, e.g. `"pipe"` or `"inode 12"`.
    fn describe(&self) -> String;

    /// Write `n` bytes taken from `src`, which is either user memory of the
    /// calling process or a kernel buffer; see
    /// [`ProcessTable::either_copy_in`]. Returns the number of bytes written.
    ///
    /// # Errors
    /// [`ProcError::NotWritable`] unless the file supports writing, and
    /// whatever the copy from `src` fails with.
    fn write(&self, table: &ProcessTable, src: CopySrc<'_>, n: usize) -> Result<usize, ProcError> {
        let _ = (table, src, n);
        Err(ProcError::NotWritable)
    }
}

/// An in-memory inode, used as a working directory.
pub trait Inode: Send + Sync {
    fn inum(&self) -> u32;
}

/// The mounted file system, as far as process setup is concerned.
pub trait FileSystem: Send + Sync {
    /// The root directory, `namei("/")`.
    fn root(&self) -> Arc<dyn Inode>;
}
