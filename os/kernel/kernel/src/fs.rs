//! The smallest file system that lets processes have a working directory
//! and a console.

use kernel_proc::file::{File, FileSystem, Inode};
use kernel_proc::{CopySrc, ProcError, ProcessTable};
use std::sync::Arc;

/// Inode number of the root directory.
pub const ROOTINO: u32 = 1;

/// An in-memory directory.
#[derive(Debug)]
pub struct Dir {
    inum: u32,
}

impl Inode for Dir {
    fn inum(&self) -> u32 {
        self.inum
    }
}

/// A file system holding only its root directory.
#[derive(Debug)]
pub struct RootFs {
    root: Arc<Dir>,
}

impl Default for RootFs {
    fn default() -> Self {
        Self {
            root: Arc::new(Dir { inum: ROOTINO }),
        }
    }
}

impl RootFs {
    /// Processes holding the root directory, plus this file system itself.
    #[must_use]
    pub fn root_refs(&self) -> usize {
        Arc::strong_count(&self.root)
    }
}

impl FileSystem for RootFs {
    fn root(&self) -> Arc<dyn Inode> {
        self.root.clone()
    }
}

/// The console device, writing to the kernel log.
#[derive(Debug, Default)]
pub struct Console;

impl Console {
    pub fn print(&self, bytes: &[u8]) -> usize {
        log::info!(target: "console", "{}", String::from_utf8_lossy(bytes).trim_end());
        bytes.len()
    }
}

impl File for Console {
    fn describe(&self) -> String {
        "console".to_owned()
    }

    fn write(&self, table: &ProcessTable, src: CopySrc<'_>, n: usize) -> Result<usize, ProcError> {
        let mut bytes = vec![0; n];
        table.either_copy_in(&mut bytes, src)?;
        Ok(self.print(&bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_is_shared() {
        let fs = RootFs::default();
        let a = fs.root();
        let b = fs.root();
        assert_eq!(a.inum(), ROOTINO);
        assert_eq!(b.inum(), ROOTINO);
        assert_eq!(fs.root_refs(), 3);
        drop((a, b));
        assert_eq!(fs.root_refs(), 1);
    }
}
