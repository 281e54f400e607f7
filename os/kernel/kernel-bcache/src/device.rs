//! The storage side of the cache.

use kernel_info::param::BSIZE;
use kernel_sync::SpinLock;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    #[error("no such device {0}")]
    NoSuchDevice(u32),
    #[error("block {blockno} is outside device {dev}")]
    OutOfRange { dev: u32, blockno: u32 },
}

/// A synchronous block device. Both calls return only once the transfer has
/// completed.
pub trait BlockDevice: Send + Sync {
    /// Fill `buf` with block `blockno` of device `dev`.
    ///
    /// # Errors
    /// The device does not exist or the block is out of range.
    fn read_block(&self, dev: u32, blockno: u32, buf: &mut [u8; BSIZE])
    -> Result<(), DeviceError>;

    /// Store `buf` as block `blockno` of device `dev`.
    ///
    /// # Errors
    /// The device does not exist or the block is out of range.
    fn write_block(&self, dev: u32, blockno: u32, buf: &[u8; BSIZE]) -> Result<(), DeviceError>;
}

/// A disk held in memory. Each block has its own lock, so transfers of
/// different blocks proceed in parallel.
pub struct RamDisk {
    dev: u32,
    blocks: Box<[SpinLock<[u8; BSIZE]>]>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl RamDisk {
    /// A zero-filled disk answering to device number `dev`.
    #[must_use]
    pub fn new(dev: u32, nblocks: u32) -> Self {
        Self {
            dev,
            blocks: (0..nblocks).map(|_| SpinLock::new([0; BSIZE])).collect(),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub const fn dev(&self) -> u32 {
        self.dev
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn nblocks(&self) -> u32 {
        self.blocks.len() as u32
    }

    /// Number of completed block reads.
    #[must_use]
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    /// Number of completed block writes.
    #[must_use]
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }

    /// Copy of a block as it is on "disk", bypassing any cache.
    #[must_use]
    pub fn snapshot(&self, blockno: u32) -> Option<[u8; BSIZE]> {
        self.blocks.get(blockno as usize).map(|b| *b.lock())
    }

    fn block(&self, dev: u32, blockno: u32) -> Result<&SpinLock<[u8; BSIZE]>, DeviceError> {
        if dev != self.dev {
            return Err(DeviceError::NoSuchDevice(dev));
        }
        self.blocks
            .get(blockno as usize)
            .ok_or(DeviceError::OutOfRange { dev, blockno })
    }
}

impl BlockDevice for RamDisk {
    fn read_block(
        &self,
        dev: u32,
        blockno: u32,
        buf: &mut [u8; BSIZE],
    ) -> Result<(), DeviceError> {
        buf.copy_from_slice(&*self.block(dev, blockno)?.lock());
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn write_block(&self, dev: u32, blockno: u32, buf: &[u8; BSIZE]) -> Result<(), DeviceError> {
        self.block(dev, blockno)?.lock().copy_from_slice(buf);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_round_trip() {
        let disk = RamDisk::new(1, 4);
        let mut block = [0u8; BSIZE];
        block[BSIZE - 1] = 9;
        disk.write_block(1, 3, &block).unwrap();

        let mut back = [0u8; BSIZE];
        disk.read_block(1, 3, &mut back).unwrap();
        assert_eq!(back[BSIZE - 1], 9);
        assert_eq!((disk.reads(), disk.writes()), (1, 1));
    }

    #[test]
    fn rejects_foreign_devices_and_blocks() {
        let disk = RamDisk::new(1, 4);
        let mut block = [0u8; BSIZE];
        assert_eq!(
            disk.read_block(2, 0, &mut block),
            Err(DeviceError::NoSuchDevice(2))
        );
        assert_eq!(
            disk.write_block(1, 4, &block),
            Err(DeviceError::OutOfRange { dev: 1, blockno: 4 })
        );
        assert_eq!(disk.reads() + disk.writes(), 0);
    }
}
