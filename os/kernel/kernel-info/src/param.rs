//! Capacities of the fixed-size kernel tables.

/// Maximum number of CPUs.
pub const NCPU: usize = 8;

/// Maximum number of processes.
pub const NPROC: usize = 64;

/// Open files per process.
pub const NOFILE: usize = 16;

/// Maximum number of blocks any file-system operation writes.
pub const MAXOPBLOCKS: usize = 10;

/// Size of the disk block cache.
pub const NBUF: usize = MAXOPBLOCKS * 3;

/// Number of hash buckets the block cache is sharded into.
pub const NBUCKET: usize = 13;

/// Block size in bytes.
pub const BSIZE: usize = 1024;

/// Size of the simulated file-system disk in blocks.
pub const FSSIZE: u32 = 1000;

/// Length of a process name, including the terminator.
pub const PROC_NAME_LEN: usize = 16;

/// Device number of the root disk.
pub const ROOTDEV: u32 = 1;

const _: () = {
    assert!(NCPU > 0);
    assert!(NBUCKET > 0 && NBUCKET <= NBUF);
    assert!(BSIZE.is_power_of_two());
};
