//! # Physical Memory and Page Frame Allocation
//!
//! This crate owns physical memory: the RAM arena itself and the allocator
//! that hands out its 4 KiB frames.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                Page Allocator                       │
//! │    • one free list + lock per CPU                   │
//! │    • steals from other CPUs when its own runs dry   │
//! │    • copy-on-write reference count per frame        │
//! └─────────────────┬───────────────────────────────────┘
//!                   │ intrusive links, junk fill
//! ┌─────────────────▼───────────────────────────────────┐
//! │              Physical Memory                        │
//! │    • RAM from KERNBASE to phys_top                  │
//! │    • direct-mapped PhysMapper                       │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ### Physical Memory ([`phys_mapper`])
//!
//! [`PhysicalMemory`] is the machine's RAM: a contiguous run of page-aligned
//! frames starting at `KERNBASE`. It implements `kernel_vmem::PhysMapper`,
//! so page tables, free-list links and user pages are all reached through
//! physical addresses.
//!
//! ### Page Allocator ([`frame_alloc`])
//!
//! [`PageAllocator`] manages every frame between the end of the kernel image
//! and the top of RAM:
//! * **Per-CPU free lists**: allocation tries the calling CPU's list first,
//!   then the other CPUs' lists one at a time. No two list locks are ever held
//!   together.
//! * **Poisoning**: freed frames are filled with `1`, allocated frames with
//!   `5`, so stale pointers read obvious garbage.
//! * **Reference counts**: one 8-bit counter per frame, each behind its own
//!   lock. A frame returns to a free list exactly when its count drops to 0.
//!
//! Exhaustion is an ordinary `None`. Freeing a frame that is unaligned,
//! outside the managed range or not allocated is a kernel bug and panics.
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use kernel_alloc::{BootCpu, PageAllocator, PhysicalMemory};
//!
//! let ram = Arc::new(PhysicalMemory::new(64 * 4096));
//! let kernel_end = ram.start() + 4 * 4096;
//! let pages = PageAllocator::new(Arc::clone(&ram), kernel_end, 2, BootCpu);
//!
//! let frame = pages.allocate_page().unwrap();
//! assert_eq!(pages.ref_count(frame), 1);
//! pages.free_page(frame);
//! assert_eq!(pages.free_pages(), 60);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

mod cpu;
mod error;
pub mod frame_alloc;
pub mod phys_mapper;

pub use cpu::{BootCpu, CpuIdentity};
pub use error::AllocError;
pub use frame_alloc::PageAllocator;
pub use phys_mapper::PhysicalMemory;
