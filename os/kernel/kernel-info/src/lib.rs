//! # Kernel Configuration and Memory Layout
//!
//! Central source of the compile-time parameters and the physical/virtual
//! memory layout shared by the allocator, the page-table code, the buffer
//! cache and the process subsystem.
//!
//! ## Architecture
//!
//! ### Parameters ([`param`])
//! Fixed capacities of the kernel's arenas: CPUs, process slots, buffers and
//! hash buckets, open files per process.
//!
//! ### Memory Layout ([`memory`])
//! The RISC-V `virt` machine layout: MMIO device windows below `KERNBASE`, RAM
//! from `KERNBASE` to `PHYSTOP`, and the trampoline, trap frame and kernel
//! stacks at the top of the Sv39 address space.
//!
//! All values are `const` and validated with compile-time assertions; a
//! layout that violates an ordering constraint fails the build.

#![cfg_attr(not(any(test, doctest)), no_std)]

pub mod memory;
pub mod param;
