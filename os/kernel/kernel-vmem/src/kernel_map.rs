//! # Kernel Page Table
//!
//! The kernel runs with a direct map: every device window and all of RAM are
//! mapped at their physical addresses. On top of that, the trampoline frame is
//! mapped at the highest virtual page, where the same frame appears in every
//! user address space.
//!
//! | region | perm |
//! |--------|------|
//! | UART0, VIRTIO0, CLINT, PLIC | RW |
//! | `KERNBASE..etext` (kernel text) | RX |
//! | `etext..phys_top` (kernel data + free RAM) | RW |
//! | `TRAMPOLINE` → trampoline frame | RX |

use crate::{AddressSpace, FrameAlloc, PageEntryBits, PhysMapper, VmError, info};
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, PhysicalPage, VirtualAddress};

/// Where the kernel image and RAM sit in physical memory.
#[derive(Debug, Clone, Copy)]
pub struct KernelLayout {
    /// End of kernel text (page aligned).
    pub etext: PhysicalAddress,
    /// End of RAM (exclusive).
    pub phys_top: PhysicalAddress,
    /// Frame holding the trampoline code (inside kernel text).
    pub trampoline: PhysicalPage,
}

/// Build the kernel's page table.
///
/// # Errors
/// [`VmError::OutOfMemory`] if the interior tables do not fit.
pub fn build<'m, M: PhysMapper>(
    mapper: &'m M,
    alloc: &dyn FrameAlloc,
    layout: &KernelLayout,
) -> Result<AddressSpace<'m, M>, VmError> {
    let kvm = AddressSpace::create(mapper, alloc)?;
    let rw = PageEntryBits::READ | PageEntryBits::WRITE;
    let rx = PageEntryBits::READ | PageEntryBits::EXEC;

    let direct = |base: u64, size: u64, perm| {
        kvm.map(alloc, VirtualAddress::new(base), size, PhysicalAddress::new(base), perm)
    };

    direct(info::UART0, PAGE_SIZE, rw)?;
    direct(info::VIRTIO0, PAGE_SIZE, rw)?;
    direct(info::CLINT, 0x10000, rw)?;
    direct(info::PLIC, info::PLIC_SIZE, rw)?;
    direct(info::KERNBASE, layout.etext.as_u64() - info::KERNBASE, rx)?;
    direct(
        layout.etext.as_u64(),
        layout.phys_top.as_u64() - layout.etext.as_u64(),
        rw,
    )?;
    kvm.map(
        alloc,
        VirtualAddress::new(info::TRAMPOLINE),
        PAGE_SIZE,
        layout.trampoline.base(),
        rx,
    )?;

    log::info!(
        "kernel page table at {}: text {}..{}, ram ..{}",
        kvm.root(),
        PhysicalAddress::new(info::KERNBASE),
        layout.etext,
        layout.phys_top
    );
    Ok(kvm)
}

impl<M: PhysMapper> AddressSpace<'_, M> {
    /// Translate a kernel virtual address. Only needed for addresses outside
    /// the direct map, i.e. kernel stacks.
    ///
    /// # Panics
    /// If `va` is not mapped.
    #[must_use]
    pub fn kernel_translate(&self, va: VirtualAddress) -> PhysicalAddress {
        match self.lookup(va) {
            Some(pte) if pte.valid() => pte.page().join(va.page_offset()),
            _ => panic!("kvmpa: {va} not mapped"),
        }
    }
}
