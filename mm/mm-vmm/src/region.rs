use crate::mmu::MmuFlags;
use alloc::vec::Vec;
use mm_addresses::VirtAddr;
use mm_pmm::Frame;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RegionFlags: u32 {
        /// Bookkeeping entry over a range mapped by other means.
        const RESERVED = 1 << 0;
        /// Backed by physical memory (owned frames or a caller range).
        const PHYSICAL = 1 << 1;
    }
}

/// One contiguous sub-range of an address space.
///
/// Invariants (upheld by [`AddressSpace`](crate::AddressSpace)): `size > 0`,
/// and within one address space all regions are disjoint and sorted
/// ascending by base.
#[derive(Debug)]
pub struct Region {
    name: &'static str,
    base: VirtAddr,
    size: u64,
    flags: RegionFlags,
    mmu_flags: MmuFlags,
    frames: Vec<Frame>,
}

impl Region {
    pub(crate) fn new(
        name: &'static str,
        base: VirtAddr,
        size: u64,
        flags: RegionFlags,
        mmu_flags: MmuFlags,
    ) -> Self {
        debug_assert!(size > 0);
        Self {
            name,
            base,
            size,
            flags,
            mmu_flags,
            frames: Vec::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn base(&self) -> VirtAddr {
        self.base
    }

    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    #[must_use]
    pub fn flags(&self) -> RegionFlags {
        self.flags
    }

    #[must_use]
    pub fn mmu_flags(&self) -> MmuFlags {
        self.mmu_flags
    }

    /// Number of physical frames this region owns. Zero for reservations and
    /// caller-supplied physical ranges.
    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Last byte covered by the region.
    pub(crate) fn last_byte(&self) -> VirtAddr {
        self.base.wrapping_add(self.size - 1)
    }

    pub(crate) fn contains(&self, va: VirtAddr) -> bool {
        va >= self.base && va <= self.last_byte()
    }

    pub(crate) fn push_frame(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    pub(crate) fn frames_mut(&mut self) -> &mut Vec<Frame> {
        &mut self.frames
    }
}
