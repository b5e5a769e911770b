use crate::mmu::{MmuFlags, MmuOps};
use crate::region::{Region, RegionFlags};
use alloc::vec::Vec;
use log::{debug, error, warn};
use mm_addresses::{PAGE_SHIFT, PAGE_SIZE, PhysAddr, VirtAddr, page_round_up};
use mm_pmm::FrameSource;
use mm_sync::SpinMutex;

/// Where a new region should go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Let the gap finder choose a spot.
    Anywhere,
    /// Place exactly at the given page-aligned address; failure to fit there
    /// is an error.
    Fixed(VirtAddr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum VmError {
    #[error("invalid arguments")]
    InvalidArgs,
    #[error("placement out of range or overlapping")]
    OutOfRange,
    #[error("out of memory")]
    OutOfMemory,
    #[error("no region contains the address")]
    NotFound,
}

/// A named, bounded virtual address range managed as disjoint regions.
///
/// The region list is embedded behind the address space's own lock; callers
/// share the space by reference (typically one kernel address space for the
/// life of the system, created once at init).
pub struct AddressSpace {
    name: &'static str,
    base: VirtAddr,
    size: u64,
    regions: SpinMutex<Vec<Region>>,
}

impl AddressSpace {
    /// Create an empty address space covering `[base, base + size)`.
    ///
    /// `size` may extend exactly to the top of the 64-bit range.
    #[must_use]
    pub const fn new(name: &'static str, base: VirtAddr, size: u64) -> Self {
        Self {
            name,
            base,
            size,
            regions: SpinMutex::new(Vec::new()),
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

    /// Run `f` against the current region list (for inspection and tests).
    pub fn with_regions<U>(&self, f: impl FnOnce(&[Region]) -> U) -> U {
        let guard = self.regions.lock();
        f(&guard)
    }

    #[must_use]
    pub fn region_count(&self) -> usize {
        self.regions.lock().len()
    }

    fn last_byte(&self) -> VirtAddr {
        self.base.wrapping_add(self.size - 1)
    }

    fn contains(&self, va: VirtAddr) -> bool {
        va >= self.base && va <= self.last_byte()
    }

    /// Whether `[va, va + size)` lies entirely inside the space, treating any
    /// unsigned wraparound as "no".
    fn contains_range(&self, va: VirtAddr, size: u64) -> bool {
        if !self.contains(va) {
            return false;
        }
        if size == 0 {
            return true;
        }
        let Some(last) = va.checked_add(size - 1) else {
            return false;
        };
        last <= self.last_byte()
    }

    /// Clip `size` so `[va, va + size)` stays inside the space.
    fn trim_to_space(&self, va: VirtAddr, size: u64) -> u64 {
        debug_assert!(self.contains(va));
        if size == 0 {
            return 0;
        }
        let offset = va.as_u64() - self.base.as_u64();
        let mut size = size;
        if offset.checked_add(size).is_none() {
            size = u64::MAX - offset - 1;
        }
        if offset + size >= self.size - 1 {
            size = self.size - offset;
        }
        size
    }

    /// The address reported for a zero-sized (no-op) request.
    fn noop_addr(&self, placement: Placement) -> VirtAddr {
        match placement {
            Placement::Anywhere => self.base,
            Placement::Fixed(va) => va,
        }
    }

    /// Insert `region` at its fixed base, keeping the list sorted and
    /// checking both neighbors for overlap.
    fn insert_fixed(&self, regions: &mut Vec<Region>, region: Region) -> Result<usize, VmError> {
        if region.size() == 0 || !self.contains_range(region.base(), region.size()) {
            return Err(VmError::OutOfRange);
        }

        let idx = regions.partition_point(|r| r.base() < region.base());
        if idx > 0 && regions[idx - 1].last_byte() >= region.base() {
            return Err(VmError::OutOfRange);
        }
        if idx < regions.len() && region.last_byte() >= regions[idx].base() {
            return Err(VmError::OutOfRange);
        }

        regions.insert(idx, region);
        Ok(idx)
    }

    /// Walk the gaps (before the first region, between neighbors, after the
    /// last) and return the first spot that fits, together with the index
    /// the new region will occupy.
    ///
    /// The search stops (not-found) when the placement policy wraps around
    /// zero or the terminal gap at the end of the space is exhausted.
    fn find_spot<M: MmuOps>(
        &self,
        mmu: &M,
        regions: &[Region],
        size: u64,
        align_pow2: u8,
        mmu_flags: MmuFlags,
    ) -> Option<(VirtAddr, usize)> {
        debug_assert!(size > 0 && size % PAGE_SIZE == 0);

        let align = 1u64 << align_pow2.max(PAGE_SHIFT);

        for idx in 0..=regions.len() {
            let prev = if idx > 0 { Some(&regions[idx - 1]) } else { None };
            let next = regions.get(idx);

            let gap_base = prev.map_or(self.base, |p| p.base().wrapping_add(p.size()));
            let gap_last = match next {
                Some(n) => {
                    if gap_base == n.base() {
                        // regions touch, no gap here
                        continue;
                    }
                    VirtAddr::new(n.base().as_u64() - 1)
                }
                None => {
                    let end = self.base.wrapping_add(self.size);
                    if gap_base == end {
                        // no gap at the end of the space, stop the search
                        return None;
                    }
                    VirtAddr::new(end.as_u64().wrapping_sub(1))
                }
            };

            let spot = mmu.pick_spot(
                gap_base,
                prev.map(Region::mmu_flags),
                gap_last,
                next.map(Region::mmu_flags),
                align,
                size,
                mmu_flags,
            );
            if spot < gap_base {
                // alignment wrapped around the address space
                return None;
            }
            if spot < gap_last && gap_last.as_u64() - spot.as_u64() + 1 >= size {
                return Some((spot, idx));
            }
        }

        None
    }

    /// Create a region per `placement` and link it into the list.
    fn place_region<M: MmuOps>(
        &self,
        mmu: &M,
        regions: &mut Vec<Region>,
        name: &'static str,
        size: u64,
        placement: Placement,
        align_pow2: u8,
        flags: RegionFlags,
        mmu_flags: MmuFlags,
    ) -> Result<usize, VmError> {
        match placement {
            Placement::Fixed(va) => {
                self.insert_fixed(regions, Region::new(name, va, size, flags, mmu_flags))
            }
            Placement::Anywhere => {
                let (spot, idx) = self
                    .find_spot(mmu, regions, size, align_pow2, mmu_flags)
                    .ok_or(VmError::OutOfRange)?;
                regions.insert(idx, Region::new(name, spot, size, flags, mmu_flags));
                Ok(idx)
            }
        }
    }

    /// Allocate a region of `size` bytes backed by fresh physical frames.
    ///
    /// `size` is rounded up to whole pages; zero (after rounding) is a no-op
    /// success. Frames come from the source's general pool one page at a
    /// time, with no physical contiguity, and are mapped individually.
    ///
    /// A page that fails to map mid-loop is *not* unwound: the region keeps
    /// the frames it was granted and the error is logged. See the design
    /// notes for the rationale.
    pub fn alloc<M: MmuOps, F: FrameSource>(
        &self,
        mmu: &mut M,
        frames: &mut F,
        name: &'static str,
        size: u64,
        placement: Placement,
        align_pow2: u8,
        mmu_flags: MmuFlags,
    ) -> Result<VirtAddr, VmError> {
        let size = page_round_up(size).ok_or(VmError::InvalidArgs)?;
        if size == 0 {
            return Ok(self.noop_addr(placement));
        }
        let pages = (size / PAGE_SIZE) as usize;

        // grab the physical memory up front, in case it can't be satisfied
        let mut list = Vec::new();
        let got = frames.alloc_frames(pages, &mut list);
        if got < pages {
            debug!("{}: wanted {pages} pages, pool gave {got}", self.name);
            frames.free_frames(&mut list);
            return Err(VmError::OutOfMemory);
        }

        let mut regions = self.regions.lock();
        let idx = match self.place_region(
            &*mmu,
            &mut regions,
            name,
            size,
            placement,
            align_pow2,
            RegionFlags::PHYSICAL,
            mmu_flags,
        ) {
            Ok(idx) => idx,
            Err(e) => {
                drop(regions);
                frames.free_frames(&mut list);
                return Err(e);
            }
        };

        let base = regions[idx].base();
        let mut va = base;
        for frame in list.drain(..) {
            if let Err(e) = mmu.map(va, frame.base(), 1, mmu_flags) {
                // partial mapping is deliberately left in place
                error!("'{name}': page at {va} failed to map, continuing: {e}");
            }
            regions[idx].push_frame(frame);
            va += PAGE_SIZE;
        }

        debug!("'{name}': {pages} pages at {base}");
        Ok(base)
    }

    /// Allocate a region backed by one physically contiguous run, mapped
    /// with a single multi-page update (DMA and large-TLB use cases).
    pub fn alloc_contiguous<M: MmuOps, F: FrameSource>(
        &self,
        mmu: &mut M,
        frames: &mut F,
        name: &'static str,
        size: u64,
        placement: Placement,
        align_pow2: u8,
        mmu_flags: MmuFlags,
    ) -> Result<VirtAddr, VmError> {
        let size = page_round_up(size).ok_or(VmError::InvalidArgs)?;
        if size == 0 {
            return Ok(self.noop_addr(placement));
        }
        let pages = (size / PAGE_SIZE) as usize;

        let mut list = Vec::new();
        let Some(pa) = frames.alloc_contiguous(pages, align_pow2, &mut list) else {
            debug!("{}: no contiguous run of {pages} pages", self.name);
            return Err(VmError::OutOfMemory);
        };

        let mut regions = self.regions.lock();
        let idx = match self.place_region(
            &*mmu,
            &mut regions,
            name,
            size,
            placement,
            align_pow2,
            RegionFlags::PHYSICAL,
            mmu_flags,
        ) {
            Ok(idx) => idx,
            Err(e) => {
                drop(regions);
                frames.free_frames(&mut list);
                return Err(e);
            }
        };

        let base = regions[idx].base();
        if let Err(e) = mmu.map(base, pa, pages, mmu_flags) {
            error!("'{name}': contiguous map at {base} failed, continuing: {e}");
        }
        for frame in list.drain(..) {
            regions[idx].push_frame(frame);
        }

        debug!("'{name}': {pages} contiguous pages at {base} -> {pa}");
        Ok(base)
    }

    /// Map an existing physical range (device/MMIO memory); nothing is
    /// allocated from the frame pool and the region owns no frames.
    ///
    /// `paddr` and `size` must already be page aligned; no rounding is done
    /// on the caller's behalf.
    pub fn map_physical<M: MmuOps>(
        &self,
        mmu: &mut M,
        name: &'static str,
        size: u64,
        paddr: PhysAddr,
        placement: Placement,
        align_pow2: u8,
        mmu_flags: MmuFlags,
    ) -> Result<VirtAddr, VmError> {
        if !paddr.is_page_aligned() || size % PAGE_SIZE != 0 {
            return Err(VmError::InvalidArgs);
        }
        if size == 0 {
            return Ok(self.noop_addr(placement));
        }

        let mut regions = self.regions.lock();
        let idx = self.place_region(
            &*mmu,
            &mut regions,
            name,
            size,
            placement,
            align_pow2,
            RegionFlags::PHYSICAL,
            mmu_flags,
        )?;

        let base = regions[idx].base();
        let pages = (size / PAGE_SIZE) as usize;
        if let Err(e) = mmu.map(base, paddr, pages, mmu_flags) {
            warn!("'{name}': physical map {base} -> {paddr} failed: {e}");
        }

        debug!("'{name}': physical {pages} pages at {base} -> {paddr}");
        Ok(base)
    }

    /// Record a region over a range the caller asserts is already mapped by
    /// other means (boot-time identity maps and the like). Pure bookkeeping:
    /// the existing translation attributes are queried, not established.
    pub fn reserve<M: MmuOps>(
        &self,
        mmu: &M,
        name: &'static str,
        size: u64,
        vaddr: VirtAddr,
    ) -> Result<(), VmError> {
        if !vaddr.is_page_aligned() || size % PAGE_SIZE != 0 {
            return Err(VmError::InvalidArgs);
        }
        if size == 0 {
            return Ok(());
        }
        if !self.contains(vaddr) {
            return Err(VmError::OutOfRange);
        }
        let size = self.trim_to_space(vaddr, size);

        // inherit whatever attributes the range is currently mapped with
        let mmu_flags = mmu.query(vaddr).map_or(MmuFlags::empty(), |(_, f)| f);

        let mut regions = self.regions.lock();
        let region = Region::new(name, vaddr, size, RegionFlags::RESERVED, mmu_flags);
        self.insert_fixed(&mut regions, region)?;

        debug!("'{name}': reserved {size:#x} bytes at {vaddr}");
        Ok(())
    }

    /// Tear down the region containing `vaddr`: unmap its whole extent,
    /// return its frames to the pool, and drop it from the list.
    pub fn free_region<M: MmuOps, F: FrameSource>(
        &self,
        mmu: &mut M,
        frames: &mut F,
        vaddr: VirtAddr,
    ) -> Result<(), VmError> {
        let mut regions = self.regions.lock();
        let idx = regions
            .iter()
            .position(|r| r.contains(vaddr))
            .ok_or(VmError::NotFound)?;
        let mut region = regions.remove(idx);

        mmu.unmap(region.base(), (region.size() / PAGE_SIZE) as usize);
        drop(regions);

        frames.free_frames(region.frames_mut());

        debug!("'{}': freed region at {}", region.name(), region.base());
        Ok(())
    }
}
