use mm_addresses::{PhysAddr, VirtAddr, align_up};

bitflags::bitflags! {
    /// Architecture-independent view of the MMU attribute bits carried by a
    /// region and handed to the page-table layer.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MmuFlags: u32 {
        const UNCACHED   = 1 << 0;
        const DEVICE     = 1 << 1;
        const READ_ONLY  = 1 << 2;
        const NO_EXECUTE = 1 << 3;
        const USER       = 1 << 4;
    }
}

/// Page-table update failure, reported by the architecture layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("mmu: {0}")]
pub struct MapError(pub &'static str);

/// The architecture page-table seam.
///
/// The region allocator calls through this trait for every mapping change
/// and for the placement policy. Implementations program real page tables;
/// the test suites substitute a recording mock.
pub trait MmuOps {
    /// Map `pages` consecutive pages starting at `va` onto the physical run
    /// starting at `pa`.
    fn map(
        &mut self,
        va: VirtAddr,
        pa: PhysAddr,
        pages: usize,
        flags: MmuFlags,
    ) -> Result<(), MapError>;

    /// Remove `pages` consecutive page mappings starting at `va`.
    fn unmap(&mut self, va: VirtAddr, pages: usize);

    /// Look up the current translation and attributes of `va`, if mapped.
    fn query(&self, va: VirtAddr) -> Option<(PhysAddr, MmuFlags)>;

    /// Pick a placement inside the gap `[gap_base, gap_last]`.
    ///
    /// The default rounds the gap base up to `align`. Architectures can
    /// override this to keep incompatible attribute domains apart or to
    /// steer large mappings; the neighbor flags are provided for that. The
    /// result may land outside the gap (including wrapping around zero);
    /// the caller validates it.
    fn pick_spot(
        &self,
        gap_base: VirtAddr,
        _prev_flags: Option<MmuFlags>,
        _gap_last: VirtAddr,
        _next_flags: Option<MmuFlags>,
        align: u64,
        _size: u64,
        _flags: MmuFlags,
    ) -> VirtAddr {
        VirtAddr::new(align_up(gap_base.as_u64(), align))
    }
}
