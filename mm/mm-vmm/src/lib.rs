//! # Virtual Memory Region Management
//!
//! An [`AddressSpace`] manages one bounded virtual address range as a sorted
//! list of disjoint [`Region`]s. Regions are carved out either at a fixed
//! address or by walking the gaps between existing regions, backed with
//! physical frames from a [`FrameSource`](mm_pmm::FrameSource), and entered
//! into the page tables through the [`MmuOps`] seam.
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                 AddressSpace                     │
//! │   sorted region list + gap finder (this crate)   │
//! └──────────┬────────────────────────┬──────────────┘
//!            │                        │
//! ┌──────────▼──────────┐  ┌──────────▼──────────┐
//! │     FrameSource     │  │       MmuOps        │
//! │  physical frames    │  │  page table updates │
//! │     (mm-pmm)        │  │  (arch integration) │
//! └─────────────────────┘  └─────────────────────┘
//! ```
//!
//! ## Design points
//!
//! - The region list lives behind a single blocking mutex embedded in the
//!   address space; every public operation holds it for its whole critical
//!   section and RAII guards release it on every path.
//! - Spot finding is a linear walk over the gaps: before the first region,
//!   between neighbors, and after the last. Region counts stay small (tens),
//!   so O(n) is the accepted trade; do not replace the scan with a tree
//!   without re-verifying the overlap invariants.
//! - All interval arithmetic is wrap-aware: an address space may end exactly
//!   at the top of the 64-bit range, and any `base + size` that wraps is
//!   treated as "does not fit".
//! - A zero-sized request to any allocation entry point is a no-op success
//!   and never creates a region.

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

mod aspace;
mod mmu;
mod region;

pub use aspace::{AddressSpace, Placement, VmError};
pub use mmu::{MapError, MmuFlags, MmuOps};
pub use region::{Region, RegionFlags};
