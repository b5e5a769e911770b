//! # Physical Frame Source
//!
//! The region allocator backs mappings with physical page frames but does not
//! manage physical memory itself; it consumes a [`FrameSource`]. This crate
//! defines that seam plus [`BitmapFrameSource`], a bit-per-frame reference
//! implementation suitable for bring-up and for the hosted test suites.
//!
//! ## Ownership
//!
//! A [`Frame`] is the record of one owned page frame. Allocation transfers
//! frames out of the source's free pool into the caller's list;
//! [`FrameSource::free_frames`] transfers them back. At any instant a frame
//! is tracked by exactly one side.
//!
//! ## Partial allocation
//!
//! `alloc_frames` may return *fewer* frames than requested (never more). A
//! short count is a partial failure: the caller decides whether to keep the
//! frames or hand them straight back.

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

mod bitmap;

pub use bitmap::BitmapFrameSource;

use alloc::vec::Vec;
use mm_addresses::PhysAddr;

/// Record of one owned physical page frame (page-aligned base).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    base: PhysAddr,
}

impl Frame {
    #[inline]
    #[must_use]
    pub const fn new(base: PhysAddr) -> Self {
        debug_assert!(base.is_page_aligned());
        Self { base }
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> PhysAddr {
        self.base
    }
}

/// Supplier of physical page frames.
pub trait FrameSource {
    /// Allocate up to `count` frames from the general pool, appending them to
    /// `out`. Returns the number actually allocated; no contiguity is
    /// guaranteed.
    fn alloc_frames(&mut self, count: usize, out: &mut Vec<Frame>) -> usize;

    /// Allocate one physically contiguous run of `count` frames whose base is
    /// aligned to `1 << align_pow2` bytes. Appends the frames to `out` and
    /// returns the base address, or `None` if no such run exists.
    fn alloc_contiguous(
        &mut self,
        count: usize,
        align_pow2: u8,
        out: &mut Vec<Frame>,
    ) -> Option<PhysAddr>;

    /// Return ownership of `frames` to the pool, draining the list.
    fn free_frames(&mut self, frames: &mut Vec<Frame>);
}
