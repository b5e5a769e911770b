use crate::{Frame, FrameSource};
use alloc::vec;
use alloc::vec::Vec;
use mm_addresses::{PAGE_SHIFT, PAGE_SIZE, PhysAddr};

/// Bit-per-frame allocator over one physical range.
///
/// A set bit marks a used frame. Single-frame allocation starts at a roving
/// cursor so the pool is not ground down from the front; contiguous runs are
/// found by a plain forward scan.
pub struct BitmapFrameSource {
    base: PhysAddr,
    frames: usize,
    bits: Vec<u64>,
    free: usize,
    cursor: usize,
}

impl BitmapFrameSource {
    /// Manage the physical range `[base, base + len)`.
    ///
    /// `base` and `len` must be page aligned.
    #[must_use]
    pub fn new(base: PhysAddr, len: u64) -> Self {
        debug_assert!(base.is_page_aligned());
        debug_assert!(len % PAGE_SIZE == 0);

        let frames = (len / PAGE_SIZE) as usize;
        Self {
            base,
            frames,
            bits: vec![0; frames.div_ceil(64)],
            free: frames,
            cursor: 0,
        }
    }

    #[inline]
    #[must_use]
    pub const fn free_frames_count(&self) -> usize {
        self.free
    }

    #[inline]
    #[must_use]
    pub const fn total_frames(&self) -> usize {
        self.frames
    }

    #[inline]
    fn is_used(&self, idx: usize) -> bool {
        self.bits[idx / 64] & (1 << (idx % 64)) != 0
    }

    #[inline]
    fn mark_used(&mut self, idx: usize) {
        debug_assert!(!self.is_used(idx));
        self.bits[idx / 64] |= 1 << (idx % 64);
        self.free -= 1;
    }

    #[inline]
    fn mark_free(&mut self, idx: usize) {
        debug_assert!(self.is_used(idx), "double free of frame {idx}");
        self.bits[idx / 64] &= !(1 << (idx % 64));
        self.free += 1;
    }

    #[inline]
    fn addr_of(&self, idx: usize) -> PhysAddr {
        self.base + (idx as u64 * PAGE_SIZE)
    }

    fn find_one(&mut self) -> Option<usize> {
        if self.free == 0 {
            return None;
        }
        for step in 0..self.frames {
            let idx = (self.cursor + step) % self.frames;
            if !self.is_used(idx) {
                self.cursor = (idx + 1) % self.frames;
                return Some(idx);
            }
        }
        None
    }
}

impl FrameSource for BitmapFrameSource {
    fn alloc_frames(&mut self, count: usize, out: &mut Vec<Frame>) -> usize {
        let mut got = 0;
        while got < count {
            let Some(idx) = self.find_one() else {
                break;
            };
            self.mark_used(idx);
            out.push(Frame::new(self.addr_of(idx)));
            got += 1;
        }
        if got < count {
            log::debug!("frame pool short: asked {count}, got {got}");
        }
        got
    }

    fn alloc_contiguous(
        &mut self,
        count: usize,
        align_pow2: u8,
        out: &mut Vec<Frame>,
    ) -> Option<PhysAddr> {
        if count == 0 || count > self.frames {
            return None;
        }

        // run start must satisfy the byte alignment, at least page aligned
        let align = 1u64 << align_pow2.max(PAGE_SHIFT);

        let mut start = 0;
        while start + count <= self.frames {
            if self.addr_of(start).as_u64() % align != 0 {
                start += 1;
                continue;
            }
            if let Some(used) = (start..start + count).find(|&i| self.is_used(i)) {
                // skip past the conflicting frame
                start = used + 1;
                continue;
            }
            for idx in start..start + count {
                self.mark_used(idx);
                out.push(Frame::new(self.addr_of(idx)));
            }
            return Some(self.addr_of(start));
        }
        None
    }

    fn free_frames(&mut self, frames: &mut Vec<Frame>) {
        for frame in frames.drain(..) {
            let off = frame.base().as_u64() - self.base.as_u64();
            let idx = (off / PAGE_SIZE) as usize;
            debug_assert!(idx < self.frames, "frame outside managed range");
            self.mark_free(idx);
        }
    }
}
