use core::ptr::{self, null_mut};

/// Header written at the base of every **free** chunk.
///
/// `len` is the length of the whole chunk, header included, and is always a
/// multiple of the pointer size. Freeing rebuilds one of these over the dead
/// allocation, which is why every allocation is inflated to at least
/// `size_of::<FreeChunk>()` bytes.
#[repr(C)]
pub(crate) struct FreeChunk {
    pub(crate) len: usize,
    pub(crate) next: *mut FreeChunk,
}

/// Singly linked, address-sorted free list with a sentinel head.
///
/// # Invariants
/// - Chunks are disjoint and sorted ascending by address.
/// - No two chunks are address-adjacent (insertion merges them).
/// - Every chunk can hold its own `FreeChunk` header.
pub(crate) struct FreeList {
    /// Sentinel; does not describe memory. `head.next` is the first chunk.
    head: FreeChunk,
}

// Safety: the list is only touched under the owning heap's lock; raw
// pointers are never handed out past that critical section.
unsafe impl Send for FreeList {}

impl FreeList {
    pub(crate) const fn new() -> Self {
        Self {
            head: FreeChunk {
                len: 0,
                next: null_mut(),
            },
        }
    }

    /// Write a chunk header over `[addr, addr + len)` and link it in address
    /// order, merging with either neighbor when flush against it.
    ///
    /// # Safety
    /// - The range must be valid, writable, and owned by this list from now
    ///   on, and must not overlap any chunk already linked.
    /// - `addr` must be aligned for `FreeChunk`; `len` must be a pointer-size
    ///   multiple of at least `size_of::<FreeChunk>()`.
    /// - The caller must hold the heap lock.
    pub(crate) unsafe fn insert(&mut self, addr: *mut u8, len: usize) {
        debug_assert!(len >= size_of::<FreeChunk>());
        debug_assert!(len % size_of::<usize>() == 0);
        debug_assert!(addr as usize % align_of::<FreeChunk>() == 0);

        let mut chunk = addr.cast::<FreeChunk>();
        unsafe {
            ptr::write(
                chunk,
                FreeChunk {
                    len,
                    next: null_mut(),
                },
            );
        }

        // find the node to insert before
        let mut prev = &raw mut self.head;
        let mut cursor = unsafe { (*prev).next };
        while !cursor.is_null() && cursor < chunk {
            prev = cursor;
            cursor = unsafe { (*cursor).next };
        }
        debug_assert!(cursor.is_null() || chunk as usize + len <= cursor as usize);

        unsafe {
            (*chunk).next = cursor;
            (*prev).next = chunk;
        }

        // extend the previous chunk instead if it ends exactly here
        if !ptr::eq(prev, &raw const self.head)
            && prev as usize + unsafe { (*prev).len } == chunk as usize
        {
            unsafe {
                (*prev).len += (*chunk).len;
                (*prev).next = (*chunk).next;
            }
            chunk = prev;
        }

        // and swallow the next chunk if we now reach it
        let next = unsafe { (*chunk).next };
        if !next.is_null() && chunk as usize + unsafe { (*chunk).len } == next as usize {
            unsafe {
                (*chunk).len += (*next).len;
                (*chunk).next = (*next).next;
            }
        }
    }

    /// First fit: unlink and return the first chunk with `len >= size`.
    ///
    /// When the surplus after `size` bytes can hold a header of its own it is
    /// split off and re-linked; otherwise the whole chunk is handed out. The
    /// returned chunk's `len` is the full granted length either way.
    ///
    /// # Safety
    /// The caller must hold the heap lock and takes ownership of the
    /// returned range until it is re-inserted.
    pub(crate) unsafe fn take_fit(&mut self, size: usize) -> Option<*mut FreeChunk> {
        let mut prev = &raw mut self.head;
        let mut cursor = unsafe { (*prev).next };
        while !cursor.is_null() {
            let len = unsafe { (*cursor).len };
            debug_assert!(len % size_of::<usize>() == 0);
            if len >= size {
                unsafe {
                    (*prev).next = (*cursor).next;
                }
                if len > size + size_of::<FreeChunk>() {
                    unsafe {
                        let tail = cursor.cast::<u8>().add(size);
                        self.insert(tail, len - size);
                        (*cursor).len = size;
                    }
                }
                return Some(cursor);
            }
            prev = cursor;
            cursor = unsafe { (*cursor).next };
        }
        None
    }

    /// Walk the list: (total free bytes, largest chunk, chunk count).
    pub(crate) fn totals(&self) -> (usize, usize, usize) {
        let mut free = 0;
        let mut max_chunk = 0;
        let mut count = 0;
        let mut cursor = self.head.next;
        while !cursor.is_null() {
            let len = unsafe { (*cursor).len };
            free += len;
            max_chunk = max_chunk.max(len);
            count += 1;
            cursor = unsafe { (*cursor).next };
        }
        (free, max_chunk, count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // chunk-aligned scratch memory for direct list manipulation
    fn scratch(words: usize) -> Box<[usize]> {
        vec![0usize; words].into_boxed_slice()
    }

    #[test]
    fn adjacent_inserts_merge_into_one() {
        let mut mem = scratch(64);
        let base = mem.as_mut_ptr().cast::<u8>();
        let mut list = FreeList::new();

        let step = 8 * size_of::<usize>();
        unsafe {
            list.insert(base, step);
            list.insert(base.add(2 * step), step);
            // the gap filler merges all three
            list.insert(base.add(step), step);
        }

        let (free, max, count) = list.totals();
        assert_eq!(free, 3 * step);
        assert_eq!(max, 3 * step);
        assert_eq!(count, 1);
    }

    #[test]
    fn take_fit_splits_and_keeps_remainder() {
        let mut mem = scratch(64);
        let base = mem.as_mut_ptr().cast::<u8>();
        let total = 64 * size_of::<usize>();
        let mut list = FreeList::new();
        unsafe { list.insert(base, total) };

        let want = 8 * size_of::<usize>();
        let chunk = unsafe { list.take_fit(want) }.unwrap();
        assert_eq!(chunk.cast::<u8>(), base);
        assert_eq!(unsafe { (*chunk).len }, want);

        let (free, _, count) = list.totals();
        assert_eq!(free, total - want);
        assert_eq!(count, 1);
    }

    #[test]
    fn take_fit_grants_whole_chunk_when_split_too_tight() {
        let mut mem = scratch(8);
        let base = mem.as_mut_ptr().cast::<u8>();
        let total = 8 * size_of::<usize>();
        let mut list = FreeList::new();
        unsafe { list.insert(base, total) };

        // surplus equals the header size exactly, which is not enough
        let want = total - size_of::<FreeChunk>();
        let chunk = unsafe { list.take_fit(want) }.unwrap();
        assert_eq!(unsafe { (*chunk).len }, total);
        assert_eq!(list.totals(), (0, 0, 0));
    }

    #[test]
    fn take_fit_skips_small_chunks() {
        let mut mem = scratch(64);
        let base = mem.as_mut_ptr().cast::<u8>();
        let step = 8 * size_of::<usize>();
        let mut list = FreeList::new();
        unsafe {
            list.insert(base, step);
            list.insert(base.add(4 * step), 2 * step);
        }

        let chunk = unsafe { list.take_fit(step + size_of::<usize>()) }.unwrap();
        assert_eq!(chunk.cast::<u8>(), unsafe { base.add(4 * step) });
    }

    #[test]
    fn miss_returns_none_and_leaves_list_intact() {
        let mut mem = scratch(8);
        let base = mem.as_mut_ptr().cast::<u8>();
        let total = 8 * size_of::<usize>();
        let mut list = FreeList::new();
        unsafe { list.insert(base, total) };

        assert!(unsafe { list.take_fit(total + 8) }.is_none());
        assert_eq!(list.totals(), (total, total, 1));
    }
}
