use crate::chunk::{FreeChunk, FreeList};
use core::ptr::{self, NonNull, null_mut};
use log::{debug, trace, warn};
use mm_sync::{SpinLock, SpinMutex};

const PAGE: usize = mm_addresses::PAGE_SIZE as usize;

/// How much backing memory is requested from the [`GrowSource`] at a time.
pub const GROWTH_SIZE: usize = 4 * 1024 * 1024;

/// Any nonzero alignment request is promoted to at least this.
pub const MIN_ALIGN: usize = 16;

/// Freshly granted allocations are filled with this in debug builds.
pub const ALLOC_FILL: u8 = 0x99;
/// Freed memory is filled with this in debug builds.
pub const FREE_FILL: u8 = 0x77;
/// Debug builds place a guard band of this pattern after the user bytes.
pub const PADDING_FILL: u8 = 0x55;
/// Guard band length added to every allocation in debug builds.
pub const PADDING_SIZE: usize = 64;

const HEAP_MAGIC: usize = 0x4845_4150; // "HEAP"

/// Hidden bookkeeping placed immediately before every returned pointer.
///
/// `chunk` and `size` recover the full granted range on free, no matter how
/// far alignment pushed the user pointer into the chunk.
#[repr(C)]
struct AllocHeader {
    magic: usize,
    chunk: *mut u8,
    size: usize,
    #[cfg(debug_assertions)]
    padding_start: *mut u8,
    #[cfg(debug_assertions)]
    padding_size: usize,
}

/// Page-granularity backing memory for heap growth.
///
/// # Safety
/// `grow_pages(n)` must either return `None` or a range that is valid,
/// writable, exclusive to the caller for the heap's lifetime, aligned to the
/// page size, and exactly `n` pages long.
pub unsafe trait GrowSource {
    fn grow_pages(&mut self, pages: usize) -> Option<NonNull<u8>>;
}

/// Point-in-time heap counters, see [`Heap::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
    /// Lowest address ever donated to the heap.
    pub base: usize,
    /// Span from `base` to the highest donated address (donated ranges need
    /// not be contiguous, so this can exceed the donated total).
    pub len: usize,
    /// Total free bytes across all chunks.
    pub free: usize,
    /// Largest single free chunk (upper bound on a satisfiable request).
    pub max_chunk: usize,
    /// Smallest value `free` has ever had.
    pub low_watermark: usize,
    /// Number of chunks on the free list.
    pub free_chunks: usize,
}

struct HeapInner {
    base: usize,
    len: usize,
    remaining: usize,
    low_watermark: usize,
    free: FreeList,
}

impl HeapInner {
    const fn new() -> Self {
        Self {
            base: 0,
            len: 0,
            remaining: 0,
            low_watermark: usize::MAX,
            free: FreeList::new(),
        }
    }

    /// Return `[addr, addr + len)` to the free list, merging as usual.
    ///
    /// # Safety
    /// Same range contract as [`FreeList::insert`].
    unsafe fn release(&mut self, addr: *mut u8, len: usize, fill: bool) {
        #[cfg(debug_assertions)]
        if fill {
            unsafe { ptr::write_bytes(addr, FREE_FILL, len) };
        }
        #[cfg(not(debug_assertions))]
        let _ = fill;
        self.remaining += len;
        unsafe { self.free.insert(addr, len) };
    }

    /// Take in a brand-new range and widen the recorded heap bounds.
    ///
    /// # Safety
    /// Same range contract as [`FreeList::insert`].
    unsafe fn add_range(&mut self, addr: *mut u8, len: usize, fill: bool) {
        let start = addr as usize;
        if self.len == 0 {
            self.base = start;
            self.len = len;
        } else {
            let end = (self.base + self.len).max(start + len);
            self.base = self.base.min(start);
            self.len = end - self.base;
        }
        unsafe { self.release(addr, len, fill) };
    }
}

/// Delayed-free side list: a bare intrusive stack of dead chunks.
struct DelayedHead(*mut FreeChunk);

// Safety: the head pointer is only dereferenced by the draining side, under
// the heap lock, after being detached under the spinlock.
unsafe impl Send for DelayedHead {}

/// First-fit free-list heap with hidden per-allocation headers.
///
/// A fresh heap owns no memory; feed it with [`add_block`](Self::add_block)
/// or [`init_with`](Self::init_with) before allocating.
pub struct Heap {
    inner: SpinMutex<HeapInner>,
    delayed: SpinLock<DelayedHead>,
}

impl Heap {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            inner: SpinMutex::new(HeapInner::new()),
            delayed: SpinLock::new(DelayedHead(null_mut())),
        }
    }

    /// Fixed per-allocation overhead: the hidden header, plus the guard band
    /// in debug builds. An allocation of `n` bytes with zero alignment
    /// consumes exactly `n + alloc_overhead()` free bytes when `n` is a
    /// pointer-size multiple past the minimum chunk size.
    #[must_use]
    pub const fn alloc_overhead() -> usize {
        if cfg!(debug_assertions) {
            size_of::<AllocHeader>() + PADDING_SIZE
        } else {
            size_of::<AllocHeader>()
        }
    }

    /// Allocate the initial arena (one growth increment) from `source`.
    pub fn init_with(&self, source: &mut impl GrowSource) -> bool {
        self.grow(GROWTH_SIZE, source)
    }

    /// Donate `[ptr, ptr + len)` to the heap (boot-time arenas and the
    /// like). Safe to call at any point, including after exhaustion.
    ///
    /// # Safety
    /// The range must be valid, writable, exclusive to this heap for its
    /// lifetime, pointer-aligned, with `len` a pointer-size multiple of at
    /// least `size_of::<FreeChunk>()` (one pointer pair).
    pub unsafe fn add_block(&self, ptr: *mut u8, len: usize) {
        debug!("heap: adding {len:#x} byte block at {ptr:p}");
        let mut inner = self.inner.lock();
        unsafe { inner.add_range(ptr, len, false) };
    }

    /// Allocate `size` bytes aligned to `align` (0 means "don't care").
    ///
    /// Returns `None` when `align` is not a power of two or no chunk fits.
    /// A zero `size` still returns a distinct, freeable pointer.
    pub fn alloc(&self, size: usize, align: usize) -> Option<NonNull<u8>> {
        self.drain_delayed();
        let (request, align) = inflate(size, align)?;
        self.alloc_locked(size, request, align)
    }

    /// Like [`alloc`](Self::alloc), but on a miss grows the heap by
    /// `max(GROWTH_SIZE, request)` pages from `source` and retries exactly
    /// once. A second miss is a genuine out-of-memory.
    pub fn alloc_with(
        &self,
        size: usize,
        align: usize,
        source: &mut impl GrowSource,
    ) -> Option<NonNull<u8>> {
        self.drain_delayed();
        let (request, align) = inflate(size, align)?;
        if let Some(ptr) = self.alloc_locked(size, request, align) {
            return Some(ptr);
        }
        if !self.grow(GROWTH_SIZE.max(request), source) {
            return None;
        }
        self.alloc_locked(size, request, align)
    }

    /// Return an allocation to the heap. Null is a no-op.
    ///
    /// Debug builds validate the header magic and scan the guard band; a
    /// scribbled band is fatal.
    ///
    /// # Safety
    /// `ptr` must be null or a live pointer from this heap's
    /// [`alloc`](Self::alloc)/[`alloc_with`](Self::alloc_with).
    pub unsafe fn free(&self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        let header = unsafe { read_header(ptr) };
        #[cfg(debug_assertions)]
        unsafe {
            scan_padding(ptr, &header)
        };
        trace!("heap: free {ptr:p}, chunk {:p} len {:#x}", header.chunk, header.size);
        let mut inner = self.inner.lock();
        unsafe { inner.release(header.chunk, header.size, true) };
    }

    /// Queue an allocation for reclamation without taking the heap lock
    /// (the interrupt-context producer side). The chunk rejoins the free
    /// list at the start of the next `alloc`, `alloc_with`, or `stats`.
    ///
    /// # Safety
    /// `ptr` must be a live pointer from this heap, and not null.
    pub unsafe fn delayed_free(&self, ptr: *mut u8) {
        let header = unsafe { read_header(ptr) };
        let chunk = header.chunk.cast::<FreeChunk>();
        let mut delayed = self.delayed.lock();
        unsafe {
            ptr::write(
                chunk,
                FreeChunk {
                    len: header.size,
                    next: delayed.0,
                },
            );
        }
        delayed.0 = chunk;
    }

    /// Snapshot the heap counters, draining the delayed-free list first so
    /// the numbers reflect everything already returned.
    pub fn stats(&self) -> HeapStats {
        self.drain_delayed();
        let inner = self.inner.lock();
        let (free, max_chunk, free_chunks) = inner.free.totals();
        debug_assert_eq!(free, inner.remaining);
        HeapStats {
            base: inner.base,
            len: inner.len,
            free,
            max_chunk,
            low_watermark: inner.low_watermark.min(inner.remaining),
            free_chunks,
        }
    }

    /// Detach the delayed-free stack and fold every chunk back in.
    fn drain_delayed(&self) {
        let mut head = {
            let mut delayed = self.delayed.lock();
            core::mem::replace(&mut delayed.0, null_mut())
        };
        if head.is_null() {
            return;
        }
        let mut inner = self.inner.lock();
        while !head.is_null() {
            // read the node out before the fill pattern lands on it
            let next = unsafe { (*head).next };
            let len = unsafe { (*head).len };
            trace!("heap: draining delayed chunk {head:p} len {len:#x}");
            unsafe { inner.release(head.cast(), len, true) };
            head = next;
        }
    }

    fn grow(&self, size: usize, source: &mut impl GrowSource) -> bool {
        let pages = size.div_ceil(PAGE);
        let Some(ptr) = source.grow_pages(pages) else {
            warn!("heap: failed to grow by {pages} pages");
            return false;
        };
        let len = pages * PAGE;
        debug!("heap: grew by {len:#x} bytes at {:p}", ptr.as_ptr());
        let mut inner = self.inner.lock();
        unsafe { inner.add_range(ptr.as_ptr(), len, true) };
        true
    }

    fn alloc_locked(&self, user_size: usize, request: usize, align: usize) -> Option<NonNull<u8>> {
        let mut inner = self.inner.lock();
        let chunk = unsafe { inner.free.take_fit(request) }?;
        // the grant is the whole chunk, not just what was asked for
        let granted = unsafe { (*chunk).len };
        let base = chunk.cast::<u8>();

        #[cfg(debug_assertions)]
        unsafe {
            ptr::write_bytes(base, ALLOC_FILL, granted)
        };

        let mut user = unsafe { base.add(size_of::<AllocHeader>()) };
        if align > 0 {
            user = (user as usize).next_multiple_of(align) as *mut u8;
        }

        #[cfg(debug_assertions)]
        let (padding_start, padding_size) = unsafe {
            let start = user.add(user_size);
            let len = granted - (user as usize - base as usize) - user_size;
            ptr::write_bytes(start, PADDING_FILL, len);
            (start, len)
        };
        #[cfg(not(debug_assertions))]
        let _ = user_size;

        unsafe {
            ptr::write(
                user.cast::<AllocHeader>().sub(1),
                AllocHeader {
                    magic: HEAP_MAGIC,
                    chunk: base,
                    size: granted,
                    #[cfg(debug_assertions)]
                    padding_start,
                    #[cfg(debug_assertions)]
                    padding_size,
                },
            );
        }

        inner.remaining -= granted;
        if inner.remaining < inner.low_watermark {
            inner.low_watermark = inner.remaining;
        }
        trace!("heap: granted {granted:#x} bytes, user ptr {user:p}");
        NonNull::new(user)
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

/// Grow a request to the chunk size actually carved from the free list, and
/// promote the alignment. `None` when the alignment is not a power of two or
/// the arithmetic overflows.
fn inflate(size: usize, align: usize) -> Option<(usize, usize)> {
    if align != 0 && !align.is_power_of_two() {
        return None;
    }
    let mut size = size.checked_add(size_of::<AllocHeader>())?;
    #[cfg(debug_assertions)]
    {
        size = size.checked_add(PADDING_SIZE)?;
    }
    // the freed chunk must be able to hold its own header again
    if size < size_of::<FreeChunk>() {
        size = size_of::<FreeChunk>();
    }
    size = size.checked_next_multiple_of(size_of::<usize>())?;
    if align == 0 {
        return Some((size, 0));
    }
    let align = align.max(MIN_ALIGN);
    // worst-case slack so the aligned pointer still fits
    Some((size.checked_add(align)?, align))
}

/// # Safety
/// `ptr` must carry a live allocation header immediately before it.
unsafe fn read_header(ptr: *mut u8) -> AllocHeader {
    let header = unsafe { ptr.cast::<AllocHeader>().sub(1).read() };
    debug_assert_eq!(header.magic, HEAP_MAGIC, "heap metadata corrupted at {ptr:p}");
    header
}

#[cfg(debug_assertions)]
unsafe fn scan_padding(ptr: *mut u8, header: &AllocHeader) {
    for i in 0..header.padding_size {
        let byte = unsafe { header.padding_start.add(i).read() };
        assert!(
            byte == PADDING_FILL,
            "free at {ptr:p}: scribbled past the end, offset {i} in the guard band"
        );
    }
}
