//! Behavioral tests for the free-list heap, run over real page-aligned
//! arenas so the in-place headers and fill patterns are exercised for real.

use std::alloc::{Layout, alloc};
use std::ptr::NonNull;

use mm_heap::{GROWTH_SIZE, GrowSource, Heap};

const PAGE: usize = 4096;

/// Page-aligned scratch memory, leaked for the duration of the test run.
fn arena(bytes: usize) -> *mut u8 {
    let layout = Layout::from_size_align(bytes, PAGE).unwrap();
    let ptr = unsafe { alloc(layout) };
    assert!(!ptr.is_null());
    ptr
}

fn one_page_heap() -> Heap {
    let heap = Heap::new();
    unsafe { heap.add_block(arena(PAGE), PAGE) };
    heap
}

/// The largest request that still fits a one-page arena exactly.
fn exact_fit() -> usize {
    PAGE - Heap::alloc_overhead()
}

/// Growth backend over leaked host memory, with a page budget and a call
/// counter so tests can pin down how often growth was attempted.
struct PageSource {
    budget: usize,
    granted: usize,
    calls: usize,
}

impl PageSource {
    fn with_budget(pages: usize) -> Self {
        Self {
            budget: pages,
            granted: 0,
            calls: 0,
        }
    }
}

unsafe impl GrowSource for PageSource {
    fn grow_pages(&mut self, pages: usize) -> Option<NonNull<u8>> {
        self.calls += 1;
        if self.granted + pages > self.budget {
            return None;
        }
        self.granted += pages;
        NonNull::new(arena(pages * PAGE))
    }
}

#[test]
fn alloc_free_round_trip() {
    let heap = one_page_heap();

    let a = heap.alloc(8, 0).unwrap();
    let b = heap.alloc(32, 0).unwrap();
    let c = heap.alloc(7, 0).unwrap();
    assert_ne!(a, b);
    assert_ne!(b, c);

    unsafe {
        a.as_ptr().write_bytes(0xAA, 8);
        b.as_ptr().write_bytes(0xBB, 32);
        c.as_ptr().write_bytes(0xCC, 7);

        for i in 0..8 {
            assert_eq!(a.as_ptr().add(i).read(), 0xAA);
        }
        for i in 0..32 {
            assert_eq!(b.as_ptr().add(i).read(), 0xBB);
        }

        heap.free(b.as_ptr());
        heap.free(a.as_ptr());
        heap.free(c.as_ptr());
    }

    let stats = heap.stats();
    assert_eq!(stats.free, PAGE);
    assert_eq!(stats.max_chunk, PAGE);
    assert_eq!(stats.free_chunks, 1);
}

#[test]
fn zero_size_allocations_are_distinct_and_freeable() {
    let heap = one_page_heap();

    let a = heap.alloc(0, 0).unwrap();
    let b = heap.alloc(0, 0).unwrap();
    assert_ne!(a, b);

    unsafe {
        heap.free(a.as_ptr());
        heap.free(b.as_ptr());
    }
    assert_eq!(heap.stats().free, PAGE);
}

#[test]
fn free_null_is_a_noop() {
    let heap = one_page_heap();
    unsafe { heap.free(std::ptr::null_mut()) };
    assert_eq!(heap.stats().free, PAGE);
}

#[test]
fn non_power_of_two_alignment_is_rejected() {
    let heap = one_page_heap();
    assert!(heap.alloc(16, 3).is_none());
    assert!(heap.alloc(16, 24).is_none());
    assert!(heap.alloc(16, 100).is_none());
    // nothing was consumed
    assert_eq!(heap.stats().free, PAGE);
}

#[test]
fn alignment_is_honored_and_promoted() {
    let heap = Heap::new();
    unsafe { heap.add_block(arena(16 * PAGE), 16 * PAGE) };

    for align in [1usize, 2, 4, 8, 16, 64, 256, 1024] {
        let ptr = heap.alloc(24, align).unwrap();
        assert_eq!(
            ptr.as_ptr() as usize % align,
            0,
            "alignment {align} not honored"
        );
        // nonzero alignments are promoted to at least 16
        assert_eq!(ptr.as_ptr() as usize % 16, 0);
        unsafe { ptr.as_ptr().write_bytes(0x5A, 24) };
    }
}

#[test]
fn neighbors_survive_a_free_between_them() {
    let heap = one_page_heap();

    let a = heap.alloc(64, 0).unwrap();
    let b = heap.alloc(64, 0).unwrap();
    let c = heap.alloc(64, 0).unwrap();

    unsafe {
        a.as_ptr().write_bytes(0x11, 64);
        b.as_ptr().write_bytes(0x22, 64);
        c.as_ptr().write_bytes(0x33, 64);

        heap.free(b.as_ptr());

        // freeing (and the debug fill) must not leak into the neighbors
        for i in 0..64 {
            assert_eq!(a.as_ptr().add(i).read(), 0x11);
            assert_eq!(c.as_ptr().add(i).read(), 0x33);
        }

        // reusing the hole must not disturb them either
        let d = heap.alloc(64, 0).unwrap();
        d.as_ptr().write_bytes(0x44, 64);
        for i in 0..64 {
            assert_eq!(a.as_ptr().add(i).read(), 0x11);
            assert_eq!(c.as_ptr().add(i).read(), 0x33);
        }
    }
}

#[test]
fn frees_merge_with_both_neighbors() {
    let heap = one_page_heap();

    let ptrs: Vec<_> = (0..4).map(|_| heap.alloc(100, 0).unwrap()).collect();
    // four equal chunks sit back to back at the arena base; one tail chunk
    // holds the rest of the page
    let granted = PAGE - heap.stats().free;
    let each = granted / 4;

    unsafe { heap.free(ptrs[0].as_ptr()) };
    assert_eq!(heap.stats().free_chunks, 2); // the hole + the tail

    unsafe { heap.free(ptrs[2].as_ptr()) };
    assert_eq!(heap.stats().free_chunks, 3);

    // freeing the block between two holes collapses all three
    unsafe { heap.free(ptrs[1].as_ptr()) };
    let stats = heap.stats();
    assert_eq!(stats.free_chunks, 2);
    assert_eq!(stats.free, PAGE - each);

    unsafe { heap.free(ptrs[3].as_ptr()) };
    let stats = heap.stats();
    assert_eq!(stats.free_chunks, 1);
    assert_eq!(stats.max_chunk, PAGE);
}

#[test]
fn stats_are_stable_across_an_alloc_free_cycle() {
    let heap = one_page_heap();
    let before = heap.stats();

    let ptrs: Vec<_> = [120usize, 8, 333, 64]
        .iter()
        .map(|&n| heap.alloc(n, 0).unwrap())
        .collect();
    for p in ptrs {
        unsafe { heap.free(p.as_ptr()) };
    }

    let after = heap.stats();
    assert_eq!(before.free, after.free);
    assert_eq!(before.max_chunk, after.max_chunk);
    assert_eq!(before.free_chunks, after.free_chunks);
    assert_eq!(before.base, after.base);
    assert_eq!(before.len, after.len);
}

#[test]
fn exact_fit_consumes_the_whole_page() {
    let heap = one_page_heap();

    let p = heap.alloc(exact_fit(), 0).unwrap();
    assert_eq!(heap.stats().free, 0);
    assert!(heap.alloc(1, 0).is_none());

    unsafe { heap.free(p.as_ptr()) };
    assert_eq!(heap.stats().free, PAGE);

    // and the page is immediately reusable at full size
    let q = heap.alloc(exact_fit(), 0).unwrap();
    unsafe { heap.free(q.as_ptr()) };
}

#[test]
fn add_block_recovers_an_exhausted_heap() {
    let heap = one_page_heap();

    let held = heap.alloc(exact_fit(), 0).unwrap();
    assert!(heap.alloc(8, 0).is_none());

    unsafe { heap.add_block(arena(PAGE), PAGE) };
    let p = heap.alloc(exact_fit(), 0).unwrap();

    let stats = heap.stats();
    assert!(stats.len >= 2 * PAGE);
    assert_eq!(stats.free, 0);

    unsafe {
        heap.free(held.as_ptr());
        heap.free(p.as_ptr());
    }
    assert_eq!(heap.stats().free, 2 * PAGE);
}

#[test]
fn init_with_pulls_one_growth_increment() {
    let heap = Heap::new();
    let mut source = PageSource::with_budget(2 * GROWTH_SIZE / PAGE);

    assert!(heap.init_with(&mut source));
    assert_eq!(source.calls, 1);
    assert_eq!(source.granted, GROWTH_SIZE / PAGE);

    let stats = heap.stats();
    assert_eq!(stats.free, GROWTH_SIZE);
    assert_eq!(stats.low_watermark, GROWTH_SIZE);
}

#[test]
fn alloc_with_grows_once_on_a_miss() {
    let heap = Heap::new();
    let mut source = PageSource::with_budget(2 * GROWTH_SIZE / PAGE);

    // empty heap: the first allocation triggers exactly one growth
    let p = heap.alloc_with(100, 0, &mut source).unwrap();
    assert_eq!(source.calls, 1);

    // plenty is free now, no further growth
    let q = heap.alloc_with(100, 0, &mut source).unwrap();
    assert_eq!(source.calls, 1);

    unsafe {
        heap.free(p.as_ptr());
        heap.free(q.as_ptr());
    }
}

#[test]
fn oversized_requests_grow_by_the_request() {
    let heap = Heap::new();
    let mut source = PageSource::with_budget(4 * GROWTH_SIZE / PAGE);

    let want = 2 * GROWTH_SIZE;
    let p = heap.alloc_with(want, 0, &mut source).unwrap();
    assert!(source.granted >= want / PAGE);
    unsafe { heap.free(p.as_ptr()) };
}

#[test]
fn a_second_miss_is_a_real_oom() {
    let heap = Heap::new();
    let mut source = PageSource::with_budget(0);

    assert!(heap.alloc_with(100, 0, &mut source).is_none());
    // one growth attempt, no retry loop
    assert_eq!(source.calls, 1);
}

#[test]
fn delayed_free_is_reclaimed_by_the_next_alloc() {
    let heap = one_page_heap();

    let p = heap.alloc(exact_fit(), 0).unwrap();
    assert!(heap.alloc(8, 0).is_none());

    unsafe { heap.delayed_free(p.as_ptr()) };

    // the queued chunk is folded in at the start of this call
    let q = heap.alloc(exact_fit(), 0).unwrap();
    unsafe { heap.free(q.as_ptr()) };
}

#[test]
fn delayed_frees_merge_like_direct_ones() {
    let heap = one_page_heap();

    let a = heap.alloc(64, 0).unwrap();
    let b = heap.alloc(64, 0).unwrap();
    unsafe {
        heap.delayed_free(a.as_ptr());
        heap.delayed_free(b.as_ptr());
    }

    let stats = heap.stats();
    assert_eq!(stats.free, PAGE);
    assert_eq!(stats.free_chunks, 1);
}

#[test]
fn low_watermark_never_recovers() {
    let heap = one_page_heap();
    assert_eq!(heap.stats().low_watermark, PAGE);

    let p = heap.alloc(exact_fit(), 0).unwrap();
    assert_eq!(heap.stats().low_watermark, 0);

    unsafe { heap.free(p.as_ptr()) };
    let stats = heap.stats();
    assert_eq!(stats.free, PAGE);
    assert_eq!(stats.low_watermark, 0);
}

#[test]
fn churn_with_mixed_sizes_and_alignments() {
    let heap = Heap::new();
    unsafe { heap.add_block(arena(16 * PAGE), 16 * PAGE) };

    // deterministic splitmix-style stream
    let mut state = 0x9E37_79B9_7F4A_7C15u64;
    let mut next = move || {
        state = state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        state >> 33
    };

    let mut slots: [Option<NonNull<u8>>; 16] = [None; 16];
    for _ in 0..2000 {
        let index = (next() % 16) as usize;
        if let Some(p) = slots[index].take() {
            unsafe { heap.free(p.as_ptr()) };
        }
        let size = (next() % 600) as usize;
        let align = 1usize << (next() % 7);
        if let Some(p) = heap.alloc(size, align) {
            assert_eq!(p.as_ptr() as usize % align, 0);
            unsafe { p.as_ptr().write_bytes(0xA5, size) };
            slots[index] = Some(p);
        }
    }

    for slot in slots.iter_mut() {
        if let Some(p) = slot.take() {
            unsafe { heap.free(p.as_ptr()) };
        }
    }

    let stats = heap.stats();
    assert_eq!(stats.free, 16 * PAGE);
    assert_eq!(stats.free_chunks, 1);
}
