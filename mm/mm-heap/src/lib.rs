//! # Byte-Granularity Kernel Heap
//!
//! A first-fit free-list heap in the classic embedded style: free memory is
//! described by headers written *into* the free memory itself, every
//! allocation carries a hidden bookkeeping header in front of the returned
//! pointer, and freed ranges merge eagerly with their address neighbors so
//! the list never holds two adjacent chunks.
//!
//! ```text
//!            free chunk                        live allocation
//! +-----------+--------------------+   +--------+-------------+---------+
//! | FreeChunk |   unused bytes     |   | header |  user bytes | (guard) |
//! | len, next |                    |   |        |             |  debug  |
//! +-----------+--------------------+   +--------+-------------+---------+
//! ^ chunk base, len spans it all       ^ chunk base            ^ scanned
//!                                               ^ user pointer   on free
//! ```
//!
//! Two lock domains: the free list and counters sit behind a blocking
//! [`mm_sync::SpinMutex`], while [`Heap::delayed_free`] pushes onto a
//! separate non-blocking side list so interrupt-context callers never take
//! the heap lock. The side list is folded back in at the start of the next
//! `alloc` or `stats` call.
//!
//! Growth is pluggable through [`GrowSource`]; the heap itself never talks
//! to a page allocator directly.

#![cfg_attr(not(any(test, doctest)), no_std)]

mod chunk;
mod heap;

pub use heap::{
    ALLOC_FILL, FREE_FILL, GROWTH_SIZE, GrowSource, Heap, HeapStats, MIN_ALIGN, PADDING_FILL,
    PADDING_SIZE,
};
