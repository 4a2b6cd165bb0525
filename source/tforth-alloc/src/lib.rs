#![cfg_attr(not(any(test, feature = "use-std")), no_std)]

extern crate alloc;

pub mod heap;

pub use heap::{AllocError, FreeError, FreeListHeap};

#[cfg(feature = "stats")]
pub use heap::stats::HeapStats;
