//! The allocate/free capability behind `ALLOCATE`, `FREE` and `RESIZE`.
//!
//! Heap blocks are addressed by offsets into a heap-private address space,
//! which the memory map places in its own region.

use alloc::{
    collections::{BTreeMap, BTreeSet},
    vec,
    vec::Vec,
};

pub use tforth_alloc::FreeError;
use tforth_alloc::FreeListHeap;

/// Which heap implementation a VM is created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum HeapKind {
    /// One fixed pool carved up by a [`PoolHeap`].
    #[default]
    FreeList,
    /// One allocation from the global allocator per block.
    System,
}

pub trait Heap {
    /// Returns the offset of a new block of at least `size` bytes.
    fn allocate(&mut self, size: usize) -> Option<usize>;
    fn free(&mut self, offset: usize) -> Result<(), FreeError>;
    /// Usable size of the block at `offset`.
    fn size_of(&self, offset: usize) -> Option<usize>;
    /// `len` bytes at `offset`, only if they lie inside one live block.
    fn bytes(&self, offset: usize, len: usize) -> Option<&[u8]>;
    fn bytes_mut(&mut self, offset: usize, len: usize) -> Option<&mut [u8]>;
}

/// A [`FreeListHeap`] plus the set of live blocks, so that stores through
/// the memory map land in user bytes and never in the allocator's own
/// headers and links.
pub struct PoolHeap {
    pool: FreeListHeap,
    live: BTreeSet<usize>,
}

impl PoolHeap {
    pub fn new(size: usize) -> Self {
        Self {
            pool: FreeListHeap::new(size),
            live: BTreeSet::new(),
        }
    }

    /// The live block holding `offset` and the position of `offset` in it.
    fn containing(&self, offset: usize) -> Option<(usize, usize)> {
        let start = *self.live.range(..=offset).next_back()?;
        Some((start, offset - start))
    }
}

impl Heap for PoolHeap {
    fn allocate(&mut self, size: usize) -> Option<usize> {
        match self.pool.allocate(size) {
            Ok(offset) => {
                self.live.insert(offset);
                Some(offset)
            }
            Err(error) => {
                tracing::debug!(size, ?error, "heap allocation failed");
                None
            }
        }
    }

    fn free(&mut self, offset: usize) -> Result<(), FreeError> {
        if !self.live.contains(&offset) {
            return match self.pool.size_of(offset) {
                Err(FreeError::OutOfPool) => Err(FreeError::OutOfPool),
                _ => Err(FreeError::BadTag),
            };
        }
        self.pool.free(offset)?;
        self.live.remove(&offset);
        Ok(())
    }

    fn size_of(&self, offset: usize) -> Option<usize> {
        if !self.live.contains(&offset) {
            return None;
        }
        self.pool.size_of(offset).ok()
    }

    fn bytes(&self, offset: usize, len: usize) -> Option<&[u8]> {
        let (start, rel) = self.containing(offset)?;
        self.pool.block(start).ok()?.get(rel..rel.checked_add(len)?)
    }

    fn bytes_mut(&mut self, offset: usize, len: usize) -> Option<&mut [u8]> {
        let (start, rel) = self.containing(offset)?;
        self.pool
            .block_mut(start)
            .ok()?
            .get_mut(rel..rel.checked_add(len)?)
    }
}

/// Blocks are separate allocations, laid out in the heap address space
/// with a gap between them so that running off the end of one block never
/// lands in the next. A new block goes in the first gap that fits, so
/// freed space is reused.
pub struct SystemHeap {
    blocks: BTreeMap<usize, Vec<u8>>,
    limit: usize,
}

const SYSTEM_GAP: usize = 16;

/// End of a block of `size` bytes at `at`, plus its trailing gap, rounded
/// up to the gap size.
fn span_end(at: usize, size: usize) -> Option<usize> {
    let end = at.checked_add(size)?.checked_add(2 * SYSTEM_GAP - 1)?;
    Some(end & !(SYSTEM_GAP - 1))
}

impl SystemHeap {
    pub fn new(limit: usize) -> Self {
        Self {
            blocks: BTreeMap::new(),
            limit,
        }
    }

    fn block_for(&self, offset: usize) -> Option<(usize, &Vec<u8>)> {
        let (start, block) = self.blocks.range(..=offset).next_back()?;
        (offset <= start + block.len()).then_some((*start, block))
    }

    /// First offset where `size` bytes and their gap fit between blocks.
    fn first_fit(&self, size: usize) -> Option<usize> {
        let mut at = SYSTEM_GAP;
        for (start, block) in &self.blocks {
            if span_end(at, size)? <= *start {
                return Some(at);
            }
            at = span_end(*start, block.len())?;
        }
        (span_end(at, size)? <= self.limit).then_some(at)
    }
}

impl Heap for SystemHeap {
    fn allocate(&mut self, size: usize) -> Option<usize> {
        let at = self.first_fit(size)?;
        self.blocks.insert(at, vec![0; size]);
        Some(at)
    }

    fn free(&mut self, offset: usize) -> Result<(), FreeError> {
        match self.blocks.remove(&offset) {
            Some(_) => Ok(()),
            None if offset >= self.limit => Err(FreeError::OutOfPool),
            None => Err(FreeError::BadTag),
        }
    }

    fn size_of(&self, offset: usize) -> Option<usize> {
        self.blocks.get(&offset).map(Vec::len)
    }

    fn bytes(&self, offset: usize, len: usize) -> Option<&[u8]> {
        let (start, block) = self.block_for(offset)?;
        let rel = offset - start;
        block.get(rel..rel.checked_add(len)?)
    }

    fn bytes_mut(&mut self, offset: usize, len: usize) -> Option<&mut [u8]> {
        let start = self.block_for(offset)?.0;
        let rel = offset - start;
        self.blocks
            .get_mut(&start)?
            .get_mut(rel..rel.checked_add(len)?)
    }
}
