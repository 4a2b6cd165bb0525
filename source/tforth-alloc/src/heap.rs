use alloc::{boxed::Box, vec};

/// Every block is a multiple of this many bytes.
pub const BLOCK_SIZE: usize = 16;

/// Bytes in front of every user offset: the block size followed by the
/// validation tag.
pub const HEADER_SIZE: usize = 8;

/// XORed with the user offset to form a live block's validation tag.
pub const VALIDATOR: u32 = 0xA81B_4D69;

const NIL: u32 = u32::MAX;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum AllocError {
    /// No free block is large enough for the request.
    OutOfMemory,
    /// The request does not fit in a 32-bit block size.
    TooLarge,
    /// A free-list link or block size points outside the pool.
    Corrupt,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum FreeError {
    /// The offset is not inside the pool.
    OutOfPool,
    /// The offset can not be the start of a user region.
    Misaligned,
    /// The validation tag does not match: a double free or a stray offset.
    BadTag,
    /// A free-list link or block size points outside the pool.
    Corrupt,
}

/// A header or link that does not describe a block inside the pool.
#[derive(Debug)]
struct Corrupt;

impl From<Corrupt> for AllocError {
    fn from(_: Corrupt) -> Self {
        AllocError::Corrupt
    }
}

impl From<Corrupt> for FreeError {
    fn from(_: Corrupt) -> Self {
        FreeError::Corrupt
    }
}

/// A free-list allocator over a single fixed pool.
///
/// All addresses handed out are byte offsets into the pool. A live block
/// looks like `[size: u32][tag: u32][user bytes...]`, and a free block like
/// `[size: u32][next: u32]...`, with `next` holding the offset of the next
/// free block in ascending address order.
///
/// Only the user bytes of live blocks are reachable from outside, through
/// [`block`](Self::block) and [`block_mut`](Self::block_mut). Every header
/// read is still bounds checked, so a damaged list shows up as
/// [`AllocError::Corrupt`] or [`FreeError::Corrupt`].
pub struct FreeListHeap {
    pool: Box<[u8]>,
    free_head: u32,
    #[cfg(feature = "stats")]
    stats: stats::HeapStats,
}

impl FreeListHeap {
    /// Create a heap over a zeroed pool of (at most) `size` bytes.
    ///
    /// The pool is trimmed to a whole number of blocks.
    pub fn new(size: usize) -> Self {
        let size = (size.min(u32::MAX as usize - BLOCK_SIZE) / BLOCK_SIZE) * BLOCK_SIZE;
        let mut pool = vec![0u8; size].into_boxed_slice();
        let mut free_head = NIL;
        if size >= BLOCK_SIZE {
            pool[0..4].copy_from_slice(&(size as u32).to_ne_bytes());
            pool[4..8].copy_from_slice(&NIL.to_ne_bytes());
            free_head = 0;
        }
        Self {
            pool,
            free_head,
            #[cfg(feature = "stats")]
            stats: stats::HeapStats::new(),
        }
    }

    /// Total pool size in bytes.
    #[inline]
    pub fn pool_size(&self) -> usize {
        self.pool.len()
    }

    /// The user bytes of the live block at `user`.
    pub fn block(&self, user: usize) -> Result<&[u8], FreeError> {
        let block = self.validate(user)?;
        let end = block + self.block_size(block)? as usize;
        Ok(&self.pool[user..end])
    }

    pub fn block_mut(&mut self, user: usize) -> Result<&mut [u8], FreeError> {
        let block = self.validate(user)?;
        let end = block + self.block_size(block)? as usize;
        Ok(&mut self.pool[user..end])
    }

    #[cfg(feature = "stats")]
    pub fn stats(&self) -> &stats::HeapStats {
        &self.stats
    }

    /// Allocate `size` bytes, returning the user offset.
    ///
    /// A zero-sized request still receives a block.
    pub fn allocate(&mut self, size: usize) -> Result<usize, AllocError> {
        let need = size
            .max(1)
            .checked_add(HEADER_SIZE + BLOCK_SIZE - 1)
            .ok_or(AllocError::TooLarge)?
            / BLOCK_SIZE
            * BLOCK_SIZE;
        let need = u32::try_from(need).map_err(|_| AllocError::TooLarge)?;

        // Best fit: the smallest block that satisfies the request. Ties keep
        // the lower address, since the list is ascending.
        let mut best: Option<(u32, u32, u32, u32)> = None; // (prev, block, size, next)
        let mut prev = NIL;
        let mut cur = self.free_head;
        while cur != NIL {
            let (cur_size, next) = self.free_block(cur)?;
            if cur_size >= need && best.map_or(true, |(_, _, sz, _)| cur_size < sz) {
                best = Some((prev, cur, cur_size, next));
                if cur_size == need {
                    break;
                }
            }
            prev = cur;
            cur = next;
        }

        let (prev, block, block_size, next) = best.ok_or(AllocError::OutOfMemory)?;

        let taken = if block_size - need >= BLOCK_SIZE as u32 {
            let rest = block + need;
            self.write_u32(rest as usize, block_size - need)?;
            self.write_u32(rest as usize + 4, next)?;
            self.set_next(prev, rest)?;
            need
        } else {
            self.set_next(prev, next)?;
            block_size
        };

        let user = block as usize + HEADER_SIZE;
        self.write_u32(block as usize, taken)?;
        self.write_u32(block as usize + 4, user as u32 ^ VALIDATOR)?;

        #[cfg(feature = "stats")]
        self.stats.allocated(taken as usize);

        Ok(user)
    }

    /// Release the block at user offset `user`.
    pub fn free(&mut self, user: usize) -> Result<(), FreeError> {
        let block = self.validate(user)?;
        let mut size = self.block_size(block)?;

        // Find the neighbours in address order.
        let mut prev = NIL;
        let mut prev_size = 0;
        let mut next = self.free_head;
        while next != NIL && (next as usize) < block {
            let (next_size, after) = self.free_block(next)?;
            prev = next;
            prev_size = next_size;
            next = after;
        }
        if prev != NIL && prev as usize + prev_size as usize > block {
            return Err(FreeError::Corrupt);
        }

        #[cfg(feature = "stats")]
        let freed = size as usize;

        // Splice in, then merge with the following block if it touches.
        if next != NIL && block + size as usize == next as usize {
            let (next_size, after) = self.free_block(next)?;
            size += next_size;
            self.write_u32(block + 4, after)?;
        } else {
            self.write_u32(block + 4, next)?;
        }
        self.write_u32(block, size)?;

        // And with the preceding block.
        if prev != NIL && prev as usize + prev_size as usize == block {
            let after = self.read_u32(block + 4)?;
            self.write_u32(prev as usize, prev_size + size)?;
            self.write_u32(prev as usize + 4, after)?;
        } else {
            self.set_next(prev, block as u32)?;
        }

        #[cfg(feature = "stats")]
        self.stats.freed(freed);

        Ok(())
    }

    /// Number of usable bytes in the live block at `user`.
    pub fn size_of(&self, user: usize) -> Result<usize, FreeError> {
        let block = self.validate(user)?;
        Ok(self.block_size(block)? as usize - HEADER_SIZE)
    }

    /// Sum of all free block sizes, headers included.
    pub fn free_bytes(&self) -> usize {
        self.free_blocks().map(|(_, size)| size).sum()
    }

    /// The largest single allocation that would currently succeed.
    pub fn largest_free(&self) -> usize {
        self.free_blocks()
            .map(|(_, size)| size - HEADER_SIZE)
            .max()
            .unwrap_or(0)
    }

    /// Iterate the free list as `(offset, size)` pairs in address order.
    ///
    /// Iteration stops early at a damaged link.
    pub fn free_blocks(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        let mut cur = self.free_head;
        core::iter::from_fn(move || {
            if cur == NIL {
                return None;
            }
            let at = cur as usize;
            let (size, next) = self.free_block(cur).ok()?;
            cur = next;
            Some((at, size as usize))
        })
    }

    fn validate(&self, user: usize) -> Result<usize, FreeError> {
        if user < HEADER_SIZE || user >= self.pool.len() {
            return Err(FreeError::OutOfPool);
        }
        let block = user - HEADER_SIZE;
        if block % BLOCK_SIZE != 0 {
            return Err(FreeError::Misaligned);
        }
        if self.read_u32(block + 4)? != (user as u32 ^ VALIDATOR) {
            tracing::warn!(user, "heap block failed validation");
            return Err(FreeError::BadTag);
        }
        Ok(block)
    }

    /// The size header of the block at `block`, checked against the pool.
    fn block_size(&self, block: usize) -> Result<u32, Corrupt> {
        let size = self.read_u32(block)?;
        let fits = (size as usize)
            .checked_add(block)
            .map_or(false, |end| end <= self.pool.len());
        if (size as usize) < BLOCK_SIZE || size as usize % BLOCK_SIZE != 0 || !fits {
            tracing::warn!(block, size, "heap block header is damaged");
            return Err(Corrupt);
        }
        Ok(size)
    }

    /// Size and link of the free block at `at`. A link points past the end
    /// of the block it leaves and stays inside the pool.
    fn free_block(&self, at: u32) -> Result<(u32, u32), Corrupt> {
        let at = at as usize;
        if at % BLOCK_SIZE != 0 {
            return Err(Corrupt);
        }
        let size = self.block_size(at)?;
        let next = self.read_u32(at + 4)?;
        let in_order = (at + size as usize..self.pool.len()).contains(&(next as usize));
        if next != NIL && !in_order {
            tracing::warn!(block = at, next, "heap free list is damaged");
            return Err(Corrupt);
        }
        Ok((size, next))
    }

    fn set_next(&mut self, prev: u32, next: u32) -> Result<(), Corrupt> {
        if prev == NIL {
            self.free_head = next;
            Ok(())
        } else {
            self.write_u32(prev as usize + 4, next)
        }
    }

    #[inline]
    fn read_u32(&self, at: usize) -> Result<u32, Corrupt> {
        let bytes = self.pool.get(at..at.checked_add(4).ok_or(Corrupt)?).ok_or(Corrupt)?;
        let mut b = [0u8; 4];
        b.copy_from_slice(bytes);
        Ok(u32::from_ne_bytes(b))
    }

    #[inline]
    fn write_u32(&mut self, at: usize, val: u32) -> Result<(), Corrupt> {
        let end = at.checked_add(4).ok_or(Corrupt)?;
        self.pool
            .get_mut(at..end)
            .ok_or(Corrupt)?
            .copy_from_slice(&val.to_ne_bytes());
        Ok(())
    }
}

#[cfg(feature = "stats")]
pub mod stats {
    use portable_atomic::{AtomicUsize, Ordering};

    /// Running totals for a [`FreeListHeap`](super::FreeListHeap).
    #[derive(Debug)]
    pub struct HeapStats {
        allocations: AtomicUsize,
        frees: AtomicUsize,
        bytes_in_use: AtomicUsize,
    }

    impl HeapStats {
        pub(crate) const fn new() -> Self {
            Self {
                allocations: AtomicUsize::new(0),
                frees: AtomicUsize::new(0),
                bytes_in_use: AtomicUsize::new(0),
            }
        }

        pub(crate) fn allocated(&self, size: usize) {
            self.allocations.fetch_add(1, Ordering::Relaxed);
            self.bytes_in_use.fetch_add(size, Ordering::Relaxed);
        }

        pub(crate) fn freed(&self, size: usize) {
            self.frees.fetch_add(1, Ordering::Relaxed);
            self.bytes_in_use.fetch_sub(size, Ordering::Relaxed);
        }

        pub fn allocations(&self) -> usize {
            self.allocations.load(Ordering::Relaxed)
        }

        pub fn frees(&self) -> usize {
            self.frees.load(Ordering::Relaxed)
        }

        pub fn bytes_in_use(&self) -> usize {
            self.bytes_in_use.load(Ordering::Relaxed)
        }
    }
}

#[cfg(test)]
pub mod test {
    use super::*;

    #[test]
    fn trims_pool_to_blocks() {
        let heap = FreeListHeap::new(1000);
        assert_eq!(heap.pool_size(), 992);
        assert_eq!(heap.free_bytes(), 992);
    }

    #[test]
    fn allocations_are_block_multiples() {
        let mut heap = FreeListHeap::new(1024);
        let a = heap.allocate(1).unwrap();
        let b = heap.allocate(9).unwrap();
        assert_eq!(a, HEADER_SIZE);
        assert_eq!(b, BLOCK_SIZE + HEADER_SIZE);
        assert_eq!(heap.size_of(a).unwrap(), BLOCK_SIZE - HEADER_SIZE);
        assert_eq!(heap.size_of(b).unwrap(), 2 * BLOCK_SIZE - HEADER_SIZE);
        assert_eq!(heap.free_bytes(), 1024 - 3 * BLOCK_SIZE);
    }

    #[test]
    fn double_free_is_caught() {
        let mut heap = FreeListHeap::new(256);
        let a = heap.allocate(20).unwrap();
        assert_eq!(heap.free(a), Ok(()));
        assert_eq!(heap.free(a), Err(FreeError::BadTag));
        assert_eq!(heap.free(a + 1), Err(FreeError::Misaligned));
        assert_eq!(heap.free(100_000), Err(FreeError::OutOfPool));
    }

    #[test]
    fn coalesces_neighbours() {
        let mut heap = FreeListHeap::new(16 * BLOCK_SIZE);
        let a = heap.allocate(8).unwrap();
        let b = heap.allocate(8).unwrap();
        let c = heap.allocate(8).unwrap();
        let _d = heap.allocate(8).unwrap();

        heap.free(a).unwrap();
        heap.free(c).unwrap();
        assert_eq!(heap.free_blocks().count(), 3);

        // freeing the middle block joins a, b and c into one run
        heap.free(b).unwrap();
        let blocks = heap.free_blocks().collect::<Vec<_>>();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0], (0, 3 * BLOCK_SIZE));
    }

    #[test]
    fn picks_best_fit() {
        let mut heap = FreeListHeap::new(64 * BLOCK_SIZE);
        let big = heap.allocate(10 * BLOCK_SIZE).unwrap();
        let _sep1 = heap.allocate(8).unwrap();
        let small = heap.allocate(2 * BLOCK_SIZE).unwrap();
        let _sep2 = heap.allocate(8).unwrap();
        heap.free(big).unwrap();
        heap.free(small).unwrap();

        // Both holes fit, the tighter one wins even though it is later.
        let again = heap.allocate(BLOCK_SIZE).unwrap();
        assert_eq!(again, small);
    }

    #[test]
    fn damaged_links_are_errors() {
        let mut heap = FreeListHeap::new(64 * BLOCK_SIZE);
        let a = heap.allocate(100).unwrap();
        // the free block right after `a` now links far outside the pool
        let rest = a - HEADER_SIZE + heap.size_of(a).unwrap() + HEADER_SIZE;
        heap.pool[rest + 4..rest + 8].copy_from_slice(&0x7FFF_0000u32.to_ne_bytes());
        assert_eq!(heap.allocate(1000), Err(AllocError::Corrupt));
        assert_eq!(heap.free(a), Err(FreeError::Corrupt));
        assert_eq!(heap.free_blocks().count(), 0);

        // a size header that runs off the end is caught too
        let mut heap = FreeListHeap::new(8 * BLOCK_SIZE);
        heap.pool[0..4].copy_from_slice(&u32::MAX.to_ne_bytes());
        assert_eq!(heap.allocate(1), Err(AllocError::Corrupt));
    }

    #[test]
    fn blocks_expose_only_user_bytes() {
        let mut heap = FreeListHeap::new(16 * BLOCK_SIZE);
        let a = heap.allocate(20).unwrap();
        assert_eq!(heap.block(a).unwrap().len(), 2 * BLOCK_SIZE - HEADER_SIZE);
        heap.block_mut(a).unwrap().fill(0xFF);
        let b = heap.allocate(1).unwrap();
        assert_eq!(heap.size_of(b).unwrap(), BLOCK_SIZE - HEADER_SIZE);
        assert_eq!(heap.block(a + 4), Err(FreeError::Misaligned));
        heap.free(a).unwrap();
        assert_eq!(heap.block(a), Err(FreeError::BadTag));
    }

    #[test]
    fn exhaustion_and_recovery() {
        let mut heap = FreeListHeap::new(4 * BLOCK_SIZE);
        let mut live = Vec::new();
        while let Ok(a) = heap.allocate(1) {
            live.push(a);
        }
        assert_eq!(live.len(), 4);
        assert_eq!(heap.allocate(1), Err(AllocError::OutOfMemory));
        for a in live.drain(..) {
            heap.free(a).unwrap();
        }
        assert_eq!(heap.largest_free(), 4 * BLOCK_SIZE - HEADER_SIZE);
        assert!(heap.allocate(3 * BLOCK_SIZE).is_ok());
    }
}
