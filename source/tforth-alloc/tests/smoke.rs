use tforth_alloc::{heap::BLOCK_SIZE, FreeError, FreeListHeap};

#[test]
fn basic() {
    const SIZE: usize = 16 * 1024;

    let mut heap = FreeListHeap::new(SIZE);
    let alloc_1 = heap.allocate(100).unwrap();
    let alloc_2 = heap.allocate(200).unwrap();

    heap.block_mut(alloc_1).unwrap()[..100].fill(0xAB);
    heap.block_mut(alloc_2).unwrap()[..200].fill(0xCA);

    assert!(heap.block(alloc_1).unwrap()[..100].iter().all(|b| *b == 0xAB));
    assert!(heap.block(alloc_2).unwrap()[..200].iter().all(|b| *b == 0xCA));

    heap.free(alloc_1).unwrap();
    heap.free(alloc_2).unwrap();
    assert_eq!(heap.free_bytes(), SIZE);
    assert_eq!(heap.free_blocks().count(), 1);
}

#[test]
fn churn_returns_to_one_block() {
    const SIZE: usize = 64 * 1024;

    let mut heap = FreeListHeap::new(SIZE);
    let mut live = Vec::new();

    // A cheap deterministic mix of sizes and release orders.
    let mut seed: u32 = 0x1234_5678;
    for round in 0..2000 {
        seed ^= seed << 13;
        seed ^= seed >> 17;
        seed ^= seed << 5;
        if round % 3 == 2 && !live.is_empty() {
            let idx = seed as usize % live.len();
            let user = live.swap_remove(idx);
            heap.free(user).unwrap();
        } else if let Ok(user) = heap.allocate((seed % 300) as usize) {
            live.push(user);
        }
    }

    for user in live.drain(..) {
        heap.free(user).unwrap();
    }
    assert_eq!(heap.free_blocks().collect::<Vec<_>>(), vec![(0, SIZE)]);
}

#[test]
fn stray_offsets_are_rejected() {
    let mut heap = FreeListHeap::new(32 * BLOCK_SIZE);
    let a = heap.allocate(40).unwrap();
    assert_eq!(heap.free(a + BLOCK_SIZE), Err(FreeError::BadTag));
    assert_eq!(heap.size_of(a).unwrap(), 48 - 8);
    heap.free(a).unwrap();
}
