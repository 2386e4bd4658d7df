//! The buddy heap (spec §4.1): size-class allocation with coalescing,
//! per-thread slab caches, foreign-block return, and file-backed overflow.
//!
//! Every executor in the worker pool (§4.2) owns one `Arc<Heap>`. Blocks
//! freed by a thread other than their owner are pushed onto the owner's
//! lock-free `foreign_blocks` stack and drained during [`Heap::merge`].

mod block;
mod pool;

pub use block::{MAX_BLOCK_ORDER, MAX_POOL_ORDER, MIN_ORDER, SLAB_CAPACITY, SLAB_MAX_ORDER, order_for};

use block::{BlockHeader, NUM_ORDERS, order_index, DEDICATED, USED};
use pool::Pool;

use std::collections::HashMap;
use std::path::PathBuf;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicPtr, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::{Mutex, RwLock};

#[derive(Clone, Debug)]
pub struct HeapConfig {
    pub swap_dir: PathBuf,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self { swap_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")) }
    }
}

#[derive(Default)]
pub struct HeapStats {
    bytes_reserved: AtomicUsize,
    bytes_in_use: AtomicUsize,
}

impl HeapStats {
    pub fn bytes_reserved(&self) -> usize {
        self.bytes_reserved.load(Ordering::Relaxed)
    }
    pub fn bytes_in_use(&self) -> usize {
        self.bytes_in_use.load(Ordering::Relaxed)
    }
}

/// Per-order free-list storage plus the `avail` bitmap used to find the
/// smallest satisfying order in O(1) via `trailing_zeros` (spec §4.1).
///
/// Entries are kept in a plain `Vec` rather than an intrusive pointer chain:
/// the whole structure sits behind one [`Heap::free`] mutex, so there is no
/// benefit to pointer-chasing removal over `swap_remove`, and it keeps this
/// path free of a second flavor of unsafe linked-list bookkeeping.
struct FreeLists {
    lists: Vec<Vec<NonNull<BlockHeader>>>,
    avail: u64,
}

impl FreeLists {
    fn new() -> Self {
        Self { lists: (0..NUM_ORDERS).map(|_| Vec::new()).collect(), avail: 0 }
    }

    fn push(&mut self, order: u32, header: NonNull<BlockHeader>) {
        let idx = order_index(order);
        self.lists[idx].push(header);
        self.avail |= 1 << idx;
    }

    fn pop_smallest_at_least(&mut self, order: u32) -> Option<(u32, NonNull<BlockHeader>)> {
        let start = order_index(order);
        let mask = self.avail & (!0u64 << start);
        if mask == 0 {
            return None;
        }
        let idx = mask.trailing_zeros() as usize;
        let header = self.lists[idx].pop().expect("avail bit set implies non-empty list");
        if self.lists[idx].is_empty() {
            self.avail &= !(1 << idx);
        }
        Some((idx as u32 + MIN_ORDER, header))
    }

    fn remove_specific(&mut self, order: u32, header: NonNull<BlockHeader>) -> bool {
        let idx = order_index(order);
        if let Some(pos) = self.lists[idx].iter().position(|&h| h == header) {
            self.lists[idx].swap_remove(pos);
            if self.lists[idx].is_empty() {
                self.avail &= !(1 << idx);
            }
            true
        } else {
            false
        }
    }
}

static NEXT_HEAP_ID: AtomicU32 = AtomicU32::new(1);
static REGISTRY: OnceLock<RwLock<HashMap<u32, Weak<Heap>>>> = OnceLock::new();

fn registry() -> &'static RwLock<HashMap<u32, Weak<Heap>>> {
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

pub struct Heap {
    pub id: u32,
    pools: Mutex<Vec<Pool>>,
    free: Mutex<FreeLists>,
    slabs: Mutex<Vec<Vec<NonNull<BlockHeader>>>>,
    foreign_blocks: AtomicPtr<BlockHeader>,
    swap_dir: PathBuf,
    stats: HeapStats,
}

// SAFETY: all mutable state is behind `Mutex` or atomics; raw pointers in
// free/slab lists and `foreign_blocks` only ever reference heap-owned memory
// that this type exclusively manages the lifetime of.
unsafe impl Send for Heap {}
unsafe impl Sync for Heap {}

impl Heap {
    pub fn new(config: HeapConfig) -> Arc<Heap> {
        let id = NEXT_HEAP_ID.fetch_add(1, Ordering::Relaxed);
        let heap = Arc::new(Heap {
            id,
            pools: Mutex::new(Vec::new()),
            free: Mutex::new(FreeLists::new()),
            slabs: Mutex::new((0..NUM_ORDERS).map(|_| Vec::new()).collect()),
            foreign_blocks: AtomicPtr::new(std::ptr::null_mut()),
            swap_dir: config.swap_dir,
            stats: HeapStats::default(),
        });
        registry().write().insert(id, Arc::downgrade(&heap));
        tracing::debug!(heap_id = id, "heap: created");
        heap
    }

    pub fn stats(&self) -> &HeapStats {
        &self.stats
    }

    pub fn alloc(&self, size: usize) -> Option<NonNull<u8>> {
        let order = order_for(size);
        if order > MAX_BLOCK_ORDER {
            return None;
        }
        if order <= SLAB_MAX_ORDER {
            if let Some(h) = self.slab_pop(order) {
                self.stats.bytes_in_use.fetch_add(1usize << order, Ordering::Relaxed);
                return Some(BlockHeader::payload_ptr(h));
            }
        }
        if order >= MAX_BLOCK_ORDER {
            return self.alloc_dedicated(order);
        }
        self.alloc_from_buddy(order)
    }

    fn alloc_from_buddy(&self, order: u32) -> Option<NonNull<u8>> {
        loop {
            {
                let mut free = self.free.lock();
                if let Some((found_order, header)) = free.pop_smallest_at_least(order) {
                    drop(free);
                    let header = self.split_down(header, found_order, order);
                    self.mark_used(header, order);
                    self.stats.bytes_in_use.fetch_add(1usize << order, Ordering::Relaxed);
                    return Some(BlockHeader::payload_ptr(header));
                }
            }
            if !self.grow_pool() {
                return None;
            }
        }
    }

    fn alloc_dedicated(&self, order: u32) -> Option<NonNull<u8>> {
        let pool = Pool::allocate(order, &self.swap_dir).ok()?;
        let base = pool.base;
        let is_file = pool.is_file_backed();
        let len = pool.len;
        self.pools.lock().push(pool);
        self.stats.bytes_reserved.fetch_add(len, Ordering::Relaxed);
        self.stats.bytes_in_use.fetch_add(len, Ordering::Relaxed);
        let header_ptr = base as *mut BlockHeader;
        unsafe {
            std::ptr::write(header_ptr, BlockHeader::new(base, order, order, self.id, is_file));
            (*header_ptr).flags |= DEDICATED;
        }
        Some(BlockHeader::payload_ptr(unsafe { NonNull::new_unchecked(header_ptr) }))
    }

    fn grow_pool(&self) -> bool {
        match Pool::allocate(MAX_POOL_ORDER, &self.swap_dir) {
            Ok(pool) => {
                let base = pool.base;
                let is_file = pool.is_file_backed();
                let len = pool.len;
                self.stats.bytes_reserved.fetch_add(len, Ordering::Relaxed);
                self.pools.lock().push(pool);
                let header_ptr = base as *mut BlockHeader;
                unsafe {
                    std::ptr::write(header_ptr, BlockHeader::new(base, MAX_POOL_ORDER, MAX_POOL_ORDER, self.id, is_file));
                    (*header_ptr).flags &= !USED;
                }
                let header = unsafe { NonNull::new_unchecked(header_ptr) };
                self.free.lock().push(MAX_POOL_ORDER, header);
                true
            }
            Err(e) => {
                tracing::error!(heap_id = self.id, error = %e, "heap: pool growth failed");
                false
            }
        }
    }

    fn split_down(&self, mut block: NonNull<BlockHeader>, mut cur_order: u32, target: u32) -> NonNull<BlockHeader> {
        while cur_order > target {
            cur_order -= 1;
            let half_size = 1usize << cur_order;
            let (pool_base, pool_order, heap_id) = unsafe {
                let h = block.as_ref();
                (h.pool_base, h.pool_order as u32, h.heap_id)
            };
            let buddy_ptr = unsafe { (block.as_ptr() as *mut u8).add(half_size) } as *mut BlockHeader;
            unsafe {
                std::ptr::write(buddy_ptr, BlockHeader::new(pool_base, pool_order, cur_order, heap_id, false));
                (*buddy_ptr).flags &= !USED;
                (*block.as_ptr()).order = cur_order as u8;
            }
            let buddy_nn = unsafe { NonNull::new_unchecked(buddy_ptr) };
            self.free.lock().push(cur_order, buddy_nn);
        }
        block
    }

    fn mark_used(&self, header: NonNull<BlockHeader>, order: u32) {
        unsafe {
            (*header.as_ptr()).flags |= USED;
            (*header.as_ptr()).order = order as u8;
        }
    }

    /// # Safety
    /// `ptr` must have come from this or a sibling heap's `alloc`/`realloc`
    /// and must not already be freed.
    pub fn free(&self, ptr: NonNull<u8>) {
        let header = unsafe { BlockHeader::from_payload(ptr) };
        unsafe { BlockHeader::validate(header.as_ref()) };
        let (order, heap_id, dedicated) = unsafe {
            let h = header.as_ref();
            (h.order as u32, h.heap_id, h.is_dedicated())
        };
        if dedicated {
            self.free_dedicated(header);
            return;
        }
        if heap_id != self.id {
            match registry().read().get(&heap_id).and_then(Weak::upgrade) {
                Some(owner) => owner.push_foreign(header),
                None => self.release_to_lists(header, order),
            }
            return;
        }
        if order <= SLAB_MAX_ORDER && self.slab_push(order, header) {
            self.stats.bytes_in_use.fetch_sub(1usize << order, Ordering::Relaxed);
            return;
        }
        self.release_to_lists(header, order);
    }

    fn free_dedicated(&self, header: NonNull<BlockHeader>) {
        let base = unsafe { header.as_ref().pool_base };
        let order = unsafe { header.as_ref().order as u32 };
        let mut pools = self.pools.lock();
        if let Some(pos) = pools.iter().position(|p| p.base == base) {
            let pool = pools.remove(pos);
            self.stats.bytes_reserved.fetch_sub(pool.len, Ordering::Relaxed);
            self.stats.bytes_in_use.fetch_sub(1usize << order, Ordering::Relaxed);
            pool.release();
        }
    }

    fn release_to_lists(&self, mut header: NonNull<BlockHeader>, mut order: u32) {
        unsafe { (*header.as_ptr()).flags &= !USED };
        self.stats.bytes_in_use.fetch_sub(1usize << order, Ordering::Relaxed);
        let pool_order = unsafe { header.as_ref().pool_order as u32 };
        let mut free = self.free.lock();
        while order < pool_order {
            let buddy = BlockHeader::buddy_of(header);
            let mergeable = unsafe {
                let b = buddy.as_ref();
                b.flags & USED == 0 && b.order as u32 == order && b.pool_base == header.as_ref().pool_base
            };
            if mergeable && free.remove_specific(order, buddy) {
                header = if (buddy.as_ptr() as usize) < (header.as_ptr() as usize) { buddy } else { header };
                order += 1;
                unsafe { (*header.as_ptr()).order = order as u8 };
            } else {
                break;
            }
        }
        free.push(order, header);
    }

    fn slab_pop(&self, order: u32) -> Option<NonNull<BlockHeader>> {
        let idx = order_index(order);
        let header = self.slabs.lock()[idx].pop()?;
        unsafe { (*header.as_ptr()).flags |= USED };
        Some(header)
    }

    fn slab_push(&self, order: u32, header: NonNull<BlockHeader>) -> bool {
        let idx = order_index(order);
        let mut slabs = self.slabs.lock();
        if slabs[idx].len() >= SLAB_CAPACITY {
            return false;
        }
        unsafe { (*header.as_ptr()).flags &= !USED };
        slabs[idx].push(header);
        true
    }

    pub fn realloc(&self, ptr: NonNull<u8>, new_size: usize) -> Option<NonNull<u8>> {
        let header = unsafe { BlockHeader::from_payload(ptr) };
        let old_order = unsafe { header.as_ref().order as u32 };
        let new_order = order_for(new_size);
        if new_order == old_order {
            return Some(ptr);
        }
        let new_ptr = self.alloc(new_size)?;
        let old_payload_len = (1usize << old_order) - std::mem::size_of::<BlockHeader>();
        let copy_len = old_payload_len.min(new_size);
        unsafe { std::ptr::copy_nonoverlapping(ptr.as_ptr(), new_ptr.as_ptr(), copy_len) };
        self.free(ptr);
        Some(new_ptr)
    }

    /// Flush slab caches and return whole free top-order pools to the OS.
    pub fn gc(&self) -> usize {
        {
            let mut slabs = self.slabs.lock();
            let mut free = self.free.lock();
            for (i, stack) in slabs.iter_mut().enumerate() {
                let order = i as u32 + MIN_ORDER;
                for header in stack.drain(..) {
                    free.push(order, header);
                }
            }
        }
        let whole_pools: Vec<_> = {
            let mut free = self.free.lock();
            let idx = order_index(MAX_POOL_ORDER);
            let drained: Vec<_> = free.lists[idx].drain(..).collect();
            if free.lists[idx].is_empty() {
                free.avail &= !(1 << idx);
            }
            drained
        };
        let mut released = 0usize;
        let mut pools = self.pools.lock();
        for header in whole_pools {
            let base = unsafe { header.as_ref().pool_base };
            if let Some(pos) = pools.iter().position(|p| p.base == base) {
                let pool = pools.remove(pos);
                released += pool.len;
                self.stats.bytes_reserved.fetch_sub(pool.len, Ordering::Relaxed);
                pool.release();
            }
        }
        tracing::debug!(heap_id = self.id, released, "heap: gc");
        released
    }

    fn push_foreign(&self, header: NonNull<BlockHeader>) {
        let mut head = self.foreign_blocks.load(Ordering::Acquire);
        loop {
            unsafe { write_link(header, head) };
            match self.foreign_blocks.compare_exchange_weak(head, header.as_ptr(), Ordering::Release, Ordering::Acquire) {
                Ok(_) => break,
                Err(h) => head = h,
            }
        }
    }

    fn drain_foreign(&self) -> Vec<NonNull<BlockHeader>> {
        let mut head = self.foreign_blocks.swap(std::ptr::null_mut(), Ordering::AcqRel);
        let mut out = Vec::new();
        while let Some(h) = NonNull::new(head) {
            out.push(h);
            head = unsafe { read_link(h) };
        }
        out
    }

    /// Transfer up to `max_blocks` small/medium free blocks from `self` into
    /// `worker` (spec §4.2 `prepare`).
    pub fn borrow(&self, worker: &Heap, max_blocks: usize) {
        let mut taken = 0usize;
        let borrow_ceiling = order_index(SLAB_MAX_ORDER) + 4;
        let mut free = self.free.lock();
        for idx in 0..NUM_ORDERS.min(borrow_ceiling) {
            let order = idx as u32 + MIN_ORDER;
            while taken < max_blocks {
                let Some(h) = free.lists[idx].pop() else { break };
                if free.lists[idx].is_empty() {
                    free.avail &= !(1 << idx);
                }
                unsafe { (*h.as_ptr()).heap_id = worker.id };
                worker.free.lock().push(order, h);
                taken += 1;
            }
        }
        tracing::trace!(from = self.id, to = worker.id, taken, "heap: borrowed blocks");
    }

    /// Drain `worker`'s foreign-block return list and fold its remaining
    /// free capacity back into `self` (spec §4.2 `run` "merges worker heaps
    /// back").
    pub fn merge(&self, worker: &Heap) {
        for h in worker.drain_foreign() {
            let order = unsafe { h.as_ref().order as u32 };
            self.release_to_lists(h, order);
        }
        let mut worker_free = worker.free.lock();
        for idx in 0..NUM_ORDERS {
            let order = idx as u32 + MIN_ORDER;
            for h in worker_free.lists[idx].drain(..) {
                unsafe { (*h.as_ptr()).heap_id = self.id };
                self.free.lock().push(order, h);
            }
        }
        worker_free.avail = 0;
        drop(worker_free);
        let mut worker_slabs = worker.slabs.lock();
        for (i, stack) in worker_slabs.iter_mut().enumerate() {
            let order = i as u32 + MIN_ORDER;
            for h in stack.drain(..) {
                unsafe { (*h.as_ptr()).heap_id = self.id };
                self.free.lock().push(order, h);
            }
        }
        tracing::trace!(into = self.id, from = worker.id, "heap: merged worker heap");
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        registry().write().remove(&self.id);
        let mut pools = self.pools.lock();
        for pool in pools.drain(..) {
            pool.release();
        }
    }
}

/// # Safety
/// `header`'s block must be at least `size_of::<BlockHeader>() + size_of::<*mut BlockHeader>()`
/// bytes (guaranteed for every order we ever free-list: the smallest order
/// is 32 bytes against a 16-byte header and an 8-byte link).
unsafe fn write_link(header: NonNull<BlockHeader>, next: *mut BlockHeader) {
    let slot = BlockHeader::payload_ptr(header).as_ptr() as *mut *mut BlockHeader;
    unsafe { slot.write(next) };
}

unsafe fn read_link(header: NonNull<BlockHeader>) -> *mut BlockHeader {
    let slot = BlockHeader::payload_ptr(header).as_ptr() as *mut *mut BlockHeader;
    unsafe { slot.read() }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_heap() -> Arc<Heap> {
        Heap::new(HeapConfig::default())
    }

    #[test]
    fn alloc_free_round_trip() {
        let heap = test_heap();
        let p = heap.alloc(100).expect("alloc");
        heap.free(p);
    }

    #[test]
    fn stress_returns_to_baseline_after_gc() {
        let heap = test_heap();
        let baseline = heap.stats().bytes_reserved();
        let mut ptrs = Vec::new();
        for i in 0..200 {
            let size = 16 + (i * 37) % 4000;
            if let Some(p) = heap.alloc(size) {
                ptrs.push(p);
            }
        }
        for p in ptrs.drain(..) {
            heap.free(p);
        }
        heap.gc();
        assert_eq!(heap.stats().bytes_reserved(), baseline);
    }

    #[test]
    fn realloc_preserves_contents() {
        let heap = test_heap();
        let p = heap.alloc(8).unwrap();
        unsafe { p.as_ptr().write_bytes(0xAB, 8) };
        let p2 = heap.realloc(p, 4000).unwrap();
        let bytes = unsafe { std::slice::from_raw_parts(p2.as_ptr(), 8) };
        assert!(bytes.iter().all(|&b| b == 0xAB));
        heap.free(p2);
    }

    #[test]
    fn dedicated_block_round_trip() {
        let heap = test_heap();
        let p = heap.alloc(1 << 29).expect("dedicated alloc");
        heap.free(p);
    }

    #[test]
    fn borrow_and_merge_transfer_ownership() {
        let main = test_heap();
        let worker = test_heap();
        for _ in 0..8 {
            let p = main.alloc(64).unwrap();
            main.free(p);
        }
        main.borrow(&worker, 4);
        let p = worker.alloc(64).expect("worker should have borrowed capacity");
        worker.free(p);
        main.merge(&worker);
    }
}
