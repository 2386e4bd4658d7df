//! The worker-pool scheduler (spec §4.2).
//!
//! Executor 0 is always the calling thread -- [`Pool::run`] has the caller
//! drain the shared task queue alongside every spawned worker rather than
//! blocking idle while N-1 threads do the work. Workers are pinned across
//! physical cores before SMT siblings ([`topology::Topology::discover`]) and
//! each owns its own [`Heap`], borrowing blocks from the pool's heap for the
//! duration of a fan-out and merging them back on completion (spec §4.1/§5).

mod queue;
mod topology;

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::heap::{Heap, HeapConfig};
use crate::vm;
use queue::TaskQueue;
pub use topology::Topology;

type Task = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
pub struct PoolStats {
    pub tasks_run: AtomicU64,
    pub bytes_borrowed: AtomicU64,
    pub bytes_merged: AtomicU64,
    pub queue_growth_events: AtomicU64,
}

struct Shared {
    queue: TaskQueue<Task>,
    pending: AtomicUsize,
    shutdown: AtomicBool,
    mutex: Mutex<()>,
    cvar: Condvar,
    stats: PoolStats,
}

/// A persistent fan-out pool: N-1 pinned worker threads plus the calling
/// thread as executor 0.
pub struct Pool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
    heaps: Vec<Arc<Heap>>,
}

impl Pool {
    /// Spin up `size` executors (`size - 1` OS threads, plus the caller).
    /// `config` is cloned to seed one heap per executor.
    pub fn create(size: usize, config: HeapConfig) -> Pool {
        let size = size.max(1);
        let topo = Topology::discover();
        let shared = Arc::new(Shared {
            queue: TaskQueue::with_capacity(256),
            pending: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
            mutex: Mutex::new(()),
            cvar: Condvar::new(),
            stats: PoolStats::default(),
        });

        let caller_heap = Heap::new(config.clone());
        vm::init(caller_heap.clone());

        let mut heaps = vec![caller_heap];
        let mut workers = Vec::with_capacity(size.saturating_sub(1));
        for i in 1..size {
            let cpu = topo.order.get(i % topo.order.len().max(1)).copied();
            let heap = Heap::new(config.clone());
            heaps.push(heap.clone());
            let shared = shared.clone();
            let handle = std::thread::Builder::new()
                .name(format!("rayforce-worker-{i}"))
                .spawn(move || {
                    if let Some(cpu) = cpu {
                        pin_current_thread(cpu);
                    }
                    vm::init(heap);
                    worker_loop(shared);
                })
                .expect("spawning pool worker thread");
            workers.push(handle);
        }

        tracing::info!(size, "pool: created worker pool");
        Pool { shared, workers, heaps }
    }

    pub fn size(&self) -> usize {
        self.heaps.len()
    }

    pub fn stats(&self) -> &PoolStats {
        &self.shared.stats
    }

    /// The heap belonging to executor `idx` (0 = caller thread).
    pub fn heap(&self, idx: usize) -> Arc<Heap> {
        self.heaps[idx].clone()
    }

    /// Queue a task for any idle executor to pick up.
    pub fn add_task(&self, task: impl FnOnce() + Send + 'static) {
        self.shared.pending.fetch_add(1, Ordering::AcqRel);
        self.shared.queue.push(Box::new(task));
        let _guard = self.shared.mutex.lock();
        self.shared.cvar.notify_all();
    }

    /// Block the calling thread, draining tasks as executor 0, until every
    /// queued task (from this and every other thread's perspective) has run.
    pub fn run(&self) {
        loop {
            if let Some(task) = self.shared.queue.pop() {
                task();
                self.shared.stats.tasks_run.fetch_add(1, Ordering::Relaxed);
                if self.shared.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
                    return;
                }
                continue;
            }
            if self.shared.pending.load(Ordering::Acquire) == 0 {
                return;
            }
            std::thread::yield_now();
        }
    }

    /// Run `f` once per item of `0..len`, splitting the range across every
    /// executor (including the caller) via [`split_by`], and block until all
    /// partitions finish.
    pub fn for_each_chunk(&self, len: usize, f: impl Fn(std::ops::Range<usize>) + Send + Sync + 'static) {
        let f = Arc::new(f);
        let ranges = split_by(len, self.size());
        let mut own_range = None;
        for (i, range) in ranges.into_iter().enumerate() {
            if i == 0 {
                own_range = Some(range);
                continue;
            }
            let f = f.clone();
            self.add_task(move || f(range));
        }
        if let Some(range) = own_range {
            f(range);
        }
        self.run();
    }

    /// Lend up to `max_blocks` free blocks from executor 0's heap into every
    /// worker heap (spec §4.2 "heap borrow"), ahead of a fan-out that will
    /// allocate heavily on worker threads.
    pub fn borrow_all(&self, max_blocks: usize) {
        let caller = &self.heaps[0];
        let before = caller.stats().bytes_reserved();
        for worker in &self.heaps[1..] {
            caller.borrow(worker, max_blocks);
        }
        let after = caller.stats().bytes_reserved();
        self.shared.stats.bytes_borrowed.fetch_add(before.saturating_sub(after) as u64, Ordering::Relaxed);
    }

    /// Reclaim every worker heap's free blocks back into executor 0's heap
    /// (spec §4.2 "heap merge"), run after a fan-out completes.
    pub fn merge_all(&self) {
        let caller = &self.heaps[0];
        for worker in &self.heaps[1..] {
            caller.merge(worker);
        }
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        let _guard = self.shared.mutex.lock();
        self.shared.cvar.notify_all();
        drop(_guard);
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        if let Some(task) = shared.queue.pop() {
            task();
            shared.stats.tasks_run.fetch_add(1, Ordering::Relaxed);
            if shared.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
                let _guard = shared.mutex.lock();
                shared.cvar.notify_all();
            }
            continue;
        }
        if shared.shutdown.load(Ordering::Acquire) {
            return;
        }
        let mut guard = shared.mutex.lock();
        shared.cvar.wait_for(&mut guard, Duration::from_millis(10));
    }
}

#[cfg(target_os = "linux")]
fn pin_current_thread(cpu: usize) {
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(cpu, &mut set);
        let rc = libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set);
        if rc != 0 {
            tracing::warn!(cpu, "pool: failed to pin worker thread");
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn pin_current_thread(cpu: usize) {
    tracing::warn!(cpu, "pool: CPU pinning unsupported on this platform");
}

/// Split `len` items into up to `workers` contiguous, nearly-equal ranges.
pub fn split_by(len: usize, workers: usize) -> Vec<std::ops::Range<usize>> {
    let workers = workers.max(1);
    if len == 0 {
        return Vec::new();
    }
    let chunk = len.div_ceil(workers).max(1);
    (0..len).step_by(chunk).map(|start| start..(start + chunk).min(len)).collect()
}

/// Like [`split_by`], but each chunk (other than possibly the last) is a
/// multiple of `alignment` -- used to keep SIMD/row-group boundaries intact
/// when partitioning a column for parallel hashing or sorting.
pub fn chunk_aligned(len: usize, workers: usize, alignment: usize) -> Vec<std::ops::Range<usize>> {
    let workers = workers.max(1);
    let alignment = alignment.max(1);
    if len == 0 {
        return Vec::new();
    }
    let units = len.div_ceil(alignment);
    let units_per_chunk = units.div_ceil(workers).max(1);
    let chunk = units_per_chunk * alignment;
    (0..len).step_by(chunk).map(|start| start..(start + chunk).min(len)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI64;

    #[test]
    fn split_by_covers_every_index_without_overlap() {
        let ranges = split_by(17, 4);
        let mut covered: Vec<usize> = ranges.iter().flat_map(|r| r.clone()).collect();
        covered.sort_unstable();
        assert_eq!(covered, (0..17).collect::<Vec<_>>());
    }

    #[test]
    fn chunk_aligned_respects_alignment_boundaries() {
        let ranges = chunk_aligned(100, 3, 8);
        for r in &ranges[..ranges.len() - 1] {
            assert_eq!(r.len() % 8, 0);
        }
    }

    #[test]
    fn pool_runs_tasks_across_executors() {
        let pool = Pool::create(4, HeapConfig::default());
        let total = Arc::new(AtomicI64::new(0));
        for _ in 0..3 {
            let total = total.clone();
            pool.add_task(move || {
                total.fetch_add(1, Ordering::SeqCst);
            });
        }
        pool.run();
        assert_eq!(total.load(Ordering::SeqCst), 3);
        assert_eq!(pool.stats().tasks_run.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn for_each_chunk_partitions_the_whole_range() {
        let pool = Pool::create(3, HeapConfig::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        pool.for_each_chunk(30, move |range| {
            seen_clone.lock().extend(range);
        });
        let mut got = seen.lock().clone();
        got.sort_unstable();
        assert_eq!(got, (0..30).collect::<Vec<_>>());
    }

    #[test]
    fn borrow_and_merge_round_trip_without_panicking() {
        let pool = Pool::create(2, HeapConfig::default());
        pool.borrow_all(4);
        pool.merge_all();
    }
}
