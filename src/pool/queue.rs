//! A bounded MPMC queue (Dmitry Vyukov's ring-buffer design) with
//! queue-doubling on overflow (spec §4.2).
//!
//! The ring itself never blocks and never allocates on the hot path; when
//! it's full, [`TaskQueue::push`] takes a write lock and swaps in a queue
//! twice the size, migrating every pending task across. That resize is the
//! only place this type takes a lock at all -- steady-state push/pop only
//! touch atomics.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;

struct Cell<T> {
    sequence: AtomicUsize,
    data: UnsafeCell<Option<T>>,
}

/// Fixed-capacity lock-free MPMC ring buffer.
struct Bounded<T> {
    buffer: Box<[Cell<T>]>,
    mask: usize,
    enqueue_pos: AtomicUsize,
    dequeue_pos: AtomicUsize,
}

unsafe impl<T: Send> Send for Bounded<T> {}
unsafe impl<T: Send> Sync for Bounded<T> {}

impl<T> Bounded<T> {
    fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.next_power_of_two().max(2);
        let buffer: Vec<Cell<T>> = (0..capacity)
            .map(|i| Cell { sequence: AtomicUsize::new(i), data: UnsafeCell::new(None) })
            .collect();
        Bounded { buffer: buffer.into_boxed_slice(), mask: capacity - 1, enqueue_pos: AtomicUsize::new(0), dequeue_pos: AtomicUsize::new(0) }
    }

    fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Returns `Err(item)` if the ring is currently full.
    fn push(&self, item: T) -> Result<(), T> {
        let mut pos = self.enqueue_pos.load(Ordering::Relaxed);
        loop {
            let cell = &self.buffer[pos & self.mask];
            let seq = cell.sequence.load(Ordering::Acquire);
            let diff = seq as isize - pos as isize;
            if diff == 0 {
                if self
                    .enqueue_pos
                    .compare_exchange_weak(pos, pos + 1, Ordering::Relaxed, Ordering::Relaxed)
                    .is_ok()
                {
                    unsafe { *cell.data.get() = Some(item) };
                    cell.sequence.store(pos + 1, Ordering::Release);
                    return Ok(());
                }
                pos = self.enqueue_pos.load(Ordering::Relaxed);
            } else if diff < 0 {
                return Err(item);
            } else {
                pos = self.enqueue_pos.load(Ordering::Relaxed);
            }
        }
    }

    fn pop(&self) -> Option<T> {
        let mut pos = self.dequeue_pos.load(Ordering::Relaxed);
        loop {
            let cell = &self.buffer[pos & self.mask];
            let seq = cell.sequence.load(Ordering::Acquire);
            let diff = seq as isize - (pos + 1) as isize;
            if diff == 0 {
                if self
                    .dequeue_pos
                    .compare_exchange_weak(pos, pos + 1, Ordering::Relaxed, Ordering::Relaxed)
                    .is_ok()
                {
                    let item = unsafe { (*cell.data.get()).take() };
                    cell.sequence.store(pos + self.mask + 1, Ordering::Release);
                    return item;
                }
                pos = self.dequeue_pos.load(Ordering::Relaxed);
            } else if diff < 0 {
                return None;
            } else {
                pos = self.dequeue_pos.load(Ordering::Relaxed);
            }
        }
    }
}

/// An MPMC queue that doubles its ring size instead of rejecting a push.
pub struct TaskQueue<T> {
    inner: RwLock<std::sync::Arc<Bounded<T>>>,
}

impl<T> TaskQueue<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        TaskQueue { inner: RwLock::new(std::sync::Arc::new(Bounded::with_capacity(capacity))) }
    }

    pub fn push(&self, item: T) {
        let ring = self.inner.read().clone();
        match ring.push(item) {
            Ok(()) => {}
            Err(item) => self.grow_and_push(ring, item),
        }
    }

    fn grow_and_push(&self, observed: std::sync::Arc<Bounded<T>>, item: T) {
        let mut guard = self.inner.write();
        // Another thread may have already grown the ring while we waited.
        if !std::sync::Arc::ptr_eq(&guard, &observed) {
            drop(guard);
            return self.push(item);
        }
        let old = guard.clone();
        let grown = Bounded::with_capacity(old.capacity() * 2);
        while let Some(item) = old.pop() {
            // The new ring is strictly larger and uncontended here, so this
            // push cannot fail.
            grown.push(item).ok();
        }
        grown.push(item).ok();
        tracing::debug!(new_capacity = grown.capacity(), "pool: task queue grown");
        *guard = std::sync::Arc::new(grown);
    }

    pub fn pop(&self) -> Option<T> {
        self.inner.read().pop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_preserves_fifo_order() {
        let q: TaskQueue<i32> = TaskQueue::with_capacity(4);
        for i in 0..4 {
            q.push(i);
        }
        for i in 0..4 {
            assert_eq!(q.pop(), Some(i));
        }
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn grows_past_initial_capacity() {
        let q: TaskQueue<i32> = TaskQueue::with_capacity(2);
        for i in 0..100 {
            q.push(i);
        }
        for i in 0..100 {
            assert_eq!(q.pop(), Some(i));
        }
    }

    #[test]
    fn concurrent_producers_and_consumers_move_every_item() {
        use std::sync::Arc;
        let q = Arc::new(TaskQueue::<i32>::with_capacity(8));
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let q = q.clone();
                std::thread::spawn(move || {
                    for i in 0..250 {
                        q.push(p * 250 + i);
                    }
                })
            })
            .collect();
        for p in producers {
            p.join().unwrap();
        }
        let mut seen = std::collections::HashSet::new();
        while let Some(v) = q.pop() {
            seen.insert(v);
        }
        assert_eq!(seen.len(), 1000);
    }
}
