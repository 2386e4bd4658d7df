//! The reactor's timer heap (spec §4.9 "Timers"): a small binary heap keyed
//! by absolute deadline, consulted each loop iteration to compute the next
//! poll timeout and to fire due callbacks synchronously on the loop thread.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

pub type TimerId = u64;

struct Entry {
    deadline_ms: u64,
    id: TimerId,
    callback: Box<dyn FnMut() + Send>,
}

// Ordered by deadline only; `BinaryHeap` is a max-heap so callers wrap
// entries in `Reverse` to get min-deadline-first.
impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline_ms == other.deadline_ms && self.id == other.id
    }
}
impl Eq for Entry {}
impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.deadline_ms, self.id).cmp(&(other.deadline_ms, other.id))
    }
}

#[derive(Default)]
pub struct TimerWheel {
    heap: BinaryHeap<Reverse<Entry>>,
    next_id: TimerId,
}

impl TimerWheel {
    pub fn new() -> Self {
        TimerWheel { heap: BinaryHeap::new(), next_id: 1 }
    }

    /// Schedule `callback` to run at `deadline_ms` (an absolute timestamp on
    /// the same clock the caller passes into [`TimerWheel::next_timeout_ms`]
    /// and [`TimerWheel::fire_due`]).
    pub fn schedule(&mut self, deadline_ms: u64, callback: impl FnMut() + Send + 'static) -> TimerId {
        let id = self.next_id;
        self.next_id += 1;
        self.heap.push(Reverse(Entry { deadline_ms, id, callback: Box::new(callback) }));
        id
    }

    pub fn cancel(&mut self, id: TimerId) -> bool {
        let before = self.heap.len();
        self.heap = self.heap.drain().filter(|Reverse(e)| e.id != id).collect();
        self.heap.len() != before
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Milliseconds until the next deadline, `None` if no timer is pending
    /// (spec §4.9: "the next-poll timeout is min(deadline - now, INFINITE)").
    pub fn next_timeout_ms(&self, now_ms: u64) -> Option<i32> {
        let Reverse(next) = self.heap.peek()?;
        Some(next.deadline_ms.saturating_sub(now_ms).min(i32::MAX as u64) as i32)
    }

    /// Pop and run every timer whose deadline has passed.
    pub fn fire_due(&mut self, now_ms: u64) {
        while let Some(Reverse(entry)) = self.heap.peek() {
            if entry.deadline_ms > now_ms {
                break;
            }
            let Reverse(mut entry) = self.heap.pop().unwrap();
            (entry.callback)();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn fires_only_due_timers_in_deadline_order() {
        let mut wheel = TimerWheel::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let o1 = order.clone();
        wheel.schedule(100, move || o1.lock().unwrap().push(100));
        let o2 = order.clone();
        wheel.schedule(50, move || o2.lock().unwrap().push(50));
        let o3 = order.clone();
        wheel.schedule(200, move || o3.lock().unwrap().push(200));

        wheel.fire_due(150);
        assert_eq!(*order.lock().unwrap(), vec![50, 100]);
        assert!(!wheel.is_empty());
        wheel.fire_due(200);
        assert_eq!(*order.lock().unwrap(), vec![50, 100, 200]);
        assert!(wheel.is_empty());
    }

    #[test]
    fn next_timeout_reflects_the_soonest_deadline() {
        let mut wheel = TimerWheel::new();
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        wheel.schedule(500, move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(wheel.next_timeout_ms(400), Some(100));
        assert_eq!(wheel.next_timeout_ms(600), Some(0));
    }

    #[test]
    fn cancel_removes_a_pending_timer() {
        let mut wheel = TimerWheel::new();
        let id = wheel.schedule(10, || {});
        assert!(wheel.cancel(id));
        assert!(wheel.is_empty());
        assert!(!wheel.cancel(id));
    }
}
