//! Bounded blocking FIFO used to hand decoded frames between threads.
//!
//! One producer (the decode side) and one consumer (the playback tick)
//! share a `FrameQueue`. A full queue blocks the producer, which is the
//! pipeline's backpressure mechanism. Teardown uses the flush protocol:
//! `set_flushing` switches the queue to drain-only mode and
//! `wait_flushed` blocks until every accepted item has been popped.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

struct State<T> {
    items: VecDeque<T>,
    capacity: usize,
    flushing: bool,
    flushed: bool,
}

impl<T> State<T> {
    // Flush completes the moment the queue drains while in flushing mode.
    fn note_drained(&mut self) -> bool {
        if self.flushing && self.items.is_empty() && !self.flushed {
            self.flushed = true;
            return true;
        }
        false
    }
}

/// Fixed-capacity FIFO with blocking push/pop and a flush handshake.
pub struct FrameQueue<T> {
    state: Mutex<State<T>>,
    not_full: Condvar,
    not_empty: Condvar,
    flush_done: Condvar,
}

impl<T> FrameQueue<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0);
        Self {
            state: Mutex::new(State {
                items: VecDeque::with_capacity(capacity),
                capacity,
                flushing: false,
                flushed: false,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            flush_done: Condvar::new(),
        }
    }

    /// Insert an item, blocking while the queue is full.
    ///
    /// Returns `false` without inserting if flushing was requested before
    /// or during the wait; an item is never dropped after being accepted.
    pub fn push(&self, item: T) -> bool {
        let mut state = self.state.lock();
        while state.items.len() == state.capacity && !state.flushing {
            self.not_full.wait(&mut state);
        }
        if state.flushing {
            return false;
        }
        state.items.push_back(item);
        self.not_empty.notify_one();
        true
    }

    /// Remove the oldest item, blocking while the queue is empty and not
    /// flushing. Returns `None` once the queue is empty in flushing mode.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                self.not_full.notify_one();
                if state.note_drained() {
                    self.flush_done.notify_all();
                }
                return Some(item);
            }
            if state.flushing {
                return None;
            }
            self.not_empty.wait(&mut state);
        }
    }

    /// Non-blocking pop for schedulers that poll instead of blocking.
    pub fn try_pop(&self) -> Option<T> {
        let mut state = self.state.lock();
        let item = state.items.pop_front();
        if item.is_some() {
            self.not_full.notify_one();
            if state.note_drained() {
                self.flush_done.notify_all();
            }
        }
        item
    }

    /// Inspect the oldest item without removing it.
    pub fn with_front<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let state = self.state.lock();
        state.items.front().map(f)
    }

    /// Mutate the oldest item in place; used for partial consumption.
    pub fn with_front_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut state = self.state.lock();
        state.items.front_mut().map(f)
    }

    /// Switch the queue to drain-only mode. Idempotent. If the queue is
    /// already empty the flush completes immediately.
    pub fn set_flushing(&self) {
        let mut state = self.state.lock();
        if state.flushing {
            return;
        }
        state.flushing = true;
        if state.note_drained() {
            self.flush_done.notify_all();
        }
        // Wake a producer blocked on a full queue and a consumer blocked
        // on an empty one so both observe the mode change.
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    /// Block until flushing was requested and every accepted item has
    /// been popped.
    pub fn wait_flushed(&self) {
        let mut state = self.state.lock();
        while !state.flushed {
            self.flush_done.wait(&mut state);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        let state = self.state.lock();
        state.items.len() == state.capacity
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_flushing(&self) -> bool {
        self.state.lock().flushing
    }

    pub fn is_flushed(&self) -> bool {
        self.state.lock().flushed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_fifo_order() {
        let queue = FrameQueue::new(4);
        assert!(queue.push(1));
        assert!(queue.push(2));
        assert!(queue.push(3));
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), Some(3));
    }

    #[test]
    fn test_push_blocks_when_full() {
        let queue = Arc::new(FrameQueue::new(2));
        assert!(queue.push(1));
        assert!(queue.push(2));
        assert!(queue.is_full());

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.push(3))
        };

        // The producer must still be blocked; nothing was popped yet.
        thread::sleep(Duration::from_millis(50));
        assert!(!producer.is_finished());

        assert_eq!(queue.pop(), Some(1));
        assert!(producer.join().unwrap());
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), Some(3));
    }

    #[test]
    fn test_pop_blocks_until_push() {
        let queue = Arc::new(FrameQueue::new(2));
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop())
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!consumer.is_finished());
        assert!(queue.push(42));
        assert_eq!(consumer.join().unwrap(), Some(42));
    }

    #[test]
    fn test_flush_empty_completes_immediately() {
        let queue: FrameQueue<u32> = FrameQueue::new(2);
        queue.set_flushing();
        assert!(queue.is_flushed());
        queue.wait_flushed();
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_flush_drains_pending_items() {
        let queue = Arc::new(FrameQueue::new(4));
        assert!(queue.push(1));
        assert!(queue.push(2));
        queue.set_flushing();
        assert!(!queue.is_flushed());

        let waiter = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.wait_flushed())
        };

        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), None);
        waiter.join().unwrap();
        assert!(queue.is_flushed());
    }

    #[test]
    fn test_push_rejected_after_flush() {
        let queue = FrameQueue::new(2);
        queue.set_flushing();
        assert!(!queue.push(1));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_blocked_push_wakes_on_flush() {
        let queue = Arc::new(FrameQueue::new(1));
        assert!(queue.push(1));

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.push(2))
        };
        thread::sleep(Duration::from_millis(50));
        queue.set_flushing();

        // The blocked push is rejected, not silently dropped after accept.
        assert!(!producer.join().unwrap());
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_backpressure_no_loss() {
        let queue = Arc::new(FrameQueue::new(3));
        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for i in 0..100 {
                    assert!(queue.push(i));
                }
            })
        };
        let mut seen = Vec::new();
        for _ in 0..100 {
            seen.push(queue.pop().unwrap());
        }
        producer.join().unwrap();
        assert_eq!(seen, (0..100).collect::<Vec<_>>());
    }
}
