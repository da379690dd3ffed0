//! MessageQueue implementation
//!
//! Mutex + Condvar FIFO with a non-blocking pop and a blocking wait.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Multi-producer/multi-consumer FIFO queue
pub struct MessageQueue<T> {
    /// Queued items, oldest at the front
    items: Mutex<VecDeque<T>>,

    /// Signalled on every push
    available: Condvar,
}

impl<T> MessageQueue<T> {
    /// Create a new empty queue
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
        }
    }

    /// Push an item at the back and wake every waiter
    pub fn push(&self, item: T) {
        self.items.lock().push_back(item);
        self.available.notify_all();
    }

    /// Pop the oldest item without blocking
    pub fn pop(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Drop every queued item
    pub fn clear(&self) {
        self.items.lock().clear();
    }

    /// Block the calling thread until the queue is non-empty
    pub fn wait(&self) {
        let mut items = self.items.lock();
        while items.is_empty() {
            self.available.wait(&mut items);
        }
    }

    /// Block until the queue is non-empty or `timeout` elapses.
    ///
    /// Returns true if the queue is non-empty on return.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut items = self.items.lock();
        while items.is_empty() {
            if self.available.wait_until(&mut items, deadline).timed_out() {
                return !items.is_empty();
            }
        }
        true
    }
}

impl<T> Default for MessageQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
