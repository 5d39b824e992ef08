//! Bounded, thread-safe double-ended queue with blocking consumers.
//!
//! Producers never block: a push against a full (or stopped) queue is
//! rejected and returns `false`. Consumers block until an item arrives or
//! [`BoundedQueue::stop`] is called, after which every pop returns `None`
//! immediately, even if items are still buffered.
//!
//! Producer/consumer convention used across the workspace: producers
//! `push_front`, consumers `pop_back_blocking`, which is FIFO end to end.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug)]
struct State<T> {
    items: VecDeque<T>,
    stopped: bool,
}

#[derive(Debug)]
pub struct BoundedQueue<T> {
    state: Mutex<State<T>>,
    available: Condvar,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(State {
                items: VecDeque::with_capacity(capacity.min(1024)),
                stopped: false,
            }),
            available: Condvar::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_stopped(&self) -> bool {
        self.lock().stopped
    }

    pub fn push_front(&self, item: T) -> bool {
        self.push_with(item, VecDeque::push_front)
    }

    pub fn push_back(&self, item: T) -> bool {
        self.push_with(item, VecDeque::push_back)
    }

    /// Block until an item is available at the front, or the queue stops.
    pub fn pop_front_blocking(&self) -> Option<T> {
        self.pop_with(VecDeque::pop_front)
    }

    /// Block until an item is available at the back, or the queue stops.
    pub fn pop_back_blocking(&self) -> Option<T> {
        self.pop_with(VecDeque::pop_back)
    }

    /// Like [`Self::pop_back_blocking`] but gives up after `timeout`.
    pub fn pop_back_timeout(&self, timeout: Duration) -> Option<T> {
        let guard = self.lock();
        let (mut state, _) = self
            .available
            .wait_timeout_while(guard, timeout, |s| s.items.is_empty() && !s.stopped)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if state.stopped {
            return None;
        }
        state.items.pop_back()
    }

    /// Non-blocking pop from the back; `None` when empty or stopped.
    pub fn try_pop_back(&self) -> Option<T> {
        let mut state = self.lock();
        if state.stopped {
            return None;
        }
        state.items.pop_back()
    }

    /// Stop the queue and wake every blocked consumer. Idempotent.
    pub fn stop(&self) {
        let mut state = self.lock();
        state.stopped = true;
        drop(state);
        self.available.notify_all();
    }

    fn push_with(&self, item: T, push: fn(&mut VecDeque<T>, T)) -> bool {
        let mut state = self.lock();
        if state.stopped || state.items.len() >= self.capacity {
            return false;
        }
        push(&mut state.items, item);
        drop(state);
        self.available.notify_one();
        true
    }

    fn pop_with(&self, pop: fn(&mut VecDeque<T>) -> Option<T>) -> Option<T> {
        let guard = self.lock();
        let mut state = self
            .available
            .wait_while(guard, |s| s.items.is_empty() && !s.stopped)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if state.stopped {
            return None;
        }
        pop(&mut state.items)
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        // A panicking producer cannot leave the deque half-modified.
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
