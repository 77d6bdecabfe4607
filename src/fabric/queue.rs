//! Bounded FIFO queue with deadline-based blocking, priority insertion and an
//! atomic head-filtered take.
//!
//! Every inter-task hop in the gateway goes through one of these. Capacity is
//! fixed at creation; producers that cannot enqueue within their deadline get
//! their item back and decide locally what to do with it.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub struct BoundedQueue<T> {
    inner: Mutex<VecDeque<T>>,
    capacity: usize,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Result<Self, String> {
        if capacity == 0 {
            return Err("queue capacity must be non-zero".into());
        }
        Ok(Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        })
    }

    /// Enqueue at the tail, waiting up to `timeout` for space. The item is
    /// returned on timeout so the caller can log or retry.
    pub fn send(&self, item: T, timeout: Duration) -> Result<(), T> {
        self.put(item, timeout, false)
    }

    /// Enqueue at the head. Used for urgent items that must bypass pending
    /// bulk traffic.
    pub fn send_front(&self, item: T, timeout: Duration) -> Result<(), T> {
        self.put(item, timeout, true)
    }

    pub fn try_send(&self, item: T) -> Result<(), T> {
        self.put(item, Duration::ZERO, false)
    }

    pub fn try_send_front(&self, item: T) -> Result<(), T> {
        self.put(item, Duration::ZERO, true)
    }

    fn put(&self, item: T, timeout: Duration, front: bool) -> Result<(), T> {
        let deadline = Instant::now() + timeout;
        let mut q = self.inner.lock();
        while q.len() >= self.capacity {
            if timeout.is_zero() {
                return Err(item);
            }
            if self.not_full.wait_until(&mut q, deadline).timed_out() && q.len() >= self.capacity {
                return Err(item);
            }
        }
        if front {
            q.push_front(item);
        } else {
            q.push_back(item);
        }
        drop(q);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Dequeue from the head, waiting up to `timeout` for an item.
    pub fn recv(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut q = self.inner.lock();
        while q.is_empty() {
            if timeout.is_zero() {
                return None;
            }
            if self.not_empty.wait_until(&mut q, deadline).timed_out() && q.is_empty() {
                return None;
            }
        }
        let item = q.pop_front();
        drop(q);
        self.not_full.notify_one();
        item
    }

    pub fn try_recv(&self) -> Option<T> {
        self.recv(Duration::ZERO)
    }

    /// Remove and return the head iff `pred` accepts it. The test and the
    /// removal happen under one lock, so no other consumer can observe the
    /// head in between.
    pub fn take_head_if(&self, pred: impl FnOnce(&T) -> bool) -> Option<T> {
        let mut q = self.inner.lock();
        if q.front().is_some_and(|head| pred(head)) {
            let item = q.pop_front();
            drop(q);
            self.not_full.notify_one();
            item
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn capacity_remaining(&self) -> usize {
        self.capacity - self.len()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
