//! Semaphores and the priority-inheriting mutex.
//!
//! Priority inheritance: while a task holds a `PiMutex` and a higher-priority
//! task is waiting on it, the holder's OS thread is temporarily boosted to the
//! waiter's priority, and restored on unlock. Boost failures (unprivileged
//! environments routinely refuse priority changes) degrade to plain mutual
//! exclusion and are logged at debug level.

use log::debug;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::ops::{Deref, DerefMut};
use std::time::{Duration, Instant};
use thread_priority::*;

/// Counting semaphore with timed take/give. A binary semaphore is the
/// `max = 1` case.
pub struct Semaphore {
    permits: Mutex<usize>,
    max: usize,
    cond: Condvar,
}

impl Semaphore {
    pub fn new(initial: usize, max: usize) -> Result<Self, String> {
        if max == 0 || initial > max {
            return Err(format!("invalid semaphore bounds {initial}/{max}"));
        }
        Ok(Self {
            permits: Mutex::new(initial),
            max,
            cond: Condvar::new(),
        })
    }

    pub fn take(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut permits = self.permits.lock();
        while *permits == 0 {
            if timeout.is_zero() {
                return false;
            }
            if self.cond.wait_until(&mut permits, deadline).timed_out() && *permits == 0 {
                return false;
            }
        }
        *permits -= 1;
        true
    }

    pub fn try_take(&self) -> bool {
        self.take(Duration::ZERO)
    }

    /// Release one permit. Gives beyond `max` are ignored, matching the
    /// saturating behaviour of a counting semaphore.
    pub fn give(&self) {
        let mut permits = self.permits.lock();
        if *permits < self.max {
            *permits += 1;
        }
        drop(permits);
        self.cond.notify_one();
    }

    pub fn available(&self) -> usize {
        *self.permits.lock()
    }
}

struct Holder {
    native: ThreadId,
    base: u8,
    effective: u8,
}

/// Mutex whose holder inherits the priority of its highest-priority waiter.
pub struct PiMutex<T> {
    inner: Mutex<T>,
    holder: Mutex<Option<Holder>>,
}

impl<T> PiMutex<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
            holder: Mutex::new(None),
        }
    }

    /// Acquire the mutex. `prio` is the caller's fixed task priority; a
    /// contended acquire boosts the current holder up to it.
    pub fn lock(&self, prio: u8) -> PiMutexGuard<'_, T> {
        let guard = match self.inner.try_lock() {
            Some(g) => g,
            None => {
                self.boost_holder(prio);
                self.inner.lock()
            }
        };
        *self.holder.lock() = Some(Holder {
            native: thread_native_id(),
            base: prio,
            effective: prio,
        });
        PiMutexGuard { owner: self, guard }
    }

    pub fn try_lock(&self, prio: u8) -> Option<PiMutexGuard<'_, T>> {
        let guard = self.inner.try_lock()?;
        *self.holder.lock() = Some(Holder {
            native: thread_native_id(),
            base: prio,
            effective: prio,
        });
        Some(PiMutexGuard { owner: self, guard })
    }

    fn boost_holder(&self, waiter_prio: u8) {
        let mut holder = self.holder.lock();
        if let Some(h) = holder.as_mut()
            && waiter_prio > h.effective
        {
            apply_priority_to(h.native, waiter_prio);
            h.effective = waiter_prio;
        }
    }

    fn release(&self) {
        let mut holder = self.holder.lock();
        if let Some(h) = holder.take()
            && h.effective > h.base
        {
            // The holder restores its own base priority on the way out.
            apply_current_priority(h.base);
        }
    }
}

pub struct PiMutexGuard<'a, T> {
    owner: &'a PiMutex<T>,
    guard: MutexGuard<'a, T>,
}

impl<T> Deref for PiMutexGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for PiMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for PiMutexGuard<'_, T> {
    fn drop(&mut self) {
        self.owner.release();
    }
}

/// Apply a fixed priority to the calling thread.
pub fn apply_current_priority(prio: u8) {
    match ThreadPriorityValue::try_from(prio) {
        Ok(value) => {
            if let Err(e) = set_current_thread_priority(ThreadPriority::Crossplatform(value)) {
                debug!("priority {prio} not applied to current thread: {e:?}");
            }
        }
        Err(e) => debug!("priority value {prio} out of range: {e}"),
    }
}

#[cfg(unix)]
fn apply_priority_to(native: ThreadId, prio: u8) {
    let Ok(value) = ThreadPriorityValue::try_from(prio) else {
        return;
    };
    let policy = thread_schedule_policy()
        .unwrap_or(ThreadSchedulePolicy::Normal(NormalThreadSchedulePolicy::Other));
    if let Err(e) =
        set_thread_priority_and_policy(native, ThreadPriority::Crossplatform(value), policy)
    {
        debug!("priority boost to {prio} failed: {e:?}");
    }
}

#[cfg(not(unix))]
fn apply_priority_to(_native: ThreadId, _prio: u8) {}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn semaphore_bounds_are_validated() {
        assert!(Semaphore::new(0, 0).is_err());
        assert!(Semaphore::new(2, 1).is_err());
        assert!(Semaphore::new(1, 1).is_ok());
    }

    #[test]
    fn semaphore_take_give() {
        let sem = Semaphore::new(1, 1).unwrap();
        assert!(sem.try_take());
        assert!(!sem.try_take());
        sem.give();
        assert!(sem.try_take());
    }

    #[test]
    fn semaphore_give_saturates_at_max() {
        let sem = Semaphore::new(1, 1).unwrap();
        sem.give();
        sem.give();
        assert_eq!(sem.available(), 1);
    }

    #[test]
    fn semaphore_timed_take_expires() {
        let sem = Semaphore::new(0, 1).unwrap();
        let start = Instant::now();
        assert!(!sem.take(Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn semaphore_waiter_wakes_on_give() {
        let sem = Arc::new(Semaphore::new(0, 1).unwrap());
        let sem2 = sem.clone();
        let waiter = thread::spawn(move || sem2.take(Duration::from_secs(2)));
        thread::sleep(Duration::from_millis(20));
        sem.give();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn pi_mutex_provides_mutual_exclusion() {
        let m = Arc::new(PiMutex::new(0u32));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let m = m.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..500 {
                    let mut g = m.lock(2);
                    *g += 1;
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*m.lock(1), 2000);
    }

    #[test]
    fn pi_mutex_try_lock_fails_while_held() {
        let m = PiMutex::new(());
        let g = m.lock(3);
        assert!(m.try_lock(5).is_none());
        drop(g);
        assert!(m.try_lock(5).is_some());
    }
}
