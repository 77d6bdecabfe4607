//! Process-wide event bitset.
//!
//! Tasks advertise session phase and lifecycle through a shared bitmask and
//! block on combinations of bits. `EVENT_SHUTDOWN` is set exactly once and
//! never cleared; every long-running loop checks it each iteration, and all
//! long sleeps are expressed as bounded waits on it so shutdown propagates
//! promptly.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

pub const EVENT_NETWORK_CONNECTED: u32 = 1 << 0;
pub const EVENT_TLS_READY: u32 = 1 << 1;
pub const EVENT_MQTT_CONNECTED: u32 = 1 << 2;
pub const EVENT_DATA_READY: u32 = 1 << 3;
pub const EVENT_SHUTDOWN: u32 = 1 << 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
    /// Satisfied when any bit of the mask is set.
    Any,
    /// Satisfied only when every bit of the mask is set.
    All,
}

pub struct EventFlags {
    bits: Mutex<u32>,
    cond: Condvar,
}

impl EventFlags {
    pub fn new() -> Self {
        Self {
            bits: Mutex::new(0),
            cond: Condvar::new(),
        }
    }

    pub fn set(&self, mask: u32) {
        let mut bits = self.bits.lock();
        *bits |= mask;
        drop(bits);
        self.cond.notify_all();
    }

    pub fn clear(&self, mask: u32) {
        *self.bits.lock() &= !mask;
    }

    pub fn get(&self) -> u32 {
        *self.bits.lock()
    }

    pub fn is_set(&self, mask: u32) -> bool {
        self.get() & mask != 0
    }

    /// Block until the mask is satisfied or the timeout elapses. Returns the
    /// satisfying bit snapshot, or `None` on timeout. With `clear_on_return`
    /// the satisfying bits are cleared atomically with the wakeup.
    pub fn wait(
        &self,
        mask: u32,
        mode: WaitMode,
        clear_on_return: bool,
        timeout: Option<Duration>,
    ) -> Option<u32> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut bits = self.bits.lock();
        loop {
            let satisfied = match mode {
                WaitMode::Any => *bits & mask != 0,
                WaitMode::All => *bits & mask == mask,
            };
            if satisfied {
                let snapshot = *bits;
                if clear_on_return {
                    *bits &= !mask;
                }
                return Some(snapshot);
            }
            match deadline {
                Some(d) => {
                    if self.cond.wait_until(&mut bits, d).timed_out() {
                        let satisfied = match mode {
                            WaitMode::Any => *bits & mask != 0,
                            WaitMode::All => *bits & mask == mask,
                        };
                        if satisfied {
                            let snapshot = *bits;
                            if clear_on_return {
                                *bits &= !mask;
                            }
                            return Some(snapshot);
                        }
                        return None;
                    }
                }
                None => self.cond.wait(&mut bits),
            }
        }
    }
}

impl Default for EventFlags {
    fn default() -> Self {
        Self::new()
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn set_get_clear() {
        let ev = EventFlags::new();
        ev.set(EVENT_DATA_READY | EVENT_TLS_READY);
        assert_eq!(ev.get(), EVENT_DATA_READY | EVENT_TLS_READY);
        ev.clear(EVENT_TLS_READY);
        assert_eq!(ev.get(), EVENT_DATA_READY);
        assert!(ev.is_set(EVENT_DATA_READY));
        assert!(!ev.is_set(EVENT_TLS_READY));
    }

    #[test]
    fn wait_any_returns_immediately_when_satisfied() {
        let ev = EventFlags::new();
        ev.set(EVENT_MQTT_CONNECTED);
        let got = ev.wait(
            EVENT_MQTT_CONNECTED | EVENT_SHUTDOWN,
            WaitMode::Any,
            false,
            Some(Duration::from_millis(10)),
        );
        assert_eq!(got, Some(EVENT_MQTT_CONNECTED));
    }

    #[test]
    fn wait_all_requires_every_bit() {
        let ev = EventFlags::new();
        ev.set(EVENT_NETWORK_CONNECTED);
        assert_eq!(
            ev.wait(
                EVENT_NETWORK_CONNECTED | EVENT_MQTT_CONNECTED,
                WaitMode::All,
                false,
                Some(Duration::from_millis(20)),
            ),
            None
        );
        ev.set(EVENT_MQTT_CONNECTED);
        assert!(
            ev.wait(
                EVENT_NETWORK_CONNECTED | EVENT_MQTT_CONNECTED,
                WaitMode::All,
                false,
                Some(Duration::from_millis(20)),
            )
            .is_some()
        );
    }

    #[test]
    fn clear_on_return_consumes_the_mask() {
        let ev = EventFlags::new();
        ev.set(EVENT_DATA_READY | EVENT_SHUTDOWN);
        let got = ev.wait(EVENT_DATA_READY, WaitMode::Any, true, None);
        assert_eq!(got, Some(EVENT_DATA_READY | EVENT_SHUTDOWN));
        // Only the waited-on mask is cleared.
        assert_eq!(ev.get(), EVENT_SHUTDOWN);
    }

    #[test]
    fn waiter_wakes_when_bit_is_set_from_another_thread() {
        let ev = Arc::new(EventFlags::new());
        let ev2 = ev.clone();
        let waiter = thread::spawn(move || {
            ev2.wait(
                EVENT_SHUTDOWN,
                WaitMode::Any,
                false,
                Some(Duration::from_secs(2)),
            )
        });
        thread::sleep(Duration::from_millis(30));
        ev.set(EVENT_SHUTDOWN);
        assert!(waiter.join().unwrap().is_some());
    }
}
