//! Concurrency fabric: the queues, event bitset, synchronisation primitives
//! and shared read-only services that wire the gateway tasks together.
//!
//! The `Fabric` value is constructed exactly once in `main` and handed to
//! every task behind an `Arc`. Tasks own their private state; everything
//! shared lives here.

pub mod clock;
pub mod console;
pub mod events;
pub mod queue;
pub mod sync;

pub use clock::{Periodic, TickClock};
pub use console::Console;
pub use events::{
    EVENT_DATA_READY, EVENT_MQTT_CONNECTED, EVENT_NETWORK_CONNECTED, EVENT_SHUTDOWN,
    EVENT_TLS_READY, EventFlags, WaitMode,
};
pub use queue::BoundedQueue;
pub use sync::{PiMutex, Semaphore, apply_current_priority};

use crate::config;
use crate::processing::processor::NetMessage;
use crate::sensors::{Reading, SensorKind};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Shared gateway counters. Written by the pipeline tasks, read by the
/// monitor. Plain relaxed atomics; exact cross-counter consistency is not
/// needed for a dashboard.
#[derive(Default)]
pub struct Counters {
    pub readings_processed: AtomicU64,
    pub readings_dropped: AtomicU64,
    pub batch_flushes: AtomicU64,
    pub publishes_sent: AtomicU64,
    pub publish_failures: AtomicU64,
    pub evictions: AtomicU64,
}

impl Counters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn read(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

/// Snapshot of the most recent reading per sensor, behind a short-timeout
/// lock. Writers that cannot acquire within the timeout skip the update; a
/// stale cache entry is preferable to stalling the processor.
pub struct LatestReadings {
    inner: Mutex<HashMap<(SensorKind, u8), Reading>>,
}

impl LatestReadings {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Returns false when the lock could not be taken within the timeout.
    pub fn update(&self, reading: Reading) -> bool {
        let timeout = Duration::from_millis(config::LATEST_CACHE_LOCK_TIMEOUT_MS);
        match self.inner.try_lock_for(timeout) {
            Some(mut map) => {
                map.insert((reading.kind, reading.sensor_id), reading);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, kind: SensorKind, sensor_id: u8) -> Option<Reading> {
        self.inner.lock().get(&(kind, sensor_id)).copied()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl Default for LatestReadings {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Fabric {
    pub sensor_q: BoundedQueue<Reading>,
    pub network_q: BoundedQueue<NetMessage>,
    pub events: EventFlags,
    pub console: Console,
    pub clock: TickClock,
    pub counters: Counters,
    pub latest: LatestReadings,
}

impl Fabric {
    /// Construct every shared primitive. Any failure here is fatal; the
    /// caller aborts before spawning a single task.
    pub fn new() -> Result<Self, String> {
        Ok(Self {
            sensor_q: BoundedQueue::new(config::SENSOR_QUEUE_LEN)?,
            network_q: BoundedQueue::new(config::NETWORK_QUEUE_LEN)?,
            events: EventFlags::new(),
            console: Console::new(),
            clock: TickClock::new(),
            counters: Counters::default(),
            latest: LatestReadings::new(),
        })
    }

    /// Shutdown-aware sleep: returns early (true) when `EVENT_SHUTDOWN` is
    /// raised during the wait.
    pub fn idle(&self, timeout: Duration) -> bool {
        self.events
            .wait(EVENT_SHUTDOWN, WaitMode::Any, false, Some(timeout))
            .is_some()
    }

    pub fn shutting_down(&self) -> bool {
        self.events.is_set(EVENT_SHUTDOWN)
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fabric_constructs_with_configured_capacities() {
        let fabric = Fabric::new().unwrap();
        assert_eq!(fabric.sensor_q.capacity(), config::SENSOR_QUEUE_LEN);
        assert_eq!(fabric.network_q.capacity(), config::NETWORK_QUEUE_LEN);
        assert_eq!(fabric.events.get(), 0);
    }

    #[test]
    fn idle_returns_early_on_shutdown() {
        let fabric = Fabric::new().unwrap();
        fabric.events.set(EVENT_SHUTDOWN);
        let start = std::time::Instant::now();
        assert!(fabric.idle(Duration::from_secs(5)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn latest_cache_keeps_newest_reading_per_sensor() {
        let cache = LatestReadings::new();
        let first = Reading {
            kind: SensorKind::Temperature,
            sensor_id: 1,
            value: 20.0,
            timestamp_ms: 100,
        };
        let second = Reading {
            value: 24.5,
            timestamp_ms: 1100,
            ..first
        };
        assert!(cache.update(first));
        assert!(cache.update(second));
        let got = cache.get(SensorKind::Temperature, 1).unwrap();
        assert_eq!(got.value, 24.5);
        assert_eq!(cache.len(), 1);
    }
}
