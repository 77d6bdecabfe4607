//! Data processor: the single consumer of the sensor queue and the single
//! batching producer onto the network queue.
//!
//! Per reading: anomaly test against the history, statistics update, moving
//! average, classification. Motion events and anomalies go out immediately
//! with elevated priority; everything else is batched and flushed on a five
//! second cadence. All failures are diagnostic-only and no path blocks longer
//! than the bounded queue puts.

use crate::config;
use crate::fabric::{
    Counters, EVENT_DATA_READY, EVENT_MQTT_CONNECTED, EVENT_SHUTDOWN, Fabric, WaitMode,
};
use crate::processing::stats::SensorStats;
use crate::sensors::{Reading, SensorKind};
use log::debug;
use std::sync::Arc;
use std::time::Duration;

pub const PRIORITY_NORMAL: u8 = 1;
pub const PRIORITY_ELEVATED: u8 = 2;
pub const PRIORITY_HIGH: u8 = 3;

/// Wire-bound message. Owned by the network queue between producer and
/// consumer.
#[derive(Debug, Clone, Copy)]
pub struct NetMessage {
    pub reading: Reading,
    pub encrypted: bool,
    pub priority: u8,
}

impl NetMessage {
    pub fn new(reading: Reading, priority: u8) -> Self {
        Self {
            reading,
            encrypted: false,
            priority,
        }
    }
}

pub struct Processor {
    fabric: Arc<Fabric>,
    priority: u8,
    temperature: Vec<SensorStats>,
    humidity: Vec<SensorStats>,
    motion: SensorStats,
    batch: Vec<NetMessage>,
    last_flush_ms: u32,
}

impl Processor {
    pub fn new(fabric: Arc<Fabric>) -> Self {
        let last_flush_ms = fabric.clock.now_ms();
        Self {
            fabric,
            priority: config::priority::PROCESSOR,
            temperature: (0..config::NUM_TEMP_SENSORS)
                .map(|_| SensorStats::new())
                .collect(),
            humidity: (0..config::NUM_HUMIDITY_SENSORS)
                .map(|_| SensorStats::new())
                .collect(),
            motion: SensorStats::new(),
            batch: Vec::with_capacity(config::BATCH_SIZE),
            last_flush_ms,
        }
    }

    pub fn run(&mut self) {
        self.fabric.console.line(self.priority, "[DataProcessor] Started");

        // Producers and the network task may begin; first batches coincide
        // with a live session because nothing is consumed until the broker
        // acknowledged the MQTT connect.
        self.fabric.events.set(EVENT_DATA_READY);
        self.fabric.console.line(self.priority, "[DataProcessor] Waiting for MQTT session...");
        self.fabric.events.wait(
            EVENT_MQTT_CONNECTED | EVENT_SHUTDOWN,
            WaitMode::Any,
            false,
            None,
        );
        if self.fabric.shutting_down() {
            self.fabric.console.line(self.priority, "[DataProcessor] Shutting down");
            return;
        }
        self.fabric.console.line(self.priority, "[DataProcessor] MQTT session up, accepting data");

        self.last_flush_ms = self.fabric.clock.now_ms();
        loop {
            if self.fabric.shutting_down() {
                self.fabric.console.line(self.priority, "[DataProcessor] Shutting down");
                break;
            }

            let timeout = Duration::from_millis(config::PROCESSOR_DEQUEUE_TIMEOUT_MS);
            if let Some(reading) = self.fabric.sensor_q.recv(timeout) {
                self.handle(reading);
            }

            self.maybe_flush();
        }
    }

    /// Process one reading end to end.
    pub fn handle(&mut self, reading: Reading) {
        if !Self::in_declared_range(reading.kind, reading.sensor_id) {
            Counters::bump(&self.fabric.counters.readings_dropped);
            self.fabric.console.line(
                self.priority,
                &format!(
                    "[DataProcessor] Invalid sensor id {} for {}",
                    reading.sensor_id,
                    reading.kind.display()
                ),
            );
            return;
        }
        let Some(stats) = self.stats_for(reading.kind, reading.sensor_id) else {
            return;
        };

        // The test precedes the update so the sample cannot vote on itself.
        let anomaly = stats.is_anomaly(reading.value);
        stats.observe(reading.value);
        let avg = stats.moving_average();

        debug!(
            "[DataProcessor] {}[{}]: {:.2} (avg: {:.2}){}",
            reading.kind.display(),
            reading.sensor_id,
            reading.value,
            avg,
            if anomaly { " ANOMALY!" } else { "" }
        );

        if !self.fabric.latest.update(reading) {
            debug!("[DataProcessor] latest-readings cache busy, skipped");
        }
        Counters::bump(&self.fabric.counters.readings_processed);

        if reading.kind == SensorKind::Motion && reading.value > 0.5 {
            self.fabric
                .console
                .line(self.priority, "[DataProcessor] Motion event detected");
            self.emit_immediate(NetMessage::new(reading, PRIORITY_HIGH));
        } else if anomaly {
            self.fabric.console.line(
                self.priority,
                &format!(
                    "[DataProcessor] {}[{}]: {:.2} ANOMALY (avg: {:.2})",
                    reading.kind.display(),
                    reading.sensor_id,
                    reading.value,
                    avg
                ),
            );
            self.emit_immediate(NetMessage::new(reading, PRIORITY_ELEVATED));
        } else if self.batch.len() < config::BATCH_SIZE {
            self.batch.push(NetMessage::new(reading, PRIORITY_NORMAL));
        } else {
            Counters::bump(&self.fabric.counters.readings_dropped);
            self.fabric
                .console
                .line(self.priority, "[DataProcessor] Batch full, dropping reading");
        }
    }

    /// Send an elevated or high priority message now. For priority 3 against
    /// a confirmed-full queue, one eviction of the oldest message is
    /// attempted; lower priorities are dropped on back-pressure.
    fn emit_immediate(&self, msg: NetMessage) {
        let timeout = Duration::from_millis(config::IMMEDIATE_PUT_TIMEOUT_MS);
        let Err(msg) = self.fabric.network_q.send(msg, timeout) else {
            return;
        };

        if msg.priority >= PRIORITY_HIGH && self.fabric.network_q.is_full() {
            if let Some(evicted) = self.fabric.network_q.try_recv() {
                Counters::bump(&self.fabric.counters.evictions);
                self.fabric.console.line(
                    self.priority,
                    &format!(
                        "[DataProcessor] Evicted {} message for {} sensor {}",
                        evicted.priority,
                        evicted.reading.kind.as_str(),
                        evicted.reading.sensor_id
                    ),
                );
            }
            if self.fabric.network_q.try_send(msg).is_ok() {
                return;
            }
        }

        Counters::bump(&self.fabric.counters.readings_dropped);
        self.fabric.console.line(
            self.priority,
            &format!(
                "[DataProcessor] Network queue full, dropped priority {} message",
                msg.priority
            ),
        );
    }

    /// Drain the batch into the network queue once it is older than the
    /// flush interval. Best effort per message.
    pub fn maybe_flush(&mut self) {
        if self.batch.is_empty() {
            return;
        }
        let now = self.fabric.clock.now_ms();
        if now.wrapping_sub(self.last_flush_ms) <= config::BATCH_TIMEOUT_MS {
            return;
        }

        let count = self.batch.len();
        let timeout = Duration::from_millis(config::BATCH_PUT_TIMEOUT_MS);
        let mut sent = 0usize;
        for msg in self.batch.drain(..) {
            if self.fabric.network_q.send(msg, timeout).is_ok() {
                sent += 1;
            } else {
                Counters::bump(&self.fabric.counters.readings_dropped);
            }
        }
        self.last_flush_ms = now;
        Counters::bump(&self.fabric.counters.batch_flushes);
        self.fabric.console.line(
            self.priority,
            &format!("[DataProcessor] Flushed batch of {sent}/{count} messages"),
        );
    }

    fn in_declared_range(kind: SensorKind, sensor_id: u8) -> bool {
        match kind {
            SensorKind::Temperature => sensor_id < config::NUM_TEMP_SENSORS,
            SensorKind::Humidity => sensor_id < config::NUM_HUMIDITY_SENSORS,
            SensorKind::Motion => true,
        }
    }

    fn stats_for(&mut self, kind: SensorKind, sensor_id: u8) -> Option<&mut SensorStats> {
        match kind {
            SensorKind::Temperature => self.temperature.get_mut(sensor_id as usize),
            SensorKind::Humidity => self.humidity.get_mut(sensor_id as usize),
            SensorKind::Motion => Some(&mut self.motion),
        }
    }

    #[cfg(test)]
    fn batch_len(&self) -> usize {
        self.batch.len()
    }

    #[cfg(test)]
    fn force_flush_due(&mut self) {
        self.last_flush_ms = self
            .fabric
            .clock
            .now_ms()
            .wrapping_sub(config::BATCH_TIMEOUT_MS + 1000);
    }
}

// ===========================================================================
// Tests
// ===========================================================================
