//! Simulated sensor producers.
//!
//! Temperature and humidity sensors release periodically on an absolute
//! schedule; the motion sensor polls and emits only on state transitions,
//! inserting them at the front of the sensor queue so they bypass pending
//! bulk readings. Producers never block indefinitely: enqueue waits are
//! bounded at 100 ms and a timeout is a logged drop.

use crate::config;
use crate::fabric::{Counters, Fabric, Periodic};
use rand::random_range;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorKind {
    Temperature,
    Humidity,
    Motion,
}

impl SensorKind {
    /// Topic segment for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorKind::Temperature => "temperature",
            SensorKind::Humidity => "humidity",
            SensorKind::Motion => "motion",
        }
    }

    pub fn display(&self) -> &'static str {
        match self {
            SensorKind::Temperature => "Temperature",
            SensorKind::Humidity => "Humidity",
            SensorKind::Motion => "Motion",
        }
    }

    /// Numeric code used in the compact security status string.
    pub fn wire_code(&self) -> u8 {
        match self {
            SensorKind::Temperature => 0,
            SensorKind::Humidity => 1,
            SensorKind::Motion => 2,
        }
    }
}

/// One sample. Immutable once produced; ownership moves into the sensor
/// queue.
#[derive(Debug, Clone, Copy)]
pub struct Reading {
    pub kind: SensorKind,
    pub sensor_id: u8,
    pub value: f32,
    pub timestamp_ms: u32,
}

// ============================================================================
// Simulation models
// ============================================================================

const TEMP_BASE: f32 = 20.0;
const TEMP_NOISE: f32 = 2.5;
const HUMIDITY_BASE: f32 = 50.0;
const HUMIDITY_NOISE: f32 = 10.0;
const MOTION_PROBABILITY: f32 = 0.3;

/// Per-sensor base plus uniform noise plus a slow sinusoidal drift.
pub fn simulate_temperature(sensor_id: u8, now_ms: u32) -> f32 {
    let base = TEMP_BASE + 2.0 * sensor_id as f32;
    let noise = random_range(-TEMP_NOISE..TEMP_NOISE);
    let seasonal = (now_ms as f32 / 60_000.0).sin() * 3.0;
    base + noise + seasonal
}

pub fn simulate_humidity(sensor_id: u8) -> f32 {
    HUMIDITY_BASE + 5.0 * sensor_id as f32 + random_range(-HUMIDITY_NOISE..HUMIDITY_NOISE)
}

pub fn simulate_motion() -> bool {
    rand::random::<f32>() < MOTION_PROBABILITY
}

// ============================================================================
// Producer tasks
// ============================================================================

/// Periodic producer for temperature and humidity. The sensor index is an
/// explicit configuration value, one task per physical sensor.
pub struct PeriodicSensor {
    kind: SensorKind,
    sensor_id: u8,
    period: Duration,
    priority: u8,
    fabric: Arc<Fabric>,
}

impl PeriodicSensor {
    pub fn temperature(sensor_id: u8, fabric: Arc<Fabric>) -> Self {
        Self {
            kind: SensorKind::Temperature,
            sensor_id,
            period: Duration::from_millis(config::SENSOR_READ_INTERVAL_MS),
            priority: config::priority::SENSOR_LOW,
            fabric,
        }
    }

    pub fn humidity(sensor_id: u8, fabric: Arc<Fabric>) -> Self {
        Self {
            kind: SensorKind::Humidity,
            sensor_id,
            period: Duration::from_millis(config::SENSOR_READ_INTERVAL_MS * 2),
            priority: config::priority::SENSOR_LOW,
            fabric,
        }
    }

    fn label(&self) -> String {
        match self.kind {
            SensorKind::Temperature => format!("TempSensor{}", self.sensor_id),
            SensorKind::Humidity => format!("HumidSensor{}", self.sensor_id),
            SensorKind::Motion => "MotionSensor".into(),
        }
    }

    pub fn run(&self) {
        let label = self.label();
        self.fabric
            .console
            .line(self.priority, &format!("[{label}] Started"));

        let mut schedule = Periodic::new(self.period);
        loop {
            if self.fabric.shutting_down() {
                break;
            }

            let now_ms = self.fabric.clock.now_ms();
            let value = match self.kind {
                SensorKind::Temperature => simulate_temperature(self.sensor_id, now_ms),
                SensorKind::Humidity => simulate_humidity(self.sensor_id),
                SensorKind::Motion => unreachable!("motion runs in MotionSensor"),
            };

            let reading = Reading {
                kind: self.kind,
                sensor_id: self.sensor_id,
                value,
                timestamp_ms: now_ms,
            };

            let timeout = Duration::from_millis(config::SENSOR_ENQUEUE_TIMEOUT_MS);
            if self.fabric.sensor_q.send(reading, timeout).is_err() {
                Counters::bump(&self.fabric.counters.readings_dropped);
                self.fabric
                    .console
                    .line(self.priority, &format!("[{label}] Queue full, dropping reading"));
            }

            schedule.wait();
        }

        log::debug!("[{label}] stopped");
    }
}

/// Edge-triggered motion producer. Emits one reading per transition and
/// inserts it at the front of the sensor queue.
pub struct MotionSensor {
    priority: u8,
    fabric: Arc<Fabric>,
}

impl MotionSensor {
    pub fn new(fabric: Arc<Fabric>) -> Self {
        Self {
            priority: config::priority::SENSOR_HIGH,
            fabric,
        }
    }

    pub fn run(&self) {
        self.fabric
            .console
            .line(self.priority, "[MotionSensor] Started");

        let mut last_motion = false;
        let mut schedule = Periodic::new(Duration::from_millis(config::MOTION_POLL_INTERVAL_MS));
        loop {
            if self.fabric.shutting_down() {
                break;
            }

            let motion = simulate_motion();
            if motion != last_motion {
                let reading = Reading {
                    kind: SensorKind::Motion,
                    sensor_id: 0,
                    value: if motion { 1.0 } else { 0.0 },
                    timestamp_ms: self.fabric.clock.now_ms(),
                };

                let timeout = Duration::from_millis(config::SENSOR_ENQUEUE_TIMEOUT_MS);
                if self.fabric.sensor_q.send_front(reading, timeout).is_ok() {
                    self.fabric.console.line(
                        self.priority,
                        &format!(
                            "[MotionSensor] Motion {}",
                            if motion { "DETECTED" } else { "CLEARED" }
                        ),
                    );
                } else {
                    Counters::bump(&self.fabric.counters.readings_dropped);
                    self.fabric
                        .console
                        .line(self.priority, "[MotionSensor] Failed to send motion event");
                }

                last_motion = motion;
            }

            schedule.wait();
        }

        log::debug!("[MotionSensor] stopped");
    }
}

// ===========================================================================
// Tests
// ===========================================================================
