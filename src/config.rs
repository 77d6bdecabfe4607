//! Gateway configuration.
//! All tuning lives here as compile-time constants so a build is a complete
//! description of the deployment.

pub const SYS_NAME: &str = "Embedded Gateway";

// ============================================================================
// Queues
// ============================================================================
pub const SENSOR_QUEUE_LEN: usize = 10;
pub const NETWORK_QUEUE_LEN: usize = 50;

// ============================================================================
// Broker / MQTT session
// ============================================================================
pub const MQTT_BROKER_HOST: &str = "test.mosquitto.org";
pub const MQTT_BROKER_PORT: u16 = 8883;
/// Plaintext development port, used when `USE_TLS` is disabled.
pub const MQTT_BROKER_PORT_PLAIN: u16 = 1883;
pub const MQTT_CLIENT_ID: &str = "stick_gateway";
pub const MQTT_TOPIC_BASE: &str = "iot/gateway/";
pub const MQTT_KEEPALIVE_SECS: u16 = 60;
/// Fixed size of the session's tx and rx buffers. Frames that do not fit are
/// dropped at the boundary.
pub const MQTT_BUFFER_SIZE: usize = 1024;

// ============================================================================
// Transport / TLS
// ============================================================================
pub const USE_TLS: bool = true;
/// When set, certificate verification failures end the session. When clear,
/// failures are logged with an explanation and the session proceeds.
pub const TLS_VERIFY_REQUIRED: bool = true;
pub const CA_BUNDLE_PATH: &str = "certs/mosquitto.org.crt";
pub const CA_BUNDLE_FALLBACK_PATH: &str = "certs/lets-encrypt-r3.pem";
pub const CONNECT_TIMEOUT_SECS: u64 = 10;
pub const HANDSHAKE_STEP_MS: u64 = 100;
pub const HANDSHAKE_MAX_STEPS: u32 = 50;

// ============================================================================
// Sensors
// ============================================================================
pub const NUM_TEMP_SENSORS: u8 = 3;
pub const NUM_HUMIDITY_SENSORS: u8 = 2;
pub const SENSOR_READ_INTERVAL_MS: u64 = 1000;
pub const MOTION_POLL_INTERVAL_MS: u64 = 500;
pub const SENSOR_ENQUEUE_TIMEOUT_MS: u64 = 100;

// ============================================================================
// Data processing
// ============================================================================
pub const AVERAGING_WINDOW: usize = 5;
pub const ANOMALY_Z_THRESHOLD: f32 = 3.0;
pub const BATCH_SIZE: usize = 10;
pub const BATCH_TIMEOUT_MS: u32 = 5000;
pub const PROCESSOR_DEQUEUE_TIMEOUT_MS: u64 = 100;
pub const BATCH_PUT_TIMEOUT_MS: u64 = 50;
pub const IMMEDIATE_PUT_TIMEOUT_MS: u64 = 100;
pub const LATEST_CACHE_LOCK_TIMEOUT_MS: u64 = 10;

// ============================================================================
// Security
// ============================================================================
pub const MAX_ENCRYPTED_PAYLOAD: usize = 512;
pub const KEY_ROTATION_INTERVAL_MS: u32 = 3_600_000;
pub const SECURITY_REPORT_INTERVAL_MS: u32 = 30_000;
pub const SECURITY_POLL_INTERVAL_MS: u64 = 100;

// ============================================================================
// Monitor
// ============================================================================
pub const MONITOR_REFRESH_MS: u64 = 2000;

/// Fixed task priorities, highest number wins the CPU.
pub mod priority {
    pub const MONITOR: u8 = 1;
    pub const SENSOR_LOW: u8 = 2;
    pub const SENSOR_HIGH: u8 = 3;
    pub const PROCESSOR: u8 = 4;
    pub const NETWORK: u8 = 5;
    pub const SECURITY: u8 = 6;
}
