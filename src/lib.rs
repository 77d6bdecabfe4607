//! # IoT Edge Gateway
//!
//! Ingests readings from simulated sensors, statistically conditions each
//! stream, applies priority- and anomaly-aware batching, opportunistically
//! protects elevated messages, and publishes them over a TLS-secured
//! MQTT 3.1.1 session.
//!
//! ## Architecture
//! - **Sensors (3x temperature, 2x humidity, 1x motion):** periodic and
//!   edge-triggered producers onto a bounded sensor queue.
//! - **Processor:** per-sensor running statistics, z-score anomaly detection,
//!   priority classification, time-bounded batching.
//! - **Security:** keystream protection of priority-elevated messages at the
//!   head of the network queue.
//! - **Network:** MQTT client state machine over a non-blocking TLS
//!   transport with reconnect and backoff.
//! - **Monitor:** read-only ANSI dashboard.
//!
//! ## Concurrency
//! One OS thread per task at a fixed priority. Progress is coordinated by
//! bounded queues and a shared event bitset; shutdown is cooperative via
//! `EVENT_SHUTDOWN`.

pub mod config;
pub mod fabric;
pub mod monitor;
pub mod net;
pub mod processing;
pub mod security;
pub mod sensors;
