//! Statistical conditioning and priority-aware batching of sensor streams.

pub mod processor;
pub mod stats;

pub use processor::{NetMessage, PRIORITY_ELEVATED, PRIORITY_HIGH, PRIORITY_NORMAL, Processor};
pub use stats::SensorStats;
