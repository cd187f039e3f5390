//! Logging initialization and driver counters.

mod logging;
mod metrics;

pub use logging::{init_logging, LogConfig};
pub use metrics::{Counter, Metrics};
