//! pppoed - PPPoE link driver core
//!
//! The netgraph-backed PPPoE device layer of a user-space multilink PPP
//! daemon: discovery-phase tag parsing, per-link session state machines,
//! and the shared per-interface kernel plumbing. The kernel graph and the
//! daemon's event loop are consumed through narrow traits.

pub mod config;
pub mod driver;
pub mod error;
pub mod netgraph;
pub mod protocol;
pub mod telemetry;

pub use error::{Error, Result};
