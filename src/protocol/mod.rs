//! Wire formats for the PPPoE discovery phase.

pub mod ethernet;
pub mod pppoe;
pub mod types;

pub use types::*;
