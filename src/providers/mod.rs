//! Built-in device backends

pub mod simulated;

pub use simulated::{SIMULATED_SERIAL, SimulatedBackend};
