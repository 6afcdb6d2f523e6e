//! Simulated AMC100 controller.
//!
//! Holds the parameter storage, status flags, lock and identity of one
//! device and answers [`crate::protocol::Request`]s the way the controller
//! does at its interface. It backs both the in-process transport and the
//! TCP server.
//!
//! The motion model is deliberately coarse: an enabled approach completes
//! by the next request, continuous motion advances a fixed number of steps
//! per request, and travel is limited on linear and goniometer actors so
//! that end-of-travel flags can be observed.

mod device;
pub mod presets;

pub use device::{SessionId, SimulatedDevice, AXIS_COUNT};
