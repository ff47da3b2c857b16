//! Gateway wire protocol
//!
//! Defines the handful of JSON text frames the daemon understands on the
//! real-time connection. Everything else is passed through as opaque.

mod frames;

pub use frames::*;
