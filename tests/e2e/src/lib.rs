//! End-to-End Test Framework
//!
//! Starts real nodes on loopback TCP and WebSocket listeners and drives
//! them through the client library, the way a deployment would.

pub mod fixtures;
pub mod framework;

pub use fixtures::{Gauge, Label, Reading, SeveringConnector};
pub use framework::{loopback, test_options, within, TestNode, STEP_TIMEOUT};
