//! afelib-test-harness: test transports for afelib.
//!
//! - [`MockTransport`] replays scripted request/response pairs in order, for
//!   deterministic tests of the codec and IO task.
//! - [`SimulatedAfe`] emulates the bridge firmware's shadow registers and
//!   answers whatever arrives, for controller, logger and CLI tests.

pub mod mock_serial;
pub mod simulated_afe;

pub use mock_serial::{MockTransport, SentLog};
pub use simulated_afe::{SimulatedAfe, SimulatedAfeHandle};
