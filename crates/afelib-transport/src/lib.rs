//! Transport implementations for afelib.
//!
//! This crate provides the production implementation of the
//! [`Transport`](afelib_core::Transport) trait:
//!
//! - [`SerialTransport`]: the bridge's USB CDC virtual COM port (or a plain
//!   UART on bench setups)
//!
//! In-memory transports for tests live in `afelib-test-harness`.

pub mod serial;

pub use serial::{DEFAULT_BAUD_RATE, SerialTransport};
