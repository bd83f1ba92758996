//! Transport trait for bridge communication.
//!
//! The [`Transport`] trait abstracts over the physical link to the AFE's
//! microcontroller bridge. In production this is a USB CDC serial port; in
//! tests it is a `MockTransport` or `SimulatedAfe` from the
//! `afelib-test-harness` crate.
//!
//! The sentence codec and IO task in `afelib-nmea` operate on a `Transport`
//! rather than directly on a serial port, so the whole protocol stack can be
//! exercised without hardware.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// Asynchronous byte-level transport to the bridge.
///
/// Implementations handle buffering at the physical layer only. There is no
/// retry logic here: a failed send or an expired receive is reported to the
/// caller as-is.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send raw bytes to the bridge.
    ///
    /// Implementations should return only after all bytes have been handed
    /// to the underlying device. Failures surface as
    /// [`Error::Write`](crate::error::Error::Write) or
    /// [`Error::ConnectionLost`](crate::error::Error::ConnectionLost).
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Receive bytes from the bridge into the provided buffer.
    ///
    /// Returns the number of bytes actually read, at most `buf.len()`. Will
    /// wait up to `timeout` for data to arrive; returns
    /// [`Error::Timeout`](crate::error::Error::Timeout) if nothing arrives
    /// within the deadline.
    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Close the transport connection.
    ///
    /// After calling `close()`, subsequent `send()` and `receive()` calls
    /// should return [`Error::NotConnected`](crate::error::Error::NotConnected).
    async fn close(&mut self) -> Result<()>;

    /// Check whether the transport is currently connected.
    fn is_connected(&self) -> bool;
}
