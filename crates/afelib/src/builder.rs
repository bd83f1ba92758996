//! AfeBuilder -- fluent builder for constructing [`AfeController`] instances.
//!
//! Separates configuration from construction so that callers can set up
//! the serial port, timeout, and checksum policy before the transport is
//! opened and the IO task is spawned.
//!
//! # Example
//!
//! ```no_run
//! use afelib::AfeBuilder;
//! use std::time::Duration;
//!
//! # async fn example() -> afelib::Result<()> {
//! let afe = AfeBuilder::new()
//!     .serial_port("/dev/ttyACM0")
//!     .command_timeout(Duration::from_millis(1500))
//!     .build()
//!     .await?;
//! afe.set_antenna(true).await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use afelib_core::error::{Error, Result, ValidationError};
use afelib_core::transport::Transport;
use afelib_nmea::io::{self, IoConfig};
use afelib_nmea::protocol::ChecksumPolicy;
use afelib_transport::{DEFAULT_BAUD_RATE, SerialTransport};

use crate::controller::AfeController;

/// Default time allowed for one exchange with the bridge.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(1);

/// Fluent builder for [`AfeController`].
///
/// The only required setting for [`build()`](Self::build) is the serial
/// port; everything else defaults to what the bridge firmware expects.
#[derive(Debug, Clone)]
pub struct AfeBuilder {
    serial_port: Option<String>,
    baud_rate: u32,
    command_timeout: Duration,
    checksum_policy: ChecksumPolicy,
}

impl AfeBuilder {
    pub fn new() -> Self {
        AfeBuilder {
            serial_port: None,
            baud_rate: DEFAULT_BAUD_RATE,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            checksum_policy: ChecksumPolicy::default(),
        }
    }

    /// Set the serial port path (e.g. `/dev/ttyACM0` or `COM3`).
    pub fn serial_port(mut self, port: &str) -> Self {
        self.serial_port = Some(port.to_string());
        self
    }

    /// Override the default baud rate (9600).
    pub fn baud_rate(mut self, baud: u32) -> Self {
        self.baud_rate = baud;
        self
    }

    /// Set the timeout for a single request/response exchange (default: 1s).
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Set how strictly reply checksums are enforced (default: required).
    pub fn checksum_policy(mut self, policy: ChecksumPolicy) -> Self {
        self.checksum_policy = policy;
        self
    }

    /// Build an [`AfeController`] with a caller-provided transport.
    ///
    /// This is the entry point for tests (pass a `MockTransport` or
    /// `SimulatedAfe` from `afelib-test-harness`).
    pub async fn build_with_transport(self, transport: Box<dyn Transport>) -> Result<AfeController> {
        if self.command_timeout.is_zero() {
            return Err(ValidationError::InvalidTimeout.into());
        }
        if !transport.is_connected() {
            return Err(Error::NotConnected);
        }

        tracing::debug!(
            command_timeout_ms = self.command_timeout.as_millis(),
            checksum_policy = ?self.checksum_policy,
            "starting AFE IO task"
        );
        let config = IoConfig {
            command_timeout: self.command_timeout,
            checksum_policy: self.checksum_policy,
            ..IoConfig::default()
        };
        let io = io::spawn_io_task(transport, config);
        Ok(AfeController::new(io, self.command_timeout))
    }

    /// Build an [`AfeController`] on a serial port.
    ///
    /// Requires that [`serial_port()`](Self::serial_port) has been called.
    pub async fn build(self) -> Result<AfeController> {
        let port = self
            .serial_port
            .as_deref()
            .ok_or_else(|| Error::Connection("serial_port is required for build()".into()))?;

        let transport = SerialTransport::open(port, self.baud_rate).await?;
        self.build_with_transport(Box::new(transport)).await
    }
}

impl Default for AfeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use afelib_test_harness::{MockTransport, SimulatedAfe};

    #[test]
    fn builder_defaults() {
        let builder = AfeBuilder::new();
        assert_eq!(builder.baud_rate, 9600);
        assert_eq!(builder.command_timeout, Duration::from_secs(1));
        assert_eq!(builder.checksum_policy, ChecksumPolicy::Require);
        assert!(builder.serial_port.is_none());
    }

    #[tokio::test]
    async fn builder_fluent_chain() {
        let afe = AfeBuilder::new()
            .serial_port("/dev/ttyACM0")
            .baud_rate(115_200)
            .command_timeout(Duration::from_millis(300))
            .checksum_policy(ChecksumPolicy::Lenient)
            .build_with_transport(Box::new(SimulatedAfe::new()))
            .await
            .unwrap();

        assert_eq!(afe.command_timeout(), Duration::from_millis(300));
        assert!(afe.read_telemetry().await.is_ok());
    }

    #[tokio::test]
    async fn builder_serial_port_required_for_build() {
        let result = AfeBuilder::new().build().await;
        assert!(matches!(result, Err(Error::Connection(_))));
    }

    #[tokio::test]
    async fn builder_missing_device_is_connection_error() {
        let result = AfeBuilder::new()
            .serial_port("/dev/afelib-no-such-port")
            .build()
            .await;
        assert!(matches!(result, Err(Error::Connection(_))));
    }

    #[tokio::test]
    async fn builder_rejects_closed_transport() {
        let mut mock = MockTransport::new();
        mock.set_connected(false);
        let result = AfeBuilder::new().build_with_transport(Box::new(mock)).await;
        assert!(matches!(result, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn builder_rejects_zero_timeout() {
        let result = AfeBuilder::new()
            .command_timeout(Duration::ZERO)
            .build_with_transport(Box::new(MockTransport::new()))
            .await;
        assert!(matches!(
            result,
            Err(Error::Validation(ValidationError::InvalidTimeout))
        ));
    }
}
