//! Serial port transport for the AFE bridge.
//!
//! The bridge microcontroller enumerates as a USB CDC virtual COM port. The
//! line is always 8N1 without flow control; the baud rate is nominal on CDC
//! links but is still passed through for boards wired over a real UART.
//!
//! # Example
//!
//! ```no_run
//! use afelib_transport::SerialTransport;
//! use afelib_core::transport::Transport;
//! use std::time::Duration;
//!
//! # async fn example() -> afelib_core::Result<()> {
//! let mut transport = SerialTransport::open("/dev/ttyACM0", 9600).await?;
//!
//! // Ask for a register dump.
//! transport.send(b"$MAX?*6B\r\n").await?;
//!
//! let mut buf = [0u8; 256];
//! let n = transport.receive(&mut buf, Duration::from_secs(1)).await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{DataBits, FlowControl, Parity, SerialPort, SerialPortBuilderExt, SerialStream, StopBits};

use afelib_core::error::{Error, Result};
use afelib_core::transport::Transport;

/// Default line rate of the bridge firmware's UART console.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Serial link to one bridge.
pub struct SerialTransport {
    stream: Option<SerialStream>,
    /// Device path, for log fields.
    path: String,
}

impl SerialTransport {
    /// Open `path` at `baud_rate`, 8N1.
    ///
    /// `path` is an already-resolved device such as `/dev/ttyACM0` or
    /// `COM3`; finding the port that belongs to the bridge is up to the
    /// caller.
    pub async fn open(path: &str, baud_rate: u32) -> Result<Self> {
        tracing::debug!(path = %path, baud_rate, "opening bridge port");

        let mut stream = tokio_serial::new(path, baud_rate)
            .data_bits(DataBits::Eight)
            .stop_bits(StopBits::One)
            .parity(Parity::None)
            .flow_control(FlowControl::None)
            .open_native_async()
            .map_err(|e| {
                tracing::error!(path = %path, error = %e, "cannot open bridge port");
                Error::Connection(format!("cannot open {path}: {e}"))
            })?;

        // The CircuitPython CDC console only reports a connected host while
        // DTR is asserted; without it the firmware drops our sentences.
        if let Err(e) = stream.write_data_terminal_ready(true) {
            tracing::warn!(path = %path, error = %e, "could not assert DTR");
        }

        tracing::info!(path = %path, baud_rate, "bridge port open");
        Ok(SerialTransport {
            stream: Some(stream),
            path: path.to_string(),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Map an I/O failure to the transport error it represents.
fn classify_io_error(e: std::io::Error, writing: bool) -> Error {
    match e.kind() {
        std::io::ErrorKind::BrokenPipe | std::io::ErrorKind::NotConnected => Error::ConnectionLost,
        _ if writing => Error::Write(e.to_string()),
        _ => Error::Io(e),
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;
        tracing::trace!(
            path = %self.path,
            sentence = %String::from_utf8_lossy(data).trim_end(),
            "tx"
        );

        stream.write_all(data).await.map_err(|e| {
            tracing::error!(path = %self.path, error = %e, "write to bridge failed");
            classify_io_error(e, true)
        })?;
        stream.flush().await.map_err(|e| classify_io_error(e, true))
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;

        match tokio::time::timeout(timeout, stream.read(buf)).await {
            Ok(Ok(0)) => {
                tracing::warn!(path = %self.path, "bridge port hung up");
                Err(Error::ConnectionLost)
            }
            Ok(Ok(n)) => {
                tracing::trace!(
                    path = %self.path,
                    bytes = %String::from_utf8_lossy(&buf[..n]).trim_end(),
                    "rx"
                );
                Ok(n)
            }
            Ok(Err(e)) => {
                tracing::error!(path = %self.path, error = %e, "read from bridge failed");
                Err(classify_io_error(e, false))
            }
            Err(_) => Err(Error::Timeout),
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.flush().await {
                tracing::warn!(path = %self.path, error = %e, "flush before close failed");
            }
            tracing::info!(path = %self.path, "bridge port closed");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}
