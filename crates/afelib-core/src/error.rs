//! Error types for afelib.
//!
//! All fallible operations across the library return [`Result<T>`], which
//! uses [`Error`] as the error type. Validation, transport, and protocol
//! failures are all captured here so callers can tell a rejected request
//! (no bytes sent) apart from a device that stopped answering.

use crate::register::RegisterBlock;

/// The error type for all afelib operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A request failed local validation and was never sent.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The device could not be reached when the connection was opened.
    #[error("connection error: {0}")]
    Connection(String),

    /// Writing a frame to the transport failed.
    #[error("write error: {0}")]
    Write(String),

    /// Timed out waiting for a response from the bridge.
    ///
    /// This typically indicates the board is unpowered, the wrong port was
    /// opened, or the firmware is busy forwarding GNSS data.
    #[error("timeout waiting for response")]
    Timeout,

    /// A response frame could not be decoded or was rejected by the device.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// No connection to the bridge has been established.
    #[error("not connected")]
    NotConnected,

    /// The connection to the bridge was lost unexpectedly.
    #[error("connection lost")]
    ConnectionLost,

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the session can keep going after this error.
    ///
    /// Timeouts and decode failures only cost one exchange; the next
    /// request starts from a clean buffer. Connection-level failures do not
    /// recover without reopening the port.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Validation(_) | Error::Timeout | Error::Protocol(_)
        )
    }
}

/// A request that failed the register model checks.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// The block token does not name a register block.
    #[error("invalid block '{0}' (expected main, tx1, tx2, rx1, rx2, rx3 or rx4)")]
    InvalidBlock(String),

    /// The address is outside the block's address range.
    #[error("invalid address {address} for block {block} (valid range {min}..={max})")]
    InvalidAddress {
        block: RegisterBlock,
        address: u8,
        min: u8,
        max: u8,
    },

    /// The value is not a binary register value.
    #[error("invalid register value {0} (expected 0 or 1)")]
    InvalidValue(u8),

    /// The RF input channel is outside 1..=4.
    #[error("invalid RF input channel {0} (expected 1..=4)")]
    InvalidChannel(u8),

    /// A multi-bit patch is empty or runs past the end of the block.
    #[error("invalid register patch: {0}")]
    InvalidPatch(String),

    /// The telemetry polling period is shorter than the link allows.
    #[error("invalid polling period {secs}s (minimum {min_secs}s)")]
    InvalidPeriod { secs: u64, min_secs: u64 },

    /// A zero command timeout would fail every exchange before it starts.
    #[error("command timeout must be non-zero")]
    InvalidTimeout,
}

/// A response that could not be turned into an acknowledgement or a sample.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// The bytes do not match any known sentence layout.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// The sentence checksum does not match its body.
    #[error("checksum mismatch: frame carries {received:02X}, body computes {computed:02X}")]
    ChecksumMismatch { received: u8, computed: u8 },

    /// The transport went quiet in the middle of a frame.
    #[error("incomplete frame after {received} bytes")]
    Incomplete { received: usize },

    /// The firmware answered with an error status.
    #[error("device rejected {command} with code {code}")]
    Rejected { command: String, code: i32 },

    /// A well-formed reply arrived that does not answer the request.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;
