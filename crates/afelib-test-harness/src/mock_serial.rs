//! Scripted transport for deterministic testing of the codec and IO task.
//!
//! [`MockTransport`] implements the [`Transport`] trait with pre-loaded
//! request/response pairs, so sentence encoding, reply parsing, and error
//! paths can be exercised without a bridge attached.
//!
//! # Example
//!
//! ```
//! use afelib_test_harness::MockTransport;
//!
//! let mut mock = MockTransport::new();
//! // When the controller sends the telemetry query, answer with a dump.
//! mock.expect(
//!     b"$MAX?*6B\r\n",
//!     b"$PMAX,1111000110,0110000000,0110000000,0111000000,0111000000,0111000000,0111000000*28\r\n",
//! );
//! let sent = mock.sent_log();
//! assert!(sent.is_empty());
//! ```

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use afelib_core::error::{Error, Result};
use afelib_core::transport::Transport;

/// What the mock does once a matching request has been sent.
#[derive(Debug, Clone)]
enum Outcome {
    /// Return these bytes from subsequent `receive()` calls.
    Respond(Vec<u8>),
    /// Fail the send with `ConnectionLost` and drop the link.
    Disconnect,
}

#[derive(Debug, Clone)]
struct Expectation {
    request: Vec<u8>,
    outcome: Outcome,
}

/// Shared record of every frame sent through a [`MockTransport`].
///
/// The transport is usually boxed and moved into an IO task, so tests keep
/// a clone of this handle to inspect traffic afterwards.
#[derive(Debug, Clone, Default)]
pub struct SentLog {
    frames: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl SentLog {
    fn push(&self, frame: &[u8]) {
        if let Ok(mut frames) = self.frames.lock() {
            frames.push(frame.to_vec());
        }
    }

    /// Every `send()` payload so far, in order.
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.frames.lock().map(|f| f.clone()).unwrap_or_default()
    }

    /// Number of `send()` calls so far.
    pub fn len(&self) -> usize {
        self.frames.lock().map(|f| f.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total bytes written across all sends.
    pub fn total_bytes(&self) -> usize {
        self.frames
            .lock()
            .map(|f| f.iter().map(Vec::len).sum())
            .unwrap_or(0)
    }
}

/// A mock [`Transport`] for testing without hardware.
///
/// Expectations are consumed in order. When `send()` is called, the data is
/// logged and matched against the next expectation; its response is then
/// handed out by `receive()`. Once the response is exhausted, `receive()`
/// reports [`Error::Timeout`] immediately rather than waiting.
#[derive(Debug)]
pub struct MockTransport {
    expectations: VecDeque<Expectation>,
    pending_response: Option<Vec<u8>>,
    response_cursor: usize,
    connected: bool,
    sent_log: SentLog,
}

impl MockTransport {
    /// Create a new mock transport in the connected state.
    pub fn new() -> Self {
        MockTransport {
            expectations: VecDeque::new(),
            pending_response: None,
            response_cursor: 0,
            connected: true,
            sent_log: SentLog::default(),
        }
    }

    /// Add an expected request and the bytes the device answers with.
    pub fn expect(&mut self, request: &[u8], response: &[u8]) {
        self.expectations.push_back(Expectation {
            request: request.to_vec(),
            outcome: Outcome::Respond(response.to_vec()),
        });
    }

    /// Add an expected request that the device never answers.
    pub fn expect_timeout(&mut self, request: &[u8]) {
        self.expect(request, b"");
    }

    /// Add an expected request during which the link drops.
    pub fn expect_disconnect(&mut self, request: &[u8]) {
        self.expectations.push_back(Expectation {
            request: request.to_vec(),
            outcome: Outcome::Disconnect,
        });
    }

    /// A handle to the log of sent frames that outlives the transport.
    pub fn sent_log(&self) -> SentLog {
        self.sent_log.clone()
    }

    /// Return the number of expectations that have not yet been consumed.
    pub fn remaining_expectations(&self) -> usize {
        self.expectations.len()
    }

    /// Set the connected state of the mock transport.
    ///
    /// When set to `false`, subsequent `send()` and `receive()` calls will
    /// return [`Error::NotConnected`].
    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        if !self.connected {
            return Err(Error::NotConnected);
        }

        self.sent_log.push(data);

        let Some(expectation) = self.expectations.pop_front() else {
            return Err(Error::Write(format!(
                "no more expectations in mock transport (sent {:?})",
                String::from_utf8_lossy(data)
            )));
        };
        if data != expectation.request.as_slice() {
            return Err(Error::Write(format!(
                "unexpected send data: expected {:?}, got {:?}",
                String::from_utf8_lossy(&expectation.request),
                String::from_utf8_lossy(data)
            )));
        }

        match expectation.outcome {
            Outcome::Respond(response) => {
                self.pending_response = Some(response);
                self.response_cursor = 0;
                Ok(())
            }
            Outcome::Disconnect => {
                self.connected = false;
                Err(Error::ConnectionLost)
            }
        }
    }

    async fn receive(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
        if !self.connected {
            return Err(Error::NotConnected);
        }

        let Some(ref response) = self.pending_response else {
            return Err(Error::Timeout);
        };
        let remaining = &response[self.response_cursor..];
        if remaining.is_empty() {
            self.pending_response = None;
            self.response_cursor = 0;
            return Err(Error::Timeout);
        }
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.response_cursor += n;
        if self.response_cursor >= response.len() {
            self.pending_response = None;
            self.response_cursor = 0;
        }
        Ok(n)
    }

    async fn close(&mut self) -> Result<()> {
        self.connected = false;
        self.pending_response = None;
        self.response_cursor = 0;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
