//! IO task for the AFE bridge.
//!
//! One tokio task owns the transport exclusively. Every exchange (a
//! register write, a block query, a telemetry poll) is queued on a single
//! FIFO channel and run to completion before the next frame is sent, so
//! callers on different tasks can never interleave bytes on the line or
//! steal each other's replies.
//!
//! Between exchanges the task keeps reading, discarding whatever the bridge
//! forwards on its own (GNSS sentences, periodic housekeeping), so a reply
//! is never preceded by stale bytes. The receiver time in `RMC` sentences
//! is kept, in and out of exchanges, and published through
//! [`AfeIo::last_fix`].
//!
//! The task stops when every [`AfeIo`] handle is gone, on `close`, or on
//! `shutdown`.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::debug;

use afelib_core::error::{Error, ProtocolError, Result};
use afelib_core::housekeeping::{GnssFix, HousekeepingKind, HousekeepingRecord, HousekeepingReport};
use afelib_core::transport::Transport;

use crate::protocol::{self, ChecksumPolicy, DecodeResult, Reply};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Configuration for the IO task.
#[derive(Debug, Clone)]
pub struct IoConfig {
    /// Time allowed for one send/receive exchange.
    pub command_timeout: Duration,
    /// How incoming checksums are enforced.
    pub checksum_policy: ChecksumPolicy,
    /// Receive timeout used while idle between exchanges.
    pub idle_poll: Duration,
}

impl Default for IoConfig {
    fn default() -> Self {
        IoConfig {
            command_timeout: Duration::from_secs(1),
            checksum_policy: ChecksumPolicy::Require,
            idle_poll: Duration::from_millis(100),
        }
    }
}

/// Which reply completes an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    /// A `$PMITSR` status line (writes and block queries).
    Ack,
    /// A `$PMAX` register dump (telemetry).
    Registers,
    /// `$PTEL` and the housekeeping records after it.
    Housekeeping,
}

/// A request sent from the controller to the IO task.
pub enum Request {
    /// Send one frame and wait for the matching reply.
    Exchange {
        frame: Vec<u8>,
        expect: Expect,
        reply: oneshot::Sender<Result<Reply>>,
    },
    /// Graceful shutdown; returns the transport for recovery.
    Shutdown {
        reply: oneshot::Sender<Box<dyn Transport>>,
    },
}

/// Handle to the IO task. Dropping it ends the task and closes the
/// transport once the requests already queued have been served.
pub struct AfeIo {
    /// Request queue, served strictly in order.
    tx: mpsc::Sender<Request>,
    task: JoinHandle<()>,
    fix: watch::Receiver<Option<GnssFix>>,
}

impl AfeIo {
    /// Queue one exchange and await its reply.
    ///
    /// The IO task bounds each exchange by its command timeout, so this
    /// returns once every request queued ahead of it has finished.
    pub async fn exchange(&self, frame: Vec<u8>, expect: Expect) -> Result<Reply> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Request::Exchange {
                frame,
                expect,
                reply: reply_tx,
            })
            .await
            .map_err(|_| Error::NotConnected)?;

        reply_rx.await.map_err(|_| Error::NotConnected)?
    }

    /// The latest receiver time seen on the line.
    pub fn last_fix(&self) -> Option<GnssFix> {
        *self.fix.borrow()
    }

    /// Whether the IO task is still accepting requests.
    pub fn is_running(&self) -> bool {
        !self.tx.is_closed() && !self.task.is_finished()
    }

    /// Stop the IO task and close the transport.
    ///
    /// Requests already queued are answered first; anything sent through
    /// this handle afterwards fails with [`Error::NotConnected`].
    pub async fn close(&self) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Request::Shutdown { reply: reply_tx })
            .await
            .map_err(|_| Error::NotConnected)?;
        let mut transport = reply_rx.await.map_err(|_| Error::NotConnected)?;
        transport.close().await
    }

    /// Shut down the IO task and recover the transport.
    ///
    /// Requests already queued are answered first.
    pub async fn shutdown(self) -> Result<Box<dyn Transport>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self.tx.send(Request::Shutdown { reply: reply_tx }).await;
        let transport = reply_rx.await.map_err(|_| Error::NotConnected)?;
        let _ = self.task.await;
        Ok(transport)
    }
}

// ---------------------------------------------------------------------------
// Spawn
// ---------------------------------------------------------------------------

/// Depth of the request queue.
const QUEUE_DEPTH: usize = 32;

/// Spawn the IO task. Returns the handle for queuing exchanges.
pub fn spawn_io_task(transport: Box<dyn Transport>, config: IoConfig) -> AfeIo {
    let (tx, rx) = mpsc::channel::<Request>(QUEUE_DEPTH);
    let (fix_tx, fix) = watch::channel(None);

    let task = tokio::spawn(io_loop(transport, config, rx, fix_tx));

    AfeIo { tx, task, fix }
}

// ---------------------------------------------------------------------------
// IO Loop
// ---------------------------------------------------------------------------

/// Maximum buffer size before reset to prevent unbounded growth.
/// Sentences are at most 256 bytes; 8192 leaves room for GNSS bursts.
const MAX_BUF: usize = 8192;

/// Slack on top of the command timeout before the task gives up on a
/// transport that ignores its receive deadline.
const EXCHANGE_GRACE: Duration = Duration::from_millis(500);

/// Quiet time that ends a housekeeping dump without a gyroscope record
/// (boards built without the IMU).
pub const HOUSEKEEPING_QUIET: Duration = Duration::from_millis(250);

/// The main IO loop. Runs as a spawned Tokio task.
///
/// Uses `tokio::select! { biased; }` to prioritize:
/// 1. Queued requests (a closed queue ends the task)
/// 2. Idle reading of unsolicited sentences
async fn io_loop(
    mut transport: Box<dyn Transport>,
    config: IoConfig,
    mut rx: mpsc::Receiver<Request>,
    fix_tx: watch::Sender<Option<GnssFix>>,
) {
    let mut idle_buf = Vec::new();
    let mut connected = transport.is_connected();

    loop {
        tokio::select! {
            biased;

            req = rx.recv() => {
                match req {
                    Some(Request::Exchange { frame, expect, reply }) => {
                        let result = if connected {
                            idle_buf.clear();
                            run_exchange(&mut *transport, &frame, expect, &config, &fix_tx).await
                        } else {
                            Err(Error::NotConnected)
                        };
                        if let Err(e) = &result {
                            if is_fatal(e) && connected {
                                tracing::error!(error = %e, "link to bridge lost, closing transport");
                                let _ = transport.close().await;
                                connected = false;
                            }
                        }
                        let _ = reply.send(result);
                    }
                    Some(Request::Shutdown { reply }) => {
                        debug!("AFE IO task shutdown requested");
                        let _ = reply.send(transport);
                        return;
                    }
                    None => {
                        debug!("request channel closed, exiting AFE IO task");
                        break;
                    }
                }
            }

            // Idle: drain unsolicited data from the line.
            _ = async {
                let mut buf = [0u8; 256];
                match transport.receive(&mut buf, config.idle_poll).await {
                    Ok(n) if n > 0 => {
                        idle_buf.extend_from_slice(&buf[..n]);
                        if idle_buf.len() > MAX_BUF {
                            tracing::warn!(len = idle_buf.len(), "idle buffer overflow, resetting");
                            idle_buf.clear();
                            return;
                        }
                        drain_idle_frames(&mut idle_buf, config.checksum_policy, &fix_tx);
                    }
                    Err(e) if is_fatal(&e) => {
                        tracing::error!(error = %e, "link to bridge lost while idle");
                        let _ = transport.close().await;
                        connected = false;
                    }
                    _ => {
                        // Timeout: yield briefly so the loop can check for
                        // requests.
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }, if connected => {}
        }
    }

    if connected {
        let _ = transport.close().await;
    }
}

/// Errors after which the transport cannot be used again.
fn is_fatal(e: &Error) -> bool {
    matches!(e, Error::ConnectionLost | Error::NotConnected | Error::Io(_))
}

/// Run one exchange under an overall deadline.
async fn run_exchange(
    transport: &mut dyn Transport,
    frame: &[u8],
    expect: Expect,
    config: &IoConfig,
    fix_tx: &watch::Sender<Option<GnssFix>>,
) -> Result<Reply> {
    match tokio::time::timeout(
        config.command_timeout + EXCHANGE_GRACE,
        execute_exchange(transport, frame, expect, config, fix_tx),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!("transport ignored its receive deadline");
            Err(Error::Timeout)
        }
    }
}

// ---------------------------------------------------------------------------
// Exchange execution
// ---------------------------------------------------------------------------

/// Send one frame and read until the reply it expects arrives.
///
/// There is no retry: a timeout or decode failure is returned to the caller
/// and the next exchange starts from an empty buffer.
async fn execute_exchange(
    transport: &mut dyn Transport,
    frame: &[u8],
    expect: Expect,
    config: &IoConfig,
    fix_tx: &watch::Sender<Option<GnssFix>>,
) -> Result<Reply> {
    transport.send(frame).await?;

    let deadline = tokio::time::Instant::now() + config.command_timeout;
    let mut recv_buf = [0u8; 256];
    let mut response_buf = Vec::new();
    let mut pending = Pending::new(expect);

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return pending.expire(&response_buf);
        }
        let wait = if pending.collecting() {
            remaining.min(HOUSEKEEPING_QUIET)
        } else {
            remaining
        };

        match transport.receive(&mut recv_buf, wait).await {
            Ok(n) => {
                response_buf.extend_from_slice(&recv_buf[..n]);

                if response_buf.len() > MAX_BUF {
                    tracing::warn!(len = response_buf.len(), "response buffer overflow");
                    return Err(ProtocolError::MalformedFrame(format!(
                        "no reply within {MAX_BUF} bytes"
                    ))
                    .into());
                }

                loop {
                    match protocol::decode_response(&response_buf, config.checksum_policy) {
                        DecodeResult::Frame { reply, consumed } => {
                            response_buf.drain(..consumed);
                            if let Reply::Fix(fix) = reply {
                                publish_fix(fix_tx, fix);
                                continue;
                            }
                            if let Some(result) = pending.offer(reply) {
                                return result;
                            }
                        }
                        DecodeResult::Noise(consumed) => {
                            response_buf.drain(..consumed);
                        }
                        DecodeResult::Invalid { error, consumed } => {
                            response_buf.drain(..consumed);
                            tracing::warn!(error = %error, "discarding undecodable reply");
                            return Err(error.into());
                        }
                        DecodeResult::Incomplete => break,
                    }
                }
            }
            Err(Error::Timeout) => return pending.expire(&response_buf),
            Err(e) => return Err(e),
        }
    }
}

/// The reply an exchange is waiting for, plus any housekeeping records
/// gathered so far.
struct Pending {
    expect: Expect,
    started: bool,
    records: Vec<HousekeepingRecord>,
}

impl Pending {
    fn new(expect: Expect) -> Self {
        Pending {
            expect,
            started: false,
            records: Vec::new(),
        }
    }

    /// A housekeeping dump is under way and has produced records.
    fn collecting(&self) -> bool {
        self.started && !self.records.is_empty()
    }

    /// Decide whether a decoded sentence completes the exchange.
    fn offer(&mut self, reply: Reply) -> Option<Result<Reply>> {
        match (reply, self.expect) {
            (Reply::Unsolicited { head }, _) => {
                tracing::trace!(head = %head, "skipping unsolicited sentence");
                None
            }
            (Reply::Rejected { command, code }, _) => {
                Some(Err(ProtocolError::Rejected { command, code }.into()))
            }
            (reply @ Reply::Ack { .. }, Expect::Ack)
            | (reply @ Reply::Registers(_), Expect::Registers) => Some(Ok(reply)),
            (Reply::HousekeepingStart, Expect::Housekeeping) => {
                self.started = true;
                self.records.clear();
                None
            }
            (Reply::Housekeeping(record), Expect::Housekeeping) if self.started => {
                let last = record.kind() == HousekeepingKind::Gyroscope;
                self.records.push(record);
                last.then(|| Ok(self.finish()))
            }
            (Reply::Housekeeping(record), _) => {
                tracing::trace!(kind = %record.kind(), "skipping periodic housekeeping");
                None
            }
            (other, expect) => {
                debug!(?other, ?expect, "skipping stale reply");
                None
            }
        }
    }

    /// The deadline or the quiet window passed.
    fn expire(&mut self, response_buf: &[u8]) -> Result<Reply> {
        match protocol::partial_reply_len(response_buf) {
            Some(received) => Err(ProtocolError::Incomplete { received }.into()),
            None if self.collecting() => Ok(self.finish()),
            None => Err(Error::Timeout),
        }
    }

    fn finish(&mut self) -> Reply {
        debug!(records = self.records.len(), "housekeeping dump complete");
        Reply::HousekeepingDump(HousekeepingReport::new(std::mem::take(&mut self.records)))
    }
}

fn publish_fix(fix_tx: &watch::Sender<Option<GnssFix>>, fix: GnssFix) {
    tracing::trace!(time = %fix.time, valid = fix.valid, "receiver time");
    fix_tx.send_replace(Some(fix));
}

// ---------------------------------------------------------------------------
// Idle frame processing
// ---------------------------------------------------------------------------

/// Drain complete sentences from the idle buffer.
///
/// Nothing is waiting on them; they are logged and dropped. Incomplete data
/// is left in the buffer for the next read cycle.
fn drain_idle_frames(
    buf: &mut Vec<u8>,
    policy: ChecksumPolicy,
    fix_tx: &watch::Sender<Option<GnssFix>>,
) {
    loop {
        match protocol::decode_response(buf, policy) {
            DecodeResult::Frame { reply, consumed } => {
                buf.drain(..consumed);
                match reply {
                    Reply::Unsolicited { .. } | Reply::Housekeeping(_) => {}
                    Reply::Fix(fix) => publish_fix(fix_tx, fix),
                    other => debug!(?other, "reply arrived with no exchange waiting"),
                }
            }
            DecodeResult::Noise(consumed) => {
                buf.drain(..consumed);
            }
            DecodeResult::Invalid { error, consumed } => {
                buf.drain(..consumed);
                debug!(error = %error, "undecodable sentence in idle read");
            }
            DecodeResult::Incomplete => break,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
