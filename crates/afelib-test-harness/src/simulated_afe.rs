//! In-memory stand-in for the AFE bridge firmware.
//!
//! [`SimulatedAfe`] keeps shadow registers for every block and answers
//! sentences the way the bridge does: writes are applied and echoed in a
//! `$PMITSR,0,...` acknowledgement, block queries return the shadow bits,
//! `$MAX?` returns a `$PMAX` dump, and `$TELEM?` returns a housekeeping
//! dump opened by `$PTEL`. Unlike [`MockTransport`], it does not
//! care about the order requests arrive in, which makes it suitable for
//! tests with several tasks sharing one controller.
//!
//! [`MockTransport`]: crate::MockTransport

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};

use afelib_core::error::{Error, Result, ValidationError};
use afelib_core::register::{REGISTERS_PER_BLOCK, RegisterAddress, RegisterBlock};
use afelib_core::telemetry::{BlockBits, RegisterSnapshot, format_bits};
use afelib_core::transport::Transport;

// Firmware status codes.
const ERR_TOO_FEW_PARAMS: i32 = -1;
const ERR_ADDRESS_NOT_INTEGER: i32 = -2;
const ERR_ADDRESS_RANGE: i32 = -3;
const ERR_BAD_BIT: i32 = -4;
const ERR_CHECKSUM: i32 = -10;

/// A GNSS sentence the bridge forwards between replies.
const GNSS_NOISE: &str = "$GNGGA,000000.00,,,,,0,00,99.99,,,,,,*78\r\n";

/// Board clock reported in simulated housekeeping records.
pub const SIM_BOARD_EPOCH: i64 = 1_743_104_049;

#[derive(Debug)]
struct SimState {
    registers: [BlockBits; 7],
    sent: Vec<Vec<u8>>,
    telemetry_queries: u64,
    drop_every: Option<u64>,
    gnss_noise: bool,
    overlapped_sends: usize,
    reject_next: Option<i32>,
    housekeeping_queries: u64,
    imu: bool,
    fix: Option<DateTime<Utc>>,
    closed: bool,
}

impl SimState {
    fn new() -> Self {
        SimState {
            registers: RegisterBlock::ALL.map(RegisterBlock::power_on_default),
            sent: Vec::new(),
            telemetry_queries: 0,
            drop_every: None,
            gnss_noise: false,
            overlapped_sends: 0,
            reject_next: None,
            housekeeping_queries: 0,
            imu: true,
            fix: None,
            closed: false,
        }
    }
}

/// Shared view into a [`SimulatedAfe`] after it has been handed to an IO task.
#[derive(Debug, Clone)]
pub struct SimulatedAfeHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedAfeHandle {
    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current shadow register contents.
    pub fn snapshot(&self) -> std::result::Result<RegisterSnapshot, ValidationError> {
        RegisterSnapshot::new(self.lock().registers)
    }

    pub fn bit(&self, block: RegisterBlock, address: RegisterAddress) -> u8 {
        self.lock().registers[block.index()][usize::from(address.get())]
    }

    /// Change a register behind the host's back (front-panel style).
    pub fn set_bit(&self, block: RegisterBlock, address: RegisterAddress, value: u8) {
        self.lock().registers[block.index()][usize::from(address.get())] = value & 1;
    }

    /// Every frame the host has sent, in arrival order.
    pub fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.lock().sent.clone()
    }

    /// Number of `$MAX?` queries seen, answered or not.
    pub fn telemetry_queries(&self) -> u64 {
        self.lock().telemetry_queries
    }

    /// Number of `$TELEM?` queries seen.
    pub fn housekeeping_queries(&self) -> u64 {
        self.lock().housekeeping_queries
    }

    /// Fit or remove the IMU; without it a dump has no ACC/GYR records.
    pub fn set_imu(&self, fitted: bool) {
        self.lock().imu = fitted;
    }

    /// Forward a `$GNRMC` carrying `time` ahead of every reply.
    pub fn set_fix(&self, time: Option<DateTime<Utc>>) {
        self.lock().fix = time;
    }

    /// Whether the host has closed the transport.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Sends that arrived while an earlier reply had not been fully read.
    pub fn overlapped_sends(&self) -> usize {
        self.lock().overlapped_sends
    }

    /// Leave every `n`th telemetry query unanswered.
    pub fn drop_every_nth_query(&self, n: u64) {
        self.lock().drop_every = (n > 0).then_some(n);
    }

    /// Answer the next command with `$PMITSR,-1,...,<code>`.
    pub fn reject_next(&self, code: i32) {
        self.lock().reject_next = Some(code);
    }

    /// Interleave forwarded GNSS sentences with replies.
    pub fn set_gnss_noise(&self, enabled: bool) {
        self.lock().gnss_noise = enabled;
    }
}

/// A [`Transport`] backed by a simulated bridge.
pub struct SimulatedAfe {
    state: Arc<Mutex<SimState>>,
    pending: VecDeque<u8>,
    chunk_size: usize,
    connected: bool,
}

impl SimulatedAfe {
    /// A bridge with every block at its power-on default.
    pub fn new() -> Self {
        SimulatedAfe {
            state: Arc::new(Mutex::new(SimState::new())),
            pending: VecDeque::new(),
            chunk_size: usize::MAX,
            connected: true,
        }
    }

    /// Hand out replies at most `n` bytes per `receive()` call.
    pub fn with_chunk_size(mut self, n: usize) -> Self {
        self.chunk_size = n.max(1);
        self
    }

    pub fn handle(&self) -> SimulatedAfeHandle {
        SimulatedAfeHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl Default for SimulatedAfe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for SimulatedAfe {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        if !self.connected {
            return Err(Error::NotConnected);
        }

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.sent.push(data.to_vec());
        if !self.pending.is_empty() {
            state.overlapped_sends += 1;
        }

        let text = String::from_utf8_lossy(data);
        if let Some(reply) = process_sentence(&mut state, text.trim_end()) {
            if state.gnss_noise {
                self.pending.extend(GNSS_NOISE.bytes());
            }
            if let Some(time) = state.fix {
                self.pending.extend(rmc(time).bytes());
            }
            tracing::trace!(reply = %reply.trim_end(), "simulated bridge reply");
            self.pending.extend(reply.bytes());
        }
        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        if self.pending.is_empty() {
            return Err(Error::Timeout);
        }
        let n = self.pending.len().min(buf.len()).min(self.chunk_size);
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    async fn close(&mut self) -> Result<()> {
        self.connected = false;
        self.pending.clear();
        self.state.lock().unwrap_or_else(|e| e.into_inner()).closed = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

fn xor(body: &str) -> u8 {
    body.bytes().fold(0, |acc, b| acc ^ b)
}

fn sentence(body: &str) -> String {
    format!("${body}*{:02X}\r\n", xor(body))
}

fn status_ok(tlc: &str, params: &str) -> String {
    sentence(&format!("PMITSR,0,{tlc},{params}"))
}

fn status_err(tlc: &str, code: i32) -> String {
    sentence(&format!("PMITSR,-1,{tlc},{code}"))
}

fn rmc(time: DateTime<Utc>) -> String {
    sentence(&format!(
        "GNRMC,{},A,4237.38614,N,07129.34227,W,0.001,,{},,,A,V",
        time.format("%H%M%S.00"),
        time.format("%d%m%y")
    ))
}

/// `$PTEL` followed by the sensor records, in firmware order.
fn housekeeping_dump(imu: bool) -> String {
    let t = SIM_BOARD_EPOCH;
    let mut out = sentence("PTEL");
    out.push_str(&sentence(&format!("PMITMAG,{t},-21.3,4.5,-40.1")));
    out.push_str(&sentence(&format!(
        "PMITHK,{t},1,1,1,1,41.25,35.50,37.12,1,0,1,{t}"
    )));
    if imu {
        out.push_str(&sentence(&format!("PMITACC,{t},0.01,-0.02,9.81")));
        out.push_str(&sentence(&format!("PMITGYR,{t},0.00,0.01,-0.01")));
    }
    out
}

fn block_for_tag(tag: &str) -> Option<RegisterBlock> {
    RegisterBlock::ALL.into_iter().find(|b| b.wire_tag() == tag)
}

fn join_bits(bits: &BlockBits) -> String {
    bits.iter()
        .map(|b| b.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Apply one host sentence to the shadow state and build the reply line.
///
/// Returns `None` for sentences the bridge ignores and for telemetry
/// queries that are deliberately dropped.
fn process_sentence(state: &mut SimState, line: &str) -> Option<String> {
    let inner = line.strip_prefix('$')?;
    let (body, cks) = inner.split_once('*')?;
    let checksum_ok = u8::from_str_radix(cks, 16).is_ok_and(|c| c == xor(body));

    if body == "MAX?" {
        state.telemetry_queries += 1;
        if let Some(n) = state.drop_every {
            if state.telemetry_queries % n == 0 {
                tracing::debug!(query = state.telemetry_queries, "dropping telemetry query");
                return None;
            }
        }
        let groups: Vec<String> = state.registers.iter().map(format_bits).collect();
        return Some(sentence(&format!("PMAX,{}", groups.join(","))));
    }

    if body == "TELEM?" {
        state.housekeeping_queries += 1;
        return Some(housekeeping_dump(state.imu));
    }

    let command = body.strip_prefix("PMIT")?;
    if !checksum_ok {
        return Some(status_err("", ERR_CHECKSUM));
    }

    // Block query: MA?, XT1?, XR3? ...
    if let Some(tag) = command.strip_suffix('?') {
        let block = RegisterBlock::ALL
            .into_iter()
            .find(|b| b.query_tag().trim_end_matches('?') == tag)?;
        let tlc = block.query_tag();
        let tlc = if block == RegisterBlock::Main { tlc } else { tag };
        return Some(status_ok(tlc, &join_bits(&state.registers[block.index()])));
    }

    let (tag, params) = command.split_once(',').unwrap_or((command, ""));
    let block = block_for_tag(tag)?;

    if let Some(code) = state.reject_next.take() {
        return Some(status_err(tag, code));
    }

    let fields: Vec<&str> = params.split(',').filter(|f| !f.is_empty()).collect();
    if fields.len() < 2 {
        return Some(status_err(tag, ERR_TOO_FEW_PARAMS));
    }
    let Ok(start) = fields[0].parse::<usize>() else {
        return Some(status_err(tag, ERR_ADDRESS_NOT_INTEGER));
    };
    let bits = &fields[1..];
    if start >= REGISTERS_PER_BLOCK || start + bits.len() > REGISTERS_PER_BLOCK {
        return Some(status_err(tag, ERR_ADDRESS_RANGE));
    }

    let mut updated = state.registers[block.index()];
    for (slot, bit) in updated[start..].iter_mut().zip(bits) {
        match *bit {
            "0" => *slot = 0,
            "1" => *slot = 1,
            "x" | "X" => {}
            _ => return Some(status_err(tag, ERR_BAD_BIT)),
        }
    }
    state.registers[block.index()] = updated;
    Some(status_ok(tag, params))
}
