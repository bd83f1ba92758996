//! Sentence codec for the AFE bridge.
//!
//! The bridge firmware speaks NMEA-0183 style ASCII sentences over its CDC
//! console: `$<body>*<HH>\r\n`, where `HH` is the XOR of every body byte as
//! two uppercase hex digits. The same line also carries everything the
//! bridge forwards from the GNSS receiver, so the decoder has to pick our
//! replies out of a stream of unrelated sentences.
//!
//! | Direction | Body                              | Meaning                   |
//! |-----------|-----------------------------------|---------------------------|
//! | host      | `PMITMAX,9,1`                     | write Main address 9 = 1  |
//! | host      | `PMITXR3,1,0`                     | write Rx3 address 1 = 0   |
//! | host      | `PMITXT1,0,1,x,0`                 | patch Tx1 from address 0  |
//! | host      | `MAX?`                            | telemetry (all registers) |
//! | host      | `PMITXT2?`                        | query one block           |
//! | device    | `PMITSR,0,MAX,9,1`                | acknowledgement           |
//! | device    | `PMITSR,-1,XR3,-3`                | rejection with error code |
//! | device    | `PMAX,1111000110,0110000000,...`  | telemetry, 7 blocks       |
//! | host      | `TELEM?`                          | housekeeping dump         |
//! | device    | `PTEL`                            | housekeeping dump follows |
//! | device    | `PMITHK,1743104049,1,1,...`       | housekeeping record       |
//! | device    | `PMITMAG`/`PMITACC`/`PMITGYR,...` | sensor records            |
//!
//! The GNSS receiver's `$GNRMC`/`$GPRMC` sentences are the one kind of
//! passthrough the decoder looks into: their time stamps the telemetry log.
//!
//! The layout is fixed by the firmware. Any change to it is a breaking
//! change and must bump [`PROTOCOL_VERSION`].

use afelib_core::error::ProtocolError;
use afelib_core::housekeeping::{GnssFix, HousekeepingKind, HousekeepingRecord, HousekeepingReport};
use afelib_core::register::{REGISTERS_PER_BLOCK, RegisterBlock, RegisterPatch, RegisterWriteRequest};
use afelib_core::telemetry::{BlockBits, RegisterSnapshot};

/// Version of the firmware frame layout this codec implements.
pub const PROTOCOL_VERSION: u16 = 1;

/// Byte that starts every sentence.
pub const START: u8 = b'$';

/// Byte that separates the body from the checksum.
pub const CHECKSUM_DELIMITER: u8 = b'*';

/// Line terminator appended to every outgoing sentence.
pub const TERMINATOR: &[u8] = b"\r\n";

/// Longest sentence accepted before the terminator.
pub const MAX_SENTENCE_LEN: usize = 256;

/// Head of the firmware's status reply (`$PMITSR,...`).
pub const STATUS_HEAD: &str = "PMITSR";

/// Head of the firmware's register dump (`$PMAX,...`).
pub const REGISTERS_HEAD: &str = "PMAX";

/// Head of the marker that opens a housekeeping dump (`$PTEL`).
pub const HOUSEKEEPING_START_HEAD: &str = "PTEL";

/// Heads of the receiver's recommended-minimum sentence.
pub const RMC_HEADS: [&str; 2] = ["GNRMC", "GPRMC"];

/// How strictly incoming checksums are enforced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChecksumPolicy {
    /// Every reply must carry `*HH` and it must match.
    #[default]
    Require,
    /// Replies without `*HH` are accepted; a present checksum must match.
    Lenient,
}

/// A decoded sentence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `PMITSR,0,<command>,<params...>`
    Ack {
        command: String,
        params: Vec<String>,
    },
    /// `PMITSR,-1,<command>,<code>`
    Rejected { command: String, code: i32 },
    /// `PMAX,<block>,...` with all seven blocks present.
    Registers(RegisterSnapshot),
    /// `PTEL`: the records of a requested dump follow.
    HousekeepingStart,
    /// `PMITHK`, `PMITMAG`, `PMITACC` or `PMITGYR`.
    Housekeeping(HousekeepingRecord),
    /// A complete housekeeping dump. Assembled by the IO task from the
    /// records after `PTEL`; the decoder never returns it.
    HousekeepingDump(HousekeepingReport),
    /// A receiver time from a `GNRMC`/`GPRMC` sentence.
    Fix(GnssFix),
    /// Any other sentence on the line (GNSS passthrough).
    Unsolicited { head: String },
}

/// Result of attempting to decode one sentence from a byte buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeResult {
    /// A complete sentence was decoded.
    Frame {
        reply: Reply,
        /// Number of bytes consumed from the input buffer.
        consumed: usize,
    },
    /// One of our replies arrived but could not be decoded.
    Invalid {
        error: ProtocolError,
        consumed: usize,
    },
    /// Bytes with no sentence start; safe to drop.
    Noise(usize),
    /// The buffer does not yet contain a complete sentence.
    Incomplete,
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// XOR of every byte in `body`.
pub fn checksum(body: &[u8]) -> u8 {
    body.iter().fold(0, |acc, b| acc ^ b)
}

/// Wrap a body into a complete sentence: `$<body>*HH\r\n`.
pub fn encode_sentence(body: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 6);
    out.push(START);
    out.extend_from_slice(body.as_bytes());
    out.push(CHECKSUM_DELIMITER);
    out.extend_from_slice(format!("{:02X}", checksum(body.as_bytes())).as_bytes());
    out.extend_from_slice(TERMINATOR);
    out
}

/// Encode a single-bit register write.
pub fn encode_write(req: &RegisterWriteRequest) -> Vec<u8> {
    encode_sentence(&format!(
        "PMIT{},{},{}",
        req.block().wire_tag(),
        req.address(),
        req.value()
    ))
}

/// Encode a multi-bit patch; don't-care bits go out as `x`.
pub fn encode_patch(patch: &RegisterPatch) -> Vec<u8> {
    let mut body = format!("PMIT{},{}", patch.block().wire_tag(), patch.start());
    for bit in patch.bits() {
        body.push(',');
        match bit {
            Some(v) => body.push_str(&v.to_string()),
            None => body.push('x'),
        }
    }
    encode_sentence(&body)
}

/// The single frame that requests a full register dump.
pub fn encode_telemetry_query() -> Vec<u8> {
    encode_sentence("MAX?")
}

/// Ask the firmware to dump its housekeeping sensors.
pub fn encode_housekeeping_query() -> Vec<u8> {
    encode_sentence("TELEM?")
}

/// Request the firmware's shadow copy of one block.
pub fn encode_block_query(block: RegisterBlock) -> Vec<u8> {
    encode_sentence(&format!("PMIT{}", block.query_tag()))
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Decode one sentence from the front of `buf`.
///
/// Leading bytes before a `$` are reported as [`DecodeResult::Noise`].
/// Sentences that are not firmware replies are returned as
/// [`Reply::Unsolicited`] without checksum enforcement: the GNSS receiver
/// behind the bridge occasionally emits bad checksums and those must not
/// fail an exchange. An `RMC` sentence with a good checksum and a time
/// becomes [`Reply::Fix`].
pub fn decode_response(buf: &[u8], policy: ChecksumPolicy) -> DecodeResult {
    if buf.is_empty() {
        return DecodeResult::Incomplete;
    }

    let start = match buf.iter().position(|&b| b == START) {
        Some(0) => 0,
        Some(pos) => return DecodeResult::Noise(pos),
        None => return DecodeResult::Noise(buf.len()),
    };

    // A second `$` before the newline means the first sentence was cut off.
    let rest = &buf[start + 1..];
    let end = rest.iter().position(|&b| b == b'\n' || b == START);
    let (line, consumed, truncated) = match end {
        Some(pos) if rest[pos] == b'\n' => (&rest[..pos], start + 1 + pos + 1, false),
        Some(pos) => (&rest[..pos], start + 1 + pos, true),
        None if rest.len() > MAX_SENTENCE_LEN => {
            if !is_reply_head(sentence_head(rest)) {
                return DecodeResult::Noise(buf.len());
            }
            return DecodeResult::Invalid {
                error: ProtocolError::MalformedFrame(format!(
                    "no terminator within {} bytes",
                    MAX_SENTENCE_LEN
                )),
                consumed: buf.len(),
            };
        }
        None => return DecodeResult::Incomplete,
    };
    let line = line.strip_suffix(b"\r").unwrap_or(line);

    let head = sentence_head(line);
    if !is_reply_head(head) {
        let reply = if RMC_HEADS.contains(&head) && !truncated {
            parse_fix(line).unwrap_or_else(|| Reply::Unsolicited { head: head.to_string() })
        } else {
            Reply::Unsolicited {
                head: head.to_string(),
            }
        };
        return DecodeResult::Frame { reply, consumed };
    }

    let result = if truncated {
        Err(ProtocolError::MalformedFrame(format!(
            "{head} sentence interrupted by a new sentence"
        )))
    } else {
        parse_reply(line, policy)
    };

    match result {
        Ok(reply) => DecodeResult::Frame { reply, consumed },
        Err(error) => DecodeResult::Invalid { error, consumed },
    }
}

/// Decode a buffer that should hold exactly one reply sentence.
///
/// Unlike [`decode_response`] this treats a short buffer as an error, for
/// callers that already know the transport has nothing more to give.
pub fn decode_frame(buf: &[u8], policy: ChecksumPolicy) -> Result<Reply, ProtocolError> {
    let mut offset = 0;
    loop {
        match decode_response(&buf[offset..], policy) {
            DecodeResult::Frame {
                reply: Reply::Unsolicited { .. } | Reply::Fix(_),
                consumed,
            }
            | DecodeResult::Noise(consumed) => offset += consumed,
            DecodeResult::Frame { reply, .. } => return Ok(reply),
            DecodeResult::Invalid { error, .. } => return Err(error),
            DecodeResult::Incomplete if offset == buf.len() => {
                return Err(ProtocolError::MalformedFrame("no reply sentence".into()));
            }
            DecodeResult::Incomplete => {
                return Err(ProtocolError::Incomplete {
                    received: buf.len() - offset,
                });
            }
        }
    }
}

/// Number of buffered bytes that look like the start of one of our replies.
///
/// Used when the transport times out: a dangling `$PMITSR,0,MA` means the
/// reply was cut short, while a dangling GNSS sentence is just noise.
pub fn partial_reply_len(buf: &[u8]) -> Option<usize> {
    let pos = buf.iter().rposition(|&b| b == START)?;
    let tail = &buf[pos + 1..];
    if tail.contains(&b'\n') {
        return None;
    }
    let could_be = |head: &str| {
        let head = head.as_bytes();
        tail.starts_with(head) || head.starts_with(tail)
    };
    if REPLY_HEADS.iter().any(|h| could_be(h)) {
        Some(buf.len() - pos)
    } else {
        None
    }
}

/// Parse ten `0`/`1` parameters from a block-query acknowledgement.
pub fn parse_block_bits(params: &[String]) -> Result<BlockBits, ProtocolError> {
    if params.len() != REGISTERS_PER_BLOCK {
        return Err(ProtocolError::MalformedFrame(format!(
            "block reply has {} bits, expected {}",
            params.len(),
            REGISTERS_PER_BLOCK
        )));
    }
    let mut bits = [0u8; REGISTERS_PER_BLOCK];
    for (slot, param) in bits.iter_mut().zip(params) {
        *slot = parse_bit(param.as_bytes().first().copied(), param.len() == 1)?;
    }
    Ok(bits)
}

/// Every head the firmware answers with.
const REPLY_HEADS: [&str; 7] = [
    STATUS_HEAD,
    REGISTERS_HEAD,
    HOUSEKEEPING_START_HEAD,
    HousekeepingKind::Housekeeping.head(),
    HousekeepingKind::Magnetometer.head(),
    HousekeepingKind::Accelerometer.head(),
    HousekeepingKind::Gyroscope.head(),
];

fn is_reply_head(head: &str) -> bool {
    REPLY_HEADS.contains(&head)
}

fn sentence_head(line: &[u8]) -> &str {
    let end = line
        .iter()
        .position(|&b| b == b',' || b == CHECKSUM_DELIMITER)
        .unwrap_or(line.len());
    std::str::from_utf8(&line[..end]).unwrap_or("")
}

fn parse_bit(byte: Option<u8>, single: bool) -> Result<u8, ProtocolError> {
    match byte {
        Some(b'0') if single => Ok(0),
        Some(b'1') if single => Ok(1),
        _ => Err(ProtocolError::MalformedFrame("register bit is not 0 or 1".into())),
    }
}

/// Verify the checksum and split a sentence line into its body.
fn checked_body(line: &[u8], policy: ChecksumPolicy) -> Result<&str, ProtocolError> {
    let body = match line.iter().position(|&b| b == CHECKSUM_DELIMITER) {
        Some(star) => {
            let (body, hex) = (&line[..star], &line[star + 1..]);
            let received = std::str::from_utf8(hex)
                .ok()
                .filter(|h| h.len() == 2)
                .and_then(|h| u8::from_str_radix(h, 16).ok())
                .ok_or_else(|| {
                    ProtocolError::MalformedFrame(format!(
                        "bad checksum field '{}'",
                        String::from_utf8_lossy(hex)
                    ))
                })?;
            let computed = checksum(body);
            if received != computed {
                return Err(ProtocolError::ChecksumMismatch { received, computed });
            }
            body
        }
        None if policy == ChecksumPolicy::Lenient => line,
        None => return Err(ProtocolError::MalformedFrame("missing checksum".into())),
    };
    std::str::from_utf8(body)
        .map_err(|_| ProtocolError::MalformedFrame("sentence is not ASCII".into()))
}

fn parse_reply(line: &[u8], policy: ChecksumPolicy) -> Result<Reply, ProtocolError> {
    let body = checked_body(line, policy)?;
    let fields: Vec<&str> = body.split(',').collect();

    match fields[0] {
        STATUS_HEAD => parse_status(&fields),
        REGISTERS_HEAD => parse_registers(&fields),
        HOUSEKEEPING_START_HEAD => Ok(Reply::HousekeepingStart),
        head => match HousekeepingKind::from_head(head) {
            Some(kind) => Ok(Reply::Housekeeping(HousekeepingRecord::new(
                kind,
                fields[1..].iter().map(|s| s.to_string()).collect(),
            ))),
            None => Err(ProtocolError::MalformedFrame(format!(
                "unknown reply head '{head}'"
            ))),
        },
    }
}

/// A receiver sentence is only trusted when its checksum is present and right.
fn parse_fix(line: &[u8]) -> Option<Reply> {
    if !line.contains(&CHECKSUM_DELIMITER) {
        return None;
    }
    let body = checked_body(line, ChecksumPolicy::Require).ok()?;
    let fields: Vec<&str> = body.split(',').collect();
    GnssFix::from_rmc_fields(&fields).map(Reply::Fix)
}

fn parse_status(fields: &[&str]) -> Result<Reply, ProtocolError> {
    if fields.len() < 3 {
        return Err(ProtocolError::MalformedFrame(format!(
            "status reply has {} fields, expected at least 3",
            fields.len()
        )));
    }
    let command = fields[2].to_string();
    match fields[1] {
        "0" => Ok(Reply::Ack {
            command,
            params: fields[3..].iter().map(|s| s.to_string()).collect(),
        }),
        "-1" => {
            let code = fields
                .get(3)
                .and_then(|c| c.parse::<i32>().ok())
                .ok_or_else(|| {
                    ProtocolError::MalformedFrame("rejection without an error code".into())
                })?;
            Ok(Reply::Rejected { command, code })
        }
        other => Err(ProtocolError::MalformedFrame(format!(
            "unknown status '{other}'"
        ))),
    }
}

fn parse_registers(fields: &[&str]) -> Result<Reply, ProtocolError> {
    let groups = &fields[1..];
    if groups.len() != RegisterBlock::ALL.len() {
        return Err(ProtocolError::MalformedFrame(format!(
            "register dump has {} blocks, expected {}",
            groups.len(),
            RegisterBlock::ALL.len()
        )));
    }

    let mut blocks = [[0u8; REGISTERS_PER_BLOCK]; 7];
    for (row, group) in blocks.iter_mut().zip(groups) {
        if group.len() != REGISTERS_PER_BLOCK {
            return Err(ProtocolError::MalformedFrame(format!(
                "register group '{group}' is not {REGISTERS_PER_BLOCK} bits"
            )));
        }
        for (slot, b) in row.iter_mut().zip(group.bytes()) {
            *slot = parse_bit(Some(b), true)?;
        }
    }
    RegisterSnapshot::new(blocks)
        .map(Reply::Registers)
        .map_err(|e| ProtocolError::MalformedFrame(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use afelib_core::register::{RegisterValue, Selection};
    use afelib_core::telemetry::TelemetrySample;

    const POWER_ON_DUMP: &str =
        "PMAX,1111000110,0110000000,0110000000,0111000000,0111000000,0111000000,0111000000";

    fn sentence(body: &str) -> Vec<u8> {
        encode_sentence(body)
    }

    // -----------------------------------------------------------------------
    // Encoding
    // -----------------------------------------------------------------------

    #[test]
    fn checksum_is_xor_of_body() {
        assert_eq!(checksum(b""), 0);
        assert_eq!(checksum(b"A"), 0x41);
        assert_eq!(checksum(b"MAX?"), 0x6B);
    }

    #[test]
    fn telemetry_query_frame() {
        assert_eq!(encode_telemetry_query(), b"$MAX?*6B\r\n");
    }

    #[test]
    fn write_frames_per_block() {
        let req = RegisterWriteRequest::new(RegisterBlock::Main, 9, 1).unwrap();
        let frame = encode_write(&req);
        let body = "PMITMAX,9,1";
        assert_eq!(
            frame,
            format!("${body}*{:02X}\r\n", checksum(body.as_bytes())).into_bytes()
        );

        let req = RegisterWriteRequest::new(RegisterBlock::Rx3, 1, 0).unwrap();
        assert!(encode_write(&req).starts_with(b"$PMITXR3,1,0*"));

        let req = RegisterWriteRequest::new(RegisterBlock::Tx2, 0, 1).unwrap();
        assert!(encode_write(&req).starts_with(b"$PMITXT2,0,1*"));
    }

    #[test]
    fn encoding_is_deterministic() {
        let req = RegisterWriteRequest::new(RegisterBlock::Rx4, 5, 1).unwrap();
        assert_eq!(encode_write(&req), encode_write(&req));
    }

    #[test]
    fn patch_frame_uses_x_for_dont_care() {
        let patch = RegisterPatch::new(
            RegisterBlock::Tx1,
            2,
            vec![Some(RegisterValue::HIGH), None, Some(RegisterValue::LOW)],
        )
        .unwrap();
        assert!(encode_patch(&patch).starts_with(b"$PMITXT1,2,1,x,0*"));
    }

    #[test]
    fn housekeeping_query_frame() {
        assert_eq!(encode_housekeeping_query(), sentence("TELEM?"));
        assert!(encode_housekeeping_query().starts_with(b"$TELEM?*"));
    }

    #[test]
    fn block_query_frames() {
        assert!(encode_block_query(RegisterBlock::Main).starts_with(b"$PMITMA?*"));
        assert!(encode_block_query(RegisterBlock::Rx2).starts_with(b"$PMITXR2?*"));
    }

    // -----------------------------------------------------------------------
    // Decoding -- replies
    // -----------------------------------------------------------------------

    #[test]
    fn decode_ack() {
        let buf = sentence("PMITSR,0,MAX,9,1");
        match decode_response(&buf, ChecksumPolicy::Require) {
            DecodeResult::Frame { reply, consumed } => {
                assert_eq!(consumed, buf.len());
                assert_eq!(
                    reply,
                    Reply::Ack {
                        command: "MAX".into(),
                        params: vec!["9".into(), "1".into()],
                    }
                );
            }
            other => panic!("expected Frame, got {other:?}"),
        }
    }

    #[test]
    fn decode_rejection() {
        let buf = sentence("PMITSR,-1,XR3,-3");
        assert_eq!(
            decode_frame(&buf, ChecksumPolicy::Require).unwrap(),
            Reply::Rejected {
                command: "XR3".into(),
                code: -3
            }
        );
    }

    #[test]
    fn decode_register_dump() {
        let buf = sentence(POWER_ON_DUMP);
        let reply = decode_frame(&buf, ChecksumPolicy::Require).unwrap();
        let Reply::Registers(snapshot) = reply else {
            panic!("expected Registers");
        };
        assert_eq!(snapshot, RegisterSnapshot::power_on());
        let sample = TelemetrySample::from_registers(snapshot);
        assert_eq!(sample.antenna(), Selection::External);
    }

    #[test]
    fn every_valid_write_round_trips_through_an_ack() {
        for block in RegisterBlock::ALL {
            for address in 0..=9u8 {
                for value in 0..=1u8 {
                    let req = RegisterWriteRequest::new(block, address, value).unwrap();
                    let frame = encode_write(&req);
                    assert!(frame.ends_with(TERMINATOR));

                    let ack = sentence(&format!(
                        "PMITSR,0,{},{},{}",
                        block.wire_tag(),
                        address,
                        value
                    ));
                    let reply = decode_frame(&ack, ChecksumPolicy::Require).unwrap();
                    assert!(matches!(reply, Reply::Ack { .. }));
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Decoding -- failures
    // -----------------------------------------------------------------------

    #[test]
    fn checksum_mismatch_detected() {
        let buf = b"$PMITSR,0,MAX,9,1*00\r\n";
        let computed = checksum(b"PMITSR,0,MAX,9,1");
        assert_eq!(
            decode_frame(buf, ChecksumPolicy::Require).unwrap_err(),
            ProtocolError::ChecksumMismatch {
                received: 0,
                computed
            }
        );
        // Lenient mode still rejects a wrong checksum.
        assert!(matches!(
            decode_frame(buf, ChecksumPolicy::Lenient).unwrap_err(),
            ProtocolError::ChecksumMismatch { .. }
        ));
    }

    #[test]
    fn missing_checksum_depends_on_policy() {
        let buf = b"$PMITSR,0,MAX,9,1\r\n";
        assert!(matches!(
            decode_frame(buf, ChecksumPolicy::Require).unwrap_err(),
            ProtocolError::MalformedFrame(_)
        ));
        assert!(matches!(
            decode_frame(buf, ChecksumPolicy::Lenient).unwrap(),
            Reply::Ack { .. }
        ));
    }

    #[test]
    fn short_register_dump_is_malformed() {
        let buf = sentence("PMAX,1111000110,0110000000");
        assert!(matches!(
            decode_frame(&buf, ChecksumPolicy::Require).unwrap_err(),
            ProtocolError::MalformedFrame(_)
        ));
    }

    #[test]
    fn non_binary_register_bit_is_malformed() {
        let buf = sentence(
            "PMAX,1111000112,0110000000,0110000000,0111000000,0111000000,0111000000,0111000000",
        );
        assert!(matches!(
            decode_frame(&buf, ChecksumPolicy::Require).unwrap_err(),
            ProtocolError::MalformedFrame(_)
        ));
    }

    #[test]
    fn unknown_status_is_malformed() {
        let buf = sentence("PMITSR,7,MAX");
        assert!(matches!(
            decode_frame(&buf, ChecksumPolicy::Require).unwrap_err(),
            ProtocolError::MalformedFrame(_)
        ));
    }

    #[test]
    fn partial_frame_is_incomplete_not_malformed() {
        let full = sentence(POWER_ON_DUMP);
        let partial = &full[..full.len() / 2];
        assert_eq!(decode_response(partial, ChecksumPolicy::Require), DecodeResult::Incomplete);
        assert_eq!(
            decode_frame(partial, ChecksumPolicy::Require).unwrap_err(),
            ProtocolError::Incomplete {
                received: partial.len()
            }
        );
    }

    #[test]
    fn overlong_sentence_is_malformed() {
        let mut buf = b"$PMAX,".to_vec();
        buf.extend(std::iter::repeat_n(b'1', MAX_SENTENCE_LEN + 10));
        match decode_response(&buf, ChecksumPolicy::Require) {
            DecodeResult::Invalid { error, consumed } => {
                assert!(matches!(error, ProtocolError::MalformedFrame(_)));
                assert_eq!(consumed, buf.len());
            }
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[test]
    fn overlong_foreign_sentence_is_noise() {
        let mut buf = b"$GNGSV,".to_vec();
        buf.extend(std::iter::repeat_n(b'9', MAX_SENTENCE_LEN + 10));
        assert_eq!(
            decode_response(&buf, ChecksumPolicy::Require),
            DecodeResult::Noise(buf.len())
        );
    }

    #[test]
    fn interrupted_reply_is_malformed() {
        let mut buf = b"$PMITSR,0,MA".to_vec();
        buf.extend(sentence("GNRMC,,V"));
        match decode_response(&buf, ChecksumPolicy::Require) {
            DecodeResult::Invalid { error, consumed } => {
                assert!(matches!(error, ProtocolError::MalformedFrame(_)));
                assert_eq!(consumed, 12);
            }
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    // -----------------------------------------------------------------------
    // Decoding -- line noise and passthrough
    // -----------------------------------------------------------------------

    #[test]
    fn gnss_passthrough_is_unsolicited() {
        let buf = b"$GNRMC,123519,A,4807.038,N*FF\r\n";
        match decode_response(buf, ChecksumPolicy::Require) {
            DecodeResult::Frame {
                reply: Reply::Unsolicited { head },
                consumed,
            } => {
                assert_eq!(head, "GNRMC");
                assert_eq!(consumed, buf.len());
            }
            other => panic!("expected Unsolicited, got {other:?}"),
        }
    }

    #[test]
    fn leading_noise_is_reported() {
        let mut buf = b"\x00\xB5b".to_vec();
        buf.extend(sentence("PMITSR,0,MAX,9,1"));
        assert_eq!(decode_response(&buf, ChecksumPolicy::Require), DecodeResult::Noise(3));
        assert_eq!(decode_response(b"\r\n", ChecksumPolicy::Require), DecodeResult::Noise(2));
    }

    #[test]
    fn decode_frame_skips_passthrough() {
        let mut buf = sentence("PGPS");
        buf.extend(b"$GNGGA,,,,*55\r\n");
        buf.extend(sentence("PGPN"));
        buf.extend(sentence("PMITSR,0,XT1,3,0"));
        assert!(matches!(
            decode_frame(&buf, ChecksumPolicy::Require).unwrap(),
            Reply::Ack { command, .. } if command == "XT1"
        ));
    }

    #[test]
    fn decode_housekeeping_sentences() {
        assert_eq!(
            decode_frame(&sentence("PTEL"), ChecksumPolicy::Require).unwrap(),
            Reply::HousekeepingStart
        );
        let reply = decode_frame(
            &sentence("PMITHK,1743104049,1,1,1,1,41.25,35.50,37.12,1,0,1,1743104049"),
            ChecksumPolicy::Require,
        )
        .unwrap();
        let Reply::Housekeeping(record) = reply else {
            panic!("expected Housekeeping, got {reply:?}");
        };
        assert_eq!(record.kind(), HousekeepingKind::Housekeeping);
        assert_eq!(record.fields().len(), 12);
        assert_eq!(record.epoch(), Some(1_743_104_049));

        let reply = decode_frame(&sentence("PMITGYR,1743104049,0.00,0.01,-0.01"), ChecksumPolicy::Require)
            .unwrap();
        assert!(matches!(reply, Reply::Housekeeping(r) if r.kind() == HousekeepingKind::Gyroscope));
    }

    #[test]
    fn housekeeping_checksum_is_enforced() {
        assert!(matches!(
            decode_frame(b"$PMITHK,1743104049,1*00\r\n", ChecksumPolicy::Require).unwrap_err(),
            ProtocolError::ChecksumMismatch { .. }
        ));
    }

    #[test]
    fn rmc_with_time_is_a_fix() {
        let buf = sentence("GNRMC,193409.00,A,4237.38614,N,07129.34227,W,0.001,,270325,,,A,V");
        match decode_response(&buf, ChecksumPolicy::Require) {
            DecodeResult::Frame {
                reply: Reply::Fix(fix),
                consumed,
            } => {
                assert_eq!(consumed, buf.len());
                assert!(fix.valid);
                assert_eq!(fix.time.to_rfc3339(), "2025-03-27T19:34:09+00:00");
            }
            other => panic!("expected Fix, got {other:?}"),
        }
    }

    #[test]
    fn untrusted_rmc_stays_unsolicited() {
        // Wrong checksum, missing checksum, no time yet.
        let bad = b"$GNRMC,193409.00,A,4237.38614,N,07129.34227,W,0.001,,270325,,,A,V*00\r\n";
        let bare = b"$GNRMC,193409.00,A,4237.38614,N,07129.34227,W,0.001,,270325,,,A,V\r\n";
        let empty = sentence("GNRMC,,V,,,,,,,,,,N");
        for buf in [&bad[..], &bare[..], &empty[..]] {
            assert!(matches!(
                decode_response(buf, ChecksumPolicy::Lenient),
                DecodeResult::Frame {
                    reply: Reply::Unsolicited { .. },
                    ..
                }
            ));
        }
    }

    #[test]
    fn decode_frame_skips_fixes() {
        let mut buf = sentence("GNRMC,193409.00,A,4237.38614,N,07129.34227,W,0.001,,270325,,,A,V");
        buf.extend(sentence("PMITSR,0,MAX,9,1"));
        assert!(matches!(
            decode_frame(&buf, ChecksumPolicy::Require).unwrap(),
            Reply::Ack { .. }
        ));
    }

    #[test]
    fn partial_reply_detection() {
        assert_eq!(partial_reply_len(b"$PMITSR,0,M"), Some(11));
        assert_eq!(partial_reply_len(b"$PM"), Some(3));
        assert_eq!(partial_reply_len(b"$"), Some(1));
        assert_eq!(partial_reply_len(b"$GNGGA,12"), None);
        assert_eq!(partial_reply_len(b"$PMITHK,17431"), Some(13));
        assert_eq!(partial_reply_len(b"$PTE"), Some(4));
        assert_eq!(partial_reply_len(&sentence("PMITSR,0,MAX,9,1")), None);
        assert_eq!(partial_reply_len(b""), None);
    }

    #[test]
    fn block_bits_from_ack_params() {
        let params: Vec<String> = "0,1,1,0,0,0,0,0,0,1".split(',').map(String::from).collect();
        assert_eq!(parse_block_bits(&params).unwrap(), [0, 1, 1, 0, 0, 0, 0, 0, 0, 1]);

        let short: Vec<String> = vec!["1".into(); 9];
        assert!(parse_block_bits(&short).is_err());

        let mut bad = params.clone();
        bad[3] = "x".into();
        assert!(parse_block_bits(&bad).is_err());
    }
}
