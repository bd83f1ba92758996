//! Register model for the AFE board.
//!
//! The AFE exposes seven blocks of binary control registers, each driven by
//! a MAX serial-to-parallel driver behind the microcontroller bridge:
//!
//! | Block  | Function                                    |
//! |--------|---------------------------------------------|
//! | `Main` | triggers, PPS/REF source, GNSS antenna      |
//! | `Tx1`  | transmit path 1 (blanking, filter bypass)   |
//! | `Tx2`  | transmit path 2                             |
//! | `Rx1`..`Rx4` | receive channels (bias, RF input, amp, attenuators) |
//!
//! Every block has ten addresses (`0..=9`) holding a single bit each. The
//! [`RegisterModel`] is the only gate before I/O: requests are built through
//! it, so a [`RegisterWriteRequest`] that exists is always sendable.

use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

use crate::error::ValidationError;

/// Number of addressable bits in every register block.
pub const REGISTERS_PER_BLOCK: usize = 10;

/// Main-block address of the GNSS antenna select bit (`GNSS_ANT_SEL`).
pub const ANTENNA_SELECT_ADDRESS: RegisterAddress = RegisterAddress(9);

/// Rx-block address of the RF input select bit.
pub const RF_INPUT_SELECT_ADDRESS: RegisterAddress = RegisterAddress(1);

/// The process-wide register model for the current board revision.
pub static AFE_REGISTERS: RegisterModel = RegisterModel::uniform(9);

// ---------------------------------------------------------------------------
// RegisterBlock
// ---------------------------------------------------------------------------

/// A named group of registers corresponding to one hardware function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RegisterBlock {
    Main,
    Tx1,
    Tx2,
    Rx1,
    Rx2,
    Rx3,
    Rx4,
}

impl RegisterBlock {
    /// All blocks, in the order the firmware reports them in telemetry.
    pub const ALL: [RegisterBlock; 7] = [
        RegisterBlock::Main,
        RegisterBlock::Tx1,
        RegisterBlock::Tx2,
        RegisterBlock::Rx1,
        RegisterBlock::Rx2,
        RegisterBlock::Rx3,
        RegisterBlock::Rx4,
    ];

    /// Position of this block in [`ALL`](Self::ALL) and in telemetry replies.
    pub const fn index(self) -> usize {
        match self {
            RegisterBlock::Main => 0,
            RegisterBlock::Tx1 => 1,
            RegisterBlock::Tx2 => 2,
            RegisterBlock::Rx1 => 3,
            RegisterBlock::Rx2 => 4,
            RegisterBlock::Rx3 => 5,
            RegisterBlock::Rx4 => 6,
        }
    }

    /// The command tag the firmware uses for writes to this block.
    pub const fn wire_tag(self) -> &'static str {
        match self {
            RegisterBlock::Main => "MAX",
            RegisterBlock::Tx1 => "XT1",
            RegisterBlock::Tx2 => "XT2",
            RegisterBlock::Rx1 => "XR1",
            RegisterBlock::Rx2 => "XR2",
            RegisterBlock::Rx3 => "XR3",
            RegisterBlock::Rx4 => "XR4",
        }
    }

    /// The command tag the firmware uses for a shadow-register query.
    pub const fn query_tag(self) -> &'static str {
        match self {
            RegisterBlock::Main => "MA?",
            RegisterBlock::Tx1 => "XT1?",
            RegisterBlock::Tx2 => "XT2?",
            RegisterBlock::Rx1 => "XR1?",
            RegisterBlock::Rx2 => "XR2?",
            RegisterBlock::Rx3 => "XR3?",
            RegisterBlock::Rx4 => "XR4?",
        }
    }

    /// Register contents the firmware loads at power-on.
    pub const fn power_on_default(self) -> [u8; REGISTERS_PER_BLOCK] {
        match self {
            RegisterBlock::Main => [1, 1, 1, 1, 0, 0, 0, 1, 1, 0],
            RegisterBlock::Tx1 | RegisterBlock::Tx2 => [0, 1, 1, 0, 0, 0, 0, 0, 0, 0],
            _ => [0, 1, 1, 1, 0, 0, 0, 0, 0, 0],
        }
    }

    /// Whether this is one of the four receive-channel blocks.
    pub const fn is_rx(self) -> bool {
        matches!(
            self,
            RegisterBlock::Rx1 | RegisterBlock::Rx2 | RegisterBlock::Rx3 | RegisterBlock::Rx4
        )
    }
}

impl fmt::Display for RegisterBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RegisterBlock::Main => "MAIN",
            RegisterBlock::Tx1 => "TX1",
            RegisterBlock::Tx2 => "TX2",
            RegisterBlock::Rx1 => "RX1",
            RegisterBlock::Rx2 => "RX2",
            RegisterBlock::Rx3 => "RX3",
            RegisterBlock::Rx4 => "RX4",
        };
        f.write_str(name)
    }
}

impl FromStr for RegisterBlock {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "main" | "max" | "misc" => Ok(RegisterBlock::Main),
            "tx1" => Ok(RegisterBlock::Tx1),
            "tx2" => Ok(RegisterBlock::Tx2),
            "rx1" => Ok(RegisterBlock::Rx1),
            "rx2" => Ok(RegisterBlock::Rx2),
            "rx3" => Ok(RegisterBlock::Rx3),
            "rx4" => Ok(RegisterBlock::Rx4),
            _ => Err(ValidationError::InvalidBlock(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Address / value
// ---------------------------------------------------------------------------

/// A validated register address within a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegisterAddress(u8);

impl RegisterAddress {
    pub const fn get(self) -> u8 {
        self.0
    }
}

impl fmt::Display for RegisterAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A validated binary register value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegisterValue(bool);

impl RegisterValue {
    pub const LOW: RegisterValue = RegisterValue(false);
    pub const HIGH: RegisterValue = RegisterValue(true);

    pub const fn is_set(self) -> bool {
        self.0
    }

    pub const fn as_u8(self) -> u8 {
        self.0 as u8
    }
}

impl From<bool> for RegisterValue {
    fn from(bit: bool) -> Self {
        RegisterValue(bit)
    }
}

impl fmt::Display for RegisterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

// ---------------------------------------------------------------------------
// Selection / RF channel
// ---------------------------------------------------------------------------

/// Which source a select bit routes: the on-board path or the external one.
///
/// A set bit (`1`) selects the internal source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Selection {
    Internal,
    External,
}

impl Selection {
    pub const fn from_internal(select_internal: bool) -> Self {
        if select_internal {
            Selection::Internal
        } else {
            Selection::External
        }
    }

    pub const fn from_bit(bit: u8) -> Self {
        Selection::from_internal(bit != 0)
    }

    pub const fn value(self) -> RegisterValue {
        RegisterValue(matches!(self, Selection::Internal))
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selection::Internal => f.write_str("internal"),
            Selection::External => f.write_str("external"),
        }
    }
}

impl FromStr for Selection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "internal" | "int" | "i" => Ok(Selection::Internal),
            "external" | "ext" | "e" => Ok(Selection::External),
            other => Err(format!("unknown selection '{other}' (expected internal or external)")),
        }
    }
}

/// One of the four RF input channels, each backed by an Rx block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RfChannel(u8);

impl RfChannel {
    pub const ALL: [RfChannel; 4] = [RfChannel(1), RfChannel(2), RfChannel(3), RfChannel(4)];

    pub fn new(channel: u8) -> Result<Self, ValidationError> {
        if (1..=4).contains(&channel) {
            Ok(RfChannel(channel))
        } else {
            Err(ValidationError::InvalidChannel(channel))
        }
    }

    pub const fn get(self) -> u8 {
        self.0
    }

    /// The receive block that holds this channel's RF input select bit.
    pub const fn block(self) -> RegisterBlock {
        match self.0 {
            1 => RegisterBlock::Rx1,
            2 => RegisterBlock::Rx2,
            3 => RegisterBlock::Rx3,
            _ => RegisterBlock::Rx4,
        }
    }
}

impl fmt::Display for RfChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// A single-bit register write that has passed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterWriteRequest {
    block: RegisterBlock,
    address: RegisterAddress,
    value: RegisterValue,
}

impl RegisterWriteRequest {
    /// Validate `(block, address, value)` against [`AFE_REGISTERS`].
    pub fn new(block: RegisterBlock, address: u8, value: u8) -> Result<Self, ValidationError> {
        AFE_REGISTERS.write_request(block, address, value)
    }

    pub fn block(&self) -> RegisterBlock {
        self.block
    }

    pub fn address(&self) -> RegisterAddress {
        self.address
    }

    pub fn value(&self) -> RegisterValue {
        self.value
    }
}

/// A run of consecutive bits written in one frame.
///
/// `None` entries are don't-care: the device keeps its current bit there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterPatch {
    block: RegisterBlock,
    start: RegisterAddress,
    bits: Vec<Option<RegisterValue>>,
}

impl RegisterPatch {
    /// Validate a patch against [`AFE_REGISTERS`].
    pub fn new(
        block: RegisterBlock,
        start: u8,
        bits: Vec<Option<RegisterValue>>,
    ) -> Result<Self, ValidationError> {
        AFE_REGISTERS.patch(block, start, bits)
    }

    /// Parse one patch token: `0`, `1`, or `x`/`X` for don't-care.
    pub fn parse_bit(token: &str) -> Result<Option<RegisterValue>, ValidationError> {
        match token.trim() {
            "0" => Ok(Some(RegisterValue::LOW)),
            "1" => Ok(Some(RegisterValue::HIGH)),
            "x" | "X" => Ok(None),
            other => Err(ValidationError::InvalidPatch(format!(
                "bit '{other}' is not 0, 1 or x"
            ))),
        }
    }

    pub fn block(&self) -> RegisterBlock {
        self.block
    }

    pub fn start(&self) -> RegisterAddress {
        self.start
    }

    pub fn bits(&self) -> &[Option<RegisterValue>] {
        &self.bits
    }
}

// ---------------------------------------------------------------------------
// RegisterModel
// ---------------------------------------------------------------------------

/// Static description of valid addresses and values per block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterModel {
    max_address: [u8; 7],
}

impl RegisterModel {
    /// A model in which every block accepts addresses `0..=max_address`.
    pub const fn uniform(max_address: u8) -> Self {
        RegisterModel {
            max_address: [max_address; 7],
        }
    }

    pub fn address_range(&self, block: RegisterBlock) -> RangeInclusive<u8> {
        0..=self.max_address[block.index()]
    }

    pub fn is_valid_value(&self, value: u8) -> bool {
        value <= 1
    }

    pub fn address(
        &self,
        block: RegisterBlock,
        address: u8,
    ) -> Result<RegisterAddress, ValidationError> {
        let range = self.address_range(block);
        if range.contains(&address) {
            Ok(RegisterAddress(address))
        } else {
            Err(ValidationError::InvalidAddress {
                block,
                address,
                min: *range.start(),
                max: *range.end(),
            })
        }
    }

    pub fn value(&self, value: u8) -> Result<RegisterValue, ValidationError> {
        if self.is_valid_value(value) {
            Ok(RegisterValue(value == 1))
        } else {
            Err(ValidationError::InvalidValue(value))
        }
    }

    /// Validate and build a single-bit write.
    pub fn write_request(
        &self,
        block: RegisterBlock,
        address: u8,
        value: u8,
    ) -> Result<RegisterWriteRequest, ValidationError> {
        Ok(RegisterWriteRequest {
            block,
            address: self.address(block, address)?,
            value: self.value(value)?,
        })
    }

    /// Validate and build a multi-bit patch.
    pub fn patch(
        &self,
        block: RegisterBlock,
        start: u8,
        bits: Vec<Option<RegisterValue>>,
    ) -> Result<RegisterPatch, ValidationError> {
        let start_addr = self.address(block, start)?;
        if bits.is_empty() {
            return Err(ValidationError::InvalidPatch("no bits given".into()));
        }
        let end = usize::from(start) + bits.len() - 1;
        let max = *self.address_range(block).end();
        if end > usize::from(max) {
            return Err(ValidationError::InvalidPatch(format!(
                "{} bits from address {start} run past address {max}",
                bits.len()
            )));
        }
        Ok(RegisterPatch {
            block,
            start: start_addr,
            bits,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_block_accepts_zero_through_nine() {
        for block in RegisterBlock::ALL {
            assert_eq!(AFE_REGISTERS.address_range(block), 0..=9);
            for address in 0..=9 {
                assert!(AFE_REGISTERS.address(block, address).is_ok());
            }
        }
    }

    #[test]
    fn out_of_range_address_rejected() {
        for block in RegisterBlock::ALL {
            for address in [10u8, 11, 42, 255] {
                let err = AFE_REGISTERS.address(block, address).unwrap_err();
                assert_eq!(
                    err,
                    ValidationError::InvalidAddress {
                        block,
                        address,
                        min: 0,
                        max: 9
                    }
                );
            }
        }
    }

    #[test]
    fn only_binary_values_are_valid() {
        assert!(AFE_REGISTERS.is_valid_value(0));
        assert!(AFE_REGISTERS.is_valid_value(1));
        for v in 2..=255u8 {
            assert!(!AFE_REGISTERS.is_valid_value(v));
            assert_eq!(
                AFE_REGISTERS.value(v).unwrap_err(),
                ValidationError::InvalidValue(v)
            );
        }
    }

    #[test]
    fn write_request_checks_address_before_value() {
        let err = RegisterWriteRequest::new(RegisterBlock::Tx2, 10, 7).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidAddress { address: 10, .. }));
    }

    #[test]
    fn write_request_accessors() {
        let req = RegisterWriteRequest::new(RegisterBlock::Rx2, 4, 1).unwrap();
        assert_eq!(req.block(), RegisterBlock::Rx2);
        assert_eq!(req.address().get(), 4);
        assert_eq!(req.value(), RegisterValue::HIGH);
    }

    #[test]
    fn block_tokens_parse_case_insensitively() {
        assert_eq!("main".parse::<RegisterBlock>().unwrap(), RegisterBlock::Main);
        assert_eq!("MAX".parse::<RegisterBlock>().unwrap(), RegisterBlock::Main);
        assert_eq!("Tx2".parse::<RegisterBlock>().unwrap(), RegisterBlock::Tx2);
        assert_eq!("rx4".parse::<RegisterBlock>().unwrap(), RegisterBlock::Rx4);
    }

    #[test]
    fn unknown_block_token_rejected() {
        let err = "rx5".parse::<RegisterBlock>().unwrap_err();
        assert_eq!(err, ValidationError::InvalidBlock("rx5".into()));
        assert!("".parse::<RegisterBlock>().is_err());
    }

    #[test]
    fn block_index_matches_all_order() {
        for (i, block) in RegisterBlock::ALL.iter().enumerate() {
            assert_eq!(block.index(), i);
        }
    }

    #[test]
    fn wire_tags() {
        assert_eq!(RegisterBlock::Main.wire_tag(), "MAX");
        assert_eq!(RegisterBlock::Tx1.wire_tag(), "XT1");
        assert_eq!(RegisterBlock::Rx3.wire_tag(), "XR3");
        assert_eq!(RegisterBlock::Main.query_tag(), "MA?");
        assert_eq!(RegisterBlock::Rx4.query_tag(), "XR4?");
    }

    #[test]
    fn rf_channel_maps_to_rx_block() {
        assert_eq!(RfChannel::new(1).unwrap().block(), RegisterBlock::Rx1);
        assert_eq!(RfChannel::new(3).unwrap().block(), RegisterBlock::Rx3);
        assert_eq!(RfChannel::new(0).unwrap_err(), ValidationError::InvalidChannel(0));
        assert_eq!(RfChannel::new(5).unwrap_err(), ValidationError::InvalidChannel(5));
    }

    #[test]
    fn selection_bit_mapping() {
        assert_eq!(Selection::Internal.value(), RegisterValue::HIGH);
        assert_eq!(Selection::External.value(), RegisterValue::LOW);
        assert_eq!(Selection::from_bit(1), Selection::Internal);
        assert_eq!(Selection::from_bit(0), Selection::External);
        assert_eq!("ext".parse::<Selection>().unwrap(), Selection::External);
        assert!("sideways".parse::<Selection>().is_err());
    }

    #[test]
    fn patch_bits_parse() {
        assert_eq!(RegisterPatch::parse_bit("1").unwrap(), Some(RegisterValue::HIGH));
        assert_eq!(RegisterPatch::parse_bit("X").unwrap(), None);
        assert!(RegisterPatch::parse_bit("2").is_err());
    }

    #[test]
    fn patch_must_fit_in_block() {
        let bits = vec![Some(RegisterValue::HIGH); 3];
        assert!(RegisterPatch::new(RegisterBlock::Main, 7, bits.clone()).is_ok());
        let err = RegisterPatch::new(RegisterBlock::Main, 8, bits).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidPatch(_)));
    }

    #[test]
    fn empty_patch_rejected() {
        let err = RegisterPatch::new(RegisterBlock::Tx1, 0, Vec::new()).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidPatch(_)));
    }

    #[test]
    fn power_on_defaults_have_full_width() {
        for block in RegisterBlock::ALL {
            assert_eq!(block.power_on_default().len(), REGISTERS_PER_BLOCK);
        }
        // Antenna defaults to external on the current build.
        assert_eq!(
            RegisterBlock::Main.power_on_default()[ANTENNA_SELECT_ADDRESS.get() as usize],
            0
        );
    }
}
