//! Telemetry snapshot types.
//!
//! A [`TelemetrySample`] is built in one step from a complete
//! [`RegisterSnapshot`]; there is no way to construct a sample with some
//! blocks missing.

use std::fmt;

use crate::error::ValidationError;
use crate::register::{
    ANTENNA_SELECT_ADDRESS, REGISTERS_PER_BLOCK, RF_INPUT_SELECT_ADDRESS, RegisterAddress,
    RegisterBlock, RfChannel, Selection,
};

/// The bits of one register block, address 0 first.
pub type BlockBits = [u8; REGISTERS_PER_BLOCK];

/// Register contents of every block at one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterSnapshot {
    blocks: [BlockBits; 7],
}

impl RegisterSnapshot {
    /// Build a snapshot from rows in [`RegisterBlock::ALL`] order.
    ///
    /// Fails with [`ValidationError::InvalidValue`] on the first bit that is
    /// not `0` or `1`.
    pub fn new(blocks: [BlockBits; 7]) -> Result<Self, ValidationError> {
        if let Some(&bad) = blocks.iter().flatten().find(|&&b| b > 1) {
            return Err(ValidationError::InvalidValue(bad));
        }
        Ok(RegisterSnapshot { blocks })
    }

    /// The power-on contents of every block.
    pub fn power_on() -> Self {
        RegisterSnapshot {
            blocks: RegisterBlock::ALL.map(RegisterBlock::power_on_default),
        }
    }

    pub fn block(&self, block: RegisterBlock) -> &BlockBits {
        &self.blocks[block.index()]
    }

    pub fn bit(&self, block: RegisterBlock, address: RegisterAddress) -> u8 {
        self.blocks[block.index()][address.get() as usize]
    }

    pub fn rows(&self) -> impl Iterator<Item = (RegisterBlock, &BlockBits)> {
        RegisterBlock::ALL.into_iter().zip(self.blocks.iter())
    }
}

/// Render a block's bits as a compact string, address 0 first (`0110000000`).
pub fn format_bits(bits: &BlockBits) -> String {
    bits.iter().map(|b| if *b == 0 { '0' } else { '1' }).collect()
}

/// One complete telemetry readout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetrySample {
    antenna: Selection,
    rf_inputs: [Selection; 4],
    registers: RegisterSnapshot,
}

impl TelemetrySample {
    /// Derive the selection states from a full register snapshot.
    pub fn from_registers(registers: RegisterSnapshot) -> Self {
        let antenna = Selection::from_bit(registers.bit(RegisterBlock::Main, ANTENNA_SELECT_ADDRESS));
        let rf_inputs = RfChannel::ALL
            .map(|ch| Selection::from_bit(registers.bit(ch.block(), RF_INPUT_SELECT_ADDRESS)));
        TelemetrySample {
            antenna,
            rf_inputs,
            registers,
        }
    }

    pub fn antenna(&self) -> Selection {
        self.antenna
    }

    pub fn rf_input(&self, channel: RfChannel) -> Selection {
        self.rf_inputs[usize::from(channel.get() - 1)]
    }

    pub fn rf_inputs(&self) -> &[Selection; 4] {
        &self.rf_inputs
    }

    pub fn registers(&self) -> &RegisterSnapshot {
        &self.registers
    }
}

impl fmt::Display for TelemetrySample {
    /// Single-line form used by the print and file sinks:
    ///
    /// `antenna=external rf=[internal,internal,internal,internal] MAIN=1111000110 TX1=...`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "antenna={} rf=[{},{},{},{}]",
            self.antenna, self.rf_inputs[0], self.rf_inputs[1], self.rf_inputs[2], self.rf_inputs[3]
        )?;
        for (block, bits) in self.registers.rows() {
            write!(f, " {}={}", block, format_bits(bits))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn power_on_sample_selections() {
        let sample = TelemetrySample::from_registers(RegisterSnapshot::power_on());
        assert_eq!(sample.antenna(), Selection::External);
        for ch in RfChannel::ALL {
            assert_eq!(sample.rf_input(ch), Selection::Internal);
        }
    }

    #[test]
    fn selections_follow_register_bits() {
        let mut blocks = RegisterBlock::ALL.map(RegisterBlock::power_on_default);
        blocks[RegisterBlock::Main.index()][9] = 1;
        blocks[RegisterBlock::Rx3.index()][1] = 0;
        let sample = TelemetrySample::from_registers(RegisterSnapshot::new(blocks).unwrap());

        assert_eq!(sample.antenna(), Selection::Internal);
        assert_eq!(sample.rf_input(RfChannel::new(3).unwrap()), Selection::External);
        assert_eq!(sample.rf_input(RfChannel::new(4).unwrap()), Selection::Internal);
    }

    #[test]
    fn snapshot_rejects_non_binary_bits() {
        let mut blocks = RegisterBlock::ALL.map(RegisterBlock::power_on_default);
        blocks[RegisterBlock::Tx2.index()][4] = 2;
        assert_eq!(
            RegisterSnapshot::new(blocks),
            Err(ValidationError::InvalidValue(2))
        );

        blocks[RegisterBlock::Tx2.index()][4] = 1;
        let snap = RegisterSnapshot::new(blocks).unwrap();
        assert_eq!(snap.block(RegisterBlock::Tx2)[4], 1);
    }

    #[test]
    fn snapshot_indexing() {
        let snap = RegisterSnapshot::power_on();
        assert_eq!(snap.block(RegisterBlock::Tx2), &[0, 1, 1, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(snap.rows().count(), 7);
    }

    #[test]
    fn display_line() {
        let sample = TelemetrySample::from_registers(RegisterSnapshot::power_on());
        let line = sample.to_string();
        assert!(line.starts_with("antenna=external rf=[internal,internal,internal,internal]"));
        assert!(line.contains(" MAIN=1111000110"));
        assert!(line.contains(" TX1=0110000000"));
        assert!(line.ends_with(" RX4=0111000000"));
        assert!(!line.contains('\n'));
    }
}
