//! afelib-core: register model, telemetry types, errors, and the transport
//! trait for afelib.
//!
//! This crate holds everything about the AFE that does not depend on how
//! bytes reach the board. The codec, the serial transport, and the
//! controller all build on these types.
//!
//! # Key types
//!
//! - [`RegisterModel`] / [`AFE_REGISTERS`] -- the only gate before I/O
//! - [`RegisterWriteRequest`] -- a validated single-bit write
//! - [`TelemetrySample`] -- a complete readout of every block
//! - [`HousekeepingReport`] / [`GnssFix`] -- board sensors and receiver time
//! - [`Transport`] -- byte-level communication channel
//! - [`Error`] / [`Result`] -- error handling

pub mod error;
pub mod housekeeping;
pub mod register;
pub mod telemetry;
pub mod transport;

// Re-export key types at crate root for ergonomic `use afelib_core::*`.
pub use error::{Error, ProtocolError, Result, ValidationError};
pub use housekeeping::{GnssFix, HousekeepingKind, HousekeepingRecord, HousekeepingReport};
pub use register::{
    AFE_REGISTERS, ANTENNA_SELECT_ADDRESS, REGISTERS_PER_BLOCK, RF_INPUT_SELECT_ADDRESS,
    RegisterAddress, RegisterBlock, RegisterModel, RegisterPatch, RegisterValue,
    RegisterWriteRequest, RfChannel, Selection,
};
pub use telemetry::{BlockBits, RegisterSnapshot, TelemetrySample, format_bits};
pub use transport::Transport;
