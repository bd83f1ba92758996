//! # afelib -- register control and telemetry for the AFE bridge board
//!
//! `afelib` drives the analogue front end (AFE) of a GNSS receiver board
//! through its serial bridge. It can switch the antenna, select RF inputs,
//! write individual register bits and multi-bit patches, read back whole
//! register blocks and the board's housekeeping sensors, and poll all of it
//! on a fixed period.
//!
//! ## Quick Start
//!
//! ```no_run
//! use afelib::AfeBuilder;
//!
//! #[tokio::main]
//! async fn main() -> afelib::Result<()> {
//!     let afe = AfeBuilder::new()
//!         .serial_port("/dev/ttyACM0")
//!         .build()
//!         .await?;
//!
//!     afe.set_antenna(true).await?;
//!     let sample = afe.read_telemetry().await?;
//!     println!("{sample}");
//!     println!("{}", afe.read_housekeeping().await?);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! | Crate                  | Purpose                                          |
//! |------------------------|--------------------------------------------------|
//! | `afelib-core`          | Register model, telemetry types, errors, [`Transport`] |
//! | `afelib-transport`     | Serial transport for the bridge's virtual COM port |
//! | `afelib-nmea`          | Sentence codec and the serialized IO task        |
//! | `afelib-test-harness`  | Scripted mock transport and a simulated bridge   |
//! | **`afelib`**           | Controller, builder, telemetry logger and sinks  |
//!
//! Every request is checked against the [`RegisterModel`] before a byte is
//! sent. Requests from any number of tasks are queued and executed one at a
//! time, so a telemetry poll never interleaves with a register write.
//!
//! ## Telemetry logging
//!
//! [`TelemetryLogger`] polls any [`TelemetrySource`] (normally an
//! [`AfeController`] behind an `Arc`) and writes one line per poll to each
//! configured [`TelemetrySink`]. Each line carries the register sample, the
//! board's housekeeping dump, and the GNSS receiver time when one has been
//! seen. A failed poll produces a diagnostic line instead and the loop
//! continues.

pub mod builder;
pub mod controller;
pub mod logger;
pub mod sink;

pub use afelib_core::*;
pub use afelib_nmea::{ChecksumPolicy, HOUSEKEEPING_QUIET, PROTOCOL_VERSION};

pub use builder::{AfeBuilder, DEFAULT_COMMAND_TIMEOUT};
pub use controller::AfeController;
pub use logger::{
    DEFAULT_PERIOD_SECS, LoggerConfig, LoggerStats, MIN_PERIOD_SECS, TelemetryLogger,
    TelemetrySource,
};
pub use sink::{FileSink, LogEntry, MemorySink, PollOutcome, PrintSink, SinkSelection, TelemetrySink};
