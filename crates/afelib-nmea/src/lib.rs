//! Sentence codec and serialized IO task for the AFE bridge.
//!
//! The bridge speaks NMEA-style ASCII sentences over a single serial line
//! shared with forwarded GNSS output. This crate turns register requests
//! into sentences, picks replies out of the line, and guarantees that only
//! one exchange is in flight at a time.
//!
//! # Architecture
//!
//! - [`protocol`] -- sentence encode/decode and checksums
//! - [`io`] -- IO task types, spawn, and the select loop

pub mod io;
pub mod protocol;

pub use io::{AfeIo, Expect, HOUSEKEEPING_QUIET, IoConfig, spawn_io_task};
pub use protocol::{ChecksumPolicy, DecodeResult, PROTOCOL_VERSION, Reply};
