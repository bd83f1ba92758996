//! AfeController -- register writes and telemetry reads against one bridge.
//!
//! The controller validates every request against [`AFE_REGISTERS`] before
//! anything is queued, then hands the encoded sentence to the IO task. All
//! operations, including the logger's periodic polls, share that task's
//! queue, so they run one at a time in submission order.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use afelib_core::error::{Error, ProtocolError, Result};
use afelib_core::housekeeping::{GnssFix, HousekeepingReport};
use afelib_core::register::{
    AFE_REGISTERS, ANTENNA_SELECT_ADDRESS, RF_INPUT_SELECT_ADDRESS, RegisterBlock, RegisterModel,
    RegisterPatch, RegisterWriteRequest, RfChannel, Selection,
};
use afelib_core::telemetry::{BlockBits, TelemetrySample};
use afelib_nmea::io::{AfeIo, Expect};
use afelib_nmea::protocol::{self, Reply};

use crate::logger::TelemetrySource;

/// A connected AFE bridge.
///
/// Constructed via [`AfeBuilder`](crate::builder::AfeBuilder). Wrap it in an
/// `Arc` to share it between a [`TelemetryLogger`](crate::TelemetryLogger)
/// and one-shot callers. Dropping the last reference stops the IO task and
/// closes the port.
pub struct AfeController {
    io: AfeIo,
    model: &'static RegisterModel,
    command_timeout: Duration,
}

impl AfeController {
    pub(crate) fn new(io: AfeIo, command_timeout: Duration) -> Self {
        AfeController {
            io,
            model: &AFE_REGISTERS,
            command_timeout,
        }
    }

    /// The register model requests are validated against.
    pub fn model(&self) -> &'static RegisterModel {
        self.model
    }

    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    /// Route the GNSS receiver to the internal or the external antenna.
    pub async fn set_antenna(&self, select_internal: bool) -> Result<()> {
        let selection = Selection::from_internal(select_internal);
        debug!(%selection, "selecting antenna");
        self.write_register(
            RegisterBlock::Main,
            ANTENNA_SELECT_ADDRESS.get(),
            selection.value().as_u8(),
        )
        .await
    }

    /// Route RF input `channel` (1..=4) to its internal or external source.
    pub async fn set_input_rf(&self, channel: u8, select_internal: bool) -> Result<()> {
        let channel = RfChannel::new(channel)?;
        let selection = Selection::from_internal(select_internal);
        debug!(%channel, %selection, "selecting RF input");
        self.write_register(
            channel.block(),
            RF_INPUT_SELECT_ADDRESS.get(),
            selection.value().as_u8(),
        )
        .await
    }

    /// Write one bit and wait for the bridge to acknowledge it.
    ///
    /// Out-of-range addresses and non-binary values fail with
    /// [`Error::Validation`] without touching the transport.
    pub async fn write_register(&self, block: RegisterBlock, address: u8, value: u8) -> Result<()> {
        let request = self.model.write_request(block, address, value)?;
        self.write_request(&request).await
    }

    /// Send an already-validated single-bit write.
    pub async fn write_request(&self, request: &RegisterWriteRequest) -> Result<()> {
        debug!(
            block = %request.block(),
            address = %request.address(),
            value = %request.value(),
            "writing register"
        );
        let echo = format!("{},{}", request.address(), request.value());
        self.acknowledged(protocol::encode_write(request), &echo)
            .await
            .map(|_| ())
    }

    /// Write a run of bits in one sentence; `None` bits are left unchanged.
    pub async fn write_patch(&self, patch: &RegisterPatch) -> Result<()> {
        let mut echo = patch.start().to_string();
        for bit in patch.bits() {
            echo.push(',');
            match bit {
                Some(v) => echo.push_str(&v.to_string()),
                None => echo.push('x'),
            }
        }
        debug!(block = %patch.block(), start = %patch.start(), bits = %echo, "writing register patch");
        self.acknowledged(protocol::encode_patch(patch), &echo)
            .await
            .map(|_| ())
    }

    /// Read the bridge's shadow copy of one block.
    pub async fn read_block(&self, block: RegisterBlock) -> Result<BlockBits> {
        debug!(%block, "querying block");
        match self
            .io
            .exchange(protocol::encode_block_query(block), Expect::Ack)
            .await?
        {
            Reply::Ack { params, .. } => Ok(protocol::parse_block_bits(&params)?),
            other => Err(unexpected(&other)),
        }
    }

    /// Read every block in one exchange.
    ///
    /// Either the whole sample decodes or the call fails; no partial sample
    /// is ever returned.
    pub async fn read_telemetry(&self) -> Result<TelemetrySample> {
        match self
            .io
            .exchange(protocol::encode_telemetry_query(), Expect::Registers)
            .await?
        {
            Reply::Registers(snapshot) => Ok(TelemetrySample::from_registers(snapshot)),
            other => Err(unexpected(&other)),
        }
    }

    /// Ask the board for a housekeeping dump (`$TELEM?`).
    ///
    /// The dump ends with the gyroscope record, or after a short quiet
    /// period on boards without an IMU. A marker with no records is a
    /// timeout.
    pub async fn read_housekeeping(&self) -> Result<HousekeepingReport> {
        debug!("requesting housekeeping dump");
        match self
            .io
            .exchange(protocol::encode_housekeeping_query(), Expect::Housekeeping)
            .await?
        {
            Reply::HousekeepingDump(report) => Ok(report),
            other => Err(unexpected(&other)),
        }
    }

    /// The latest time reported by the GNSS receiver, if any `RMC`
    /// sentence with a time has crossed the link.
    pub fn last_fix(&self) -> Option<GnssFix> {
        self.io.last_fix()
    }

    /// Finish queued requests, stop the IO task and close the port.
    pub async fn close(&self) -> Result<()> {
        debug!("closing AFE controller");
        self.io.close().await
    }

    /// Whether the IO task is still serving requests.
    pub fn is_connected(&self) -> bool {
        self.io.is_running()
    }

    /// Run an exchange that must end in an acknowledgement echoing `echo`.
    async fn acknowledged(&self, frame: Vec<u8>, echo: &str) -> Result<Vec<String>> {
        match self.io.exchange(frame, Expect::Ack).await? {
            Reply::Ack { command, params } => {
                if params.join(",") != echo {
                    return Err(ProtocolError::UnexpectedResponse(format!(
                        "{command} acknowledged '{}', expected '{echo}'",
                        params.join(",")
                    ))
                    .into());
                }
                Ok(params)
            }
            other => Err(unexpected(&other)),
        }
    }
}

fn unexpected(reply: &Reply) -> Error {
    ProtocolError::UnexpectedResponse(format!("{reply:?}")).into()
}

#[async_trait]
impl TelemetrySource for AfeController {
    async fn read_telemetry(&self) -> Result<TelemetrySample> {
        AfeController::read_telemetry(self).await
    }

    async fn read_housekeeping(&self) -> Result<Option<HousekeepingReport>> {
        AfeController::read_housekeeping(self).await.map(Some)
    }

    fn last_fix(&self) -> Option<GnssFix> {
        AfeController::last_fix(self)
    }
}
