// afe -- command-line front end for the AFE bridge board.
//
// Every subcommand maps onto one controller call; option parsing and output
// formatting are the only things that live here.
//
// Usage:
//   afe --port /dev/ttyACM0 antenna internal
//   afe --port /dev/ttyACM0 rfin 3 external
//   afe --port /dev/ttyACM0 write tx1 4 1
//   afe --port /dev/ttyACM0 patch rx2 0 1 x 0
//   afe --port /dev/ttyACM0 read
//   afe --port /dev/ttyACM0 read rx4
//   afe --port /dev/ttyACM0 housekeeping
//   afe --port /dev/ttyACM0 telemetry --rate 10 --print --log afe.log
//   afe --port /dev/ttyACM0 telemetry --rate 1 --print --no-housekeeping
//   afe --simulate telemetry --rate 1 --print

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use afelib::{
    AfeBuilder, AfeController, ChecksumPolicy, LoggerConfig, RegisterBlock, RegisterPatch,
    Selection, SinkSelection, TelemetryLogger, format_bits,
};
use chrono::SecondsFormat;
use afelib_test_harness::SimulatedAfe;
use afelib_transport::DEFAULT_BAUD_RATE;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// Control and monitor the AFE bridge board over its serial link.
#[derive(Parser, Debug)]
#[command(name = "afe", version, about)]
struct Cli {
    /// Serial port path (e.g. /dev/ttyACM0, COM3).
    /// Required unless --simulate is used.
    #[arg(long, global = true)]
    port: Option<String>,

    /// Serial baud rate.
    #[arg(long, global = true, default_value_t = DEFAULT_BAUD_RATE)]
    baud: u32,

    /// Time allowed for one request/response exchange, in milliseconds.
    #[arg(long, global = true, default_value_t = 1000)]
    timeout_ms: u64,

    /// Accept replies that carry no checksum. A checksum that is present
    /// must still match.
    #[arg(long, global = true)]
    lenient_checksum: bool,

    /// Run against the built-in bridge simulator instead of a serial port.
    #[arg(long, global = true)]
    simulate: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Route the GNSS receiver to the internal or external antenna.
    Antenna {
        /// internal or external.
        selection: Selection,
    },

    /// Select the internal or external source for one RF input.
    Rfin {
        /// RF input channel (1-4).
        channel: u8,
        /// internal or external.
        selection: Selection,
    },

    /// Write a single register bit.
    Write {
        /// Register block: main, tx1, tx2, rx1, rx2, rx3 or rx4.
        block: String,
        /// Bit address within the block (0-9).
        address: u8,
        /// Bit value (0 or 1).
        value: u8,
    },

    /// Write a run of consecutive bits; `x` leaves a bit unchanged.
    Patch {
        /// Register block: main, tx1, tx2, rx1, rx2, rx3 or rx4.
        block: String,
        /// Address of the first bit.
        start: u8,
        /// Bits to write (0, 1 or x).
        #[arg(required = true, num_args = 1..)]
        bits: Vec<String>,
    },

    /// Read one register block, or the full telemetry sample if none is given.
    Read {
        /// Register block to read.
        block: Option<String>,
    },

    /// Read the board's housekeeping sensors once.
    Housekeeping,

    /// Poll telemetry periodically until Ctrl-C.
    Telemetry {
        /// Polling period in seconds.
        #[arg(long, default_value_t = afelib::DEFAULT_PERIOD_SECS)]
        rate: u64,

        /// Log register samples only, without the housekeeping dump.
        #[arg(long)]
        no_housekeeping: bool,

        /// Print each entry to stdout.
        #[arg(long)]
        print: bool,

        /// Append each entry to this file.
        #[arg(long)]
        log: Option<PathBuf>,
    },
}

// ---------------------------------------------------------------------------
// Argument validation
// ---------------------------------------------------------------------------

/// A command with its arguments checked, ready to run against a bridge.
#[derive(Debug)]
enum Action {
    Antenna(Selection),
    Rfin {
        channel: u8,
        selection: Selection,
    },
    Write {
        block: RegisterBlock,
        address: u8,
        value: u8,
    },
    Patch(RegisterPatch),
    Read(Option<RegisterBlock>),
    Housekeeping,
    Telemetry {
        config: LoggerConfig,
        sinks: SinkSelection,
    },
}

fn parse_block(token: &str) -> Result<RegisterBlock> {
    Ok(token.parse::<RegisterBlock>()?)
}

fn parse_patch(block: &str, start: u8, bits: &[String]) -> Result<RegisterPatch> {
    let block = parse_block(block)?;
    let bits = bits
        .iter()
        .map(|b| RegisterPatch::parse_bit(b))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(RegisterPatch::new(block, start, bits)?)
}

/// Check everything that can be checked without the board, so a bad
/// argument never opens the port.
fn plan(command: &Command) -> Result<Action> {
    let action = match command {
        Command::Antenna { selection } => Action::Antenna(*selection),
        Command::Rfin { channel, selection } => Action::Rfin {
            channel: *channel,
            selection: *selection,
        },
        Command::Write {
            block,
            address,
            value,
        } => Action::Write {
            block: parse_block(block)?,
            address: *address,
            value: *value,
        },
        Command::Patch { block, start, bits } => Action::Patch(parse_patch(block, *start, bits)?),
        Command::Read { block } => Action::Read(block.as_deref().map(parse_block).transpose()?),
        Command::Housekeeping => Action::Housekeeping,
        Command::Telemetry {
            rate,
            no_housekeeping,
            print,
            log,
        } => {
            let config = LoggerConfig::every_secs(*rate)?.with_housekeeping(!no_housekeeping);
            let Some(sinks) = SinkSelection::from_flags(*print, log.clone()) else {
                bail!("telemetry needs --print, --log <path>, or both");
            };
            Action::Telemetry { config, sinks }
        }
    };
    Ok(action)
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

fn builder_for(cli: &Cli) -> AfeBuilder {
    let policy = if cli.lenient_checksum {
        ChecksumPolicy::Lenient
    } else {
        ChecksumPolicy::Require
    };
    AfeBuilder::new()
        .baud_rate(cli.baud)
        .command_timeout(Duration::from_millis(cli.timeout_ms))
        .checksum_policy(policy)
}

async fn connect(cli: &Cli) -> Result<AfeController> {
    let builder = builder_for(cli);

    if cli.simulate {
        tracing::info!("using simulated bridge");
        return builder
            .build_with_transport(Box::new(SimulatedAfe::new()))
            .await
            .context("failed to start simulated bridge");
    }

    let Some(port) = cli.port.as_deref() else {
        bail!("--port is required (or use --simulate)");
    };
    builder
        .serial_port(port)
        .build()
        .await
        .with_context(|| format!("failed to open {port}"))
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn run(afe: AfeController, action: Action) -> Result<()> {
    let result = match action {
        Action::Telemetry { config, sinks } => return cmd_telemetry(afe, config, sinks).await,
        Action::Antenna(selection) => cmd_antenna(&afe, selection).await,
        Action::Rfin { channel, selection } => cmd_rfin(&afe, channel, selection).await,
        Action::Write {
            block,
            address,
            value,
        } => cmd_write(&afe, block, address, value).await,
        Action::Patch(patch) => cmd_patch(&afe, &patch).await,
        Action::Read(block) => cmd_read(&afe, block).await,
        Action::Housekeeping => cmd_housekeeping(&afe).await,
    };
    afe.close().await.ok();
    result
}

async fn cmd_antenna(afe: &AfeController, selection: Selection) -> Result<()> {
    afe.set_antenna(selection == Selection::Internal).await?;
    println!("antenna={selection}");
    Ok(())
}

async fn cmd_rfin(afe: &AfeController, channel: u8, selection: Selection) -> Result<()> {
    afe.set_input_rf(channel, selection == Selection::Internal).await?;
    println!("rf{channel}={selection}");
    Ok(())
}

async fn cmd_write(afe: &AfeController, block: RegisterBlock, address: u8, value: u8) -> Result<()> {
    afe.write_register(block, address, value).await?;
    println!("{block}[{address}]={value}");
    Ok(())
}

async fn cmd_patch(afe: &AfeController, patch: &RegisterPatch) -> Result<()> {
    afe.write_patch(patch).await?;
    let bits: Vec<String> = patch
        .bits()
        .iter()
        .map(|b| b.map_or_else(|| "x".to_string(), |v| v.to_string()))
        .collect();
    println!("{}[{}..]={}", patch.block(), patch.start(), bits.join(""));
    Ok(())
}

async fn cmd_read(afe: &AfeController, block: Option<RegisterBlock>) -> Result<()> {
    match block {
        Some(block) => {
            let bits = afe.read_block(block).await?;
            println!("{block}={}", format_bits(&bits));
        }
        None => {
            let sample = afe.read_telemetry().await?;
            println!("{sample}");
        }
    }
    Ok(())
}

async fn cmd_housekeeping(afe: &AfeController) -> Result<()> {
    let report = afe.read_housekeeping().await?;
    for record in report.records() {
        println!("{record}");
    }
    if let Some(fix) = afe.last_fix() {
        let status = if fix.valid { "valid" } else { "no fix" };
        println!(
            "gnss={} ({status})",
            fix.time.to_rfc3339_opts(SecondsFormat::Secs, true)
        );
    }
    Ok(())
}

async fn cmd_telemetry(afe: AfeController, config: LoggerConfig, sinks: SinkSelection) -> Result<()> {
    let sinks = sinks.open().context("failed to open telemetry sinks")?;

    let afe = Arc::new(afe);
    let logger = TelemetryLogger::start(afe.clone(), config, sinks);
    eprintln!(
        "Logging telemetry every {}s. Press Ctrl-C to stop.",
        config.period().as_secs()
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;

    let stats = logger.stop().await;
    eprintln!(
        "Stopped after {} polls: {} samples, {} failed, {} sink errors.",
        stats.polls, stats.samples, stats.failures, stats.sink_errors
    );
    afe.close().await.ok();
    Ok(())
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let action = plan(&cli.command)?;
    let afe = connect(&cli).await?;
    run(afe, action).await
}
