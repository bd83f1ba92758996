//! Periodic telemetry polling.
//!
//! A [`TelemetryLogger`] owns one background task that reads a sample (and,
//! unless disabled, a housekeeping dump) from its [`TelemetrySource`] every
//! period and hands the result to each sink. The polls go through the
//! controller's request queue like any other operation, so a write issued
//! while a poll is in flight waits its turn.
//!
//! A failed poll is recorded as a single `poll failed: <reason>` entry and
//! the loop carries on; a sample is never made up to fill the gap.
//!
//! Sinks do blocking I/O, so each entry is written on tokio's blocking pool
//! rather than on the runtime thread that serves the bridge.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use afelib_core::error::{Result, ValidationError};
use afelib_core::housekeeping::{GnssFix, HousekeepingReport};
use afelib_core::telemetry::TelemetrySample;

use crate::sink::{LogEntry, PollOutcome, TelemetrySink};

/// Shortest polling period the bridge link can sustain.
pub const MIN_PERIOD_SECS: u64 = 1;

/// Polling period used when none is configured.
pub const DEFAULT_PERIOD_SECS: u64 = 60;

/// Anything that can produce a complete telemetry sample on demand.
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    async fn read_telemetry(&self) -> Result<TelemetrySample>;

    /// A housekeeping dump, or `None` for sources without one.
    async fn read_housekeeping(&self) -> Result<Option<HousekeepingReport>> {
        Ok(None)
    }

    /// Latest receiver time, used to stamp entries.
    fn last_fix(&self) -> Option<GnssFix> {
        None
    }
}

/// Logger timing and content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoggerConfig {
    every_secs: u64,
    housekeeping: bool,
}

impl LoggerConfig {
    /// Poll every `secs` whole seconds.
    pub fn every_secs(secs: u64) -> std::result::Result<Self, ValidationError> {
        if secs < MIN_PERIOD_SECS {
            return Err(ValidationError::InvalidPeriod {
                secs,
                min_secs: MIN_PERIOD_SECS,
            });
        }
        Ok(LoggerConfig {
            every_secs: secs,
            housekeeping: true,
        })
    }

    /// Whether each poll also reads a housekeeping dump (default: yes).
    pub fn with_housekeeping(mut self, enabled: bool) -> Self {
        self.housekeeping = enabled;
        self
    }

    pub fn period(&self) -> Duration {
        Duration::from_secs(self.every_secs)
    }

    pub fn housekeeping(&self) -> bool {
        self.housekeeping
    }
}

impl Default for LoggerConfig {
    fn default() -> Self {
        LoggerConfig {
            every_secs: DEFAULT_PERIOD_SECS,
            housekeeping: true,
        }
    }
}

/// Counters for one logger run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoggerStats {
    /// Polls attempted.
    pub polls: u64,
    /// Polls that produced a sample.
    pub samples: u64,
    /// Polls that produced a diagnostic instead.
    pub failures: u64,
    /// Entries a sink failed to record.
    pub sink_errors: u64,
}

/// Handle to a running polling loop.
///
/// Dropping the handle without [`stop`](Self::stop) still ends the loop at
/// its next tick; the counters are then lost.
pub struct TelemetryLogger {
    cancel: CancellationToken,
    task: JoinHandle<LoggerStats>,
}

impl TelemetryLogger {
    /// Start polling `source`. The first poll happens immediately.
    pub fn start(
        source: Arc<dyn TelemetrySource>,
        config: LoggerConfig,
        sinks: Vec<Box<dyn TelemetrySink>>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(poll_loop(source, config, sinks, cancel.clone()));
        debug!(period_secs = config.every_secs, "telemetry logger started");
        TelemetryLogger { cancel, task }
    }

    /// Stop polling and return the run's counters.
    ///
    /// A poll already in flight is allowed to finish and is recorded; no
    /// further poll starts.
    pub async fn stop(mut self) -> LoggerStats {
        self.cancel.cancel();
        match (&mut self.task).await {
            Ok(stats) => stats,
            Err(e) => {
                tracing::error!(error = %e, "telemetry logger task failed");
                LoggerStats::default()
            }
        }
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for TelemetryLogger {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn poll_loop(
    source: Arc<dyn TelemetrySource>,
    config: LoggerConfig,
    mut sinks: Vec<Box<dyn TelemetrySink>>,
    cancel: CancellationToken,
) -> LoggerStats {
    let mut stats = LoggerStats::default();
    let mut ticker = tokio::time::interval(config.period());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        stats.polls += 1;
        let outcome = match poll_once(&*source, config.housekeeping).await {
            Ok((sample, housekeeping)) => {
                stats.samples += 1;
                debug!(poll = stats.polls, "telemetry sample");
                PollOutcome::Sample {
                    sample,
                    housekeeping,
                }
            }
            Err(e) => {
                stats.failures += 1;
                warn!(poll = stats.polls, error = %e, "telemetry poll failed");
                PollOutcome::Failed(e.to_string())
            }
        };

        let gnss_time = source.last_fix().filter(|fix| fix.valid).map(|fix| fix.time);
        let entry = LogEntry::now(stats.polls, outcome).with_gnss_time(gnss_time);
        match tokio::task::spawn_blocking(move || record_all(sinks, &entry)).await {
            Ok((returned, failed)) => {
                sinks = returned;
                stats.sink_errors += failed;
            }
            Err(e) => {
                tracing::error!(error = %e, "telemetry sink panicked, stopping logger");
                break;
            }
        }
    }

    debug!(
        polls = stats.polls,
        samples = stats.samples,
        failures = stats.failures,
        "telemetry logger stopped"
    );
    stats
}

/// One poll: the register sample, then the housekeeping dump if enabled.
/// Either failing fails the poll.
async fn poll_once(
    source: &dyn TelemetrySource,
    housekeeping: bool,
) -> Result<(TelemetrySample, Option<HousekeepingReport>)> {
    let sample = source.read_telemetry().await?;
    let report = if housekeeping {
        source.read_housekeeping().await?
    } else {
        None
    };
    Ok((sample, report))
}

/// Hand one entry to every sink. Runs on the blocking pool.
fn record_all(
    mut sinks: Vec<Box<dyn TelemetrySink>>,
    entry: &LogEntry,
) -> (Vec<Box<dyn TelemetrySink>>, u64) {
    let mut failed = 0;
    for sink in sinks.iter_mut() {
        if let Err(e) = sink.record(entry) {
            failed += 1;
            warn!(poll = entry.poll, error = %e, "telemetry sink failed");
        }
    }
    (sinks, failed)
}
