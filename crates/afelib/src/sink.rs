//! Destinations for telemetry log entries.
//!
//! Every poll produces exactly one [`LogEntry`]: either the sample or a
//! one-line diagnostic explaining why there is none. Sinks render entries
//! as single human-readable lines. [`TelemetrySink::record`] may block; the
//! logger calls it from tokio's blocking pool.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, SecondsFormat, Utc};

use afelib_core::error::Result;
use afelib_core::housekeeping::HousekeepingReport;
use afelib_core::telemetry::TelemetrySample;

/// What one poll produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Sample {
        sample: TelemetrySample,
        /// `None` when housekeeping polling is disabled.
        housekeeping: Option<HousekeepingReport>,
    },
    /// The poll failed; the reason is the rendered error.
    Failed(String),
}

/// One line of telemetry output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Host clock when the entry was made.
    pub timestamp: DateTime<Utc>,
    /// Receiver clock from the latest valid fix, if one has been seen.
    pub gnss_time: Option<DateTime<Utc>>,
    /// 1-based poll counter for this logger run.
    pub poll: u64,
    pub outcome: PollOutcome,
}

impl LogEntry {
    /// An entry stamped with the current UTC time.
    pub fn now(poll: u64, outcome: PollOutcome) -> Self {
        LogEntry {
            timestamp: Utc::now(),
            gnss_time: None,
            poll,
            outcome,
        }
    }

    pub fn with_gnss_time(mut self, time: Option<DateTime<Utc>>) -> Self {
        self.gnss_time = time;
        self
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, PollOutcome::Failed(_))
    }
}

impl fmt::Display for LogEntry {
    /// `2026-10-19T08:15:00Z poll=3 gnss=2026-10-19T08:14:42Z antenna=internal rf=[...] MAIN=... HK=...`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} poll={} ",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.poll
        )?;
        if let Some(time) = self.gnss_time {
            write!(f, "gnss={} ", time.to_rfc3339_opts(SecondsFormat::Secs, true))?;
        }
        match &self.outcome {
            PollOutcome::Sample {
                sample,
                housekeeping,
            } => {
                write!(f, "{sample}")?;
                match housekeeping {
                    Some(report) if !report.is_empty() => write!(f, " {report}"),
                    _ => Ok(()),
                }
            }
            PollOutcome::Failed(reason) => write!(f, "poll failed: {reason}"),
        }
    }
}

/// A destination for log entries.
pub trait TelemetrySink: Send {
    fn record(&mut self, entry: &LogEntry) -> Result<()>;
}

/// Writes each entry to stdout.
#[derive(Debug, Default)]
pub struct PrintSink;

impl TelemetrySink for PrintSink {
    fn record(&mut self, entry: &LogEntry) -> Result<()> {
        let mut out = std::io::stdout().lock();
        writeln!(out, "{entry}")?;
        Ok(())
    }
}

/// Appends each entry to a text file, one line per entry.
///
/// The file is opened in append mode and never truncated, so restarting the
/// logger continues the same log.
#[derive(Debug)]
pub struct FileSink {
    file: File,
    path: PathBuf,
}

impl FileSink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        tracing::debug!(path = %path.display(), "opened telemetry log");
        Ok(FileSink { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TelemetrySink for FileSink {
    fn record(&mut self, entry: &LogEntry) -> Result<()> {
        writeln!(self.file, "{entry}")?;
        self.file.flush()?;
        Ok(())
    }
}

/// Keeps entries in memory. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl TelemetrySink for MemorySink {
    fn record(&mut self, entry: &LogEntry) -> Result<()> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry.clone());
        Ok(())
    }
}

/// Which built-in sinks a logger run writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkSelection {
    Print,
    Log(PathBuf),
    Both(PathBuf),
}

impl SinkSelection {
    /// Build a selection from CLI-style flags; `None` if neither is set.
    pub fn from_flags(print: bool, log: Option<PathBuf>) -> Option<Self> {
        match (print, log) {
            (true, Some(path)) => Some(SinkSelection::Both(path)),
            (false, Some(path)) => Some(SinkSelection::Log(path)),
            (true, None) => Some(SinkSelection::Print),
            (false, None) => None,
        }
    }

    /// Open the selected sinks.
    pub fn open(&self) -> Result<Vec<Box<dyn TelemetrySink>>> {
        let sinks: Vec<Box<dyn TelemetrySink>> = match self {
            SinkSelection::Print => vec![Box::new(PrintSink)],
            SinkSelection::Log(path) => vec![Box::new(FileSink::open(path)?)],
            SinkSelection::Both(path) => {
                vec![Box::new(PrintSink), Box::new(FileSink::open(path)?)]
            }
        };
        Ok(sinks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use afelib_core::housekeeping::{HousekeepingKind, HousekeepingRecord};
    use afelib_core::telemetry::RegisterSnapshot;
    use chrono::TimeZone;

    fn fixed_entry(poll: u64, outcome: PollOutcome) -> LogEntry {
        LogEntry {
            timestamp: Utc.with_ymd_and_hms(2026, 10, 19, 8, 15, 0).unwrap(),
            gnss_time: None,
            poll,
            outcome,
        }
    }

    fn sample() -> PollOutcome {
        PollOutcome::Sample {
            sample: TelemetrySample::from_registers(RegisterSnapshot::power_on()),
            housekeeping: None,
        }
    }

    #[test]
    fn sample_line_format() {
        let line = fixed_entry(3, sample()).to_string();
        assert!(line.starts_with("2026-10-19T08:15:00Z poll=3 antenna=external rf=["));
        assert!(line.ends_with("RX4=0111000000"));
    }

    #[test]
    fn housekeeping_and_receiver_time_in_line() {
        let report = HousekeepingReport::new(vec![HousekeepingRecord::new(
            HousekeepingKind::Housekeeping,
            vec!["1743104049".into(), "1".into(), "41.25".into()],
        )]);
        let entry = fixed_entry(
            4,
            PollOutcome::Sample {
                sample: TelemetrySample::from_registers(RegisterSnapshot::power_on()),
                housekeeping: Some(report),
            },
        )
        .with_gnss_time(Some(Utc.with_ymd_and_hms(2026, 10, 19, 8, 14, 42).unwrap()));

        let line = entry.to_string();
        assert!(line.starts_with("2026-10-19T08:15:00Z poll=4 gnss=2026-10-19T08:14:42Z antenna="));
        assert!(line.ends_with("RX4=0111000000 HK=1743104049,1,41.25"));
    }

    #[test]
    fn failure_line_format() {
        let entry = fixed_entry(7, PollOutcome::Failed("timeout waiting for response".into()));
        assert!(entry.is_failure());
        assert_eq!(
            entry.to_string(),
            "2026-10-19T08:15:00Z poll=7 poll failed: timeout waiting for response"
        );
    }

    #[test]
    fn file_sink_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("afe.log");

        {
            let mut sink = FileSink::open(&path).unwrap();
            sink.record(&fixed_entry(1, sample())).unwrap();
        }
        {
            let mut sink = FileSink::open(&path).unwrap();
            assert_eq!(sink.path(), path.as_path());
            sink.record(&fixed_entry(2, PollOutcome::Failed("x".into()))).unwrap();
        }

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("poll=1 antenna="));
        assert!(lines[1].ends_with("poll=2 poll failed: x"));
    }

    #[test]
    fn file_sink_missing_directory_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = FileSink::open(dir.path().join("missing").join("afe.log"));
        assert!(matches!(result, Err(afelib_core::Error::Io(_))));
    }

    #[test]
    fn memory_sink_clones_share_entries() {
        let sink = MemorySink::new();
        let mut writer = sink.clone();
        writer.record(&fixed_entry(1, sample())).unwrap();
        assert_eq!(sink.entries().len(), 1);
    }

    #[test]
    fn selection_from_flags() {
        let path = PathBuf::from("afe.log");
        assert_eq!(SinkSelection::from_flags(true, None), Some(SinkSelection::Print));
        assert_eq!(
            SinkSelection::from_flags(false, Some(path.clone())),
            Some(SinkSelection::Log(path.clone()))
        );
        assert_eq!(
            SinkSelection::from_flags(true, Some(path.clone())),
            Some(SinkSelection::Both(path))
        );
        assert_eq!(SinkSelection::from_flags(false, None), None);
    }

    #[test]
    fn selection_opens_sinks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("afe.log");
        assert_eq!(SinkSelection::Print.open().unwrap().len(), 1);
        assert_eq!(SinkSelection::Both(path.clone()).open().unwrap().len(), 2);
        assert!(path.exists());
    }
}
