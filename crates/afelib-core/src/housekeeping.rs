//! Board housekeeping and GNSS time.
//!
//! On request the bridge dumps its housekeeping sensors as a burst of
//! `$PMIT<sensor>` sentences. Their field layout depends on the firmware
//! build and which sensors are fitted, so the fields are kept as the text
//! the firmware sent and the first field is read as the record's epoch.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};

/// The sensor a housekeeping record comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HousekeepingKind {
    /// `PMITHK`: oscillator, bus and temperature status.
    Housekeeping,
    /// `PMITMAG`: magnetometer.
    Magnetometer,
    /// `PMITACC`: accelerometer.
    Accelerometer,
    /// `PMITGYR`: gyroscope.
    Gyroscope,
}

impl HousekeepingKind {
    /// Every kind, in the order the firmware sends them.
    pub const ALL: [HousekeepingKind; 4] = [
        HousekeepingKind::Magnetometer,
        HousekeepingKind::Housekeeping,
        HousekeepingKind::Accelerometer,
        HousekeepingKind::Gyroscope,
    ];

    /// Sentence head on the wire.
    pub const fn head(self) -> &'static str {
        match self {
            HousekeepingKind::Housekeeping => "PMITHK",
            HousekeepingKind::Magnetometer => "PMITMAG",
            HousekeepingKind::Accelerometer => "PMITACC",
            HousekeepingKind::Gyroscope => "PMITGYR",
        }
    }

    /// Short label used in log lines.
    pub const fn label(self) -> &'static str {
        match self {
            HousekeepingKind::Housekeeping => "HK",
            HousekeepingKind::Magnetometer => "MAG",
            HousekeepingKind::Accelerometer => "ACC",
            HousekeepingKind::Gyroscope => "GYR",
        }
    }

    pub fn from_head(head: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.head() == head)
    }
}

impl fmt::Display for HousekeepingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One housekeeping sentence, minus its head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HousekeepingRecord {
    kind: HousekeepingKind,
    fields: Vec<String>,
}

impl HousekeepingRecord {
    pub fn new(kind: HousekeepingKind, fields: Vec<String>) -> Self {
        HousekeepingRecord { kind, fields }
    }

    pub fn kind(&self) -> HousekeepingKind {
        self.kind
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Board time the record was taken at, if the first field is an epoch.
    pub fn epoch(&self) -> Option<i64> {
        self.fields.first()?.parse().ok()
    }
}

impl fmt::Display for HousekeepingRecord {
    /// `HK=1743104049,1,1,1,...`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.kind.label(), self.fields.join(","))
    }
}

/// Every record from one housekeeping dump, in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HousekeepingReport {
    records: Vec<HousekeepingRecord>,
}

impl HousekeepingReport {
    pub fn new(records: Vec<HousekeepingRecord>) -> Self {
        HousekeepingReport { records }
    }

    pub fn records(&self) -> &[HousekeepingRecord] {
        &self.records
    }

    /// The record from `kind`, if the board sent one.
    pub fn get(&self, kind: HousekeepingKind) -> Option<&HousekeepingRecord> {
        self.records.iter().find(|r| r.kind == kind)
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl fmt::Display for HousekeepingReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, record) in self.records.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{record}")?;
        }
        Ok(())
    }
}

/// UTC time from the GNSS receiver's latest recommended-minimum sentence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GnssFix {
    /// Receiver time, whole seconds.
    pub time: DateTime<Utc>,
    /// Status field was `A`; `V` means the receiver had no valid fix yet.
    pub valid: bool,
}

impl GnssFix {
    /// Read the time from the fields of an `RMC` sentence.
    ///
    /// Field 1 is `hhmmss[.ss]`, field 2 the status and field 9 `ddmmyy`.
    /// Returns `None` when the receiver has not reported a time yet.
    pub fn from_rmc_fields(fields: &[&str]) -> Option<Self> {
        let time = fields.get(1)?;
        let date = fields.get(9)?;
        if time.len() < 6 || date.len() != 6 {
            return None;
        }
        let num = |s: &str, range: std::ops::Range<usize>| s.get(range)?.parse::<u32>().ok();

        let day = NaiveDate::from_ymd_opt(
            2000 + i32::try_from(num(date, 4..6)?).ok()?,
            num(date, 2..4)?,
            num(date, 0..2)?,
        )?;
        let at = day.and_hms_opt(num(time, 0..2)?, num(time, 2..4)?, num(time, 4..6)?)?;
        Some(GnssFix {
            time: at.and_utc(),
            valid: fields.get(2) == Some(&"A"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(kind: HousekeepingKind, fields: &str) -> HousekeepingRecord {
        HousekeepingRecord::new(kind, fields.split(',').map(String::from).collect())
    }

    #[test]
    fn kinds_round_trip_through_heads() {
        for kind in HousekeepingKind::ALL {
            assert_eq!(HousekeepingKind::from_head(kind.head()), Some(kind));
        }
        assert_eq!(HousekeepingKind::from_head("PMITSR"), None);
        assert_eq!(HousekeepingKind::from_head("PMAX"), None);
    }

    #[test]
    fn report_lookup_and_line() {
        let report = HousekeepingReport::new(vec![
            record(HousekeepingKind::Magnetometer, "1743104049,-21.3,4.5,-40.1"),
            record(HousekeepingKind::Housekeeping, "1743104049,1,1,1,1,41.25"),
        ]);
        let hk = report.get(HousekeepingKind::Housekeeping).unwrap();
        assert_eq!(hk.epoch(), Some(1_743_104_049));
        assert!(report.get(HousekeepingKind::Gyroscope).is_none());
        assert_eq!(
            report.to_string(),
            "MAG=1743104049,-21.3,4.5,-40.1 HK=1743104049,1,1,1,1,41.25"
        );
    }

    #[test]
    fn rmc_time_and_status() {
        let line = "GNRMC,193409.00,A,4237.38614,N,07129.34227,W,0.001,,270325,,,A,V";
        let fields: Vec<&str> = line.split(',').collect();
        let fix = GnssFix::from_rmc_fields(&fields).unwrap();
        assert_eq!(fix.time, Utc.with_ymd_and_hms(2025, 3, 27, 19, 34, 9).unwrap());
        assert!(fix.valid);

        let fields: Vec<&str> = "GNRMC,000012.00,V,,,,,,,060180,,,N".split(',').collect();
        let fix = GnssFix::from_rmc_fields(&fields).unwrap();
        assert!(!fix.valid);
    }

    #[test]
    fn rmc_without_time_has_no_fix() {
        let fields: Vec<&str> = "GNRMC,,V,,,,,,,,,,N".split(',').collect();
        assert_eq!(GnssFix::from_rmc_fields(&fields), None);
        let fields: Vec<&str> = "GNRMC,256000.00,A,,,,,,,270325,,".split(',').collect();
        assert_eq!(GnssFix::from_rmc_fields(&fields), None);
    }
}
