//! Common types shared across the resolver, registry, and pricing engines

use chrono::{Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Fee-schedule setting for a plan component.
///
/// Selects which pricing engine handles a line. Serialized forms accept
/// both the fee-schedule names used by the HTTP surface (`MPFS`, ...) and
/// the plan-component spellings (`PHYS`, `DRUGS`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Setting {
    /// Medicare Physician Fee Schedule
    #[serde(rename = "MPFS")]
    #[serde(alias = "PHYS")]
    Mpfs,

    /// Outpatient Prospective Payment System
    #[serde(rename = "OPPS")]
    Opps,

    /// Ambulatory Surgical Center fee schedule
    #[serde(rename = "ASC")]
    Asc,

    /// Inpatient Prospective Payment System
    #[serde(rename = "IPPS")]
    Ipps,

    /// Clinical Laboratory Fee Schedule
    #[serde(rename = "CLFS")]
    Clfs,

    /// Durable Medical Equipment, Prosthetics, Orthotics and Supplies
    #[serde(rename = "DMEPOS")]
    Dmepos,

    /// Part B drugs (ASP-based)
    #[serde(rename = "DRUG")]
    #[serde(alias = "DRUGS")]
    Drug,
}

impl Setting {
    /// Canonical string form used in responses and trace refs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Setting::Mpfs => "MPFS",
            Setting::Opps => "OPPS",
            Setting::Asc => "ASC",
            Setting::Ipps => "IPPS",
            Setting::Clfs => "CLFS",
            Setting::Dmepos => "DMEPOS",
            Setting::Drug => "DRUG",
        }
    }

    /// Dataset id in the snapshot registry that backs this setting.
    pub fn dataset_id(&self) -> &'static str {
        match self {
            Setting::Mpfs => "MPFS",
            Setting::Opps => "OPPS",
            Setting::Asc => "ASC",
            Setting::Ipps => "IPPS",
            Setting::Clfs => "CLFS",
            Setting::Dmepos => "DMEPOS",
            Setting::Drug => "DRUG_ASP",
        }
    }

    /// All settings, in dispatch-table order.
    pub fn all() -> [Setting; 7] {
        [
            Setting::Mpfs,
            Setting::Opps,
            Setting::Asc,
            Setting::Ipps,
            Setting::Clfs,
            Setting::Dmepos,
            Setting::Drug,
        ]
    }
}

impl fmt::Display for Setting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Setting {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MPFS" | "PHYS" => Ok(Setting::Mpfs),
            "OPPS" => Ok(Setting::Opps),
            "ASC" => Ok(Setting::Asc),
            "IPPS" => Ok(Setting::Ipps),
            "CLFS" => Ok(Setting::Clfs),
            "DMEPOS" => Ok(Setting::Dmepos),
            "DRUG" | "DRUGS" => Ok(Setting::Drug),
            other => Err(format!("unknown setting: {}", other)),
        }
    }
}

/// Where a rate came from.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RateSource {
    /// Medicare fee-schedule benchmark
    #[default]
    Benchmark,

    /// Payer machine-readable file
    Mrf,

    /// Transparency-in-coverage file
    Tic,
}

impl RateSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateSource::Benchmark => "benchmark",
            RateSource::Mrf => "mrf",
            RateSource::Tic => "tic",
        }
    }
}

/// Check whether a half-open effective window `[from, to)` covers a date.
///
/// `effective_to = None` denotes an open-ended window.
pub fn window_covers(from: NaiveDate, to: Option<NaiveDate>, on: NaiveDate) -> bool {
    from <= on && to.map_or(true, |t| on < t)
}

/// Check whether a half-open effective window overlaps an inclusive
/// selection period `[start, end]`.
pub fn window_overlaps(
    from: NaiveDate,
    to: Option<NaiveDate>,
    start: NaiveDate,
    end: NaiveDate,
) -> bool {
    from <= end && to.map_or(true, |t| start < t)
}

/// The time frame a pricing or resolution call is valued against.
///
/// Derived from an explicit valuation date, from `(year, quarter)`, from a
/// bare year, or from the current year when nothing is given. Carries both
/// the representative date (used for point-in-time lookups such as ZIP
/// geometry) and the inclusive selection window (used for effective-window
/// overlap filters).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValuationPeriod {
    /// Valuation year
    pub year: i32,

    /// Quarter 1-4 when the request was quarterly
    pub quarter: Option<u8>,

    /// Representative date (explicit date, or the start of the period)
    pub date: NaiveDate,

    /// Inclusive start of the selection window
    pub period_start: NaiveDate,

    /// Inclusive end of the selection window
    pub period_end: NaiveDate,
}

impl ValuationPeriod {
    /// Build from an explicit valuation date. The selection window
    /// degenerates to the single day.
    pub fn from_date(date: NaiveDate) -> Self {
        let quarter = ((date.month0() / 3) + 1) as u8;
        Self {
            year: date.year(),
            quarter: Some(quarter),
            date,
            period_start: date,
            period_end: date,
        }
    }

    /// Build an annual period covering the whole calendar year.
    pub fn annual(year: i32) -> Self {
        let start = NaiveDate::from_ymd_opt(year, 1, 1).expect("valid year start");
        let end = NaiveDate::from_ymd_opt(year, 12, 31).expect("valid year end");
        Self {
            year,
            quarter: None,
            date: start,
            period_start: start,
            period_end: end,
        }
    }

    /// Build a quarterly period. Returns `None` for quarters outside 1-4.
    pub fn quarterly(year: i32, quarter: u8) -> Option<Self> {
        let (start_m, end_m, end_d) = match quarter {
            1 => (1, 3, 31),
            2 => (4, 6, 30),
            3 => (7, 9, 30),
            4 => (10, 12, 31),
            _ => return None,
        };
        let start = NaiveDate::from_ymd_opt(year, start_m, 1)?;
        let end = NaiveDate::from_ymd_opt(year, end_m, end_d)?;
        Some(Self {
            year,
            quarter: Some(quarter),
            date: start,
            period_start: start,
            period_end: end,
        })
    }

    /// Derive a period from the optional request parameters.
    ///
    /// An explicit date wins over `(year, quarter)`; a bare year selects
    /// annually; no year at all defaults to the current year.
    pub fn derive(
        year: Option<i32>,
        quarter: Option<u8>,
        date: Option<NaiveDate>,
    ) -> Result<Self, String> {
        if let Some(d) = date {
            return Ok(Self::from_date(d));
        }
        let year = year.unwrap_or_else(|| Utc::now().date_naive().year());
        if !(1900..=2100).contains(&year) {
            return Err(format!("year {} out of range", year));
        }
        match quarter {
            None => Ok(Self::annual(year)),
            Some(q) => Self::quarterly(year, q)
                .ok_or_else(|| format!("invalid quarter {}, must be 1-4", q)),
        }
    }

    /// Quarter used for quarterly schedule lookups, defaulting to Q1.
    pub fn quarter_or_default(&self) -> u8 {
        self.quarter.unwrap_or(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_setting_aliases() {
        assert_eq!("PHYS".parse::<Setting>().unwrap(), Setting::Mpfs);
        assert_eq!("DRUGS".parse::<Setting>().unwrap(), Setting::Drug);
        assert_eq!(
            serde_json::from_str::<Setting>("\"PHYS\"").unwrap(),
            Setting::Mpfs
        );
        assert!("XXX".parse::<Setting>().is_err());
    }

    #[test]
    fn test_window_covers_half_open() {
        let from = d(2025, 1, 1);
        let to = Some(d(2025, 4, 1));
        assert!(window_covers(from, to, d(2025, 1, 1)));
        assert!(window_covers(from, to, d(2025, 3, 31)));
        // Half-open: the end date itself is excluded
        assert!(!window_covers(from, to, d(2025, 4, 1)));
        // Open-ended window
        assert!(window_covers(from, None, d(2030, 1, 1)));
    }

    #[test]
    fn test_quarter_windows_leap_year() {
        let q1 = ValuationPeriod::quarterly(2024, 1).unwrap();
        assert_eq!(q1.period_start, d(2024, 1, 1));
        assert_eq!(q1.period_end, d(2024, 3, 31));
        // Feb 29 falls inside Q1 of a leap year
        assert!(window_overlaps(
            d(2024, 2, 29),
            Some(d(2024, 3, 1)),
            q1.period_start,
            q1.period_end
        ));
    }

    #[test]
    fn test_derive_precedence() {
        let explicit = ValuationPeriod::derive(Some(2024), Some(2), Some(d(2025, 7, 4))).unwrap();
        assert_eq!(explicit.year, 2025);
        assert_eq!(explicit.quarter, Some(3));
        assert_eq!(explicit.period_start, explicit.period_end);

        let quarterly = ValuationPeriod::derive(Some(2025), Some(4), None).unwrap();
        assert_eq!(quarterly.period_start, d(2025, 10, 1));
        assert_eq!(quarterly.period_end, d(2025, 12, 31));

        let annual = ValuationPeriod::derive(Some(2025), None, None).unwrap();
        assert_eq!(annual.period_end, d(2025, 12, 31));

        assert!(ValuationPeriod::derive(Some(2025), Some(5), None).is_err());
        assert!(ValuationPeriod::derive(Some(999_999), None, None).is_err());
    }
}
