use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::location::LocationSample;

/// Bulk history for one subject, newest-first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryResponse {
    /// Older backends name this array `pings`.
    #[serde(default, alias = "pings")]
    pub samples: Vec<LocationSample>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug: Option<HistoryDebug>,
}

/// Diagnostics the backend attaches when a history query comes back empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryDebug {
    #[serde(default)]
    pub total_pings: Option<u64>,
    #[serde(default)]
    pub date_range: Option<DateRange>,
    #[serde(default)]
    pub child_consent_given: Option<bool>,
    #[serde(default)]
    pub link_status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: String,
    pub to: String,
}

/// How far back the bulk history fetch reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HistoryRange {
    OneHour,
    SixHours,
    #[default]
    Day,
}

impl HistoryRange {
    pub const ALL: [HistoryRange; 3] = [
        HistoryRange::OneHour,
        HistoryRange::SixHours,
        HistoryRange::Day,
    ];

    pub fn hours(self) -> i64 {
        match self {
            HistoryRange::OneHour => 1,
            HistoryRange::SixHours => 6,
            HistoryRange::Day => 24,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            HistoryRange::OneHour => "1h",
            HistoryRange::SixHours => "6h",
            HistoryRange::Day => "24h",
        }
    }

    pub fn from_hours(hours: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|range| range.hours() == hours)
    }

    /// Oldest timestamp covered by this range when queried at `now`.
    pub fn horizon(self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::hours(self.hours())
    }

    /// `from` query value, millisecond precision with a `Z` suffix.
    pub fn query_param(self, now: DateTime<Utc>) -> String {
        self.horizon(now).to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

impl fmt::Display for HistoryRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown history range {0:?}, expected 1h, 6h or 24h")]
pub struct ParseRangeError(String);

impl FromStr for HistoryRange {
    type Err = ParseRangeError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase();
        let hours = normalized
            .strip_suffix('h')
            .unwrap_or(&normalized)
            .parse::<i64>()
            .ok();
        hours
            .and_then(Self::from_hours)
            .ok_or_else(|| ParseRangeError(raw.to_owned()))
    }
}
