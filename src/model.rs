//! Run entries: one recorded outcome for one test on one calendar day.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Placeholder used when no elapsed marker was found.
pub const NOT_AVAILABLE: &str = "N/A";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Pass,
    Fail,
    Skip,
    NotRun,
    #[serde(other)]
    Unknown,
}

impl RunStatus {
    /// Actual outcomes outrank skips, which outrank placeholders.
    fn outcome_rank(self) -> u8 {
        match self {
            RunStatus::Pass | RunStatus::Fail => 2,
            RunStatus::Skip => 1,
            RunStatus::NotRun | RunStatus::Unknown => 0,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Pass => "PASS",
            RunStatus::Fail => "FAIL",
            RunStatus::Skip => "SKIP",
            RunStatus::NotRun => "NOT_RUN",
            RunStatus::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

impl FromStr for RunStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PASS" => Ok(RunStatus::Pass),
            "FAIL" => Ok(RunStatus::Fail),
            "SKIP" => Ok(RunStatus::Skip),
            "NOT_RUN" => Ok(RunStatus::NotRun),
            _ => Err(()),
        }
    }
}

/// Which observation produced an entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntrySource {
    #[default]
    Log,
    /// The side-channel failure report of the sync-verification test.
    Report,
}

impl EntrySource {
    fn is_log(&self) -> bool {
        *self == EntrySource::Log
    }
}

/// One row of the sync-verification failure table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRow {
    pub id: String,
    pub title: String,
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detected_at: Option<String>,
}

impl FailureRow {
    pub fn new(id: impl Into<String>, title: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            error: error.into(),
            detected_at: None,
        }
    }
}

/// Structured detail carried only by the sync-verification test.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCheck {
    pub total_jobs: u64,
    pub error_jobs_count: u64,
    #[serde(default)]
    pub error_jobs: Vec<FailureRow>,
}

impl SyncCheck {
    /// Keep at most `error_jobs_count` rows when a count is known.
    pub fn cap_rows(&mut self) {
        let limit = self.error_jobs_count as usize;
        if limit > 0 && self.error_jobs.len() > limit {
            self.error_jobs.truncate(limit);
        }
    }
}

/// One execution record for one test on one calendar day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEntry {
    pub test_name: String,
    pub status: RunStatus,
    pub date: NaiveDate,
    #[serde(default)]
    pub datetime: Option<NaiveDateTime>,
    #[serde(default)]
    pub start_time: String,
    #[serde(default)]
    pub end_time: String,
    #[serde(default = "not_available")]
    pub running_time: String,
    #[serde(default)]
    pub line_no: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_path: Option<String>,
    #[serde(default, skip_serializing_if = "EntrySource::is_log")]
    pub source: EntrySource,
    #[serde(flatten)]
    pub sync: Option<SyncCheck>,
}

fn not_available() -> String {
    NOT_AVAILABLE.to_string()
}

impl RunEntry {
    /// A bare observation stamped at `at`.
    pub fn observed(test_name: impl Into<String>, status: RunStatus, at: NaiveDateTime) -> Self {
        Self {
            test_name: test_name.into(),
            status,
            date: at.date(),
            datetime: Some(at),
            start_time: at.format(COMPACT_FORMAT).to_string(),
            end_time: String::new(),
            running_time: not_available(),
            line_no: 0,
            failure_message: None,
            error_details: None,
            screenshot_path: None,
            source: EntrySource::Log,
            sync: None,
        }
    }

    /// Placeholder for a day on which the test has no recorded run.
    pub fn not_run(test_name: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            test_name: test_name.into(),
            status: RunStatus::NotRun,
            date,
            datetime: date.and_hms_opt(0, 0, 0),
            start_time: String::new(),
            end_time: String::new(),
            running_time: not_available(),
            line_no: 0,
            failure_message: Some(String::new()),
            error_details: Some(String::new()),
            screenshot_path: None,
            source: EntrySource::Log,
            sync: None,
        }
    }

    pub fn with_failure(mut self, narrative: impl Into<String>) -> Self {
        let narrative = narrative.into();
        self.error_details = Some(narrative.clone());
        self.failure_message = Some(narrative);
        self
    }
}

/// Order two observations of the same test by how recent they are.
///
/// Later timestamp wins; without a decisive timestamp the later log line
/// wins; remaining ties prefer a real outcome over a skip.
pub fn compare_recency(a: &RunEntry, b: &RunEntry) -> Ordering {
    let by_time = match (a.datetime, b.datetime) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => Ordering::Equal,
    };
    if by_time != Ordering::Equal {
        return by_time;
    }

    if a.line_no > 0 && b.line_no > 0 && a.line_no != b.line_no {
        return a.line_no.cmp(&b.line_no);
    }

    a.status
        .outcome_rank()
        .cmp(&b.status.outcome_rank())
        .then_with(|| a.start_time.cmp(&b.start_time))
}

/// Keep the most recent entry per calendar date, newest date first.
///
/// Later items win ties, so feeding entries in log order lets the later
/// line replace the earlier one.
pub fn latest_per_date(entries: impl IntoIterator<Item = RunEntry>) -> Vec<RunEntry> {
    let mut by_date: BTreeMap<NaiveDate, RunEntry> = BTreeMap::new();
    for entry in entries {
        match by_date.get(&entry.date) {
            Some(kept) if compare_recency(&entry, kept) == Ordering::Less => {}
            _ => {
                by_date.insert(entry.date, entry);
            }
        }
    }
    by_date.into_values().rev().collect()
}

/// First `max` characters of `s`.
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

/// `YYYYMMDD HH:MM:SS`, as written by the test logger.
pub const COMPACT_FORMAT: &str = "%Y%m%d %H:%M:%S";

/// Lenient timestamp parsing for stored and legacy values.
///
/// Accepts ISO forms with `T` or a space, optional fractional seconds,
/// a trailing `Z` or offset, and the legacy `"<start> to <end>"` range.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let start = raw.split(" to ").next().unwrap_or(raw).trim();
    if start.is_empty() {
        return None;
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(start) {
        return Some(dt.naive_local());
    }
    let trimmed = start.trim_end_matches('Z');
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y%m%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}
