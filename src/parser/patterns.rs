//! Line-level markers written by the test logger.

use chrono::{NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::model::RunStatus;

fn re(pattern: &str) -> Regex {
    Regex::new(pattern).expect("valid regex")
}

/// `TEST <name>: PASS|FAIL|SKIP`
static RESULT: Lazy<Regex> = Lazy::new(|| re(r"(?i)TEST\s+([^:\r\n]+?)\s*:\s*(PASS|FAIL|SKIP)\b"));

/// Bare `TEST test_name` line that opens a test's log section.
static HEADER: Lazy<Regex> = Lazy::new(|| re(r"(?i)(?:^|\s)TEST\s+(test_[A-Za-z0-9_]+)\s*$"));

static START_COMPACT: Lazy<Regex> =
    Lazy::new(|| re(r"(?i)Start:\s*(\d{4})(\d{2})(\d{2})\s+(\d{2}):(\d{2}):(\d{2})"));

static START_ISO: Lazy<Regex> =
    Lazy::new(|| re(r"(?i)Start:\s*(\d{4})-(\d{2})-(\d{2})[ T](\d{2}):(\d{2}):(\d{2})"));

static ELAPSED: Lazy<Regex> = Lazy::new(|| {
    re(r"(?i)Start\s*/\s*End\s*/\s*Elapsed:\s*([^/]+?)\s*/\s*([^/]+?)\s*/\s*([0-9:.]+)")
});

static RUNTIME: Lazy<Regex> = Lazy::new(|| re(r"(?i)Runtime for .*?:\s*([0-9.]+)\s+seconds"));

static COMPACT_STAMP: Lazy<Regex> =
    Lazy::new(|| re(r"(\d{4})(\d{2})(\d{2})\s+(\d{2}):(\d{2}):(\d{2})"));

static SCREENSHOT: Lazy<Regex> = Lazy::new(|| re(r"Screenshot:\s*(.+?\.png)"));

static TIMESTAMP_PREFIX: Lazy<Regex> =
    Lazy::new(|| re(r"^\d{4}-\d{2}-\d{2}[ T][\d:.,]+\s*(?:-\s*[A-Z]+\s*-\s*)?"));

static PYTEST_PREFIX: Lazy<Regex> = Lazy::new(|| re(r"^E\s+"));

static SYNC_TOTAL: Lazy<Regex> =
    Lazy::new(|| re(r"(?i)(?:Total Jobs Checked:|Total Jobs:|Jobs Actually Checked:)\s*(\d+)"));

static SYNC_FAILURES: Lazy<Regex> =
    Lazy::new(|| re(r"(?i)(?:Total Failures|Jobs with Errors):\s*(\d+)"));

/// A `TEST <name>: <STATUS>` marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultMarker {
    pub test_name: String,
    pub status: RunStatus,
}

pub fn result_marker(line: &str) -> Option<ResultMarker> {
    let caps = RESULT.captures(line)?;
    let test_name = caps.get(1)?.as_str().trim();
    if test_name.is_empty() {
        return None;
    }
    let status = caps.get(2)?.as_str().parse().ok()?;
    Some(ResultMarker {
        test_name: test_name.to_string(),
        status,
    })
}

pub fn is_result_line(line: &str) -> bool {
    RESULT.is_match(line)
}

pub fn is_header_line(line: &str) -> bool {
    HEADER.is_match(line)
}

fn stamp(caps: &Captures<'_>) -> Option<NaiveDateTime> {
    let num = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
    let year = caps.get(1)?.as_str().parse::<i32>().ok()?;
    NaiveDate::from_ymd_opt(year, num(2)?, num(3)?)?.and_hms_opt(num(4)?, num(5)?, num(6)?)
}

/// Timestamp of a `Start: YYYYMMDD HH:MM:SS` marker.
pub fn start_marker(line: &str) -> Option<NaiveDateTime> {
    START_COMPACT.captures(line).and_then(|c| stamp(&c))
}

/// Either `Start:` form; used for the file-level date.
pub fn any_start_marker(line: &str) -> Option<NaiveDateTime> {
    start_marker(line).or_else(|| START_ISO.captures(line).and_then(|c| stamp(&c)))
}

/// First `YYYYMMDD HH:MM:SS` stamp inside `text`.
pub fn compact_stamp(text: &str) -> Option<NaiveDateTime> {
    COMPACT_STAMP.captures(text).and_then(|c| stamp(&c))
}

/// `Start / End / Elapsed: <start> / <end> / <duration>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Elapsed {
    pub start: String,
    pub end: String,
    pub duration: String,
}

pub fn elapsed(line: &str) -> Option<Elapsed> {
    let caps = ELAPSED.captures(line)?;
    Some(Elapsed {
        start: caps.get(1)?.as_str().trim().to_string(),
        end: caps.get(2)?.as_str().trim().to_string(),
        duration: caps.get(3)?.as_str().trim().to_string(),
    })
}

/// `Runtime for ...: N seconds`, rendered as `"N seconds"`.
pub fn runtime_seconds(line: &str) -> Option<String> {
    RUNTIME
        .captures(line)
        .and_then(|c| c.get(1))
        .map(|m| format!("{} seconds", m.as_str().trim()))
}

/// Screenshot path, made relative to `reports/` with forward slashes.
pub fn screenshot(line: &str) -> Option<String> {
    if !line.contains("Screenshot:") {
        return None;
    }
    let raw = SCREENSHOT.captures(line)?.get(1)?.as_str().trim();
    let path = if raw.starts_with("reports") {
        raw.replace('\\', "/")
    } else if let Some((_, rest)) = raw.split_once("reports") {
        format!("reports{}", rest.replace('\\', "/"))
    } else {
        raw.to_string()
    };
    Some(path)
}

/// Strip logger timestamp and pytest `E ` prefixes from a narrative line.
pub fn clean_narrative_line(line: &str) -> String {
    let line = TIMESTAMP_PREFIX.replace(line.trim(), "");
    PYTEST_PREFIX.replace(line.trim(), "").trim().to_string()
}

pub fn sync_total(line: &str) -> Option<u64> {
    SYNC_TOTAL
        .captures(line)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

pub fn sync_failures(line: &str) -> Option<u64> {
    SYNC_FAILURES
        .captures(line)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// `ID | Title | Error` table header of the sync failure table.
pub fn is_table_header(line: &str) -> bool {
    let lower = line.to_ascii_lowercase();
    line.contains('|') && lower.contains("id") && lower.contains("title") && lower.contains("error")
}
