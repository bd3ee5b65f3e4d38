//! Side-channel failure report written by the sync-verification test.
//!
//! The report is authoritative for that one test when it is fresh. It is
//! read leniently: a truncated file still yields its totals.

use std::path::Path;

use chrono::{Duration, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ReportConfig;
use crate::model::{truncate_chars, EntrySource, FailureRow, RunEntry, RunStatus, SyncCheck};
use crate::parser::tail;

/// Cap on the summary narrative stored with the entry.
const SUMMARY_MAX_CHARS: usize = 2000;
/// Rows rendered into the summary table.
const SUMMARY_MAX_ROWS: usize = 1000;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to read failure report: {0}")]
    Io(#[from] std::io::Error),
}

static TOTAL_CHECKED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""total_jobs_checked"\s*:\s*(\d+)"#).expect("valid regex"));
static TOTAL_AVAILABLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""total_jobs_available"\s*:\s*(\d+)"#).expect("valid regex"));
static TOTAL_FAILURES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""total_failures"\s*:\s*(\d+)"#).expect("valid regex"));
static FAILURE_ITEM: Lazy<Regex> = Lazy::new(|| Regex::new(r#"\{\s*"id"\s*:"#).expect("valid regex"));

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawReport {
    Structured {
        total_jobs_checked: Option<u64>,
        total_jobs_available: Option<u64>,
        total_failures: Option<u64>,
        #[serde(default)]
        failures: Vec<RawFailure>,
    },
    Legacy(Vec<RawFailure>),
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawFailure {
    id: Value,
    db_title: Value,
    msg: Value,
    status: Option<String>,
}

fn text(v: &Value) -> String {
    match v {
        Value::Null => "N/A".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Counters over the failure list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FailureAnalysis {
    /// Jobs missing from the search index.
    pub not_found: usize,
    /// Jobs whose check raised an error.
    pub errors: usize,
    /// Jobs found but with mismatching fields.
    pub mismatches: usize,
}

impl FailureAnalysis {
    fn of(failures: &[RawFailure]) -> Self {
        let mut a = Self::default();
        for f in failures {
            let msg = f.msg.as_str().unwrap_or("");
            if msg.contains("Not Found in Solr") {
                a.not_found += 1;
            }
            match f.status.as_deref() {
                Some("ERROR") => a.errors += 1,
                Some("FAIL") if !msg.contains("Not Found") => a.mismatches += 1,
                _ => {}
            }
        }
        a
    }
}

#[derive(Debug, Clone)]
pub struct FailureReport {
    pub total_jobs: u64,
    pub total_failures: u64,
    pub failures: Vec<FailureRow>,
    pub analysis: Option<FailureAnalysis>,
    /// Modification time of the report file.
    pub modified: NaiveDateTime,
    /// True when the totals were recovered from a malformed file.
    pub salvaged: bool,
}

impl FailureReport {
    /// Read the report at `path`; absent or unreadable reports yield `None`.
    pub fn read(path: &Path, cfg: &ReportConfig) -> Option<Self> {
        match Self::try_read(path, cfg) {
            Ok(report) => Some(report),
            Err(ReportError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no failure report");
                None
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring failure report");
                None
            }
        }
    }

    fn try_read(path: &Path, cfg: &ReportConfig) -> Result<Self, ReportError> {
        let content = std::fs::read_to_string(path)?;
        let modified = tail::modified_at(path)?;
        let report = match serde_json::from_str::<RawReport>(&content) {
            Ok(raw) => Self::from_raw(raw, modified, cfg),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failure report is malformed, salvaging totals");
                Self::salvage(&content, modified)
            }
        };
        Ok(report)
    }

    fn from_raw(raw: RawReport, modified: NaiveDateTime, cfg: &ReportConfig) -> Self {
        let (total_jobs, total_failures, failures) = match raw {
            RawReport::Structured {
                total_jobs_checked,
                total_jobs_available,
                total_failures,
                failures,
            } => {
                let total_jobs = total_jobs_checked
                    .filter(|n| *n > 0)
                    .or(total_jobs_available)
                    .unwrap_or(0);
                let total_failures = total_failures
                    .filter(|n| *n > 0)
                    .unwrap_or(failures.len() as u64);
                (total_jobs, total_failures, failures)
            }
            RawReport::Legacy(failures) => (0, failures.len() as u64, failures),
        };

        let analysis = (!failures.is_empty()).then(|| FailureAnalysis::of(&failures));
        let rows = failures
            .iter()
            .map(|f| {
                FailureRow::new(
                    text(&f.id),
                    truncate_chars(&text(&f.db_title), cfg.title_max_chars),
                    truncate_chars(&text(&f.msg), cfg.error_max_chars),
                )
            })
            .collect();

        Self {
            total_jobs,
            total_failures,
            failures: rows,
            analysis,
            modified,
            salvaged: false,
        }
    }

    fn salvage(content: &str, modified: NaiveDateTime) -> Self {
        let grab = |re: &Regex| {
            re.captures(content)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse::<u64>().ok())
        };
        let total_jobs = grab(&TOTAL_CHECKED).or_else(|| grab(&TOTAL_AVAILABLE)).unwrap_or(0);
        let total_failures = grab(&TOTAL_FAILURES)
            .filter(|n| *n > 0)
            .unwrap_or_else(|| FAILURE_ITEM.find_iter(content).count() as u64);
        Self {
            total_jobs,
            total_failures,
            failures: Vec::new(),
            analysis: None,
            modified,
            salvaged: true,
        }
    }

    /// Whether the report belongs to the run being reconciled.
    ///
    /// When the log has results for the test, the report must be within
    /// `match_window_secs` of one of them. Only without log results does the
    /// `max_age_secs` limit against `now` apply.
    pub fn is_trusted(&self, log_times: &[NaiveDateTime], now: NaiveDateTime, cfg: &ReportConfig) -> bool {
        if !log_times.is_empty() {
            let window = Duration::seconds(cfg.match_window_secs);
            return log_times.iter().any(|t| (*t - self.modified).abs() < window);
        }
        let age = now - self.modified;
        age >= Duration::zero() && age <= Duration::seconds(cfg.max_age_secs)
    }

    /// Run entry for `test_name` stamped at the report's modification time.
    pub fn to_entry(&self, test_name: &str) -> RunEntry {
        let status = if self.total_failures > 0 {
            RunStatus::Fail
        } else {
            RunStatus::Pass
        };
        let mut check = SyncCheck {
            total_jobs: self.total_jobs,
            error_jobs_count: self.total_failures,
            error_jobs: self.failures.clone(),
        };
        check.cap_rows();

        let mut entry = RunEntry::observed(test_name, status, self.modified);
        if status == RunStatus::Fail {
            entry = entry.with_failure(truncate_chars(
                &sync_summary(&check, self.analysis.as_ref()),
                SUMMARY_MAX_CHARS,
            ));
        }
        entry.source = EntrySource::Report;
        entry.sync = Some(check);
        entry
    }
}

/// Human-readable summary of a sync check, with a fixed-width failure table.
pub fn sync_summary(check: &SyncCheck, analysis: Option<&FailureAnalysis>) -> String {
    let rule = "=".repeat(120);
    let failures = if check.error_jobs_count > 0 {
        check.error_jobs_count
    } else {
        check.error_jobs.len() as u64
    };
    let checked = if check.total_jobs > 0 {
        check.total_jobs
    } else {
        check.error_jobs.len() as u64
    };

    let mut out = format!("{rule}\nSOLR SYNC FAILURE SUMMARY\n{rule}\n");
    if check.total_jobs > 0 {
        out.push_str(&format!("Total Jobs Available in DB (last 24h): {}\n", check.total_jobs));
    }
    out.push_str(&format!("Jobs Actually Checked: {checked}\n"));
    out.push_str(&format!("Total Failures: {failures}\n"));
    if check.error_jobs_count > 0 && check.total_jobs > 0 {
        let ok = check.total_jobs.saturating_sub(check.error_jobs_count) as f64;
        out.push_str(&format!("Success Rate: {:.2}%\n", ok / check.total_jobs as f64 * 100.0));
    }
    out.push_str(&rule);
    out.push('\n');

    if let Some(a) = analysis {
        out.push_str("\nFailure Analysis:\n");
        out.push_str(&format!("  - Not Found in Solr: {} jobs\n", a.not_found));
        out.push_str(&format!("  - Field Mismatches: {} jobs\n", a.mismatches));
        out.push_str(&format!("  - Query Errors: {} jobs\n", a.errors));
        out.push_str(&rule);
        out.push_str("\n\n");
    }

    let header = format!("{:<12} | {:<50} | {:<50}", "ID", "Title", "Error");
    let sep = "-".repeat(header.len());
    out.push_str(&format!("{sep}\n{header}\n{sep}\n"));
    for row in check.error_jobs.iter().take(SUMMARY_MAX_ROWS) {
        out.push_str(&format!(
            "{:<12} | {:<50} | {:<50}\n",
            truncate_chars(&row.id, 12),
            truncate_chars(&row.title, 50),
            truncate_chars(&row.error, 50)
        ));
    }
    if check.error_jobs.len() > SUMMARY_MAX_ROWS {
        out.push_str(&format!(
            "\n... and {} more failures\n",
            check.error_jobs.len() - SUMMARY_MAX_ROWS
        ));
    }
    out.push_str(&sep);
    out.push('\n');
    out
}
