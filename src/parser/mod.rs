//! Log parser: turns free-text execution logs into candidate run entries.
//!
//! Every `TEST <name>: <STATUS>` line yields one candidate. Its timestamp
//! comes from the nearest `Start:` marker above it, then from the start
//! of its `Start / End / Elapsed` line, then from the first `Start:` in the
//! file, and finally from the file's modification time. Nothing here fails:
//! unreadable files produce no candidates and are logged.

pub mod patterns;
pub mod sync_table;
pub mod tail;

use std::io;
use std::path::Path;

use chrono::{Local, NaiveDateTime};
use tracing::{debug, warn};

use crate::config::{AppConfig, ParserConfig, ReportConfig};
use crate::model::{latest_per_date, truncate_chars, RunEntry, RunStatus, COMPACT_FORMAT, NOT_AVAILABLE};
use crate::report;

use patterns::ResultMarker;

/// Lines inspected for the file-level `Start:` date.
const FILE_DATE_LINES: usize = 100;

#[derive(Debug, Clone)]
pub struct LogParser {
    cfg: ParserConfig,
    report: ReportConfig,
}

impl LogParser {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            cfg: config.parser.clone(),
            report: config.report.clone(),
        }
    }

    /// Parse every result in `path`, reading only the tail of huge logs.
    pub fn parse_file(&self, path: &Path) -> Vec<RunEntry> {
        let lines = match tail::read_bounded(path, self.cfg.tail_threshold_bytes, self.cfg.tail_read_bytes) {
            Ok(lines) => lines,
            Err(e) => {
                log_read_error(path, &e);
                return Vec::new();
            }
        };
        let fallback = fallback_time(path, &lines);
        let entries: Vec<RunEntry> = self.parse_lines(&lines, fallback).collect();
        debug!(path = %path.display(), lines = lines.len(), results = entries.len(), "parsed log");
        entries
    }

    /// Lazily yield one candidate per result marker in `lines`.
    pub fn parse_lines<'a>(&'a self, lines: &'a [String], fallback: NaiveDateTime) -> Candidates<'a> {
        Candidates {
            parser: self,
            lines,
            fallback,
            pos: 0,
        }
    }

    /// Most recent result of `test` in the last `quick_tail_bytes` of the log.
    ///
    /// Logs above the tail threshold are skipped entirely.
    pub fn latest_result(&self, path: &Path, test: &str) -> Option<RunEntry> {
        let size = std::fs::metadata(path).ok()?.len();
        if size > self.cfg.tail_threshold_bytes {
            debug!(path = %path.display(), "log too large for quick scan");
            return None;
        }
        let lines = tail::read_tail(path, self.cfg.quick_tail_bytes)
            .map_err(|e| log_read_error(path, &e))
            .ok()?;
        let fallback = fallback_time(path, &lines);

        lines.iter().enumerate().rev().find_map(|(i, line)| {
            patterns::result_marker(line)
                .filter(|m| m.test_name == test)
                .map(|m| self.candidate_at(&lines, i, m, fallback))
        })
    }

    /// Latest result of `test` per date within the last `history_tail_bytes`.
    pub fn tail_history(&self, path: &Path, test: &str) -> Vec<RunEntry> {
        let lines = match tail::read_tail(path, self.cfg.history_tail_bytes) {
            Ok(lines) => lines,
            Err(e) => {
                log_read_error(path, &e);
                return Vec::new();
            }
        };
        let fallback = fallback_time(path, &lines);
        latest_per_date(self.parse_lines(&lines, fallback).filter(|e| e.test_name == test))
    }

    fn candidate_at(&self, lines: &[String], i: usize, marker: ResultMarker, fallback: NaiveDateTime) -> RunEntry {
        let ResultMarker { test_name, status } = marker;
        let is_sync = self.report.is_sync_test(&test_name);

        let lo = i.saturating_sub(self.cfg.backward_window);
        let start_marker = lines[lo..i].iter().rev().find_map(|l| patterns::start_marker(l));

        let mut scan = ForwardScan::default();
        let hi = lines.len().min(i + 1 + self.cfg.forward_window);
        for (j, raw) in lines.iter().enumerate().take(hi).skip(i) {
            let line = raw.trim();
            if j > i && (patterns::is_header_line(line) || (!is_sync && patterns::is_result_line(line))) {
                break;
            }
            if scan.elapsed.is_none() {
                scan.elapsed = patterns::elapsed(line);
            }
            if scan.runtime.is_none() {
                scan.runtime = patterns::runtime_seconds(line);
            }
            if scan.screenshot.is_none() {
                scan.screenshot = patterns::screenshot(line);
            }
            if status == RunStatus::Fail
                && !is_sync
                && scan.narrative.is_none()
                && (line.contains("Message:") || line.contains("Error details:"))
            {
                scan.narrative = self.narrative(lines, j, &mut scan.screenshot);
            }
        }

        let running_time = match (&scan.elapsed, scan.runtime) {
            (Some(e), _) => e.duration.clone(),
            (None, Some(r)) => r,
            (None, None) => self.elapsed_before(lines, i).unwrap_or_else(|| NOT_AVAILABLE.to_string()),
        };

        let at = start_marker
            .or_else(|| scan.elapsed.as_ref().and_then(|e| patterns::compact_stamp(&e.start)))
            .unwrap_or(fallback);

        let mut entry = RunEntry::observed(test_name, status, at);
        entry.line_no = i + 1;
        entry.running_time = running_time;
        entry.screenshot_path = scan.screenshot;
        if let Some(e) = scan.elapsed {
            entry.start_time = e.start;
            entry.end_time = e.end;
        } else {
            entry.start_time = at.format(COMPACT_FORMAT).to_string();
        }

        if is_sync {
            let check = if status == RunStatus::Fail {
                sync_table::scan(lines, i + 1, &self.cfg, &self.report)
            } else {
                Default::default()
            };
            if status == RunStatus::Fail && check.error_jobs_count > 0 {
                let summary = report::sync_summary(&check, None);
                entry = entry.with_failure(truncate_chars(&summary, self.cfg.failure_max_chars));
            }
            entry.sync = Some(check);
        } else if let Some(text) = scan.narrative {
            entry = entry.with_failure(text);
        }
        entry
    }

    /// Failure narrative starting at `lines[from]`.
    fn narrative(&self, lines: &[String], from: usize, screenshot: &mut Option<String>) -> Option<String> {
        let mut kept = Vec::new();
        let end = lines.len().min(from + self.cfg.failure_capture_lines);
        for (k, raw) in lines.iter().enumerate().take(end).skip(from) {
            let line = raw.trim();
            if k > from && (patterns::is_result_line(line) || line.contains("Status:")) {
                break;
            }
            if line.is_empty() || line.starts_with('=') {
                continue;
            }
            let cleaned = patterns::clean_narrative_line(line);
            if cleaned.is_empty() {
                continue;
            }
            if screenshot.is_none() {
                *screenshot = patterns::screenshot(&cleaned);
            }
            kept.push(cleaned);
        }
        if kept.is_empty() {
            return None;
        }
        kept.truncate(self.cfg.failure_max_lines);
        Some(truncate_chars(&kept.join("\n"), self.cfg.failure_max_chars))
    }

    /// Elapsed or runtime marker just above the result line.
    fn elapsed_before(&self, lines: &[String], i: usize) -> Option<String> {
        let lo = i.saturating_sub(self.cfg.elapsed_backward_window);
        lines[lo..i].iter().rev().find_map(|l| {
            patterns::elapsed(l)
                .map(|e| e.duration)
                .or_else(|| patterns::runtime_seconds(l))
        })
    }
}

#[derive(Default)]
struct ForwardScan {
    elapsed: Option<patterns::Elapsed>,
    runtime: Option<String>,
    screenshot: Option<String>,
    narrative: Option<String>,
}

/// Iterator over the candidates of an in-memory log.
pub struct Candidates<'a> {
    parser: &'a LogParser,
    lines: &'a [String],
    fallback: NaiveDateTime,
    pos: usize,
}

impl Iterator for Candidates<'_> {
    type Item = RunEntry;

    fn next(&mut self) -> Option<RunEntry> {
        while self.pos < self.lines.len() {
            let i = self.pos;
            self.pos += 1;
            if let Some(marker) = patterns::result_marker(&self.lines[i]) {
                return Some(self.parser.candidate_at(self.lines, i, marker, self.fallback));
            }
        }
        None
    }
}

/// First `Start:` marker near the top of the log.
pub fn file_date(lines: &[String]) -> Option<NaiveDateTime> {
    lines
        .iter()
        .take(FILE_DATE_LINES)
        .find_map(|l| patterns::any_start_marker(l))
}

fn fallback_time(path: &Path, lines: &[String]) -> NaiveDateTime {
    file_date(lines)
        .or_else(|| tail::modified_at(path).ok())
        .unwrap_or_else(|| Local::now().naive_local())
}

fn log_read_error(path: &Path, e: &io::Error) {
    if e.kind() == io::ErrorKind::NotFound {
        debug!(path = %path.display(), "log file not found");
    } else {
        warn!(path = %path.display(), error = %e, "failed to read log file");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::parse_timestamp;

    fn parser() -> LogParser {
        LogParser::new(&AppConfig::default())
    }

    fn lines(text: &str) -> Vec<String> {
        text.lines().map(str::to_string).collect()
    }

    fn fallback() -> NaiveDateTime {
        parse_timestamp("2025-12-31T23:00:00").unwrap()
    }

    #[test]
    fn test_elapsed_after_result_sets_date_and_runtime() {
        let log = lines(
            "TEST test_x: PASS
Start / End / Elapsed: 20260101 10:00:00 / 20260101 10:00:05 / 5.0",
        );
        let p = parser();
        let entries: Vec<_> = p.parse_lines(&log, fallback()).collect();
        assert_eq!(entries.len(), 1);
        let e = &entries[0];
        assert_eq!(e.test_name, "test_x");
        assert_eq!(e.status, RunStatus::Pass);
        assert_eq!(e.date.to_string(), "2026-01-01");
        assert_eq!(e.running_time, "5.0");
        assert_eq!(e.start_time, "20260101 10:00:00");
        assert_eq!(e.end_time, "20260101 10:00:05");
        assert_eq!(e.line_no, 1);
    }

    #[test]
    fn test_nearest_start_marker_wins() {
        let log = lines(
            "TEST test_a
Start: 20260102 08:00:00.100
TEST test_a: PASS
TEST test_b
Start: 20260102 09:30:00.000
TEST test_b: SKIP",
        );
        let p = parser();
        let entries: Vec<_> = p.parse_lines(&log, fallback()).collect();
        assert_eq!(entries[1].datetime.unwrap().to_string(), "2026-01-02 09:30:00");
        assert_eq!(entries[1].start_time, "20260102 09:30:00");
        assert_eq!(entries[0].running_time, NOT_AVAILABLE);
    }

    #[test]
    fn test_no_markers_falls_back() {
        let log = lines("TEST test_z: FAIL");
        let p = parser();
        let e = p.parse_lines(&log, fallback()).next().unwrap();
        assert_eq!(e.datetime, Some(fallback()));
        assert!(e.failure_message.is_none());
    }

    #[test]
    fn test_failure_narrative_is_cleaned_and_bounded() {
        let mut text = String::from("TEST test_f: FAIL\n");
        text.push_str("2026-01-01 10:00:00,001 - ERROR - Message: element not found\n");
        text.push_str("==========\n\n");
        for n in 0..15 {
            text.push_str(&format!("E   detail {n}\n"));
        }
        text.push_str("Screenshot: /home/qa/reports/shots/f.png\n");
        let log = lines(&text);
        let p = parser();
        let e = p.parse_lines(&log, fallback()).next().unwrap();
        let msg = e.failure_message.unwrap();
        assert!(msg.starts_with("Message: element not found\ndetail 0"));
        assert_eq!(msg.lines().count(), 10);
        assert_eq!(e.error_details.as_deref(), Some(msg.as_str()));
        assert_eq!(e.screenshot_path.as_deref(), Some("reports/shots/f.png"));
    }

    #[test]
    fn test_narrative_stops_at_status_line() {
        let log = lines(
            "TEST test_f: FAIL
Message: boom
Status: FAIL
unrelated",
        );
        let p = parser();
        let e = p.parse_lines(&log, fallback()).next().unwrap();
        assert_eq!(e.failure_message.as_deref(), Some("Message: boom"));
    }

    #[test]
    fn test_forward_scan_stops_at_next_test() {
        let log = lines(
            "TEST test_a: PASS
TEST test_b
Start / End / Elapsed: 20260101 10:00:00 / 20260101 10:00:05 / 5.0
TEST test_b: PASS",
        );
        let p = parser();
        let entries: Vec<_> = p.parse_lines(&log, fallback()).collect();
        // test_a must not borrow test_b's elapsed line
        assert_eq!(entries[0].running_time, NOT_AVAILABLE);
        assert_eq!(entries[1].running_time, "5.0");
    }

    #[test]
    fn test_runtime_seconds_before_result() {
        let log = lines(
            "Runtime for 'test_r': 3.25 seconds
TEST test_r: PASS",
        );
        let p = parser();
        let e = p.parse_lines(&log, fallback()).next().unwrap();
        assert_eq!(e.running_time, "3.25 seconds");
    }

    #[test]
    fn test_sync_test_reads_legacy_table() {
        let log = lines(
            "TEST test_t1_09_db_solr_sync_verification: FAIL
TEST test_other: PASS
Jobs Actually Checked: 50
Total Failures: 1
ID | Title | Error
1 | Engineer | Not Found in Solr
",
        );
        let p = parser();
        let e = p.parse_lines(&log, fallback()).next().unwrap();
        let check = e.sync.clone().unwrap();
        assert_eq!(check.total_jobs, 50);
        assert_eq!(check.error_jobs.len(), 1);
        assert!(e.failure_message.unwrap().contains("SOLR SYNC FAILURE SUMMARY"));
    }

    #[test]
    fn test_passing_sync_test_carries_zero_detail() {
        let log = lines("TEST test_t1_09_db_solr_sync_verification: PASS");
        let p = parser();
        let e = p.parse_lines(&log, fallback()).next().unwrap();
        assert_eq!(e.sync, Some(Default::default()));
    }

    #[test]
    fn test_file_date_from_header() {
        let log = lines("== run ==\nStart: 2026-01-19 11:16:24\nTEST test_q: PASS");
        assert_eq!(file_date(&log).unwrap().to_string(), "2026-01-19 11:16:24");
    }

    #[test]
    fn test_parse_missing_file_is_empty() {
        let p = parser();
        assert!(p.parse_file(Path::new("/nonexistent/qa.log")).is_empty());
    }

    #[test]
    fn test_quick_scans() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("employer.log");
        std::fs::write(
            &path,
            "TEST test_e
Start: 20260103 08:00:00.000
TEST test_e: PASS
TEST test_e
Start: 20260104 08:00:00.000
TEST test_e: FAIL
TEST test_e
Start: 20260104 09:00:00.000
TEST test_e: PASS
",
        )
        .unwrap();
        let p = parser();

        let latest = p.latest_result(&path, "test_e").unwrap();
        assert_eq!(latest.status, RunStatus::Pass);
        assert_eq!(latest.date.to_string(), "2026-01-04");

        let history = p.tail_history(&path, "test_e");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].status, RunStatus::Pass);
        assert_eq!(history[0].datetime.unwrap().to_string(), "2026-01-04 09:00:00");
        assert_eq!(history[1].date.to_string(), "2026-01-03");

        assert!(p.latest_result(&path, "test_missing").is_none());
    }
}
