//! Legacy failure table logged by the sync-verification test.
//!
//! ```text
//! Jobs Actually Checked: 120
//! Total Failures: 2
//! ------------------------------------------
//! ID           | Title        | Error
//! ------------------------------------------
//! 101          | Engineer     | Not Found in Solr
//! 102          | Analyst      | title mismatch
//! ==========================================
//! ```

use crate::config::{ParserConfig, ReportConfig};
use crate::model::{truncate_chars, FailureRow, SyncCheck};

use super::patterns;

/// How far past the result line the "available in DB" fallback looks.
const TOTAL_FALLBACK_LINES: usize = 500;

fn is_rule(line: &str, ch: char) -> bool {
    line.starts_with(ch) && line.chars().count() > 20
}

/// Scan `lines[from..]` for counters and the first failure table.
pub fn scan(lines: &[String], from: usize, parser: &ParserConfig, report: &ReportConfig) -> SyncCheck {
    let mut check = SyncCheck::default();

    for (j, raw) in lines.iter().enumerate().skip(from) {
        let line = raw.trim();
        if let Some(total) = patterns::sync_total(line) {
            check.total_jobs = total;
        }
        if let Some(failures) = patterns::sync_failures(line) {
            check.error_jobs_count = failures;
        }
        if patterns::is_table_header(line) {
            check.error_jobs = table_rows(&lines[j + 1..], parser.table_max_rows, report);
            break;
        }
    }

    if check.total_jobs == 0 {
        check.total_jobs = lines
            .iter()
            .skip(from)
            .take(TOTAL_FALLBACK_LINES)
            .filter(|l| l.contains("Total Jobs Available in DB") || l.contains("Jobs Actually Checked:"))
            .find_map(|l| l.rsplit(':').next().and_then(|n| n.trim().parse().ok()))
            .unwrap_or(0);
    }

    check.cap_rows();
    check
}

fn table_rows(lines: &[String], max_rows: usize, report: &ReportConfig) -> Vec<FailureRow> {
    let mut rows = Vec::new();
    for raw in lines.iter().take(max_rows) {
        let line = raw.trim();
        if is_rule(line, '-') {
            continue;
        }
        if is_rule(line, '=') {
            break;
        }
        if line.is_empty() {
            if !rows.is_empty() {
                break;
            }
            continue;
        }
        if !line.contains('|') || line.starts_with('-') || line.starts_with('=') {
            continue;
        }
        let parts: Vec<&str> = line.split('|').map(str::trim).filter(|p| !p.is_empty()).collect();
        if parts.len() < 3 || parts[0].eq_ignore_ascii_case("id") {
            continue;
        }
        rows.push(FailureRow::new(
            parts[0],
            truncate_chars(parts[1], report.title_max_chars),
            truncate_chars(parts[2], report.error_max_chars),
        ));
    }
    rows
}
