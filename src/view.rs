//! Read-side views over the stored history: test listings and per-test
//! seven-day series.

use std::collections::BTreeSet;
use std::collections::HashSet;

use chrono::{Duration, NaiveDateTime};
use serde::Serialize;
use tracing::debug;

use crate::config::HistoryOrder;
use crate::context::AppContext;
use crate::history::LoadMode;
use crate::model::RunEntry;
use crate::modules::Module;
use crate::parser::{patterns, tail};
use crate::reconcile::merge;
use crate::report::FailureReport;

/// Per-test history plus a hint that the log has moved on since the store.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryLookup {
    pub entries: Vec<RunEntry>,
    pub needs_refresh: bool,
}

/// Tests known for `module`: stored history plus discovered test functions,
/// falling back to result markers in the log tail.
pub fn test_cases(ctx: &AppContext, module: Module, now: NaiveDateTime) -> Vec<String> {
    let doc = ctx.store.load(module, &ctx.registry, now, LoadMode::Read);
    let mut names: BTreeSet<String> = doc.tests.into_keys().collect();
    names.extend(ctx.registry.allowlist(module).iter().cloned());

    if names.is_empty() {
        let log = ctx.config.log_path(module);
        if let Ok(lines) = tail::read_tail(&log, ctx.config.parser.quick_tail_bytes) {
            names.extend(
                lines
                    .iter()
                    .filter_map(|l| patterns::result_marker(l))
                    .map(|m| m.test_name)
                    .filter(|n| ctx.registry.belongs(n, module)),
            );
        }
        debug!(module = %module, found = names.len(), "listed tests from log tail");
    }
    names.into_iter().collect()
}

/// Recent history of one test.
///
/// Foreign tests yield nothing. The sync-verification test yields only
/// its latest entry; every other test yields one entry per retained day,
/// with `NOT_RUN` placeholders for days without a run.
pub fn history(ctx: &AppContext, module: Module, test: &str, now: NaiveDateTime) -> HistoryLookup {
    if !ctx.registry.belongs(test, module) {
        return HistoryLookup {
            entries: Vec::new(),
            needs_refresh: false,
        };
    }

    let doc = ctx.store.load(module, &ctx.registry, now, LoadMode::Read);
    let mut stored = doc.entries(test).to_vec();
    let log = ctx.config.log_path(module);
    let mut needs_refresh = ctx.history_is_stale(module);
    let is_sync = ctx.config.report.is_sync_test(test);

    if stored.is_empty() {
        let found: Vec<RunEntry> = if is_sync {
            ctx.parser.latest_result(&log, test).into_iter().collect()
        } else {
            ctx.parser.tail_history(&log, test)
        };
        if found.is_empty() {
            needs_refresh = log.exists();
        } else {
            debug!(module = %module, test, found = found.len(), "seeding history from log tail");
            let mut raw = ctx.store.load_raw(module);
            merge(&mut raw, found);
            ctx.store.save(module, &raw, now);
            stored = ctx
                .store
                .load(module, &ctx.registry, now, LoadMode::Read)
                .entries(test)
                .to_vec();
        }
    }

    let entries = if is_sync {
        latest_sync_entry(ctx, stored, now).into_iter().collect()
    } else {
        daily_series(ctx, test, &stored, now)
    };
    HistoryLookup { entries, needs_refresh }
}

pub(crate) fn daily_series(ctx: &AppContext, test: &str, stored: &[RunEntry], now: NaiveDateTime) -> Vec<RunEntry> {
    let today = now.date();
    let mut series: Vec<RunEntry> = (0..i64::from(ctx.store.retention_days()))
        .map(|back| {
            let day = today - Duration::days(back);
            stored
                .iter()
                .find(|e| e.date == day)
                .cloned()
                .unwrap_or_else(|| RunEntry::not_run(test, day))
        })
        .collect();
    if ctx.config.history.order == HistoryOrder::OldestFirst {
        series.reverse();
    }
    series
}

fn latest_sync_entry(ctx: &AppContext, stored: Vec<RunEntry>, now: NaiveDateTime) -> Option<RunEntry> {
    let cfg = &ctx.config.report;
    let latest = stored.into_iter().next();

    let report = FailureReport::read(&ctx.config.failure_report_path(), cfg);
    // The stored entry is not a log result, so only the age limit applies,
    // and the report must postdate what is stored.
    let fresher = report.filter(|r| {
        let stored_at = latest.as_ref().and_then(|e| e.datetime);
        r.is_trusted(&[], now, cfg) && stored_at.map_or(true, |t| r.modified > t)
    });

    let mut entry = match (fresher, latest) {
        (Some(r), prev) => {
            let name = prev.as_ref().map_or(cfg.sync_test.as_str(), |e| e.test_name.as_str()).to_string();
            let mut e = r.to_entry(&name);
            if let Some(p) = prev.filter(|p| p.date == e.date) {
                e.running_time = p.running_time;
            }
            e
        }
        (None, Some(prev)) => prev,
        (None, None) => return None,
    };
    tidy_failure_rows(&mut entry);
    Some(entry)
}

/// De-duplicate rows, cap them at the failure count and stamp `detected_at`.
fn tidy_failure_rows(entry: &mut RunEntry) {
    let stamp = entry
        .datetime
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S").to_string())
        .unwrap_or_else(|| entry.date.to_string());
    let Some(check) = entry.sync.as_mut() else {
        return;
    };

    let mut seen = HashSet::new();
    check
        .error_jobs
        .retain(|r| seen.insert((r.id.clone(), r.title.clone(), r.error.clone())));
    check.cap_rows();
    for row in &mut check.error_jobs {
        row.detected_at.get_or_insert_with(|| stamp.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::model::{parse_timestamp, FailureRow, RunStatus, SyncCheck};

    fn ctx(root: &std::path::Path) -> AppContext {
        AppContext::new(AppConfig::with_root(root))
    }

    fn now() -> NaiveDateTime {
        parse_timestamp("2026-01-10T12:00:00").unwrap()
    }

    #[test]
    fn test_series_has_placeholder_per_missing_day() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(dir.path());
        let stored = vec![RunEntry::observed(
            "test_js_a",
            RunStatus::Pass,
            parse_timestamp("2026-01-08T09:00:00").unwrap(),
        )];

        let series = daily_series(&ctx, "test_js_a", &stored, now());
        assert_eq!(series.len(), 7);
        assert_eq!(series[0].date.to_string(), "2026-01-10");
        assert_eq!(series[0].status, RunStatus::NotRun);
        assert_eq!(series[0].running_time, "N/A");
        assert_eq!(series[0].datetime.unwrap().to_string(), "2026-01-10 00:00:00");
        assert_eq!(series[2].status, RunStatus::Pass);
        assert_eq!(series[6].date.to_string(), "2026-01-04");
    }

    #[test]
    fn test_oldest_first_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = AppConfig::with_root(dir.path());
        cfg.history.order = HistoryOrder::OldestFirst;
        let ctx = AppContext::new(cfg);
        let series = daily_series(&ctx, "test_js_a", &[], now());
        assert_eq!(series[0].date.to_string(), "2026-01-04");
        assert_eq!(series[6].date.to_string(), "2026-01-10");
    }

    const SYNC: &str = "test_t1_09_db_solr_sync_verification";

    fn store_sync_history(ctx: &AppContext, at: NaiveDateTime) {
        let mut older = RunEntry::observed(SYNC, RunStatus::Pass, parse_timestamp("2026-01-08T08:00:00").unwrap());
        older.running_time = "30.0".into();
        let mut latest = RunEntry::observed(SYNC, RunStatus::Pass, parse_timestamp("2026-01-09T08:00:00").unwrap());
        latest.running_time = "42.0".into();
        latest.sync = Some(SyncCheck::default());

        let mut doc = crate::history::HistoryDocument::default();
        doc.tests.insert(SYNC.to_string(), vec![latest, older]);
        assert!(ctx.store.save(Module::Jobseeker, &doc, at));
    }

    fn write_report(root: &std::path::Path, modified: NaiveDateTime) {
        use chrono::TimeZone;
        let path = root.join("reports/db_solr_sync_failures.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(
            &path,
            r#"{"total_jobs_checked": 40, "total_failures": 3, "failures": [
                {"id": 1, "db_title": "A", "msg": "Not Found in Solr"},
                {"id": 2, "db_title": "B", "msg": "Not Found in Solr"},
                {"id": 3, "db_title": "C", "msg": "Title mismatch"}
            ]}"#,
        )
        .unwrap();
        let stamp: std::time::SystemTime = chrono::Local.from_local_datetime(&modified).single().unwrap().into();
        std::fs::File::options().write(true).open(&path).unwrap().set_modified(stamp).unwrap();
    }

    #[test]
    fn test_sync_history_is_latest_entry_only() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(dir.path());
        let at = parse_timestamp("2026-01-09T12:00:00").unwrap();
        store_sync_history(&ctx, at);

        let lookup = history(&ctx, Module::Jobseeker, SYNC, at);
        assert_eq!(lookup.entries.len(), 1);
        assert_eq!(lookup.entries[0].date.to_string(), "2026-01-09");
        assert_eq!(lookup.entries[0].running_time, "42.0");
    }

    #[test]
    fn test_fresher_report_replaces_stored_sync_entry() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(dir.path());
        let at = parse_timestamp("2026-01-09T12:00:00").unwrap();
        store_sync_history(&ctx, at);
        write_report(dir.path(), parse_timestamp("2026-01-09T10:00:00").unwrap());

        let lookup = history(&ctx, Module::Jobseeker, SYNC, at);
        assert_eq!(lookup.entries.len(), 1);
        let entry = &lookup.entries[0];
        assert_eq!(entry.status, RunStatus::Fail);
        assert_eq!(entry.source, crate::model::EntrySource::Report);
        assert_eq!(entry.running_time, "42.0");
        let check = entry.sync.as_ref().unwrap();
        assert_eq!(check.error_jobs_count, 3);
        assert_eq!(check.error_jobs.len(), 3);
        assert_eq!(check.error_jobs[0].detected_at.as_deref(), Some("2026-01-09T10:00:00"));
    }

    #[test]
    fn test_report_older_than_stored_entry_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(dir.path());
        let at = parse_timestamp("2026-01-09T12:00:00").unwrap();
        store_sync_history(&ctx, at);
        write_report(dir.path(), parse_timestamp("2026-01-09T07:00:00").unwrap());

        let lookup = history(&ctx, Module::Jobseeker, SYNC, at);
        assert_eq!(lookup.entries.len(), 1);
        assert_eq!(lookup.entries[0].status, RunStatus::Pass);
    }

    #[test]
    fn test_foreign_test_has_no_history() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(dir.path());
        let lookup = history(&ctx, Module::Jobseeker, "test_admin_thing", now());
        assert!(lookup.entries.is_empty());
    }

    #[test]
    fn test_missing_history_is_seeded_from_log_tail() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(dir.path());
        std::fs::create_dir_all(dir.path().join("logs")).unwrap();
        std::fs::write(
            dir.path().join("logs/jobseeker.log"),
            "TEST test_js_a\nStart: 20260109 08:00:00.000\nTEST test_js_a: FAIL\n",
        )
        .unwrap();

        let lookup = history(&ctx, Module::Jobseeker, "test_js_a", now());
        assert_eq!(lookup.entries.len(), 7);
        assert_eq!(lookup.entries[1].status, RunStatus::Fail);
        assert!(!ctx.store.load_raw(Module::Jobseeker).entries("test_js_a").is_empty());
    }

    #[test]
    fn test_sync_rows_are_deduplicated_and_stamped() {
        let mut e = RunEntry::observed(
            "test_t1_09_db_solr_sync_verification",
            RunStatus::Fail,
            parse_timestamp("2026-01-09T08:00:00").unwrap(),
        );
        e.sync = Some(SyncCheck {
            total_jobs: 10,
            error_jobs_count: 2,
            error_jobs: vec![
                FailureRow::new("1", "a", "x"),
                FailureRow::new("1", "a", "x"),
                FailureRow::new("2", "b", "y"),
                FailureRow::new("3", "c", "z"),
            ],
        });
        tidy_failure_rows(&mut e);
        let rows = &e.sync.unwrap().error_jobs;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].id, "2");
        assert_eq!(rows[0].detected_at.as_deref(), Some("2026-01-09T08:00:00"));
    }

    #[test]
    fn test_test_cases_union_sources_and_history() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("tests/employer")).unwrap();
        std::fs::write(
            dir.path().join("tests/employer/test_employer_test_cases.py"),
            "def test_t1_01_post_job():\n    pass\n",
        )
        .unwrap();
        let ctx = ctx(dir.path());
        assert_eq!(test_cases(&ctx, Module::Employer, now()), vec!["test_t1_01_post_job"]);
        assert!(test_cases(&ctx, Module::Jobseeker, now()).is_empty());
    }
}
