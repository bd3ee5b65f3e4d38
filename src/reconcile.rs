//! Reconciliation: merge log candidates and the failure report into the
//! stored history of one module.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

use crate::context::AppContext;
use crate::history::{retention, HistoryDocument};
use crate::model::{compare_recency, EntrySource, RunEntry, NOT_AVAILABLE};
use crate::modules::Module;
use crate::report::FailureReport;

/// Result of one reconciliation pass.
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileOutcome {
    pub run_id: Uuid,
    pub module: Module,
    /// Candidates that belong to the module after report substitution.
    pub candidates: usize,
    /// Candidates that added or replaced a stored entry.
    pub accepted: usize,
    /// Foreign test names removed from the document.
    pub purged: Vec<String>,
    pub expired: usize,
    pub tests: usize,
    pub entries: usize,
    pub saved: bool,
    /// True when an empty result was discarded in favour of stored data.
    pub preserved: bool,
    pub report_used: bool,
}

pub struct Reconciler<'a> {
    ctx: &'a AppContext,
}

impl<'a> Reconciler<'a> {
    pub fn new(ctx: &'a AppContext) -> Self {
        Self { ctx }
    }

    /// Reconcile `module` as of `now` and persist the result.
    pub fn run(&self, module: Module, now: NaiveDateTime) -> ReconcileOutcome {
        let run_id = Uuid::new_v4();
        let span = info_span!("reconcile", %run_id, module = %module);
        let _guard = span.enter();

        let ctx = self.ctx;
        let log_path = ctx.config.log_path(module);
        let mut candidates = ctx.parser.parse_file(&log_path);
        let parsed = candidates.len();
        candidates.retain(|c| ctx.registry.belongs(&c.test_name, module));
        debug!(parsed, kept = candidates.len(), "filtered log candidates");

        let report_used = self.substitute_report(module, &mut candidates, now);

        let raw = ctx.store.load_raw(module);
        let mut doc = raw.clone();
        let candidate_count = candidates.len();
        let accepted = merge(&mut doc, candidates);
        let purged = doc.retain_tests(|name| ctx.registry.belongs(name, module));
        let expired = retention::apply(&mut doc, now.date(), ctx.store.retention_days());

        let mut outcome = ReconcileOutcome {
            run_id,
            module,
            candidates: candidate_count,
            accepted,
            purged,
            expired,
            tests: doc.tests.len(),
            entries: doc.entry_count(),
            saved: false,
            preserved: false,
            report_used,
        };

        // Purge and expiry may legitimately empty the document; anything
        // else emptying non-empty stored data is treated as a bad pass.
        if doc.is_empty() && !raw.is_empty() && outcome.purged.is_empty() && outcome.expired == 0 {
            warn!(
                stored_tests = raw.tests.len(),
                "reconciliation produced an empty history, keeping stored data"
            );
            outcome.preserved = true;
            outcome.tests = raw.tests.len();
            outcome.entries = raw.entry_count();
            return outcome;
        }

        outcome.saved = ctx.store.save(module, &doc, now);
        info!(
            accepted = outcome.accepted,
            purged = outcome.purged.len(),
            expired = outcome.expired,
            tests = outcome.tests,
            saved = outcome.saved,
            "reconciled history"
        );
        outcome
    }

    /// Replace log-derived sync-test candidates with a trusted report entry.
    fn substitute_report(&self, module: Module, candidates: &mut Vec<RunEntry>, now: NaiveDateTime) -> bool {
        let cfg = &self.ctx.config;
        if !self.ctx.registry.belongs(&cfg.report.sync_test, module) {
            return false;
        }
        let Some(report) = FailureReport::read(&cfg.failure_report_path(), &cfg.report) else {
            return false;
        };

        let log_sync: Vec<&RunEntry> = candidates
            .iter()
            .filter(|c| cfg.report.is_sync_test(&c.test_name))
            .collect();
        let log_times: Vec<NaiveDateTime> = log_sync.iter().filter_map(|c| c.datetime).collect();
        if !report.is_trusted(&log_times, now, &cfg.report) {
            debug!(modified = %report.modified, "failure report is stale, using log data");
            return false;
        }

        let name = log_sync
            .last()
            .map(|c| c.test_name.clone())
            .unwrap_or_else(|| cfg.report.sync_test.clone());
        let mut entry = report.to_entry(&name);
        if let Some(rt) = running_time_on(&log_sync, entry.date) {
            entry.running_time = rt;
        }

        let date = entry.date;
        candidates.retain(|c| !(cfg.report.is_sync_test(&c.test_name) && c.date == date));
        info!(
            test = %name,
            total_failures = report.total_failures,
            rows = entry.sync.as_ref().map_or(0, |s| s.error_jobs.len()),
            "using failure report for sync test"
        );
        candidates.push(entry);
        true
    }
}

fn running_time_on(candidates: &[&RunEntry], date: NaiveDate) -> Option<String> {
    candidates
        .iter()
        .rev()
        .find(|c| c.date == date && c.running_time != NOT_AVAILABLE)
        .map(|c| c.running_time.clone())
}

/// Whether `candidate` may replace `stored` for the same test and date.
fn supersedes(candidate: &RunEntry, stored: &RunEntry) -> bool {
    if candidate.source == EntrySource::Report && stored.source == EntrySource::Log {
        return true;
    }
    compare_recency(candidate, stored) != Ordering::Less
}

/// Merge candidates into `doc`, one per (test, date).
///
/// Within the batch, later candidates win ties. Against stored data, a
/// candidate lands only when it is at least as recent as what is there.
/// Returns how many stored entries were added or changed.
pub fn merge(doc: &mut HistoryDocument, candidates: Vec<RunEntry>) -> usize {
    let mut best: BTreeMap<(String, NaiveDate), RunEntry> = BTreeMap::new();
    for c in candidates {
        let key = (c.test_name.clone(), c.date);
        match best.get(&key) {
            Some(kept) if !supersedes(&c, kept) => {}
            _ => {
                best.insert(key, c);
            }
        }
    }

    let mut changed = 0;
    for ((test, date), candidate) in best {
        let series = doc.tests.entry(test).or_default();
        match series.iter_mut().find(|e| e.date == date) {
            Some(stored) => {
                if *stored != candidate && supersedes(&candidate, stored) {
                    *stored = candidate;
                    changed += 1;
                }
            }
            None => {
                series.push(candidate);
                changed += 1;
            }
        }
        series.sort_by(|a, b| b.date.cmp(&a.date));
    }
    changed
}
