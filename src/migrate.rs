//! One-time split of the legacy combined BenchSale history file.

use std::fs;

use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::{info, warn};

use crate::classify::NameParts;
use crate::history::{HistoryDocument, HistoryStore};
use crate::modules::Module;
use crate::reconcile::merge;

const LEGACY_FILE: &str = "benchsale_history.json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationSummary {
    pub admin_tests: usize,
    pub recruiter_tests: usize,
}

fn is_recruiter(name: &str) -> bool {
    let parts = NameParts::new(name);
    parts.has("recruiter") || parts.token("t2")
}

/// Split `benchsale_history.json` into the admin and recruiter stores.
///
/// Recruiter names (`recruiter`, `t2`) go to the recruiter store, all
/// others to the admin store. The legacy file is renamed to `.backup`
/// once both halves are saved. Returns `None` when there is nothing to do.
pub fn migrate_legacy_benchsale(store: &HistoryStore, now: NaiveDateTime) -> Option<MigrationSummary> {
    let legacy = store.dir().join(LEGACY_FILE);
    let text = fs::read_to_string(&legacy).ok()?;
    let doc = match HistoryDocument::from_json(&text) {
        Ok(doc) => doc,
        Err(e) => {
            warn!(path = %legacy.display(), error = %e, "legacy history unreadable, leaving it in place");
            return None;
        }
    };

    let (recruiter, admin): (Vec<_>, Vec<_>) = doc.tests.into_iter().partition(|(name, _)| is_recruiter(name));
    let summary = MigrationSummary {
        admin_tests: admin.len(),
        recruiter_tests: recruiter.len(),
    };

    let mut ok = true;
    for (module, tests) in [(Module::BenchsaleAdmin, admin), (Module::BenchsaleRecruiter, recruiter)] {
        if tests.is_empty() {
            continue;
        }
        let mut target = store.load_raw(module);
        merge(&mut target, tests.into_iter().flat_map(|(_, entries)| entries).collect());
        ok &= store.save(module, &target, now);
    }
    if !ok {
        warn!("legacy history split incomplete, keeping legacy file");
        return Some(summary);
    }

    let renamed = legacy.with_file_name(format!("{LEGACY_FILE}.backup"));
    if let Err(e) = fs::rename(&legacy, &renamed) {
        warn!(path = %legacy.display(), error = %e, "could not retire legacy history file");
    }
    info!(
        admin = summary.admin_tests,
        recruiter = summary.recruiter_tests,
        "migrated legacy benchsale history"
    );
    Some(summary)
}
