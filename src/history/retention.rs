//! Rolling retention window over a history document.

use chrono::{Duration, NaiveDate};
use tracing::warn;

use crate::model::latest_per_date;

use super::HistoryDocument;

/// Oldest date kept when the window is `days` long and ends `today`.
pub fn cutoff(today: NaiveDate, days: u32) -> NaiveDate {
    today - Duration::days(i64::from(days.max(1)) - 1)
}

/// Drop entries outside `cutoff ..= today`, keep one entry per date (the
/// most recent), order each series newest first and remove empty series.
/// Entries dated after `today` come from a skewed clock and are dropped
/// with a warning.
///
/// Returns how many entries were removed.
pub fn apply(doc: &mut HistoryDocument, today: NaiveDate, days: u32) -> usize {
    let oldest = cutoff(today, days);
    let before = doc.entry_count();

    for (name, entries) in doc.tests.iter_mut() {
        let future = entries.iter().filter(|e| e.date > today).count();
        if future > 0 {
            warn!(test = %name, count = future, %today, "dropping future-dated history entries");
        }
        let kept = std::mem::take(entries)
            .into_iter()
            .filter(|e| e.date >= oldest && e.date <= today);
        *entries = latest_per_date(kept);
    }
    doc.tests.retain(|_, entries| !entries.is_empty());

    before - doc.entry_count()
}
