//! Whole-file and tail reads of (possibly very large) log files.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use chrono::{DateTime, Local, NaiveDateTime};
use tracing::debug;

/// Read the last `max_bytes` of `path` as lines.
///
/// When the read starts mid-file the first (partial) line is dropped.
/// Invalid UTF-8 is replaced rather than rejected.
pub fn read_tail(path: &Path, max_bytes: u64) -> io::Result<Vec<String>> {
    let mut file = File::open(path)?;
    let size = file.metadata()?.len();
    let offset = size.saturating_sub(max_bytes);
    file.seek(SeekFrom::Start(offset))?;

    let mut raw = Vec::with_capacity((size - offset) as usize);
    file.read_to_end(&mut raw)?;
    let text = String::from_utf8_lossy(&raw);

    let mut lines = text.lines();
    if offset > 0 {
        lines.next();
    }
    Ok(lines.map(str::to_string).collect())
}

/// Read `path` whole, or only its tail when it exceeds `threshold` bytes.
pub fn read_bounded(path: &Path, threshold: u64, tail_bytes: u64) -> io::Result<Vec<String>> {
    let size = std::fs::metadata(path)?.len();
    if size > threshold {
        debug!(
            path = %path.display(),
            size_mb = size / (1024 * 1024),
            tail_mb = tail_bytes / (1024 * 1024),
            "log exceeds threshold, reading tail only"
        );
        read_tail(path, tail_bytes)
    } else {
        read_tail(path, size)
    }
}

/// Local modification time of `path`.
pub fn modified_at(path: &Path) -> io::Result<NaiveDateTime> {
    let mtime = std::fs::metadata(path)?.modified()?;
    Ok(DateTime::<Local>::from(mtime).naive_local())
}
