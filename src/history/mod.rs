//! Per-module JSON history store with backup fallback.
//!
//! Each module owns `<id>_history.json` plus a `.backup` sibling holding the
//! last known-good primary. Reads never fail: a corrupt primary falls back
//! to the backup, and a missing pair is an empty document.

pub mod retention;

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::classify::Registry;
use crate::config::AppConfig;
use crate::model::{parse_timestamp, RunEntry};
use crate::modules::Module;
use crate::parser::tail;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("history I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("history JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("history document has unexpected shape: {0}")]
    Structure(String),
}

/// Test name to run entries, newest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HistoryDocument {
    pub tests: BTreeMap<String, Vec<RunEntry>>,
}

impl HistoryDocument {
    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    pub fn entry_count(&self) -> usize {
        self.tests.values().map(Vec::len).sum()
    }

    pub fn entries(&self, test: &str) -> &[RunEntry] {
        self.tests.get(test).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Remove every test for which `keep` is false; returns the removed names.
    pub fn retain_tests(&mut self, mut keep: impl FnMut(&str) -> bool) -> Vec<String> {
        let mut removed = Vec::new();
        self.tests.retain(|name, _| {
            let k = keep(name);
            if !k {
                removed.push(name.clone());
            }
            k
        });
        removed
    }

    /// Parse a stored document, upgrading legacy entry shapes.
    ///
    /// Only a non-object top level is an error; individual malformed
    /// entries are skipped.
    pub fn from_json(text: &str) -> Result<Self, HistoryError> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Object(map) = value else {
            return Err(HistoryError::Structure("top level is not an object".into()));
        };

        let mut doc = Self::default();
        for (test, series) in map {
            let Value::Array(items) = series else {
                warn!(test = %test, "history series is not an array, skipping");
                continue;
            };
            let mut entries = Vec::with_capacity(items.len());
            for item in items {
                let Value::Object(obj) = item else { continue };
                match serde_json::from_value::<RunEntry>(Value::Object(normalize_entry(&test, obj))) {
                    Ok(entry) => entries.push(entry),
                    Err(e) => debug!(test = %test, error = %e, "skipping unreadable history entry"),
                }
            }
            if !entries.is_empty() {
                doc.tests.insert(test, entries);
            }
        }
        Ok(doc)
    }

    pub fn to_json(&self) -> Result<String, HistoryError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Fill in fields older writers left out or stored in another form.
fn normalize_entry(test: &str, mut obj: Map<String, Value>) -> Map<String, Value> {
    obj.entry("test_name").or_insert_with(|| Value::String(test.to_string()));

    let datetime = obj.get("datetime").and_then(Value::as_str).and_then(parse_timestamp);
    match datetime {
        Some(dt) => {
            obj.insert("datetime".into(), Value::String(dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string()));
        }
        None => {
            obj.remove("datetime");
        }
    }

    let date_ok = obj
        .get("date")
        .and_then(Value::as_str)
        .is_some_and(|d| chrono::NaiveDate::parse_from_str(d, "%Y-%m-%d").is_ok());
    if !date_ok {
        match datetime {
            Some(dt) => {
                obj.insert("date".into(), Value::String(dt.date().to_string()));
            }
            None => {
                obj.remove("date");
            }
        }
    }
    obj
}

/// Whether a load may write its cleanup back to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// Plain read; cleanup stays in memory.
    Read,
    /// Reconciliation; cleanup is persisted.
    Update,
}

#[derive(Debug, Clone)]
pub struct HistoryStore {
    dir: PathBuf,
    retention_days: u32,
}

impl HistoryStore {
    pub fn new(dir: impl Into<PathBuf>, retention_days: u32) -> Self {
        Self {
            dir: dir.into(),
            retention_days,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.history_dir(), config.history.retention_days)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn retention_days(&self) -> u32 {
        self.retention_days
    }

    pub fn primary_path(&self, module: Module) -> PathBuf {
        self.dir.join(format!("{}_history.json", module.id()))
    }

    pub fn backup_path(&self, module: Module) -> PathBuf {
        self.dir.join(format!("{}_history.json.backup", module.id()))
    }

    /// Modification time of the primary file, if present.
    pub fn modified_at(&self, module: Module) -> Option<NaiveDateTime> {
        tail::modified_at(&self.primary_path(module)).ok()
    }

    fn read_document(path: &Path) -> Result<HistoryDocument, HistoryError> {
        let text = fs::read_to_string(path)?;
        HistoryDocument::from_json(&text)
    }

    /// Stored document without filtering: primary, else backup, else empty.
    pub fn load_raw(&self, module: Module) -> HistoryDocument {
        let primary = self.primary_path(module);
        let err = match Self::read_document(&primary) {
            Ok(doc) => return doc,
            Err(e) => e,
        };
        match &err {
            HistoryError::Io(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(module = %module, "no primary history file")
            }
            e => warn!(module = %module, path = %primary.display(), error = %e, "primary history unreadable, trying backup"),
        }

        let backup = self.backup_path(module);
        match Self::read_document(&backup) {
            Ok(doc) => {
                info!(module = %module, tests = doc.tests.len(), "loaded history from backup");
                doc
            }
            Err(HistoryError::Io(e)) if e.kind() == io::ErrorKind::NotFound => HistoryDocument::default(),
            Err(e) => {
                warn!(module = %module, path = %backup.display(), error = %e, "backup history unreadable, starting empty");
                HistoryDocument::default()
            }
        }
    }

    /// Load with membership filtering and expiry applied.
    ///
    /// The cleaned document is written back only in [`LoadMode::Update`].
    pub fn load(&self, module: Module, registry: &Registry, now: NaiveDateTime, mode: LoadMode) -> HistoryDocument {
        let mut doc = self.load_raw(module);
        let purged = doc.retain_tests(|name| registry.belongs(name, module));
        let expired = retention::apply(&mut doc, now.date(), self.retention_days);

        if !purged.is_empty() {
            debug!(module = %module, purged = ?purged, "filtered foreign tests from history");
        }
        if mode == LoadMode::Update && (!purged.is_empty() || expired > 0) {
            self.save(module, &doc, now);
        }
        doc
    }

    /// Persist `doc` after re-applying expiry.
    ///
    /// The previous primary (if it parses) becomes the backup and the new
    /// primary replaces it via rename from a per-write temporary file, so
    /// concurrent writers never share a scratch file. Failures are logged;
    /// the primary is restored from the backup only when it is left missing
    /// or unreadable. Returns whether the write succeeded.
    pub fn save(&self, module: Module, doc: &HistoryDocument, now: NaiveDateTime) -> bool {
        let mut doc = doc.clone();
        retention::apply(&mut doc, now.date(), self.retention_days);

        match self.write(module, &doc) {
            Ok(()) => {
                debug!(module = %module, tests = doc.tests.len(), entries = doc.entry_count(), "saved history");
                true
            }
            Err(e) => {
                error!(module = %module, error = %e, "failed to save history");
                if Self::read_document(&self.primary_path(module)).is_err() {
                    self.restore_from_backup(module);
                }
                false
            }
        }
    }

    fn write(&self, module: Module, doc: &HistoryDocument) -> Result<(), HistoryError> {
        fs::create_dir_all(&self.dir)?;
        let primary = self.primary_path(module);
        let backup = self.backup_path(module);

        if let Ok(current) = fs::read_to_string(&primary) {
            if HistoryDocument::from_json(&current).is_ok() {
                if let Err(e) = self.replace_atomically(&backup, &current) {
                    warn!(module = %module, error = %e, "could not refresh history backup");
                }
            }
        }

        self.replace_atomically(&primary, &doc.to_json()?)?;
        Ok(())
    }

    fn replace_atomically(&self, target: &Path, content: &str) -> Result<(), HistoryError> {
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.persist(target).map_err(|e| e.error)?;
        Ok(())
    }

    fn restore_from_backup(&self, module: Module) {
        let backup = self.backup_path(module);
        if !backup.exists() {
            return;
        }
        match fs::copy(&backup, self.primary_path(module)) {
            Ok(_) => info!(module = %module, "restored history from backup"),
            Err(e) => error!(module = %module, error = %e, "failed to restore history from backup"),
        }
    }
}
