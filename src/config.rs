//! TOML configuration for qahistory.
//!
//! Every section defaults independently, so a partial file only overrides
//! what it names. The file is located via the `--config` flag, the
//! `QAHISTORY_CONFIG` environment variable, or `./qahistory.toml`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::modules::{Module, ModuleDescriptor, ModuleSpec};

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "QAHISTORY_CONFIG";

/// File picked up from the working directory when nothing else is given.
pub const DEFAULT_CONFIG_FILE: &str = "qahistory.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub parser: ParserConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Per-module overrides keyed by module id.
    #[serde(default)]
    pub modules: BTreeMap<String, ModuleOverride>,
}

impl AppConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        for key in config.modules.keys() {
            if key.parse::<Module>().is_err() {
                warn!(module = %key, "config names an unknown module, ignoring it");
            }
        }
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Resolve the configuration in order:
    /// 1. `explicit` (the `--config` flag), which must load.
    /// 2. The path in `QAHISTORY_CONFIG`.
    /// 3. `./qahistory.toml`.
    /// 4. Compiled-in defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        Ok(Self::load_or_default())
    }

    /// Steps 2 to 4 of [`AppConfig::resolve`]; never fails.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "QAHISTORY_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let local = Path::new(DEFAULT_CONFIG_FILE);
        if local.exists() {
            match Self::load(local) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %local.display(),
                        error = %e,
                        "local config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }

    /// Defaults rooted at `root`; the usual starting point for tests.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        let mut cfg = Self::default();
        cfg.paths.project_root = root.into();
        cfg
    }

    /// Effective source layout of `module` after applying overrides.
    pub fn module_spec(&self, module: Module) -> ModuleSpec {
        let mut spec = module.default_spec();
        if let Some(o) = self.modules.get(module.id()) {
            if let Some(name) = &o.name {
                spec.name = name.clone();
            }
            if let Some(log_file) = &o.log_file {
                spec.log_file = log_file.clone();
            }
            if let Some(test_files) = &o.test_files {
                spec.test_files = test_files.clone();
            }
        }
        spec
    }

    pub fn descriptor(&self, module: Module) -> ModuleDescriptor {
        let spec = self.module_spec(module);
        ModuleDescriptor {
            id: module.id(),
            name: spec.name,
            log_file: spec.log_file,
        }
    }

    /// Absolute (root-joined) path of the module's log file.
    pub fn log_path(&self, module: Module) -> PathBuf {
        self.resolve_path(self.module_spec(module).log_file)
    }

    /// Root-joined paths of the module's source test files.
    pub fn test_file_paths(&self, module: Module) -> Vec<PathBuf> {
        self.module_spec(module)
            .test_files
            .into_iter()
            .map(|f| self.resolve_path(f))
            .collect()
    }

    pub fn history_dir(&self) -> PathBuf {
        self.resolve_path(&self.paths.history_dir)
    }

    pub fn failure_report_path(&self) -> PathBuf {
        self.resolve_path(&self.paths.failure_report)
    }

    pub fn dashboard_output_path(&self) -> PathBuf {
        self.resolve_path(&self.paths.dashboard_output)
    }

    /// Join a relative path onto the project root; absolute paths pass through.
    pub fn resolve_path(&self, p: impl AsRef<Path>) -> PathBuf {
        let p = p.as_ref();
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.paths.project_root.join(p)
        }
    }
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory every other relative path is resolved against.
    pub project_root: PathBuf,
    /// Where `<module>_history.json` and its `.backup` live.
    pub history_dir: PathBuf,
    /// JSON report written by the sync-verification test.
    pub failure_report: PathBuf,
    pub dashboard_output: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            project_root: PathBuf::from("."),
            history_dir: PathBuf::from("logs/history"),
            failure_report: PathBuf::from("reports/db_solr_sync_failures.json"),
            dashboard_output: PathBuf::from("reports/dashboard.html"),
        }
    }
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Window sizes and byte budgets for log scanning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// Lines searched above a result for its `Start:` marker.
    pub backward_window: usize,
    /// Lines searched above a result for an elapsed marker when none follows.
    pub elapsed_backward_window: usize,
    /// Lines searched below a result for elapsed, screenshot and failure text.
    pub forward_window: usize,
    pub failure_max_lines: usize,
    pub failure_capture_lines: usize,
    pub failure_max_chars: usize,
    /// Logs larger than this are parsed from their tail only.
    pub tail_threshold_bytes: u64,
    pub tail_read_bytes: u64,
    pub quick_tail_bytes: u64,
    pub history_tail_bytes: u64,
    pub table_max_rows: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            backward_window: 30,
            elapsed_backward_window: 20,
            forward_window: 150,
            failure_max_lines: 10,
            failure_capture_lines: 50,
            failure_max_chars: 2000,
            tail_threshold_bytes: 100 * 1024 * 1024,
            tail_read_bytes: 50 * 1024 * 1024,
            quick_tail_bytes: 1024 * 1024,
            history_tail_bytes: 25 * 1024 * 1024,
            table_max_rows: 2000,
        }
    }
}

// ---------------------------------------------------------------------------
// Failure report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Name of the test that writes the failure report.
    pub sync_test: String,
    /// Max distance between report mtime and the log candidate's timestamp.
    pub match_window_secs: i64,
    /// Max report age relative to now when no log candidate matches.
    pub max_age_secs: i64,
    pub title_max_chars: usize,
    pub error_max_chars: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            sync_test: "test_t1_09_db_solr_sync_verification".to_string(),
            match_window_secs: 2 * 60 * 60,
            max_age_secs: 24 * 60 * 60,
            title_max_chars: 100,
            error_max_chars: 500,
        }
    }
}

impl ReportConfig {
    /// Whether `test` is the sync-verification test (or a renamed variant).
    pub fn is_sync_test(&self, test: &str) -> bool {
        test == self.sync_test || test.contains("db_solr_sync")
    }
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub retention_days: u32,
    pub order: HistoryOrder,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            retention_days: 7,
            order: HistoryOrder::NewestFirst,
        }
    }
}

/// Order of the per-day entries returned by the history view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryOrder {
    #[default]
    NewestFirst,
    OldestFirst,
}

// ---------------------------------------------------------------------------
// Server / logging / module overrides
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:5001".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleOverride {
    pub name: Option<String>,
    pub log_file: Option<String>,
    pub test_files: Option<Vec<String>>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.paths.history_dir, PathBuf::from("logs/history"));
        assert_eq!(cfg.parser.forward_window, 150);
        assert_eq!(cfg.parser.tail_threshold_bytes, 100 * 1024 * 1024);
        assert_eq!(cfg.report.match_window_secs, 7200);
        assert_eq!(cfg.history.retention_days, 7);
        assert_eq!(cfg.history.order, HistoryOrder::NewestFirst);
        assert_eq!(cfg.server.bind, "127.0.0.1:5001");
        assert!(cfg.modules.is_empty());
    }

    #[test]
    fn test_partial_toml_keeps_other_defaults() {
        let toml_str = r#"
[history]
order = "oldest_first"

[parser]
forward_window = 80
"#;
        let cfg: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.history.order, HistoryOrder::OldestFirst);
        assert_eq!(cfg.history.retention_days, 7);
        assert_eq!(cfg.parser.forward_window, 80);
        assert_eq!(cfg.parser.backward_window, 30);
        assert_eq!(cfg.report.sync_test, "test_t1_09_db_solr_sync_verification");
    }

    #[test]
    fn test_module_override_applies() {
        let toml_str = r#"
[paths]
project_root = "/srv/qa"

[modules.employer]
log_file = "logs/emp.log"
"#;
        let cfg: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.log_path(Module::Employer), PathBuf::from("/srv/qa/logs/emp.log"));
        assert_eq!(cfg.module_spec(Module::Employer).name, "Employer");
        assert_eq!(
            cfg.log_path(Module::Jobseeker),
            PathBuf::from("/srv/qa/logs/jobseeker.log")
        );
    }

    #[test]
    fn test_absolute_paths_are_not_rejoined() {
        let mut cfg = AppConfig::with_root("/srv/qa");
        cfg.paths.failure_report = PathBuf::from("/tmp/report.json");
        assert_eq!(cfg.failure_report_path(), PathBuf::from("/tmp/report.json"));
        assert_eq!(cfg.history_dir(), PathBuf::from("/srv/qa/logs/history"));
    }

    #[test]
    fn test_sync_test_detection() {
        let cfg = ReportConfig::default();
        assert!(cfg.is_sync_test("test_t1_09_db_solr_sync_verification"));
        assert!(cfg.is_sync_test("test_db_solr_sync_v2"));
        assert!(!cfg.is_sync_test("test_t1_01_login"));
    }

    #[test]
    fn test_load_from_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "[server]\nbind = \"0.0.0.0:8080\"").unwrap();
        let cfg = AppConfig::load(f.path()).unwrap();
        assert_eq!(cfg.server.bind, "0.0.0.0:8080");
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let err = AppConfig::resolve(Some(Path::new("/nonexistent/qahistory.toml")));
        assert!(err.is_err());
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "[history\nretention_days = ").unwrap();
        assert!(AppConfig::load(f.path()).is_err());
    }
}
