//! Process-wide state shared by the CLI, the HTTP layer and background work.

use std::sync::Arc;

use crate::classify::Registry;
use crate::config::AppConfig;
use crate::history::HistoryStore;
use crate::modules::Module;
use crate::parser::{tail, LogParser};

/// Built once at startup and passed by reference (or `Arc`) to every caller.
#[derive(Debug)]
pub struct AppContext {
    pub config: AppConfig,
    pub registry: Registry,
    pub store: HistoryStore,
    pub parser: LogParser,
}

impl AppContext {
    pub fn new(config: AppConfig) -> Self {
        Self {
            registry: Registry::from_config(&config),
            store: HistoryStore::from_config(&config),
            parser: LogParser::new(&config),
            config,
        }
    }

    pub fn shared(config: AppConfig) -> Arc<Self> {
        Arc::new(Self::new(config))
    }

    /// Whether the module's log was modified after its history file.
    /// A missing log is never stale.
    pub fn history_is_stale(&self, module: Module) -> bool {
        let Ok(log_mtime) = tail::modified_at(&self.config.log_path(module)) else {
            return false;
        };
        self.store.modified_at(module).map_or(true, |h| log_mtime > h)
    }
}
