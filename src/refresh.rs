//! Background refresh of module histories.
//!
//! At most one reconciliation per module runs at a time. Opportunistic
//! refreshes triggered by reads are dropped when one is already in flight;
//! explicit updates wait for the running one to finish.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Local;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::context::AppContext;
use crate::modules::Module;
use crate::reconcile::{ReconcileOutcome, Reconciler};

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("reconciliation task for {module} failed: {source}")]
    Task {
        module: Module,
        #[source]
        source: tokio::task::JoinError,
    },
}

/// What [`RefreshCoordinator::start_if_needed`] decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshStart {
    /// The history is already at least as new as the log, or there is no log.
    NotNeeded,
    /// Another refresh for the module holds the lock.
    AlreadyRunning,
    Started(Uuid),
}

#[derive(Clone)]
pub struct RefreshCoordinator {
    ctx: Arc<AppContext>,
    locks: Arc<HashMap<Module, Arc<Mutex<()>>>>,
}

impl RefreshCoordinator {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        let locks = Module::ALL
            .into_iter()
            .map(|m| (m, Arc::new(Mutex::new(()))))
            .collect();
        Self {
            ctx,
            locks: Arc::new(locks),
        }
    }

    fn lock_for(&self, module: Module) -> Arc<Mutex<()>> {
        // Every module gets a lock in `new`.
        Arc::clone(&self.locks[&module])
    }

    /// Whether the module's log was modified after its history file.
    pub fn is_stale(&self, module: Module) -> bool {
        self.ctx.history_is_stale(module)
    }

    /// Spawn a reconciliation when the log is newer than the history,
    /// unless one is already running for this module.
    pub fn start_if_needed(&self, module: Module) -> RefreshStart {
        if !self.is_stale(module) {
            return RefreshStart::NotNeeded;
        }
        let Ok(guard) = self.lock_for(module).try_lock_owned() else {
            debug!(module = %module, "refresh already running, skipping");
            return RefreshStart::AlreadyRunning;
        };

        let ticket = Uuid::new_v4();
        let ctx = Arc::clone(&self.ctx);
        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            let outcome = Reconciler::new(&ctx).run(module, Local::now().naive_local());
            info!(%ticket, run_id = %outcome.run_id, module = %module, "background refresh finished");
        });
        RefreshStart::Started(ticket)
    }

    /// Reconcile `module` now, waiting for any in-flight refresh first.
    pub async fn run_now(&self, module: Module) -> Result<ReconcileOutcome, RefreshError> {
        let guard = self.lock_for(module).lock_owned().await;
        let ctx = Arc::clone(&self.ctx);
        let result = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            Reconciler::new(&ctx).run(module, Local::now().naive_local())
        })
        .await;
        result.map_err(|source| {
            error!(module = %module, error = %source, "reconciliation task failed");
            RefreshError::Task { module, source }
        })
    }

    /// Kick off a refresh of every module without waiting.
    pub fn spawn_initial(&self) {
        for module in Module::ALL {
            let this = self.clone();
            tokio::spawn(async move {
                if let Err(e) = this.run_now(module).await {
                    error!(module = %module, error = %e, "initial refresh failed");
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn coordinator(root: &std::path::Path) -> RefreshCoordinator {
        RefreshCoordinator::new(AppContext::shared(AppConfig::with_root(root)))
    }

    #[tokio::test]
    async fn test_no_log_means_no_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let c = coordinator(dir.path());
        assert_eq!(c.start_if_needed(Module::Employer), RefreshStart::NotNeeded);
    }

    #[tokio::test]
    async fn test_busy_module_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("logs")).unwrap();
        std::fs::write(dir.path().join("logs/employer.log"), "TEST test_emp_a: PASS\n").unwrap();
        let c = coordinator(dir.path());

        let held = c.lock_for(Module::Employer).lock_owned().await;
        assert_eq!(c.start_if_needed(Module::Employer), RefreshStart::AlreadyRunning);
        drop(held);

        assert!(matches!(c.start_if_needed(Module::Employer), RefreshStart::Started(_)));
    }

    #[tokio::test]
    async fn test_run_now_writes_history_and_clears_staleness() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("logs")).unwrap();
        let log = dir.path().join("logs/employer.log");
        std::fs::write(&log, "TEST test_emp_a: PASS\n").unwrap();
        let c = coordinator(dir.path());
        assert!(c.is_stale(Module::Employer));

        let outcome = c.run_now(Module::Employer).await.unwrap();
        assert!(outcome.saved);
        assert_eq!(outcome.tests, 1);

        // Pin the log behind the freshly written history.
        let past = std::time::SystemTime::now() - std::time::Duration::from_secs(3600);
        std::fs::File::options().write(true).open(&log).unwrap().set_modified(past).unwrap();
        assert!(!c.is_stale(Module::Employer));
    }
}
