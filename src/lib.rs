//! qahistory -- seven-day pass/fail history for QA regression logs.
//!
//! This crate parses the free-form logs written by the regression suites,
//! reconciles them with the database/search sync failure report, and keeps
//! a small per-module JSON history that the dashboard and HTTP API read.

pub mod api;
pub mod classify;
pub mod config;
pub mod context;
pub mod dashboard;
pub mod history;
pub mod migrate;
pub mod model;
pub mod modules;
pub mod parser;
pub mod reconcile;
pub mod refresh;
pub mod report;
pub mod view;

use std::sync::Arc;

use anyhow::Result;
use chrono::Local;

use crate::context::AppContext;

/// Start the qahistory server: legacy migration, initial refresh, API.
pub async fn serve(ctx: Arc<AppContext>, bind: &str) -> Result<()> {
    // 1. Split any legacy combined history before the first read
    if let Some(summary) = migrate::migrate_legacy_benchsale(&ctx.store, Local::now().naive_local()) {
        tracing::info!(?summary, "legacy history migrated");
    }

    // 2. Refresh every module in the background
    let state = api::state::AppState::new(Arc::clone(&ctx));
    state.refresh.spawn_initial();

    // 3. Start API Server
    let addr: std::net::SocketAddr = bind.parse()?;
    let app = api::router(state);

    tracing::info!(%addr, history_dir = %ctx.store.dir().display(), "qahistory listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
