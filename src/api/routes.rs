//! API route definitions.

use std::collections::BTreeMap;

use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{Html, IntoResponse};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{Local, NaiveDateTime};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::state::AppState;
use super::ApiError;
use crate::modules::{Module, ModuleDescriptor};
use crate::reconcile::ReconcileOutcome;
use crate::{dashboard, view};

const NO_CACHE: &str = "no-cache, no-store, must-revalidate";

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/modules", get(list_modules))
        .route("/modules/{module}/test-cases", get(test_cases))
        .route("/modules/{module}/test-cases/{test}/history", get(history))
        .route("/modules/{module}/update", post(update_module))
        .route("/modules/{module}/download-log", get(download_log))
        .route("/update-all", post(update_all))
}

pub fn page_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(dashboard_page))
        .route("/dashboard", get(dashboard_page))
}

fn now() -> NaiveDateTime {
    Local::now().naive_local()
}

/// Run file-bound work off the async executor.
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "running",
        "modules": Module::ALL.map(Module::id),
        "timestamp": now().format("%Y-%m-%dT%H:%M:%S").to_string(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn list_modules(State(state): State<AppState>) -> Json<Vec<ModuleDescriptor>> {
    Json(Module::ALL.into_iter().map(|m| state.ctx.config.descriptor(m)).collect())
}

async fn test_cases(
    State(state): State<AppState>,
    Path(module): Path<String>,
) -> Result<Json<Vec<String>>, ApiError> {
    let module: Module = module.parse()?;
    let ctx = state.ctx.clone();
    let names = blocking(move || view::test_cases(&ctx, module, now())).await?;
    Ok(Json(names))
}

async fn history(
    State(state): State<AppState>,
    Path((module, test)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let module: Module = module.parse()?;
    let ctx = state.ctx.clone();
    let lookup = blocking(move || view::history(&ctx, module, &test, now())).await?;
    if lookup.needs_refresh {
        let started = state.refresh.start_if_needed(module);
        debug!(module = %module, ?started, "history read requested refresh");
    }
    Ok(([(header::CACHE_CONTROL, NO_CACHE)], Json(lookup.entries)))
}

async fn update_module(
    State(state): State<AppState>,
    Path(module): Path<String>,
) -> Result<Json<ReconcileOutcome>, ApiError> {
    let module: Module = module.parse()?;
    let outcome = state
        .refresh
        .run_now(module)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(outcome))
}

async fn update_all(State(state): State<AppState>) -> Json<Value> {
    let mut results = BTreeMap::new();
    for module in Module::ALL {
        let result = match state.refresh.run_now(module).await {
            Ok(outcome) => json!({ "status": "updated", "run_id": outcome.run_id }),
            Err(e) => {
                warn!(module = %module, error = %e, "update-all: module failed");
                json!({ "status": format!("error: {e}") })
            }
        };
        results.insert(module.id(), result);
    }
    Json(json!({
        "results": results,
        "timestamp": now().format("%Y-%m-%dT%H:%M:%S").to_string(),
    }))
}

async fn download_log(
    State(state): State<AppState>,
    Path(module): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let module: Module = module.parse()?;
    let path = state.ctx.config.log_path(module);
    let body = tokio::fs::read(&path)
        .await
        .map_err(|_| ApiError::NotFound("log file not found"))?;
    let disposition = format!(
        "attachment; filename=\"{}_{}.log\"",
        module.id(),
        now().format("%Y%m%d")
    );
    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    ))
}

async fn dashboard_page(State(state): State<AppState>) -> Result<Html<String>, ApiError> {
    let ctx = state.ctx.clone();
    let html = blocking(move || dashboard::render(&ctx, now()))
        .await?
        .map_err(|e| ApiError::Internal(format!("{e:#}")))?;
    Ok(Html(html))
}
