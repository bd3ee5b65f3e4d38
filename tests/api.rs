//! HTTP surface driven in-process through the router.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use qahistory::api::{self, state::AppState};
use qahistory::config::AppConfig;
use qahistory::context::AppContext;
use serde_json::Value;
use tower::ServiceExt;

fn app(root: &Path) -> Router {
    let ctx = Arc::new(AppContext::new(AppConfig::with_root(root)));
    api::router(AppState::new(ctx))
}

async fn send(app: Router, method: &str, uri: &str) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    let req = Request::builder().method(method).uri(uri).body(Body::empty()).unwrap();
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let headers = resp.headers().clone();
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, headers, body.to_vec())
}

fn json(body: &[u8]) -> Value {
    serde_json::from_slice(body).unwrap()
}

#[tokio::test]
async fn test_health() {
    let dir = tempfile::tempdir().unwrap();
    let (status, _, body) = send(app(dir.path()), "GET", "/api/health").await;
    assert_eq!(status, StatusCode::OK);
    let v = json(&body);
    assert_eq!(v["status"], "running");
    assert_eq!(v["modules"].as_array().unwrap().len(), 5);
}

#[tokio::test]
async fn test_list_modules() {
    let dir = tempfile::tempdir().unwrap();
    let (status, _, body) = send(app(dir.path()), "GET", "/api/modules").await;
    assert_eq!(status, StatusCode::OK);
    let v = json(&body);
    let ids: Vec<&str> = v.as_array().unwrap().iter().map(|m| m["id"].as_str().unwrap()).collect();
    assert!(ids.contains(&"jobseeker"));
    assert!(ids.contains(&"benchsale_admin"));
}

#[tokio::test]
async fn test_unknown_module_is_404() {
    let dir = tempfile::tempdir().unwrap();
    let (status, _, body) = send(app(dir.path()), "GET", "/api/modules/nope/test-cases").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json(&body)["error"], "module not found");
}

#[tokio::test]
async fn test_history_is_not_cached() {
    let dir = tempfile::tempdir().unwrap();
    let (status, headers, body) = send(
        app(dir.path()),
        "GET",
        "/api/modules/jobseeker/test-cases/test_js_apply/history",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        headers[header::CACHE_CONTROL],
        "no-cache, no-store, must-revalidate"
    );
    let entries = json(&body);
    assert_eq!(entries.as_array().unwrap().len(), 7);
    assert_eq!(entries[0]["status"], "NOT_RUN");
}

#[tokio::test]
async fn test_foreign_history_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let (status, _, body) = send(
        app(dir.path()),
        "GET",
        "/api/modules/jobseeker/test-cases/test_admin_thing/history",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(json(&body).as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_update_returns_run_id() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("logs")).unwrap();
    fs::write(
        dir.path().join("logs/employer.log"),
        "TEST test_emp_a\nStart: 20260109 08:00:00\nTEST test_emp_a: PASS\n",
    )
    .unwrap();

    let (status, _, body) = send(app(dir.path()), "POST", "/api/modules/employer/update").await;
    assert_eq!(status, StatusCode::OK);
    let v = json(&body);
    assert_eq!(v["module"], "employer");
    assert!(v["run_id"].as_str().is_some());
}

#[tokio::test]
async fn test_update_all_reports_every_module() {
    let dir = tempfile::tempdir().unwrap();
    let (status, _, body) = send(app(dir.path()), "POST", "/api/update-all").await;
    assert_eq!(status, StatusCode::OK);
    let v = json(&body);
    assert_eq!(v["results"].as_object().unwrap().len(), 5);
    assert_eq!(v["results"]["employer"]["status"], "updated");
}

#[tokio::test]
async fn test_download_log() {
    let dir = tempfile::tempdir().unwrap();
    let (status, _, _) = send(app(dir.path()), "GET", "/api/modules/employer/download-log").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    fs::create_dir_all(dir.path().join("logs")).unwrap();
    fs::write(dir.path().join("logs/employer.log"), "TEST test_emp_a: PASS\n").unwrap();
    let (status, headers, body) =
        send(app(dir.path()), "GET", "/api/modules/employer/download-log").await;
    assert_eq!(status, StatusCode::OK);
    let disposition = headers[header::CONTENT_DISPOSITION].to_str().unwrap();
    assert!(disposition.starts_with("attachment; filename=\"employer_"));
    assert_eq!(body, b"TEST test_emp_a: PASS\n");
}

#[tokio::test]
async fn test_dashboard_page() {
    let dir = tempfile::tempdir().unwrap();
    let (status, _, body) = send(app(dir.path()), "GET", "/dashboard").await;
    assert_eq!(status, StatusCode::OK);
    assert!(String::from_utf8(body).unwrap().contains("QA History"));
}
