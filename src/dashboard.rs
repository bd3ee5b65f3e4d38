//! Static HTML dashboard rendered from the stored histories.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use askama::Template;
use chrono::NaiveDateTime;
use tracing::info;

use crate::context::AppContext;
use crate::history::LoadMode;
use crate::model::{RunEntry, RunStatus};
use crate::modules::Module;
use crate::view;

pub struct Cell {
    pub date: String,
    pub status: String,
    pub class: &'static str,
    pub running_time: String,
}

impl From<&RunEntry> for Cell {
    fn from(e: &RunEntry) -> Self {
        let class = match e.status {
            RunStatus::Pass => "pass",
            RunStatus::Fail => "fail",
            RunStatus::Skip => "skip",
            RunStatus::NotRun | RunStatus::Unknown => "not-run",
        };
        Self {
            date: e.date.format("%m-%d").to_string(),
            status: e.status.to_string(),
            class,
            running_time: e.running_time.clone(),
        }
    }
}

pub struct TestRow {
    pub name: String,
    pub cells: Vec<Cell>,
}

pub struct ModuleSection {
    pub id: &'static str,
    pub name: String,
    pub rows: Vec<TestRow>,
    pub pass: usize,
    pub fail: usize,
    pub skip: usize,
    pub not_run: usize,
}

#[derive(Template)]
#[template(path = "dashboard.html")]
pub struct DashboardPage {
    pub generated: String,
    pub modules: Vec<ModuleSection>,
}

fn section(ctx: &AppContext, module: Module, now: NaiveDateTime) -> ModuleSection {
    let doc = ctx.store.load(module, &ctx.registry, now, LoadMode::Read);
    let mut out = ModuleSection {
        id: module.id(),
        name: ctx.config.module_spec(module).name,
        rows: Vec::new(),
        pass: 0,
        fail: 0,
        skip: 0,
        not_run: 0,
    };

    for test in view::test_cases(ctx, module, now) {
        let series = view::daily_series(ctx, &test, doc.entries(&test), now);
        let today = series.iter().find(|e| e.date == now.date());
        match today.map(|e| e.status) {
            Some(RunStatus::Pass) => out.pass += 1,
            Some(RunStatus::Fail) => out.fail += 1,
            Some(RunStatus::Skip) => out.skip += 1,
            _ => out.not_run += 1,
        }
        out.rows.push(TestRow {
            cells: series.iter().map(Cell::from).collect(),
            name: test,
        });
    }
    out
}

/// Build the dashboard for every module.
pub fn build(ctx: &AppContext, now: NaiveDateTime) -> DashboardPage {
    DashboardPage {
        generated: now.format("%Y-%m-%d %H:%M:%S").to_string(),
        modules: Module::ALL.into_iter().map(|m| section(ctx, m, now)).collect(),
    }
}

pub fn render(ctx: &AppContext, now: NaiveDateTime) -> Result<String> {
    build(ctx, now).render().context("failed to render dashboard")
}

/// Render the dashboard to `output`, or to the configured path.
pub fn write(ctx: &AppContext, now: NaiveDateTime, output: Option<&Path>) -> Result<PathBuf> {
    let path = output.map_or_else(|| ctx.config.dashboard_output_path(), Path::to_path_buf);
    let html = render(ctx, now)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(&path, html).with_context(|| format!("failed to write {}", path.display()))?;
    info!(path = %path.display(), "wrote dashboard");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::history::HistoryDocument;
    use crate::model::parse_timestamp;

    #[test]
    fn test_dashboard_counts_today() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = AppContext::new(AppConfig::with_root(dir.path()));
        let now = parse_timestamp("2026-01-10T12:00:00").unwrap();

        let mut doc = HistoryDocument::default();
        doc.tests.insert(
            "test_emp_a".into(),
            vec![RunEntry::observed("test_emp_a", RunStatus::Fail, parse_timestamp("2026-01-10T09:00:00").unwrap())],
        );
        doc.tests.insert(
            "test_emp_b".into(),
            vec![RunEntry::observed("test_emp_b", RunStatus::Pass, parse_timestamp("2026-01-09T09:00:00").unwrap())],
        );
        ctx.store.save(Module::Employer, &doc, now);

        let page = build(&ctx, now);
        let employer = page.modules.iter().find(|m| m.id == "employer").unwrap();
        assert_eq!(employer.rows.len(), 2);
        assert_eq!(employer.fail, 1);
        assert_eq!(employer.not_run, 1);
        assert_eq!(employer.rows[0].cells.len(), 7);

        let html = page.render().unwrap();
        assert!(html.contains("test_emp_a"));
        assert!(html.contains("class=\"cell fail\""));
    }

    #[test]
    fn test_write_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = AppContext::new(AppConfig::with_root(dir.path()));
        let now = parse_timestamp("2026-01-10T12:00:00").unwrap();
        let path = write(&ctx, now, None).unwrap();
        assert!(path.ends_with("reports/dashboard.html"));
        assert!(std::fs::read_to_string(path).unwrap().contains("QA History"));
    }
}
