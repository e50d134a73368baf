// src/report/mod.rs
// Report generation contract. The rich HTML generator is an external
// collaborator; the engine only depends on this seam. The packaged writer
// produces a minimal summary page so report paths always resolve.

use crate::model::{FlowRun, RunState};
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::debug;

#[async_trait]
pub trait ReportSink: Send + Sync {
    /// Render a report for the run snapshot and return the path, relative to
    /// the reports root, that was written.
    async fn generate(&self, run: &FlowRun) -> anyhow::Result<String>;
}

/// Writes `Reports/<clientName>/<flowName>[_tagk-tagv...]_<isoTimestamp>.html`.
pub struct HtmlReportWriter {
    reports_dir: PathBuf,
}

impl HtmlReportWriter {
    pub fn new(reports_dir: impl Into<PathBuf>) -> Self {
        Self {
            reports_dir: reports_dir.into(),
        }
    }
}

#[async_trait]
impl ReportSink for HtmlReportWriter {
    async fn generate(&self, run: &FlowRun) -> anyhow::Result<String> {
        let client = run.client_name.as_deref().unwrap_or("default");
        let client_dir = sanitize(client);

        let mut name = sanitize(&run.flow_name);
        for (k, v) in &run.tags {
            name.push('_');
            name.push_str(&sanitize(k));
            name.push('-');
            name.push_str(&sanitize(v));
        }
        let stamp = run
            .end_time
            .unwrap_or(run.start_time)
            .format("%Y-%m-%dT%H-%M-%S");
        let filename = format!("{}_{}.html", name, stamp);

        let dir = self.reports_dir.join(&client_dir);
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join(&filename), render(run)).await?;

        let rel = format!("{}/{}", client_dir, filename);
        debug!("Report written: {}", rel);
        Ok(rel)
    }
}

/// No-op sink for tests and headless setups.
pub struct NoopReportSink;

#[async_trait]
impl ReportSink for NoopReportSink {
    async fn generate(&self, run: &FlowRun) -> anyhow::Result<String> {
        Ok(format!("noop/{}.html", run.id))
    }
}

fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn render(run: &FlowRun) -> String {
    let mut rows = String::new();
    for task in &run.tasks {
        let duration = task
            .duration_ms
            .map(|d| format!("{:.1}s", d as f64 / 1000.0))
            .unwrap_or_else(|| "-".to_string());
        let warning = task
            .performance_warning
            .as_ref()
            .map(|w| w.message.clone())
            .unwrap_or_default();
        rows.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
            escape(&task.name),
            task.state.as_str(),
            duration,
            escape(&warning),
        ));
    }

    let mut logs = String::new();
    for log in &run.logs {
        logs.push_str(&format!(
            "<li>{} {}</li>\n",
            log.timestamp.format("%H:%M:%S"),
            escape(&log.message)
        ));
    }

    let outcome = match run.state {
        RunState::Completed => "completed",
        RunState::Failed => "failed",
        _ => "in progress",
    };

    format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>{name} \u{2014} {outcome}</title></head>\n\
         <body>\n<h1>{name}</h1>\n<p>State: {outcome} \u{2014} progress {progress:.0}%</p>\n\
         <p>Configuration: {config}</p>\n\
         <table border=\"1\"><tr><th>Task</th><th>State</th><th>Duration</th><th>Warning</th></tr>\n{rows}</table>\n\
         <ul>\n{logs}</ul>\n</body></html>\n",
        name = escape(&run.flow_name),
        outcome = outcome,
        progress = run.progress,
        config = escape(&run.configuration),
        rows = rows,
        logs = logs,
    )
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}
