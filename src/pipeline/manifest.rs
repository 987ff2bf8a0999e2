use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::core::SeverityCounts;
use crate::store::{ArtifactStore, RUN_MANIFEST_KEY};

use super::{RunOutcome, StageRecord};

#[derive(Debug, Serialize)]
struct RunManifest<'a> {
    schema_version: &'static str,
    tool_version: String,
    command: &'static str,
    project: String,
    started_at: String,
    finished_at: String,
    duration_ms: u64,
    status: &'static str,
    discovery_cached: bool,
    synthesis_fallback: bool,
    selected_domains: Vec<&'static str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    failed_domains: Vec<&'static str>,
    raw_findings: usize,
    total_findings: usize,
    by_severity: &'a SeverityCounts,
    health_score: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    report_error: Option<&'a str>,
    stages: &'a [StageRecord],
}

/// Writes `run.json` next to the other artifacts.
pub fn write_run_manifest(store: &ArtifactStore, outcome: &RunOutcome) -> Result<PathBuf> {
    let home = crate::platform::home_dir().ok();
    let status = if outcome.failed_domains.is_empty() && !outcome.synthesis_fallback {
        "ok"
    } else {
        "degraded"
    };

    let (report, report_error) = match &outcome.report {
        Ok(path) => (Some(mask_home(path, home.as_deref())), None),
        Err(reason) => (None, Some(reason.as_str())),
    };

    let summary = &outcome.synthesis.summary;
    let manifest = RunManifest {
        schema_version: "1.0",
        tool_version: env!("CARGO_PKG_VERSION").to_string(),
        command: "analyze",
        project: mask_home(&outcome.project, home.as_deref()),
        started_at: format_ts(outcome.started_at),
        finished_at: format_ts(outcome.finished_at),
        duration_ms: outcome.duration.as_millis() as u64,
        status,
        discovery_cached: outcome.discovery_cached,
        synthesis_fallback: outcome.synthesis_fallback,
        selected_domains: outcome.selected_domains.iter().map(|d| d.as_str()).collect(),
        failed_domains: outcome.failed_domains.iter().map(|d| d.as_str()).collect(),
        raw_findings: outcome.total_raw_findings,
        total_findings: summary.total_findings,
        by_severity: &summary.by_severity,
        health_score: summary.health_score,
        report,
        report_error,
        stages: &outcome.stages,
    };

    store.write_json(RUN_MANIFEST_KEY, &manifest)
}

fn format_ts(ts: OffsetDateTime) -> String {
    ts.format(&Rfc3339).unwrap_or_else(|_| "unknown".to_string())
}

fn mask_home(path: &Path, home_dir: Option<&Path>) -> String {
    let Some(home_dir) = home_dir else {
        return path.display().to_string();
    };
    let Ok(stripped) = path.strip_prefix(home_dir) else {
        return path.display().to_string();
    };
    let stripped = stripped.display().to_string();
    if stripped.is_empty() {
        "~".to_string()
    } else {
        format!("~/{stripped}")
    }
}
