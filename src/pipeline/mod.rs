use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::aggregate;
use crate::config::EffectiveConfig;
use crate::core::{CapabilityTier, DiscoveryResult, Finding, SynthesisResult};
use crate::engine::Engine;
use crate::selector::{self, DomainId};
use crate::stage::{DomainFindings, StageKind, StageOutcome, StageRunner};
use crate::store::{ALL_FINDINGS_KEY, ArtifactStore, DISCOVERY_KEY, REPORT_FILE, SYNTHESIS_KEY};

mod manifest;

pub use manifest::write_run_manifest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Discovery,
    DomainAnalysis,
    Synthesis,
    Report,
}

impl Phase {
    pub const fn step(self) -> &'static str {
        match self {
            Phase::Discovery => "1/4",
            Phase::DomainAnalysis => "2/4",
            Phase::Synthesis => "3/4",
            Phase::Report => "4/4",
        }
    }

    pub const fn title(self) -> &'static str {
        match self {
            Phase::Discovery => "Discovery",
            Phase::DomainAnalysis => "Domain analysis",
            Phase::Synthesis => "Synthesis",
            Phase::Report => "Report",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Ok,
    /// Completed, but part of the output was unusable.
    Degraded,
    Failed,
    Cached,
    /// Replaced by the deterministic aggregate.
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageRecord {
    pub stage: String,
    pub status: StageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<CapabilityTier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub findings: Option<usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
    pub elapsed_ms: u64,
}

impl StageRecord {
    fn new(stage: StageKind, status: StageStatus, tier: Option<CapabilityTier>, elapsed: Duration) -> Self {
        Self {
            stage: stage.name().to_string(),
            status,
            tier,
            findings: None,
            notes: Vec::new(),
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }
}

/// Live notifications while a run progresses. All methods default to no-ops.
pub trait PipelineObserver {
    fn phase_started(&self, _phase: Phase) {}
    fn discovery_ready(&self, _discovery: &DiscoveryResult, _cached: bool) {}
    fn domains_selected(&self, _domains: &[DomainId]) {}
    fn stage_finished(&self, _record: &StageRecord) {}
}

impl PipelineObserver for () {}

#[derive(Debug, Clone)]
pub struct AnalyzeRequest {
    pub project: PathBuf,
    pub reuse_discovery: bool,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub project: PathBuf,
    pub output_dir: PathBuf,
    pub discovery: DiscoveryResult,
    pub discovery_cached: bool,
    pub selected_domains: Vec<DomainId>,
    pub failed_domains: Vec<DomainId>,
    pub total_raw_findings: usize,
    pub synthesis: SynthesisResult,
    pub synthesis_fallback: bool,
    pub stages: Vec<StageRecord>,
    /// Report path, or the reason it could not be written.
    pub report: std::result::Result<PathBuf, String>,
    pub started_at: OffsetDateTime,
    pub finished_at: OffsetDateTime,
    pub duration: Duration,
}

/// Drives Discovery → DomainAnalysis → Synthesis → Report with a hard
/// barrier between phases.
pub struct Pipeline<'a> {
    config: &'a EffectiveConfig,
    engine: &'a dyn Engine,
    observer: &'a dyn PipelineObserver,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a EffectiveConfig, engine: &'a dyn Engine) -> Self {
        Self {
            config,
            engine,
            observer: &(),
        }
    }

    pub fn with_observer(mut self, observer: &'a dyn PipelineObserver) -> Self {
        self.observer = observer;
        self
    }

    pub fn run(&self, req: &AnalyzeRequest) -> Result<RunOutcome> {
        let started_at = OffsetDateTime::now_utc();
        let clock = Instant::now();

        if !req.project.is_dir() {
            return Err(crate::exit::failure(format!(
                "project path does not exist: {}",
                req.project.display()
            )));
        }

        let store = ArtifactStore::for_project(&req.project, &self.config.pipeline.output_dir);
        store.ensure_root()?;
        let runner = StageRunner::new(self.engine, &store, self.config);
        let mut stages = Vec::new();

        self.observer.phase_started(Phase::Discovery);
        let (discovery, discovery_cached) =
            self.discover(&runner, &store, req, &mut stages)?;
        self.observer.discovery_ready(&discovery, discovery_cached);

        self.observer.phase_started(Phase::DomainAnalysis);
        let selected_domains = selector::select_domains(&discovery);
        tracing::info!(domains = ?selected_domains, "domains selected");
        self.observer.domains_selected(&selected_domains);

        let results = self.run_domains(&runner, &req.project, &discovery, &selected_domains);
        let mut all_findings: Vec<Finding> = Vec::new();
        let mut failed_domains = Vec::new();
        for (domain, outcome, elapsed) in results {
            stages.push(domain_record(domain, &outcome, elapsed, self.config));
            match outcome {
                StageOutcome::Success(found) => all_findings.extend(found.findings),
                StageOutcome::Failed(_) => failed_domains.push(domain),
            }
        }
        store
            .write_json(ALL_FINDINGS_KEY, &all_findings)
            .context("failed to write aggregated findings")?;

        self.observer.phase_started(Phase::Synthesis);
        let synth_clock = Instant::now();
        let synthesis_tier = Some(self.config.pipeline.tiers.synthesis);
        let (synthesis, synthesis_fallback) =
            match runner.run_synthesis(&discovery, &all_findings) {
                StageOutcome::Success(synthesis) => {
                    let dangling = synthesis.dangling_ids();
                    let mut record = StageRecord::new(
                        StageKind::Synthesis,
                        StageStatus::Ok,
                        synthesis_tier,
                        synth_clock.elapsed(),
                    );
                    record.findings = Some(synthesis.deduplicated_findings.len());
                    if !dangling.is_empty() {
                        tracing::warn!(ids = ?dangling, "execution plan references unknown findings");
                        record
                            .notes
                            .push(format!("plan references unknown findings: {}", dangling.join(", ")));
                    }
                    self.finish(&mut stages, record);
                    (synthesis, false)
                }
                StageOutcome::Failed(reason) => {
                    let synthesis = aggregate::fallback_synthesis(&all_findings);
                    store
                        .write_json(SYNTHESIS_KEY, &synthesis)
                        .context("failed to write fallback synthesis")?;
                    let mut record = StageRecord::new(
                        StageKind::Synthesis,
                        StageStatus::Fallback,
                        synthesis_tier,
                        synth_clock.elapsed(),
                    );
                    record.findings = Some(synthesis.deduplicated_findings.len());
                    record.notes.push(reason);
                    self.finish(&mut stages, record);
                    (synthesis, true)
                }
            };

        self.observer.phase_started(Phase::Report);
        let finished_at = OffsetDateTime::now_utc();
        let generated_at = finished_at
            .format(&Rfc3339)
            .unwrap_or_else(|_| "unknown".to_string());
        let markdown = crate::report::render_markdown(&discovery, &synthesis, &generated_at);
        let report = store
            .write_text(REPORT_FILE, &markdown)
            .map_err(|e| format!("{e:#}"));
        if let Err(reason) = &report {
            tracing::warn!(%reason, "report was not written");
        }

        let outcome = RunOutcome {
            project: req.project.clone(),
            output_dir: store.root().to_path_buf(),
            discovery,
            discovery_cached,
            selected_domains,
            failed_domains,
            total_raw_findings: all_findings.len(),
            synthesis,
            synthesis_fallback,
            stages,
            report,
            started_at,
            finished_at,
            duration: clock.elapsed(),
        };

        if let Err(err) = write_run_manifest(&store, &outcome) {
            tracing::warn!(error = %format!("{err:#}"), "run manifest was not written");
        }

        Ok(outcome)
    }

    fn finish(&self, stages: &mut Vec<StageRecord>, record: StageRecord) {
        self.observer.stage_finished(&record);
        stages.push(record);
    }

    fn discover(
        &self,
        runner: &StageRunner<'_>,
        store: &ArtifactStore,
        req: &AnalyzeRequest,
        stages: &mut Vec<StageRecord>,
    ) -> Result<(DiscoveryResult, bool)> {
        let clock = Instant::now();
        if req.reuse_discovery && store.has_json(DISCOVERY_KEY) {
            match store.read_json::<DiscoveryResult>(DISCOVERY_KEY) {
                Ok(Some(discovery)) => {
                    tracing::info!("reusing cached discovery");
                    let record = StageRecord::new(
                        StageKind::Discovery,
                        StageStatus::Cached,
                        None,
                        clock.elapsed(),
                    );
                    self.finish(stages, record);
                    return Ok((discovery, true));
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(error = %format!("{err:#}"), "cached discovery unreadable; running discovery");
                }
            }
        }

        let tier = Some(self.config.pipeline.tiers.discovery);
        match runner.run_discovery(&req.project) {
            StageOutcome::Success(discovery) => {
                let record = StageRecord::new(StageKind::Discovery, StageStatus::Ok, tier, clock.elapsed());
                self.finish(stages, record);
                Ok((discovery, false))
            }
            StageOutcome::Failed(reason) => {
                let mut record =
                    StageRecord::new(StageKind::Discovery, StageStatus::Failed, tier, clock.elapsed());
                record.notes.push(reason.clone());
                self.finish(stages, record);
                Err(crate::exit::failure(format!("discovery failed: {reason}")))
            }
        }
    }

    /// Runs every selected domain on at most `max_parallel` threads and returns
    /// the outcomes in `domains` order, whatever order they finished in.
    fn run_domains(
        &self,
        runner: &StageRunner<'_>,
        project: &Path,
        discovery: &DiscoveryResult,
        domains: &[DomainId],
    ) -> Vec<(DomainId, StageOutcome<DomainFindings>, Duration)> {
        let workers = self.config.pipeline.max_parallel.clamp(1, domains.len().max(1));
        let next = AtomicUsize::new(0);
        let (tx, rx) = mpsc::channel::<(usize, StageOutcome<DomainFindings>, Duration)>();
        let mut slots: Vec<Option<(StageOutcome<DomainFindings>, Duration)>> =
            domains.iter().map(|_| None).collect();

        std::thread::scope(|scope| {
            for _ in 0..workers {
                let tx = tx.clone();
                let next = &next;
                scope.spawn(move || {
                    loop {
                        let idx = next.fetch_add(1, Ordering::Relaxed);
                        let Some(domain) = domains.get(idx) else {
                            break;
                        };
                        let clock = Instant::now();
                        let outcome = runner.run_domain(*domain, project, discovery);
                        if tx.send((idx, outcome, clock.elapsed())).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(tx);

            for (idx, outcome, elapsed) in rx {
                let domain = domains[idx];
                self.observer
                    .stage_finished(&domain_record(domain, &outcome, elapsed, self.config));
                slots[idx] = Some((outcome, elapsed));
            }
        });

        domains
            .iter()
            .zip(slots)
            .map(|(domain, slot)| match slot {
                Some((outcome, elapsed)) => (*domain, outcome, elapsed),
                None => (
                    *domain,
                    StageOutcome::Failed("stage did not complete".to_string()),
                    Duration::ZERO,
                ),
            })
            .collect()
    }
}

fn domain_record(
    domain: DomainId,
    outcome: &StageOutcome<DomainFindings>,
    elapsed: Duration,
    config: &EffectiveConfig,
) -> StageRecord {
    let tier = Some(config.pipeline.tiers.domain(domain));
    let stage = StageKind::Domain(domain);
    match outcome {
        StageOutcome::Success(found) => {
            let status = if found.warnings.is_empty() {
                StageStatus::Ok
            } else {
                StageStatus::Degraded
            };
            let mut record = StageRecord::new(stage, status, tier, elapsed);
            record.findings = Some(found.findings.len());
            record.notes = found.warnings.clone();
            record
        }
        StageOutcome::Failed(reason) => {
            let mut record = StageRecord::new(stage, StageStatus::Failed, tier, elapsed);
            record.notes.push(reason.clone());
            record
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineOutput, InvocationError};
    use serde_json::{Value, json};
    use std::sync::Mutex;
    use std::sync::atomic::AtomicU64;

    type Script = dyn Fn(&str, CapabilityTier) -> Result<EngineOutput, InvocationError> + Sync;

    struct ScriptedEngine {
        script: Box<Script>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedEngine {
        fn new(
            script: impl Fn(&str, CapabilityTier) -> Result<EngineOutput, InvocationError> + Sync + 'static,
        ) -> Self {
            Self {
                script: Box::new(script),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().map(|c| c.clone()).unwrap_or_default()
        }
    }

    impl Engine for ScriptedEngine {
        fn invoke(
            &self,
            prompt: &str,
            tier: CapabilityTier,
            _timeout: Duration,
        ) -> Result<EngineOutput, InvocationError> {
            let heading = prompt.lines().next().unwrap_or_default().to_string();
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(heading);
            }
            (self.script)(prompt, tier)
        }
    }

    fn temp_project(tag: &str) -> PathBuf {
        static SEQ: AtomicU64 = AtomicU64::new(0);
        let seq = SEQ.fetch_add(1, Ordering::Relaxed);
        let dir = std::env::temp_dir().join(format!(
            "ucof-pipeline-{tag}-{}-{seq}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).expect("create project");
        dir
    }

    fn test_config(project: &Path) -> EffectiveConfig {
        let mut cfg = EffectiveConfig::default();
        cfg.framework_root = project.join("no-framework");
        cfg
    }

    fn backend_only_discovery() -> Value {
        json!({
            "project_name": "shop-api",
            "tech_stack": {"backend": ["axum"], "database": ["postgres"], "frontend": [], "queue": null},
            "structure": {"backend_paths": ["src/"]},
            "quality_indicators": {"has_tests": true}
        })
    }

    fn domain_of(prompt: &str) -> Option<DomainId> {
        let heading = prompt.lines().next()?;
        DomainId::ALL
            .into_iter()
            .find(|d| heading == format!("# Task: {} Domain Analysis", d.title()))
    }

    fn one_high_finding(domain: DomainId) -> EngineOutput {
        EngineOutput::Structured(json!([{
            "id": format!("{}-001", domain.id_prefix()),
            "title": format!("{} issue", domain.title()),
            "severity": "high",
            "category": "general"
        }]))
    }

    #[test]
    fn single_domain_timeout_degrades_and_counts_remaining_findings() {
        let project = temp_project("timeout");
        let cfg = test_config(&project);
        let engine = ScriptedEngine::new(|prompt, _| {
            if prompt.starts_with("# Task: Project Discovery") {
                return Ok(EngineOutput::Structured(backend_only_discovery()));
            }
            if let Some(domain) = domain_of(prompt) {
                if domain == DomainId::Security {
                    return Err(InvocationError::Timeout(Duration::from_secs(300)));
                }
                return Ok(one_high_finding(domain));
            }
            Ok(EngineOutput::Unstructured("I could not produce a plan.".to_string()))
        });

        let outcome = Pipeline::new(&cfg, &engine)
            .run(&AnalyzeRequest {
                project: project.clone(),
                reuse_discovery: false,
            })
            .expect("run");

        assert_eq!(
            outcome.selected_domains,
            vec![
                DomainId::Security,
                DomainId::Data,
                DomainId::Backend,
                DomainId::Infrastructure,
                DomainId::Performance,
                DomainId::Quality,
            ]
        );
        assert_eq!(outcome.failed_domains, vec![DomainId::Security]);
        assert!(outcome.synthesis_fallback);
        assert_eq!(outcome.synthesis.summary.total_findings, 5);
        assert_eq!(outcome.synthesis.summary.by_severity.high, 5);
        assert_eq!(outcome.synthesis.summary.health_score, 50);

        let out = project.join(".optimization");
        assert!(!out.join("security-findings.json").exists());
        assert!(out.join("data-findings.json").exists());
        assert!(out.join("synthesis.json").exists());
        assert!(out.join("synthesis.raw.txt").exists());
        assert!(out.join("report.md").exists());

        let all: Vec<Value> = serde_json::from_slice(
            &std::fs::read(out.join("all-findings.json")).expect("read all-findings"),
        )
        .expect("parse all-findings");
        let ids: Vec<&str> = all.iter().filter_map(|f| f["id"].as_str()).collect();
        assert_eq!(ids, vec!["DAT-001", "BAC-001", "INF-001", "PER-001", "QUA-001"]);

        let manifest: Value = serde_json::from_slice(
            &std::fs::read(out.join("run.json")).expect("read run.json"),
        )
        .expect("parse run.json");
        assert_eq!(manifest["status"], "degraded");
        assert_eq!(manifest["failed_domains"], json!(["security"]));
        let security = manifest["stages"]
            .as_array()
            .and_then(|s| s.iter().find(|r| r["stage"] == "security"))
            .expect("security stage");
        assert_eq!(security["status"], "failed");

        let _ = std::fs::remove_dir_all(&project);
    }

    #[test]
    fn discovery_failure_is_fatal_and_runs_nothing_else() {
        let project = temp_project("discovery-fail");
        let cfg = test_config(&project);
        let engine = ScriptedEngine::new(|_, _| {
            Err(InvocationError::ProcessFailed {
                code: 1,
                stderr: "quota exceeded".to_string(),
            })
        });

        let err = Pipeline::new(&cfg, &engine)
            .run(&AnalyzeRequest {
                project: project.clone(),
                reuse_discovery: false,
            })
            .expect_err("should fail");
        assert_eq!(crate::exit::exit_code(&err), 1);
        assert!(format!("{err:#}").contains("discovery failed"));
        assert_eq!(engine.calls().len(), 1);
        assert!(!project.join(".optimization/all-findings.json").exists());

        let _ = std::fs::remove_dir_all(&project);
    }

    #[test]
    fn missing_project_is_fatal() {
        let project = temp_project("missing").join("nope");
        let cfg = test_config(&project);
        let engine = ScriptedEngine::new(|_, _| Ok(EngineOutput::Unstructured(String::new())));
        let err = Pipeline::new(&cfg, &engine)
            .run(&AnalyzeRequest {
                project,
                reuse_discovery: false,
            })
            .expect_err("should fail");
        assert!(format!("{err:#}").contains("does not exist"));
        assert!(engine.calls().is_empty());
    }

    #[test]
    fn cached_discovery_skips_the_engine() {
        let project = temp_project("cached");
        let out = project.join(".optimization");
        std::fs::create_dir_all(&out).expect("create output");
        std::fs::write(
            out.join("discovery.json"),
            serde_json::to_vec(&backend_only_discovery()).expect("encode"),
        )
        .expect("seed discovery");

        let cfg = test_config(&project);
        let engine = ScriptedEngine::new(|prompt, _| {
            if let Some(domain) = domain_of(prompt) {
                return Ok(one_high_finding(domain));
            }
            Ok(EngineOutput::Structured(json!({
                "summary": {"total_findings": 0, "by_severity": {}, "health_score": 100},
                "execution_plan": {}
            })))
        });

        let outcome = Pipeline::new(&cfg, &engine)
            .run(&AnalyzeRequest {
                project: project.clone(),
                reuse_discovery: true,
            })
            .expect("run");

        assert!(outcome.discovery_cached);
        assert_eq!(outcome.discovery.project_name, "shop-api");
        assert!(!outcome.synthesis_fallback);
        assert!(
            engine
                .calls()
                .iter()
                .all(|heading| heading != "# Task: Project Discovery")
        );
        assert_eq!(outcome.stages[0].status, StageStatus::Cached);

        let _ = std::fs::remove_dir_all(&project);
    }

    #[test]
    fn findings_keep_canonical_order_whatever_finishes_first() {
        let project = temp_project("order");
        let mut cfg = test_config(&project);
        cfg.pipeline.max_parallel = 8;
        let engine = ScriptedEngine::new(|prompt, tier| {
            if prompt.starts_with("# Task: Project Discovery") {
                assert_eq!(tier, CapabilityTier::Cheap);
                return Ok(EngineOutput::Structured(backend_only_discovery()));
            }
            if let Some(domain) = domain_of(prompt) {
                let rank = DomainId::ALL.iter().position(|d| *d == domain).unwrap_or(0);
                std::thread::sleep(Duration::from_millis(((8 - rank) * 15) as u64));
                return Ok(one_high_finding(domain));
            }
            assert_eq!(tier, CapabilityTier::Advanced);
            Err(InvocationError::MalformedOutput)
        });

        let outcome = Pipeline::new(&cfg, &engine)
            .run(&AnalyzeRequest {
                project: project.clone(),
                reuse_discovery: false,
            })
            .expect("run");

        let ids: Vec<&str> = outcome
            .synthesis
            .deduplicated_findings
            .iter()
            .map(|f| f.id.as_str())
            .collect();
        assert_eq!(
            ids,
            vec!["SEC-001", "DAT-001", "BAC-001", "INF-001", "PER-001", "QUA-001"]
        );
        let stage_names: Vec<&str> = outcome.stages.iter().map(|s| s.stage.as_str()).collect();
        assert_eq!(
            stage_names,
            vec![
                "discovery",
                "security",
                "data",
                "backend",
                "infrastructure",
                "performance",
                "quality",
                "synthesis"
            ]
        );

        let _ = std::fs::remove_dir_all(&project);
    }
}
