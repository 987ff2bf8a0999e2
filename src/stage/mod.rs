use std::fmt;
use std::path::Path;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::aggregate;

use crate::config::EffectiveConfig;
use crate::core::{CapabilityTier, DiscoveryResult, Finding, SynthesisResult};
use crate::engine::{Engine, EngineOutput};
use crate::prompts;
use crate::selector::DomainId;
use crate::store::{ArtifactStore, DISCOVERY_KEY, SYNTHESIS_KEY};

/// Terminal result of one stage. Invocation errors never escape a stage.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome<T> {
    Success(T),
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Discovery,
    Domain(DomainId),
    Synthesis,
}

impl StageKind {
    pub fn name(self) -> &'static str {
        match self {
            StageKind::Discovery => "discovery",
            StageKind::Domain(domain) => domain.as_str(),
            StageKind::Synthesis => "synthesis",
        }
    }

    pub fn artifact_key(self) -> String {
        match self {
            StageKind::Discovery => DISCOVERY_KEY.to_string(),
            StageKind::Domain(domain) => domain.artifact_key(),
            StageKind::Synthesis => SYNTHESIS_KEY.to_string(),
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Findings of one domain plus anything that was dropped on the way in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DomainFindings {
    pub findings: Vec<Finding>,
    pub warnings: Vec<String>,
}

/// Runs single stages: prompt, invoke, validate, persist.
pub struct StageRunner<'a> {
    engine: &'a dyn Engine,
    store: &'a ArtifactStore,
    config: &'a EffectiveConfig,
}

impl<'a> StageRunner<'a> {
    pub fn new(engine: &'a dyn Engine, store: &'a ArtifactStore, config: &'a EffectiveConfig) -> Self {
        Self {
            engine,
            store,
            config,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.config.engine.timeout()
    }

    pub fn run_discovery(&self, project: &Path) -> StageOutcome<DiscoveryResult> {
        let stage = StageKind::Discovery;
        let prompt = prompts::discovery_prompt(project);
        self.run(stage, self.config.pipeline.tiers.discovery, &prompt, parse_discovery)
    }

    pub fn run_domain(
        &self,
        domain: DomainId,
        project: &Path,
        discovery: &DiscoveryResult,
    ) -> StageOutcome<DomainFindings> {
        let stage = StageKind::Domain(domain);
        let skill = prompts::load_skill(&self.config.framework_root, domain);
        if skill.is_none() {
            tracing::warn!(
                stage = stage.name(),
                root = %self.config.framework_root.display(),
                "skill document not found; prompting without it"
            );
        }
        let prompt = prompts::domain_prompt(domain, project, discovery, skill.as_deref());
        let tier = self.config.pipeline.tiers.domain(domain);
        self.run(stage, tier, &prompt, |output| Ok(parse_findings(output)))
    }

    pub fn run_synthesis(
        &self,
        discovery: &DiscoveryResult,
        findings: &[Finding],
    ) -> StageOutcome<SynthesisResult> {
        let prompt = prompts::synthesis_prompt(discovery, findings);
        self.run(
            StageKind::Synthesis,
            self.config.pipeline.tiers.synthesis,
            &prompt,
            parse_synthesis,
        )
    }

    fn run<T, F>(&self, stage: StageKind, tier: CapabilityTier, prompt: &str, validate: F) -> StageOutcome<T>
    where
        T: Persist,
        F: FnOnce(EngineOutput) -> Result<T, Rejected>,
    {
        tracing::info!(stage = stage.name(), %tier, "stage started");
        let started = Instant::now();

        let output = match self.engine.invoke(prompt, tier, self.timeout()) {
            Ok(output) => output,
            Err(err) => {
                tracing::warn!(stage = stage.name(), error = %err, "stage failed");
                return StageOutcome::Failed(err.to_string());
            }
        };

        let key = stage.artifact_key();
        let raw = output.raw_text();
        let payload = match validate(output) {
            Ok(payload) => payload,
            Err(Rejected(reason)) => {
                tracing::warn!(stage = stage.name(), %reason, "stage output rejected");
                self.keep_raw(&key, &raw);
                return StageOutcome::Failed(reason);
            }
        };
        if payload.is_degraded() {
            self.keep_raw(&key, &raw);
        }

        if let Err(err) = self.store.write_json(&key, payload.artifact()) {
            tracing::warn!(stage = stage.name(), error = %format!("{err:#}"), "failed to persist stage output");
            return StageOutcome::Failed(format!("failed to persist {key}: {err:#}"));
        }

        tracing::info!(
            stage = stage.name(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "stage finished"
        );
        StageOutcome::Success(payload)
    }

    fn keep_raw(&self, key: &str, raw: &str) {
        let name = format!("{key}.raw.txt");
        if let Err(err) = self.store.write_text(&name, raw) {
            tracing::debug!(artifact = %name, error = %format!("{err:#}"), "could not keep raw output");
        }
    }
}

/// Output that failed its stage's shape check.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejected(pub String);

/// How a validated payload is written to its artifact.
trait Persist {
    type Artifact: Serialize + ?Sized;

    fn artifact(&self) -> &Self::Artifact;

    fn is_degraded(&self) -> bool {
        false
    }
}

impl Persist for DiscoveryResult {
    type Artifact = DiscoveryResult;

    fn artifact(&self) -> &DiscoveryResult {
        self
    }
}

impl Persist for SynthesisResult {
    type Artifact = SynthesisResult;

    fn artifact(&self) -> &SynthesisResult {
        self
    }
}

impl Persist for DomainFindings {
    type Artifact = [Finding];

    fn artifact(&self) -> &[Finding] {
        &self.findings
    }

    fn is_degraded(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Only a missing object rejects discovery. Sections of the wrong shape
/// fall back to their defaults with a warning.
pub fn parse_discovery(output: EngineOutput) -> Result<DiscoveryResult, Rejected> {
    let Value::Object(map) = structured_object(output, "discovery")? else {
        return Err(Rejected("discovery output is not an object".to_string()));
    };
    let (discovery, notes) = DiscoveryResult::from_engine_object(map);
    for note in &notes {
        tracing::warn!(stage = "discovery", %note, "discovery section defaulted");
    }
    Ok(discovery)
}

/// Summary fields the engine left out are computed from the deduplicated
/// findings.
pub fn parse_synthesis(output: EngineOutput) -> Result<SynthesisResult, Rejected> {
    let value = structured_object(output, "synthesis")?;
    let mut synthesis = SynthesisResult::deserialize(&value)
        .map_err(|e| Rejected(format!("synthesis output has the wrong shape: {e}")))?;

    let given = |field: &str| {
        value
            .get("summary")
            .and_then(|summary| summary.get(field))
            .is_some_and(|v| !v.is_null())
    };
    let computed = aggregate::summarize(&synthesis.deduplicated_findings);
    if !given("total_findings") {
        synthesis.summary.total_findings = computed.total_findings;
    }
    if !given("by_severity") {
        synthesis.summary.by_severity = computed.by_severity;
    }
    if !given("health_score") {
        synthesis.summary.health_score = computed.health_score;
    }
    Ok(synthesis)
}

/// Domain stages expect an array. Anything else is downgraded to zero
/// findings with a warning; array items that are not findings are dropped.
pub fn parse_findings(output: EngineOutput) -> DomainFindings {
    let items = match output {
        EngineOutput::Structured(Value::Array(items)) => items,
        EngineOutput::Structured(other) => {
            return DomainFindings {
                findings: Vec::new(),
                warnings: vec![format!(
                    "expected a findings array, got a JSON {}",
                    json_kind(&other)
                )],
            };
        }
        EngineOutput::Unstructured(_) => {
            return DomainFindings {
                findings: Vec::new(),
                warnings: vec!["expected a findings array, got unstructured text".to_string()],
            };
        }
    };

    let mut out = DomainFindings::default();
    for (idx, item) in items.into_iter().enumerate() {
        if !item.is_object() {
            out.warnings
                .push(format!("item {idx} is a JSON {}, not a finding", json_kind(&item)));
            continue;
        }
        match serde_json::from_value::<Finding>(item) {
            Ok(finding) => out.findings.push(finding),
            Err(e) => out.warnings.push(format!("item {idx} is not a finding: {e}")),
        }
    }
    out
}

fn structured_object(output: EngineOutput, stage: &str) -> Result<Value, Rejected> {
    let value = output
        .require_structured()
        .map_err(|e| Rejected(format!("{stage} output rejected: {e}")))?;
    match value {
        Value::Object(_) => Ok(value),
        other => Err(Rejected(format!(
            "{stage} output is a JSON {}, expected an object",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
