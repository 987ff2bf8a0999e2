use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::CapabilityTier;
use crate::selector::DomainId;

pub const PROMPT_FILE_PLACEHOLDER: &str = "{prompt_file}";
pub const MODEL_PLACEHOLDER: &str = "{model}";

/// Configuration for one process, built once by [`load`] and passed down by
/// reference. Nothing below the CLI reads the environment.
#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    pub engine: EngineConfig,
    pub pipeline: PipelineConfig,
    pub ui: UiConfig,
    pub framework_root: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineConfig {
    pub command: String,
    pub args: Vec<String>,
    pub timeout_secs: u64,
    pub models: ModelMap,
}

impl EngineConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelMap {
    pub cheap: String,
    pub standard: String,
    pub advanced: String,
}

impl ModelMap {
    pub fn model(&self, tier: CapabilityTier) -> &str {
        match tier {
            CapabilityTier::Cheap => &self.cheap,
            CapabilityTier::Standard => &self.standard,
            CapabilityTier::Advanced => &self.advanced,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineConfig {
    pub output_dir: String,
    pub max_parallel: usize,
    pub tiers: StageTiers,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageTiers {
    pub discovery: CapabilityTier,
    pub synthesis: CapabilityTier,
    pub domains: BTreeMap<DomainId, CapabilityTier>,
}

impl StageTiers {
    pub fn domain(&self, domain: DomainId) -> CapabilityTier {
        self.domains
            .get(&domain)
            .copied()
            .unwrap_or_else(|| domain.default_tier())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UiConfig {
    pub color: bool,
    pub max_table_rows: usize,
}

impl Default for EffectiveConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig {
                command: "claude".to_string(),
                args: vec![
                    "--model".to_string(),
                    MODEL_PLACEHOLDER.to_string(),
                    "--print".to_string(),
                    "--prompt-file".to_string(),
                    PROMPT_FILE_PLACEHOLDER.to_string(),
                ],
                timeout_secs: 300,
                models: ModelMap {
                    cheap: "claude-haiku-4-5-20251001".to_string(),
                    standard: "claude-sonnet-4-5-20250929".to_string(),
                    advanced: "claude-opus-4-5-20251101".to_string(),
                },
            },
            pipeline: PipelineConfig {
                output_dir: ".optimization".to_string(),
                max_parallel: 4,
                tiers: StageTiers {
                    discovery: CapabilityTier::Cheap,
                    synthesis: CapabilityTier::Advanced,
                    domains: DomainId::ALL
                        .iter()
                        .map(|d| (*d, d.default_tier()))
                        .collect(),
                },
            },
            ui: UiConfig {
                color: true,
                max_table_rows: 20,
            },
            framework_root: PathBuf::from("."),
            config_path: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    engine: Option<RawEngineConfig>,
    pipeline: Option<RawPipelineConfig>,
    ui: Option<RawUiConfig>,
}

#[derive(Debug, Deserialize)]
struct RawEngineConfig {
    command: Option<String>,
    args: Option<Vec<String>>,
    timeout_secs: Option<u64>,
    models: Option<RawModelMap>,
}

#[derive(Debug, Deserialize)]
struct RawModelMap {
    cheap: Option<String>,
    standard: Option<String>,
    advanced: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawPipelineConfig {
    output_dir: Option<String>,
    max_parallel: Option<usize>,
    tiers: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct RawUiConfig {
    color: Option<bool>,
    max_table_rows: Option<usize>,
}

pub fn default_config_path(home_dir: &Path) -> PathBuf {
    home_dir.join(".config/ucof/config.toml")
}

/// Asset root holding `skills/`: `UCOF_PATH`, else the parent of the
/// executable's directory.
pub fn default_framework_root() -> PathBuf {
    if let Some(p) = std::env::var_os("UCOF_PATH") {
        if !p.is_empty() {
            return PathBuf::from(p);
        }
    }
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().and_then(Path::parent).map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

pub fn load(config_path: Option<&Path>, home_dir: &Path) -> Result<EffectiveConfig> {
    let mut cfg = EffectiveConfig::default();
    cfg.framework_root = default_framework_root();

    let path = config_path
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| default_config_path(home_dir));

    if path.exists() {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let raw: RawConfig = toml::from_str(&s).context("failed to parse config file (TOML)")?;
        apply_raw_config(&mut cfg, raw)?;
        cfg.config_path = Some(path.display().to_string());
    } else if config_path.is_some() {
        return Err(anyhow::anyhow!(
            "config file does not exist: {}",
            path.display()
        ));
    }

    apply_env_overrides(&mut cfg)?;
    validate(&cfg)?;

    Ok(cfg)
}

/// Flags that outrank every other configuration layer.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub timeout_secs: Option<u64>,
    pub max_parallel: Option<usize>,
}

pub fn apply_cli_overrides(cfg: &mut EffectiveConfig, overrides: &CliOverrides) -> Result<()> {
    if let Some(secs) = overrides.timeout_secs {
        cfg.engine.timeout_secs = secs;
    }
    if let Some(jobs) = overrides.max_parallel {
        cfg.pipeline.max_parallel = jobs;
    }
    validate(cfg)
}

fn apply_raw_config(cfg: &mut EffectiveConfig, raw: RawConfig) -> Result<()> {
    if let Some(engine) = raw.engine {
        if let Some(command) = engine.command {
            cfg.engine.command = command;
        }
        if let Some(args) = engine.args {
            cfg.engine.args = args;
        }
        if let Some(timeout_secs) = engine.timeout_secs {
            cfg.engine.timeout_secs = timeout_secs;
        }
        if let Some(models) = engine.models {
            if let Some(m) = models.cheap {
                cfg.engine.models.cheap = m;
            }
            if let Some(m) = models.standard {
                cfg.engine.models.standard = m;
            }
            if let Some(m) = models.advanced {
                cfg.engine.models.advanced = m;
            }
        }
    }

    if let Some(pipeline) = raw.pipeline {
        if let Some(output_dir) = pipeline.output_dir {
            cfg.pipeline.output_dir = output_dir;
        }
        if let Some(max_parallel) = pipeline.max_parallel {
            cfg.pipeline.max_parallel = max_parallel;
        }
        if let Some(tiers) = pipeline.tiers {
            for (stage, tier) in tiers {
                apply_stage_tier(&mut cfg.pipeline.tiers, &stage, &tier)
                    .with_context(|| format!("pipeline.tiers.{stage}"))?;
            }
        }
    }

    if let Some(ui) = raw.ui {
        if let Some(color) = ui.color {
            cfg.ui.color = color;
        }
        if let Some(max_table_rows) = ui.max_table_rows {
            cfg.ui.max_table_rows = max_table_rows;
        }
    }

    Ok(())
}

fn apply_stage_tier(tiers: &mut StageTiers, stage: &str, tier: &str) -> Result<()> {
    let tier = tier
        .parse::<CapabilityTier>()
        .map_err(anyhow::Error::msg)?;
    match stage.trim() {
        "discovery" => tiers.discovery = tier,
        "synthesis" => tiers.synthesis = tier,
        other => {
            let domain = other.parse::<DomainId>().map_err(anyhow::Error::msg)?;
            tiers.domains.insert(domain, tier);
        }
    }
    Ok(())
}

fn apply_env_overrides(cfg: &mut EffectiveConfig) -> Result<()> {
    if let Ok(v) = std::env::var("UCOF_ENGINE_COMMAND") {
        let v = v.trim();
        if !v.is_empty() {
            cfg.engine.command = v.to_string();
        }
    }
    if let Ok(v) = std::env::var("UCOF_ENGINE_TIMEOUT_SECS") {
        cfg.engine.timeout_secs = v
            .trim()
            .parse::<u64>()
            .with_context(|| "UCOF_ENGINE_TIMEOUT_SECS")?;
    }
    for (var, tier) in [
        ("UCOF_MODEL_CHEAP", CapabilityTier::Cheap),
        ("UCOF_MODEL_STANDARD", CapabilityTier::Standard),
        ("UCOF_MODEL_ADVANCED", CapabilityTier::Advanced),
    ] {
        if let Ok(v) = std::env::var(var) {
            let v = v.trim();
            if v.is_empty() {
                continue;
            }
            let slot = match tier {
                CapabilityTier::Cheap => &mut cfg.engine.models.cheap,
                CapabilityTier::Standard => &mut cfg.engine.models.standard,
                CapabilityTier::Advanced => &mut cfg.engine.models.advanced,
            };
            *slot = v.to_string();
        }
    }
    if let Ok(v) = std::env::var("UCOF_MAX_PARALLEL") {
        cfg.pipeline.max_parallel = v
            .trim()
            .parse::<usize>()
            .with_context(|| "UCOF_MAX_PARALLEL")?;
    }
    if let Ok(v) = std::env::var("UCOF_OUTPUT_DIR") {
        let v = v.trim();
        if !v.is_empty() {
            cfg.pipeline.output_dir = v.to_string();
        }
    }
    if let Ok(v) = std::env::var("UCOF_UI_COLOR") {
        cfg.ui.color = parse_bool(&v).with_context(|| "UCOF_UI_COLOR")?;
    }

    Ok(())
}

fn validate(cfg: &EffectiveConfig) -> Result<()> {
    if cfg.engine.command.trim().is_empty() {
        return Err(anyhow::anyhow!("engine.command must not be empty"));
    }
    if cfg.engine.timeout_secs == 0 {
        return Err(anyhow::anyhow!("engine.timeout_secs must be greater than 0"));
    }
    if cfg.pipeline.max_parallel == 0 {
        return Err(anyhow::anyhow!("pipeline.max_parallel must be at least 1"));
    }
    let out = Path::new(&cfg.pipeline.output_dir);
    if cfg.pipeline.output_dir.trim().is_empty() || out.is_absolute() {
        return Err(anyhow::anyhow!(
            "pipeline.output_dir must be a relative directory name: {}",
            cfg.pipeline.output_dir
        ));
    }
    Ok(())
}

fn parse_bool(s: &str) -> Result<bool> {
    let s = s.trim().to_ascii_lowercase();
    match s.as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow::anyhow!(
            "invalid boolean: {s} (expected true|false|1|0|yes|no|on|off)"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_win_and_are_validated() {
        let mut cfg = EffectiveConfig::default();
        apply_cli_overrides(
            &mut cfg,
            &CliOverrides {
                timeout_secs: Some(12),
                max_parallel: Some(2),
            },
        )
        .unwrap();
        assert_eq!(cfg.engine.timeout_secs, 12);
        assert_eq!(cfg.pipeline.max_parallel, 2);

        let err = apply_cli_overrides(
            &mut cfg,
            &CliOverrides {
                timeout_secs: None,
                max_parallel: Some(0),
            },
        );
        assert!(err.is_err());
    }

    #[test]
    fn defaults_route_domains_to_their_tiers() {
        let cfg = EffectiveConfig::default();
        let tiers = &cfg.pipeline.tiers;
        assert_eq!(tiers.discovery, CapabilityTier::Cheap);
        assert_eq!(tiers.synthesis, CapabilityTier::Advanced);
        assert_eq!(tiers.domain(DomainId::Security), CapabilityTier::Advanced);
        assert_eq!(tiers.domain(DomainId::Frontend), CapabilityTier::Standard);
        assert_eq!(cfg.engine.timeout(), Duration::from_secs(300));
    }

    #[test]
    fn raw_config_overrides_tiers_and_models() {
        let mut cfg = EffectiveConfig::default();
        let raw: RawConfig = toml::from_str(
            r#"
[engine]
command = "fake-engine"
timeout_secs = 5

[engine.models]
advanced = "big-model"

[pipeline]
max_parallel = 2

[pipeline.tiers]
quality = "cheap"
synthesis = "standard"
"#,
        )
        .unwrap();
        apply_raw_config(&mut cfg, raw).unwrap();
        assert_eq!(cfg.engine.command, "fake-engine");
        assert_eq!(cfg.engine.timeout_secs, 5);
        assert_eq!(cfg.engine.models.model(CapabilityTier::Advanced), "big-model");
        assert_eq!(cfg.pipeline.max_parallel, 2);
        assert_eq!(cfg.pipeline.tiers.domain(DomainId::Quality), CapabilityTier::Cheap);
        assert_eq!(cfg.pipeline.tiers.synthesis, CapabilityTier::Standard);
    }

    #[test]
    fn unknown_stage_tier_is_rejected() {
        let mut cfg = EffectiveConfig::default();
        let raw: RawConfig = toml::from_str(
            r#"
[pipeline.tiers]
marketing = "cheap"
"#,
        )
        .unwrap();
        assert!(apply_raw_config(&mut cfg, raw).is_err());
    }

    #[test]
    fn validate_rejects_zero_parallelism_and_absolute_output() {
        let mut cfg = EffectiveConfig::default();
        cfg.pipeline.max_parallel = 0;
        assert!(validate(&cfg).is_err());

        let mut cfg = EffectiveConfig::default();
        cfg.pipeline.output_dir = "/tmp/out".to_string();
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn parse_bool_variants() {
        assert!(parse_bool("Yes").unwrap());
        assert!(!parse_bool("off").unwrap());
        assert!(parse_bool("maybe").is_err());
    }
}
