//! Fix mode: turns a finished analysis into prompts for a fresh engine
//! session and into PR descriptions.

use std::fmt::Write as _;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::Result;

use crate::config::{EffectiveConfig, MODEL_PLACEHOLDER, PROMPT_FILE_PLACEHOLDER};
use crate::core::{Finding, Severity, SynthesisResult};
use crate::report::{phase_heading, severity_marker};
use crate::store::{ArtifactStore, SYNTHESIS_KEY};
use crate::ui::UiConfig;

mod menu;

pub use menu::{MenuChoice, parse_menu_choice};

pub const FIX_PROMPT_FILE: &str = "fix-prompt.md";
pub const PR_DESCRIPTIONS_FILE: &str = "pr-descriptions.md";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixAction {
    Critical,
    Prs,
}

impl FromStr for FixAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "critical" | "priority" => Ok(FixAction::Critical),
            "prs" | "pr" => Ok(FixAction::Prs),
            other => Err(format!("unknown fix action: {other} (expected critical|prs)")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FixRequest {
    pub project: PathBuf,
    pub action: Option<FixAction>,
    pub id: Option<String>,
}

pub fn load_synthesis(store: &ArtifactStore) -> Result<SynthesisResult> {
    match store.read_json::<SynthesisResult>(SYNTHESIS_KEY) {
        Ok(Some(synthesis)) => Ok(synthesis),
        Ok(None) => Err(crate::exit::failure(format!(
            "no analysis found in {}; run `ucof analyze` first",
            store.root().display()
        ))),
        Err(err) => Err(crate::exit::failure(format!("{err:#}"))),
    }
}

/// Critical and high findings, critical first, otherwise in plan order.
pub fn priority_findings(synthesis: &SynthesisResult) -> Vec<&Finding> {
    let mut out: Vec<&Finding> = synthesis
        .deduplicated_findings
        .iter()
        .filter(|f| {
            matches!(
                f.severity_level(),
                Some(Severity::Critical) | Some(Severity::High)
            )
        })
        .collect();
    out.sort_by_key(|f| f.severity_level());
    out
}

pub fn fix_prompt(project: &Path, findings: &[&Finding]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Task: Fix Codebase Issues");
    let _ = writeln!(out);
    let _ = writeln!(out, "## Project Path");
    let _ = writeln!(out, "{}", project.display());
    let _ = writeln!(out);
    let _ = writeln!(out, "## Findings to Fix (in priority order)");
    for f in findings {
        let _ = writeln!(out);
        let _ = writeln!(out, "### {}: {}", f.id, f.title);
        let _ = writeln!(out, "- **Severity**: {}", f.severity);
        let _ = writeln!(out, "- **File**: {}", or_na(&f.evidence.file));
        let _ = writeln!(out, "- **Lines**: {}", or_na(&f.evidence.lines));
        let _ = writeln!(out, "- **Current Code**:");
        write_fenced(&mut out, &f.evidence.code_snippet, "See file");
        let _ = writeln!(out, "- **Required Fix**: {}", or_na(&f.recommendation.action));
        let _ = writeln!(out, "- **Example Fix**:");
        write_fenced(
            &mut out,
            f.recommendation.code_example.as_deref().unwrap_or_default(),
            "Implement based on the required fix",
        );
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "## Instructions");
    let _ = writeln!(out, "1. Fix each issue in order of severity (critical first)");
    let _ = writeln!(out, "2. Make minimal, focused changes");
    let _ = writeln!(out, "3. Preserve existing functionality");
    let _ = writeln!(out, "4. After each fix, briefly confirm what was changed");
    let _ = writeln!(out);
    let _ = writeln!(out, "Start with the first issue.");
    out
}

/// One section per non-empty phase, one PR per finding the plan can resolve.
pub fn pr_descriptions(synthesis: &SynthesisResult) -> String {
    let mut out = String::from("# Pull Request Descriptions\n\n");
    for (id, phase) in synthesis.execution_plan.phases() {
        if phase.findings.is_empty() {
            continue;
        }
        let _ = writeln!(out, "## {}", phase_heading(id));
        let _ = writeln!(out);
        for finding_id in &phase.findings {
            let Some(f) = synthesis.finding(finding_id) else {
                continue;
            };
            let _ = writeln!(out, "### PR: Fix {} - {}", f.id, f.title);
            let _ = writeln!(out);
            let _ = writeln!(out, "**Type**: {}", pr_type(f));
            let _ = writeln!(out);
            let _ = writeln!(out, "**Description**:");
            let description = if f.impact.is_empty() { &f.title } else { &f.impact };
            let _ = writeln!(out, "{description}");
            let _ = writeln!(out);
            let _ = writeln!(out, "**Changes**:");
            let _ = writeln!(out, "- {}", or_na(&f.recommendation.action));
            let _ = writeln!(out);
            let file = if f.evidence.file.is_empty() {
                "TBD"
            } else {
                f.evidence.file.as_str()
            };
            let _ = writeln!(out, "**Files**: `{file}`");
            let _ = writeln!(out);
            let _ = writeln!(out, "---");
            let _ = writeln!(out);
        }
    }
    out
}

fn pr_type(f: &Finding) -> String {
    match f.severity_level() {
        Some(Severity::Critical) => format!("{} Critical Fix", severity_marker(Severity::Critical)),
        Some(Severity::High) => format!("{} High Priority", severity_marker(Severity::High)),
        _ => format!("{} Improvement", severity_marker(Severity::Medium)),
    }
}

fn or_na(s: &str) -> &str {
    if s.trim().is_empty() { "N/A" } else { s }
}

fn write_fenced(out: &mut String, body: &str, placeholder: &str) {
    let body = if body.trim().is_empty() {
        placeholder
    } else {
        body.trim_end()
    };
    let _ = writeln!(out, "```");
    let _ = writeln!(out, "{body}");
    let _ = writeln!(out, "```");
}

/// Command line that starts a fresh engine session on `prompt_file`.
pub fn session_hint(config: &EffectiveConfig, prompt_file: &Path) -> String {
    let model = config
        .engine
        .models
        .model(config.pipeline.tiers.synthesis)
        .to_string();
    let file = prompt_file.display().to_string();
    let mut out = config.engine.command.clone();
    for arg in &config.engine.args {
        if arg == "--print" {
            continue;
        }
        out.push(' ');
        out.push_str(
            &arg.replace(PROMPT_FILE_PLACEHOLDER, &file)
                .replace(MODEL_PLACEHOLDER, &model),
        );
    }
    out
}

pub fn run(req: &FixRequest, config: &EffectiveConfig, ui: &UiConfig) -> Result<()> {
    if !req.project.is_dir() {
        return Err(crate::exit::failure(format!(
            "project path does not exist: {}",
            req.project.display()
        )));
    }
    let store = ArtifactStore::for_project(&req.project, &config.pipeline.output_dir);
    let synthesis = load_synthesis(&store)?;
    let priority = priority_findings(&synthesis);

    let choice = match (&req.id, req.action) {
        (Some(_), _) => MenuChoice::FixById,
        (None, Some(FixAction::Critical)) => MenuChoice::FixPriority,
        (None, Some(FixAction::Prs)) => MenuChoice::PrDescriptions,
        (None, None) => {
            if !(ui.stdin_is_tty && ui.stdout_is_tty) {
                return Err(crate::exit::invalid_args(
                    "fix needs a TTY for the menu; pass --action critical|prs or --id <ID>",
                ));
            }
            crate::ui::print_priority_findings(&priority, ui);
            menu::print_menu(&mut io::stdout().lock());
            menu::prompt_menu_choice().map_err(crate::exit::invalid_args_err)?
        }
    };

    match choice {
        MenuChoice::FixPriority => {
            if priority.is_empty() {
                if !ui.quiet {
                    println!("No critical or high findings to fix.");
                }
                return Ok(());
            }
            let path = store.write_text(FIX_PROMPT_FILE, &fix_prompt(&req.project, &priority))?;
            announce_prompt(config, ui, &path, priority.len());
        }
        MenuChoice::FixById => {
            let id = match &req.id {
                Some(id) => Some(id.clone()),
                None => menu::prompt_finding_id()?,
            };
            let Some(id) = id else {
                return Ok(());
            };
            let Some(finding) = synthesis.finding(id.trim()) else {
                return Err(crate::exit::invalid_args(format!(
                    "no finding with id {id} in synthesis.json"
                )));
            };
            let path = store.write_text(FIX_PROMPT_FILE, &fix_prompt(&req.project, &[finding]))?;
            announce_prompt(config, ui, &path, 1);
        }
        MenuChoice::PrDescriptions => {
            let path = store.write_text(PR_DESCRIPTIONS_FILE, &pr_descriptions(&synthesis))?;
            tracing::info!(path = %path.display(), "pr descriptions written");
            if !ui.quiet {
                println!("PR descriptions saved to: {}", path.display());
            }
        }
        MenuChoice::Exit => {
            if !ui.quiet {
                println!("Exiting.");
            }
        }
    }
    Ok(())
}

fn announce_prompt(config: &EffectiveConfig, ui: &UiConfig, path: &Path, count: usize) {
    tracing::info!(path = %path.display(), findings = count, "fix prompt written");
    if ui.quiet {
        return;
    }
    println!("Fix prompt for {count} finding(s) saved to: {}", path.display());
    println!();
    println!("Start a fresh session with it:");
    println!("  {}", session_hint(config, path));
}
