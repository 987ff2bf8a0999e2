//! Prompt text for each stage. Every builder is a pure function of its inputs.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use crate::core::{DiscoveryResult, Finding};
use crate::selector::{self, DomainId};

const DISCOVERY_SHAPE: &str = r#"{
  "project_name": "string",
  "tech_stack": {
    "frontend": ["tech1", "tech2"],
    "backend": ["tech1"],
    "database": ["tech1"],
    "queue": "tech or null",
    "ai_services": ["service1"],
    "deployment": ["platform1"]
  },
  "structure": {
    "frontend_paths": ["path1", "path2"],
    "backend_paths": ["path1"],
    "data_paths": ["path1"],
    "config_files": ["file1", "file2"]
  },
  "quality_indicators": {
    "has_tests": boolean,
    "has_ci_cd": boolean,
    "has_linting": boolean,
    "has_typescript": boolean,
    "has_error_monitoring": boolean
  },
  "file_counts": {
    "total": number,
    "by_extension": {"ts": number, "tsx": number, "py": number}
  },
  "critical_files": [
    {"path": "string", "reason": "string"}
  ],
  "immediate_concerns": [
    {"issue": "string", "severity": "critical|high|medium|low"}
  ]
}"#;

const SYNTHESIS_SHAPE: &str = r#"{
  "summary": {
    "total_findings": number,
    "by_severity": {"critical": n, "high": n, "medium": n, "low": n},
    "health_score": number (0-100)
  },
  "systemic_patterns": [
    {
      "id": "SYS-001",
      "name": "Pattern Name",
      "description": "What this pattern means",
      "contributing_findings": ["ID-001", "ID-002"],
      "severity": "critical|high|medium|low",
      "recommendation": "How to address"
    }
  ],
  "deduplicated_findings": [/* merged findings array */],
  "execution_plan": {
    "phase_0_immediate": {"name": "Critical Blockers", "timing": "Before production", "findings": ["ID-001"], "effort_estimate": "X days"},
    "phase_1_foundation": {"name": "Foundation", "timing": "Sprint 1", "findings": ["ID-002"], "effort_estimate": "X days"},
    "phase_2_stability": {"name": "Stability", "timing": "Sprint 2", "findings": ["ID-004"], "effort_estimate": "X days"},
    "phase_3_hardening": {"name": "Hardening", "timing": "Sprint 3+", "findings": ["ID-005"], "effort_estimate": "X days"}
  }
}"#;

pub fn discovery_prompt(project: &Path) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Task: Project Discovery");
    let _ = writeln!(out);
    let _ = writeln!(out, "Analyze the project at: {}", project.display());
    let _ = writeln!(out);
    let _ = writeln!(out, "## Instructions");
    let _ = writeln!(out, "1. Detect the technology stack");
    let _ = writeln!(out, "2. Map the directory structure");
    let _ = writeln!(out, "3. Identify critical files");
    let _ = writeln!(out, "4. Assess quality indicators (tests, CI/CD, linting)");
    let _ = writeln!(out);
    let _ = writeln!(out, "## Output Format");
    let _ = writeln!(
        out,
        "Output ONLY a JSON object with this structure (no markdown, no explanation):"
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "{DISCOVERY_SHAPE}");
    out
}

pub fn domain_prompt(
    domain: DomainId,
    project: &Path,
    discovery: &DiscoveryResult,
    skill: Option<&str>,
) -> String {
    let tech_stack = to_pretty_json(&discovery.tech_stack);
    let paths = to_pretty_json(&selector::relevant_paths(domain, discovery));
    let prefix = domain.id_prefix();

    let mut out = String::new();
    let _ = writeln!(out, "# Task: {} Domain Analysis", domain.title());
    let _ = writeln!(out);
    let _ = writeln!(out, "## Project Context (from discovery)");
    let _ = writeln!(out, "- Project: {}", discovery.project_name);
    let _ = writeln!(out, "- Tech Stack: {tech_stack}");
    let _ = writeln!(out, "- Relevant Paths: {paths}");
    let _ = writeln!(out);
    let _ = writeln!(out, "## Project Path");
    let _ = writeln!(out, "{}", project.display());
    let _ = writeln!(out);
    let _ = writeln!(out, "## Instructions");
    let _ = writeln!(
        out,
        "Analyze ONLY the {} domain. Focus on files in the relevant paths.",
        domain.as_str()
    );
    if let Some(skill) = skill.map(str::trim).filter(|s| !s.is_empty()) {
        let _ = writeln!(out);
        let _ = writeln!(out, "{skill}");
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "## Output Format");
    let _ = writeln!(
        out,
        "Output ONLY a JSON array of findings (no markdown, no explanation):"
    );
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        r#"[
  {{
    "id": "{prefix}-001",
    "title": "string",
    "severity": "critical|high|medium|low",
    "category": "string",
    "evidence": {{"file": "path/to/file", "lines": "10-20", "code_snippet": "relevant code"}},
    "impact": "string",
    "recommendation": {{"action": "string", "effort": "low|medium|high", "code_example": "optional fix code"}},
    "tags": ["tag1", "tag2"]
  }}
]"#
    );
    out
}

pub fn synthesis_prompt(discovery: &DiscoveryResult, findings: &[Finding]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Task: Cross-Domain Synthesis");
    let _ = writeln!(out);
    let _ = writeln!(out, "## Project Context");
    let _ = writeln!(out, "- Project: {}", discovery.project_name);
    let _ = writeln!(out, "- Tech Stack: {}", to_pretty_json(&discovery.tech_stack));
    let _ = writeln!(out);
    let _ = writeln!(out, "## All Findings from Domain Analysis");
    let _ = writeln!(out, "{}", to_pretty_json(findings));
    let _ = writeln!(out);
    let _ = writeln!(out, "## Instructions");
    let _ = writeln!(out, "1. Identify SYSTEMIC PATTERNS that span multiple domains");
    let _ = writeln!(out, "2. Deduplicate overlapping findings");
    let _ = writeln!(out, "3. Build dependency graph between findings");
    let _ = writeln!(out, "4. Create phased execution plan");
    let _ = writeln!(out);
    let _ = writeln!(out, "## Output Format");
    let _ = writeln!(out, "Output ONLY a JSON object (no markdown, no explanation):");
    let _ = writeln!(out);
    let _ = writeln!(out, "{SYNTHESIS_SHAPE}");
    out
}

/// Candidate locations of a domain's skill document, in lookup order.
pub fn skill_paths(framework_root: &Path, domain: DomainId) -> [PathBuf; 2] {
    let skills = framework_root.join("skills");
    [
        skills.join(domain.as_str()).join("SKILL.md"),
        skills.join("domains").join(domain.as_str()).join("SKILL.md"),
    ]
}

pub fn load_skill(framework_root: &Path, domain: DomainId) -> Option<String> {
    skill_paths(framework_root, domain)
        .iter()
        .find_map(|p| std::fs::read_to_string(p).ok())
}

fn to_pretty_json<T: serde::Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "null".to_string())
}
