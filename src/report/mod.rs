use std::fmt::Write as _;

use crate::core::{DiscoveryResult, Finding, PhaseId, PlanPhase, Severity, SynthesisResult};

/// Renders `report.md`. Deterministic for a given `generated_at`.
pub fn render_markdown(
    discovery: &DiscoveryResult,
    synthesis: &SynthesisResult,
    generated_at: &str,
) -> String {
    let mut out = String::new();
    let summary = &synthesis.summary;

    let _ = writeln!(out, "# Codebase Optimization Report");
    let _ = writeln!(out);
    let _ = writeln!(out, "## Project: {}", display_or(&discovery.project_name, "unknown"));
    let _ = writeln!(out, "Generated: {generated_at}");
    let _ = writeln!(out);
    let _ = writeln!(out, "## Health Score: {}/100", summary.health_score);
    let _ = writeln!(out);
    let _ = writeln!(out, "## Executive Summary");
    let _ = writeln!(out);
    let _ = writeln!(out, "Total findings: {}", summary.total_findings);
    let _ = writeln!(out);
    let _ = writeln!(out, "| Severity | Count |");
    let _ = writeln!(out, "|----------|-------|");
    for severity in Severity::ALL {
        let _ = writeln!(
            out,
            "| {} {} | {} |",
            severity_marker(severity),
            severity_label(severity),
            summary.by_severity.get(severity)
        );
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "## Tech Stack");
    let categories = discovery.tech_stack.categories();
    if categories.is_empty() {
        let _ = writeln!(out, "_No technologies detected._");
    }
    for (name, items) in categories {
        let _ = writeln!(out, "- **{name}**: {}", items.join(", "));
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "## Systemic Patterns");
    if synthesis.systemic_patterns.is_empty() {
        let _ = writeln!(out, "No systemic patterns identified.");
    }
    for (idx, pattern) in synthesis.systemic_patterns.iter().enumerate() {
        if idx > 0 {
            let _ = writeln!(out);
        }
        let _ = writeln!(out, "### {}", display_or(&pattern.name, &pattern.id));
        if !pattern.description.is_empty() {
            let _ = writeln!(out, "{}", pattern.description);
        }
        if !pattern.contributing_findings.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(
                out,
                "**Contributing findings**: {}",
                pattern.contributing_findings.join(", ")
            );
        }
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "**Recommendation**: {}",
            display_or(&pattern.recommendation, "N/A")
        );
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "## Execution Plan");
    for (id, phase) in synthesis.execution_plan.phases() {
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "### Phase {}: {} ({})",
            id.index(),
            display_or(&phase.name, id.default_name()),
            display_or(&phase.timing, id.default_timing())
        );
        if !phase.effort_estimate.is_empty() {
            let _ = writeln!(out, "Effort: {}", phase.effort_estimate);
        }
        write_phase_findings(&mut out, phase, synthesis);
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "---");
    let _ = writeln!(out);
    let _ = writeln!(out, "## All Findings");
    if synthesis.deduplicated_findings.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "_No findings._");
    }
    for finding in &synthesis.deduplicated_findings {
        write_finding(&mut out, finding);
    }

    out
}

fn write_phase_findings(out: &mut String, phase: &PlanPhase, synthesis: &SynthesisResult) {
    if phase.findings.is_empty() {
        let _ = writeln!(out, "No items in this phase.");
        return;
    }
    for id in &phase.findings {
        match synthesis.finding(id) {
            Some(f) => {
                let _ = writeln!(out, "- **{id}**: {}", f.title);
            }
            None => {
                let _ = writeln!(out, "- {id}");
            }
        }
    }
}

fn write_finding(out: &mut String, f: &Finding) {
    let _ = writeln!(out);
    let _ = writeln!(out, "### {}: {}", f.id, f.title);
    let _ = writeln!(out, "- **Severity**: {}", display_or(&f.severity, "N/A"));
    let _ = writeln!(out, "- **File**: {}", display_or(&f.evidence.file, "N/A"));
    let _ = writeln!(out, "- **Impact**: {}", display_or(&f.impact, "N/A"));
    let _ = writeln!(out, "- **Fix**: {}", display_or(&f.recommendation.action, "N/A"));
    let _ = writeln!(out, "- **Effort**: {}", display_or(&f.recommendation.effort, "N/A"));
}

/// Heading for a plan phase, e.g. `PHASE 0 IMMEDIATE`.
pub fn phase_heading(id: PhaseId) -> String {
    id.key().replace('_', " ").to_ascii_uppercase()
}

pub fn severity_label(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "Critical",
        Severity::High => "High",
        Severity::Medium => "Medium",
        Severity::Low => "Low",
    }
}

pub fn severity_marker(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "🔴",
        Severity::High => "🟠",
        Severity::Medium => "🟡",
        Severity::Low => "🔵",
    }
}

fn display_or<'a>(s: &'a str, fallback: &'a str) -> &'a str {
    if s.trim().is_empty() { fallback } else { s }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate;

    fn finding(id: &str, severity: &str) -> Finding {
        Finding {
            id: id.to_string(),
            title: format!("Issue {id}"),
            severity: severity.to_string(),
            ..Finding::default()
        }
    }

    fn discovery() -> DiscoveryResult {
        serde_json::from_str(
            r#"{"project_name": "shop", "tech_stack": {"backend": ["axum"], "database": ["postgres"]}}"#,
        )
        .unwrap()
    }

    #[test]
    fn renders_summary_table_and_stack() {
        let findings = vec![finding("SEC-001", "critical"), finding("QUA-001", "low")];
        let synthesis = aggregate::fallback_synthesis(&findings);
        let md = render_markdown(&discovery(), &synthesis, "2026-01-01T00:00:00Z");
        assert!(md.contains("## Project: shop"));
        assert!(md.contains("Generated: 2026-01-01T00:00:00Z"));
        assert!(md.contains("## Health Score: 79/100"));
        assert!(md.contains("| 🔴 Critical | 1 |"));
        assert!(md.contains("| 🟠 High | 0 |"));
        assert!(md.contains("- **backend**: axum"));
        assert!(md.contains("- **SEC-001**: Issue SEC-001"));
        assert!(md.contains("No systemic patterns identified."));
    }

    #[test]
    fn dangling_plan_ids_render_as_bare_ids() {
        let mut synthesis = aggregate::fallback_synthesis(&[finding("SEC-001", "critical")]);
        synthesis
            .execution_plan
            .phase_1_foundation
            .findings
            .push("MERGED-7".to_string());
        let md = render_markdown(&discovery(), &synthesis, "t");
        assert!(md.contains("\n- MERGED-7\n"));
    }

    #[test]
    fn empty_phases_say_so() {
        let synthesis = aggregate::fallback_synthesis(&[]);
        let md = render_markdown(&DiscoveryResult::default(), &synthesis, "t");
        assert_eq!(md.matches("No items in this phase.").count(), 4);
        assert!(md.contains("## Project: unknown"));
        assert!(md.contains("_No findings._"));
    }

    #[test]
    fn rendering_is_deterministic() {
        let synthesis = aggregate::fallback_synthesis(&[finding("A", "high")]);
        assert_eq!(
            render_markdown(&discovery(), &synthesis, "t"),
            render_markdown(&discovery(), &synthesis, "t")
        );
    }

    #[test]
    fn phase_heading_is_upper_spaced() {
        assert_eq!(phase_heading(PhaseId::Foundation), "PHASE 1 FOUNDATION");
    }
}
