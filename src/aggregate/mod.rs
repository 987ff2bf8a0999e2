use crate::core::{ExecutionPlan, Finding, PhaseId, Severity, SeverityCounts, Summary, SynthesisResult};

pub fn count_by_severity(findings: &[Finding]) -> SeverityCounts {
    let mut counts = SeverityCounts::default();
    for severity in findings.iter().filter_map(Finding::severity_level) {
        counts.increment(severity);
    }
    counts
}

/// `100 - Σ weight(severity)`, floored at 0. Unrecognized severities weigh nothing.
pub fn health_score(findings: &[Finding]) -> u8 {
    let penalty: u32 = findings
        .iter()
        .filter_map(Finding::severity_level)
        .map(Severity::weight)
        .fold(0u32, u32::saturating_add);
    100u32.saturating_sub(penalty) as u8
}

/// One phase per severity, original order kept within each phase.
pub fn basic_plan(findings: &[Finding]) -> ExecutionPlan {
    let mut plan = ExecutionPlan::default();
    for id in PhaseId::ALL {
        let phase = plan.phase_mut(id);
        phase.name = id.default_name().to_string();
        phase.timing = id.default_timing().to_string();
    }
    for finding in findings {
        if let Some(severity) = finding.severity_level() {
            plan.phase_mut(PhaseId::for_severity(severity))
                .findings
                .push(finding.id.clone());
        }
    }
    plan
}

pub fn summarize(findings: &[Finding]) -> Summary {
    Summary {
        total_findings: findings.len(),
        by_severity: count_by_severity(findings),
        health_score: health_score(findings),
    }
}

/// Synthesis computed without the engine: raw findings, no patterns.
pub fn fallback_synthesis(findings: &[Finding]) -> SynthesisResult {
    SynthesisResult {
        summary: summarize(findings),
        systemic_patterns: Vec::new(),
        deduplicated_findings: findings.to_vec(),
        execution_plan: basic_plan(findings),
    }
}
