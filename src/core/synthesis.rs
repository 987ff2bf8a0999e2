use serde::{Deserialize, Serialize};

use crate::core::{Finding, Severity, SeverityCounts, lenient};

/// Cross-domain merge of all findings: the run's final artifact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SynthesisResult {
    pub summary: Summary,
    #[serde(default)]
    pub systemic_patterns: Vec<SystemicPattern>,
    #[serde(default)]
    pub deduplicated_findings: Vec<Finding>,
    pub execution_plan: ExecutionPlan,
}

impl SynthesisResult {
    pub fn finding(&self, id: &str) -> Option<&Finding> {
        self.deduplicated_findings.iter().find(|f| f.id == id)
    }

    /// Plan ids with no matching deduplicated finding, in plan order.
    pub fn dangling_ids(&self) -> Vec<&str> {
        self.execution_plan
            .phases()
            .into_iter()
            .flat_map(|(_, phase)| phase.findings.iter())
            .filter(|id| self.finding(id).is_none())
            .map(String::as_str)
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    #[serde(default)]
    pub total_findings: usize,
    #[serde(default)]
    pub by_severity: SeverityCounts,
    #[serde(default, deserialize_with = "lenient::score")]
    pub health_score: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemicPattern {
    #[serde(default, deserialize_with = "lenient::stringish")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient::stringish")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient::stringish")]
    pub description: String,
    #[serde(default, deserialize_with = "lenient::string_or_seq")]
    pub contributing_findings: Vec<String>,
    #[serde(default, deserialize_with = "lenient::stringish")]
    pub severity: String,
    #[serde(default, deserialize_with = "lenient::stringish")]
    pub recommendation: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PhaseId {
    Immediate,
    Foundation,
    Stability,
    Hardening,
}

impl PhaseId {
    pub const ALL: [PhaseId; 4] = [
        PhaseId::Immediate,
        PhaseId::Foundation,
        PhaseId::Stability,
        PhaseId::Hardening,
    ];

    pub const fn key(self) -> &'static str {
        match self {
            PhaseId::Immediate => "phase_0_immediate",
            PhaseId::Foundation => "phase_1_foundation",
            PhaseId::Stability => "phase_2_stability",
            PhaseId::Hardening => "phase_3_hardening",
        }
    }

    pub const fn index(self) -> usize {
        match self {
            PhaseId::Immediate => 0,
            PhaseId::Foundation => 1,
            PhaseId::Stability => 2,
            PhaseId::Hardening => 3,
        }
    }

    pub const fn default_name(self) -> &'static str {
        match self {
            PhaseId::Immediate => "Immediate",
            PhaseId::Foundation => "Foundation",
            PhaseId::Stability => "Stability",
            PhaseId::Hardening => "Hardening",
        }
    }

    pub const fn default_timing(self) -> &'static str {
        match self {
            PhaseId::Immediate => "Before production",
            PhaseId::Foundation => "Sprint 1",
            PhaseId::Stability => "Sprint 2",
            PhaseId::Hardening => "Sprint 3+",
        }
    }

    /// Severity whose findings land in this phase under the fallback plan.
    pub const fn severity(self) -> Severity {
        match self {
            PhaseId::Immediate => Severity::Critical,
            PhaseId::Foundation => Severity::High,
            PhaseId::Stability => Severity::Medium,
            PhaseId::Hardening => Severity::Low,
        }
    }

    pub const fn for_severity(severity: Severity) -> PhaseId {
        match severity {
            Severity::Critical => PhaseId::Immediate,
            Severity::High => PhaseId::Foundation,
            Severity::Medium => PhaseId::Stability,
            Severity::Low => PhaseId::Hardening,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    #[serde(default)]
    pub phase_0_immediate: PlanPhase,
    #[serde(default)]
    pub phase_1_foundation: PlanPhase,
    #[serde(default)]
    pub phase_2_stability: PlanPhase,
    #[serde(default)]
    pub phase_3_hardening: PlanPhase,
}

impl ExecutionPlan {
    pub fn phase(&self, id: PhaseId) -> &PlanPhase {
        match id {
            PhaseId::Immediate => &self.phase_0_immediate,
            PhaseId::Foundation => &self.phase_1_foundation,
            PhaseId::Stability => &self.phase_2_stability,
            PhaseId::Hardening => &self.phase_3_hardening,
        }
    }

    pub fn phase_mut(&mut self, id: PhaseId) -> &mut PlanPhase {
        match id {
            PhaseId::Immediate => &mut self.phase_0_immediate,
            PhaseId::Foundation => &mut self.phase_1_foundation,
            PhaseId::Stability => &mut self.phase_2_stability,
            PhaseId::Hardening => &mut self.phase_3_hardening,
        }
    }

    pub fn phases(&self) -> [(PhaseId, &PlanPhase); 4] {
        PhaseId::ALL.map(|id| (id, self.phase(id)))
    }

    pub fn is_empty(&self) -> bool {
        self.phases().iter().all(|(_, p)| p.findings.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanPhase {
    #[serde(
        default,
        deserialize_with = "lenient::stringish",
        skip_serializing_if = "String::is_empty"
    )]
    pub name: String,
    #[serde(
        default,
        deserialize_with = "lenient::stringish",
        skip_serializing_if = "String::is_empty"
    )]
    pub timing: String,
    #[serde(default, deserialize_with = "lenient::string_or_seq")]
    pub findings: Vec<String>,
    #[serde(
        default,
        deserialize_with = "lenient::stringish",
        skip_serializing_if = "String::is_empty"
    )]
    pub effort_estimate: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(id: &str) -> Finding {
        Finding {
            id: id.to_string(),
            title: format!("title {id}"),
            severity: "high".to_string(),
            ..Finding::default()
        }
    }

    #[test]
    fn dangling_plan_ids_are_reported_not_rejected() {
        let mut s = SynthesisResult {
            deduplicated_findings: vec![finding("SEC-001")],
            ..SynthesisResult::default()
        };
        s.execution_plan.phase_0_immediate.findings =
            vec!["SEC-001".to_string(), "GONE-9".to_string()];
        assert_eq!(s.dangling_ids(), vec!["GONE-9"]);
        assert!(s.finding("SEC-001").is_some());
    }

    #[test]
    fn health_score_is_clamped_on_read() {
        let s: Summary =
            serde_json::from_str(r#"{"total_findings": 3, "health_score": 140.6}"#).unwrap();
        assert_eq!(s.health_score, 100);
        let s: Summary = serde_json::from_str(r#"{"health_score": -3}"#).unwrap();
        assert_eq!(s.health_score, 0);
    }

    #[test]
    fn synthesis_requires_summary_and_plan() {
        assert!(serde_json::from_str::<SynthesisResult>(r#"{"summary": {}}"#).is_err());
        let s: SynthesisResult =
            serde_json::from_str(r#"{"summary": {}, "execution_plan": {}}"#).unwrap();
        assert!(s.execution_plan.is_empty());
    }

    #[test]
    fn phase_ids_map_one_to_one_onto_severities() {
        for id in PhaseId::ALL {
            assert_eq!(PhaseId::for_severity(id.severity()), id);
        }
    }
}
