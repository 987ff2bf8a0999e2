mod discovery;
mod finding;
mod lenient;
mod severity;
mod synthesis;
mod tier;

pub use discovery::{
    Concern, CriticalFile, DiscoveryResult, FileCounts, ProjectStructure, QualityIndicators,
    TechStack,
};
pub use finding::{Evidence, Finding, Recommendation};
pub use severity::{Severity, SeverityCounts};
pub use synthesis::{ExecutionPlan, PhaseId, PlanPhase, Summary, SynthesisResult, SystemicPattern};
pub use tier::CapabilityTier;
