use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::{CapabilityTier, DiscoveryResult};

/// Domain analysis stages. Declaration order is the canonical run order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DomainId {
    Security,
    External,
    Data,
    Backend,
    Frontend,
    Infrastructure,
    Performance,
    Quality,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PriorityTier {
    Critical,
    Standard,
}

impl DomainId {
    pub const ALL: [DomainId; 8] = [
        DomainId::Security,
        DomainId::External,
        DomainId::Data,
        DomainId::Backend,
        DomainId::Frontend,
        DomainId::Infrastructure,
        DomainId::Performance,
        DomainId::Quality,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            DomainId::Security => "security",
            DomainId::External => "external",
            DomainId::Data => "data",
            DomainId::Backend => "backend",
            DomainId::Frontend => "frontend",
            DomainId::Infrastructure => "infrastructure",
            DomainId::Performance => "performance",
            DomainId::Quality => "quality",
        }
    }

    pub const fn title(self) -> &'static str {
        match self {
            DomainId::Security => "Security",
            DomainId::External => "External Integrations",
            DomainId::Data => "Data",
            DomainId::Backend => "Backend",
            DomainId::Frontend => "Frontend",
            DomainId::Infrastructure => "Infrastructure",
            DomainId::Performance => "Performance",
            DomainId::Quality => "Quality",
        }
    }

    /// Finding id prefix, e.g. `SEC` in `SEC-001`.
    pub fn id_prefix(self) -> String {
        self.as_str()
            .chars()
            .take(3)
            .collect::<String>()
            .to_ascii_uppercase()
    }

    pub const fn priority(self) -> PriorityTier {
        match self {
            DomainId::Security | DomainId::External | DomainId::Data | DomainId::Backend => {
                PriorityTier::Critical
            }
            DomainId::Frontend
            | DomainId::Infrastructure
            | DomainId::Performance
            | DomainId::Quality => PriorityTier::Standard,
        }
    }

    pub const fn default_tier(self) -> CapabilityTier {
        match self {
            DomainId::Security | DomainId::External => CapabilityTier::Advanced,
            _ => CapabilityTier::Standard,
        }
    }

    /// Artifact key for this domain's findings.
    pub fn artifact_key(self) -> String {
        format!("{}-findings", self.as_str())
    }
}

impl fmt::Display for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DomainId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "security" => Ok(DomainId::Security),
            "external" | "external-integrations" | "integrations" => Ok(DomainId::External),
            "data" => Ok(DomainId::Data),
            "backend" => Ok(DomainId::Backend),
            "frontend" => Ok(DomainId::Frontend),
            "infrastructure" | "infra" => Ok(DomainId::Infrastructure),
            "performance" => Ok(DomainId::Performance),
            "quality" => Ok(DomainId::Quality),
            other => Err(format!("unknown domain: {other}")),
        }
    }
}

/// Domains worth running for this project, in canonical order.
pub fn select_domains(discovery: &DiscoveryResult) -> Vec<DomainId> {
    DomainId::ALL
        .into_iter()
        .filter(|domain| is_relevant(*domain, discovery))
        .collect()
}

fn is_relevant(domain: DomainId, discovery: &DiscoveryResult) -> bool {
    let stack = &discovery.tech_stack;
    match domain {
        DomainId::Frontend => !stack.frontend.is_empty(),
        DomainId::External => !stack.queue.is_empty() || !stack.ai_services.is_empty(),
        _ => true,
    }
}

/// Path hints handed to a domain's prompt.
pub fn relevant_paths(domain: DomainId, discovery: &DiscoveryResult) -> Vec<String> {
    let structure = &discovery.structure;
    match domain {
        DomainId::Frontend => structure.frontend_paths.clone(),
        DomainId::Backend | DomainId::External => structure.backend_paths.clone(),
        DomainId::Data => structure.data_paths.clone(),
        DomainId::Infrastructure => structure.config_files.clone(),
        DomainId::Security | DomainId::Performance | DomainId::Quality => {
            vec!["**/*".to_string()]
        }
    }
}
