use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Capability/cost level of the external reasoning engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityTier {
    Cheap,
    Standard,
    Advanced,
}

impl CapabilityTier {
    pub const fn as_str(self) -> &'static str {
        match self {
            CapabilityTier::Cheap => "cheap",
            CapabilityTier::Standard => "standard",
            CapabilityTier::Advanced => "advanced",
        }
    }
}

impl fmt::Display for CapabilityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CapabilityTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Model family names are accepted as aliases for their tier.
        match s.trim().to_ascii_lowercase().as_str() {
            "cheap" | "haiku" => Ok(CapabilityTier::Cheap),
            "standard" | "sonnet" => Ok(CapabilityTier::Standard),
            "advanced" | "opus" => Ok(CapabilityTier::Advanced),
            other => Err(format!(
                "unknown tier: {other} (expected cheap|standard|advanced)"
            )),
        }
    }
}
