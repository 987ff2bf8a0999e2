use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{Severity, lenient};

/// A single issue reported by a domain stage.
///
/// `severity` keeps the engine's text verbatim; [`Finding::severity_level`]
/// resolves it against the known taxonomy. Fields the pipeline does not model
/// are carried in `extra` so merged findings survive a round-trip untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    #[serde(default, deserialize_with = "lenient::stringish")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient::stringish")]
    pub title: String,
    #[serde(default, deserialize_with = "lenient::stringish")]
    pub severity: String,
    #[serde(
        default,
        deserialize_with = "lenient::stringish",
        skip_serializing_if = "String::is_empty"
    )]
    pub category: String,
    #[serde(default, deserialize_with = "lenient::text_or_struct")]
    pub evidence: Evidence,
    #[serde(
        default,
        deserialize_with = "lenient::stringish",
        skip_serializing_if = "String::is_empty"
    )]
    pub impact: String,
    #[serde(default, deserialize_with = "lenient::text_or_struct")]
    pub recommendation: Recommendation,
    #[serde(default, deserialize_with = "lenient::string_or_seq")]
    pub tags: Vec<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Finding {
    /// Only the exact lowercase names resolve; `"High"` is an unknown severity.
    pub fn severity_level(&self) -> Option<Severity> {
        Severity::from_exact(&self.severity)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    #[serde(
        default,
        deserialize_with = "lenient::stringish",
        skip_serializing_if = "String::is_empty"
    )]
    pub file: String,
    #[serde(
        default,
        deserialize_with = "lenient::stringish",
        skip_serializing_if = "String::is_empty"
    )]
    pub lines: String,
    #[serde(
        default,
        deserialize_with = "lenient::stringish",
        skip_serializing_if = "String::is_empty"
    )]
    pub code_snippet: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    #[serde(
        default,
        deserialize_with = "lenient::stringish",
        skip_serializing_if = "String::is_empty"
    )]
    pub action: String,
    /// `low|medium|high`; kept as text like `Finding::severity`.
    #[serde(
        default,
        deserialize_with = "lenient::stringish",
        skip_serializing_if = "String::is_empty"
    )]
    pub effort: String,
    #[serde(
        default,
        deserialize_with = "lenient::optional_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub code_example: Option<String>,
}

/// A bare path becomes `file`; any other text is kept as the snippet.
impl From<String> for Evidence {
    fn from(text: String) -> Self {
        if text.contains(char::is_whitespace) {
            Evidence {
                code_snippet: text,
                ..Evidence::default()
            }
        } else {
            Evidence {
                file: text,
                ..Evidence::default()
            }
        }
    }
}

impl From<String> for Recommendation {
    fn from(action: String) -> Self {
        Recommendation {
            action,
            ..Recommendation::default()
        }
    }
}
