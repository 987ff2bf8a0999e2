use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::lenient;

/// Technology and structure map produced by the discovery stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryResult {
    #[serde(default, deserialize_with = "lenient::stringish")]
    pub project_name: String,
    #[serde(default)]
    pub tech_stack: TechStack,
    #[serde(default)]
    pub structure: ProjectStructure,
    #[serde(default)]
    pub quality_indicators: QualityIndicators,
    #[serde(default)]
    pub file_counts: FileCounts,
    #[serde(default)]
    pub critical_files: Vec<CriticalFile>,
    #[serde(default)]
    pub immediate_concerns: Vec<Concern>,
}

impl DiscoveryResult {
    /// Builds a result from an engine-produced object one section at a time.
    ///
    /// A section of the wrong shape is left at its default and a note is
    /// returned for it. List entries that are not objects are skipped with a
    /// note each.
    pub fn from_engine_object(mut map: Map<String, Value>) -> (Self, Vec<String>) {
        let mut notes = Vec::new();
        let discovery = DiscoveryResult {
            project_name: map
                .remove("project_name")
                .and_then(lenient::scalar_to_string)
                .unwrap_or_default(),
            tech_stack: section(&mut map, "tech_stack", &mut notes),
            structure: section(&mut map, "structure", &mut notes),
            quality_indicators: section(&mut map, "quality_indicators", &mut notes),
            file_counts: section(&mut map, "file_counts", &mut notes),
            critical_files: entries(&mut map, "critical_files", &mut notes),
            immediate_concerns: entries(&mut map, "immediate_concerns", &mut notes),
        };
        (discovery, notes)
    }
}

fn section<T>(map: &mut Map<String, Value>, key: &str, notes: &mut Vec<String>) -> T
where
    T: DeserializeOwned + Default,
{
    match map.remove(key) {
        None | Some(Value::Null) => T::default(),
        Some(value) => serde_json::from_value(value).unwrap_or_else(|e| {
            notes.push(format!("{key} ignored: {e}"));
            T::default()
        }),
    }
}

fn entries<T>(map: &mut Map<String, Value>, key: &str, notes: &mut Vec<String>) -> Vec<T>
where
    T: DeserializeOwned,
{
    let items = match map.remove(key) {
        None | Some(Value::Null) => return Vec::new(),
        Some(Value::Array(items)) => items,
        Some(_) => {
            notes.push(format!("{key} ignored: not a list"));
            return Vec::new();
        }
    };
    let mut out = Vec::with_capacity(items.len());
    for (idx, item) in items.into_iter().enumerate() {
        if !item.is_object() {
            notes.push(format!("{key}[{idx}] skipped: not an object"));
            continue;
        }
        match serde_json::from_value(item) {
            Ok(entry) => out.push(entry),
            Err(e) => notes.push(format!("{key}[{idx}] skipped: {e}")),
        }
    }
    out
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TechStack {
    #[serde(default, deserialize_with = "lenient::string_or_seq")]
    pub frontend: Vec<String>,
    #[serde(default, deserialize_with = "lenient::string_or_seq")]
    pub backend: Vec<String>,
    #[serde(default, deserialize_with = "lenient::string_or_seq")]
    pub database: Vec<String>,
    #[serde(default, deserialize_with = "lenient::string_or_seq")]
    pub queue: Vec<String>,
    #[serde(default, deserialize_with = "lenient::string_or_seq")]
    pub ai_services: Vec<String>,
    #[serde(default, deserialize_with = "lenient::string_or_seq")]
    pub deployment: Vec<String>,
}

impl TechStack {
    /// Non-empty categories in display order.
    pub fn categories(&self) -> Vec<(&'static str, &[String])> {
        [
            ("frontend", self.frontend.as_slice()),
            ("backend", self.backend.as_slice()),
            ("database", self.database.as_slice()),
            ("queue", self.queue.as_slice()),
            ("ai_services", self.ai_services.as_slice()),
            ("deployment", self.deployment.as_slice()),
        ]
        .into_iter()
        .filter(|(_, items)| !items.is_empty())
        .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectStructure {
    #[serde(default, deserialize_with = "lenient::string_or_seq")]
    pub frontend_paths: Vec<String>,
    #[serde(default, deserialize_with = "lenient::string_or_seq")]
    pub backend_paths: Vec<String>,
    #[serde(default, deserialize_with = "lenient::string_or_seq")]
    pub data_paths: Vec<String>,
    #[serde(default, deserialize_with = "lenient::string_or_seq")]
    pub config_files: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityIndicators {
    #[serde(default, deserialize_with = "lenient::flag")]
    pub has_tests: bool,
    #[serde(default, deserialize_with = "lenient::flag")]
    pub has_ci_cd: bool,
    #[serde(default, deserialize_with = "lenient::flag")]
    pub has_linting: bool,
    #[serde(default, deserialize_with = "lenient::flag")]
    pub has_typescript: bool,
    #[serde(default, deserialize_with = "lenient::flag")]
    pub has_error_monitoring: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileCounts {
    #[serde(default, deserialize_with = "lenient::count")]
    pub total: u64,
    #[serde(default, deserialize_with = "lenient::count_map")]
    pub by_extension: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriticalFile {
    #[serde(default, deserialize_with = "lenient::stringish")]
    pub path: String,
    #[serde(default, deserialize_with = "lenient::stringish")]
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Concern {
    #[serde(default, deserialize_with = "lenient::stringish")]
    pub issue: String,
    #[serde(default, deserialize_with = "lenient::stringish")]
    pub severity: String,
}
