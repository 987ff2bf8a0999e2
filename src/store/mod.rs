use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use serde::de::DeserializeOwned;

pub const DISCOVERY_KEY: &str = "discovery";
pub const ALL_FINDINGS_KEY: &str = "all-findings";
pub const SYNTHESIS_KEY: &str = "synthesis";
pub const RUN_MANIFEST_KEY: &str = "run";
pub const REPORT_FILE: &str = "report.md";

/// Per-project artifact directory.
///
/// Every file is written at most once per store instance (one store per run),
/// and always through a temp file plus rename so readers never observe a
/// partially written artifact.
#[derive(Debug)]
pub struct ArtifactStore {
    root: PathBuf,
    written: Mutex<BTreeSet<String>>,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            written: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn for_project(project: &Path, output_dir: &str) -> Self {
        Self::new(project.join(output_dir))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ensure_root(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root).with_context(|| {
            format!("failed to create output directory: {}", self.root.display())
        })
    }

    pub fn path(&self, file_name: &str) -> PathBuf {
        self.root.join(file_name)
    }

    pub fn json_path(&self, key: &str) -> PathBuf {
        self.path(&json_file_name(key))
    }

    pub fn has_json(&self, key: &str) -> bool {
        self.json_path(key).is_file()
    }

    pub fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<PathBuf> {
        let mut bytes = serde_json::to_vec_pretty(value)
            .with_context(|| format!("failed to serialize artifact: {key}"))?;
        bytes.push(b'\n');
        self.write_bytes(&json_file_name(key), &bytes)
    }

    pub fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let path = self.json_path(key);
        let Some(s) = read_if_exists(&path)? else {
            return Ok(None);
        };
        let value = serde_json::from_str(&s)
            .with_context(|| format!("failed to parse artifact: {}", path.display()))?;
        Ok(Some(value))
    }

    pub fn write_text(&self, file_name: &str, text: &str) -> Result<PathBuf> {
        self.write_bytes(file_name, text.as_bytes())
    }

    pub fn read_text(&self, file_name: &str) -> Result<Option<String>> {
        read_if_exists(&self.path(file_name))
    }

    /// A failed write releases its claim, so the name can be written again.
    fn write_bytes(&self, file_name: &str, bytes: &[u8]) -> Result<PathBuf> {
        validate_file_name(file_name)?;
        self.claim(file_name)?;
        let result = self.write_claimed(file_name, bytes);
        if result.is_err() {
            self.release(file_name);
        }
        result
    }

    fn write_claimed(&self, file_name: &str, bytes: &[u8]) -> Result<PathBuf> {
        self.ensure_root()?;

        let dest = self.path(file_name);
        let tmp = self.path(&temp_file_name(file_name));
        let result = write_then_rename(&tmp, &dest, bytes);
        if result.is_err() {
            let _ = std::fs::remove_file(&tmp);
        }
        result.with_context(|| format!("failed to write artifact: {}", dest.display()))?;
        Ok(dest)
    }

    fn claim(&self, file_name: &str) -> Result<()> {
        let mut written = self
            .written
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !written.insert(file_name.to_string()) {
            return Err(anyhow!(
                "artifact already written in this run: {file_name}"
            ));
        }
        Ok(())
    }

    fn release(&self, file_name: &str) {
        self.written
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(file_name);
    }
}

fn json_file_name(key: &str) -> String {
    format!("{key}.json")
}

fn temp_file_name(file_name: &str) -> String {
    static SEQ: AtomicU64 = AtomicU64::new(0);
    let seq = SEQ.fetch_add(1, Ordering::Relaxed);
    format!(".{file_name}.{}.{seq}.tmp", std::process::id())
}

fn validate_file_name(file_name: &str) -> Result<()> {
    let bad = file_name.is_empty()
        || file_name.starts_with('.')
        || file_name.contains('/')
        || file_name.contains('\\');
    if bad {
        return Err(anyhow!("invalid artifact name: {file_name:?}"));
    }
    Ok(())
}

fn write_then_rename(tmp: &Path, dest: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = std::fs::File::create(tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);
    std::fs::rename(tmp, dest)
}

fn read_if_exists(path: &Path) -> Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(s) => Ok(Some(s)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => {
            Err(anyhow::Error::new(err).context(format!("failed to read: {}", path.display())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Finding, SynthesisResult};

    fn temp_store(name: &str) -> (PathBuf, ArtifactStore) {
        static SEQ: AtomicU64 = AtomicU64::new(0);
        let seq = SEQ.fetch_add(1, Ordering::Relaxed);
        let dir = std::env::temp_dir().join(format!(
            "ucof-store-test-{name}-{}-{seq}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        let store = ArtifactStore::new(dir.join(".optimization"));
        (dir, store)
    }

    #[test]
    fn json_round_trip_is_structurally_equal() {
        let (dir, store) = temp_store("roundtrip");
        let findings = vec![Finding {
            id: "SEC-001".to_string(),
            title: "Hardcoded token".to_string(),
            severity: "critical".to_string(),
            tags: vec!["secrets".to_string()],
            ..Finding::default()
        }];
        store.write_json("security-findings", &findings).unwrap();
        let back: Vec<Finding> = store.read_json("security-findings").unwrap().unwrap();
        assert_eq!(back, findings);

        let synthesis = crate::aggregate::fallback_synthesis(&findings);
        store.write_json(SYNTHESIS_KEY, &synthesis).unwrap();
        let back: SynthesisResult = store.read_json(SYNTHESIS_KEY).unwrap().unwrap();
        assert_eq!(back, synthesis);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn second_write_to_same_key_is_rejected() {
        let (dir, store) = temp_store("write-once");
        store.write_text(REPORT_FILE, "first").unwrap();
        assert!(store.write_text(REPORT_FILE, "second").is_err());
        assert_eq!(store.read_text(REPORT_FILE).unwrap().as_deref(), Some("first"));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn failed_write_can_be_retried() {
        let (dir, store) = temp_store("retry");
        let blocker = store.path(REPORT_FILE);
        std::fs::create_dir_all(blocker.join("occupied")).unwrap();
        assert!(store.write_text(REPORT_FILE, "first").is_err());

        std::fs::remove_dir_all(&blocker).unwrap();
        store.write_text(REPORT_FILE, "second").unwrap();
        assert_eq!(store.read_text(REPORT_FILE).unwrap().as_deref(), Some("second"));
        assert!(store.write_text(REPORT_FILE, "third").is_err());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_artifact_reads_as_none() {
        let (dir, store) = temp_store("missing");
        assert!(store.read_json::<Vec<Finding>>("nope").unwrap().is_none());
        assert!(!store.has_json("nope"));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn no_temp_files_are_left_behind() {
        let (dir, store) = temp_store("tmp");
        store.write_json(DISCOVERY_KEY, &serde_json::json!({"project_name": "x"})).unwrap();
        let leftovers: Vec<_> = std::fs::read_dir(store.root())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn path_like_names_are_rejected() {
        let (dir, store) = temp_store("names");
        assert!(store.write_text("../escape.md", "x").is_err());
        assert!(store.write_text(".hidden", "x").is_err());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
