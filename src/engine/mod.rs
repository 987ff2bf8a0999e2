use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde_json::Value;
use time::OffsetDateTime;

use crate::config::{EngineConfig, MODEL_PLACEHOLDER, ModelMap, PROMPT_FILE_PLACEHOLDER};
use crate::core::CapabilityTier;
use crate::platform::{self, CommandLaunchFailed, CommandTimedOut};

mod extract;

pub use extract::extract_json;

/// What the engine sent back: an embedded JSON value when one was found,
/// otherwise the raw text.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineOutput {
    Structured(Value),
    Unstructured(String),
}

impl EngineOutput {
    pub fn from_text(text: &str) -> Self {
        match extract_json(text) {
            Some(value) => EngineOutput::Structured(value),
            None => EngineOutput::Unstructured(text.to_string()),
        }
    }

    /// For callers that cannot use unstructured output.
    pub fn require_structured(self) -> Result<Value, InvocationError> {
        match self {
            EngineOutput::Structured(value) => Ok(value),
            EngineOutput::Unstructured(_) => Err(InvocationError::MalformedOutput),
        }
    }

    pub fn raw_text(&self) -> String {
        match self {
            EngineOutput::Structured(value) => {
                serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
            }
            EngineOutput::Unstructured(text) => text.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InvocationError {
    #[error("engine exited with code {code}{}", first_line_suffix(.stderr))]
    ProcessFailed { code: i32, stderr: String },
    #[error("engine timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("engine output contained no JSON value")]
    MalformedOutput,
    #[error("engine could not be started: {0}")]
    Launch(String),
    #[error("failed to stage prompt: {0}")]
    Staging(String),
}

fn first_line_suffix(stderr: &str) -> String {
    match stderr.lines().map(str::trim).find(|l| !l.is_empty()) {
        Some(line) => format!(": {line}"),
        None => String::new(),
    }
}

/// The external reasoning engine. One call is one fresh, context-free session.
pub trait Engine: Sync {
    fn invoke(
        &self,
        prompt: &str,
        tier: CapabilityTier,
        timeout: Duration,
    ) -> Result<EngineOutput, InvocationError>;
}

/// Engine backed by a command-line program (by default the `claude` CLI).
///
/// The prompt is written to a uniquely named file which the command reads via
/// the `{prompt_file}` argument; `{model}` is replaced by the tier's model.
#[derive(Debug, Clone)]
pub struct CliEngine {
    command: String,
    args: Vec<String>,
    models: ModelMap,
    staging_dir: PathBuf,
}

impl CliEngine {
    pub fn from_config(cfg: &EngineConfig) -> Self {
        Self {
            command: cfg.command.clone(),
            args: cfg.args.clone(),
            models: cfg.models.clone(),
            staging_dir: std::env::temp_dir(),
        }
    }

    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = dir.into();
        self
    }

    fn render_args(&self, model: &str, prompt_file: &Path) -> Vec<String> {
        let prompt_file = prompt_file.display().to_string();
        self.args
            .iter()
            .map(|arg| {
                arg.replace(MODEL_PLACEHOLDER, model)
                    .replace(PROMPT_FILE_PLACEHOLDER, &prompt_file)
            })
            .collect()
    }
}

impl Engine for CliEngine {
    fn invoke(
        &self,
        prompt: &str,
        tier: CapabilityTier,
        timeout: Duration,
    ) -> Result<EngineOutput, InvocationError> {
        let model = self.models.model(tier);
        let staged = StagedPrompt::write(&self.staging_dir, prompt)?;
        let args = self.render_args(model, staged.path());

        tracing::debug!(command = %self.command, %tier, model, prompt_bytes = prompt.len(), "invoking engine");
        let started = Instant::now();
        let result = platform::run_command(&self.command, &args, timeout);
        drop(staged);

        let output = result.map_err(|err| {
            if err.downcast_ref::<CommandTimedOut>().is_some() {
                InvocationError::Timeout(timeout)
            } else if let Some(launch) = err.downcast_ref::<CommandLaunchFailed>() {
                InvocationError::Launch(launch.reason.clone())
            } else {
                InvocationError::Launch(format!("{err:#}"))
            }
        })?;
        tracing::debug!(
            exit_code = output.exit_code,
            elapsed_ms = started.elapsed().as_millis() as u64,
            stdout_bytes = output.stdout.len(),
            "engine returned"
        );

        if output.exit_code != 0 {
            return Err(InvocationError::ProcessFailed {
                code: output.exit_code,
                stderr: output.stderr,
            });
        }
        Ok(EngineOutput::from_text(&output.stdout))
    }
}

/// Prompt file removed when dropped, whichever way the invocation ends.
struct StagedPrompt {
    path: PathBuf,
}

impl StagedPrompt {
    fn write(dir: &Path, prompt: &str) -> Result<Self, InvocationError> {
        static SEQ: AtomicU64 = AtomicU64::new(0);
        let seq = SEQ.fetch_add(1, Ordering::Relaxed);
        let ts = OffsetDateTime::now_utc().unix_timestamp_nanos();
        let path = dir.join(format!(
            "ucof-prompt-{}-{ts}-{seq}.txt",
            std::process::id()
        ));
        std::fs::write(&path, prompt)
            .map_err(|e| InvocationError::Staging(format!("{}: {e}", path.display())))?;
        Ok(Self { path })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagedPrompt {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
