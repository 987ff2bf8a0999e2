use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand};

use crate::config::{CliOverrides, EffectiveConfig};
use crate::engine::CliEngine;
use crate::fix::{FixAction, FixRequest};
use crate::pipeline::{AnalyzeRequest, Pipeline};
use crate::store::{ArtifactStore, REPORT_FILE, SYNTHESIS_KEY};
use crate::ui::{TerminalProgress, UiConfig};

#[derive(Debug, Parser)]
#[command(
    name = "ucof",
    version,
    about = "Multi-stage codebase analysis: discovery, per-domain analysis and synthesis over an external reasoning engine"
)]
pub struct Cli {
    /// Print machine-readable JSON on stdout
    #[arg(long, global = true)]
    pub json: bool,
    #[arg(long = "no-color", global = true)]
    pub no_color: bool,
    #[arg(long, global = true)]
    pub verbose: bool,
    #[arg(long, global = true)]
    pub quiet: bool,
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Per-invocation engine timeout in seconds
    #[arg(long, global = true)]
    pub timeout: Option<u64>,
    /// Maximum number of domain stages running at once
    #[arg(long, global = true)]
    pub jobs: Option<usize>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run discovery, domain analysis, synthesis and write the report
    Analyze(AnalyzeArgs),
    /// Build fix prompts or PR descriptions from the last analysis
    Fix(FixArgs),
    /// Print the last report
    Report(ReportArgs),
    Completion(CompletionArgs),
    Config(ConfigArgs),
}

#[derive(Debug, Args)]
pub struct AnalyzeArgs {
    pub path: Option<PathBuf>,
    /// Reuse discovery.json from a previous run when present
    #[arg(long)]
    pub skip_discovery: bool,
}

#[derive(Debug, Args)]
pub struct FixArgs {
    pub path: Option<PathBuf>,
    #[arg(long)]
    pub action: Option<FixAction>,
    #[arg(long, conflicts_with = "action")]
    pub id: Option<String>,
}

#[derive(Debug, Args)]
pub struct ReportArgs {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct CompletionArgs {
    pub shell: String,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[arg(long)]
    pub show: bool,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    let stdin_is_tty = io::stdin().is_terminal();
    let stdout_is_tty = io::stdout().is_terminal();
    let stderr_is_tty = io::stderr().is_terminal();

    let home_dir = crate::platform::home_dir().unwrap_or_else(|_| std::env::temp_dir());
    let env_config_path = std::env::var_os("UCOF_CONFIG").map(PathBuf::from);
    let mut cfg = crate::config::load(
        cli.config.as_deref().or(env_config_path.as_deref()),
        &home_dir,
    )
    .map_err(crate::exit::invalid_args_err)?;
    crate::config::apply_cli_overrides(
        &mut cfg,
        &CliOverrides {
            timeout_secs: cli.timeout,
            max_parallel: cli.jobs,
        },
    )
    .map_err(crate::exit::invalid_args_err)?;

    let color = stdout_is_tty && cfg.ui.color && !cli.no_color;
    let ui_cfg = UiConfig {
        color,
        stdin_is_tty,
        stdout_is_tty,
        stderr_is_tty,
        max_table_rows: cfg.ui.max_table_rows,
        quiet: cli.quiet,
        verbose: cli.verbose,
    };

    match command {
        Commands::Analyze(args) => {
            let project = project_path(args.path)?;
            let engine = CliEngine::from_config(&cfg.engine);
            let progress = TerminalProgress::new(&ui_cfg, cli.json);
            let outcome = Pipeline::new(&cfg, &engine)
                .with_observer(&progress)
                .run(&AnalyzeRequest {
                    project,
                    reuse_discovery: args.skip_discovery,
                })?;
            drop(progress);
            if cli.json {
                write_json(&outcome.synthesis)?;
            } else {
                crate::ui::print_run_summary(&outcome, &ui_cfg);
            }
        }
        Commands::Fix(args) => {
            let project = project_path(args.path)?;
            crate::fix::run(
                &FixRequest {
                    project,
                    action: args.action,
                    id: args.id,
                },
                &cfg,
                &ui_cfg,
            )?;
        }
        Commands::Report(args) => {
            let project = project_path(args.path)?;
            show_report(&project, &cfg, cli.json)?;
        }
        Commands::Completion(args) => {
            let shell = parse_shell(&args.shell)?;
            let mut cmd = Cli::command();
            let mut out = io::stdout().lock();
            clap_complete::generate(shell, &mut cmd, "ucof", &mut out);
        }
        Commands::Config(args) => {
            if args.show {
                if cli.json {
                    write_json(&cfg)?;
                } else {
                    println!("{}", toml::to_string_pretty(&cfg)?);
                }
            } else if !ui_cfg.quiet {
                eprintln!("config: use `ucof config --show`");
            }
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "info" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_env("UCOF_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .without_time()
        .try_init();
}

fn project_path(path: Option<PathBuf>) -> Result<PathBuf> {
    let path = match path {
        Some(p) => p,
        None => std::env::current_dir().context("failed to read the current directory")?,
    };
    std::path::absolute(&path)
        .with_context(|| format!("failed to resolve project path: {}", path.display()))
}

/// A missing report is reported but is not an error.
fn show_report(project: &Path, cfg: &EffectiveConfig, json: bool) -> Result<()> {
    let store = ArtifactStore::for_project(project, &cfg.pipeline.output_dir);
    if json {
        let Some(synthesis) = store.read_json::<crate::core::SynthesisResult>(SYNTHESIS_KEY)?
        else {
            eprintln!("No analysis found. Run `ucof analyze` first.");
            return Ok(());
        };
        return write_json(&synthesis);
    }

    let Some(report) = store.read_text(REPORT_FILE)? else {
        eprintln!(
            "No report found at {}. Run `ucof analyze` first.",
            store.path(REPORT_FILE).display()
        );
        return Ok(());
    };
    write_stdout(report.as_bytes())
}

fn write_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    let mut buf = serde_json::to_vec_pretty(value)?;
    buf.push(b'\n');
    write_stdout(&buf)
}

fn write_stdout(buf: &[u8]) -> Result<()> {
    let mut stdout = io::stdout().lock();
    match stdout.write_all(buf) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::BrokenPipe => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn parse_shell(s: &str) -> Result<clap_complete::Shell> {
    let s = s.trim().to_ascii_lowercase();
    match s.as_str() {
        "bash" => Ok(clap_complete::Shell::Bash),
        "zsh" => Ok(clap_complete::Shell::Zsh),
        "fish" => Ok(clap_complete::Shell::Fish),
        other => Err(crate::exit::invalid_args(format!(
            "unsupported shell: {other} (expected bash|zsh|fish)"
        ))),
    }
}
