use anyhow::Error;
use std::io::{self, Write};
use std::sync::Mutex;
use std::time::Duration;
use unicode_width::UnicodeWidthChar;

use crate::core::{DiscoveryResult, Finding, Severity};
use crate::pipeline::{Phase, PipelineObserver, RunOutcome, StageRecord, StageStatus};
use crate::selector::DomainId;

#[derive(Debug, Clone)]
pub struct UiConfig {
    pub color: bool,
    pub stdin_is_tty: bool,
    pub stdout_is_tty: bool,
    pub stderr_is_tty: bool,
    pub max_table_rows: usize,
    pub quiet: bool,
    pub verbose: bool,
}

pub fn eprintln_error(err: &Error) {
    let mut stderr = io::stderr().lock();
    let _ = writeln!(stderr, "error:");
    let _ = writeln!(stderr, "  {err}");

    let mut causes = err.chain().skip(1).peekable();
    if causes.peek().is_some() {
        let _ = writeln!(stderr, "caused by:");
        for cause in causes {
            let _ = writeln!(stderr, "  - {cause}");
        }
    }

    let _ = writeln!(stderr, "next:");
    let _ = writeln!(stderr, "  - rerun with `--verbose` for engine and stage logs");
    let _ = writeln!(stderr, "  - see `ucof --help` for commands and options");
}

/// Spinner per phase plus one line per finished stage, all on stderr.
pub struct TerminalProgress {
    spinner: bool,
    silent: bool,
    color: bool,
    current: Mutex<Option<indicatif::ProgressBar>>,
}

impl TerminalProgress {
    pub fn new(cfg: &UiConfig, json: bool) -> Self {
        let silent = cfg.quiet || json;
        Self {
            spinner: cfg.stderr_is_tty && !silent,
            silent,
            color: cfg.color && cfg.stderr_is_tty,
            current: Mutex::new(None),
        }
    }

    fn line(&self, text: &str) {
        if self.silent {
            return;
        }
        let current = self.current.lock().ok().and_then(|pb| pb.clone());
        match current {
            Some(pb) => pb.println(text),
            None => eprintln!("{text}"),
        }
    }

    fn clear(&self) {
        if let Ok(mut current) = self.current.lock() {
            if let Some(pb) = current.take() {
                pb.finish_and_clear();
            }
        }
    }
}

impl Drop for TerminalProgress {
    fn drop(&mut self) {
        self.clear();
    }
}

impl PipelineObserver for TerminalProgress {
    fn phase_started(&self, phase: Phase) {
        self.clear();
        if self.silent {
            return;
        }
        let message = format!("[{}] {}...", phase.step(), phase.title());
        if !self.spinner {
            eprintln!("{message}");
            return;
        }
        let pb = indicatif::ProgressBar::new_spinner();
        pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        pb.set_message(message);
        pb.enable_steady_tick(Duration::from_millis(120));
        if let Ok(mut current) = self.current.lock() {
            *current = Some(pb);
        }
    }

    fn discovery_ready(&self, discovery: &DiscoveryResult, cached: bool) {
        let source = if cached { " (cached)" } else { "" };
        let name = if discovery.project_name.is_empty() {
            "unnamed project"
        } else {
            discovery.project_name.as_str()
        };
        self.line(&format!("  project: {name}{source}"));
        for (category, items) in discovery.tech_stack.categories() {
            self.line(&format!("  {category}: {}", items.join(", ")));
        }
        let q = &discovery.quality_indicators;
        self.line(&format!(
            "  files: {}  tests: {}  ci/cd: {}",
            discovery.file_counts.total,
            yes_no(q.has_tests),
            yes_no(q.has_ci_cd)
        ));
    }

    fn domains_selected(&self, domains: &[DomainId]) {
        let names: Vec<&str> = domains.iter().map(|d| d.as_str()).collect();
        self.line(&format!("  domains: {}", names.join(", ")));
    }

    fn stage_finished(&self, record: &StageRecord) {
        self.line(&format_stage_line(record, self.color));
    }
}

fn yes_no(v: bool) -> &'static str {
    if v { "yes" } else { "no" }
}

fn format_stage_line(record: &StageRecord, color: bool) -> String {
    let (mark, code) = match record.status {
        StageStatus::Ok => ("ok", "32"),
        StageStatus::Cached => ("cached", "90"),
        StageStatus::Degraded => ("degraded", "33"),
        StageStatus::Fallback => ("fallback", "33"),
        StageStatus::Failed => ("failed", "31"),
    };
    let mark = paint(mark, code, color);
    let mut line = format!("  {:<15} {mark}", record.stage);
    if let Some(n) = record.findings {
        line.push_str(&format!("  {n} findings"));
    }
    if record.elapsed_ms > 0 {
        line.push_str(&format!("  {:.1}s", record.elapsed_ms as f64 / 1000.0));
    }
    if let Some(note) = record.notes.first() {
        line.push_str(&format!("  ({note})"));
    }
    line
}

pub fn print_run_summary(outcome: &RunOutcome, cfg: &UiConfig) {
    if cfg.quiet {
        return;
    }

    let mut out = io::stdout().lock();
    let summary = &outcome.synthesis.summary;
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "Health score: {}  ({} findings, {} raw)",
        format_health(summary.health_score, cfg.color),
        summary.total_findings,
        outcome.total_raw_findings
    );
    let breakdown: Vec<String> = Severity::ALL
        .iter()
        .map(|s| {
            format!(
                "{} {}",
                format_severity(s.as_str(), cfg.color),
                summary.by_severity.get(*s)
            )
        })
        .collect();
    let _ = writeln!(out, "  {}", breakdown.join("  "));

    if !outcome.failed_domains.is_empty() {
        let names: Vec<&str> = outcome.failed_domains.iter().map(|d| d.as_str()).collect();
        let _ = writeln!(out, "  incomplete: {} (see run.json)", names.join(", "));
    }
    if outcome.synthesis_fallback {
        let _ = writeln!(
            out,
            "  synthesis fell back to a severity-only plan (no systemic patterns)"
        );
    }

    let findings = &outcome.synthesis.deduplicated_findings;
    let rows = cfg.max_table_rows.min(findings.len());
    if rows > 0 {
        let _ = writeln!(out);
        if findings.len() > rows {
            let _ = writeln!(out, "Top findings ({rows} of {}):", findings.len());
        } else {
            let _ = writeln!(out, "Findings:");
        }
        print_findings_table(&mut out, &sorted_by_severity(findings), rows, cfg.color);
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "Artifacts: {}", outcome.output_dir.display());
    match &outcome.report {
        Ok(path) => {
            let _ = writeln!(out, "Report:    {}", path.display());
        }
        Err(reason) => {
            let _ = writeln!(out, "Report:    not written ({reason})");
        }
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "Next:");
    let _ = writeln!(out, "  - ucof report   show the full report");
    let _ = writeln!(out, "  - ucof fix      work through critical and high findings");
}

/// Numbered list used by the fix menu.
pub fn print_priority_findings(findings: &[&Finding], cfg: &UiConfig) {
    if cfg.quiet {
        return;
    }
    let mut out = io::stdout().lock();
    if findings.is_empty() {
        let _ = writeln!(out, "No critical or high findings.");
        return;
    }
    let _ = writeln!(out, "Priority findings ({}):", findings.len());
    for finding in findings {
        let severity = format_severity(&finding.severity, cfg.color);
        let _ = writeln!(out, "  [{severity}] {} {}", finding.id, finding.title);
        if cfg.verbose && !finding.evidence.file.is_empty() {
            let _ = writeln!(out, "      {}", finding.evidence.file);
        }
    }
}

fn sorted_by_severity(findings: &[Finding]) -> Vec<&Finding> {
    let mut sorted: Vec<&Finding> = findings.iter().collect();
    sorted.sort_by_key(|f| {
        let level = f.severity_level();
        (level.is_none(), level)
    });
    sorted
}

fn print_findings_table(out: &mut dyn Write, findings: &[&Finding], rows: usize, color: bool) {
    let label_sev = "severity";
    let label_id = "id";
    let label_title = "title";

    let sev_w = findings
        .iter()
        .take(rows)
        .map(|f| visible_width_ansi(&f.severity))
        .max()
        .unwrap_or(0)
        .max(visible_width_ansi(label_sev));
    let id_w = findings
        .iter()
        .take(rows)
        .map(|f| visible_width_ansi(&f.id))
        .max()
        .unwrap_or(0)
        .max(visible_width_ansi(label_id));
    let title_w = visible_width_ansi(label_title).max(5);

    let _ = writeln!(
        out,
        "{}  {}  {}",
        pad_end(label_sev, sev_w),
        pad_end(label_id, id_w),
        label_title
    );
    let _ = writeln!(
        out,
        "{}  {}  {}",
        "-".repeat(sev_w),
        "-".repeat(id_w),
        "-".repeat(title_w)
    );

    for finding in findings.iter().take(rows) {
        let sev = pad_end(&format_severity(&finding.severity, color), sev_w);
        let id = pad_end(&finding.id, id_w);
        let _ = writeln!(out, "{sev}  {id}  {}", finding.title);
    }
}

pub fn format_severity(raw: &str, color: bool) -> String {
    let label = raw.trim().to_string();
    let code = match Severity::from_exact(raw) {
        Some(Severity::Critical) => "31",
        Some(Severity::High) => "33",
        Some(Severity::Medium) => "36",
        Some(Severity::Low) => "90",
        None => return label,
    };
    paint(&label, code, color)
}

fn format_health(score: u8, color: bool) -> String {
    let code = match score {
        80..=100 => "32",
        50..=79 => "33",
        _ => "31",
    };
    paint(&format!("{score}/100"), code, color)
}

fn paint(s: &str, code: &str, color: bool) -> String {
    if !color {
        return s.to_string();
    }
    format!("\x1b[{code}m{s}\x1b[0m")
}

fn pad_end(s: &str, width: usize) -> String {
    let w = visible_width_ansi(s);
    if w >= width {
        return s.to_string();
    }
    format!("{s}{}", " ".repeat(width - w))
}

fn visible_width_ansi(s: &str) -> usize {
    let mut width: usize = 0;
    let mut chars = s.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '\x1b' && chars.peek() == Some(&'[') {
            let _ = chars.next();
            for ch2 in chars.by_ref() {
                if ch2 == 'm' {
                    break;
                }
            }
            continue;
        }
        width = width.saturating_add(UnicodeWidthChar::width(ch).unwrap_or(0));
    }
    width
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(id: &str, severity: &str, title: &str) -> Finding {
        serde_json::from_value(serde_json::json!({
            "id": id, "severity": severity, "title": title
        }))
        .expect("finding")
    }

    fn strip_ansi(s: &str) -> String {
        let mut out = String::new();
        let mut chars = s.chars();
        while let Some(c) = chars.next() {
            if c == '\x1b' {
                for c2 in chars.by_ref() {
                    if c2 == 'm' {
                        break;
                    }
                }
                continue;
            }
            out.push(c);
        }
        out
    }

    #[test]
    fn width_ignores_ansi_and_counts_wide_chars() {
        assert_eq!(visible_width_ansi("\x1b[31mhigh\x1b[0m"), 4);
        assert_eq!(visible_width_ansi("日本"), 4);
    }

    #[test]
    fn table_columns_align_with_color() {
        let a = finding("SEC-001", "critical", "Hardcoded key");
        let b = finding("QUA-12", "low", "Dead code");
        let mut buf = Vec::new();
        print_findings_table(&mut buf, &[&a, &b], 2, true);
        let text = String::from_utf8(buf).expect("utf8");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        let plain: Vec<String> = lines.iter().map(|l| strip_ansi(l)).collect();
        assert!(plain[2].starts_with("critical"));
        assert_eq!(plain[2].find("SEC-001"), plain[3].find("QUA-12"));
        assert_eq!(plain[2].find("Hardcoded"), plain[3].find("Dead"));
    }

    #[test]
    fn severity_sort_puts_unknown_last() {
        let findings = vec![
            finding("B", "urgent", "b"),
            finding("A", "low", "a"),
            finding("C", "critical", "c"),
            finding("D", "medium", "d"),
            finding("E", "CRITICAL", "e"),
        ];
        let ids: Vec<&str> = sorted_by_severity(&findings)
            .iter()
            .map(|f| f.id.as_str())
            .collect();
        assert_eq!(ids, vec!["C", "D", "A", "B", "E"]);
    }

    #[test]
    fn stage_line_mentions_reason() {
        let record = StageRecord {
            stage: "security".to_string(),
            status: StageStatus::Failed,
            tier: None,
            findings: None,
            notes: vec!["engine timed out after 300s".to_string()],
            elapsed_ms: 0,
        };
        let line = format_stage_line(&record, false);
        assert!(line.contains("security"));
        assert!(line.contains("failed"));
        assert!(line.contains("timed out"));
    }
}
