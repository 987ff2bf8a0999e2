use std::io::{self, BufRead, Write};

use anyhow::{Result, anyhow};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuChoice {
    FixPriority,
    FixById,
    PrDescriptions,
    Exit,
}

pub fn print_menu(out: &mut dyn Write) {
    let _ = writeln!(out);
    let _ = writeln!(out, "Options:");
    let _ = writeln!(out, "  1. Fix all critical and high findings (recommended)");
    let _ = writeln!(out, "  2. Fix a specific finding by id");
    let _ = writeln!(out, "  3. Generate PR descriptions");
    let _ = writeln!(out, "  4. Exit");
}

pub(crate) fn prompt_menu_choice() -> Result<MenuChoice> {
    match read_answer("Select option (1-4) [default: 4]: ")? {
        Some(answer) => parse_menu_choice(&answer),
        None => Ok(MenuChoice::Exit),
    }
}

pub(crate) fn prompt_finding_id() -> Result<Option<String>> {
    Ok(read_answer("Finding id: ")?
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty()))
}

/// `None` on end of input.
fn read_answer(prompt: &str) -> Result<Option<String>> {
    let mut stderr = io::stderr().lock();
    write!(stderr, "{prompt}")?;
    stderr.flush()?;

    let mut input = String::new();
    let mut stdin = io::stdin().lock();
    let n = stdin.read_line(&mut input)?;
    if n == 0 {
        return Ok(None);
    }
    Ok(Some(input))
}

pub fn parse_menu_choice(input: &str) -> Result<MenuChoice> {
    let s = input.trim().to_ascii_lowercase();
    match s.as_str() {
        "1" | "critical" | "fix" => Ok(MenuChoice::FixPriority),
        "2" | "id" => Ok(MenuChoice::FixById),
        "3" | "prs" | "pr" => Ok(MenuChoice::PrDescriptions),
        "" | "4" | "q" | "quit" | "exit" | "n" | "none" => Ok(MenuChoice::Exit),
        other => Err(anyhow!("unknown option: {other} (choose 1-4)")),
    }
}
