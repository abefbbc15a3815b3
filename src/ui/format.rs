use std::io::{self, BufRead, Write};

use crossterm::style::Stylize;

use crate::types::{Plan, RunStatus};
use crate::ui::symbols::Symbols;

const MAX_FAILURE_LINES: usize = 12;

fn lines_with(text: &str, f: impl Fn(usize, &str) -> String) -> Vec<String> {
    let v: Vec<&str> = text.lines().collect();
    if v.is_empty() {
        return vec![f(0, "")];
    }
    v.iter().enumerate().map(|(i, l)| f(i, l)).collect()
}

pub(crate) fn format_request(request: &str) -> Vec<String> {
    let sym = Symbols::current();
    lines_with(request, |i, line| {
        if i == 0 {
            format!("{} {}", sym.prompt, line).bold().to_string()
        } else {
            format!("  {}", line)
        }
    })
}

pub(crate) fn format_attempt(attempt: u32, max_attempts: u32) -> String {
    let sym = Symbols::current();
    format!("{} Attempt {attempt}/{max_attempts}", sym.running)
        .dark_grey()
        .to_string()
}

pub(crate) fn format_plan(plan: &Plan) -> Vec<String> {
    let sym = Symbols::current();
    let mut lines = vec!["Explanation:".bold().to_string()];
    for item in plan.explanation.lines() {
        lines.extend(lines_with(item, |i, line| {
            if i == 0 {
                format!("  {} {}", sym.bullet, line)
            } else {
                format!("    {}", line)
            }
        }));
    }
    if !plan.is_refusal() {
        lines.push(format!("{} Command:", sym.record).cyan().bold().to_string());
        lines.extend(lines_with(&plan.command, |_, line| {
            format!("    {}", line).cyan().to_string()
        }));
    }
    lines
}

pub(crate) fn format_output(output: &str) -> Vec<String> {
    let sym = Symbols::current();
    if output.trim().is_empty() {
        return Vec::new();
    }
    lines_with(output.trim_end(), |i, line| {
        let pfx = if i == 0 {
            format!("  {} ", sym.corner)
        } else {
            "    ".to_string()
        };
        format!("{pfx}{line}").grey().to_string()
    })
}

/// Failure text trimmed to its last lines, where ffmpeg puts the actual error.
pub(crate) fn format_failure(output: &str) -> Vec<String> {
    let sym = Symbols::current();
    let all: Vec<&str> = output.lines().collect();
    let skipped = all.len().saturating_sub(MAX_FAILURE_LINES);
    let mut lines = vec![format!("  {} Command failed", sym.cross).red().bold().to_string()];
    if skipped > 0 {
        lines.push(
            format!("    {} {skipped} earlier lines omitted", sym.ellipsis)
                .dark_grey()
                .to_string(),
        );
    }
    lines.extend(
        all[skipped..]
            .iter()
            .map(|line| format!("    {line}").red().to_string()),
    );
    lines
}

pub(crate) fn format_status(status: &RunStatus) -> String {
    let sym = Symbols::current();
    match status {
        RunStatus::Succeeded | RunStatus::DryRun => {
            format!("{} {}", sym.check, status).green().to_string()
        }
        RunStatus::Refused | RunStatus::Cancelled => {
            format!("{} {}", sym.warning, status).dark_yellow().to_string()
        }
        _ => format!("{} {}", sym.cross, status).red().to_string(),
    }
}

fn print_lines(lines: &[String]) {
    let mut out = io::stdout().lock();
    for line in lines {
        let _ = writeln!(out, "{line}");
    }
}

pub fn print_request(request: &str) {
    print_lines(&format_request(request));
}

pub fn print_attempt(attempt: u32, max_attempts: u32) {
    print_lines(&[format_attempt(attempt, max_attempts)]);
}

pub fn print_plan(plan: &Plan) {
    print_lines(&format_plan(plan));
}

pub fn print_output(output: &str) {
    print_lines(&format_output(output));
}

pub fn print_failure(output: &str) {
    print_lines(&format_failure(output));
}

pub fn print_notice(message: &str) {
    let sym = Symbols::current();
    print_lines(&[format!("  {} {message}", sym.warning).dark_yellow().to_string()]);
}

/// Success goes to stdout; every other terminal status is one line on stderr.
pub fn print_status(status: &RunStatus) {
    let line = format_status(status);
    if status.is_success() {
        print_lines(&[line]);
    } else {
        let _ = writeln!(io::stderr().lock(), "{line}");
    }
}

/// Asks on the terminal whether to run `command`. Anything but y/yes declines.
pub fn ask_confirmation(command: &str) -> bool {
    let sym = Symbols::current();
    {
        let mut out = io::stdout().lock();
        let _ = write!(
            out,
            "{} Run `{}`? [y/N] ",
            sym.warning,
            command.cyan()
        );
        let _ = out.flush();
    }
    let mut answer = String::new();
    if io::stdin().lock().read_line(&mut answer).is_err() {
        return false;
    }
    is_yes(&answer)
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
