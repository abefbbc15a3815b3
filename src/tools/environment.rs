use std::{
    env,
    ffi::OsStr,
    path::{Path, PathBuf},
    process::Command,
};

use anyhow::{Result, bail};
use tracing::{debug, warn};

use crate::types::EnvironmentFacts;

const UNKNOWN: &str = "Unknown";

/// Captures the facts the instruction document needs about this machine.
/// Fails only when the media tool itself cannot be found.
pub fn probe(tool: &str, working_dir: &Path) -> Result<EnvironmentFacts> {
    let Some(tool_path) = locate_executable(tool) else {
        bail!(
            "'{tool}' was not found on PATH. Install it (https://ffmpeg.org/download.html) \
             or point TOAST_FFMPEG at the binary."
        );
    };
    debug!(path = %tool_path.display(), "located media tool");

    let facts = EnvironmentFacts {
        os_name: os_name().to_string(),
        os_description: os_description(),
        shell_path: detect_shell(),
        tool_version: tool_version(&tool_path),
        tool_executable_path: tool_path.display().to_string(),
        working_directory: working_dir.display().to_string(),
    };
    debug!(?facts, "environment probed");
    Ok(facts)
}

/// Resolves `name` to an executable file: paths are checked directly,
/// bare names are searched on `PATH`.
pub fn locate_executable(name: &str) -> Option<PathBuf> {
    let candidate = Path::new(name);
    if candidate.components().count() > 1 || candidate.is_absolute() {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    let path_var = env::var_os("PATH")?;
    find_in_dirs(name, env::split_paths(&path_var))
}

fn find_in_dirs(name: &str, dirs: impl IntoIterator<Item = PathBuf>) -> Option<PathBuf> {
    let suffixes: &[&str] = if cfg!(target_os = "windows") {
        &["", ".exe", ".cmd", ".bat"]
    } else {
        &[""]
    };
    dirs.into_iter().find_map(|dir| {
        suffixes
            .iter()
            .map(|suffix| dir.join(format!("{name}{suffix}")))
            .find(|path| path.is_file())
    })
}

fn os_name() -> &'static str {
    match env::consts::OS {
        "linux" => "Linux",
        "macos" => "Darwin",
        "windows" => "Windows",
        "freebsd" => "FreeBSD",
        other => other,
    }
}

fn os_description() -> String {
    let uname = if cfg!(unix) {
        command_first_line("uname", &["-srm"])
    } else {
        None
    };
    uname.unwrap_or_else(|| format!("{} {}", os_name(), env::consts::ARCH))
}

fn detect_shell() -> String {
    let from_env = if cfg!(target_os = "windows") {
        env::var("COMSPEC").ok()
    } else {
        env::var("SHELL").ok()
    };
    if let Some(shell) = from_env.filter(|s| !s.trim().is_empty()) {
        return shell;
    }
    ["bash", "zsh", "sh"]
        .iter()
        .find_map(|name| locate_executable(name))
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| UNKNOWN.to_string())
}

fn tool_version(tool_path: &Path) -> String {
    match Command::new(tool_path).arg("-version").output() {
        Ok(out) => version_line(
            &String::from_utf8_lossy(&out.stdout),
            &String::from_utf8_lossy(&out.stderr),
        ),
        Err(err) => {
            warn!(tool = %tool_path.display(), "could not read tool version: {err}");
            UNKNOWN.to_string()
        }
    }
}

/// First non-empty line of stdout, falling back to stderr.
fn version_line(stdout: &str, stderr: &str) -> String {
    [stdout, stderr]
        .iter()
        .find_map(|text| text.lines().map(str::trim).find(|l| !l.is_empty()))
        .map(str::to_string)
        .unwrap_or_else(|| UNKNOWN.to_string())
}

fn command_first_line(program: impl AsRef<OsStr>, args: &[&str]) -> Option<String> {
    let out = Command::new(program).args(args).output().ok()?;
    if !out.status.success() {
        return None;
    }
    String::from_utf8_lossy(&out.stdout)
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn version_prefers_stdout_then_stderr() {
        assert_eq!(
            version_line("ffmpeg version 6.1 Copyright\nbuilt with gcc", ""),
            "ffmpeg version 6.1 Copyright"
        );
        assert_eq!(version_line("\n", "  ffmpeg version n7.0\n"), "ffmpeg version n7.0");
        assert_eq!(version_line("", ""), "Unknown");
    }

    #[test]
    fn finds_executable_in_search_dirs() {
        let first = tempfile::tempdir().expect("tempdir");
        let second = tempfile::tempdir().expect("tempdir");
        let tool = second.path().join("fakeffmpeg");
        fs::write(&tool, b"#!/bin/sh\n").expect("write tool");

        let found = find_in_dirs(
            "fakeffmpeg",
            [first.path().to_path_buf(), second.path().to_path_buf()],
        );
        assert_eq!(found, Some(tool));
        assert_eq!(
            find_in_dirs("absent-tool", [first.path().to_path_buf()]),
            None
        );
    }

    #[test]
    fn explicit_tool_path_is_checked_directly() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tool = dir.path().join("ffmpeg-custom");
        fs::write(&tool, b"").expect("write tool");
        let as_str = tool.to_string_lossy().to_string();
        assert_eq!(locate_executable(&as_str), Some(tool.clone()));
        assert_eq!(
            locate_executable(&dir.path().join("nope").to_string_lossy()),
            None
        );
    }

    #[test]
    fn missing_tool_fails_probe() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("no-such-ffmpeg");
        let err = probe(&missing.to_string_lossy(), dir.path()).expect_err("must fail");
        assert!(err.to_string().contains("was not found"));
    }

    #[test]
    fn os_name_is_never_empty() {
        assert!(!os_name().is_empty());
        assert!(!os_description().is_empty());
    }
}
