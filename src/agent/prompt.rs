use std::{
    collections::{BTreeSet, HashMap},
    path::Path,
    sync::LazyLock,
};

use regex::Regex;
use thiserror::Error;

use crate::{
    tools::context::display_path,
    types::{EnvironmentFacts, FileContext},
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PromptError {
    #[error("required field `{0}` has no value")]
    MissingField(String),
    #[error("template references unknown placeholder `{0}`")]
    UnknownPlaceholder(String),
    #[error("unterminated placeholder starting at byte {0}")]
    Unterminated(usize),
}

/// Placeholders every render must supply a non-empty value for.
pub const REQUIRED_FIELDS: &[&str] = &[
    "os_name",
    "os_description",
    "shell_path",
    "tool_version",
    "tool_executable_path",
    "working_directory",
    "file_context",
];

pub const SYSTEM_TEMPLATE: &str = r#"You are an expert assistant that turns media-processing requests into FFmpeg commands.
Produce one correct, safe FFmpeg command or one shell loop that calls FFmpeg.

## Response format
Reply with a single JSON object and nothing else, no markdown fences, no prose:
{{"explanation": ["..."], "command": "..."}}
- "explanation": list of short strings, one per flag or part of the command. Explain every part.
- "command": the complete command line to execute. A single FFmpeg invocation or a shell loop.

## System context
- Operating system: {os_description} ({os_name})
- Shell: {shell_path} (assume bash/zsh syntax unless the shell is cmd.exe)
- FFmpeg version: {tool_version}
- FFmpeg path: {tool_executable_path}
- Working directory: {working_directory}

## File context
{file_context}
## Rules
1. Overwrite: ALWAYS end every FFmpeg invocation with `-y` (inside the loop body for loops).
2. Trimming: limit duration with the `-t <duration>` output option, e.g. `-ss 0 -i <input> -t <duration> ... <output> -y`. Do not rely on `-vf trim` alone.
3. Batch work: when the request implies several files ("all", "every", "batch", or a wildcard such as `*.mov`) and more than one file is listed above, you MUST generate a shell loop for the shell above. Never act only on the first file of a batch request.
   Example: `for f in *.mov *.MOV; do "{tool_executable_path}" -i "$f" [OPTIONS] "${{f%.*}}_toasted.mp4" -y; done`
   Mind extension case (`.mov` vs `.MOV`) and quote `"$f"` and `"${{...}}"` expansions.
4. Single input: when one file is given or detected, produce one FFmpeg command, not a loop, and use that exact path, quoted.
5. Output names: append `_toasted` before the extension and write into {working_directory} unless the user says otherwise.
6. Quoting: quote file names, paths and filter arguments.
7. Safety: never produce destructive or unrelated commands. If the request is unsafe or impossible, set "command" to "" and say why in "explanation".
8. Repair: when told a previous command failed, read the error output and return a corrected command. For "no matches found", fix the file pattern.
"#;

static SIZE_LIMIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bmax(?:imum)?(?:\s+file\s+size)?(?:\s+of)?\s*(\d+(?:\.\d+)?)\s*(kb|mb|gb)\b")
        .expect("size limit pattern")
});

/// Detected files named individually in the document; the rest are counted.
const MAX_PROMPT_FILES: usize = 50;

const COMPRESSION_WORDS: &[&str] = &["compress", "smaller", "reduce", "minimize"];

/// Renders the instruction document for one run.
pub fn compose_system_prompt(
    facts: &EnvironmentFacts,
    files: &FileContext,
) -> Result<String, PromptError> {
    let working_dir = Path::new(&facts.working_directory);
    let mut values = HashMap::new();
    values.insert("os_name", facts.os_name.clone());
    values.insert("os_description", facts.os_description.clone());
    values.insert("shell_path", facts.shell_path.clone());
    values.insert("tool_version", facts.tool_version.clone());
    values.insert("tool_executable_path", facts.tool_executable_path.clone());
    values.insert("working_directory", facts.working_directory.clone());
    values.insert("file_context", file_context_block(files, working_dir));
    render(SYSTEM_TEMPLATE, &values)
}

/// Substitutes `{name}` placeholders; `{{` and `}}` produce literal braces.
/// Every placeholder must be known and have a non-empty value.
pub fn render(template: &str, values: &HashMap<&str, String>) -> Result<String, PromptError> {
    let mut out = String::with_capacity(template.len() + 512);
    let mut rest = template;
    let mut offset = 0usize;

    while let Some(pos) = rest.find(['{', '}']) {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if tail.starts_with("{{") || tail.starts_with("}}") {
            out.push_str(&tail[..1]);
            rest = &tail[2..];
            offset += pos + 2;
            continue;
        }
        if tail.starts_with('}') {
            out.push('}');
            rest = &tail[1..];
            offset += pos + 1;
            continue;
        }

        let Some(end) = tail.find('}') else {
            return Err(PromptError::Unterminated(offset + pos));
        };
        let name = &tail[1..end];
        match values.get(name) {
            Some(value) if !value.trim().is_empty() => out.push_str(value),
            Some(_) => return Err(PromptError::MissingField(name.to_string())),
            None if REQUIRED_FIELDS.contains(&name) => {
                return Err(PromptError::MissingField(name.to_string()));
            }
            None => return Err(PromptError::UnknownPlaceholder(name.to_string())),
        }
        rest = &tail[end + 1..];
        offset += pos + end + 1;
    }
    out.push_str(rest);
    Ok(out)
}

/// The dynamic part of the document describing which inputs exist.
pub fn file_context_block(files: &FileContext, working_dir: &Path) -> String {
    let mut block = String::new();

    if let Some(explicit) = &files.explicit_file {
        block.push_str(&format!(
            "- Explicit input file: '{}' (use this exact path)\n",
            explicit.display()
        ));
    } else if !files.detected_files.is_empty() {
        let listed: Vec<String> = files
            .detected_files
            .iter()
            .take(MAX_PROMPT_FILES)
            .map(|f| format!("'{}'", display_path(f, working_dir)))
            .collect();
        block.push_str(&format!(
            "- Media files detected in '{}': {}\n",
            working_dir.display(),
            listed.join(", ")
        ));
        let unlisted = files.detected_files.len().saturating_sub(MAX_PROMPT_FILES);
        if unlisted > 0 {
            let extensions: BTreeSet<String> = files
                .detected_files
                .iter()
                .filter_map(|f| f.extension()?.to_str().map(str::to_ascii_lowercase))
                .map(|ext| format!("*.{ext}"))
                .collect();
            let globs: Vec<String> = extensions.into_iter().collect();
            block.push_str(&format!(
                "- {unlisted} more files not listed ({} in total). Match them with a glob \
                 or shell loop over {} instead of naming each one.\n",
                files.detected_files.len(),
                globs.join(", ")
            ));
        }
        block.push_str(&format!(
            "- Use full paths where needed (e.g. '{}').\n",
            files.detected_files[0].display()
        ));
    }

    if files.explicit_file.is_none()
        && (files.detected_files.is_empty() || files.missing_explicit.is_some())
    {
        block.push_str(&format!("- Additional context: {}\n", files.summary_message));
    }
    if files.explicit_file.is_none() && files.detected_files.is_empty() {
        block.push_str("- No input file was provided or found; do not invent input paths.\n");
    }

    if let Some(kind) = files.media_focus {
        block.push_str(&format!(
            "- The request is about {} files; prefer inputs of that kind.\n",
            kind.as_str()
        ));
    }
    if let Some(list) = &files.concat_list {
        block.push_str(&format!(
            "- A concat list of all detected files was written to '{}'. For joining, use \
             `-f concat -safe 0 -i '{}'`.\n",
            list.display(),
            list.display()
        ));
    }
    block
}

/// Appends generation hints derived from the request wording. The original
/// text is kept verbatim at the start.
pub fn augment_request(request: &str) -> String {
    if let Some(bytes) = target_size_bytes(request) {
        return format!(
            "{request}\n\nHard limit: the output file must be at most {bytes} bytes. \
             Pick bitrate, resolution and frame rate so the result stays under it."
        );
    }
    let lower = request.to_lowercase();
    if COMPRESSION_WORDS.iter().any(|w| lower.contains(w)) {
        return format!(
            "{request}\n\nThe output must be smaller than the input file. Reduce bitrate or \
             resolution as needed."
        );
    }
    request.to_string()
}

/// Size ceiling in bytes from phrases like "max 5mb" or "max file size of 500 kb".
pub fn target_size_bytes(request: &str) -> Option<u64> {
    let caps = SIZE_LIMIT.captures(request)?;
    let amount: f64 = caps.get(1)?.as_str().parse().ok()?;
    let multiplier = match caps.get(2)?.as_str().to_ascii_lowercase().as_str() {
        "kb" => 1024f64,
        "mb" => 1024f64 * 1024.0,
        "gb" => 1024f64 * 1024.0 * 1024.0,
        _ => return None,
    };
    Some((amount * multiplier) as u64)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::types::MediaKind;

    fn facts() -> EnvironmentFacts {
        EnvironmentFacts {
            os_name: "Linux".into(),
            os_description: "Linux 6.8.0 x86_64".into(),
            shell_path: "/bin/bash".into(),
            tool_version: "ffmpeg version 6.1".into(),
            tool_executable_path: "/usr/bin/ffmpeg".into(),
            working_directory: "/work".into(),
        }
    }

    #[test]
    fn renders_all_facts_and_policy() {
        let files = FileContext {
            detected_files: vec![PathBuf::from("/work/clip.mov")],
            summary_message: "Found media files".into(),
            ..FileContext::default()
        };
        let doc = compose_system_prompt(&facts(), &files).expect("render");
        assert!(doc.contains("Operating system: Linux 6.8.0 x86_64 (Linux)"));
        assert!(doc.contains("FFmpeg path: /usr/bin/ffmpeg"));
        assert!(doc.contains("'clip.mov'"));
        assert!(doc.contains("`-y`"));
        assert!(doc.contains("-t <duration>"));
        assert!(doc.contains("shell loop"));
        assert!(doc.contains(r#"set "command" to """#));
        assert!(doc.contains(r#"{"explanation": ["..."], "command": "..."}"#));
        assert!(doc.contains(r#""${f%.*}_toasted.mp4""#));
        assert!(!doc.contains("{os_name}"));
    }

    #[test]
    fn empty_context_never_fabricates_a_path() {
        let files = FileContext {
            summary_message: "No explicit input file was provided, and no common media files were detected".into(),
            ..FileContext::default()
        };
        let block = file_context_block(&files, Path::new("/work"));
        assert!(block.contains("No input file was provided or found"));
        assert!(block.contains("Additional context: No explicit input file"));
        assert!(!block.contains("Explicit input file:"));
        assert!(!block.contains("Media files detected"));
    }

    #[test]
    fn explicit_file_takes_priority_over_detected() {
        let files = FileContext {
            explicit_file: Some(PathBuf::from("/work/a.mp4")),
            detected_files: vec![PathBuf::from("/work/a.mp4"), PathBuf::from("/work/b.mp4")],
            media_focus: Some(MediaKind::Video),
            ..FileContext::default()
        };
        let block = file_context_block(&files, Path::new("/work"));
        assert!(block.contains("Explicit input file: '/work/a.mp4'"));
        assert!(!block.contains("b.mp4"));
        assert!(block.contains("about video files"));
    }

    #[test]
    fn missing_explicit_file_is_reported_next_to_detected_list() {
        let files = FileContext {
            missing_explicit: Some(PathBuf::from("/work/gone.mp4")),
            detected_files: vec![PathBuf::from("/work/b.mp4")],
            summary_message: "User specified an input file ('gone.mp4') but it was not found.".into(),
            ..FileContext::default()
        };
        let block = file_context_block(&files, Path::new("/work"));
        assert!(block.contains("'b.mp4'"));
        assert!(block.contains("gone.mp4"));
    }

    #[test]
    fn large_folders_are_listed_partially_with_a_glob_hint() {
        let detected: Vec<PathBuf> = (0..1200)
            .map(|i| PathBuf::from(format!("/work/frame_{i:04}.png")))
            .collect();
        let files = FileContext {
            detected_files: detected,
            ..FileContext::default()
        };
        let block = file_context_block(&files, Path::new("/work"));
        assert!(block.contains("'frame_0049.png'"));
        assert!(!block.contains("frame_0050.png"));
        assert!(block.contains("1150 more files not listed (1200 in total)"));
        assert!(block.contains("*.png"));
    }

    #[test]
    fn concat_list_is_mentioned() {
        let files = FileContext {
            detected_files: vec![PathBuf::from("/w/a.mp4"), PathBuf::from("/w/b.mp4")],
            concat_list: Some(PathBuf::from("/w/.toast_concat.txt")),
            ..FileContext::default()
        };
        let block = file_context_block(&files, Path::new("/w"));
        assert!(block.contains("-f concat -safe 0 -i '/w/.toast_concat.txt'"));
    }

    #[test]
    fn missing_or_blank_fact_is_a_hard_error() {
        let mut broken = facts();
        broken.tool_version = String::new();
        assert_eq!(
            compose_system_prompt(&broken, &FileContext::default()),
            Err(PromptError::MissingField("tool_version".into()))
        );

        let values: HashMap<&str, String> = HashMap::new();
        assert_eq!(
            render("shell: {shell_path}", &values),
            Err(PromptError::MissingField("shell_path".into()))
        );
    }

    #[test]
    fn renderer_handles_escapes_and_unknown_names() {
        let mut values = HashMap::new();
        values.insert("os_name", "Linux".to_string());
        assert_eq!(
            render("{{literal}} on {os_name} ${{f%.*}}", &values).expect("render"),
            "{literal} on Linux ${f%.*}"
        );
        assert_eq!(
            render("{nope}", &values),
            Err(PromptError::UnknownPlaceholder("nope".into()))
        );
        assert_eq!(render("abc {os_name", &values), Err(PromptError::Unterminated(4)));
    }

    #[test]
    fn size_ceiling_is_parsed_in_binary_units() {
        assert_eq!(
            target_size_bytes("convert clip.mov to gif, 12.5fps, max 5mb"),
            Some(5 * 1024 * 1024)
        );
        assert_eq!(
            target_size_bytes("max file size of 500 KB please"),
            Some(500 * 1024)
        );
        assert_eq!(target_size_bytes("max 1.5gb"), Some(1_610_612_736));
        assert_eq!(target_size_bytes("make it 5mb"), None);
    }

    #[test]
    fn augmentation_keeps_request_and_adds_one_hint() {
        let with_size = augment_request("convert clip.mov to gif, max 5mb and compress");
        assert!(with_size.starts_with("convert clip.mov to gif, max 5mb and compress"));
        assert!(with_size.contains("at most 5242880 bytes"));
        assert!(!with_size.contains("smaller than the input"));

        let compress = augment_request("compress intro.mkv");
        assert!(compress.contains("smaller than the input"));

        assert_eq!(augment_request("flip video.mp4"), "flip video.mp4");
    }
}
