use std::{
    fs,
    path::{Path, PathBuf},
    sync::LazyLock,
};

use regex::Regex;
use tracing::{debug, info, warn};

use crate::types::{FileContext, MediaKind};

pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "mkv", "avi", "webm", "gif"];
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "tiff", "heic"];
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "aac", "flac"];

/// Files named in the summary message before it switches to "and N more".
pub const MAX_LISTED_FILES: usize = 15;

pub const CONCAT_LIST_NAME: &str = ".toast_concat.txt";

const CONCAT_KEYWORDS: &[&str] = &["concat", "merge", "join", "combine", "stitch"];

static EXT_ALTERNATION: LazyLock<String> = LazyLock::new(|| {
    let mut exts: Vec<&str> = all_extensions().collect();
    // Longest first so `jpeg` is tried before `jpg`, `tiff` before shorter prefixes.
    exts.sort_by_key(|e| std::cmp::Reverse(e.len()));
    exts.join("|")
});

static QUOTED_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r#"(?i)["']([^"']+\.(?:{}))["']"#, *EXT_ALTERNATION))
        .expect("quoted filename pattern")
});

static UNQUOTED_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)\b([a-zA-Z0-9_.-]+\.(?:{}))\b", *EXT_ALTERNATION))
        .expect("unquoted filename pattern")
});

static BARE_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[\w.-]{3,}\b").expect("token pattern"));

fn all_extensions() -> impl Iterator<Item = &'static str> {
    VIDEO_EXTENSIONS
        .iter()
        .chain(IMAGE_EXTENSIONS)
        .chain(AUDIO_EXTENSIONS)
        .copied()
}

pub fn is_media_file_name(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            all_extensions().any(|known| known == ext)
        })
        .unwrap_or(false)
}

/// Decides which file(s) on disk a request refers to.
pub struct FileContextResolver {
    directory: PathBuf,
}

impl FileContextResolver {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        let directory = directory.into();
        if !directory.is_dir() {
            warn!(
                directory = %directory.display(),
                "target directory does not exist; file detection will be empty"
            );
        }
        Self { directory }
    }

    /// Builds the file context for one run. Never fails: unreadable
    /// directories degrade to an empty detection result.
    ///
    /// The directory is always scanned so the generator sees what is on disk,
    /// but a confirmed explicit file takes priority wherever the context is used.
    pub fn resolve(&self, request: &str, explicit_flag: Option<&Path>) -> FileContext {
        let media_focus = detect_media_focus(request);
        let detected_files = self.list_media_files();

        let (explicit_file, missing_explicit) = match explicit_flag {
            Some(flag_path) => {
                let resolved = self.absolutize(flag_path);
                if resolved.is_file() {
                    (Some(resolved), None)
                } else {
                    warn!(file = %resolved.display(), "explicitly specified file not found");
                    (None, Some((flag_path.to_path_buf(), resolved)))
                }
            }
            None => (self.extract_explicit_filename(request), None),
        };

        let summary_message = match (&explicit_file, &missing_explicit) {
            (Some(found), _) => {
                info!(file = %found.display(), "using explicit input file");
                format!(
                    "An explicit input file was provided ('{}'). Use this exact path for the input.",
                    found.display()
                )
            }
            (None, Some((given, resolved))) => format!(
                "User specified an input file ('{}', resolved to '{}'), but it was not found. \
                 Inform the user if a file is needed or if the path is incorrect.",
                given.display(),
                resolved.display()
            ),
            (None, None) => self.detected_summary(&detected_files),
        };

        let concat_list = if explicit_file.is_none()
            && wants_concatenation(request)
            && detected_files.len() > 1
        {
            write_concat_list(&self.directory, &detected_files)
        } else {
            None
        };

        FileContext {
            explicit_file,
            missing_explicit: missing_explicit.map(|(_, resolved)| resolved),
            detected_files,
            summary_message,
            media_focus,
            concat_list,
        }
    }

    /// Looks for a filename in the request, escalating from quoted names to
    /// unquoted names to bare tokens. Every candidate must exist on disk.
    pub fn extract_explicit_filename(&self, request: &str) -> Option<PathBuf> {
        let quoted: Vec<&str> = QUOTED_NAME
            .captures_iter(request)
            .filter_map(|c| c.get(1).map(|m| m.as_str()))
            .collect();
        if let Some(path) = self.first_existing(&quoted) {
            return Some(path);
        }
        if !quoted.is_empty() {
            debug!(?quoted, "quoted filenames in request do not exist locally");
        }

        let unquoted: Vec<&str> = UNQUOTED_NAME
            .captures_iter(request)
            .filter_map(|c| c.get(1).map(|m| m.as_str()))
            .collect();
        if let Some(path) = self.first_existing(&unquoted) {
            return Some(path);
        }
        if !unquoted.is_empty() {
            debug!(?unquoted, "unquoted filenames in request do not exist locally");
        }

        self.match_bare_token(request)
    }

    fn first_existing(&self, candidates: &[&str]) -> Option<PathBuf> {
        candidates
            .iter()
            .map(|name| self.absolutize(Path::new(name)))
            .find(|path| path.is_file())
    }

    fn match_bare_token(&self, request: &str) -> Option<PathBuf> {
        let entries = match fs::read_dir(&self.directory) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(directory = %self.directory.display(), "cannot read directory for token matching: {err}");
                return None;
            }
        };
        let local: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter_map(|e| e.file_name().into_string().ok())
            .collect();

        BARE_TOKEN.find_iter(request).find_map(|token| {
            let token = token.as_str().to_lowercase();
            local
                .iter()
                .find(|name| name.to_lowercase() == token && is_media_file_name(name))
                .map(|name| self.directory.join(name))
        })
    }

    /// Media files directly inside the directory, in listing order.
    pub fn list_media_files(&self) -> Vec<PathBuf> {
        let entries = match fs::read_dir(&self.directory) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(directory = %self.directory.display(), "cannot list directory: {err}");
                return Vec::new();
            }
        };
        entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter(|e| e.file_name().to_str().is_some_and(is_media_file_name))
            .map(|e| e.path())
            .collect()
    }

    fn detected_summary(&self, files: &[PathBuf]) -> String {
        let dir = self.directory.display();
        if files.is_empty() {
            info!(directory = %dir, "no media files detected");
            return format!(
                "No explicit input file was provided, and no common media files were detected \
                 in the current directory ('{dir}')."
            );
        }
        let shown: Vec<String> = files
            .iter()
            .take(MAX_LISTED_FILES)
            .map(|f| format!("'{}'", display_path(f, &self.directory)))
            .collect();
        let mut message = format!(
            "Found media files in the current directory ('{dir}'): {}.",
            shown.join(", ")
        );
        if files.len() > MAX_LISTED_FILES {
            message.push_str(&format!(" (and {} more...)", files.len() - MAX_LISTED_FILES));
        }
        info!(count = files.len(), "media files detected");
        message
    }

    fn absolutize(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.directory.join(path)
        }
    }
}

/// Prefers the path relative to `base` when it is shorter and climbs at most
/// one parent directory.
pub fn display_path(path: &Path, base: &Path) -> String {
    match relative_path(path, base) {
        Some(rel) => {
            let rel_str = rel.to_string_lossy().to_string();
            let parents = rel
                .components()
                .filter(|c| matches!(c, std::path::Component::ParentDir))
                .count();
            if rel_str.len() < path.to_string_lossy().len() && parents <= 1 {
                rel_str
            } else {
                path.display().to_string()
            }
        }
        None => path.display().to_string(),
    }
}

fn relative_path(path: &Path, base: &Path) -> Option<PathBuf> {
    if !path.is_absolute() || !base.is_absolute() {
        return None;
    }
    let path_parts: Vec<_> = path.components().collect();
    let base_parts: Vec<_> = base.components().collect();
    // Different roots (e.g. drive letters) have no relative form.
    if path_parts.first() != base_parts.first() {
        return None;
    }
    let common = path_parts
        .iter()
        .zip(&base_parts)
        .take_while(|(a, b)| a == b)
        .count();
    let mut rel = PathBuf::new();
    for _ in common..base_parts.len() {
        rel.push("..");
    }
    for part in &path_parts[common..] {
        rel.push(part.as_os_str());
    }
    Some(rel)
}

pub fn detect_media_focus(request: &str) -> Option<MediaKind> {
    let lower = request.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    let mentions = |exts: &[&str]| words.iter().any(|w| exts.contains(w));

    if lower.contains("video") || mentions(&["mp4", "mov", "mkv", "avi", "webm"]) {
        return Some(MediaKind::Video);
    }
    if lower.contains("audio") || mentions(AUDIO_EXTENSIONS) {
        return Some(MediaKind::Audio);
    }
    if lower.contains("image") || mentions(&["png", "jpg", "jpeg", "bmp", "tiff", "heic"]) {
        return Some(MediaKind::Image);
    }
    if mentions(&["gif"]) {
        return Some(MediaKind::Video);
    }
    None
}

pub fn wants_concatenation(request: &str) -> bool {
    let lower = request.to_lowercase();
    CONCAT_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// Writes an ffmpeg concat-demuxer list next to the inputs. Written once and
/// never touched again during the run.
pub fn write_concat_list(directory: &Path, files: &[PathBuf]) -> Option<PathBuf> {
    let path = directory.join(CONCAT_LIST_NAME);
    match fs::write(&path, concat_list_body(files)) {
        Ok(()) => {
            info!(list = %path.display(), files = files.len(), "wrote concat list");
            Some(path)
        }
        Err(err) => {
            warn!(list = %path.display(), "could not write concat list: {err}");
            None
        }
    }
}

fn concat_list_body(files: &[PathBuf]) -> String {
    files
        .iter()
        .map(|f| {
            let escaped = f.to_string_lossy().replace('\'', r"'\''");
            format!("file '{escaped}'\n")
        })
        .collect()
}
