use std::fmt;
use std::path::PathBuf;

use serde::Deserialize;

use crate::agent::provider::GenerationError;

/// Facts about the machine the generated command will run on.
/// Captured once per run; every field must be non-empty when rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentFacts {
    pub os_name: String,
    pub os_description: String,
    pub shell_path: String,
    pub tool_version: String,
    pub tool_executable_path: String,
    pub working_directory: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Image,
    Audio,
}

impl MediaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Image => "image",
            Self::Audio => "audio",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileContext {
    /// Only ever set to a path that existed when it was recorded.
    pub explicit_file: Option<PathBuf>,
    /// A file the user named on the command line that does not exist.
    pub missing_explicit: Option<PathBuf>,
    /// Every matching file in directory-listing order. Display is capped elsewhere.
    pub detected_files: Vec<PathBuf>,
    pub summary_message: String,
    pub media_focus: Option<MediaKind>,
    pub concat_list: Option<PathBuf>,
}

/// `explanation` as sent by the service: one string or a list of them.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Explanation {
    One(String),
    Many(Vec<String>),
}

impl Explanation {
    pub fn lines(&self) -> Vec<&str> {
        match self {
            Self::One(text) => vec![text.as_str()],
            Self::Many(items) => items.iter().map(String::as_str).collect(),
        }
    }
}

impl Default for Explanation {
    fn default() -> Self {
        Self::One("No explanation provided.".to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub explanation: Explanation,
    /// Empty means the service declined to produce a command.
    pub command: String,
}

impl Plan {
    pub fn is_refusal(&self) -> bool {
        self.command.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub succeeded: bool,
    pub output: String,
}

impl ExecutionOutcome {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            succeeded: true,
            output: output.into(),
        }
    }

    pub fn failure(output: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            output: output.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExhaustionCause {
    CommandKeptFailing,
    NoValidResponse,
}

/// How a run ended. Set exactly once by whichever exit path the loop takes.
#[derive(Debug)]
pub enum RunStatus {
    Succeeded,
    DryRun,
    /// The service answered with an empty command. Its explanation has
    /// already been shown with the plan.
    Refused,
    AttemptsExhausted(ExhaustionCause),
    Generation(GenerationError),
    Composition(String),
    Cancelled,
}

impl RunStatus {
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Succeeded | Self::DryRun => 0,
            _ => 1,
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code() == 0
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "command executed successfully"),
            Self::DryRun => write!(f, "dry run: command generated but not executed"),
            Self::Refused => write!(f, "no command was produced; cannot proceed"),
            Self::AttemptsExhausted(ExhaustionCause::CommandKeptFailing) => write!(
                f,
                "maximum attempts reached; the command could not be executed successfully"
            ),
            Self::AttemptsExhausted(ExhaustionCause::NoValidResponse) => write!(
                f,
                "maximum attempts reached; no valid command could be generated"
            ),
            Self::Generation(err) => write!(f, "error communicating with the generation service: {err}"),
            Self::Composition(msg) => write!(f, "could not build the instruction prompt: {msg}"),
            Self::Cancelled => write!(f, "execution cancelled by user"),
        }
    }
}
