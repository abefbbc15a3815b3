use std::{
    io,
    path::{Path, PathBuf},
    process::Command,
    time::Duration,
};

use tracing::{debug, info, warn};

use crate::types::ExecutionOutcome;

pub const DEFAULT_MAX_RETRIES: u32 = 3;

// ffmpeg prints its banner and progress first and the error last, so failure
// text keeps the tail of each stream.
const STDERR_TAIL_CHARS: usize = 6_000;
const STDOUT_TAIL_CHARS: usize = 2_000;

/// A fully resolved process launch: program plus argument vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

impl Invocation {
    /// Splits `command` into argv when it is plain, or wraps it in the platform
    /// shell when it uses shell syntax (loops, pipes, globs, redirections).
    pub fn for_command(command: &str) -> Self {
        if !needs_shell(command) {
            match shell_words::split(command) {
                Ok(mut words) if !words.is_empty() => {
                    let program = words.remove(0);
                    return Self {
                        program,
                        args: words,
                    };
                }
                Ok(_) => {}
                Err(err) => debug!("argv split failed, routing through shell: {err}"),
            }
        }
        Self::shell(command)
    }

    fn shell(command: &str) -> Self {
        if cfg!(target_os = "windows") {
            Self {
                program: "cmd".to_string(),
                args: vec!["/C".to_string(), command.to_string()],
            }
        } else {
            Self {
                program: "sh".to_string(),
                args: vec!["-c".to_string(), command.to_string()],
            }
        }
    }

    pub fn uses_shell(&self) -> bool {
        matches!(
            (self.program.as_str(), self.args.first().map(String::as_str)),
            ("sh", Some("-c")) | ("cmd", Some("/C"))
        )
    }
}

/// True when the command contains shell control syntax outside of quotes,
/// or starts with a shell keyword.
pub fn needs_shell(command: &str) -> bool {
    let trimmed = command.trim_start();
    let first = trimmed.split_whitespace().next().unwrap_or("");
    if matches!(first, "for" | "while" | "if" | "until" | "case") {
        return true;
    }

    let mut in_single = false;
    let mut in_double = false;
    let mut escaped = false;
    for ch in trimmed.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if !in_single => escaped = true,
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            '$' | '`' if !in_single => return true,
            ';' | '|' | '&' | '<' | '>' | '*' | '?' | '[' if !in_single && !in_double => {
                return true;
            }
            _ => {}
        }
    }
    false
}

/// Whether any word of `command` names the media tool, either by bare name or
/// by the basename of its resolved executable.
pub fn invokes_tool(command: &str, tool_name: &str, tool_path: &str) -> bool {
    let wanted = [
        program_stem(tool_name),
        program_stem(tool_path),
    ];
    command
        .split(|c: char| c.is_whitespace() || matches!(c, ';' | '|' | '&' | '(' | ')'))
        .map(|word| word.trim_matches(|c| matches!(c, '"' | '\'')))
        .filter(|word| !word.is_empty())
        .any(|word| {
            let stem = program_stem(word);
            wanted.iter().any(|w| !w.is_empty() && *w == stem)
        })
}

fn program_stem(word: &str) -> String {
    let base = Path::new(word)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(word)
        .to_lowercase();
    base.strip_suffix(".exe").map(str::to_string).unwrap_or(base)
}

// ── Process seam ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

pub trait ProcessRunner {
    fn run(&self, invocation: &Invocation) -> io::Result<ProcessOutput>;
}

impl<R: ProcessRunner + ?Sized> ProcessRunner for &R {
    fn run(&self, invocation: &Invocation) -> io::Result<ProcessOutput> {
        (**self).run(invocation)
    }
}

/// Spawns real processes in a fixed working directory.
pub struct SystemRunner {
    working_dir: PathBuf,
}

impl SystemRunner {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
        }
    }
}

impl ProcessRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> io::Result<ProcessOutput> {
        let output = Command::new(&invocation.program)
            .args(&invocation.args)
            .current_dir(&self.working_dir)
            .output()?;
        Ok(ProcessOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

// ── Executor ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutionPolicy {
    pub dry_run: bool,
    pub confirm: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Execution {
    Completed(ExecutionOutcome),
    /// The user answered "no" at the confirmation prompt.
    Declined,
}

type SleepFn = Box<dyn Fn(Duration)>;
type ConfirmFn = Box<dyn Fn(&str) -> bool>;

/// Runs one command with bounded same-command retries and exponential backoff.
pub struct CommandExecutor<R> {
    runner: R,
    max_retries: u32,
    policy: ExecutionPolicy,
    sleep: SleepFn,
    confirm: ConfirmFn,
}

impl<R: ProcessRunner> CommandExecutor<R> {
    pub fn new(runner: R, policy: ExecutionPolicy) -> Self {
        Self {
            runner,
            max_retries: DEFAULT_MAX_RETRIES,
            policy,
            sleep: Box::new(std::thread::sleep),
            confirm: Box::new(crate::ui::format::ask_confirmation),
        }
    }

    #[cfg(test)]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    pub fn with_sleep(mut self, sleep: impl Fn(Duration) + 'static) -> Self {
        self.sleep = Box::new(sleep);
        self
    }

    pub fn with_confirm(mut self, confirm: impl Fn(&str) -> bool + 'static) -> Self {
        self.confirm = Box::new(confirm);
        self
    }

    #[cfg(test)]
    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn policy(&self) -> ExecutionPolicy {
        self.policy
    }

    pub fn execute(&self, command: &str) -> Execution {
        let command = command.trim();
        if command.is_empty() {
            warn!("refusing to execute an empty command");
            return Execution::Completed(ExecutionOutcome::failure(
                "Empty command received, cannot execute.",
            ));
        }

        if self.policy.dry_run {
            info!("dry run: skipping execution");
            return Execution::Completed(ExecutionOutcome::success(
                "Dry run mode: command not executed.",
            ));
        }

        if self.policy.confirm && !(self.confirm)(command) {
            info!("user declined execution");
            return Execution::Declined;
        }

        let invocation = Invocation::for_command(command);
        debug!(program = %invocation.program, shell = invocation.uses_shell(), "prepared invocation");

        let mut last_output = String::new();
        for attempt in 1..=self.max_retries {
            info!(attempt, max = self.max_retries, "executing command");
            match self.runner.run(&invocation) {
                Ok(out) if out.exit_code == Some(0) => {
                    info!(attempt, "command succeeded");
                    return Execution::Completed(ExecutionOutcome::success(out.stdout));
                }
                Ok(out) => {
                    warn!(attempt, exit_code = ?out.exit_code, "command failed");
                    last_output = describe_failure(&out);
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    warn!(program = %invocation.program, "executable not found");
                    last_output = format!(
                        "Error: executable '{}' was not found. Make sure it is installed and on PATH.",
                        invocation.program
                    );
                }
                Err(err) => {
                    warn!(attempt, "failed to launch command: {err}");
                    last_output = format!("Error: could not launch '{}': {err}", invocation.program);
                }
            }

            if attempt < self.max_retries {
                let delay = backoff_delay(attempt);
                info!(delay_secs = delay.as_secs(), "retrying after backoff");
                (self.sleep)(delay);
            }
        }

        Execution::Completed(ExecutionOutcome::failure(last_output))
    }
}

/// Delay after the `attempt`-th failure (1-based): 2s, 4s, 8s...
pub fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(2u64.saturating_pow(attempt))
}

fn describe_failure(out: &ProcessOutput) -> String {
    let code = match out.exit_code {
        Some(code) => code.to_string(),
        None => "terminated by signal".to_string(),
    };
    format!(
        "Exit Code: {code}\nStderr: {}\nStdout: {}",
        tail(out.stderr.trim(), STDERR_TAIL_CHARS),
        tail(out.stdout.trim(), STDOUT_TAIL_CHARS)
    )
}

/// Last `max` bytes of `text`, cut on a line start when one is close by.
fn tail(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    let kept = &text[start..];
    let kept = match kept.find('\n') {
        Some(nl) if nl < kept.len() - 1 => &kept[nl + 1..],
        _ => kept,
    };
    format!("...[{} bytes truncated]\n{kept}", text.len() - kept.len())
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, collections::VecDeque, rc::Rc};

    use super::*;

    struct Scripted {
        replies: RefCell<VecDeque<io::Result<ProcessOutput>>>,
        calls: RefCell<Vec<Invocation>>,
    }

    impl Scripted {
        fn new(replies: Vec<io::Result<ProcessOutput>>) -> Self {
            Self {
                replies: RefCell::new(replies.into()),
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl ProcessRunner for Scripted {
        fn run(&self, invocation: &Invocation) -> io::Result<ProcessOutput> {
            self.calls.borrow_mut().push(invocation.clone());
            self.replies
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Ok(failing("out of script")))
        }
    }

    fn failing(stderr: &str) -> ProcessOutput {
        ProcessOutput {
            exit_code: Some(1),
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    fn ok(stdout: &str) -> ProcessOutput {
        ProcessOutput {
            exit_code: Some(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    fn recording_sleep() -> (Rc<RefCell<Vec<Duration>>>, impl Fn(Duration) + 'static) {
        let slept = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&slept);
        (slept, move |d| sink.borrow_mut().push(d))
    }

    #[test]
    fn always_failing_command_runs_three_times_with_two_sleeps() {
        let runner = Scripted::new(vec![
            Ok(failing("No such filter: 'foo'")),
            Ok(failing("No such filter: 'foo'")),
            Ok(failing("No such filter: 'foo'")),
        ]);
        let (slept, sleep) = recording_sleep();
        let executor = CommandExecutor::new(runner, ExecutionPolicy::default()).with_sleep(sleep);

        let result = executor.execute("ffmpeg -i clip.mov -vf foo out.gif -y");
        let Execution::Completed(outcome) = result else {
            panic!("expected completion");
        };
        assert!(!outcome.succeeded);
        assert!(outcome.output.contains("Exit Code: 1"));
        assert!(outcome.output.contains("No such filter: 'foo'"));
        assert_eq!(executor.runner().calls.borrow().len(), 3);
        assert_eq!(
            *slept.borrow(),
            vec![Duration::from_secs(2), Duration::from_secs(4)]
        );
    }

    #[test]
    fn long_failure_keeps_final_error_and_stdout() {
        let mut stderr: String = (0..200)
            .map(|i| format!("frame={i:4} fps=25 q=28.0 size=    {i}kB time=00:00:{i:02}.18 bitrate=...\n"))
            .collect();
        stderr.push_str("No such filter: 'foo'\n");
        let runner = Scripted::new(vec![Ok(ProcessOutput {
            exit_code: Some(1),
            stdout: "STDOUT_MARKER".to_string(),
            stderr,
        })]);
        let executor = CommandExecutor::new(runner, ExecutionPolicy::default())
            .with_max_retries(1)
            .with_sleep(|_| {});

        let Execution::Completed(outcome) = executor.execute("ffmpeg -i clip.mov -vf foo out.gif -y")
        else {
            panic!("expected completion");
        };
        assert!(outcome.output.starts_with("Exit Code: 1\nStderr: ...["));
        assert!(outcome.output.contains("No such filter: 'foo'\nStdout: STDOUT_MARKER"));
        assert!(!outcome.output.contains("frame=   0 "));
        assert!(outcome.output.len() < STDERR_TAIL_CHARS + STDOUT_TAIL_CHARS + 100);
    }

    #[test]
    fn tail_respects_char_boundaries() {
        let text = "é".repeat(10);
        let kept = tail(&text, 5);
        assert!(kept.ends_with("éé"));
        assert_eq!(tail("short", 100), "short");
    }

    #[test]
    fn success_on_second_try_stops_retrying() {
        let runner = Scripted::new(vec![Ok(failing("busy")), Ok(ok("done"))]);
        let (slept, sleep) = recording_sleep();
        let executor = CommandExecutor::new(runner, ExecutionPolicy::default()).with_sleep(sleep);

        let result = executor.execute("ffmpeg -version");
        assert_eq!(
            result,
            Execution::Completed(ExecutionOutcome::success("done"))
        );
        assert_eq!(executor.runner().calls.borrow().len(), 2);
        assert_eq!(slept.borrow().len(), 1);
    }

    #[test]
    fn empty_command_never_spawns() {
        let executor = CommandExecutor::new(Scripted::new(vec![]), ExecutionPolicy::default())
            .with_sleep(|_| {});
        let Execution::Completed(outcome) = executor.execute("   ") else {
            panic!("expected completion");
        };
        assert!(!outcome.succeeded);
        assert!(executor.runner().calls.borrow().is_empty());
    }

    #[test]
    fn dry_run_reports_success_without_spawning() {
        let policy = ExecutionPolicy {
            dry_run: true,
            confirm: true,
        };
        let executor = CommandExecutor::new(Scripted::new(vec![]), policy)
            .with_confirm(|_| panic!("dry run must not ask"));
        let Execution::Completed(outcome) = executor.execute("ffmpeg -i a.mov a.gif -y") else {
            panic!("expected completion");
        };
        assert!(outcome.succeeded);
        assert!(executor.runner().calls.borrow().is_empty());
    }

    #[test]
    fn declined_confirmation_skips_execution() {
        let policy = ExecutionPolicy {
            dry_run: false,
            confirm: true,
        };
        let executor =
            CommandExecutor::new(Scripted::new(vec![]), policy).with_confirm(|_| false);
        assert_eq!(executor.execute("ffmpeg -y"), Execution::Declined);
        assert!(executor.runner().calls.borrow().is_empty());
    }

    #[test]
    fn missing_executable_is_described() {
        let runner = Scripted::new(vec![Err(io::Error::new(io::ErrorKind::NotFound, "nope"))]);
        let executor = CommandExecutor::new(runner, ExecutionPolicy::default())
            .with_max_retries(1)
            .with_sleep(|_| panic!("single attempt must not sleep"));
        let Execution::Completed(outcome) = executor.execute("ffmpeg -i a.mov a.gif -y") else {
            panic!("expected completion");
        };
        assert!(!outcome.succeeded);
        assert!(outcome.output.contains("'ffmpeg' was not found"));
    }

    #[test]
    fn plain_commands_are_split_without_shell() {
        let inv = Invocation::for_command(r#"ffmpeg -i "my clip.mov" -t 5 out.mp4 -y"#);
        assert_eq!(inv.program, "ffmpeg");
        assert_eq!(inv.args[1], "my clip.mov");
        assert!(!inv.uses_shell());
    }

    #[test]
    fn shell_syntax_routes_through_shell() {
        assert!(needs_shell("for f in *.wav; do ffmpeg -i \"$f\" \"${f%.wav}.mp3\" -y; done"));
        assert!(needs_shell("ffmpeg -i a.mp4 -f null - 2>&1 | tail -n 1"));
        assert!(needs_shell("ffmpeg -i frame_*.png out.mp4 -y"));
        assert!(!needs_shell("ffmpeg -i 'a;b.mp4' out.mp4 -y"));
        assert!(!needs_shell(r#"ffmpeg -i in.mp4 -vf "scale=640:-2" out.mp4 -y"#));

        let inv = Invocation::for_command("ffmpeg -i in.mp4 out.mp4 -y && echo ok");
        assert!(inv.uses_shell());
        assert_eq!(inv.args.last().map(String::as_str), Some("ffmpeg -i in.mp4 out.mp4 -y && echo ok"));
    }

    #[test]
    fn tool_detection_accepts_name_or_path() {
        assert!(invokes_tool("ffmpeg -i a.mov a.gif -y", "ffmpeg", "/usr/bin/ffmpeg"));
        assert!(invokes_tool("/usr/bin/ffmpeg -y", "ffmpeg", "/usr/bin/ffmpeg"));
        assert!(invokes_tool(
            "for f in *.wav; do ffmpeg -i \"$f\" -y; done",
            "ffmpeg",
            "/usr/bin/ffmpeg"
        ));
        assert!(!invokes_tool("rm -rf /", "ffmpeg", "/usr/bin/ffmpeg"));
        assert!(!invokes_tool("ffprobe a.mov", "ffmpeg", "/usr/bin/ffmpeg"));
    }

    #[test]
    fn backoff_doubles() {
        assert_eq!(backoff_delay(1), Duration::from_secs(2));
        assert_eq!(backoff_delay(2), Duration::from_secs(4));
        assert_eq!(backoff_delay(3), Duration::from_secs(8));
    }
}
