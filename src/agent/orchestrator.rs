use std::path::Path;

use tracing::{debug, error, info, warn};

use crate::{
    agent::{
        history::{
            Conversation, after_failed_execution, foreign_command_prompt, invalid_response_prompt,
        },
        normalize::{normalize_json_response, parse_plan},
        prompt::{augment_request, compose_system_prompt},
        provider::{ChatBackend, ResponseGenerator},
    },
    tools::{
        context::FileContextResolver,
        runner::{CommandExecutor, Execution, ProcessRunner, invokes_tool},
    },
    types::{EnvironmentFacts, ExhaustionCause, FileContext, RunStatus},
    ui::format as ui,
};

/// Ceiling on generation calls per run.
pub const MAX_ATTEMPTS: u32 = 3;

/// Loop-local bookkeeping. Lives exactly as long as one `run`.
#[derive(Debug)]
struct AttemptState {
    attempt: u32,
    pending_user_message: Option<String>,
    last_command: Option<String>,
    last_failure: ExhaustionCause,
}

impl AttemptState {
    fn new(first_message: String) -> Self {
        Self {
            attempt: 0,
            pending_user_message: Some(first_message),
            last_command: None,
            last_failure: ExhaustionCause::NoValidResponse,
        }
    }
}

/// Everything a caller may want to inspect once the loop has ended.
#[derive(Debug)]
pub struct RunReport {
    pub status: RunStatus,
    pub attempts: u32,
    pub history: Conversation,
    pub files: FileContext,
    pub last_command: Option<String>,
}

pub struct Orchestrator<B, R> {
    generator: ResponseGenerator<B>,
    executor: CommandExecutor<R>,
    facts: EnvironmentFacts,
    tool_name: String,
    max_attempts: u32,
}

impl<B: ChatBackend, R: ProcessRunner> Orchestrator<B, R> {
    pub fn new(
        generator: ResponseGenerator<B>,
        executor: CommandExecutor<R>,
        facts: EnvironmentFacts,
        tool_name: impl Into<String>,
    ) -> Self {
        Self {
            generator,
            executor,
            facts,
            tool_name: tool_name.into(),
            max_attempts: MAX_ATTEMPTS,
        }
    }

    /// Runs the generate → parse → execute → repair loop for one request.
    pub fn run(&self, request: &str, explicit_file: Option<&Path>) -> RunReport {
        ui::print_request(request);

        let resolver = FileContextResolver::new(&self.facts.working_directory);
        let files = resolver.resolve(request, explicit_file);
        debug!(summary = %files.summary_message, "file context resolved");

        let mut history = Conversation::new();
        let mut state = AttemptState::new(augment_request(request));

        let system_prompt = match compose_system_prompt(&self.facts, &files) {
            Ok(doc) => doc,
            Err(err) => {
                error!("instruction document could not be rendered: {err}");
                return self.finish(RunStatus::Composition(err.to_string()), state, history, files);
            }
        };

        while state.attempt < self.max_attempts {
            let Some(pending) = state.pending_user_message.take() else {
                break;
            };
            state.attempt += 1;
            ui::print_attempt(state.attempt, self.max_attempts);
            history = history.with_user(pending);

            let raw = match self.generator.generate(&system_prompt, history.entries()) {
                Ok(raw) => raw,
                Err(err) => {
                    error!(attempt = state.attempt, "generation failed: {err}");
                    return self.finish(RunStatus::Generation(err), state, history, files);
                }
            };
            debug!(attempt = state.attempt, raw = %raw, "raw response");

            let normalized = normalize_json_response(&raw);
            let plan = match parse_plan(&normalized) {
                Ok(plan) => plan,
                Err(err) => {
                    warn!(attempt = state.attempt, "unusable response: {err}");
                    ui::print_notice(&format!("Response was not valid ({err}); asking again."));
                    state.pending_user_message =
                        Some(invalid_response_prompt(&raw, &err.to_string()));
                    state.last_failure = ExhaustionCause::NoValidResponse;
                    continue;
                }
            };
            history = history.with_assistant(normalized);
            ui::print_plan(&plan);

            if plan.is_refusal() {
                info!("service declined to produce a command");
                return self.finish(RunStatus::Refused, state, history, files);
            }

            if !invokes_tool(
                &plan.command,
                &self.tool_name,
                &self.facts.tool_executable_path,
            ) {
                warn!(command = %plan.command, "command does not invoke the media tool");
                ui::print_notice(&format!(
                    "Command does not call {}; asking for another.",
                    self.tool_name
                ));
                history = history.without_trailing_assistant();
                state.pending_user_message =
                    Some(foreign_command_prompt(&plan.command, &self.tool_name));
                state.last_failure = ExhaustionCause::NoValidResponse;
                continue;
            }

            state.last_command = Some(plan.command.clone());
            if self.executor.policy().dry_run {
                info!("dry run: command not executed");
                return self.finish(RunStatus::DryRun, state, history, files);
            }

            match self.executor.execute(&plan.command) {
                Execution::Declined => {
                    return self.finish(RunStatus::Cancelled, state, history, files);
                }
                Execution::Completed(outcome) if outcome.succeeded => {
                    ui::print_output(&outcome.output);
                    return self.finish(RunStatus::Succeeded, state, history, files);
                }
                Execution::Completed(outcome) => {
                    ui::print_failure(&outcome.output);
                    let (next, report) =
                        after_failed_execution(history, &plan.command, &outcome.output);
                    history = next;
                    state.last_failure = ExhaustionCause::CommandKeptFailing;
                    if state.attempt < self.max_attempts {
                        state.pending_user_message = Some(report);
                    }
                }
            }
        }

        let cause = state.last_failure;
        self.finish(RunStatus::AttemptsExhausted(cause), state, history, files)
    }

    fn finish(
        &self,
        status: RunStatus,
        state: AttemptState,
        history: Conversation,
        files: FileContext,
    ) -> RunReport {
        info!(attempts = state.attempt, status = %status, "run finished");
        RunReport {
            status,
            attempts: state.attempt,
            history,
            files,
            last_command: state.last_command,
        }
    }
}
