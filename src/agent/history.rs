use crate::agent::provider::{Message, Role};

/// Ordered user/assistant exchange. Every transition consumes the old value and
/// returns the next one, so each step can be tested as a plain function.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conversation {
    entries: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[Message] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    pub fn last(&self) -> Option<&Message> {
        self.entries.last()
    }

    /// Appends a user entry unless the last entry is the identical user entry.
    pub fn with_user(self, content: impl Into<String>) -> Self {
        self.with_entry(Message::user(content))
    }

    pub fn with_assistant(self, content: impl Into<String>) -> Self {
        self.with_entry(Message::assistant(content))
    }

    /// Withdraws a just-committed assistant answer. No-op if the last entry is
    /// not from the assistant.
    pub fn without_trailing_assistant(mut self) -> Self {
        if self.entries.last().is_some_and(|m| m.role == Role::Assistant) {
            self.entries.pop();
        }
        self
    }

    fn with_entry(mut self, entry: Message) -> Self {
        if self.entries.last() != Some(&entry) {
            self.entries.push(entry);
        }
        self
    }
}

/// User entry asking the service to resend a structured payload.
pub fn invalid_response_prompt(raw_response: &str, reason: &str) -> String {
    format!(
        "The previous response was not valid: {reason}. Reply strictly with a JSON object \
         containing \"explanation\" and \"command\".\nPrevious invalid response:\n{raw_response}"
    )
}

/// User entry describing a command that was executed and failed.
pub fn failed_command_prompt(command: &str, output: &str) -> String {
    let output = if output.trim().is_empty() {
        "Command failed with no specific output."
    } else {
        output
    };
    format!(
        "The last command attempt failed:\nCommand: `{command}`\nError Output:\n```\n{output}\n```\n\
         Analyze the error together with the original request and provide a corrected command."
    )
}

/// User entry rejecting a command that never calls the media tool.
pub fn foreign_command_prompt(command: &str, tool: &str) -> String {
    format!(
        "The previous command does not invoke {tool}: `{command}`. Return a command that \
         uses {tool} to fulfil the original request, or an empty command if it cannot be done."
    )
}

/// History transition after a command failed: the assistant answer carrying it
/// is withdrawn and the failure report becomes the next pending user entry.
pub fn after_failed_execution(
    history: Conversation,
    command: &str,
    output: &str,
) -> (Conversation, String) {
    (
        history.without_trailing_assistant(),
        failed_command_prompt(command, output),
    )
}
