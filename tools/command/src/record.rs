//! Per-command state.

use std::{fmt, path::PathBuf, time::Instant};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use windtools_core::Error;

/// Characters of stderr kept for the failure message of a non-zero exit.
const STDERR_TAIL_CHARS: usize = 2000;

/// Lifecycle of a command.
///
/// `PendingApproval -> Running -> Completed | Failed`. A spawn failure goes straight from
/// `PendingApproval` to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    /// Registered, waiting for an explicit start.
    PendingApproval,
    /// The process is running and output is still growing.
    Running,
    /// The process exited with code 0.
    Completed,
    /// The process could not start, exited non-zero or was killed by a signal.
    Failed,
}

impl CommandStatus {
    /// Returns `true` for `Completed` and `Failed`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// The snake_case name used on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PendingApproval => "pending_approval",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A command to register.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct CommandRequest {
    /// Program to run, looked up on `PATH`. Never interpreted by a shell.
    pub command: String,
    /// Arguments passed to the program verbatim.
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory. Defaults to the configured working directory.
    #[serde(default)]
    pub working_dir: Option<String>,
    /// Wait up to `wait_ms` for the command to finish before returning.
    #[serde(default)]
    pub blocking: bool,
    /// How long a blocking call may wait, in milliseconds.
    #[serde(default)]
    pub wait_ms: u64,
}

impl CommandRequest {
    /// Creates a request for `command` with `args`.
    pub fn new<I, S>(command: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into(),
            args: args.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Sets the working directory.
    #[must_use]
    pub fn in_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Makes registration wait up to `wait_ms` milliseconds.
    #[must_use]
    pub const fn blocking(mut self, wait_ms: u64) -> Self {
        self.blocking = true;
        self.wait_ms = wait_ms;
        self
    }

    /// The command line for display. Arguments are not quoted.
    #[must_use]
    pub fn command_line(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// One tracked command.
#[derive(Debug)]
pub(crate) struct CommandRecord {
    pub id: String,
    pub request: CommandRequest,
    pub working_dir: PathBuf,
    pub status: CommandStatus,
    /// Set once a start has been claimed, so two approvals cannot both spawn.
    pub approved: bool,
    chunks: Vec<String>,
    stderr_tail: String,
    pub error: Option<String>,
    pub exit_code: Option<i32>,
    pub started_at: Instant,
}

impl CommandRecord {
    pub fn new(id: String, request: CommandRequest, working_dir: PathBuf) -> Self {
        Self {
            id,
            request,
            working_dir,
            status: CommandStatus::PendingApproval,
            approved: false,
            chunks: Vec::new(),
            stderr_tail: String::new(),
            error: None,
            exit_code: None,
            started_at: Instant::now(),
        }
    }

    pub fn mark_running(&mut self) {
        self.status = CommandStatus::Running;
        self.started_at = Instant::now();
    }

    /// Appends output. Ignored unless the command is running, so terminal output is frozen.
    pub fn append(&mut self, text: String, from_stderr: bool) {
        if self.status != CommandStatus::Running || text.is_empty() {
            return;
        }
        if from_stderr {
            self.stderr_tail.push_str(&text);
            let excess = self.stderr_tail.chars().count().saturating_sub(STDERR_TAIL_CHARS);
            if excess > 0 {
                let cut = self
                    .stderr_tail
                    .char_indices()
                    .nth(excess)
                    .map_or(self.stderr_tail.len(), |(index, _)| index);
                self.stderr_tail.drain(..cut);
            }
        }
        self.chunks.push(text);
    }

    pub fn output(&self) -> String {
        self.chunks.concat()
    }

    pub fn complete(&mut self) {
        self.status = CommandStatus::Completed;
        self.exit_code = Some(0);
    }

    /// Records a failed exit. `code` is `None` when the process was killed by a signal.
    pub fn fail_exit(&mut self, code: Option<i32>) {
        let mut message = code.map_or_else(
            || "Process terminated by a signal".to_string(),
            |code| format!("Process exited with code {code}"),
        );
        let tail = self.stderr_tail.trim();
        if !tail.is_empty() {
            message.push_str(": ");
            message.push_str(tail);
        }
        self.fail(&Error::Runtime(message));
        self.exit_code = code;
    }

    /// Records a failure that happened before or instead of a normal exit.
    pub fn fail(&mut self, error: &Error) {
        self.status = CommandStatus::Failed;
        self.error = Some(error.to_string());
    }

    pub fn runtime_seconds(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64()
    }
}

/// Incremental UTF-8 decoder that never splits a character across two chunks.
#[derive(Debug, Default)]
pub(crate) struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    /// Decodes as much of `bytes` (plus any carried prefix) as possible.
    ///
    /// An incomplete trailing sequence is kept for the next call; invalid bytes become
    /// U+FFFD.
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    return out;
                }
                Err(error) => {
                    let valid = error.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match error.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                        None => {
                            self.pending.drain(..valid);
                            return out;
                        }
                    }
                }
            }
        }
    }

    /// Flushes whatever is left once the stream ends.
    pub fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running() -> CommandRecord {
        let mut record = CommandRecord::new(
            "id".into(),
            CommandRequest::new("echo", ["hi"]),
            PathBuf::from("/tmp"),
        );
        record.mark_running();
        record
    }

    #[test]
    fn output_is_frozen_outside_running() {
        let mut record = CommandRecord::new(
            "id".into(),
            CommandRequest::new("echo", ["hi"]),
            PathBuf::from("/tmp"),
        );
        record.append("early".into(), false);
        assert_eq!(record.output(), "");

        record.mark_running();
        record.append("a".into(), false);
        record.append("b".into(), true);
        record.complete();
        record.append("late".into(), false);
        assert_eq!(record.output(), "ab");
    }

    #[test]
    fn failed_exit_carries_stderr_tail() {
        let mut record = running();
        record.append("building\n".into(), false);
        record.append("error: missing file\n".into(), true);
        record.fail_exit(Some(2));

        assert_eq!(record.status, CommandStatus::Failed);
        assert_eq!(record.exit_code, Some(2));
        assert_eq!(
            record.error.as_deref(),
            Some("Process exited with code 2: error: missing file")
        );
    }

    #[test]
    fn stderr_tail_is_bounded() {
        let mut record = running();
        record.append("x".repeat(STDERR_TAIL_CHARS), true);
        record.append("é".repeat(10), true);
        assert_eq!(record.stderr_tail.chars().count(), STDERR_TAIL_CHARS);
        assert!(record.stderr_tail.ends_with("éééééééééé"));
    }

    #[test]
    fn carry_joins_split_characters() {
        let bytes = "héllo".as_bytes();
        let mut carry = Utf8Carry::default();
        let first = carry.push(&bytes[..2]);
        let second = carry.push(&bytes[2..]);
        assert_eq!(first, "h");
        assert_eq!(second, "éllo");
        assert_eq!(carry.finish(), "");
    }

    #[test]
    fn carry_replaces_invalid_bytes() {
        let mut carry = Utf8Carry::default();
        assert_eq!(carry.push(b"a\xffb"), "a\u{fffd}b");
        assert_eq!(carry.push(b"\xe2\x82"), "");
        assert_eq!(carry.finish(), "\u{fffd}");
    }

    #[test]
    fn status_names() {
        assert_eq!(CommandStatus::PendingApproval.to_string(), "pending_approval");
        assert!(CommandStatus::Failed.is_terminal());
        assert!(!CommandStatus::Running.is_terminal());
        assert_eq!(
            CommandRequest::new("git", ["log", "-1"]).command_line(),
            "git log -1"
        );
    }
}
