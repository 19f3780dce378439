//! Agent-facing command tools.

use std::{borrow::Cow, fmt::Write as _, sync::Arc, time::Duration};

use executor_core::Executor;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use windtools_core::{Tool, json};

use crate::{
    ApprovalPolicy, CommandRegistry, CommandRequest, CommandStatus, RequireApproval,
    window::{DEFAULT_CHAR_BUDGET, Priority},
};

/// Registers a command and starts it if the approval policy allows.
///
/// With `blocking` and a positive `wait_ms` the call waits up to that long for the command to
/// finish before reporting. It never waits for completion beyond that.
#[derive(Debug, Clone)]
pub struct RunCommandTool<E> {
    registry: CommandRegistry<E>,
    policy: Arc<dyn ApprovalPolicy>,
}

impl<E> RunCommandTool<E> {
    /// Creates the tool with the [`RequireApproval`] policy.
    #[must_use]
    pub fn new(registry: CommandRegistry<E>) -> Self {
        Self {
            registry,
            policy: Arc::new(RequireApproval),
        }
    }

    /// Replaces the approval policy.
    #[must_use]
    pub fn with_policy(mut self, policy: impl ApprovalPolicy + 'static) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    /// Uses a shared approval policy.
    #[must_use]
    pub fn with_shared_policy(mut self, policy: Arc<dyn ApprovalPolicy>) -> Self {
        self.policy = policy;
        self
    }
}

#[derive(Debug, Serialize)]
struct Pending<'a> {
    command_id: &'a str,
    status: CommandStatus,
    message: &'static str,
}

/// Waits when asked to, then renders the command's bottom window.
async fn report<E>(
    registry: &CommandRegistry<E>,
    id: &str,
    wait_ms: u64,
) -> windtools_core::Result {
    if wait_ms > 0 {
        registry.wait(id, Duration::from_millis(wait_ms)).await?;
    }
    let snapshot = registry.status(id, Priority::Bottom, DEFAULT_CHAR_BUDGET)?;
    Ok(json(&snapshot))
}

impl<E: Executor + Clone + Send + Sync + 'static> Tool for RunCommandTool<E> {
    fn name(&self) -> Cow<'static, str> {
        "run_command".into()
    }

    fn description(&self) -> Cow<'static, str> {
        "Runs a program with literal arguments (no shell) in a confined working directory. \
         Returns a command_id; poll it with command_status. Commands may need \
         approve_command before they start."
            .into()
    }

    type Arguments = CommandRequest;

    async fn call(&self, request: Self::Arguments) -> windtools_core::Result {
        let approved = self.policy.approves(&request);
        let wait_ms = if request.blocking { request.wait_ms } else { 0 };
        let id = self.registry.register(request)?;

        if !approved {
            return Ok(json(&Pending {
                command_id: &id,
                status: CommandStatus::PendingApproval,
                message: "Command is waiting for approval; start it with approve_command",
            }));
        }

        self.registry.start(&id)?;
        report(&self.registry, &id, wait_ms).await
    }
}

/// Starts a command that is pending approval.
#[derive(Debug, Clone)]
pub struct ApproveCommandTool<E> {
    registry: CommandRegistry<E>,
}

impl<E> ApproveCommandTool<E> {
    /// Creates the tool over the given registry.
    #[must_use]
    pub const fn new(registry: CommandRegistry<E>) -> Self {
        Self { registry }
    }
}

/// Arguments for [`ApproveCommandTool`].
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ApproveCommandArgs {
    /// Identifier returned by `run_command`.
    pub command_id: String,
    /// Wait up to this many milliseconds for the command to finish.
    #[serde(default)]
    pub wait_ms: u64,
}

impl<E: Executor + Clone + Send + Sync + 'static> Tool for ApproveCommandTool<E> {
    fn name(&self) -> Cow<'static, str> {
        "approve_command".into()
    }

    fn description(&self) -> Cow<'static, str> {
        "Approves and starts a command registered by run_command.".into()
    }

    type Arguments = ApproveCommandArgs;

    async fn call(&self, args: Self::Arguments) -> windtools_core::Result {
        self.registry.start(&args.command_id)?;
        report(&self.registry, &args.command_id, args.wait_ms).await
    }
}

/// Reports a command's status with a window of its output.
#[derive(Debug, Clone)]
pub struct CommandStatusTool<E> {
    registry: CommandRegistry<E>,
}

impl<E> CommandStatusTool<E> {
    /// Creates the tool over the given registry.
    #[must_use]
    pub const fn new(registry: CommandRegistry<E>) -> Self {
        Self { registry }
    }
}

const fn default_budget() -> usize {
    DEFAULT_CHAR_BUDGET
}

/// Arguments for [`CommandStatusTool`].
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CommandStatusArgs {
    /// Identifier returned by `run_command`.
    pub command_id: String,
    /// Which end of the output to return.
    #[serde(default)]
    pub output_priority: Priority,
    /// Maximum number of output characters to return.
    #[serde(default = "default_budget")]
    pub output_character_count: usize,
}

impl<E: Send + Sync + 'static> Tool for CommandStatusTool<E> {
    fn name(&self) -> Cow<'static, str> {
        "command_status".into()
    }

    fn description(&self) -> Cow<'static, str> {
        "Returns a command's status, runtime and the first (top) or last (bottom) \
         characters of its output."
            .into()
    }

    type Arguments = CommandStatusArgs;

    async fn call(&self, args: Self::Arguments) -> windtools_core::Result {
        let snapshot = self.registry.status(
            &args.command_id,
            args.output_priority,
            args.output_character_count,
        )?;
        Ok(json(&snapshot))
    }
}

/// Lists every registered command.
#[derive(Debug, Clone)]
pub struct ListCommandsTool<E> {
    registry: CommandRegistry<E>,
}

impl<E> ListCommandsTool<E> {
    /// Creates the tool over the given registry.
    #[must_use]
    pub const fn new(registry: CommandRegistry<E>) -> Self {
        Self { registry }
    }
}

/// Arguments for [`ListCommandsTool`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ListCommandsArgs {
    /// Only list commands with this status.
    #[serde(default)]
    pub status: Option<CommandStatus>,
}

impl<E: Send + Sync + 'static> Tool for ListCommandsTool<E> {
    fn name(&self) -> Cow<'static, str> {
        "list_commands".into()
    }

    fn description(&self) -> Cow<'static, str> {
        "Lists registered commands with their status and runtime.".into()
    }

    type Arguments = ListCommandsArgs;

    async fn call(&self, args: Self::Arguments) -> windtools_core::Result {
        let commands: Vec<_> = self
            .registry
            .list()
            .into_iter()
            .filter(|command| args.status.is_none_or(|status| command.status == status))
            .collect();
        if commands.is_empty() {
            return Ok("No commands registered.".into());
        }

        let mut output = String::new();
        for command in commands {
            let _ = writeln!(
                output,
                "{}\t{}\t{:.1}s\t{}",
                command.command_id, command.status, command.runtime_seconds, command.command_line
            );
        }
        Ok(output)
    }
}
