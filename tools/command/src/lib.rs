//! Approval-gated command execution for agents.
//!
//! A command goes through three steps:
//!
//! 1. [`CommandRegistry::register`] validates the working directory against the roots and
//!    records the command as `pending_approval`.
//! 2. [`CommandRegistry::start`] spawns the program with a literal argument vector. No shell
//!    is involved, so arguments such as `; rm -rf /` stay arguments.
//! 3. Background tasks append stdout and stderr to the record as they arrive, and the record
//!    turns `completed` or `failed` when the process exits.
//!
//! Callers poll with [`CommandRegistry::status`], which returns a [`window`] of the output
//! anchored at the top or bottom.
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use executor_core::tokio::TokioGlobal;
//! use windtools_command::{CommandRegistry, CommandRequest, Priority};
//! use windtools_sandbox::RootRegistry;
//!
//! # async fn demo() -> Result<(), windtools_core::Error> {
//! let roots = RootRegistry::new();
//! roots.set_working_root("/workspace")?;
//!
//! let commands = CommandRegistry::new(roots, TokioGlobal);
//! let id = commands.register(CommandRequest::new("cargo", ["test"]))?;
//! commands.start(&id)?;
//! commands.wait(&id, Duration::from_secs(1)).await?;
//!
//! let snapshot = commands.status(&id, Priority::Bottom, 2000)?;
//! println!("{}: {}", snapshot.status, snapshot.output);
//! # Ok(())
//! # }
//! ```

mod approval;
mod record;
mod registry;
mod tools;

/// Output windows.
pub mod window;

pub use approval::{ApprovalPolicy, ApproveListed, AutoApprove, RequireApproval};
pub use record::{CommandRequest, CommandStatus};
pub use registry::{CommandRegistry, CommandSummary};
pub use tools::{
    ApproveCommandArgs, ApproveCommandTool, CommandStatusArgs, CommandStatusTool,
    ListCommandsArgs, ListCommandsTool, RunCommandTool,
};
pub use window::{CommandSnapshot, DEFAULT_CHAR_BUDGET, Priority};
