//! Approval policies for registered commands.
//!
//! Every command is registered as `pending_approval`. A policy decides whether
//! `run_command` may start it right away; otherwise it waits for `approve_command`.

use std::collections::BTreeSet;

use crate::CommandRequest;

/// Decides whether a freshly registered command starts without an explicit approval.
pub trait ApprovalPolicy: Send + Sync + std::fmt::Debug {
    /// Returns `true` if the command may start immediately.
    fn approves(&self, request: &CommandRequest) -> bool;
}

/// Every command waits for `approve_command`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequireApproval;

impl ApprovalPolicy for RequireApproval {
    fn approves(&self, _request: &CommandRequest) -> bool {
        false
    }
}

/// Every command starts immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

impl ApprovalPolicy for AutoApprove {
    fn approves(&self, _request: &CommandRequest) -> bool {
        true
    }
}

/// Commands whose program is on the list start immediately; the rest wait.
///
/// Matching is on the program name only, never on arguments.
#[derive(Debug, Clone, Default)]
pub struct ApproveListed {
    programs: BTreeSet<String>,
}

impl ApproveListed {
    /// Creates a policy approving the given program names.
    pub fn new<I, S>(programs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            programs: programs
                .into_iter()
                .map(Into::into)
                .filter(|program: &String| !program.is_empty())
                .collect(),
        }
    }

    /// The approved program names.
    pub fn programs(&self) -> impl Iterator<Item = &str> {
        self.programs.iter().map(String::as_str)
    }
}

impl ApprovalPolicy for ApproveListed {
    fn approves(&self, request: &CommandRequest) -> bool {
        self.programs.contains(&request.command)
    }
}
