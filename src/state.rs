//! The server context shared by every tool.

use std::sync::Arc;

use executor_core::Executor;
use tracing::{debug, info, warn};
use windtools_command::{
    ApprovalPolicy, ApproveCommandTool, ApproveListed, AutoApprove, CommandRegistry,
    CommandStatusTool, ListCommandsTool, RequireApproval, RunCommandTool,
};
use windtools_core::{ToolDefinition, Tools};
use windtools_fs::{
    CreateDirectoryTool, EditFileTool, FindByNameTool, GrepSearchTool, ListDirTool, ReadFileTool,
    RelatedFilesTool, ViewCodeItemTool, ViewFileTool, WriteToFileTool,
};
use windtools_sandbox::{
    RootRegistry,
    builtin::{AddAllowedRootTool, ListAllowedRootsTool, RemoveAllowedRootTool, SetWorkingRootTool},
};
use windtools_search::{
    CodebaseSearchTool, IndexDirectoryTool, InitializationStatusTool, SearchState, indexer,
};

use crate::ServerConfig;

/// Everything one server instance owns: roots, commands, the code index and the tools over
/// them.
///
/// Nothing is global, so several instances can live in one process without seeing each
/// other's roots or commands (unless `follow_process_dir` is turned on).
#[derive(Debug)]
pub struct ServerState<E> {
    roots: RootRegistry,
    commands: CommandRegistry<E>,
    search: SearchState,
    tools: Tools,
}

fn approval_policy(config: &ServerConfig) -> Arc<dyn ApprovalPolicy> {
    if config.auto_approve {
        Arc::new(AutoApprove)
    } else if config.approved_commands.is_empty() {
        Arc::new(RequireApproval)
    } else {
        Arc::new(ApproveListed::new(config.approved_commands.iter().cloned()))
    }
}

impl<E: Executor + Clone + Send + Sync + 'static> ServerState<E> {
    /// Builds the state from `config`, spawning command tasks on `executor`.
    ///
    /// Allowed directories that do not exist are skipped with a warning.
    pub fn new(config: &ServerConfig, executor: E) -> Self {
        let roots = RootRegistry::from_allowed(&config.allowed_directories)
            .follow_process_dir(config.follow_process_dir);
        let commands = CommandRegistry::new(roots.clone(), executor);
        let search = SearchState::default();
        let policy = approval_policy(config);

        let mut tools = Tools::new();
        tools.register(SetWorkingRootTool::new(roots.clone()));
        tools.register(AddAllowedRootTool::new(roots.clone()));
        tools.register(RemoveAllowedRootTool::new(roots.clone()));
        tools.register(ListAllowedRootsTool::new(roots.clone()));

        tools.register(ListDirTool::new(roots.clone()));
        tools.register(ReadFileTool::new(roots.clone()));
        tools.register(ViewFileTool::new(roots.clone()));
        tools.register(WriteToFileTool::new(roots.clone()));
        tools.register(CreateDirectoryTool::new(roots.clone()));
        tools.register(EditFileTool::new(roots.clone()));
        tools.register(FindByNameTool::new(roots.clone()));
        tools.register(GrepSearchTool::new(roots.clone()));
        tools.register(ViewCodeItemTool::new(roots.clone()));
        tools.register(RelatedFilesTool::new(roots.clone()));

        tools.register(RunCommandTool::new(commands.clone()).with_shared_policy(policy));
        tools.register(ApproveCommandTool::new(commands.clone()));
        tools.register(CommandStatusTool::new(commands.clone()));
        tools.register(ListCommandsTool::new(commands.clone()));

        tools.register(CodebaseSearchTool::new(roots.clone(), search.clone()));
        tools.register(IndexDirectoryTool::new(roots.clone(), search.clone()));
        tools.register(InitializationStatusTool::new(search.clone()));

        info!(
            roots = roots.roots().len(),
            tools = tools.names().len(),
            "server state ready"
        );

        let state = Self {
            roots,
            commands,
            search,
            tools,
        };
        if config.index_on_start {
            state.index_roots();
        }
        state
    }
}

impl<E> ServerState<E> {
    /// The root registry.
    #[must_use]
    pub const fn roots(&self) -> &RootRegistry {
        &self.roots
    }

    /// The command registry.
    #[must_use]
    pub const fn commands(&self) -> &CommandRegistry<E> {
        &self.commands
    }

    /// The code index and its status.
    #[must_use]
    pub const fn search(&self) -> &SearchState {
        &self.search
    }

    /// The registered tools.
    #[must_use]
    pub const fn tools(&self) -> &Tools {
        &self.tools
    }

    /// Definitions of every tool, for advertising to the agent.
    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.definitions()
    }

    /// Calls a tool by name with JSON arguments.
    ///
    /// Never fails: errors come back as `{"error": "..."}` so one bad call cannot take the
    /// server down.
    pub async fn call(&self, name: &str, args: impl Into<String>) -> String {
        debug!(tool = name, "tool call");
        self.tools.dispatch(name, args).await
    }

    /// Indexes every allowed root for `codebase_search`.
    ///
    /// Returns the number of files indexed. With no roots configured the index is marked
    /// as failed.
    pub fn index_roots(&self) -> usize {
        let roots = self.roots.roots();
        if roots.is_empty() {
            warn!("no roots to index");
            self.search
                .mark_failed("No allowed roots are configured; nothing to index");
            return 0;
        }

        let files: usize = roots
            .iter()
            .map(|root| indexer::index_directory(self.search.index(), root).files)
            .sum();
        self.search.mark_initialized();
        files
    }
}
