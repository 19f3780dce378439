use std::{borrow::Cow, path::PathBuf, sync::Arc};

use parking_lot::RwLock;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::warn;
use windtools_core::{Error, NoArgs, Tool, json};
use windtools_sandbox::{RootRegistry, is_within};

use crate::{CodeIndex, KeywordIndex, SearchHit, indexer};

/// Whether the index is ready for queries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitializationStatus {
    /// At least one directory has been indexed successfully.
    pub is_initialized: bool,
    /// The last indexing failure, if any.
    pub error: Option<String>,
}

/// A code index together with its initialization status, shared by the search tools.
#[derive(Debug, Clone)]
pub struct SearchState {
    index: Arc<dyn CodeIndex>,
    status: Arc<RwLock<InitializationStatus>>,
}

impl Default for SearchState {
    fn default() -> Self {
        Self::new(KeywordIndex::new())
    }
}

impl SearchState {
    /// Wraps an uninitialized index.
    pub fn new(index: impl CodeIndex + 'static) -> Self {
        Self {
            index: Arc::new(index),
            status: Arc::default(),
        }
    }

    /// The underlying index.
    #[must_use]
    pub fn index(&self) -> &dyn CodeIndex {
        self.index.as_ref()
    }

    /// A copy of the current status.
    #[must_use]
    pub fn status(&self) -> InitializationStatus {
        self.status.read().clone()
    }

    /// Marks the index ready and clears any earlier error.
    pub fn mark_initialized(&self) {
        let mut status = self.status.write();
        status.is_initialized = true;
        status.error = None;
    }

    /// Records an initialization failure. The index stops answering queries until the next
    /// successful run.
    pub fn mark_failed(&self, error: impl Into<String>) {
        let mut status = self.status.write();
        status.is_initialized = false;
        status.error = Some(error.into());
    }

    fn ensure_ready(&self) -> Result<(), Error> {
        let status = self.status.read();
        if let Some(error) = &status.error {
            return Err(Error::Configuration(format!(
                "Code index failed to initialize: {error}"
            )));
        }
        if !status.is_initialized {
            return Err(Error::Configuration(
                "Code index is not yet initialized. Call index_directory first.".into(),
            ));
        }
        Ok(())
    }
}

/// Searches indexed code for chunks relevant to a query.
#[derive(Debug, Clone)]
pub struct CodebaseSearchTool {
    roots: RootRegistry,
    state: SearchState,
}

impl CodebaseSearchTool {
    /// Creates the tool.
    #[must_use]
    pub const fn new(roots: RootRegistry, state: SearchState) -> Self {
        Self { roots, state }
    }
}

const fn default_limit() -> usize {
    10
}

/// Arguments for [`CodebaseSearchTool`].
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CodebaseSearchArgs {
    /// What to look for, in identifiers or plain words.
    pub query: String,
    /// Restrict the search to these directories. Defaults to every allowed root.
    #[serde(default)]
    pub target_directories: Vec<String>,
    /// Maximum number of results.
    #[serde(default = "default_limit")]
    pub limit: usize,
}

#[derive(Debug, Serialize)]
struct SearchResults {
    results: Vec<SearchHit>,
}

impl Tool for CodebaseSearchTool {
    fn name(&self) -> Cow<'static, str> {
        "codebase_search".into()
    }

    fn description(&self) -> Cow<'static, str> {
        "Finds indexed code chunks relevant to a query. Requires index_directory first.".into()
    }

    type Arguments = CodebaseSearchArgs;

    async fn call(&self, args: Self::Arguments) -> windtools_core::Result {
        self.state.ensure_ready()?;

        let mut within = Vec::new();
        for raw in &args.target_directories {
            match self.roots.validate(raw) {
                Ok(dir) if dir.is_dir() => within.push(dir),
                Ok(_) | Err(Error::NotFound(_)) => {}
                Err(error) => return Err(error.into()),
            }
        }
        if !args.target_directories.is_empty() && within.is_empty() {
            return Ok(json(&SearchResults {
                results: Vec::new(),
            }));
        }

        let roots = self.roots.roots();
        let results = self
            .state
            .index()
            .lookup(&args.query, &within, args.limit)
            .into_iter()
            .filter(|hit| is_within(&hit.chunk.path, &roots))
            .collect();
        Ok(json(&SearchResults { results }))
    }
}

/// Indexes a directory so `codebase_search` can find its contents.
#[derive(Debug, Clone)]
pub struct IndexDirectoryTool {
    roots: RootRegistry,
    state: SearchState,
}

impl IndexDirectoryTool {
    /// Creates the tool.
    #[must_use]
    pub const fn new(roots: RootRegistry, state: SearchState) -> Self {
        Self { roots, state }
    }
}

/// Arguments for [`IndexDirectoryTool`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct IndexDirectoryArgs {
    /// Directory to index. Defaults to the working directory.
    #[serde(default)]
    pub path: Option<String>,
}

impl IndexDirectoryTool {
    fn resolve(&self, raw: Option<&str>) -> Result<PathBuf, Error> {
        let path = match raw.map(str::trim) {
            Some(raw) if !raw.is_empty() => self.roots.validate(raw)?,
            _ => {
                let working_dir = self.roots.require_working_dir()?;
                self.roots.validate(&working_dir.to_string_lossy())?
            }
        };
        if !path.is_dir() {
            return Err(Error::not_found(format!(
                "Directory does not exist: {}",
                path.display()
            )));
        }
        Ok(path)
    }
}

impl Tool for IndexDirectoryTool {
    fn name(&self) -> Cow<'static, str> {
        "index_directory".into()
    }

    fn description(&self) -> Cow<'static, str> {
        "Indexes the text files below a directory for codebase_search.".into()
    }

    type Arguments = IndexDirectoryArgs;

    async fn call(&self, args: Self::Arguments) -> windtools_core::Result {
        let dir = match self.resolve(args.path.as_deref()) {
            Ok(dir) => dir,
            Err(error) => {
                warn!(error = %error, "index_directory refused");
                return Err(error.into());
            }
        };

        let state = self.state.clone();
        let walked = dir.clone();
        let report =
            blocking::unblock(move || indexer::index_directory(state.index(), &walked)).await;
        self.state.mark_initialized();
        Ok(format!(
            "Indexed {} files ({} chunks, {} skipped) under {}",
            report.files,
            report.chunks,
            report.skipped,
            dir.display()
        ))
    }
}

/// Reports whether the code index is ready.
#[derive(Debug, Clone)]
pub struct InitializationStatusTool {
    state: SearchState,
}

impl InitializationStatusTool {
    /// Creates the tool.
    #[must_use]
    pub const fn new(state: SearchState) -> Self {
        Self { state }
    }
}

impl Tool for InitializationStatusTool {
    fn name(&self) -> Cow<'static, str> {
        "get_initialization_status".into()
    }

    fn description(&self) -> Cow<'static, str> {
        "Reports whether the code index is initialized and the last error, if any.".into()
    }

    type Arguments = NoArgs;

    async fn call(&self, _args: Self::Arguments) -> windtools_core::Result {
        Ok(json(&self.state.status()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use windtools_core::Tools;

    fn setup() -> (tempfile::TempDir, RootRegistry, SearchState, Tools) {
        let dir = tempfile::tempdir().unwrap();
        let roots = RootRegistry::new();
        roots
            .set_working_root(&dir.path().to_string_lossy())
            .unwrap();
        let state = SearchState::default();

        let mut tools = Tools::new();
        tools.register(CodebaseSearchTool::new(roots.clone(), state.clone()));
        tools.register(IndexDirectoryTool::new(roots.clone(), state.clone()));
        tools.register(InitializationStatusTool::new(state.clone()));
        (dir, roots, state, tools)
    }

    fn parse(output: &str) -> serde_json::Value {
        serde_json::from_str(output).unwrap()
    }

    #[tokio::test]
    async fn search_requires_initialization() {
        let (_dir, _roots, _state, tools) = setup();

        let status = parse(&tools.call("get_initialization_status", "{}").await.unwrap());
        assert_eq!(status["is_initialized"], false);
        assert!(status["error"].is_null());

        let output = tools
            .dispatch("codebase_search", r#"{"query": "anything"}"#)
            .await;
        assert!(
            parse(&output)["error"]
                .as_str()
                .unwrap()
                .contains("not yet initialized")
        );
    }

    #[tokio::test]
    async fn failure_is_reported() {
        let (_dir, _roots, state, tools) = setup();
        state.mark_failed("Test error message");

        let status = parse(&tools.call("get_initialization_status", "{}").await.unwrap());
        assert_eq!(status["is_initialized"], false);
        assert_eq!(status["error"], "Test error message");
    }

    #[tokio::test]
    async fn indexes_and_searches() {
        let (_dir, roots, _state, tools) = setup();
        let root = roots.working_dir().unwrap();
        std::fs::create_dir(root.join("src")).unwrap();
        std::fs::write(
            root.join("src/config.rs"),
            "pub fn load_config(path: &Path) -> Config {\n    todo!()\n}\n",
        )
        .unwrap();
        std::fs::write(root.join("README.md"), "Nothing relevant here.\n").unwrap();

        let message = tools.call("index_directory", "{}").await.unwrap();
        assert!(message.starts_with("Indexed 2 files"));

        let status = parse(&tools.call("get_initialization_status", "{}").await.unwrap());
        assert_eq!(status["is_initialized"], true);

        let results = parse(
            &tools
                .call("codebase_search", r#"{"query": "loadConfig"}"#)
                .await
                .unwrap(),
        );
        let results = results["results"].as_array().unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0]["path"].as_str().unwrap().ends_with("config.rs"));
        assert_eq!(results[0]["start_line"], 1);
    }

    #[tokio::test]
    async fn missing_target_directory_yields_no_results() {
        let (_dir, _roots, _state, tools) = setup();
        tools.call("index_directory", "{}").await.unwrap();

        let output = parse(
            &tools
                .call(
                    "codebase_search",
                    r#"{"query": "x", "target_directories": ["does-not-exist"]}"#,
                )
                .await
                .unwrap(),
        );
        assert_eq!(output["results"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn missing_nested_target_directory_yields_no_results() {
        let (_dir, roots, _state, tools) = setup();
        let root = roots.working_dir().unwrap();
        std::fs::write(root.join("lib.rs"), "fn missing_deeper() {}\n").unwrap();
        tools.call("index_directory", "{}").await.unwrap();

        let output = parse(
            &tools
                .call(
                    "codebase_search",
                    r#"{"query": "missing_deeper", "target_directories": ["missing/deeper"]}"#,
                )
                .await
                .unwrap(),
        );
        assert_eq!(output["results"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn target_directories_are_confined() {
        let (_dir, _roots, _state, tools) = setup();
        tools.call("index_directory", "{}").await.unwrap();
        let outside = tempfile::tempdir().unwrap();

        let args = serde_json::json!({
            "query": "x",
            "target_directories": [outside.path()],
        })
        .to_string();
        let output = tools.dispatch("codebase_search", args).await;
        assert!(
            parse(&output)["error"]
                .as_str()
                .unwrap()
                .starts_with("Access denied")
        );
    }
}
