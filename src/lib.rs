//! # windtools
//!
//! Sandboxed file and command tools for coding agents.
//!
//! An agent gets plain, string-returning tools for browsing, reading, writing and searching a
//! codebase and for running programs. Two guarantees hold for every call:
//!
//! - **Path confinement.** Every path goes through [`sandbox`]'s gate before storage is
//!   touched: it must lie under a configured root both as written and after symlinks are
//!   resolved. Paths that do not exist yet are admitted through their nearest existing
//!   parent.
//! - **Bounded commands.** Programs run with a literal argument vector (never a shell),
//!   start only after approval, and are polled through a character-bounded window of their
//!   output. No call waits on a process longer than the `wait_ms` it asked for.
//!
//! ## Example
//!
//! ```rust,no_run
//! use executor_core::tokio::TokioGlobal;
//! use windtools::{ServerConfig, ServerState};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ServerConfig::from_env()?.allow("/workspace");
//! let state = ServerState::new(&config, TokioGlobal);
//!
//! state.call("set_working_root", r#"{"path": "/workspace/project"}"#).await;
//! let listing = state.call("list_dir", "{}").await;
//! println!("{listing}");
//!
//! let started = state
//!     .call("run_command", r#"{"command": "cargo", "args": ["check"]}"#)
//!     .await;
//! println!("{started}");
//! # Ok(())
//! # }
//! ```
//!
//! ## Crates
//!
//! - [`Tool`], [`Tools`] and [`Error`] come from `windtools-core` and are re-exported here.
//! - [`sandbox`] normalizes and confines paths and owns the root configuration.
//! - [`fs`] holds the file tools.
//! - [`command`] runs and tracks external programs.
//! - [`search`] holds the code index interface and search tools.

mod config;
mod state;

pub use config::{
    ALLOWED_DIRECTORIES, APPROVED_COMMANDS, AUTO_APPROVE, ConfigError, FOLLOW_PROCESS_DIR,
    INDEX_ON_START, ServerConfig,
};
pub use state::ServerState;

pub use windtools_command as command;
pub use windtools_fs as fs;
pub use windtools_sandbox as sandbox;
pub use windtools_search as search;

pub use windtools_core::{Error, Result, Tool, ToolDefinition, Tools};
