//! # windtools-core
//!
//! Shared building blocks for the windtools crates:
//!
//! - [`Tool`] and [`Tools`] - the typed tool interface and a name-keyed registry that
//!   accepts JSON arguments and always answers with text.
//! - [`Error`] - the error taxonomy every tool reports through.
//!
//! ```rust
//! use std::borrow::Cow;
//! use windtools_core::{Tool, Tools};
//! use schemars::JsonSchema;
//! use serde::Deserialize;
//!
//! #[derive(JsonSchema, Deserialize)]
//! struct EchoArgs {
//!     /// Text to send back.
//!     text: String,
//! }
//!
//! struct Echo;
//!
//! impl Tool for Echo {
//!     fn name(&self) -> Cow<'static, str> {
//!         "echo".into()
//!     }
//!     fn description(&self) -> Cow<'static, str> {
//!         "Returns its input".into()
//!     }
//!     type Arguments = EchoArgs;
//!
//!     async fn call(&self, args: Self::Arguments) -> windtools_core::Result {
//!         Ok(args.text)
//!     }
//! }
//!
//! let mut tools = Tools::new();
//! tools.register(Echo);
//! assert_eq!(tools.definitions().len(), 1);
//! ```

mod error;
pub mod tool;

pub use error::Error;
pub use tool::{NoArgs, Tool, ToolDefinition, Tools, json};

/// Result type used throughout the workspace.
///
/// Type alias for [`anyhow::Result<T>`](anyhow::Result) with [`String`] as default success type.
pub type Result<T = String> = anyhow::Result<T>;
