//! Root administration tools.
//!
//! These mutate the [`RootRegistry`] and are meant for the operator or a trusted agent;
//! every other tool only reads it.

use std::borrow::Cow;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use windtools_core::{NoArgs, Tool};

use crate::RootRegistry;

/// Arguments naming one directory.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RootArgs {
    /// Directory path. Absolute, relative to the working directory, or starting with `~`.
    pub path: String,
}

/// Set the working directory, creating it if needed.
#[derive(Debug, Clone)]
pub struct SetWorkingRootTool {
    roots: RootRegistry,
}

impl SetWorkingRootTool {
    /// Creates the tool over the given registry.
    #[must_use]
    pub const fn new(roots: RootRegistry) -> Self {
        Self { roots }
    }
}

impl Tool for SetWorkingRootTool {
    fn name(&self) -> Cow<'static, str> {
        "set_working_root".into()
    }

    fn description(&self) -> Cow<'static, str> {
        "Sets the working directory that file and command tools are confined to. \
         The directory is created if it does not exist."
            .into()
    }

    type Arguments = RootArgs;

    async fn call(&self, args: Self::Arguments) -> windtools_core::Result {
        Ok(self.roots.set_working_root(&args.path)?)
    }
}

/// Add a directory to the allowed roots.
#[derive(Debug, Clone)]
pub struct AddAllowedRootTool {
    roots: RootRegistry,
}

impl AddAllowedRootTool {
    /// Creates the tool over the given registry.
    #[must_use]
    pub const fn new(roots: RootRegistry) -> Self {
        Self { roots }
    }
}

impl Tool for AddAllowedRootTool {
    fn name(&self) -> Cow<'static, str> {
        "add_allowed_root".into()
    }

    fn description(&self) -> Cow<'static, str> {
        "Adds an existing directory to the allowed roots.".into()
    }

    type Arguments = RootArgs;

    async fn call(&self, args: Self::Arguments) -> windtools_core::Result {
        Ok(self.roots.add_allowed_root(&args.path)?)
    }
}

/// Remove a directory from the allowed roots.
#[derive(Debug, Clone)]
pub struct RemoveAllowedRootTool {
    roots: RootRegistry,
}

impl RemoveAllowedRootTool {
    /// Creates the tool over the given registry.
    #[must_use]
    pub const fn new(roots: RootRegistry) -> Self {
        Self { roots }
    }
}

impl Tool for RemoveAllowedRootTool {
    fn name(&self) -> Cow<'static, str> {
        "remove_allowed_root".into()
    }

    fn description(&self) -> Cow<'static, str> {
        "Removes a directory from the allowed roots. If it holds the working directory, \
         the working directory is unset."
            .into()
    }

    type Arguments = RootArgs;

    async fn call(&self, args: Self::Arguments) -> windtools_core::Result {
        Ok(self.roots.remove_allowed_root(&args.path)?)
    }
}

/// Show the allowed roots and working directory.
#[derive(Debug, Clone)]
pub struct ListAllowedRootsTool {
    roots: RootRegistry,
}

impl ListAllowedRootsTool {
    /// Creates the tool over the given registry.
    #[must_use]
    pub const fn new(roots: RootRegistry) -> Self {
        Self { roots }
    }
}

impl Tool for ListAllowedRootsTool {
    fn name(&self) -> Cow<'static, str> {
        "list_allowed_roots".into()
    }

    fn description(&self) -> Cow<'static, str> {
        "Lists the allowed roots and the current working directory.".into()
    }

    type Arguments = NoArgs;

    async fn call(&self, _args: Self::Arguments) -> windtools_core::Result {
        Ok(self.roots.list_roots())
    }
}
