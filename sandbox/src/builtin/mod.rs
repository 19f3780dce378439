//! Built-in administration tools.
//!
//! - `set_working_root`: choose (and create) the working directory
//! - `add_allowed_root` / `remove_allowed_root`: edit the allow-list
//! - `list_allowed_roots`: show the current configuration

mod roots;

pub use roots::{
    AddAllowedRootTool, ListAllowedRootsTool, RemoveAllowedRootTool, RootArgs, SetWorkingRootTool,
};
