//! Server configuration.

use serde::{Deserialize, Serialize};

/// Comma-separated directories the agent may access.
pub const ALLOWED_DIRECTORIES: &str = "ALLOWED_DIRECTORIES";
/// Start every command without asking.
pub const AUTO_APPROVE: &str = "WINDTOOLS_AUTO_APPROVE";
/// Comma-separated program names that start without asking.
pub const APPROVED_COMMANDS: &str = "WINDTOOLS_APPROVED_COMMANDS";
/// Change the process directory along with the working root.
pub const FOLLOW_PROCESS_DIR: &str = "WINDTOOLS_FOLLOW_PROCESS_DIR";
/// Index the allowed roots when the server state is created.
pub const INDEX_ON_START: &str = "WINDTOOLS_INDEX_ON_START";

/// Error raised while reading configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A boolean variable held something other than a recognised flag.
    #[error("{var} must be one of 1/0, true/false, yes/no or on/off, got '{value}'")]
    InvalidFlag {
        /// Variable name.
        var: &'static str,
        /// Offending value.
        value: String,
    },
}

/// How the server is set up at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Directories the agent may access. Empty leaves the server unconfigured until a
    /// working root is set.
    pub allowed_directories: Vec<String>,
    /// Start every command without an explicit approval.
    pub auto_approve: bool,
    /// Programs that start without an explicit approval.
    pub approved_commands: Vec<String>,
    /// Change the process current directory whenever the working root changes.
    pub follow_process_dir: bool,
    /// Index the allowed roots for `codebase_search` on startup.
    pub index_on_start: bool,
}

impl ServerConfig {
    /// Creates an empty configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidFlag`] if a boolean variable cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the configuration through `lookup`, which maps a variable name to its value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidFlag`] if a boolean variable cannot be parsed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let flag = |var: &'static str| -> Result<bool, ConfigError> {
            lookup(var).map_or(Ok(false), |value| parse_flag(var, &value))
        };

        Ok(Self {
            allowed_directories: split_list(lookup(ALLOWED_DIRECTORIES).as_deref()),
            auto_approve: flag(AUTO_APPROVE)?,
            approved_commands: split_list(lookup(APPROVED_COMMANDS).as_deref()),
            follow_process_dir: flag(FOLLOW_PROCESS_DIR)?,
            index_on_start: flag(INDEX_ON_START)?,
        })
    }

    /// Adds an allowed directory.
    #[must_use]
    pub fn allow(mut self, dir: impl Into<String>) -> Self {
        self.allowed_directories.push(dir.into());
        self
    }

    /// Starts every command without an explicit approval.
    #[must_use]
    pub const fn with_auto_approve(mut self, auto: bool) -> Self {
        self.auto_approve = auto;
        self
    }

    /// Lets the given programs start without an explicit approval.
    #[must_use]
    pub fn with_approved_commands<I, S>(mut self, programs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.approved_commands = programs.into_iter().map(Into::into).collect();
        self
    }

    /// Changes the process directory together with the working root.
    #[must_use]
    pub const fn with_follow_process_dir(mut self, follow: bool) -> Self {
        self.follow_process_dir = follow;
        self
    }

    /// Indexes the allowed roots on startup.
    #[must_use]
    pub const fn with_index_on_start(mut self, index: bool) -> Self {
        self.index_on_start = index;
        self
    }
}

fn split_list(value: Option<&str>) -> Vec<String> {
    value
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn parse_flag(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "" | "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidFlag {
            var,
            value: value.to_string(),
        }),
    }
}
