use std::io;

/// Failure categories shared by every windtools tool.
///
/// Tools return [`anyhow::Error`]; these variants are what ends up inside it, so callers can
/// `downcast_ref::<Error>()` when they need to branch on the category.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No working root or allowed roots are configured, or the configuration forbids the request.
    #[error("{0}")]
    Configuration(String),

    /// The path resolves outside the configured roots.
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// A file, directory or command identifier does not exist.
    #[error("{0}")]
    NotFound(String),

    /// The request is well-formed but cannot be applied to its target.
    #[error("{0}")]
    InvalidArgument(String),

    /// The target already exists and would be overwritten.
    #[error("{0}")]
    AlreadyExists(String),

    /// The external process could not be started.
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        /// Program that failed to start.
        command: String,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// The external process ran but reported failure.
    #[error("{0}")]
    Runtime(String),

    /// Any other I/O failure.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// Shorthand for [`Error::NotFound`].
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Shorthand for [`Error::InvalidArgument`].
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }
}
