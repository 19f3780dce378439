//! The confinement gate: admit or deny a path against a set of roots.
//!
//! Validation runs in two stages. A lexical prefix test on the normalized path rejects
//! anything outside the roots before the file system is touched. The path is then resolved
//! with symlinks followed, and the real location must also lie under a root. Paths that do
//! not exist yet are admitted when their parent resolves inside a root, which is what lets
//! tools create new files without weakening the guarantee.

use std::{
    fmt::Write as _,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use tracing::{debug, warn};
use windtools_core::Error;

use crate::normalize::normalize;

/// Why a path was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfinementError {
    /// No root is configured.
    #[error(
        "No working directory or allowed roots are configured; cannot access '{path}'. Set a working directory or add an allowed root first."
    )]
    NoRootsConfigured {
        /// Path as supplied.
        path: String,
    },

    /// The supplied path cannot be turned into an absolute path.
    #[error("Cannot resolve path '{path}': {message}")]
    Unresolvable {
        /// Path as supplied.
        path: String,
        /// Underlying error.
        message: String,
    },

    /// The normalized path is not under any root.
    #[error("'{}' is outside the allowed roots ({})", path.display(), display_roots(roots))]
    OutsideRoot {
        /// Normalized path.
        path: PathBuf,
        /// Roots the path was checked against.
        roots: Vec<PathBuf>,
    },

    /// The path lies under a root but resolves elsewhere through a symlink.
    #[error(
        "'{}' is a symlink that resolves outside the allowed roots ({})",
        path.display(),
        display_roots(roots)
    )]
    SymlinkEscapesRoot {
        /// Normalized path.
        path: PathBuf,
        /// Roots the path was checked against.
        roots: Vec<PathBuf>,
    },

    /// The path is a symlink whose target does not exist.
    #[error("'{}' is a symlink whose target cannot be resolved", path.display())]
    DanglingSymlink {
        /// Normalized path.
        path: PathBuf,
    },

    /// The path does not exist and its parent resolves outside every root.
    #[error(
        "The parent directory of '{}' resolves outside the allowed roots ({})",
        path.display(),
        display_roots(roots)
    )]
    ParentOutsideRoot {
        /// Normalized path.
        path: PathBuf,
        /// Roots the path was checked against.
        roots: Vec<PathBuf>,
    },

    /// Neither the path nor its parent exists.
    #[error("The parent directory of '{}' does not exist", path.display())]
    ParentNotFound {
        /// Normalized path.
        path: PathBuf,
    },
}

impl From<ConfinementError> for Error {
    fn from(error: ConfinementError) -> Self {
        match error {
            ConfinementError::NoRootsConfigured { .. } => Self::Configuration(error.to_string()),
            ConfinementError::Unresolvable { .. } => Self::InvalidArgument(error.to_string()),
            ConfinementError::ParentNotFound { .. } => Self::NotFound(error.to_string()),
            ConfinementError::OutsideRoot { .. }
            | ConfinementError::SymlinkEscapesRoot { .. }
            | ConfinementError::DanglingSymlink { .. }
            | ConfinementError::ParentOutsideRoot { .. } => Self::AccessDenied(error.to_string()),
        }
    }
}

fn display_roots(roots: &[PathBuf]) -> String {
    let mut out = String::new();
    for (index, root) in roots.iter().enumerate() {
        if index > 0 {
            out.push_str(", ");
        }
        let _ = write!(out, "{}", root.display());
    }
    out
}

/// Returns `true` if `path` equals or descends from one of `roots`.
///
/// The comparison is component-wise, so `/workspace2` is not under `/workspace`.
#[must_use]
pub fn is_within(path: &Path, roots: &[PathBuf]) -> bool {
    roots.iter().any(|root| path.starts_with(root))
}

/// Like [`is_within`], but also accepts the real location of each root.
///
/// A root configured through a symlinked directory still admits the resolved paths beneath it.
fn is_within_resolved(real: &Path, roots: &[PathBuf]) -> bool {
    is_within(real, roots)
        || roots.iter().any(|root| {
            dunce::canonicalize(root).is_ok_and(|resolved| real.starts_with(resolved))
        })
}

/// Steps 1-3: configured roots, normalization, lexical prefix test.
fn admit(raw: &str, base: &Path, roots: &[PathBuf]) -> Result<PathBuf, ConfinementError> {
    if roots.is_empty() {
        return Err(ConfinementError::NoRootsConfigured {
            path: raw.to_string(),
        });
    }

    let path = normalize(raw, base).map_err(|error| ConfinementError::Unresolvable {
        path: raw.to_string(),
        message: error.to_string(),
    })?;

    if !is_within(&path, roots) {
        warn!(path = %path.display(), "path outside allowed roots");
        return Err(ConfinementError::OutsideRoot {
            path,
            roots: roots.to_vec(),
        });
    }

    Ok(path)
}

/// Existing path: the real location must be confined too.
fn check_resolved(
    path: PathBuf,
    real: PathBuf,
    roots: &[PathBuf],
) -> Result<PathBuf, ConfinementError> {
    if is_within_resolved(&real, roots) {
        Ok(real)
    } else {
        warn!(path = %path.display(), "symlink escapes allowed roots");
        Err(ConfinementError::SymlinkEscapesRoot {
            path,
            roots: roots.to_vec(),
        })
    }
}

/// A missing path that still has a directory entry is a dangling symlink.
fn reject_dangling(path: &Path) -> Result<(), ConfinementError> {
    if std::fs::symlink_metadata(path).is_ok() {
        warn!(path = %path.display(), "dangling symlink refused");
        return Err(ConfinementError::DanglingSymlink {
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

/// Validates `raw` against `roots`.
///
/// Relative paths are resolved against `base`. On success the returned path is the real,
/// symlink-free location when the path exists, or the normalized path when only its
/// parent exists.
///
/// # Errors
///
/// Returns the [`ConfinementError`] describing why the path is refused.
pub fn validate(raw: &str, base: &Path, roots: &[PathBuf]) -> Result<PathBuf, ConfinementError> {
    let path = admit(raw, base, roots)?;

    match dunce::canonicalize(&path) {
        Ok(real) => check_resolved(path, real, roots),
        Err(error) => {
            if error.kind() != ErrorKind::NotFound {
                debug!(path = %path.display(), error = %error, "falling back to parent resolution");
            }
            reject_dangling(&path)?;

            let Some(real_parent) = path
                .parent()
                .and_then(|parent| dunce::canonicalize(parent).ok())
            else {
                return Err(ConfinementError::ParentNotFound { path });
            };

            if is_within_resolved(&real_parent, roots) {
                Ok(path)
            } else {
                warn!(path = %path.display(), "parent escapes allowed roots");
                Err(ConfinementError::ParentOutsideRoot {
                    path,
                    roots: roots.to_vec(),
                })
            }
        }
    }
}

/// Validates a path that is about to be created together with missing parent directories.
///
/// Identical to [`validate`] for existing paths. For missing paths the nearest existing
/// ancestor, rather than the immediate parent, must resolve inside a root. Ancestors are
/// only considered while they remain lexically inside a root.
///
/// # Errors
///
/// Returns the [`ConfinementError`] describing why the path is refused.
pub fn validate_for_create(
    raw: &str,
    base: &Path,
    roots: &[PathBuf],
) -> Result<PathBuf, ConfinementError> {
    let path = admit(raw, base, roots)?;

    if let Ok(real) = dunce::canonicalize(&path) {
        return check_resolved(path, real, roots);
    }
    reject_dangling(&path)?;

    for ancestor in path.ancestors().skip(1) {
        if !is_within(ancestor, roots) {
            break;
        }
        match std::fs::symlink_metadata(ancestor) {
            Ok(_) => {
                let Ok(real) = dunce::canonicalize(ancestor) else {
                    return Err(ConfinementError::DanglingSymlink {
                        path: ancestor.to_path_buf(),
                    });
                };
                if is_within_resolved(&real, roots) {
                    return Ok(path);
                }
                warn!(path = %path.display(), "ancestor escapes allowed roots");
                return Err(ConfinementError::ParentOutsideRoot {
                    path,
                    roots: roots.to_vec(),
                });
            }
            Err(error) if error.kind() == ErrorKind::NotFound => {}
            Err(_) => break,
        }
    }

    Err(ConfinementError::ParentNotFound { path })
}
