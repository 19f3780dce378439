//! Lexical normalization of agent-supplied paths.
//!
//! Nothing here touches the file system apart from looking up the home directory: `..`
//! is collapsed textually, so `root/link/..` normalizes to `root` even when `link` is a
//! symlink. Symlinks are the gate's concern.

use std::{
    io,
    path::{Path, PathBuf, is_separator},
};

use path_absolutize::Absolutize;

/// Expands a leading `~` or `~/` to the current user's home directory.
///
/// `~user` forms and paths without a leading tilde are returned unchanged, as is everything
/// when no home directory can be determined.
#[must_use]
pub fn expand_home(raw: &str) -> PathBuf {
    let Some(rest) = raw.strip_prefix('~') else {
        return PathBuf::from(raw);
    };
    let Some(home) = dirs::home_dir() else {
        return PathBuf::from(raw);
    };

    if rest.is_empty() {
        return home;
    }
    if rest.starts_with(is_separator) {
        let rest = rest.trim_start_matches(is_separator);
        if rest.is_empty() {
            return home;
        }
        return home.join(rest);
    }
    PathBuf::from(raw)
}

/// Normalizes `raw` into an absolute path.
///
/// Relative paths are resolved against `base`. `.` segments, `..` segments and repeated
/// separators are collapsed.
///
/// # Errors
///
/// Returns an error if `base` is itself relative and the current directory cannot be read.
pub fn normalize(raw: &str, base: &Path) -> io::Result<PathBuf> {
    let expanded = expand_home(raw);
    let absolute = expanded.absolutize_from(base)?;
    Ok(absolute.into_owned())
}

/// Normalizes `raw` against the process's current directory.
///
/// # Errors
///
/// Returns an error if the current directory cannot be determined.
pub fn normalize_in_cwd(raw: &str) -> io::Result<PathBuf> {
    let cwd = std::env::current_dir()?;
    normalize(raw, &cwd)
}
