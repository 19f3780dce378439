//! The root registry: which directory trees the agent may touch.
//!
//! A process runs in exactly one confinement mode once configured: a single working root,
//! or an allow-list of roots with an optional working directory inside them. Every read of
//! the configuration takes a snapshot under one lock, so a validation never observes a
//! half-applied mutation.

use std::{
    fmt::{self, Write as _},
    path::{Path, PathBuf},
    sync::{Arc, PoisonError, RwLock},
};

use serde::Serialize;
use tracing::{info, warn};
use windtools_core::Error;

use crate::{gate, normalize::normalize};

/// Minimum similarity for a removal hint.
const SIMILARITY_HINT_THRESHOLD: f64 = 0.6;

/// The active root configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RootConfig {
    /// Nothing configured yet. Every gated operation fails.
    #[default]
    Unconfigured,
    /// A single working root that confines every operation.
    WorkingRoot {
        /// The root directory.
        root: PathBuf,
    },
    /// An ordered allow-list of roots.
    AllowedRoots {
        /// Allowed roots, in insertion order.
        roots: Vec<PathBuf>,
        /// Directory used for relative paths and default listings.
        working_dir: Option<PathBuf>,
    },
}

impl RootConfig {
    /// The roots paths are checked against.
    #[must_use]
    pub fn roots(&self) -> &[PathBuf] {
        match self {
            Self::Unconfigured => &[],
            Self::WorkingRoot { root } => std::slice::from_ref(root),
            Self::AllowedRoots { roots, .. } => roots,
        }
    }

    /// The current working directory, if any.
    #[must_use]
    pub fn working_dir(&self) -> Option<&Path> {
        match self {
            Self::Unconfigured => None,
            Self::WorkingRoot { root } => Some(root),
            Self::AllowedRoots { working_dir, .. } => working_dir.as_deref(),
        }
    }
}

impl fmt::Display for RootConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unconfigured => {
                write!(f, "No working directory or allowed roots are configured.")
            }
            Self::WorkingRoot { root } => write!(f, "Working root: {}", root.display()),
            Self::AllowedRoots { roots, working_dir } => {
                if roots.is_empty() {
                    writeln!(f, "Allowed roots: (none)")?;
                } else {
                    writeln!(f, "Allowed roots:")?;
                    for root in roots {
                        writeln!(f, "  - {}", root.display())?;
                    }
                }
                match working_dir {
                    Some(dir) => write!(f, "Working directory: {}", dir.display()),
                    None => write!(f, "Working directory: (not set)"),
                }
            }
        }
    }
}

/// Shared, thread-safe handle to the root configuration.
///
/// Cloning is cheap and every clone observes the same configuration.
#[derive(Debug, Clone, Default)]
pub struct RootRegistry {
    config: Arc<RwLock<RootConfig>>,
    follow_process_dir: bool,
}

impl RootRegistry {
    /// Creates an unconfigured registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry in allow-list mode from the given directories.
    ///
    /// Entries that are missing or not directories are skipped with a warning, so the
    /// registry never holds a root that failed its checks.
    pub fn from_allowed<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let registry = Self::new();
        for path in paths {
            let path = path.as_ref().trim();
            if path.is_empty() {
                continue;
            }
            if let Err(error) = registry.add_allowed_root(path) {
                warn!(path, error = %error, "ignoring configured root");
            }
        }
        registry
    }

    /// Also change the process current directory whenever the working root changes.
    ///
    /// Off by default: the process directory is global, so two registries in one process
    /// would fight over it.
    #[must_use]
    pub const fn follow_process_dir(mut self, follow: bool) -> Self {
        self.follow_process_dir = follow;
        self
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, RootConfig> {
        self.config.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, RootConfig> {
        self.config.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns a snapshot of the configuration.
    #[must_use]
    pub fn snapshot(&self) -> RootConfig {
        self.read().clone()
    }

    /// Returns the roots paths are checked against.
    #[must_use]
    pub fn roots(&self) -> Vec<PathBuf> {
        self.read().roots().to_vec()
    }

    /// Returns the working directory, if one is set.
    #[must_use]
    pub fn working_dir(&self) -> Option<PathBuf> {
        self.read().working_dir().map(Path::to_path_buf)
    }

    /// Returns the working directory or fails with a "no working directory" error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] when no working directory is set.
    pub fn require_working_dir(&self) -> Result<PathBuf, Error> {
        self.working_dir().ok_or_else(|| {
            Error::Configuration(
                "No working directory is set. Call set_working_root or pass an explicit path."
                    .into(),
            )
        })
    }

    /// The directory relative paths resolve against: the working directory, or the process
    /// current directory when none is set.
    ///
    /// # Errors
    ///
    /// Fails only if the process current directory cannot be read.
    pub fn base_dir(&self) -> Result<PathBuf, Error> {
        Ok(self.capture()?.1)
    }

    /// Roots and base directory captured under a single lock.
    fn capture(&self) -> Result<(Vec<PathBuf>, PathBuf), Error> {
        let (roots, working_dir) = {
            let config = self.read();
            (
                config.roots().to_vec(),
                config.working_dir().map(Path::to_path_buf),
            )
        };
        let base = match working_dir {
            Some(dir) => dir,
            None => std::env::current_dir()?,
        };
        Ok((roots, base))
    }

    /// Validates a path through the confinement gate.
    ///
    /// Relative paths are resolved against the working directory, or the process current
    /// directory when none is set.
    ///
    /// # Errors
    ///
    /// Returns the gate's refusal converted into an [`Error`].
    pub fn validate(&self, raw: &str) -> Result<PathBuf, Error> {
        let (roots, base) = self.capture()?;
        gate::validate(raw, &base, &roots).map_err(Error::from)
    }

    /// Validates a path that will be created along with missing parent directories.
    ///
    /// # Errors
    ///
    /// Returns the gate's refusal converted into an [`Error`].
    pub fn validate_for_create(&self, raw: &str) -> Result<PathBuf, Error> {
        let (roots, base) = self.capture()?;
        gate::validate_for_create(raw, &base, &roots).map_err(Error::from)
    }

    fn normalize(&self, raw: &str) -> Result<PathBuf, Error> {
        let (_, base) = self.capture()?;
        normalize(raw, &base).map_err(|error| {
            Error::InvalidArgument(format!("Cannot resolve path '{raw}': {error}"))
        })
    }

    /// Sets the working root, creating the directory if it does not exist.
    ///
    /// In single-root mode (or when unconfigured) the directory becomes the only root. In
    /// allow-list mode it must lie inside an allowed root and becomes the working directory.
    ///
    /// # Errors
    ///
    /// Fails if the path exists but is not a directory, cannot be created, or, in
    /// allow-list mode, is not confined to the allowed roots.
    pub fn set_working_root(&self, raw: &str) -> Result<String, Error> {
        let allow_list = matches!(self.snapshot(), RootConfig::AllowedRoots { .. });
        let path = if allow_list {
            self.validate_for_create(raw)?
        } else {
            self.normalize(raw)?
        };

        if path.exists() && !path.is_dir() {
            return Err(Error::invalid(format!(
                "Path is not a directory: {}",
                path.display()
            )));
        }
        std::fs::create_dir_all(&path)?;
        let path = dunce::canonicalize(&path)?;

        {
            let mut config = self.write();
            match &mut *config {
                RootConfig::AllowedRoots { roots, working_dir } => {
                    // Roots may have changed since validation.
                    if !gate::is_within(&path, roots) {
                        return Err(Error::AccessDenied(format!(
                            "'{}' is outside the allowed roots",
                            path.display()
                        )));
                    }
                    *working_dir = Some(path.clone());
                }
                other => {
                    *other = RootConfig::WorkingRoot { root: path.clone() };
                }
            }
        }

        if self.follow_process_dir {
            std::env::set_current_dir(&path)?;
        }

        info!(path = %path.display(), "working root set");
        Ok(format!("Working directory set to {}", path.display()))
    }

    /// Adds a directory to the allow-list. Adding a root twice is a no-op.
    ///
    /// # Errors
    ///
    /// Fails if the directory does not exist, is not a directory, or a single working root is
    /// already active.
    pub fn add_allowed_root(&self, raw: &str) -> Result<String, Error> {
        let path = self.normalize(raw)?;
        if !path.exists() {
            return Err(Error::not_found(format!(
                "Directory does not exist: {}",
                path.display()
            )));
        }
        if !path.is_dir() {
            return Err(Error::invalid(format!(
                "Path is not a directory: {}",
                path.display()
            )));
        }
        let path = dunce::canonicalize(&path)?;

        let mut config = self.write();
        match &mut *config {
            RootConfig::WorkingRoot { root } => Err(Error::Configuration(format!(
                "A single working root ({}) is active; allowed roots cannot be added in this mode",
                root.display()
            ))),
            RootConfig::AllowedRoots { roots, .. } => {
                if roots.contains(&path) {
                    return Ok(format!("{} is already an allowed root", path.display()));
                }
                roots.push(path.clone());
                info!(path = %path.display(), "allowed root added");
                Ok(format!("Added allowed root {}", path.display()))
            }
            unconfigured @ RootConfig::Unconfigured => {
                *unconfigured = RootConfig::AllowedRoots {
                    roots: vec![path.clone()],
                    working_dir: None,
                };
                info!(path = %path.display(), "allowed root added");
                Ok(format!("Added allowed root {}", path.display()))
            }
        }
    }

    /// Removes a directory from the allow-list.
    ///
    /// Only an exact match (after normalization) is removed. Otherwise nothing changes and the
    /// returned notice lists overlapping roots and the closest match. Removing the root that
    /// holds the working directory unsets the working directory.
    ///
    /// # Errors
    ///
    /// Fails if the path cannot be normalized or a single working root is active.
    pub fn remove_allowed_root(&self, raw: &str) -> Result<String, Error> {
        let normalized = self.normalize(raw)?;
        let resolved = dunce::canonicalize(&normalized).ok();

        let mut config = self.write();
        let (roots, working_dir) = match &mut *config {
            RootConfig::AllowedRoots { roots, working_dir } => (roots, working_dir),
            RootConfig::Unconfigured => {
                return Ok(format!(
                    "{} is not an allowed root; no roots are configured",
                    normalized.display()
                ));
            }
            RootConfig::WorkingRoot { .. } => {
                return Err(Error::Configuration(
                    "Allowed roots cannot be removed while a single working root is active".into(),
                ));
            }
        };

        let position = roots
            .iter()
            .position(|root| *root == normalized || resolved.as_ref() == Some(root));
        let Some(position) = position else {
            return Ok(removal_hint(&normalized, roots));
        };

        let removed = roots.remove(position);
        info!(path = %removed.display(), "allowed root removed");
        let mut message = format!("Removed allowed root {}", removed.display());

        if working_dir
            .as_ref()
            .is_some_and(|dir| dir.starts_with(&removed))
        {
            *working_dir = None;
            info!("working directory unset with its root");
            message.push_str("; the working directory was inside it and is now unset");
        }

        Ok(message)
    }

    /// Lists the configured roots and working directory.
    #[must_use]
    pub fn list_roots(&self) -> String {
        self.snapshot().to_string()
    }
}

fn removal_hint(path: &Path, roots: &[PathBuf]) -> String {
    let mut message = format!("{} is not an allowed root; nothing removed.", path.display());

    let overlapping: Vec<_> = roots
        .iter()
        .filter(|root| root.starts_with(path) || path.starts_with(root))
        .collect();
    if !overlapping.is_empty() {
        message.push_str("\nOverlapping allowed roots:");
        for root in overlapping {
            let _ = write!(message, "\n  - {}", root.display());
        }
    }

    let target = path.to_string_lossy();
    let closest = roots
        .iter()
        .map(|root| {
            let score = strsim::normalized_levenshtein(&target, &root.to_string_lossy());
            (root, score)
        })
        .filter(|(_, score)| *score >= SIMILARITY_HINT_THRESHOLD)
        .max_by(|(_, a), (_, b)| a.total_cmp(b));
    if let Some((root, _)) = closest {
        let _ = write!(message, "\nDid you mean {}?", root.display());
    }

    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn sandbox() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = dunce::canonicalize(dir.path()).unwrap();
        (dir, root)
    }

    fn s(path: &Path) -> String {
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn unconfigured_registry_rejects_everything() {
        let (_dir, root) = sandbox();
        let registry = RootRegistry::new();

        let error = registry.validate(&s(&root)).unwrap_err();
        assert!(matches!(error, Error::Configuration(_)));
        assert!(registry.require_working_dir().is_err());
    }

    #[test]
    fn set_working_root_creates_directory() {
        let (_dir, parent) = sandbox();
        let root = parent.join("project");
        let registry = RootRegistry::new();

        let message = registry.set_working_root(&s(&root)).unwrap();
        assert!(message.contains("project"));
        assert!(root.is_dir());
        assert_eq!(registry.working_dir(), Some(root.clone()));
        assert_eq!(registry.roots(), vec![root.clone()]);

        // Relative paths now resolve against the working root.
        assert_eq!(registry.base_dir().unwrap(), root);
        fs::write(root.join("a.txt"), "x").unwrap();
        assert_eq!(registry.validate("a.txt").unwrap(), root.join("a.txt"));
    }

    #[test]
    fn set_working_root_rejects_files() {
        let (_dir, parent) = sandbox();
        let file = parent.join("file.txt");
        fs::write(&file, "x").unwrap();

        let error = RootRegistry::new().set_working_root(&s(&file)).unwrap_err();
        assert!(matches!(error, Error::InvalidArgument(_)));
    }

    #[test]
    fn add_allowed_root_requires_existing_directory() {
        let (_dir, parent) = sandbox();
        let registry = RootRegistry::new();

        let missing = registry
            .add_allowed_root(&s(&parent.join("missing")))
            .unwrap_err();
        assert!(matches!(missing, Error::NotFound(_)));

        fs::write(parent.join("file.txt"), "x").unwrap();
        let file = registry
            .add_allowed_root(&s(&parent.join("file.txt")))
            .unwrap_err();
        assert!(matches!(file, Error::InvalidArgument(_)));

        registry.add_allowed_root(&s(&parent)).unwrap();
        let again = registry.add_allowed_root(&s(&parent)).unwrap();
        assert!(again.contains("already"));
        assert_eq!(registry.roots(), vec![parent]);
    }

    #[test]
    fn modes_do_not_mix() {
        let (_dir, parent) = sandbox();
        let registry = RootRegistry::new();
        registry.set_working_root(&s(&parent)).unwrap();

        let error = registry.add_allowed_root(&s(&parent)).unwrap_err();
        assert!(matches!(error, Error::Configuration(_)));
        let error = registry.remove_allowed_root(&s(&parent)).unwrap_err();
        assert!(matches!(error, Error::Configuration(_)));
    }

    #[test]
    fn working_dir_must_stay_inside_allowed_roots() {
        let (_dir, root) = sandbox();
        let (_other_dir, other) = sandbox();
        let registry = RootRegistry::from_allowed([s(&root)]);

        registry.set_working_root(&s(&root.join("sub"))).unwrap();
        assert_eq!(registry.working_dir(), Some(root.join("sub")));

        let error = registry.set_working_root(&s(&other)).unwrap_err();
        assert!(matches!(error, Error::AccessDenied(_)));
    }

    #[test]
    fn removing_root_unsets_contained_working_dir() {
        let (_dir, root) = sandbox();
        let (_other_dir, other) = sandbox();
        let registry = RootRegistry::from_allowed([s(&root), s(&other)]);
        registry.set_working_root(&s(&root.join("work"))).unwrap();

        let message = registry.remove_allowed_root(&s(&root)).unwrap();
        assert!(message.contains("now unset"));
        assert_eq!(registry.working_dir(), None);
        assert_eq!(registry.roots(), vec![other]);

        let error = registry.require_working_dir().unwrap_err();
        assert!(error.to_string().contains("No working directory"));
    }

    #[test]
    fn removing_unknown_root_is_a_notice() {
        let (_dir, root) = sandbox();
        fs::create_dir(root.join("nested")).unwrap();
        let registry = RootRegistry::from_allowed([s(&root)]);

        let message = registry
            .remove_allowed_root(&s(&root.join("nested")))
            .unwrap();
        assert!(message.contains("nothing removed"));
        assert!(message.contains("Overlapping"));
        assert!(message.contains(&root.display().to_string()));
        assert_eq!(registry.roots(), vec![root]);
    }

    #[test]
    fn from_allowed_skips_invalid_entries() {
        let (_dir, root) = sandbox();
        let missing = root.join("missing");
        let registry = RootRegistry::from_allowed([s(&root), s(&missing), String::new()]);

        assert_eq!(registry.roots(), vec![root]);
    }

    #[test]
    fn listing_shows_roots_and_working_dir() {
        let (_dir, root) = sandbox();
        let registry = RootRegistry::from_allowed([s(&root)]);

        let listing = registry.list_roots();
        assert!(listing.contains("Allowed roots:"));
        assert!(listing.contains(&root.display().to_string()));
        assert!(listing.contains("(not set)"));
    }

    #[test]
    fn clones_share_configuration() {
        let (_dir, root) = sandbox();
        let registry = RootRegistry::new();
        let clone = registry.clone();

        registry.set_working_root(&s(&root)).unwrap();
        assert_eq!(clone.working_dir(), Some(root));
    }
}
