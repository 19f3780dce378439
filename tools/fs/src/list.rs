use std::{
    borrow::Cow,
    fmt::Write as _,
    fs::{self, Metadata},
    path::{Path, PathBuf},
};

use anyhow::Context;
use futures_lite::StreamExt;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::debug;
use walkdir::WalkDir;
use windtools_core::Tool;
use windtools_sandbox::RootRegistry;

use crate::resolve_dir;

/// Lists the children of one directory.
///
/// Each line is `name<TAB>kind<TAB>detail`, where `detail` is the size in bytes for files and
/// the recursive file count for directories. Entries that cannot be inspected, including
/// symlinks that lead outside the roots, show `(no access)` instead of failing the listing.
#[derive(Debug, Clone)]
pub struct ListDirTool {
    roots: RootRegistry,
}

impl ListDirTool {
    /// Creates the tool over the given registry.
    #[must_use]
    pub const fn new(roots: RootRegistry) -> Self {
        Self { roots }
    }
}

/// Arguments for [`ListDirTool`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ListDirArgs {
    /// Directory to list. Defaults to the working directory.
    #[serde(default)]
    pub directory_path: Option<String>,
}

#[derive(Debug)]
struct Row {
    name: String,
    kind: &'static str,
    detail: String,
}

impl Row {
    fn no_access(name: String) -> Self {
        Self {
            name,
            kind: "-",
            detail: "(no access)".into(),
        }
    }
}

impl Row {
    fn describe(roots: &RootRegistry, path: &Path, name: String) -> Self {
        let Ok(metadata) = fs::symlink_metadata(path) else {
            return Self::no_access(name);
        };

        let (target, metadata) = if metadata.file_type().is_symlink() {
            match follow(roots, path) {
                Some(followed) => followed,
                None => return Self::no_access(name),
            }
        } else {
            (path.to_path_buf(), metadata)
        };

        if metadata.is_dir() {
            match count_files(&target) {
                Some(count) => Self {
                    name,
                    kind: "dir",
                    detail: count.to_string(),
                },
                None => Self::no_access(name),
            }
        } else {
            Self {
                name,
                kind: "file",
                detail: metadata.len().to_string(),
            }
        }
    }
}

/// Resolves a symlink, but only when its target is itself confined.
fn follow(roots: &RootRegistry, link: &Path) -> Option<(PathBuf, Metadata)> {
    let target = roots.validate(&link.to_string_lossy()).ok()?;
    let metadata = fs::metadata(&target).ok()?;
    Some((target, metadata))
}

/// Counts regular files below `dir` without following symlinks.
fn count_files(dir: &Path) -> Option<usize> {
    fs::read_dir(dir).ok()?;
    let count = WalkDir::new(dir)
        .min_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .count();
    Some(count)
}

impl Tool for ListDirTool {
    fn name(&self) -> Cow<'static, str> {
        "list_dir".into()
    }

    fn description(&self) -> Cow<'static, str> {
        "Lists a directory: one line per child with its kind and its size in bytes \
         (files) or recursive file count (directories)."
            .into()
    }

    type Arguments = ListDirArgs;

    async fn call(&self, args: Self::Arguments) -> windtools_core::Result {
        let dir = resolve_dir(&self.roots, args.directory_path.as_deref())?;
        debug!(path = %dir.display(), "listing directory");

        let mut entries = async_fs::read_dir(&dir)
            .await
            .with_context(|| format!("failed to list {}", dir.display()))?;

        let mut children = Vec::new();
        while let Some(entry) = entries.next().await {
            match entry {
                Ok(entry) => {
                    let name = entry.file_name().to_string_lossy().into_owned();
                    children.push((entry.path(), name));
                }
                Err(error) => debug!(%error, "skipping unreadable entry"),
            }
        }

        // Recursive file counts walk whole subtrees.
        let roots = self.roots.clone();
        let mut rows = blocking::unblock(move || {
            children
                .into_iter()
                .map(|(path, name)| Row::describe(&roots, &path, name))
                .collect::<Vec<_>>()
        })
        .await;
        rows.sort_by(|a, b| a.name.cmp(&b.name));

        let mut output = format!("Directory: {}\n", dir.display());
        if rows.is_empty() {
            output.push_str("(empty)\n");
        }
        for row in rows {
            let _ = writeln!(output, "{}\t{}\t{}", row.name, row.kind, row.detail);
        }
        Ok(output)
    }
}
