//! Root-confined filesystem tools.
//!
//! Every tool here holds a [`RootRegistry`] handle and sends each agent-supplied path through
//! its confinement gate before touching storage. Relative paths resolve against the working
//! directory.
//!
//! | Tool | Purpose |
//! |------|---------|
//! | [`ListDirTool`] | tabular listing of one directory |
//! | [`ReadFileTool`] | whole-file UTF-8 read |
//! | [`ViewFileTool`] | numbered line window with elision markers |
//! | [`WriteToFileTool`] | create a new file, never overwriting |
//! | [`CreateDirectoryTool`] | create a directory and its parents |
//! | [`EditFileTool`] | exact text replacement |
//! | [`FindByNameTool`] | glob search over names |
//! | [`GrepSearchTool`] | content search |
//! | [`ViewCodeItemTool`] | source of one function, class or method |
//! | [`RelatedFilesTool`] | tests and siblings of a source file |

mod code;
mod edit;
mod list;
mod read;
mod search;
mod write;

use std::{
    fs,
    io::ErrorKind,
    path::{Component, Path, PathBuf},
};

pub use code::{RelatedFilesArgs, RelatedFilesTool, ViewCodeItemArgs, ViewCodeItemTool};
pub use edit::{EditFileArgs, EditFileTool};
pub use list::{ListDirArgs, ListDirTool};
pub use read::{ReadFileArgs, ReadFileTool, ViewFileArgs, ViewFileTool};
pub use search::{EntryKind, FindByNameArgs, FindByNameTool, GrepSearchArgs, GrepSearchTool};
pub use write::{CreateDirectoryArgs, CreateDirectoryTool, WriteToFileArgs, WriteToFileTool};

use windtools_core::Error;
use windtools_sandbox::RootRegistry;

/// Resolves an optional directory argument to a confined, existing directory.
///
/// `None` or an empty string means the working directory, which must be set.
fn resolve_dir(roots: &RootRegistry, raw: Option<&str>) -> Result<PathBuf, Error> {
    let path = match raw.map(str::trim) {
        Some(raw) if !raw.is_empty() => roots.validate(raw)?,
        _ => {
            let working_dir = roots.require_working_dir()?;
            roots.validate(&working_dir.to_string_lossy())?
        }
    };

    match fs::metadata(&path) {
        Ok(metadata) if metadata.is_dir() => Ok(path),
        Ok(_) => Err(Error::invalid(format!(
            "Path is not a directory: {}",
            path.display()
        ))),
        Err(error) if error.kind() == ErrorKind::NotFound => Err(Error::not_found(format!(
            "Directory does not exist: {}",
            path.display()
        ))),
        Err(error) => Err(error.into()),
    }
}

/// Resolves a file argument to a confined, existing regular file.
fn resolve_file(roots: &RootRegistry, raw: &str) -> Result<PathBuf, Error> {
    let path = roots.validate(raw)?;
    match fs::metadata(&path) {
        Ok(metadata) if metadata.is_dir() => Err(Error::invalid(format!(
            "Path is a directory, not a file: {}",
            path.display()
        ))),
        Ok(_) => Ok(path),
        Err(error) if error.kind() == ErrorKind::NotFound => Err(Error::not_found(format!(
            "File does not exist: {}",
            path.display()
        ))),
        Err(error) => Err(error.into()),
    }
}

/// Reads a file as UTF-8 text.
async fn read_text(path: &Path) -> Result<String, Error> {
    let bytes = async_fs::read(path).await?;
    String::from_utf8(bytes)
        .map_err(|_| Error::invalid(format!("{} is not valid UTF-8 text", path.display())))
}

/// Renders `path` relative to `base` with `/` separators, whatever the platform.
fn relative_display(path: &Path, base: &Path) -> String {
    let relative = path.strip_prefix(base).unwrap_or(path);
    relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
