use std::{borrow::Cow, fs, io::ErrorKind};

use anyhow::Context;
use futures_lite::AsyncWriteExt;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::info;
use windtools_core::{Error, Tool};
use windtools_sandbox::RootRegistry;

/// Creates a new file. Existing files are never overwritten with content; `empty_file`
/// truncates an existing regular file instead.
///
/// Missing parent directories are created, as long as they end up inside a root.
#[derive(Debug, Clone)]
pub struct WriteToFileTool {
    roots: RootRegistry,
}

impl WriteToFileTool {
    /// Creates the tool over the given registry.
    #[must_use]
    pub const fn new(roots: RootRegistry) -> Self {
        Self { roots }
    }
}

/// Arguments for [`WriteToFileTool`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct WriteToFileArgs {
    /// File to create.
    pub path: String,
    /// Text to write. Required unless `empty_file` is set.
    #[serde(default)]
    pub content: Option<String>,
    /// Create an empty file and ignore `content`. An existing file is truncated.
    #[serde(default)]
    pub empty_file: bool,
}

impl Tool for WriteToFileTool {
    fn name(&self) -> Cow<'static, str> {
        "write_to_file".into()
    }

    fn description(&self) -> Cow<'static, str> {
        "Creates a new file with the given content, creating parent directories as needed. \
         Refuses to overwrite an existing file unless empty_file is set, which truncates it; \
         use edit_file for changes."
            .into()
    }

    type Arguments = WriteToFileArgs;

    async fn call(&self, args: Self::Arguments) -> windtools_core::Result {
        let content = if args.empty_file {
            String::new()
        } else {
            args.content
                .ok_or_else(|| Error::invalid("content is required unless empty_file is set"))?
        };

        let target = self.roots.validate_for_create(&args.path)?;
        match fs::symlink_metadata(&target) {
            Ok(metadata) if args.empty_file && metadata.is_file() => {
                async_fs::write(&target, b"")
                    .await
                    .with_context(|| format!("failed to truncate {}", target.display()))?;
                info!(path = %target.display(), "truncated file");
                return Ok(format!("Truncated {} to an empty file", target.display()));
            }
            Ok(_) => return Err(already_exists(&target).into()),
            Err(_) => {}
        }
        if let Some(parent) = target.parent() {
            async_fs::create_dir_all(parent).await.with_context(|| {
                format!("failed to create parent directories for {}", target.display())
            })?;
        }

        let mut file = match async_fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
            .await
        {
            Ok(file) => file,
            Err(error) if error.kind() == ErrorKind::AlreadyExists => {
                return Err(already_exists(&target).into());
            }
            Err(error) => {
                return Err(anyhow::Error::new(error)
                    .context(format!("failed to create {}", target.display())));
            }
        };
        file.write_all(content.as_bytes())
            .await
            .with_context(|| format!("failed to write {}", target.display()))?;
        file.flush().await?;

        info!(path = %target.display(), bytes = content.len(), "created file");
        if content.is_empty() {
            Ok(format!("Created empty file {}", target.display()))
        } else {
            Ok(format!(
                "Created {} ({} bytes)",
                target.display(),
                content.len()
            ))
        }
    }
}

fn already_exists(path: &std::path::Path) -> Error {
    Error::AlreadyExists(format!(
        "File already exists: {}. Use edit_file to change it.",
        path.display()
    ))
}

/// Creates a directory and any missing parents.
#[derive(Debug, Clone)]
pub struct CreateDirectoryTool {
    roots: RootRegistry,
}

impl CreateDirectoryTool {
    /// Creates the tool over the given registry.
    #[must_use]
    pub const fn new(roots: RootRegistry) -> Self {
        Self { roots }
    }
}

/// Arguments for [`CreateDirectoryTool`].
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CreateDirectoryArgs {
    /// Directory to create.
    pub path: String,
}

impl Tool for CreateDirectoryTool {
    fn name(&self) -> Cow<'static, str> {
        "create_directory".into()
    }

    fn description(&self) -> Cow<'static, str> {
        "Creates a directory, including missing parents. Succeeds if it already exists.".into()
    }

    type Arguments = CreateDirectoryArgs;

    async fn call(&self, args: Self::Arguments) -> windtools_core::Result {
        let target = self.roots.validate_for_create(&args.path)?;
        match fs::metadata(&target) {
            Ok(metadata) if metadata.is_dir() => {
                return Ok(format!("Directory already exists: {}", target.display()));
            }
            Ok(_) => {
                return Err(Error::AlreadyExists(format!(
                    "A file already exists at {}",
                    target.display()
                ))
                .into());
            }
            Err(_) => {}
        }

        async_fs::create_dir_all(&target)
            .await
            .with_context(|| format!("failed to create {}", target.display()))?;
        info!(path = %target.display(), "created directory");
        Ok(format!("Created directory {}", target.display()))
    }
}
