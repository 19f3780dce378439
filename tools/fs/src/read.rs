use std::{borrow::Cow, fmt::Write as _};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use windtools_core::{Error, Tool};
use windtools_sandbox::RootRegistry;

use crate::{read_text, resolve_file};

/// Reads a whole file as UTF-8 text.
#[derive(Debug, Clone)]
pub struct ReadFileTool {
    roots: RootRegistry,
}

impl ReadFileTool {
    /// Creates the tool over the given registry.
    #[must_use]
    pub const fn new(roots: RootRegistry) -> Self {
        Self { roots }
    }
}

/// Arguments for [`ReadFileTool`].
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ReadFileArgs {
    /// File to read.
    pub path: String,
}

impl Tool for ReadFileTool {
    fn name(&self) -> Cow<'static, str> {
        "read_file".into()
    }

    fn description(&self) -> Cow<'static, str> {
        "Returns the full text of a file.".into()
    }

    type Arguments = ReadFileArgs;

    async fn call(&self, args: Self::Arguments) -> windtools_core::Result {
        let path = resolve_file(&self.roots, &args.path)?;
        Ok(read_text(&path).await?)
    }
}

/// Shows a numbered range of lines from a file.
///
/// Line numbers start at 0 and both bounds are inclusive. Lines outside the range are
/// summarized by `<... N lines not shown ...>` markers.
#[derive(Debug, Clone)]
pub struct ViewFileTool {
    roots: RootRegistry,
}

impl ViewFileTool {
    /// Creates the tool over the given registry.
    #[must_use]
    pub const fn new(roots: RootRegistry) -> Self {
        Self { roots }
    }
}

/// Arguments for [`ViewFileTool`].
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ViewFileArgs {
    /// File to view.
    pub path: String,
    /// First line to show, counting from 0.
    #[serde(default)]
    pub start_line: usize,
    /// Last line to show, inclusive. Defaults to the end of the file.
    #[serde(default)]
    pub end_line: Option<usize>,
}

fn render_window(
    display: &str,
    content: &str,
    start: usize,
    end: Option<usize>,
) -> Result<String, Error> {
    let lines: Vec<&str> = content.lines().collect();
    let total = lines.len();

    let mut output = format!("File: {display}\nTotal lines: {total}\n");
    if total == 0 {
        return Ok(output);
    }

    if start >= total {
        return Err(Error::invalid(format!(
            "start_line {start} is past the end of the file ({total} lines)"
        )));
    }
    let last = end.unwrap_or(usize::MAX).min(total - 1);
    if last < start {
        return Err(Error::invalid(format!(
            "end_line {last} is before start_line {start}"
        )));
    }

    if start > 0 {
        let _ = writeln!(output, "<... {start} lines not shown ...>");
    }
    for (number, line) in lines.iter().enumerate().take(last + 1).skip(start) {
        let _ = writeln!(output, "{number}: {line}");
    }
    let after = total - 1 - last;
    if after > 0 {
        let _ = writeln!(output, "<... {after} more lines not shown ...>");
    }
    Ok(output)
}

impl Tool for ViewFileTool {
    fn name(&self) -> Cow<'static, str> {
        "view_file".into()
    }

    fn description(&self) -> Cow<'static, str> {
        "Shows lines start_line..=end_line of a file (0-based) with line numbers.".into()
    }

    type Arguments = ViewFileArgs;

    async fn call(&self, args: Self::Arguments) -> windtools_core::Result {
        let path = resolve_file(&self.roots, &args.path)?;
        let content = read_text(&path).await?;
        Ok(render_window(
            &path.display().to_string(),
            &content,
            args.start_line,
            args.end_line,
        )?)
    }
}
