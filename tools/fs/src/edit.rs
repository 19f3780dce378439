use std::borrow::Cow;

use anyhow::Context;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::info;
use windtools_core::{Error, Tool};
use windtools_sandbox::RootRegistry;

use crate::{read_text, resolve_file};

/// Replaces exact text in an existing file.
///
/// Without `replace_all` the old text must occur exactly once, so an edit never lands in
/// the wrong place.
#[derive(Debug, Clone)]
pub struct EditFileTool {
    roots: RootRegistry,
}

impl EditFileTool {
    /// Creates the tool over the given registry.
    #[must_use]
    pub const fn new(roots: RootRegistry) -> Self {
        Self { roots }
    }
}

/// Arguments for [`EditFileTool`].
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EditFileArgs {
    /// File to edit.
    pub path: String,
    /// Exact text to replace, including whitespace.
    pub old_text: String,
    /// Replacement text.
    pub new_text: String,
    /// Replace every occurrence instead of requiring a unique match.
    #[serde(default)]
    pub replace_all: bool,
}

fn apply(content: &str, args: &EditFileArgs) -> Result<(String, usize), Error> {
    if args.old_text.is_empty() {
        return Err(Error::invalid("old_text must not be empty"));
    }
    let count = content.matches(args.old_text.as_str()).count();
    match count {
        0 => Err(Error::invalid(format!(
            "old_text was not found in {}",
            args.path
        ))),
        1 => Ok((content.replacen(&args.old_text, &args.new_text, 1), 1)),
        _ if args.replace_all => Ok((content.replace(&args.old_text, &args.new_text), count)),
        _ => Err(Error::invalid(format!(
            "old_text matches {count} times in {}; add surrounding context or set replace_all",
            args.path
        ))),
    }
}

impl Tool for EditFileTool {
    fn name(&self) -> Cow<'static, str> {
        "edit_file".into()
    }

    fn description(&self) -> Cow<'static, str> {
        "Replaces old_text with new_text in an existing file. old_text must match exactly \
         once unless replace_all is set."
            .into()
    }

    type Arguments = EditFileArgs;

    async fn call(&self, args: Self::Arguments) -> windtools_core::Result {
        let path = resolve_file(&self.roots, &args.path)?;
        if path
            .extension()
            .is_some_and(|extension| extension.eq_ignore_ascii_case("ipynb"))
        {
            return Err(Error::invalid("Editing .ipynb files is not supported").into());
        }
        let content = read_text(&path).await?;
        let (updated, count) = apply(&content, &args)?;

        async_fs::write(&path, updated)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!(path = %path.display(), replacements = count, "edited file");

        let noun = if count == 1 { "occurrence" } else { "occurrences" };
        Ok(format!("Replaced {count} {noun} in {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Sandbox;

    fn edit(path: &str, old: &str, new: &str, replace_all: bool) -> EditFileArgs {
        EditFileArgs {
            path: path.into(),
            old_text: old.into(),
            new_text: new.into(),
            replace_all,
        }
    }

    #[tokio::test]
    async fn replaces_a_unique_match() {
        let sandbox = Sandbox::new();
        let file = sandbox.write("main.rs", "fn main() {\n    println!(\"hi\");\n}\n");
        let tool = EditFileTool::new(sandbox.roots.clone());

        let message = tool
            .call(edit("main.rs", "\"hi\"", "\"hello\"", false))
            .await
            .unwrap();
        assert!(message.starts_with("Replaced 1 occurrence"));
        assert!(
            std::fs::read_to_string(file)
                .unwrap()
                .contains("println!(\"hello\")")
        );
    }

    #[test]
    fn ambiguous_matches_need_replace_all() {
        let content = "a b a b a";
        let error = apply(content, &edit("f", "a", "x", false)).unwrap_err();
        assert!(error.to_string().contains("matches 3 times"));

        let (updated, count) = apply(content, &edit("f", "a", "x", true)).unwrap();
        assert_eq!(updated, "x b x b x");
        assert_eq!(count, 3);
    }

    #[test]
    fn missing_or_empty_old_text_is_rejected() {
        assert!(
            apply("abc", &edit("f", "zzz", "x", false))
                .unwrap_err()
                .to_string()
                .contains("not found")
        );
        assert!(apply("abc", &edit("f", "", "x", true)).is_err());
    }

    #[tokio::test]
    async fn missing_file_and_notebooks() {
        let sandbox = Sandbox::new();
        let tool = EditFileTool::new(sandbox.roots.clone());

        let missing = tool
            .call(edit("absent.txt", "a", "b", false))
            .await
            .unwrap_err();
        assert!(missing.to_string().contains("does not exist"));

        sandbox.write("book.ipynb", "{}");
        let notebook = tool
            .call(edit("book.ipynb", "{}", "[]", false))
            .await
            .unwrap_err();
        assert!(notebook.to_string().contains(".ipynb files is not supported"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn notebooks_behind_a_symlink_are_refused() {
        let sandbox = Sandbox::new();
        let notebook = sandbox.write("notebook.ipynb", "{}");
        std::os::unix::fs::symlink(&notebook, sandbox.root.join("nb.txt")).unwrap();
        let tool = EditFileTool::new(sandbox.roots.clone());

        let error = tool
            .call(edit("nb.txt", "{}", "[]", false))
            .await
            .unwrap_err();
        assert!(error.to_string().contains(".ipynb files is not supported"));
        assert_eq!(std::fs::read_to_string(notebook).unwrap(), "{}");
    }
}
