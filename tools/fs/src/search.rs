use std::{borrow::Cow, fmt::Write as _, fs, path::Path};

use glob::Pattern;
use regex::{Regex, RegexBuilder};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::debug;
use walkdir::{DirEntry, WalkDir};
use windtools_core::{Error, Tool};
use windtools_sandbox::RootRegistry;

use crate::{relative_display, resolve_dir};

const MAX_FIND_RESULTS: usize = 500;
const MAX_GREP_MATCHES: usize = 200;
const MAX_LINE_CHARS: usize = 300;
/// Files whose first block contains a NUL byte are treated as binary and skipped.
const BINARY_PROBE_BYTES: usize = 8 * 1024;

/// Which kinds of entries [`FindByNameTool`] reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Files, directories and symlinks.
    #[default]
    Any,
    /// Regular files only.
    File,
    /// Directories only.
    Directory,
}

fn compile(patterns: &[String]) -> Result<Vec<Pattern>, Error> {
    patterns
        .iter()
        .map(|pattern| {
            Pattern::new(pattern)
                .map_err(|error| Error::invalid(format!("Invalid glob '{pattern}': {error}")))
        })
        .collect()
}

fn kind_of(entry: &DirEntry) -> &'static str {
    let file_type = entry.file_type();
    if file_type.is_dir() {
        "dir"
    } else if file_type.is_symlink() {
        "link"
    } else {
        "file"
    }
}

struct NameFilter {
    name: Pattern,
    includes: Vec<Pattern>,
    excludes: Vec<Pattern>,
    kind: EntryKind,
}

impl NameFilter {
    /// Walks `dir` and returns `relative<TAB>kind` lines plus whether the cap was hit.
    fn walk(&self, dir: &Path, max_depth: Option<usize>) -> (Vec<String>, bool) {
        let mut walker = WalkDir::new(dir).min_depth(1).follow_links(false);
        if let Some(depth) = max_depth {
            walker = walker.max_depth(depth);
        }

        let mut results = Vec::new();
        let mut entries = walker.sort_by_file_name().into_iter();
        while let Some(entry) = entries.next() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(error) => {
                    debug!(%error, "skipping unreadable entry");
                    continue;
                }
            };
            let relative = relative_display(entry.path(), dir);

            if self.excludes.iter().any(|pattern| pattern.matches(&relative)) {
                if entry.file_type().is_dir() {
                    entries.skip_current_dir();
                }
                continue;
            }
            if !self.includes.is_empty()
                && !self.includes.iter().any(|pattern| pattern.matches(&relative))
            {
                continue;
            }
            let kind_matches = match self.kind {
                EntryKind::Any => true,
                EntryKind::File => entry.file_type().is_file(),
                EntryKind::Directory => entry.file_type().is_dir(),
            };
            if !kind_matches || !self.name.matches(&entry.file_name().to_string_lossy()) {
                continue;
            }

            if results.len() == MAX_FIND_RESULTS {
                return (results, true);
            }
            results.push(format!("{relative}\t{}", kind_of(&entry)));
        }
        (results, false)
    }
}

/// Finds files and directories whose names match a glob.
///
/// Results are `relative/path<TAB>kind` lines relative to the searched directory. Symlinks
/// are reported but never followed.
#[derive(Debug, Clone)]
pub struct FindByNameTool {
    roots: RootRegistry,
}

impl FindByNameTool {
    /// Creates the tool over the given registry.
    #[must_use]
    pub const fn new(roots: RootRegistry) -> Self {
        Self { roots }
    }
}

/// Arguments for [`FindByNameTool`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct FindByNameArgs {
    /// Glob matched against entry names, for example `*.rs`.
    pub pattern: String,
    /// Directory to search. Defaults to the working directory.
    #[serde(default)]
    pub directory: Option<String>,
    /// Only report entries whose relative path matches one of these globs.
    #[serde(default)]
    pub includes: Vec<String>,
    /// Skip entries whose relative path matches one of these globs.
    #[serde(default)]
    pub excludes: Vec<String>,
    /// Restrict results to files or directories.
    #[serde(default, rename = "type")]
    pub kind: EntryKind,
    /// Maximum depth below the searched directory.
    #[serde(default)]
    pub max_depth: Option<usize>,
}

impl Tool for FindByNameTool {
    fn name(&self) -> Cow<'static, str> {
        "find_by_name".into()
    }

    fn description(&self) -> Cow<'static, str> {
        "Finds files and directories by name glob below a directory, with optional \
         include/exclude globs on the relative path."
            .into()
    }

    type Arguments = FindByNameArgs;

    async fn call(&self, args: Self::Arguments) -> windtools_core::Result {
        let dir = resolve_dir(&self.roots, args.directory.as_deref())?;
        let name = Pattern::new(&args.pattern).map_err(|error| {
            Error::invalid(format!("Invalid glob '{}': {error}", args.pattern))
        })?;
        let filter = NameFilter {
            name,
            includes: compile(&args.includes)?,
            excludes: compile(&args.excludes)?,
            kind: args.kind,
        };

        let max_depth = args.max_depth;
        let (results, truncated) =
            blocking::unblock(move || filter.walk(&dir, max_depth)).await;

        if results.is_empty() {
            return Ok("No files found.".into());
        }
        let mut output = results.join("\n");
        if truncated {
            let _ = write!(output, "\n<... truncated at {MAX_FIND_RESULTS} results ...>");
        }
        Ok(output)
    }
}

/// Searches file contents for a literal string or regular expression.
///
/// Matches are reported as `relative/path:line:content`, with line numbers starting at 1.
#[derive(Debug, Clone)]
pub struct GrepSearchTool {
    roots: RootRegistry,
}

impl GrepSearchTool {
    /// Creates the tool over the given registry.
    #[must_use]
    pub const fn new(roots: RootRegistry) -> Self {
        Self { roots }
    }
}

const fn default_true() -> bool {
    true
}

/// Arguments for [`GrepSearchTool`].
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GrepSearchArgs {
    /// Text or pattern to look for.
    pub query: String,
    /// Directory to search. Defaults to the working directory.
    #[serde(default)]
    pub directory: Option<String>,
    /// Only search files whose name or relative path matches one of these globs.
    #[serde(default)]
    pub includes: Vec<String>,
    /// Ignore case when matching.
    #[serde(default)]
    pub case_insensitive: bool,
    /// Treat `query` as a regular expression instead of literal text.
    #[serde(default)]
    pub is_regex: bool,
    /// Report every matching line. When false, only matching file paths are listed.
    #[serde(default = "default_true")]
    pub match_per_line: bool,
}

fn build_regex(args: &GrepSearchArgs) -> Result<Regex, Error> {
    let source = if args.is_regex {
        args.query.clone()
    } else {
        regex::escape(&args.query)
    };
    RegexBuilder::new(&source)
        .case_insensitive(args.case_insensitive)
        .build()
        .map_err(|error| Error::invalid(format!("Invalid pattern '{}': {error}", args.query)))
}

fn read_searchable(path: &Path) -> Option<String> {
    let bytes = fs::read(path).ok()?;
    let probe = &bytes[..bytes.len().min(BINARY_PROBE_BYTES)];
    if probe.contains(&0) {
        return None;
    }
    String::from_utf8(bytes).ok()
}

fn clip(line: &str) -> Cow<'_, str> {
    match line.char_indices().nth(MAX_LINE_CHARS) {
        Some((index, _)) => Cow::Owned(format!("{}...", &line[..index])),
        None => Cow::Borrowed(line),
    }
}

/// Scans the files below `dir`. Returns the report lines and whether the cap was hit.
fn grep_dir(
    dir: &Path,
    regex: &Regex,
    includes: &[Pattern],
    per_line: bool,
) -> (Vec<String>, bool) {
    let mut lines = Vec::new();
    let files = WalkDir::new(dir)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file());

    for entry in files {
        let relative = relative_display(entry.path(), dir);
        let file_name = entry.file_name().to_string_lossy();
        if !includes.is_empty()
            && !includes
                .iter()
                .any(|pattern| pattern.matches(&file_name) || pattern.matches(&relative))
        {
            continue;
        }
        let Some(content) = read_searchable(entry.path()) else {
            continue;
        };

        if !per_line {
            if regex.is_match(&content) {
                lines.push(relative);
            }
            continue;
        }
        for (index, line) in content.lines().enumerate() {
            if !regex.is_match(line) {
                continue;
            }
            if lines.len() == MAX_GREP_MATCHES {
                return (lines, true);
            }
            lines.push(format!("{relative}:{}:{}", index + 1, clip(line)));
        }
    }
    (lines, false)
}

impl Tool for GrepSearchTool {
    fn name(&self) -> Cow<'static, str> {
        "grep_search".into()
    }

    fn description(&self) -> Cow<'static, str> {
        "Searches file contents below a directory and reports path:line:content for each \
         match."
            .into()
    }

    type Arguments = GrepSearchArgs;

    async fn call(&self, args: Self::Arguments) -> windtools_core::Result {
        let dir = resolve_dir(&self.roots, args.directory.as_deref())?;
        let regex = build_regex(&args)?;
        let includes = compile(&args.includes)?;
        let per_line = args.match_per_line;

        let (lines, truncated) =
            blocking::unblock(move || grep_dir(&dir, &regex, &includes, per_line)).await;

        if lines.is_empty() {
            return Ok("No matches found.".into());
        }
        let mut output = lines.join("\n");
        if truncated {
            let _ = write!(output, "\n<... truncated at {MAX_GREP_MATCHES} matches ...>");
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Sandbox;

    fn tree() -> Sandbox {
        let sandbox = Sandbox::new();
        sandbox.write("file1.txt", "alpha\n");
        sandbox.write("file2.txt", "beta\n");
        sandbox.write("subdir1/file3.txt", "gamma\n");
        sandbox.write("subdir1/nested/file4.md", "delta\n");
        sandbox.write(
            "sample.py",
            "def hello_world():\n    print(\"Hello, World!\")\n    return True\n",
        );
        sandbox.write(
            "sample.js",
            "function helloWorld() {\n    console.log(\"Hello, World!\");\n}\n",
        );
        sandbox
    }

    fn find(pattern: &str) -> FindByNameArgs {
        FindByNameArgs {
            pattern: pattern.into(),
            ..FindByNameArgs::default()
        }
    }

    fn grep(query: &str) -> GrepSearchArgs {
        GrepSearchArgs {
            query: query.into(),
            directory: None,
            includes: Vec::new(),
            case_insensitive: false,
            is_regex: false,
            match_per_line: true,
        }
    }

    #[tokio::test]
    async fn finds_by_name_glob() {
        let sandbox = tree();
        let tool = FindByNameTool::new(sandbox.roots.clone());
        let output = tool.call(find("*.txt")).await.unwrap();

        let lines: Vec<&str> = output.lines().collect();
        assert!(lines.contains(&"file1.txt\tfile"));
        assert!(lines.contains(&"file2.txt\tfile"));
        assert!(lines.contains(&"subdir1/file3.txt\tfile"));
        assert!(!output.contains("file4.md"));
    }

    #[tokio::test]
    async fn include_and_exclude_filters() {
        let sandbox = tree();
        let tool = FindByNameTool::new(sandbox.roots.clone());

        let included = tool
            .call(FindByNameArgs {
                includes: vec!["subdir1/*".into()],
                ..find("*")
            })
            .await
            .unwrap();
        assert!(included.lines().all(|line| line.starts_with("subdir1/")));

        let excluded = tool
            .call(FindByNameArgs {
                excludes: vec!["subdir1".into()],
                ..find("*.txt")
            })
            .await
            .unwrap();
        assert!(excluded.contains("file1.txt"));
        assert!(!excluded.contains("subdir1/"));
    }

    #[tokio::test]
    async fn type_and_depth_filters() {
        let sandbox = tree();
        let tool = FindByNameTool::new(sandbox.roots.clone());

        let dirs = tool
            .call(FindByNameArgs {
                kind: EntryKind::Directory,
                ..find("*")
            })
            .await
            .unwrap();
        assert_eq!(dirs, "subdir1\tdir\nsubdir1/nested\tdir");

        let shallow = tool
            .call(FindByNameArgs {
                max_depth: Some(1),
                ..find("*.md")
            })
            .await
            .unwrap();
        assert_eq!(shallow, "No files found.");
    }

    #[tokio::test]
    async fn find_reports_missing_directory() {
        let sandbox = tree();
        let tool = FindByNameTool::new(sandbox.roots.clone());
        let error = tool
            .call(FindByNameArgs {
                directory: Some("missing".into()),
                ..find("*")
            })
            .await
            .unwrap_err();
        assert!(error.to_string().contains("does not exist"));
    }

    #[tokio::test]
    async fn grep_reports_path_and_line() {
        let sandbox = tree();
        let tool = GrepSearchTool::new(sandbox.roots.clone());

        let output = tool
            .call(GrepSearchArgs {
                includes: vec!["*.py".into(), "*.js".into()],
                ..grep("Hello")
            })
            .await
            .unwrap();
        assert!(output.contains("sample.py:2:"));
        assert!(output.contains("sample.js:2:"));

        let none = tool.call(grep("nonexistent")).await.unwrap();
        assert_eq!(none, "No matches found.");
    }

    #[tokio::test]
    async fn grep_regex_and_case_options() {
        let sandbox = tree();
        let tool = GrepSearchTool::new(sandbox.roots.clone());

        let literal = tool.call(grep("hello_world()")).await.unwrap();
        assert!(literal.starts_with("sample.py:1:"));

        let regex = tool
            .call(GrepSearchArgs {
                is_regex: true,
                case_insensitive: true,
                ..grep("^(ALPHA|BETA)$")
            })
            .await
            .unwrap();
        assert_eq!(regex, "file1.txt:1:alpha\nfile2.txt:1:beta");

        let files_only = tool
            .call(GrepSearchArgs {
                match_per_line: false,
                ..grep("World")
            })
            .await
            .unwrap();
        assert_eq!(files_only, "sample.js\nsample.py");

        let invalid = tool
            .call(GrepSearchArgs {
                is_regex: true,
                ..grep("(")
            })
            .await
            .unwrap_err();
        assert!(matches!(
            invalid.downcast_ref::<Error>(),
            Some(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn long_lines_are_clipped_on_char_boundaries() {
        let line = "é".repeat(MAX_LINE_CHARS + 10);
        let clipped = clip(&line);
        assert_eq!(clipped.chars().count(), MAX_LINE_CHARS + 3);
        assert_eq!(clip("short"), "short");
    }
}
