use std::{
    borrow::Cow,
    collections::BTreeMap,
    ffi::OsStr,
    fs,
    path::{Path, PathBuf},
};

use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::debug;
use windtools_core::{Error, Tool, json};
use windtools_sandbox::RootRegistry;

use crate::{read_text, resolve_file};

/// How blocks are delimited in a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Syntax {
    /// Python: a block is every following line indented deeper than its header.
    Indent,
    /// C-family languages: a block runs to the brace that closes its first `{`.
    Braces {
        /// Whether `'` opens a string. Off for Rust, where it also starts lifetimes.
        single_quote_strings: bool,
    },
}

const MODIFIERS: &str = r"(?:(?:export|default|async|static|pub(?:\([^)]*\))?|public|private|protected|abstract|override|unsafe|final)\s+)*";
const KEYWORDS: &str =
    r"(?:(?P<keyword>function\*?|class|fn|struct|enum|trait|interface|impl|type|mod|const|let|var)\s+)?";

impl Syntax {
    fn of(path: &Path) -> Self {
        match path.extension().and_then(OsStr::to_str) {
            Some("py" | "pyi") => Self::Indent,
            Some("rs") => Self::Braces {
                single_quote_strings: false,
            },
            _ => Self::Braces {
                single_quote_strings: true,
            },
        }
    }

    fn declaration(self, name: &str) -> Result<Regex, Error> {
        let name = regex::escape(name);
        let source = match self {
            Self::Indent => format!(r"^\s*(?:async\s+)?(?:def|class)\s+{name}\b"),
            Self::Braces { .. } => format!(r"^\s*{MODIFIERS}{KEYWORDS}{name}\b(?P<rest>.*)$"),
        };
        Regex::new(&source)
            .map_err(|error| Error::invalid(format!("Invalid item name '{name}': {error}")))
    }

    fn declares(self, pattern: &Regex, line: &str) -> bool {
        let Some(captures) = pattern.captures(line) else {
            return false;
        };
        if matches!(self, Self::Indent) || captures.name("keyword").is_some() {
            return true;
        }
        // Without a keyword only a method header counts, not a call.
        let rest = captures.name("rest").map_or("", |rest| rest.as_str()).trim_start();
        (rest.starts_with('(') || rest.starts_with('<')) && line.trim_end().ends_with('{')
    }

    /// Last line (inclusive) of the block declared on `start`.
    fn block_end(self, lines: &[&str], start: usize) -> usize {
        match self {
            Self::Indent => indent_block_end(lines, start),
            Self::Braces {
                single_quote_strings,
            } => brace_block_end(lines, start, single_quote_strings),
        }
    }
}

fn indent(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

fn indent_block_end(lines: &[&str], start: usize) -> usize {
    let base = indent(lines[start]);

    // The header may span lines while brackets are open.
    let mut depth = 0i32;
    let mut header_end = start;
    for (index, line) in lines.iter().enumerate().skip(start) {
        for ch in line.chars() {
            match ch {
                '(' | '[' | '{' => depth += 1,
                ')' | ']' | '}' => depth -= 1,
                '#' => break,
                _ => {}
            }
        }
        header_end = index;
        if depth <= 0 {
            break;
        }
    }

    let mut end = header_end;
    for (index, line) in lines.iter().enumerate().skip(header_end + 1) {
        if line.trim().is_empty() {
            continue;
        }
        if indent(line) <= base {
            break;
        }
        end = index;
    }
    end
}

fn brace_block_end(lines: &[&str], start: usize, single_quote_strings: bool) -> usize {
    let mut depth = 0usize;
    let mut opened = false;
    let mut quote: Option<char> = None;

    for (index, line) in lines.iter().enumerate().skip(start) {
        let mut chars = line.chars().peekable();
        let mut escaped = false;
        while let Some(ch) = chars.next() {
            if let Some(open) = quote {
                if escaped {
                    escaped = false;
                } else if ch == '\\' {
                    escaped = true;
                } else if ch == open {
                    quote = None;
                }
                continue;
            }
            match ch {
                '"' | '`' => quote = Some(ch),
                '\'' if single_quote_strings => quote = Some(ch),
                '/' if chars.peek() == Some(&'/') => break,
                '{' => {
                    depth += 1;
                    opened = true;
                }
                '}' => {
                    depth = depth.saturating_sub(1);
                    if opened && depth == 0 {
                        return index;
                    }
                }
                ';' if !opened => return index,
                _ => {}
            }
        }
        // Only template literals continue past the end of a line.
        if quote != Some('`') {
            quote = None;
        }
    }
    lines.len() - 1
}

/// Finds `Outer.inner` style items. Returns the inclusive line range to show.
fn locate(lines: &[&str], syntax: Syntax, item: &str) -> Result<Option<(usize, usize)>, Error> {
    let mut range = 0..lines.len();
    let mut found = None;
    for segment in item.split('.') {
        if segment.is_empty() {
            return Err(Error::invalid(format!("Invalid item name '{item}'")));
        }
        let pattern = syntax.declaration(segment)?;
        let Some(start) = range
            .clone()
            .filter(|&index| syntax.declares(&pattern, lines[index]))
            .min_by_key(|&index| indent(lines[index]))
        else {
            return Ok(None);
        };
        let end = syntax.block_end(lines, start);
        found = Some((start, end));
        range = start + 1..end + 1;
    }

    // Decorators belong to the item they precede.
    Ok(found.map(|(mut start, end)| {
        if syntax == Syntax::Indent {
            let base = indent(lines[start]);
            while start > 0
                && indent(lines[start - 1]) == base
                && lines[start - 1].trim_start().starts_with('@')
            {
                start -= 1;
            }
        }
        (start, end)
    }))
}

/// Shows the source of one function, class or method.
///
/// Items are named as they are declared, with `.` separating nesting levels:
/// `hello_world`, `TestClass.greet`. Python blocks are delimited by indentation, other
/// languages by braces.
#[derive(Debug, Clone)]
pub struct ViewCodeItemTool {
    roots: RootRegistry,
}

impl ViewCodeItemTool {
    /// Creates the tool over the given registry.
    #[must_use]
    pub const fn new(roots: RootRegistry) -> Self {
        Self { roots }
    }
}

/// Arguments for [`ViewCodeItemTool`].
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ViewCodeItemArgs {
    /// Source file containing the item.
    pub path: String,
    /// Item name, for example `parse` or `Parser.parse`.
    pub item: String,
}

impl Tool for ViewCodeItemTool {
    fn name(&self) -> Cow<'static, str> {
        "view_code_item".into()
    }

    fn description(&self) -> Cow<'static, str> {
        "Shows the source of a function, class or method in a file. Use Class.method for \
         nested items."
            .into()
    }

    type Arguments = ViewCodeItemArgs;

    async fn call(&self, args: Self::Arguments) -> windtools_core::Result {
        let path = resolve_file(&self.roots, &args.path)?;
        let content = read_text(&path).await?;
        let lines: Vec<&str> = content.lines().collect();
        let item = args.item.trim();

        let Some((start, end)) = locate(&lines, Syntax::of(&path), item)? else {
            return Err(Error::not_found(format!(
                "Code item '{item}' not found in {}",
                path.display()
            ))
            .into());
        };
        debug!(path = %path.display(), item, start, end, "located code item");

        Ok(format!(
            "{}:{}-{}\n{}",
            path.display(),
            start + 1,
            end + 1,
            lines[start..=end].join("\n")
        ))
    }
}

const TEST_PREFIXES: &[&str] = &["test_"];
const TEST_SUFFIXES: &[&str] = &["_test", "_tests", ".test", ".spec", "_spec", "Test", "Tests"];
const TEST_DIRS: &[&str] = &["tests", "test", "__tests__", "spec"];

/// Splits a file stem into the name it tests (or is) and whether it is a test.
fn base_name(stem: &str) -> (&str, bool) {
    for prefix in TEST_PREFIXES {
        if let Some(base) = stem.strip_prefix(prefix).filter(|base| !base.is_empty()) {
            return (base, true);
        }
    }
    for suffix in TEST_SUFFIXES {
        if let Some(base) = stem.strip_suffix(suffix).filter(|base| !base.is_empty()) {
            return (base, true);
        }
    }
    (stem, false)
}

/// Where to look for files related to one in `dir`: the directory itself, its test
/// subdirectories and, for a file inside a test directory, the directory above.
fn search_dirs(dir: &Path) -> Vec<PathBuf> {
    let mut dirs = vec![dir.to_path_buf()];
    dirs.extend(TEST_DIRS.iter().map(|name| dir.join(name)));
    let in_test_dir = dir
        .file_name()
        .and_then(OsStr::to_str)
        .is_some_and(|name| TEST_DIRS.contains(&name));
    if in_test_dir {
        dirs.extend(dir.parent().map(Path::to_path_buf));
    }
    dirs
}

#[derive(Debug, Serialize)]
struct RelatedFile {
    path: String,
    relation: &'static str,
}

#[derive(Debug, Serialize)]
struct RelatedFiles {
    related_files: Vec<RelatedFile>,
}

fn find_related(roots: &RootRegistry, target: &Path) -> Vec<RelatedFile> {
    let Some(stem) = target.file_stem().and_then(OsStr::to_str) else {
        return Vec::new();
    };
    let (base, is_test) = base_name(stem);
    let Some(dir) = target.parent() else {
        return Vec::new();
    };

    let mut found = BTreeMap::new();
    for dir in search_dirs(dir) {
        // Every location and candidate passes the gate, so a link cannot widen the search.
        let Ok(dir) = roots.validate(&dir.to_string_lossy()) else {
            continue;
        };
        let Ok(entries) = fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(candidate_stem) = path.file_stem().and_then(OsStr::to_str) else {
                continue;
            };
            let (candidate_base, candidate_is_test) = base_name(candidate_stem);
            if candidate_base != base {
                continue;
            }
            let Ok(path) = roots.validate(&path.to_string_lossy()) else {
                continue;
            };
            if path == target || !path.is_file() {
                continue;
            }
            let relation = if candidate_is_test {
                "test"
            } else if is_test {
                "source"
            } else {
                "same_name"
            };
            found.insert(path, relation);
        }
    }

    found
        .into_iter()
        .map(|(path, relation)| RelatedFile {
            path: path.display().to_string(),
            relation,
        })
        .collect()
}

/// Lists files related to a source file: its tests, the source a test covers, and
/// siblings sharing its name with another extension.
///
/// Relations are recognized by name (`sample.py`, `sample_test.py`, `test_sample.py`,
/// `sample.spec.ts`) in the file's directory, its `tests`-style subdirectories and, for a
/// test directory, the directory above.
#[derive(Debug, Clone)]
pub struct RelatedFilesTool {
    roots: RootRegistry,
}

impl RelatedFilesTool {
    /// Creates the tool over the given registry.
    #[must_use]
    pub const fn new(roots: RootRegistry) -> Self {
        Self { roots }
    }
}

/// Arguments for [`RelatedFilesTool`].
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RelatedFilesArgs {
    /// File to find relatives of.
    pub path: String,
}

impl Tool for RelatedFilesTool {
    fn name(&self) -> Cow<'static, str> {
        "related_files".into()
    }

    fn description(&self) -> Cow<'static, str> {
        "Finds the tests of a source file, the source of a test file, and files sharing its \
         name with another extension."
            .into()
    }

    type Arguments = RelatedFilesArgs;

    async fn call(&self, args: Self::Arguments) -> windtools_core::Result {
        let target = resolve_file(&self.roots, &args.path)?;
        let roots = self.roots.clone();
        let related_files = blocking::unblock(move || find_related(&roots, &target)).await;
        Ok(json(&RelatedFiles { related_files }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Sandbox;

    const PYTHON: &str = r#"
import functools

def hello_world():
    print("Hello, World!")
    return True

class TestClass:
    def __init__(self, name):
        self.name = name

    @functools.cache
    def greet(self):
        return f"Hello, {self.name}!"

def find_items(
    items,
    search_term,
):
    return [item for item in items if search_term in item]
"#;

    const JAVASCRIPT: &str = r"
function helloWorld() {
    console.log('Hello, World!');
    return true;
}

class TestClass {
    constructor(name) {
        this.name = name;
    }

    greet() {
        return `Hello, ${this.name}!`;
    }
}

const findItems = (items, searchTerm) => items.filter(item => item.includes(searchTerm));
";

    fn view(path: &str, item: &str) -> ViewCodeItemArgs {
        ViewCodeItemArgs {
            path: path.into(),
            item: item.into(),
        }
    }

    #[tokio::test]
    async fn views_a_python_function() {
        let sandbox = Sandbox::new();
        sandbox.write("sample.py", PYTHON);
        let tool = ViewCodeItemTool::new(sandbox.roots.clone());

        let output = tool.call(view("sample.py", "hello_world")).await.unwrap();
        assert!(output.contains("def hello_world():"));
        assert!(output.contains("print(\"Hello, World!\")"));
        assert!(output.contains("return True"));
        assert!(!output.contains("class TestClass"));
        assert!(output.lines().next().unwrap().ends_with("sample.py:4-6"));
    }

    #[tokio::test]
    async fn views_a_nested_python_method() {
        let sandbox = Sandbox::new();
        sandbox.write("sample.py", PYTHON);
        let tool = ViewCodeItemTool::new(sandbox.roots.clone());

        let output = tool.call(view("sample.py", "TestClass.greet")).await.unwrap();
        assert!(output.contains("@functools.cache"));
        assert!(output.contains("def greet(self):"));
        assert!(output.contains("return f\"Hello, {self.name}!\""));
        assert!(!output.contains("__init__"));
        assert!(!output.contains("find_items"));

        let multiline = tool.call(view("sample.py", "find_items")).await.unwrap();
        assert!(multiline.contains("):\n    return [item"));
    }

    #[tokio::test]
    async fn views_javascript_items() {
        let sandbox = Sandbox::new();
        sandbox.write("sample.js", JAVASCRIPT);
        let tool = ViewCodeItemTool::new(sandbox.roots.clone());

        let function = tool.call(view("sample.js", "helloWorld")).await.unwrap();
        assert!(function.contains("function helloWorld()"));
        assert!(function.contains("console.log("));
        assert!(function.contains("return true;"));
        assert!(!function.contains("class TestClass"));

        let method = tool.call(view("sample.js", "TestClass.greet")).await.unwrap();
        assert!(method.contains("greet() {"));
        assert!(method.contains("return `Hello, ${this.name}!`;"));
        assert!(!method.contains("constructor"));

        let arrow = tool.call(view("sample.js", "findItems")).await.unwrap();
        assert_eq!(arrow.lines().count(), 2);
    }

    #[tokio::test]
    async fn unknown_items_and_files() {
        let sandbox = Sandbox::new();
        sandbox.write("sample.py", PYTHON);
        let tool = ViewCodeItemTool::new(sandbox.roots.clone());

        let missing = tool
            .call(view("sample.py", "nonexistent_function"))
            .await
            .unwrap_err();
        assert!(missing.to_string().contains("not found"));
        assert!(matches!(
            missing.downcast_ref::<Error>(),
            Some(Error::NotFound(_))
        ));

        let nested = tool
            .call(view("sample.py", "TestClass.hello_world"))
            .await
            .unwrap_err();
        assert!(nested.to_string().contains("not found"));

        let no_file = tool.call(view("absent.py", "x")).await.unwrap_err();
        assert!(no_file.to_string().contains("does not exist"));
    }

    #[test]
    fn braces_in_strings_do_not_close_blocks() {
        let lines = [
            "fn render() -> String {",
            "    let open = \"{\";",
            "    format!(\"{open}}}\") // }",
            "}",
            "fn next() {}",
        ];
        let syntax = Syntax::Braces {
            single_quote_strings: false,
        };
        assert_eq!(locate(&lines, syntax, "render").unwrap(), Some((0, 3)));
        assert_eq!(locate(&lines, syntax, "next").unwrap(), Some((4, 4)));
    }

    #[test]
    fn test_names_map_to_their_base() {
        assert_eq!(base_name("sample_test"), ("sample", true));
        assert_eq!(base_name("test_sample"), ("sample", true));
        assert_eq!(base_name("sample.spec"), ("sample", true));
        assert_eq!(base_name("sample"), ("sample", false));
        assert_eq!(base_name("test_"), ("test_", false));
    }

    fn related(output: &str) -> Vec<(String, String)> {
        let value: serde_json::Value = serde_json::from_str(output).unwrap();
        value["related_files"]
            .as_array()
            .unwrap()
            .iter()
            .map(|item| {
                let path = item["path"].as_str().unwrap();
                let name = Path::new(path).file_name().unwrap().to_string_lossy();
                (name.into_owned(), item["relation"].as_str().unwrap().to_owned())
            })
            .collect()
    }

    #[tokio::test]
    async fn finds_tests_and_siblings() {
        let sandbox = Sandbox::new();
        sandbox.write("sample.py", PYTHON);
        sandbox.write("sample_test.py", "import sample\n");
        sandbox.write("sample.js", JAVASCRIPT);
        sandbox.write("tests/test_sample.py", "import sample\n");
        sandbox.write("other.py", "");
        let tool = RelatedFilesTool::new(sandbox.roots.clone());

        let found = related(
            &tool
                .call(RelatedFilesArgs {
                    path: "sample.py".into(),
                })
                .await
                .unwrap(),
        );
        assert!(found.contains(&("sample_test.py".into(), "test".into())));
        assert!(found.contains(&("test_sample.py".into(), "test".into())));
        assert!(found.contains(&("sample.js".into(), "same_name".into())));
        assert!(!found.iter().any(|(name, _)| name == "other.py" || name == "sample.py"));

        let from_test = related(
            &tool
                .call(RelatedFilesArgs {
                    path: "tests/test_sample.py".into(),
                })
                .await
                .unwrap(),
        );
        assert!(from_test.contains(&("sample.py".into(), "source".into())));
    }

    #[tokio::test]
    async fn related_files_of_missing_file() {
        let sandbox = Sandbox::new();
        let tool = RelatedFilesTool::new(sandbox.roots.clone());

        let error = tool
            .call(RelatedFilesArgs {
                path: "absent.py".into(),
            })
            .await
            .unwrap_err();
        assert!(error.to_string().contains("does not exist"));
    }

    #[tokio::test]
    async fn related_files_is_confined() {
        let sandbox = Sandbox::new();
        let outside = tempfile::tempdir().unwrap();
        let file = outside.path().join("sample.py");
        std::fs::write(&file, "").unwrap();
        let tool = RelatedFilesTool::new(sandbox.roots.clone());

        let error = tool
            .call(RelatedFilesArgs {
                path: Sandbox::arg(&file),
            })
            .await
            .unwrap_err();
        assert!(matches!(
            error.downcast_ref::<Error>(),
            Some(Error::AccessDenied(_))
        ));
    }
}
