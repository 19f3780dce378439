//! Walking a directory into a [`CodeIndex`].

use std::{fs, path::Path};

use tracing::{debug, info};
use walkdir::{DirEntry, WalkDir};

use crate::{CodeChunk, CodeIndex};

/// Lines per chunk.
pub const CHUNK_LINES: usize = 40;
/// Files larger than this are skipped.
pub const MAX_FILE_BYTES: u64 = 1024 * 1024;

/// Directories that hold dependencies or build output rather than source.
const SKIPPED_DIRS: &[&str] = &["target", "node_modules", "__pycache__", "venv", "dist", "build"];

/// Totals from one indexing run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexReport {
    /// Files that were chunked.
    pub files: usize,
    /// Chunks inserted.
    pub chunks: usize,
    /// Files skipped as binary, oversized or unreadable.
    pub skipped: usize,
}

/// Splits text into chunks of [`CHUNK_LINES`] lines.
#[must_use]
pub fn chunk_text(path: &Path, text: &str) -> Vec<CodeChunk> {
    let lines: Vec<&str> = text.lines().collect();
    lines
        .chunks(CHUNK_LINES)
        .enumerate()
        .filter(|(_, block)| block.iter().any(|line| !line.trim().is_empty()))
        .map(|(index, block)| {
            let start_line = index * CHUNK_LINES + 1;
            CodeChunk {
                path: path.to_path_buf(),
                start_line,
                end_line: start_line + block.len() - 1,
                text: block.join("\n"),
            }
        })
        .collect()
}

fn is_skipped_dir(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry.file_name().to_str().is_some_and(|name| {
            name.starts_with('.') || SKIPPED_DIRS.contains(&name)
        })
}

fn read_source(path: &Path) -> Option<String> {
    let metadata = fs::metadata(path).ok()?;
    if metadata.len() > MAX_FILE_BYTES {
        return None;
    }
    let bytes = fs::read(path).ok()?;
    if bytes.contains(&0) {
        return None;
    }
    String::from_utf8(bytes).ok()
}

/// Indexes every text file below `dir`, replacing earlier chunks of the same files.
///
/// Hidden directories and common dependency or build directories are skipped, and symlinks
/// are not followed, so nothing outside `dir` is read.
pub fn index_directory(index: &dyn CodeIndex, dir: &Path) -> IndexReport {
    let mut report = IndexReport::default();
    let files = WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| !is_skipped_dir(entry))
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file());

    for entry in files {
        let path = entry.path();
        let Some(text) = read_source(path) else {
            debug!(path = %path.display(), "skipping file");
            report.skipped += 1;
            continue;
        };
        index.remove_file(path);
        let chunks = chunk_text(path, &text);
        report.files += 1;
        report.chunks += chunks.len();
        for chunk in chunks {
            index.insert(chunk);
        }
    }

    info!(
        dir = %dir.display(),
        files = report.files,
        chunks = report.chunks,
        skipped = report.skipped,
        "indexed directory"
    );
    report
}
