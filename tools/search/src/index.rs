//! The code index interface.

use std::path::{Path, PathBuf};

use serde::Serialize;

/// A contiguous range of lines from one source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CodeChunk {
    /// Absolute path of the file.
    pub path: PathBuf,
    /// First line, counting from 1.
    pub start_line: usize,
    /// Last line, inclusive.
    pub end_line: usize,
    /// The lines themselves.
    pub text: String,
}

/// A chunk returned by [`CodeIndex::lookup`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    /// The matching chunk.
    #[serde(flatten)]
    pub chunk: CodeChunk,
    /// Relevance, higher is better. Only comparable within one lookup.
    pub score: f32,
}

/// Storage and retrieval of code chunks.
///
/// The search tools only need insert and lookup, so any backend (an embedding store, a
/// full-text engine) can sit behind this trait.
pub trait CodeIndex: Send + Sync + std::fmt::Debug {
    /// Adds a chunk. Chunks of the same file accumulate until [`remove_file`](Self::remove_file).
    fn insert(&self, chunk: CodeChunk);

    /// Drops every chunk of `path`, returning how many were removed.
    fn remove_file(&self, path: &Path) -> usize;

    /// Returns up to `limit` chunks relevant to `query`, best first.
    ///
    /// When `within` is non-empty only chunks under one of those directories are considered.
    fn lookup(&self, query: &str, within: &[PathBuf], limit: usize) -> Vec<SearchHit>;

    /// Number of indexed chunks.
    fn len(&self) -> usize;

    /// Returns `true` if nothing is indexed.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
