//! Codebase search behind a small lookup/insert interface.
//!
//! [`CodeIndex`] is the seam: the tools only insert chunks and look them up, so the bundled
//! [`KeywordIndex`] can be swapped for an embedding-backed store without touching them.
//! Directories are indexed and searched only after passing the confinement gate.

mod index;
pub mod indexer;
mod keyword;
mod tools;

pub use index::{CodeChunk, CodeIndex, SearchHit};
pub use keyword::KeywordIndex;
pub use tools::{
    CodebaseSearchArgs, CodebaseSearchTool, IndexDirectoryArgs, IndexDirectoryTool,
    InitializationStatus, InitializationStatusTool, SearchState,
};
