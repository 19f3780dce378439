use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
};

use parking_lot::RwLock;

use crate::{CodeChunk, CodeIndex, SearchHit};

/// In-memory index ranking chunks by how many query terms they contain.
///
/// Terms are lowercase identifier fragments: `parseConfigFile` and `parse_config_file`
/// both yield `parse`, `config` and `file`.
#[derive(Debug, Default)]
pub struct KeywordIndex {
    files: RwLock<HashMap<PathBuf, Vec<Entry>>>,
}

#[derive(Debug)]
struct Entry {
    chunk: CodeChunk,
    terms: HashMap<String, usize>,
}

impl KeywordIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// Splits text into lowercase terms at non-alphanumeric characters and camelCase humps.
pub(crate) fn terms(text: &str) -> Vec<String> {
    let mut terms = Vec::new();
    for word in text.split(|c: char| !c.is_alphanumeric()) {
        let mut current = String::new();
        let mut previous_lower = false;
        for c in word.chars() {
            if c.is_uppercase() && previous_lower && !current.is_empty() {
                terms.push(std::mem::take(&mut current));
            }
            previous_lower = c.is_lowercase() || c.is_numeric();
            current.extend(c.to_lowercase());
        }
        if !current.is_empty() {
            terms.push(current);
        }
    }
    terms
}

fn score(entry: &Entry, query: &HashSet<String>) -> f32 {
    let mut matched = 0_usize;
    let mut occurrences = 0_usize;
    for term in query {
        if let Some(count) = entry.terms.get(term) {
            matched += 1;
            occurrences += count;
        }
    }
    if matched == 0 {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let coverage = matched as f32 / query.len() as f32;
    #[allow(clippy::cast_precision_loss)]
    let density = (occurrences as f32).ln_1p() / 10.0;
    coverage + density.min(0.5)
}

impl CodeIndex for KeywordIndex {
    fn insert(&self, chunk: CodeChunk) {
        let mut counts = HashMap::new();
        for term in terms(&chunk.text) {
            *counts.entry(term).or_insert(0) += 1;
        }
        self.files
            .write()
            .entry(chunk.path.clone())
            .or_default()
            .push(Entry {
                chunk,
                terms: counts,
            });
    }

    fn remove_file(&self, path: &Path) -> usize {
        self.files.write().remove(path).map_or(0, |entries| entries.len())
    }

    fn lookup(&self, query: &str, within: &[PathBuf], limit: usize) -> Vec<SearchHit> {
        let query: HashSet<String> = terms(query).into_iter().collect();
        if query.is_empty() || limit == 0 {
            return Vec::new();
        }

        let files = self.files.read();
        let mut hits: Vec<SearchHit> = files
            .iter()
            .filter(|(path, _)| within.is_empty() || within.iter().any(|dir| path.starts_with(dir)))
            .flat_map(|(_, entries)| entries)
            .filter_map(|entry| {
                let score = score(entry, &query);
                (score > 0.0).then(|| SearchHit {
                    chunk: entry.chunk.clone(),
                    score,
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.chunk.path.cmp(&b.chunk.path))
                .then_with(|| a.chunk.start_line.cmp(&b.chunk.start_line))
        });
        hits.truncate(limit);
        hits
    }

    fn len(&self) -> usize {
        self.files.read().values().map(Vec::len).sum()
    }
}
