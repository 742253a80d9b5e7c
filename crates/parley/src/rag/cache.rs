use dashmap::DashMap;
use std::sync::Arc;

use super::index::FlatL2Index;
use crate::errors::AgentResult;

/// A document prepared for retrieval: its chunks and their embeddings
#[derive(Debug)]
pub struct IndexedDocument {
    pub index: FlatL2Index,
    pub chunks: Vec<String>,
}

impl IndexedDocument {
    pub fn new(index: FlatL2Index, chunks: Vec<String>) -> Self {
        Self { index, chunks }
    }

    /// The `k` chunks closest to the query, closest first
    pub fn nearest(&self, query: &[f32], k: usize) -> AgentResult<Vec<&str>> {
        Ok(self
            .index
            .search(query, k)?
            .into_iter()
            .filter_map(|(id, _)| self.chunks.get(id).map(String::as_str))
            .collect())
    }
}

/// Indexed documents keyed by conversation and file url.
///
/// Entries live for the lifetime of the process.
#[derive(Debug, Default)]
pub struct DocumentCache {
    entries: DashMap<(String, String), Arc<IndexedDocument>>,
}

impl DocumentCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, conversation_id: &str, file_url: &str) -> Option<Arc<IndexedDocument>> {
        self.entries
            .get(&(conversation_id.to_string(), file_url.to_string()))
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn insert(
        &self,
        conversation_id: &str,
        file_url: &str,
        document: IndexedDocument,
    ) -> Arc<IndexedDocument> {
        let document = Arc::new(document);
        self.entries.insert(
            (conversation_id.to_string(), file_url.to_string()),
            Arc::clone(&document),
        );
        document
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
