//! In-memory [`VectorIndex`] for tests and offline runs.
//!
//! Entries live in a `HashMap` behind `std::sync::RwLock`. Queries are
//! brute-force cosine similarity over every stored vector.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::{Error, Result};
use crate::models::{Metadata, QueryMatch, VectorEntry};

use super::{IndexStats, MetadataFilter, VectorIndex};

struct StoredVector {
    values: Vec<f32>,
    metadata: Metadata,
}

pub struct InMemoryIndex {
    name: String,
    dimension: usize,
    entries: RwLock<HashMap<String, StoredVector>>,
}

impl InMemoryIndex {
    pub fn new(name: &str, dimension: usize) -> Self {
        Self {
            name: name.to_string(),
            dimension,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stored vector and metadata for `id`, if present.
    pub fn get(&self, id: &str) -> Option<(Vec<f32>, Metadata)> {
        self.read()
            .get(id)
            .map(|s| (s.values.clone(), s.metadata.clone()))
    }

    // A panic while holding the lock leaves the map itself intact.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, StoredVector>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, StoredVector>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_persistent(&self) -> bool {
        false
    }

    async fn upsert(&self, entries: &[VectorEntry]) -> Result<()> {
        if let Some(bad) = entries.iter().find(|e| e.values.len() != self.dimension) {
            return Err(Error::IndexUnavailable(format!(
                "vector '{}' has dimension {}, index expects {}",
                bad.id,
                bad.values.len(),
                self.dimension
            )));
        }
        let mut stored = self.write();
        for entry in entries {
            stored.insert(
                entry.id.clone(),
                StoredVector {
                    values: entry.values.clone(),
                    metadata: entry.metadata.clone(),
                },
            );
        }
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<QueryMatch>> {
        let stored = self.read();
        let mut matches: Vec<QueryMatch> = stored
            .iter()
            .filter(|(_, s)| filter.is_none_or(|f| f.matches(&s.metadata)))
            .map(|(id, s)| QueryMatch {
                id: id.clone(),
                score: cosine_similarity(vector, &s.values),
                metadata: s.metadata.clone(),
            })
            .collect();

        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn delete(&self, ids: &[String]) -> Result<()> {
        let mut stored = self.write();
        for id in ids {
            stored.remove(id);
        }
        Ok(())
    }

    async fn describe_stats(&self) -> Result<IndexStats> {
        Ok(IndexStats {
            dimension: self.dimension,
            total_vector_count: self.len() as u64,
        })
    }
}
