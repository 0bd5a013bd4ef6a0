//! Vector index abstraction.
//!
//! The [`VectorIndex`] trait is the only thing the pipeline and the search
//! path know about the vector service. Two implementations ship with the
//! crate:
//!
//! - [`memory::InMemoryIndex`]: brute-force cosine search in process memory.
//! - [`pinecone::PineconeIndex`]: a managed Pinecone index over HTTP.
//!
//! Use [`open_index`] to get the implementation named by `[vector]`.

pub mod memory;
pub mod pinecone;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use crate::config::VectorConfig;
use crate::error::{Error, Result};
use crate::models::{Metadata, QueryMatch, VectorEntry};

/// Equality filter on one metadata field, e.g. `lob = personal_auto`.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataFilter {
    pub field: String,
    pub value: Value,
}

impl MetadataFilter {
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Self {
            field: field.to_string(),
            value: value.into(),
        }
    }

    /// Filter restricting results to one line of business.
    pub fn lob(lob: &str) -> Self {
        Self::eq("lob", lob)
    }

    pub fn matches(&self, metadata: &Metadata) -> bool {
        metadata.get(&self.field) == Some(&self.value)
    }

    /// Render as a Pinecone filter expression: `{"field": {"$eq": value}}`.
    pub fn to_pinecone(&self) -> Value {
        let mut filter = serde_json::Map::new();
        filter.insert(
            self.field.clone(),
            serde_json::json!({ "$eq": self.value }),
        );
        Value::Object(filter)
    }
}

/// Summary returned by [`VectorIndex::describe_stats`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndexStats {
    pub dimension: usize,
    pub total_vector_count: u64,
}

/// Stores `(id, vector, metadata)` entries and answers similarity queries.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert`](VectorIndex::upsert) | Insert or overwrite entries by id |
/// | [`query`](VectorIndex::query) | Top-k by descending cosine similarity |
/// | [`delete`](VectorIndex::delete) | Remove entries by id; absent ids are fine |
/// | [`describe_stats`](VectorIndex::describe_stats) | Dimension and entry count |
///
/// Any failure of the underlying service is [`Error::IndexUnavailable`].
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Index name, for log lines.
    fn name(&self) -> &str;

    async fn upsert(&self, entries: &[VectorEntry]) -> Result<()>;

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<QueryMatch>>;

    async fn delete(&self, ids: &[String]) -> Result<()>;

    async fn describe_stats(&self) -> Result<IndexStats>;

    /// Whether entries outlive the process. Process-local indexes return
    /// `false`.
    fn is_persistent(&self) -> bool {
        true
    }
}

/// Cut `text` to at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}

/// Open the index named by `[vector]`.
///
/// | `provider` | Index |
/// |------------|-------|
/// | `"memory"` | [`memory::InMemoryIndex`] (empty, process-local) |
/// | `"pinecone"` | existing Pinecone index `index_name` |
/// | `"disabled"` | always [`Error::IndexUnavailable`] |
///
/// The Pinecone index must already exist; `ba index setup` creates it.
pub async fn open_index(config: &VectorConfig) -> Result<Arc<dyn VectorIndex>> {
    match config.provider.as_str() {
        "memory" => Ok(Arc::new(memory::InMemoryIndex::new(
            &config.index_name,
            config.dimension,
        ))),
        "pinecone" => {
            let client = pinecone::PineconeClient::from_env(config)?;
            Ok(Arc::new(client.index(&config.index_name).await?))
        }
        "disabled" => Err(Error::IndexUnavailable(
            "vector provider is disabled".to_string(),
        )),
        other => Err(Error::IndexUnavailable(format!(
            "unknown vector provider: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_chars_counts_characters() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("short", 100), "short");
        assert_eq!(truncate_chars("", 5), "");
    }

    #[test]
    fn test_filter_renders_pinecone_eq() {
        let filter = MetadataFilter::lob("personal_auto");
        assert_eq!(
            filter.to_pinecone(),
            serde_json::json!({"lob": {"$eq": "personal_auto"}})
        );
    }

    #[test]
    fn test_filter_matches_only_equal_value() {
        let filter = MetadataFilter::lob("personal_auto");
        let mut meta = Metadata::new();
        assert!(!filter.matches(&meta));
        meta.insert("lob".into(), Value::from("commercial_property"));
        assert!(!filter.matches(&meta));
        meta.insert("lob".into(), Value::from("personal_auto"));
        assert!(filter.matches(&meta));
    }

    #[tokio::test]
    async fn test_open_disabled_index_is_unavailable() {
        let config = VectorConfig {
            provider: "disabled".to_string(),
            ..VectorConfig::default()
        };
        let err = open_index(&config).await.err().unwrap();
        assert!(err.is_unavailable());
    }
}
