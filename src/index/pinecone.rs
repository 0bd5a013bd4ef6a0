//! Pinecone vector service client.
//!
//! Two halves, matching Pinecone's own split:
//!
//! - [`PineconeClient`] talks to the control plane (`api.pinecone.io`):
//!   list, describe and create indexes.
//! - [`PineconeIndex`] talks to one index's data-plane host and implements
//!   [`VectorIndex`].
//!
//! # Configuration
//!
//! ```toml
//! [vector]
//! provider = "pinecone"
//! index_name = "ba-agent-documents"
//! dimension = 384
//! metric = "cosine"
//! cloud = "aws"
//! region = "us-east-1"
//! ```
//!
//! The API key is read from `PINECONE_API_KEY`.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use crate::config::VectorConfig;
use crate::error::{Error, Result};
use crate::models::{Metadata, QueryMatch, VectorEntry};

use super::{IndexStats, MetadataFilter, VectorIndex};

const API_VERSION: &str = "2024-07";
/// Pinecone accepts at most 1000 vectors per upsert; smaller batches keep
/// request bodies well under the 2 MB limit with 384-dim vectors.
const UPSERT_BATCH_SIZE: usize = 100;
const READY_POLL_ATTEMPTS: u32 = 30;
const READY_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// An index as reported by the control plane.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDescription {
    pub name: String,
    pub dimension: usize,
    pub metric: String,
    pub host: String,
    pub ready: bool,
}

/// What [`PineconeClient::ensure_index`] had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexSetup {
    Existing,
    Created,
}

pub struct PineconeClient {
    http: reqwest::Client,
    api_key: String,
    controller_url: String,
    cloud: String,
    region: String,
}

impl PineconeClient {
    pub fn new(api_key: &str, config: &VectorConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::IndexUnavailable(e.to_string()))?;
        Ok(Self {
            http,
            api_key: api_key.to_string(),
            controller_url: config.controller_url.trim_end_matches('/').to_string(),
            cloud: config.cloud.clone(),
            region: config.region.clone(),
        })
    }

    /// Build a client with the key from `PINECONE_API_KEY`.
    pub fn from_env(config: &VectorConfig) -> Result<Self> {
        let api_key = std::env::var("PINECONE_API_KEY").map_err(|_| {
            Error::IndexUnavailable("PINECONE_API_KEY environment variable not set".to_string())
        })?;
        Self::new(&api_key, config)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.controller_url, path))
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
    }

    pub async fn list_indexes(&self) -> Result<Vec<IndexDescription>> {
        let json = send(self.request(reqwest::Method::GET, "/indexes")).await?;
        parse_index_list(&json)
    }

    /// Look up one index. `Ok(None)` if it does not exist.
    pub async fn describe_index(&self, name: &str) -> Result<Option<IndexDescription>> {
        let resp = self
            .request(reqwest::Method::GET, &format!("/indexes/{}", name))
            .send()
            .await
            .map_err(|e| Error::IndexUnavailable(e.to_string()))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let json = read_json(resp).await?;
        parse_index_description(&json).map(Some)
    }

    /// Create a serverless index. If the service rejects the `serverless`
    /// block, retries once without it so the service picks its default.
    /// An index that already exists is not an error.
    pub async fn create_index(&self, name: &str, dimension: usize, metric: &str) -> Result<()> {
        let serverless = json!({
            "name": name,
            "dimension": dimension,
            "metric": metric,
            "spec": { "serverless": { "cloud": self.cloud, "region": self.region } },
        });

        let resp = self
            .request(reqwest::Method::POST, "/indexes")
            .json(&serverless)
            .send()
            .await
            .map_err(|e| Error::IndexUnavailable(e.to_string()))?;
        let status = resp.status();
        if status.is_success() || status == reqwest::StatusCode::CONFLICT {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        if !status.is_client_error() {
            return Err(Error::IndexUnavailable(format!(
                "create index '{}' failed (HTTP {}): {}",
                name, status, body
            )));
        }

        tracing::warn!(index = name, %status, "serverless index body rejected, retrying without it");
        let plain = json!({ "name": name, "dimension": dimension, "metric": metric });
        let resp = self
            .request(reqwest::Method::POST, "/indexes")
            .json(&plain)
            .send()
            .await
            .map_err(|e| Error::IndexUnavailable(e.to_string()))?;
        if resp.status() == reqwest::StatusCode::CONFLICT {
            return Ok(());
        }
        read_json(resp).await.map(|_| ())
    }

    /// Reuse `name` if it exists, otherwise create it and wait until it is
    /// ready. An existing index with a different dimension is an error.
    pub async fn ensure_index(
        &self,
        name: &str,
        dimension: usize,
        metric: &str,
    ) -> Result<IndexSetup> {
        let existing = self.list_indexes().await?;
        if let Some(index) = existing.iter().find(|i| i.name == name) {
            check_existing_index(index, dimension, metric)?;
            tracing::info!(index = name, "vector index already exists");
            return Ok(IndexSetup::Existing);
        }

        tracing::info!(index = name, dimension, metric, "creating vector index");
        self.create_index(name, dimension, metric).await?;
        self.wait_until_ready(name).await?;
        Ok(IndexSetup::Created)
    }

    async fn wait_until_ready(&self, name: &str) -> Result<IndexDescription> {
        for attempt in 0..READY_POLL_ATTEMPTS {
            if let Some(desc) = self.describe_index(name).await? {
                if desc.ready {
                    return Ok(desc);
                }
            }
            tracing::debug!(index = name, attempt, "waiting for index to become ready");
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
        Err(Error::IndexUnavailable(format!(
            "index '{}' not ready after {} checks",
            name, READY_POLL_ATTEMPTS
        )))
    }

    /// Data-plane handle for an existing index.
    pub async fn index(&self, name: &str) -> Result<PineconeIndex> {
        let desc = self.describe_index(name).await?.ok_or_else(|| {
            Error::IndexUnavailable(format!(
                "index '{}' does not exist; run `ba index setup`",
                name
            ))
        })?;
        Ok(PineconeIndex::new(
            name,
            &desc.host,
            &self.api_key,
            self.http.clone(),
        ))
    }
}

/// Data-plane client for one Pinecone index.
pub struct PineconeIndex {
    name: String,
    base_url: String,
    api_key: String,
    http: reqwest::Client,
}

impl PineconeIndex {
    pub fn new(name: &str, host: &str, api_key: &str, http: reqwest::Client) -> Self {
        let base_url = if host.starts_with("http://") || host.starts_with("https://") {
            host.trim_end_matches('/').to_string()
        } else {
            format!("https://{}", host.trim_end_matches('/'))
        };
        Self {
            name: name.to_string(),
            base_url,
            api_key: api_key.to_string(),
            http,
        }
    }

    fn post(&self, path: &str, body: &Value) -> reqwest::RequestBuilder {
        self.http
            .post(format!("{}{}", self.base_url, path))
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
            .json(body)
    }
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    fn name(&self) -> &str {
        &self.name
    }

    async fn upsert(&self, entries: &[VectorEntry]) -> Result<()> {
        for batch in entries.chunks(UPSERT_BATCH_SIZE) {
            let vectors: Vec<Value> = batch
                .iter()
                .map(|e| json!({ "id": e.id, "values": e.values, "metadata": e.metadata }))
                .collect();
            send(self.post("/vectors/upsert", &json!({ "vectors": vectors }))).await?;
        }
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<QueryMatch>> {
        let mut body = json!({
            "vector": vector,
            "topK": top_k,
            "includeMetadata": true,
            "includeValues": false,
        });
        if let Some(filter) = filter {
            body["filter"] = filter.to_pinecone();
        }
        let json = send(self.post("/query", &body)).await?;
        Ok(parse_matches(&json))
    }

    async fn delete(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        send(self.post("/vectors/delete", &json!({ "ids": ids }))).await?;
        Ok(())
    }

    async fn describe_stats(&self) -> Result<IndexStats> {
        let json = send(self.post("/describe_index_stats", &json!({}))).await?;
        Ok(parse_stats(&json))
    }
}

async fn send(req: reqwest::RequestBuilder) -> Result<Value> {
    let resp = req
        .send()
        .await
        .map_err(|e| Error::IndexUnavailable(e.to_string()))?;
    read_json(resp).await
}

async fn read_json(resp: reqwest::Response) -> Result<Value> {
    let status = resp.status();
    let text = resp
        .text()
        .await
        .map_err(|e| Error::IndexUnavailable(e.to_string()))?;
    if !status.is_success() {
        return Err(Error::IndexUnavailable(format!(
            "Pinecone API error (HTTP {}): {}",
            status, text
        )));
    }
    if text.trim().is_empty() {
        return Ok(json!({}));
    }
    serde_json::from_str(&text)
        .map_err(|e| Error::IndexUnavailable(format!("invalid Pinecone response: {}", e)))
}

/// An existing index is reusable only with the requested dimension and
/// metric.
fn check_existing_index(index: &IndexDescription, dimension: usize, metric: &str) -> Result<()> {
    if index.dimension != dimension {
        return Err(Error::IndexUnavailable(format!(
            "index '{}' exists with dimension {}, expected {}",
            index.name, index.dimension, dimension
        )));
    }
    if !index.metric.eq_ignore_ascii_case(metric) {
        return Err(Error::IndexUnavailable(format!(
            "index '{}' exists with metric {}, expected {}",
            index.name, index.metric, metric
        )));
    }
    Ok(())
}

fn parse_index_description(json: &Value) -> Result<IndexDescription> {
    let name = json
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::IndexUnavailable("index description missing name".into()))?;
    Ok(IndexDescription {
        name: name.to_string(),
        dimension: json.get("dimension").and_then(Value::as_u64).unwrap_or(0) as usize,
        metric: json
            .get("metric")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        host: json
            .get("host")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        ready: json
            .pointer("/status/ready")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    })
}

fn parse_index_list(json: &Value) -> Result<Vec<IndexDescription>> {
    json.get("indexes")
        .and_then(Value::as_array)
        .map(|items| items.iter().map(parse_index_description).collect())
        .unwrap_or_else(|| Ok(Vec::new()))
}

fn parse_matches(json: &Value) -> Vec<QueryMatch> {
    json.get("matches")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|m| {
                    let id = m.get("id").and_then(Value::as_str)?;
                    Some(QueryMatch {
                        id: id.to_string(),
                        score: m.get("score").and_then(Value::as_f64).unwrap_or(0.0) as f32,
                        metadata: m
                            .get("metadata")
                            .and_then(Value::as_object)
                            .cloned()
                            .unwrap_or_else(Metadata::new),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_stats(json: &Value) -> IndexStats {
    IndexStats {
        dimension: json.get("dimension").and_then(Value::as_u64).unwrap_or(0) as usize,
        total_vector_count: json
            .get("totalVectorCount")
            .and_then(Value::as_u64)
            .unwrap_or(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_index_list() {
        let json = json!({
            "indexes": [
                {
                    "name": "ba-agent-documents",
                    "dimension": 384,
                    "metric": "cosine",
                    "host": "ba-agent-documents-abc123.svc.aped-4627-b74a.pinecone.io",
                    "status": { "ready": true, "state": "Ready" }
                },
                { "name": "other", "dimension": 1536, "metric": "dotproduct" }
            ]
        });
        let indexes = parse_index_list(&json).unwrap();
        assert_eq!(indexes.len(), 2);
        assert_eq!(indexes[0].dimension, 384);
        assert!(indexes[0].ready);
        assert!(!indexes[1].ready);
        assert_eq!(indexes[1].host, "");
    }

    fn description(dimension: usize, metric: &str) -> IndexDescription {
        IndexDescription {
            name: "ba-agent-documents".to_string(),
            dimension,
            metric: metric.to_string(),
            host: String::new(),
            ready: true,
        }
    }

    #[test]
    fn test_existing_index_must_match_dimension_and_metric() {
        assert!(check_existing_index(&description(384, "cosine"), 384, "cosine").is_ok());
        assert!(check_existing_index(&description(384, "Cosine"), 384, "cosine").is_ok());

        let err = check_existing_index(&description(1536, "cosine"), 384, "cosine").unwrap_err();
        assert!(err.to_string().contains("dimension 1536"));

        let err = check_existing_index(&description(384, "dotproduct"), 384, "cosine").unwrap_err();
        assert!(err.to_string().contains("metric dotproduct"));
        assert!(err.is_unavailable());
    }

    #[test]
    fn test_parse_index_list_without_indexes_key() {
        assert!(parse_index_list(&json!({})).unwrap().is_empty());
    }

    #[test]
    fn test_parse_matches_keeps_metadata() {
        let json = json!({
            "matches": [
                { "id": "c1", "score": 0.92, "metadata": { "lob": "personal_auto" } },
                { "id": "c2", "score": 0.5 },
                { "score": 0.1 }
            ],
            "namespace": ""
        });
        let matches = parse_matches(&json);
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].id, "c1");
        assert!((matches[0].score - 0.92).abs() < 1e-6);
        assert_eq!(matches[0].metadata["lob"], "personal_auto");
        assert!(matches[1].metadata.is_empty());
    }

    #[test]
    fn test_parse_matches_empty_response() {
        assert!(parse_matches(&json!({ "matches": [] })).is_empty());
        assert!(parse_matches(&json!({})).is_empty());
    }

    #[test]
    fn test_parse_stats() {
        let json = json!({
            "namespaces": { "": { "vectorCount": 42 } },
            "dimension": 384,
            "indexFullness": 0.0,
            "totalVectorCount": 42
        });
        let stats = parse_stats(&json);
        assert_eq!(stats.dimension, 384);
        assert_eq!(stats.total_vector_count, 42);
    }

    #[test]
    fn test_index_base_url_from_bare_host() {
        let index = PineconeIndex::new("i", "idx-abc.svc.pinecone.io", "k", reqwest::Client::new());
        assert_eq!(index.base_url, "https://idx-abc.svc.pinecone.io");
        let local = PineconeIndex::new("i", "http://localhost:5081/", "k", reqwest::Client::new());
        assert_eq!(local.base_url, "http://localhost:5081");
    }
}
