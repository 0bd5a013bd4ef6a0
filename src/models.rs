//! Core data models.
//!
//! Persisted records (documents, analyses, approvals), the ephemeral
//! [`Chunk`] produced by the chunker, and the vector-index payloads that
//! flow between the pipeline and the [`VectorIndex`](crate::index::VectorIndex).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Free-form JSON object used for record metadata and vector metadata.
pub type Metadata = Map<String, Value>;

// ============ Documents ============

/// Lifecycle of a document record.
///
/// ```text
/// uploaded ──▶ processing ──▶ processed
///     │            │
///     └──────▶  failed ──▶ processing (next attempt)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Uploaded,
    Processing,
    Processed,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Uploaded => "uploaded",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Processed => "processed",
            DocumentStatus::Failed => "failed",
        }
    }

    /// Whether `self -> next` is a legal lifecycle step. Staying in the
    /// same state is always allowed.
    pub fn can_transition_to(&self, next: DocumentStatus) -> bool {
        use DocumentStatus::*;
        if *self == next {
            return true;
        }
        matches!(
            (self, next),
            (Uploaded, Processing)
                | (Uploaded, Failed)
                | (Processing, Processed)
                | (Processing, Failed)
                | (Failed, Processing)
        )
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for DocumentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploaded" => Ok(DocumentStatus::Uploaded),
            "processing" => Ok(DocumentStatus::Processing),
            "processed" => Ok(DocumentStatus::Processed),
            "failed" => Ok(DocumentStatus::Failed),
            other => Err(format!("unknown document status: '{}'", other)),
        }
    }
}

/// An ingested file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: String,
    /// Owner identifier (an e-mail address, or `guest`).
    pub user_email: String,
    pub name: String,
    pub file_type: String,
    pub upload_date: DateTime<Utc>,
    pub file_path: String,
    /// Extracted plain text, once extraction has run.
    pub content: Option<String>,
    pub meta: Metadata,
    pub status: DocumentStatus,
}

impl DocumentRecord {
    /// A fresh record in the `uploaded` state with a random id.
    pub fn new(
        user_email: &str,
        name: &str,
        file_type: &str,
        file_path: &str,
        meta: Metadata,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_email: user_email.to_string(),
            name: name.to_string(),
            file_type: file_type.to_string(),
            upload_date: Utc::now(),
            file_path: file_path.to_string(),
            content: None,
            meta,
            status: DocumentStatus::Uploaded,
        }
    }
}

// ============ Analyses ============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub id: String,
    pub title: String,
    pub date: DateTime<Utc>,
    pub status: String,
    /// Not loaded by list queries.
    pub original_text: Option<String>,
    /// Not loaded by list queries.
    pub results: Option<Value>,
    /// Soft reference to a [`DocumentRecord`]; not enforced.
    pub document_id: Option<String>,
    pub user_email: Option<String>,
}

impl AnalysisRecord {
    pub fn new(title: &str, original_text: &str, results: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            date: Utc::now(),
            status: "completed".to_string(),
            original_text: Some(original_text.to_string()),
            results: Some(results),
            document_id: None,
            user_email: None,
        }
    }
}

// ============ Approvals ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for ApprovalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ApprovalStatus::Pending),
            "approved" => Ok(ApprovalStatus::Approved),
            "rejected" => Ok(ApprovalStatus::Rejected),
            other => Err(format!(
                "unknown approval status: '{}'. Must be pending, approved, or rejected.",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub id: String,
    pub analysis_id: String,
    pub status: ApprovalStatus,
    pub created_date: DateTime<Utc>,
    pub updated_date: DateTime<Utc>,
    pub approver_email: Option<String>,
    pub results_summary: Option<Value>,
    pub approver_response: Option<String>,
    /// Outcome of pushing the approved analysis to the work tracker.
    pub ado_result: Option<Value>,
}

impl ApprovalRecord {
    pub fn new(analysis_id: &str, approver_email: Option<&str>, results_summary: Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            analysis_id: analysis_id.to_string(),
            status: ApprovalStatus::Pending,
            created_date: now,
            updated_date: now,
            approver_email: approver_email.map(str::to_string),
            results_summary: Some(results_summary),
            approver_response: None,
            ado_result: None,
        }
    }
}

/// Partial update for an approval. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct ApprovalUpdate {
    pub status: Option<ApprovalStatus>,
    pub updated_date: Option<DateTime<Utc>>,
    pub approver_response: Option<String>,
    pub ado_result: Option<Value>,
}

// ============ Chunks and vectors ============

/// A span of a document's extracted text. Never persisted on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub document_id: String,
    /// Position of this chunk within the document, starting at 0.
    pub ordinal: usize,
    /// Number of chunks the document was split into.
    pub total: usize,
    /// Character offset of the first character in the source text.
    pub start: usize,
    pub text: String,
}

/// One (vector, metadata) pair as stored in the vector index.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorEntry {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: Metadata,
}

/// A single similarity-search match.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryMatch {
    pub id: String,
    pub score: f32,
    pub metadata: Metadata,
}

/// A retrieval result shaped for callers of [`crate::search`].
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub document_id: String,
    pub document_name: String,
    pub content: String,
    pub score: f32,
    pub lob: String,
    pub metadata: Metadata,
}

impl SearchHit {
    pub fn from_match(m: QueryMatch) -> Self {
        let field = |key: &str| {
            m.metadata
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        Self {
            document_id: field("document_id"),
            document_name: field("document_name"),
            content: field("content"),
            lob: field("lob"),
            id: m.id,
            score: m.score,
            metadata: m.metadata,
        }
    }
}
