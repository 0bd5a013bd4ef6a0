//! Document ingestion pipeline.
//!
//! Takes a folder of `.docx` files through
//! `Discovered → Extracted → Chunked → Embedding(i/n) → Indexed`, one file
//! at a time in file-name order, and one chunk at a time in ordinal order.
//!
//! Every file gets a document record, keyed by its path. Re-ingesting the
//! same file reuses its record, so the document id and therefore every chunk
//! id ([`chunk_id`]) stay the same and vectors are overwritten in place.
//! Files with the same name in different folders get separate records.
//!
//! The record's `vector_chunks` metadata bounds the ordinals that may still
//! have a vector. It only shrinks once the vectors above the new chunk count
//! have been deleted, so a shorter version ingested while the index is
//! unreachable is cleaned up on the next indexed run.
//!
//! Failures never stop the batch:
//! - a file that cannot be extracted is marked `failed` (with the stage in
//!   its metadata) and skipped;
//! - a chunk that cannot be embedded or upserted is counted and skipped;
//! - with no embedder or no index, documents are still stored and their
//!   chunks are reported as pending.
//!
//! Only run-level problems (missing folder, bad glob) return `Err`.

use std::fmt;
use std::path::{Path, PathBuf};

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde_json::Value;
use walkdir::WalkDir;

use crate::chunk::{chunk_id, hash_text, Chunker};
use crate::config::IngestConfig;
use crate::context::AppContext;
use crate::error::{Error, Result};
use crate::extract::{extract_file, file_type_of};
use crate::index::truncate_chars;
use crate::models::{Chunk, DocumentRecord, DocumentStatus, Metadata, VectorEntry};

const VECTOR_CHUNKS_KEY: &str = "vector_chunks";

/// How far a document got through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentStage {
    Discovered,
    Extracted,
    Chunked,
    Embedding,
    Indexed,
}

impl DocumentStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStage::Discovered => "discovered",
            DocumentStage::Extracted => "extracted",
            DocumentStage::Chunked => "chunked",
            DocumentStage::Embedding => "embedding",
            DocumentStage::Indexed => "indexed",
        }
    }
}

impl fmt::Display for DocumentStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Final state of one file.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentOutcome {
    /// Every chunk was embedded and upserted.
    Indexed,
    /// Stored and chunked, but some or all chunks have no vector.
    Stored,
    /// Counted only (dry run).
    Planned,
    /// Stopped at `stage`.
    Failed { stage: DocumentStage, reason: String },
}

#[derive(Debug, Clone)]
pub struct DocumentReport {
    pub path: PathBuf,
    pub document_id: Option<String>,
    pub chunks: usize,
    pub chunks_indexed: usize,
    pub chunks_failed: usize,
    pub outcome: DocumentOutcome,
}

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub lob: String,
    pub source_tag: String,
    pub owner: String,
    pub dry_run: bool,
}

impl IngestOptions {
    pub fn from_config(config: &IngestConfig) -> Self {
        Self {
            lob: config.lob.clone(),
            source_tag: config.source_tag.clone(),
            owner: config.owner.clone(),
            dry_run: false,
        }
    }
}

/// Counts for one ingestion run.
#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    pub files_discovered: usize,
    pub documents_indexed: usize,
    pub documents_stored: usize,
    pub documents_failed: usize,
    pub chunks_total: usize,
    pub chunks_indexed: usize,
    pub chunks_failed: usize,
    pub chunks_pending: usize,
    pub stale_vectors_deleted: usize,
    /// The index only lives as long as this process.
    pub ephemeral_index: bool,
    pub dry_run: bool,
    pub documents: Vec<DocumentReport>,
}

impl IngestReport {
    fn record(&mut self, doc: DocumentReport) {
        self.chunks_total += doc.chunks;
        self.chunks_indexed += doc.chunks_indexed;
        self.chunks_failed += doc.chunks_failed;
        match &doc.outcome {
            DocumentOutcome::Indexed => self.documents_indexed += 1,
            DocumentOutcome::Stored => {
                self.documents_stored += 1;
                self.chunks_pending += doc.chunks - doc.chunks_indexed - doc.chunks_failed;
            }
            DocumentOutcome::Planned => {}
            DocumentOutcome::Failed { .. } => self.documents_failed += 1,
        }
        self.documents.push(doc);
    }

    pub fn print_summary(&self, folder: &Path) {
        if self.dry_run {
            println!("ingest {} (dry-run)", folder.display());
            println!("  files found: {}", self.files_discovered);
            println!("  estimated chunks: {}", self.chunks_total);
            println!("  unreadable files: {}", self.documents_failed);
            return;
        }
        println!("ingest {}", folder.display());
        println!("  files found: {}", self.files_discovered);
        println!("  documents indexed: {}", self.documents_indexed);
        println!("  documents stored without vectors: {}", self.documents_stored);
        println!("  documents failed: {}", self.documents_failed);
        println!("  chunks: {}", self.chunks_total);
        println!("  chunks indexed: {}", self.chunks_indexed);
        println!("  chunks failed: {}", self.chunks_failed);
        println!("  chunks pending: {}", self.chunks_pending);
        if self.stale_vectors_deleted > 0 {
            println!("  stale vectors deleted: {}", self.stale_vectors_deleted);
        }
        if self.ephemeral_index {
            println!("  note: the in-memory index is discarded when this command exits");
        }
        for doc in &self.documents {
            if let DocumentOutcome::Failed { stage, reason } = &doc.outcome {
                println!("  failed {} (at {}): {}", doc.path.display(), stage, reason);
            }
        }
        println!("ok");
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| Error::Config(format!("invalid glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| Error::Config(format!("invalid glob set: {}", e)))
}

/// Files directly inside `folder` (not in subfolders) whose names match
/// one of `include_globs`, sorted by file name. Word lock files (`~$*`)
/// are ignored.
pub fn discover_files(folder: &Path, include_globs: &[String]) -> Result<Vec<PathBuf>> {
    if !folder.is_dir() {
        return Err(Error::Config(format!(
            "input folder does not exist: {}",
            folder.display()
        )));
    }
    let include = build_globset(include_globs)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(folder).min_depth(1).max_depth(1) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if name.starts_with("~$") || !include.is_match(name.as_ref()) {
            continue;
        }
        files.push(entry.into_path());
    }
    files.sort();
    Ok(files)
}

/// Ingest every matching file in `folder`.
pub async fn run_ingest(
    ctx: &AppContext,
    folder: &Path,
    options: &IngestOptions,
) -> Result<IngestReport> {
    let files = discover_files(folder, &ctx.config.ingest.include_globs)?;
    let chunker = Chunker::new(
        ctx.config.chunking.chunk_size,
        ctx.config.chunking.chunk_overlap,
    );

    let mut report = IngestReport {
        files_discovered: files.len(),
        ephemeral_index: ctx.index.as_ref().is_some_and(|i| !i.is_persistent()),
        dry_run: options.dry_run,
        ..IngestReport::default()
    };
    tracing::info!(
        folder = %folder.display(),
        files = files.len(),
        dry_run = options.dry_run,
        "starting ingestion"
    );
    if !options.dry_run && (ctx.embedder.is_none() || ctx.index.is_none()) {
        tracing::warn!("embedder or vector index unavailable; documents will be stored without vectors");
    }

    for path in &files {
        let doc = if options.dry_run {
            plan_document(path, &chunker)
        } else {
            let mut stale = 0;
            let doc = ingest_document(ctx, path, &chunker, options, &mut stale).await;
            report.stale_vectors_deleted += stale;
            doc
        };
        match &doc.outcome {
            DocumentOutcome::Failed { stage, reason } => {
                tracing::warn!(file = %path.display(), %stage, %reason, "document failed")
            }
            outcome => tracing::info!(
                file = %path.display(),
                chunks = doc.chunks,
                indexed = doc.chunks_indexed,
                ?outcome,
                "document done"
            ),
        }
        report.record(doc);
    }

    Ok(report)
}

fn plan_document(path: &Path, chunker: &Chunker) -> DocumentReport {
    let mut doc = DocumentReport {
        path: path.to_path_buf(),
        document_id: None,
        chunks: 0,
        chunks_indexed: 0,
        chunks_failed: 0,
        outcome: DocumentOutcome::Planned,
    };
    match extract_file(path) {
        Ok(text) if !text.trim().is_empty() => doc.chunks = chunker.spans(&text).count(),
        Ok(_) => {
            doc.outcome = DocumentOutcome::Failed {
                stage: DocumentStage::Extracted,
                reason: "no text content".to_string(),
            }
        }
        Err(e) => {
            doc.outcome = DocumentOutcome::Failed {
                stage: DocumentStage::Extracted,
                reason: e.to_string(),
            }
        }
    }
    doc
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

async fn ingest_document(
    ctx: &AppContext,
    path: &Path,
    chunker: &Chunker,
    options: &IngestOptions,
    stale_deleted: &mut usize,
) -> DocumentReport {
    let mut doc = DocumentReport {
        path: path.to_path_buf(),
        document_id: None,
        chunks: 0,
        chunks_indexed: 0,
        chunks_failed: 0,
        outcome: DocumentOutcome::Stored,
    };

    // Discovered: find or create the record.
    let mut record = match open_record(ctx, path, options).await {
        Ok(record) => record,
        Err(e) => {
            doc.outcome = DocumentOutcome::Failed {
                stage: DocumentStage::Discovered,
                reason: e.to_string(),
            };
            return doc;
        }
    };
    doc.document_id = Some(record.id.clone());

    // Extracted
    let text = match extract_file(path) {
        Ok(text) if !text.trim().is_empty() => text,
        Ok(_) => {
            return fail(ctx, &mut record, doc, DocumentStage::Extracted, "no text content").await
        }
        Err(e) => {
            return fail(ctx, &mut record, doc, DocumentStage::Extracted, &e.to_string()).await
        }
    };
    if let Err(e) = ctx.store.update_document_content(&record.id, &text).await {
        return fail(ctx, &mut record, doc, DocumentStage::Extracted, &e.to_string()).await;
    }

    // Chunked
    let chunks = chunker.chunk(&record.id, &text);
    doc.chunks = chunks.len();
    let mut vector_chunks = vector_chunk_count(&record.meta);

    // Embedding(i/n) → Indexed
    if let (Some(embedder), Some(index)) = (&ctx.embedder, &ctx.index) {
        let total = chunks.len();
        for chunk in &chunks {
            tracing::debug!(
                document = %record.name,
                "embedding {}/{}",
                chunk.ordinal + 1,
                total
            );
            let values = match embedder.embed(&chunk.text).await {
                Ok(values) => values,
                Err(e) => {
                    tracing::warn!(document = %record.name, chunk = chunk.ordinal, error = %e, "embedding failed");
                    doc.chunks_failed += 1;
                    continue;
                }
            };
            let entry = VectorEntry {
                id: chunk_id(&record.id, chunk.ordinal),
                values,
                metadata: chunk_metadata(
                    &record,
                    chunk,
                    options,
                    ctx.config.vector.content_preview_chars,
                ),
            };
            match index.upsert(std::slice::from_ref(&entry)).await {
                Ok(()) => doc.chunks_indexed += 1,
                Err(e) => {
                    tracing::warn!(document = %record.name, chunk = chunk.ordinal, error = %e, "upsert failed");
                    doc.chunks_failed += 1;
                }
            }
        }

        vector_chunks = vector_chunks.max(total);
        if vector_chunks > total {
            let stale: Vec<String> = (total..vector_chunks)
                .map(|i| chunk_id(&record.id, i))
                .collect();
            match index.delete(&stale).await {
                Ok(()) => {
                    *stale_deleted += stale.len();
                    vector_chunks = total;
                }
                Err(e) => tracing::warn!(document = %record.name, error = %e, "failed to delete stale vectors"),
            }
        }
    }

    if doc.chunks > 0 && doc.chunks_indexed == doc.chunks {
        doc.outcome = DocumentOutcome::Indexed;
    }

    record.meta.remove("failure_stage");
    record.meta.remove("failure_reason");
    record.meta.insert("total_chunks".into(), Value::from(doc.chunks));
    record
        .meta
        .insert(VECTOR_CHUNKS_KEY.into(), Value::from(vector_chunks));
    record
        .meta
        .insert("chunks_indexed".into(), Value::from(doc.chunks_indexed));
    record.meta.insert(
        "indexed".into(),
        Value::from(doc.outcome == DocumentOutcome::Indexed),
    );
    record
        .meta
        .insert("content_hash".into(), Value::from(hash_text(&text)));
    record.meta.insert(
        "last_ingested".into(),
        Value::from(chrono::Utc::now().to_rfc3339()),
    );

    let finish = async {
        ctx.store
            .update_document_metadata(&record.id, &record.meta)
            .await?;
        ctx.store
            .advance_document_status(&record.id, DocumentStatus::Processed)
            .await
    };
    if let Err(e) = finish.await {
        let stage = if doc.outcome == DocumentOutcome::Indexed {
            DocumentStage::Indexed
        } else {
            DocumentStage::Chunked
        };
        doc.outcome = DocumentOutcome::Failed {
            stage,
            reason: e.to_string(),
        };
    }
    doc
}

/// Reuse the record stored from this file's path, or create one. Either
/// way the record ends up `processing` unless it was already `processed`.
async fn open_record(
    ctx: &AppContext,
    path: &Path,
    options: &IngestOptions,
) -> Result<DocumentRecord> {
    let name = file_name(path);
    let file_path = stored_path(path);
    let mut record = match ctx.store.find_document_by_path(&file_path).await? {
        Some(existing) => existing,
        None => {
            let mut meta = Metadata::new();
            meta.insert("lob".into(), Value::from(options.lob.as_str()));
            meta.insert("source".into(), Value::from(options.source_tag.as_str()));
            let record = DocumentRecord::new(
                &options.owner,
                &name,
                &file_type_of(path),
                &file_path,
                meta,
            );
            ctx.store.save_document(&record).await?;
            record
        }
    };

    if record.status != DocumentStatus::Processed {
        ctx.store
            .advance_document_status(&record.id, DocumentStatus::Processing)
            .await?;
        record.status = DocumentStatus::Processing;
    }
    record
        .meta
        .insert("lob".into(), Value::from(options.lob.as_str()));
    record
        .meta
        .insert("source".into(), Value::from(options.source_tag.as_str()));
    Ok(record)
}

/// Record a failure on the document. A document that was already
/// `processed` keeps that status; the failure is only noted in metadata.
async fn fail(
    ctx: &AppContext,
    record: &mut DocumentRecord,
    mut doc: DocumentReport,
    stage: DocumentStage,
    reason: &str,
) -> DocumentReport {
    record
        .meta
        .insert("failure_stage".into(), Value::from(stage.as_str()));
    record
        .meta
        .insert("failure_reason".into(), Value::from(reason));
    if let Err(e) = ctx
        .store
        .update_document_metadata(&record.id, &record.meta)
        .await
    {
        tracing::warn!(document = %record.name, error = %e, "could not record failure");
    }
    if record.status.can_transition_to(DocumentStatus::Failed) {
        if let Err(e) = ctx
            .store
            .advance_document_status(&record.id, DocumentStatus::Failed)
            .await
        {
            tracing::warn!(document = %record.name, error = %e, "could not mark document failed");
        }
    }
    doc.outcome = DocumentOutcome::Failed {
        stage,
        reason: reason.to_string(),
    };
    doc
}

/// Canonical form of `path` when it exists, so the same file reached
/// through different relative paths maps to one record.
fn stored_path(path: &Path) -> String {
    std::fs::canonicalize(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .display()
        .to_string()
}

/// Upper bound on the chunk ordinals that may still have a vector. Falls
/// back to `total_chunks` for records written before the bound was kept.
fn vector_chunk_count(meta: &Metadata) -> usize {
    meta.get(VECTOR_CHUNKS_KEY)
        .or_else(|| meta.get("total_chunks"))
        .and_then(Value::as_u64)
        .unwrap_or(0) as usize
}

/// Metadata stored with each chunk vector.
pub fn chunk_metadata(
    record: &DocumentRecord,
    chunk: &Chunk,
    options: &IngestOptions,
    content_preview_chars: usize,
) -> Metadata {
    let mut meta = Metadata::new();
    meta.insert("document_id".into(), Value::from(record.id.as_str()));
    meta.insert("document_name".into(), Value::from(record.name.as_str()));
    meta.insert(
        "document_path".into(),
        Value::from(record.file_path.as_str()),
    );
    meta.insert("chunk_index".into(), Value::from(chunk.ordinal));
    meta.insert("total_chunks".into(), Value::from(chunk.total));
    meta.insert("lob".into(), Value::from(options.lob.as_str()));
    meta.insert("source".into(), Value::from(options.source_tag.as_str()));
    meta.insert(
        "content".into(),
        Value::from(truncate_chars(&chunk.text, content_preview_chars)),
    );
    meta
}

/// Remove every vector of a document from the index. Returns how many ids
/// were deleted (absent ids count too; deletion is idempotent). A document
/// that does not exist, or was never chunked, has nothing to delete.
pub async fn delete_document_vectors(ctx: &AppContext, document_id: &str) -> Result<usize> {
    let Some(mut record) = ctx.store.get_document(document_id).await? else {
        return Ok(0);
    };
    let total = vector_chunk_count(&record.meta);
    if total == 0 {
        return Ok(0);
    }

    let ids: Vec<String> = (0..total).map(|i| chunk_id(document_id, i)).collect();
    ctx.index()?.delete(&ids).await?;

    record.meta.insert("indexed".into(), Value::from(false));
    record.meta.insert("chunks_indexed".into(), Value::from(0));
    record.meta.insert(VECTOR_CHUNKS_KEY.into(), Value::from(0));
    ctx.store
        .update_document_metadata(document_id, &record.meta)
        .await?;
    tracing::info!(document = %record.name, vectors = ids.len(), "deleted document vectors");
    Ok(ids.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discover_files_is_flat_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.docx"), b"x").unwrap();
        std::fs::write(dir.path().join("A.DOCX"), b"x").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        std::fs::write(dir.path().join("~$b.docx"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested/c.docx"), b"x").unwrap();

        let files = discover_files(dir.path(), &["*.docx".to_string()]).unwrap();
        let names: Vec<String> = files.iter().map(|p| file_name(p)).collect();
        assert_eq!(names, vec!["A.DOCX", "b.docx"]);
    }

    #[test]
    fn test_discover_missing_folder_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = discover_files(&dir.path().join("absent"), &["*.docx".to_string()]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_chunk_metadata_truncates_content() {
        let record = DocumentRecord::new("guest", "Policy.docx", "docx", "pa/Policy.docx", Metadata::new());
        let chunk = Chunk {
            document_id: record.id.clone(),
            ordinal: 1,
            total: 3,
            start: 800,
            text: "abcdefghij".to_string(),
        };
        let options = IngestOptions {
            lob: "personal_auto".to_string(),
            source_tag: "training_data".to_string(),
            owner: "guest".to_string(),
            dry_run: false,
        };
        let meta = chunk_metadata(&record, &chunk, &options, 4);
        assert_eq!(meta["content"], "abcd");
        assert_eq!(meta["chunk_index"], 1);
        assert_eq!(meta["total_chunks"], 3);
        assert_eq!(meta["lob"], "personal_auto");
        assert_eq!(meta["source"], "training_data");
        assert_eq!(meta["document_id"], record.id.as_str());
        assert_eq!(meta["document_name"], "Policy.docx");
        assert_eq!(meta["document_path"], "pa/Policy.docx");
    }

    #[test]
    fn test_vector_chunk_count_falls_back_to_total_chunks() {
        let mut meta = Metadata::new();
        assert_eq!(vector_chunk_count(&meta), 0);
        meta.insert("total_chunks".into(), Value::from(4));
        assert_eq!(vector_chunk_count(&meta), 4);
        meta.insert(VECTOR_CHUNKS_KEY.into(), Value::from(9));
        assert_eq!(vector_chunk_count(&meta), 9);
    }

    #[test]
    fn test_report_counts_pending_chunks_for_stored_documents() {
        let mut report = IngestReport::default();
        report.record(DocumentReport {
            path: PathBuf::from("a.docx"),
            document_id: Some("a".into()),
            chunks: 5,
            chunks_indexed: 2,
            chunks_failed: 1,
            outcome: DocumentOutcome::Stored,
        });
        report.record(DocumentReport {
            path: PathBuf::from("b.docx"),
            document_id: None,
            chunks: 0,
            chunks_indexed: 0,
            chunks_failed: 0,
            outcome: DocumentOutcome::Failed {
                stage: DocumentStage::Extracted,
                reason: "corrupt".into(),
            },
        });
        assert_eq!(report.chunks_pending, 2);
        assert_eq!(report.documents_stored, 1);
        assert_eq!(report.documents_failed, 1);
        assert_eq!(report.chunks_total, 5);
    }
}
