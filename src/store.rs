//! Relational record store.
//!
//! [`RecordStore`] is the single data-access type for documents, analyses,
//! and approvals. It wraps an `sqlx` SQLite pool; the tables are created by
//! [`run_migrations`](crate::migrate::run_migrations) when the store connects.
//!
//! Conventions:
//! - Lookups that find nothing return `Ok(None)`; updates of a missing row
//!   return `Ok(false)`.
//! - Every write runs in its own transaction. A failed write is rolled back
//!   (the transaction is dropped uncommitted) and surfaces as
//!   [`Error::Persistence`].
//! - Timestamps are stored as Unix milliseconds, JSON columns as text.
//! - There are no deletes.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::config::DbConfig;
use crate::db;
use crate::error::{Error, Result};
use crate::migrate::run_migrations;
use crate::models::{
    AnalysisRecord, ApprovalRecord, ApprovalStatus, ApprovalUpdate, DocumentRecord,
    DocumentStatus, Metadata,
};

#[derive(Clone)]
pub struct RecordStore {
    pool: SqlitePool,
}

impl RecordStore {
    /// Open (creating if needed) the database and its tables.
    pub async fn connect(config: &DbConfig) -> Result<Self> {
        let pool = db::connect(config).await?;
        run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    // ============ Documents ============

    /// Insert a document, or overwrite every column of an existing one
    /// with the same id.
    pub async fn save_document(&self, doc: &DocumentRecord) -> Result<()> {
        let meta_json = serde_json::to_string(&doc.meta)?;
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO documents (id, user_email, name, file_type, upload_date, file_path, content, meta_json, status)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                user_email = excluded.user_email,
                name = excluded.name,
                file_type = excluded.file_type,
                upload_date = excluded.upload_date,
                file_path = excluded.file_path,
                content = excluded.content,
                meta_json = excluded.meta_json,
                status = excluded.status
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.user_email)
        .bind(&doc.name)
        .bind(&doc.file_type)
        .bind(doc.upload_date.timestamp_millis())
        .bind(&doc.file_path)
        .bind(&doc.content)
        .bind(&meta_json)
        .bind(doc.status.as_str())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn get_document(&self, id: &str) -> Result<Option<DocumentRecord>> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(document_from_row).transpose()
    }

    /// Documents, newest upload first.
    pub async fn list_documents(&self, limit: i64, offset: i64) -> Result<Vec<DocumentRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM documents ORDER BY upload_date DESC, rowid DESC LIMIT ? OFFSET ?",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(document_from_row).collect()
    }

    /// The most recently uploaded document with this display name.
    pub async fn find_document_by_name(&self, name: &str) -> Result<Option<DocumentRecord>> {
        let row = sqlx::query(
            "SELECT * FROM documents WHERE name = ? ORDER BY upload_date DESC, rowid DESC LIMIT 1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(document_from_row).transpose()
    }

    /// The most recently uploaded document stored from `file_path`.
    pub async fn find_document_by_path(&self, file_path: &str) -> Result<Option<DocumentRecord>> {
        let row = sqlx::query(
            "SELECT * FROM documents WHERE file_path = ? ORDER BY upload_date DESC, rowid DESC LIMIT 1",
        )
        .bind(file_path)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(document_from_row).transpose()
    }

    pub async fn document_exists_by_name(&self, name: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE name = ?")
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    pub async fn update_document_content(&self, id: &str, content: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("UPDATE documents SET content = ? WHERE id = ?")
            .bind(content)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    /// Replace the metadata mapping of a document.
    pub async fn update_document_metadata(&self, id: &str, meta: &Metadata) -> Result<bool> {
        let meta_json = serde_json::to_string(meta)?;
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("UPDATE documents SET meta_json = ? WHERE id = ?")
            .bind(&meta_json)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    /// Move a document to `next`, rejecting steps the lifecycle does not
    /// allow with [`Error::InvalidTransition`].
    pub async fn advance_document_status(&self, id: &str, next: DocumentStatus) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let current: Option<String> = sqlx::query_scalar("SELECT status FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(current) = current else {
            return Ok(false);
        };
        let current: DocumentStatus = current.parse().map_err(decode_error)?;

        if !current.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                id: id.to_string(),
                from: current.to_string(),
                to: next.to_string(),
            });
        }
        if current != next {
            sqlx::query("UPDATE documents SET status = ? WHERE id = ?")
                .bind(next.as_str())
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(true)
    }

    // ============ Analyses ============

    pub async fn save_analysis(&self, analysis: &AnalysisRecord) -> Result<()> {
        let results_json = analysis
            .results
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO analyses (id, title, date, status, original_text, results_json, document_id, user_email)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                date = excluded.date,
                status = excluded.status,
                original_text = excluded.original_text,
                results_json = excluded.results_json,
                document_id = excluded.document_id,
                user_email = excluded.user_email
            "#,
        )
        .bind(&analysis.id)
        .bind(&analysis.title)
        .bind(analysis.date.timestamp_millis())
        .bind(&analysis.status)
        .bind(&analysis.original_text)
        .bind(&results_json)
        .bind(&analysis.document_id)
        .bind(&analysis.user_email)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Summary rows, newest first. `original_text` and `results` are not
    /// loaded.
    pub async fn list_analyses(&self, limit: i64, offset: i64) -> Result<Vec<AnalysisRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, title, date, status, document_id, user_email
            FROM analyses
            ORDER BY date DESC, rowid DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<AnalysisRecord> {
                Ok(AnalysisRecord {
                    id: row.try_get("id")?,
                    title: row.try_get("title")?,
                    date: from_millis(row.try_get("date")?),
                    status: row.try_get("status")?,
                    original_text: None,
                    results: None,
                    document_id: row.try_get("document_id")?,
                    user_email: row.try_get("user_email")?,
                })
            })
            .collect()
    }

    pub async fn get_analysis(&self, id: &str) -> Result<Option<AnalysisRecord>> {
        let row = sqlx::query("SELECT * FROM analyses WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(AnalysisRecord {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            date: from_millis(row.try_get("date")?),
            status: row.try_get("status")?,
            original_text: row.try_get("original_text")?,
            results: parse_json_column(row.try_get("results_json")?)?,
            document_id: row.try_get("document_id")?,
            user_email: row.try_get("user_email")?,
        }))
    }

    // ============ Approvals ============

    pub async fn save_approval(&self, approval: &ApprovalRecord) -> Result<()> {
        let summary_json = to_json_column(approval.results_summary.as_ref())?;
        let ado_json = to_json_column(approval.ado_result.as_ref())?;
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO approvals (id, analysis_id, status, created_date, updated_date, approver_email, results_summary_json, approver_response, ado_result_json)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                analysis_id = excluded.analysis_id,
                status = excluded.status,
                updated_date = excluded.updated_date,
                approver_email = excluded.approver_email,
                results_summary_json = excluded.results_summary_json,
                approver_response = excluded.approver_response,
                ado_result_json = excluded.ado_result_json
            "#,
        )
        .bind(&approval.id)
        .bind(&approval.analysis_id)
        .bind(approval.status.as_str())
        .bind(approval.created_date.timestamp_millis())
        .bind(approval.updated_date.timestamp_millis())
        .bind(&approval.approver_email)
        .bind(&summary_json)
        .bind(&approval.approver_response)
        .bind(&ado_json)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn get_approval(&self, id: &str) -> Result<Option<ApprovalRecord>> {
        let row = sqlx::query("SELECT * FROM approvals WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(approval_from_row).transpose()
    }

    /// The most recent approval requested for an analysis.
    pub async fn find_approval_by_analysis(
        &self,
        analysis_id: &str,
    ) -> Result<Option<ApprovalRecord>> {
        let row = sqlx::query(
            "SELECT * FROM approvals WHERE analysis_id = ? ORDER BY created_date DESC, rowid DESC LIMIT 1",
        )
        .bind(analysis_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(approval_from_row).transpose()
    }

    /// Set the status (and optionally the approver's response), stamping
    /// `updated_date` with the current time.
    pub async fn update_approval_status(
        &self,
        id: &str,
        status: ApprovalStatus,
        approver_response: Option<&str>,
    ) -> Result<bool> {
        self.update_approval(
            id,
            &ApprovalUpdate {
                status: Some(status),
                updated_date: Some(Utc::now()),
                approver_response: approver_response.map(str::to_string),
                ado_result: None,
            },
        )
        .await
    }

    /// Apply the fields set in `update`; unset fields keep their value.
    pub async fn update_approval(&self, id: &str, update: &ApprovalUpdate) -> Result<bool> {
        let ado_json = to_json_column(update.ado_result.as_ref())?;
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"
            UPDATE approvals SET
                status = COALESCE(?, status),
                updated_date = COALESCE(?, updated_date),
                approver_response = COALESCE(?, approver_response),
                ado_result_json = COALESCE(?, ado_result_json)
            WHERE id = ?
            "#,
        )
        .bind(update.status.map(|s| s.as_str()))
        .bind(update.updated_date.map(|d| d.timestamp_millis()))
        .bind(&update.approver_response)
        .bind(&ado_json)
        .bind(id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn decode_error(message: String) -> Error {
    Error::Persistence(sqlx::Error::Decode(message.into()))
}

fn parse_json_column(raw: Option<String>) -> Result<Option<Value>> {
    raw.map(|s| serde_json::from_str(&s))
        .transpose()
        .map_err(Error::from)
}

fn to_json_column(value: Option<&Value>) -> Result<Option<String>> {
    value
        .map(serde_json::to_string)
        .transpose()
        .map_err(Error::from)
}

fn document_from_row(row: &SqliteRow) -> Result<DocumentRecord> {
    let meta_json: String = row.try_get("meta_json")?;
    let status: String = row.try_get("status")?;
    Ok(DocumentRecord {
        id: row.try_get("id")?,
        user_email: row.try_get("user_email")?,
        name: row.try_get("name")?,
        file_type: row.try_get("file_type")?,
        upload_date: from_millis(row.try_get("upload_date")?),
        file_path: row.try_get("file_path")?,
        content: row.try_get("content")?,
        meta: serde_json::from_str(&meta_json)?,
        status: status.parse().map_err(decode_error)?,
    })
}

fn approval_from_row(row: &SqliteRow) -> Result<ApprovalRecord> {
    let status: String = row.try_get("status")?;
    Ok(ApprovalRecord {
        id: row.try_get("id")?,
        analysis_id: row.try_get("analysis_id")?,
        status: status.parse().map_err(decode_error)?,
        created_date: from_millis(row.try_get("created_date")?),
        updated_date: from_millis(row.try_get("updated_date")?),
        approver_email: row.try_get("approver_email")?,
        results_summary: parse_json_column(row.try_get("results_summary_json")?)?,
        approver_response: row.try_get("approver_response")?,
        ado_result: parse_json_column(row.try_get("ado_result_json")?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    async fn open_store(dir: &tempfile::TempDir) -> RecordStore {
        RecordStore::connect(&DbConfig {
            path: dir.path().join("data/records.sqlite"),
        })
        .await
        .unwrap()
    }

    fn doc(name: &str) -> DocumentRecord {
        let mut meta = Metadata::new();
        meta.insert("lob".into(), json!("personal_auto"));
        DocumentRecord::new("guest", name, "docx", &format!("personalauto/{}", name), meta)
    }

    #[tokio::test]
    async fn test_document_save_and_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let record = doc("Policy.docx");
        store.save_document(&record).await.unwrap();

        let loaded = store.get_document(&record.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "Policy.docx");
        assert_eq!(loaded.status, DocumentStatus::Uploaded);
        assert_eq!(loaded.meta["lob"], "personal_auto");
        assert_eq!(
            loaded.upload_date.timestamp_millis(),
            record.upload_date.timestamp_millis()
        );
        assert!(loaded.content.is_none());
    }

    #[tokio::test]
    async fn test_missing_records_are_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        assert!(store.get_document("nope").await.unwrap().is_none());
        assert!(store.get_analysis("nope").await.unwrap().is_none());
        assert!(store.get_approval("nope").await.unwrap().is_none());
        assert!(store.find_document_by_name("nope").await.unwrap().is_none());
        assert!(!store.update_document_content("nope", "x").await.unwrap());
        assert!(!store
            .advance_document_status("nope", DocumentStatus::Processing)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_list_documents_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let mut older = doc("a.docx");
        older.upload_date = Utc::now() - Duration::hours(1);
        let newer = doc("b.docx");
        store.save_document(&older).await.unwrap();
        store.save_document(&newer).await.unwrap();

        let docs = store.list_documents(10, 0).await.unwrap();
        let names: Vec<&str> = docs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["b.docx", "a.docx"]);
        assert!(store.document_exists_by_name("a.docx").await.unwrap());
        assert!(!store.document_exists_by_name("c.docx").await.unwrap());
    }

    #[tokio::test]
    async fn test_find_by_path_separates_same_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let personal = doc("Policy.docx");
        let commercial = DocumentRecord::new(
            "guest",
            "Policy.docx",
            "docx",
            "commercial/Policy.docx",
            Metadata::new(),
        );
        store.save_document(&personal).await.unwrap();
        store.save_document(&commercial).await.unwrap();

        let found = store
            .find_document_by_path("personalauto/Policy.docx")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, personal.id);
        let found = store
            .find_document_by_path("commercial/Policy.docx")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, commercial.id);
        assert!(store
            .find_document_by_path("other/Policy.docx")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_content_and_metadata_updates() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let record = doc("Policy.docx");
        store.save_document(&record).await.unwrap();

        assert!(store
            .update_document_content(&record.id, "Extracted text")
            .await
            .unwrap());
        let mut meta = record.meta.clone();
        meta.insert("total_chunks".into(), json!(3));
        assert!(store
            .update_document_metadata(&record.id, &meta)
            .await
            .unwrap());

        let loaded = store.get_document(&record.id).await.unwrap().unwrap();
        assert_eq!(loaded.content.as_deref(), Some("Extracted text"));
        assert_eq!(loaded.meta["total_chunks"], 3);
    }

    #[tokio::test]
    async fn test_status_lifecycle_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let record = doc("Policy.docx");
        store.save_document(&record).await.unwrap();

        store
            .advance_document_status(&record.id, DocumentStatus::Processing)
            .await
            .unwrap();
        store
            .advance_document_status(&record.id, DocumentStatus::Processed)
            .await
            .unwrap();
        let err = store
            .advance_document_status(&record.id, DocumentStatus::Uploaded)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));

        let loaded = store.get_document(&record.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, DocumentStatus::Processed);
    }

    #[tokio::test]
    async fn test_analysis_list_omits_bodies() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let analysis = AnalysisRecord::new(
            "Claims intake",
            "As an adjuster I want...",
            json!({"requirements": []}),
        );
        store.save_analysis(&analysis).await.unwrap();

        let listed = store.list_analyses(10, 0).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].original_text.is_none());
        assert!(listed[0].results.is_none());

        let full = store.get_analysis(&analysis.id).await.unwrap().unwrap();
        assert_eq!(full.status, "completed");
        assert_eq!(full.results, Some(json!({"requirements": []})));
    }

    #[tokio::test]
    async fn test_approval_status_update() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let mut approval = ApprovalRecord::new("analysis-1", Some("lead@example.com"), json!({"n": 2}));
        approval.updated_date = Utc::now() - Duration::minutes(5);
        store.save_approval(&approval).await.unwrap();

        assert!(store
            .update_approval_status(&approval.id, ApprovalStatus::Approved, Some("Looks good"))
            .await
            .unwrap());

        let loaded = store.get_approval(&approval.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ApprovalStatus::Approved);
        assert_eq!(loaded.approver_response.as_deref(), Some("Looks good"));
        assert!(loaded.updated_date > approval.updated_date);
        assert_eq!(loaded.results_summary, Some(json!({"n": 2})));

        let by_analysis = store
            .find_approval_by_analysis("analysis-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_analysis.id, approval.id);
    }

    #[tokio::test]
    async fn test_partial_approval_update_keeps_other_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let approval = ApprovalRecord::new("analysis-2", None, json!({}));
        store.save_approval(&approval).await.unwrap();

        store
            .update_approval(
                &approval.id,
                &ApprovalUpdate {
                    ado_result: Some(json!({"created": [101, 102]})),
                    ..ApprovalUpdate::default()
                },
            )
            .await
            .unwrap();

        let loaded = store.get_approval(&approval.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ApprovalStatus::Pending);
        assert_eq!(loaded.ado_result, Some(json!({"created": [101, 102]})));
    }
}
