use sqlx::SqlitePool;

use crate::error::Result;

/// Create the record tables. Idempotent.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            user_email TEXT NOT NULL DEFAULT 'guest',
            name TEXT NOT NULL,
            file_type TEXT NOT NULL,
            upload_date INTEGER NOT NULL,
            file_path TEXT NOT NULL,
            content TEXT,
            meta_json TEXT NOT NULL DEFAULT '{}',
            status TEXT NOT NULL DEFAULT 'uploaded'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS analyses (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            date INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'completed',
            original_text TEXT,
            results_json TEXT,
            document_id TEXT,
            user_email TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS approvals (
            id TEXT PRIMARY KEY,
            analysis_id TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            created_date INTEGER NOT NULL,
            updated_date INTEGER NOT NULL,
            approver_email TEXT,
            results_summary_json TEXT,
            approver_response TEXT,
            ado_result_json TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_name ON documents(name)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_file_path ON documents(file_path)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_documents_upload_date ON documents(upload_date DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_analyses_date ON analyses(date DESC)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_approvals_analysis_id ON approvals(analysis_id)")
        .execute(pool)
        .await?;

    Ok(())
}
