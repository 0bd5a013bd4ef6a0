//! Command runners behind the `ba` CLI.
//!
//! Each `run_*` function loads what it needs from the [`Config`], does one
//! job, prints a human-readable result to stdout, and returns
//! `anyhow::Result` so `main` can report failures uniformly.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde_json::Value;

use crate::config::Config;
use crate::context::AppContext;
use crate::index::pinecone::{IndexSetup, PineconeClient};
use crate::ingest::{delete_document_vectors, run_ingest, IngestOptions};
use crate::models::{ApprovalStatus, DocumentRecord};
use crate::requirements::import_requirements;
use crate::search::{print_hits, search_or_empty};
use crate::store::RecordStore;
use crate::tracker::{AzureDevOpsClient, TrackerConnections, WorkTracker};

pub async fn run_init(config: &Config) -> Result<()> {
    let store = RecordStore::connect(&config.db)
        .await
        .with_context(|| format!("Failed to open database {}", config.db.path.display()))?;
    store.close().await;
    println!("Database initialized successfully.");
    Ok(())
}

// ============ Ingest / search ============

pub async fn run_ingest_command(
    config: &Config,
    folder: Option<PathBuf>,
    lob: Option<String>,
    dry_run: bool,
) -> Result<()> {
    let folder = folder.unwrap_or_else(|| config.ingest.folder.clone());
    let mut options = IngestOptions::from_config(&config.ingest);
    if let Some(lob) = lob {
        options.lob = lob;
    }
    options.dry_run = dry_run;

    let ctx = AppContext::init(config.clone()).await?;
    let report = run_ingest(&ctx, &folder, &options).await;
    ctx.shutdown().await;

    let report = report?;
    report.print_summary(&folder);
    Ok(())
}

pub async fn run_search(
    config: &Config,
    query: &str,
    lob: Option<&str>,
    limit: Option<usize>,
    json: bool,
) -> Result<()> {
    let ctx = AppContext::init(config.clone()).await?;
    let limit = limit.unwrap_or(config.vector.top_k);
    let hits = search_or_empty(&ctx, query, lob, limit).await;
    ctx.shutdown().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
    } else {
        print_hits(&hits);
    }
    Ok(())
}

// ============ Vector index ============

pub async fn run_index_setup(config: &Config) -> Result<()> {
    match config.vector.provider.as_str() {
        "pinecone" => {
            let client = PineconeClient::from_env(&config.vector)?;
            let setup = client
                .ensure_index(
                    &config.vector.index_name,
                    config.vector.dimension,
                    &config.vector.metric,
                )
                .await?;
            match setup {
                IndexSetup::Existing => {
                    println!("Index '{}' already exists.", config.vector.index_name)
                }
                IndexSetup::Created => println!(
                    "Created index '{}' (dimension {}, metric {}).",
                    config.vector.index_name, config.vector.dimension, config.vector.metric
                ),
            }
            let names: Vec<String> = client
                .list_indexes()
                .await?
                .into_iter()
                .map(|i| i.name)
                .collect();
            println!("Indexes: {}", names.join(", "));
        }
        "memory" => println!("In-memory index needs no setup."),
        other => bail!("Vector provider '{}' has no index to set up", other),
    }
    Ok(())
}

pub async fn run_index_stats(config: &Config) -> Result<()> {
    let ctx = AppContext::init(config.clone()).await?;
    let stats = match ctx.index() {
        Ok(index) => index.describe_stats().await,
        Err(e) => Err(e),
    };
    ctx.shutdown().await;
    let stats = stats?;

    println!("index {}", config.vector.index_name);
    println!("  dimension: {}", stats.dimension);
    println!("  vectors: {}", stats.total_vector_count);
    Ok(())
}

pub async fn run_index_delete(config: &Config, ids: Vec<String>) -> Result<()> {
    let ctx = AppContext::init(config.clone()).await?;
    let result = match ctx.index() {
        Ok(index) => index.delete(&ids).await,
        Err(e) => Err(e),
    };
    ctx.shutdown().await;
    result?;
    println!("Deleted {} vector id(s).", ids.len());
    Ok(())
}

pub async fn run_purge_document(config: &Config, document_id: &str) -> Result<()> {
    let ctx = AppContext::init(config.clone()).await?;
    let result = delete_document_vectors(&ctx, document_id).await;
    ctx.shutdown().await;
    let deleted = result?;
    println!("Deleted {} vector(s) for document {}.", deleted, document_id);
    Ok(())
}

// ============ Records ============

pub async fn run_docs_list(config: &Config, limit: i64, offset: i64) -> Result<()> {
    let store = RecordStore::connect(&config.db).await?;
    let docs = store.list_documents(limit, offset).await;
    store.close().await;
    let docs = docs?;

    if docs.is_empty() {
        println!("No documents.");
        return Ok(());
    }
    for doc in &docs {
        println!(
            "{}  {:<10}  {}  {}",
            doc.id,
            doc.status,
            doc.upload_date.format("%Y-%m-%d %H:%M"),
            doc.name
        );
    }
    Ok(())
}

pub async fn run_docs_get(config: &Config, id: &str, with_content: bool) -> Result<()> {
    let store = RecordStore::connect(&config.db).await?;
    let doc = store.get_document(id).await;
    store.close().await;
    let Some(doc) = doc? else {
        bail!("document not found: {}", id);
    };
    print_document(&doc, with_content)
}

fn print_document(doc: &DocumentRecord, with_content: bool) -> Result<()> {
    println!("--- document ---");
    println!("id: {}", doc.id);
    println!("name: {}", doc.name);
    println!("owner: {}", doc.user_email);
    println!("type: {}", doc.file_type);
    println!("path: {}", doc.file_path);
    println!("uploaded: {}", doc.upload_date.to_rfc3339());
    println!("status: {}", doc.status);
    println!("meta: {}", serde_json::to_string_pretty(&doc.meta)?);
    if let Some(content) = &doc.content {
        println!("content: {} chars", content.chars().count());
        if with_content {
            println!("---");
            println!("{}", content);
        }
    }
    Ok(())
}

pub async fn run_analyses_list(config: &Config, limit: i64, offset: i64) -> Result<()> {
    let store = RecordStore::connect(&config.db).await?;
    let analyses = store.list_analyses(limit, offset).await;
    store.close().await;
    let analyses = analyses?;

    if analyses.is_empty() {
        println!("No analyses.");
        return Ok(());
    }
    for a in &analyses {
        println!(
            "{}  {:<10}  {}  {}",
            a.id,
            a.status,
            a.date.format("%Y-%m-%d %H:%M"),
            a.title
        );
    }
    Ok(())
}

pub async fn run_analyses_get(config: &Config, id: &str) -> Result<()> {
    let store = RecordStore::connect(&config.db).await?;
    let analysis = store.get_analysis(id).await;
    store.close().await;
    let Some(analysis) = analysis? else {
        bail!("analysis not found: {}", id);
    };
    println!("{}", serde_json::to_string_pretty(&analysis)?);
    Ok(())
}

pub async fn run_approvals_get(config: &Config, id: &str, by_analysis: bool) -> Result<()> {
    let store = RecordStore::connect(&config.db).await?;
    let approval = if by_analysis {
        store.find_approval_by_analysis(id).await
    } else {
        store.get_approval(id).await
    };
    store.close().await;
    let Some(approval) = approval? else {
        bail!("approval not found: {}", id);
    };
    println!("{}", serde_json::to_string_pretty(&approval)?);
    Ok(())
}

pub async fn run_approvals_set_status(
    config: &Config,
    id: &str,
    status: &str,
    response: Option<&str>,
) -> Result<()> {
    let status: ApprovalStatus = status.parse().map_err(anyhow::Error::msg)?;
    let store = RecordStore::connect(&config.db).await?;
    let updated = store.update_approval_status(id, status, response).await;
    store.close().await;
    if !updated? {
        bail!("approval not found: {}", id);
    }
    println!("Approval {} is now {}.", id, status);
    Ok(())
}

// ============ Work tracker ============

async fn connect_tracker(config: &Config) -> Result<Arc<dyn WorkTracker>> {
    let client = AzureDevOpsClient::from_env(&config.tracker)?;
    let organization_url = client.organization_url().to_string();
    let mut connections = TrackerConnections::new();
    connections
        .connect(&organization_url, Arc::new(client))
        .await
        .context("Azure DevOps setup failed")?;
    connections
        .get(&organization_url)
        .context("tracker connection was not registered")
}

pub async fn run_tracker_projects(config: &Config) -> Result<()> {
    let tracker = connect_tracker(config).await?;
    for project in tracker.list_projects().await? {
        println!("{}  {:<12}  {}", project.id, project.visibility, project.name);
    }
    Ok(())
}

pub async fn run_tracker_boards(config: &Config, project: &str) -> Result<()> {
    let client = AzureDevOpsClient::from_env(&config.tracker)?;
    let boards = client.list_boards(project).await?;
    if boards.is_empty() {
        println!("No boards.");
    }
    for board in boards {
        println!("{}  {}", board.id, board.name);
    }
    Ok(())
}

pub async fn run_tracker_items(config: &Config, project: &str, wiql: Option<&str>) -> Result<()> {
    let tracker = connect_tracker(config).await?;
    let items = tracker.query_work_items(project, wiql).await?;
    if items.is_empty() {
        println!("No work items.");
    }
    for item in items {
        println!(
            "{:>7}  {:<12}  {:<10}  {}",
            item.id, item.work_item_type, item.state, item.title
        );
    }
    Ok(())
}

pub async fn run_tracker_get(config: &Config, id: i64) -> Result<()> {
    let tracker = connect_tracker(config).await?;
    let Some(item) = tracker.get_work_item(id).await? else {
        bail!("work item not found: {}", id);
    };
    println!("{}", serde_json::to_string_pretty(&item)?);
    Ok(())
}

pub async fn run_tracker_import(config: &Config, project: &str, json: bool) -> Result<()> {
    let tracker = connect_tracker(config).await?;
    let requirements = import_requirements(tracker.as_ref(), project).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&requirements)?);
        return Ok(());
    }
    println!("import {}", project);
    println!("  requirements: {}", requirements.len());
    for r in &requirements {
        println!("  {:>7}  {:<12}  {}", r.source_id, r.requirement_type, r.title);
    }
    Ok(())
}

pub async fn run_tracker_create(
    config: &Config,
    project: &str,
    work_item_type: &str,
    title: &str,
    description: Option<&str>,
) -> Result<()> {
    let tracker = connect_tracker(config).await?;
    let created = tracker
        .create_work_item(project, work_item_type, title, description)
        .await?;
    println!("Created {} {}: {}", created.work_item_type, created.id, created.url);
    Ok(())
}

pub async fn run_tracker_update(
    config: &Config,
    id: i64,
    fields: Vec<(String, String)>,
) -> Result<()> {
    if fields.is_empty() {
        bail!("no fields to update; pass --field NAME=VALUE");
    }
    let fields: BTreeMap<String, Value> = fields
        .into_iter()
        .map(|(k, v)| {
            // Numbers and booleans go through as JSON; everything else is text.
            let value = serde_json::from_str::<Value>(&v)
                .ok()
                .filter(|parsed| parsed.is_number() || parsed.is_boolean())
                .unwrap_or(Value::String(v));
            (k, value)
        })
        .collect();
    let tracker = connect_tracker(config).await?;
    tracker.update_work_item(id, &fields).await?;
    println!("Updated work item {} ({} field(s)).", id, fields.len());
    Ok(())
}

// ============ Deploy ============

/// Set up the index, ingest the configured folder, then check that the
/// index holds vectors and answers a verification query.
pub async fn run_deploy(config: &Config) -> Result<()> {
    println!("step 1: vector index");
    run_index_setup(config).await?;

    println!("step 2: ingest {}", config.ingest.folder.display());
    let ctx = AppContext::init(config.clone()).await?;
    if ctx.embedder.is_none() || ctx.index.is_none() {
        ctx.shutdown().await;
        bail!("deploy needs both an embedder and a vector index; check [embedding] and [vector]");
    }
    let options = IngestOptions::from_config(&config.ingest);
    let report = match run_ingest(&ctx, &config.ingest.folder, &options).await {
        Ok(report) => report,
        Err(e) => {
            ctx.shutdown().await;
            return Err(e.into());
        }
    };
    report.print_summary(&config.ingest.folder);
    if report.files_discovered == 0 {
        ctx.shutdown().await;
        bail!("no documents found in {}", config.ingest.folder.display());
    }

    println!("step 3: verify");
    if let Ok(index) = ctx.index() {
        match index.describe_stats().await {
            Ok(stats) => println!("  vectors in index: {}", stats.total_vector_count),
            Err(e) => println!("  warning: could not read index stats: {}", e),
        }
    }
    let query = format!("{} insurance", options.lob.replace('_', " "));
    let hits = search_or_empty(&ctx, &query, Some(options.lob.as_str()), 3).await;
    match hits.first() {
        Some(top) => println!(
            "  verification search '{}': {} result(s), top score {:.4}",
            query,
            hits.len(),
            top.score
        ),
        None => println!("  warning: verification search '{}' returned no results", query),
    }
    ctx.shutdown().await;

    println!("ok");
    Ok(())
}
