//! # BA Harness CLI (`ba`)
//!
//! The `ba` binary drives the document pipeline of the business-analysis
//! agent: database setup, DOCX ingestion into the vector index, semantic
//! search, record inspection, and the Azure DevOps work tracker.
//!
//! ## Usage
//!
//! ```bash
//! ba --config ./config/ba.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ba init` | Create the SQLite database and run schema migrations |
//! | `ba ingest [folder]` | Extract, chunk, embed and index every DOCX in a folder |
//! | `ba search "<query>"` | Semantic search, optionally filtered by line of business |
//! | `ba index setup\|stats\|delete\|purge-document` | Manage the vector index |
//! | `ba docs list\|get` | Inspect document records |
//! | `ba analyses list\|get` | Inspect analysis records |
//! | `ba approvals get\|set-status` | Inspect and update approvals |
//! | `ba tracker ...` | Azure DevOps projects, work items and requirements import |
//! | `ba deploy` | Index setup, ingestion and verification in one pass |
//!
//! ## Examples
//!
//! ```bash
//! # Ingest the personal auto documents
//! ba ingest ./personalauto --lob personal_auto
//!
//! # Search one line of business
//! ba search "collision deductible" --lob personal_auto --limit 5
//!
//! # Pull requirements from a project as JSON
//! ba tracker import "Personal Auto" --json
//! ```

use ba_harness::{commands, config, logging};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// BA Harness CLI: document ingestion and retrieval for a business-analysis
/// agent.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/ba.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "ba",
    about = "BA Harness: document ingestion and retrieval for a business-analysis agent",
    version,
    long_about = "BA Harness extracts text from Word documents, chunks and embeds it, \
    stores the vectors in a Pinecone (or in-memory) index for line-of-business filtered \
    search, keeps document, analysis and approval records in SQLite, and talks to \
    Azure DevOps for requirements."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/ba.toml`. Database, chunking, embedding,
    /// vector index, ingestion and tracker settings are read from this file.
    #[arg(long, global = true, default_value = "./config/ba.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the documents, analyses and
    /// approvals tables. Safe to run repeatedly.
    Init,

    /// Ingest DOCX files from a folder.
    ///
    /// Each file is recorded in the database, extracted, chunked, embedded
    /// and upserted into the vector index with its line-of-business tag.
    /// Re-running replaces a document's vectors in place.
    Ingest {
        /// Folder to scan. Defaults to `[ingest].folder`.
        folder: Option<PathBuf>,

        /// Line-of-business tag. Defaults to `[ingest].lob`.
        #[arg(long)]
        lob: Option<String>,

        /// Show file and chunk counts without writing anything.
        #[arg(long)]
        dry_run: bool,
    },

    /// Search indexed chunks by meaning.
    Search {
        /// Natural-language query.
        query: String,

        /// Only return chunks tagged with this line of business.
        #[arg(long)]
        lob: Option<String>,

        /// Maximum number of results. Defaults to `[vector].top_k`.
        #[arg(long)]
        limit: Option<usize>,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Manage the vector index.
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },

    /// Inspect document records.
    Docs {
        #[command(subcommand)]
        action: DocsAction,
    },

    /// Inspect analysis records.
    Analyses {
        #[command(subcommand)]
        action: AnalysesAction,
    },

    /// Inspect and update approvals.
    Approvals {
        #[command(subcommand)]
        action: ApprovalsAction,
    },

    /// Azure DevOps work tracking.
    ///
    /// The organization URL comes from `[tracker].organization_url` or
    /// `ADO_ORGANIZATION_URL`; the personal access token from `ADO_PAT_TOKEN`.
    Tracker {
        #[command(subcommand)]
        action: TrackerAction,
    },

    /// Set up the index, ingest `[ingest].folder`, then verify.
    ///
    /// Fails when no embedder or index is configured, or when the folder
    /// holds no documents.
    Deploy,
}

#[derive(Subcommand)]
enum IndexAction {
    /// Create the configured index if it does not exist.
    Setup,
    /// Show vector count and dimension.
    Stats,
    /// Delete vectors by id.
    Delete {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Delete every vector belonging to one document.
    PurgeDocument { document_id: String },
}

#[derive(Subcommand)]
enum DocsAction {
    /// List documents, newest first.
    List {
        #[arg(long, default_value = "50")]
        limit: i64,
        #[arg(long, default_value = "0")]
        offset: i64,
    },
    /// Show one document.
    Get {
        id: String,
        /// Also print the extracted text.
        #[arg(long)]
        content: bool,
    },
}

#[derive(Subcommand)]
enum AnalysesAction {
    /// List analyses, newest first.
    List {
        #[arg(long, default_value = "50")]
        limit: i64,
        #[arg(long, default_value = "0")]
        offset: i64,
    },
    /// Show one analysis with its results.
    Get { id: String },
}

#[derive(Subcommand)]
enum ApprovalsAction {
    /// Show an approval by id, or by analysis id with `--analysis`.
    Get {
        id: String,
        #[arg(long)]
        analysis: bool,
    },
    /// Set an approval's status (pending, approved, rejected).
    SetStatus {
        id: String,
        status: String,
        /// Approver's comment.
        #[arg(long)]
        response: Option<String>,
    },
}

#[derive(Subcommand)]
enum TrackerAction {
    /// List projects visible to the token.
    Projects,
    /// List a project's boards.
    Boards { project: String },
    /// List a project's work items.
    Items {
        project: String,
        /// Custom WIQL query. Defaults to the project's requirement-type items.
        #[arg(long)]
        wiql: Option<String>,
    },
    /// Show one work item.
    Get { id: i64 },
    /// Import a project's requirement-type work items.
    Import {
        project: String,
        #[arg(long)]
        json: bool,
    },
    /// Create a work item.
    Create {
        project: String,
        /// Work item type, e.g. "User Story".
        #[arg(long = "type", default_value = "User Story")]
        work_item_type: String,
        #[arg(long)]
        title: String,
        #[arg(long)]
        description: Option<String>,
    },
    /// Update fields on a work item.
    Update {
        id: i64,
        /// Field to set, as `NAME=VALUE`. Repeatable.
        #[arg(long = "field", value_parser = parse_key_val)]
        fields: Vec<(String, String)>,
    },
}

/// Parse a `KEY=VALUE` string into a tuple.
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no '=' found in '{}'", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_logging();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => commands::run_init(&cfg).await?,
        Commands::Ingest {
            folder,
            lob,
            dry_run,
        } => commands::run_ingest_command(&cfg, folder, lob, dry_run).await?,
        Commands::Search {
            query,
            lob,
            limit,
            json,
        } => commands::run_search(&cfg, &query, lob.as_deref(), limit, json).await?,
        Commands::Index { action } => match action {
            IndexAction::Setup => commands::run_index_setup(&cfg).await?,
            IndexAction::Stats => commands::run_index_stats(&cfg).await?,
            IndexAction::Delete { ids } => commands::run_index_delete(&cfg, ids).await?,
            IndexAction::PurgeDocument { document_id } => {
                commands::run_purge_document(&cfg, &document_id).await?
            }
        },
        Commands::Docs { action } => match action {
            DocsAction::List { limit, offset } => {
                commands::run_docs_list(&cfg, limit, offset).await?
            }
            DocsAction::Get { id, content } => commands::run_docs_get(&cfg, &id, content).await?,
        },
        Commands::Analyses { action } => match action {
            AnalysesAction::List { limit, offset } => {
                commands::run_analyses_list(&cfg, limit, offset).await?
            }
            AnalysesAction::Get { id } => commands::run_analyses_get(&cfg, &id).await?,
        },
        Commands::Approvals { action } => match action {
            ApprovalsAction::Get { id, analysis } => {
                commands::run_approvals_get(&cfg, &id, analysis).await?
            }
            ApprovalsAction::SetStatus {
                id,
                status,
                response,
            } => {
                commands::run_approvals_set_status(&cfg, &id, &status, response.as_deref()).await?
            }
        },
        Commands::Tracker { action } => match action {
            TrackerAction::Projects => commands::run_tracker_projects(&cfg).await?,
            TrackerAction::Boards { project } => {
                commands::run_tracker_boards(&cfg, &project).await?
            }
            TrackerAction::Items { project, wiql } => {
                commands::run_tracker_items(&cfg, &project, wiql.as_deref()).await?
            }
            TrackerAction::Get { id } => commands::run_tracker_get(&cfg, id).await?,
            TrackerAction::Import { project, json } => {
                commands::run_tracker_import(&cfg, &project, json).await?
            }
            TrackerAction::Create {
                project,
                work_item_type,
                title,
                description,
            } => {
                commands::run_tracker_create(
                    &cfg,
                    &project,
                    &work_item_type,
                    &title,
                    description.as_deref(),
                )
                .await?
            }
            TrackerAction::Update { id, fields } => {
                commands::run_tracker_update(&cfg, id, fields).await?
            }
        },
        Commands::Deploy => commands::run_deploy(&cfg).await?,
    }

    Ok(())
}
