//! # BA Harness
//!
//! Document ingestion and retrieval for a business-analysis agent.
//!
//! Word documents are extracted to plain text, split into overlapping
//! chunks, embedded into 384-dimensional vectors and upserted into a vector
//! index tagged with their line of business. Search embeds a query the same
//! way and returns the closest chunks. Document, analysis and approval
//! records live in SQLite, and requirements can be imported from Azure
//! DevOps.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌──────────────┐
//! │  DOCX    │──▶│   Pipeline    │──▶│ Vector index  │
//! │ folder   │   │ Extract+Chunk │   │ Pinecone/mem  │
//! └──────────┘   │    +Embed     │   └──────┬───────┘
//!                └──────┬───────┘          │
//!                       ▼                  ▼
//!                 ┌──────────┐       ┌──────────┐
//!                 │  SQLite   │       │  Search  │
//!                 │ records   │       │  (lob)   │
//!                 └──────────┘       └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ba init                                  # create database
//! ba index setup                           # create the Pinecone index
//! ba ingest ./personalauto                 # ingest DOCX files
//! ba search "collision deductible" --lob personal_auto
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Library error type |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`models`] | Records, chunks and vector types |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`store`] | Document, analysis and approval persistence |
//! | [`extract`] | DOCX text extraction |
//! | [`chunk`] | Overlapping text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Vector index abstraction (Pinecone, in-memory) |
//! | [`context`] | Shared handles for one run |
//! | [`ingest`] | Folder ingestion pipeline |
//! | [`search`] | Semantic search |
//! | [`tracker`] | Azure DevOps client |
//! | [`requirements`] | Requirements import from work items |
//! | [`commands`] | CLI command runners |

pub mod chunk;
pub mod commands;
pub mod config;
pub mod context;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod index;
pub mod ingest;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod requirements;
pub mod search;
pub mod store;
pub mod tracker;
