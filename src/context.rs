//! Application context.
//!
//! [`AppContext`] owns every long-lived handle: the configuration, the
//! record store, and the optional embedder and vector index. It is built
//! once by [`AppContext::init`] and passed by reference to the pipeline,
//! the search path, and the CLI commands.
//!
//! The embedder and the index are optional. When either cannot be created
//! the context still initialises: the failure is logged and the handle is
//! left as `None`, and callers degrade (documents are stored but not
//! indexed; searches return nothing). Only a store failure aborts.

use std::sync::Arc;

use crate::config::Config;
use crate::embedding::{create_embedder, Embedder};
use crate::error::{Error, Result};
use crate::index::{open_index, VectorIndex};
use crate::store::RecordStore;

pub struct AppContext {
    pub config: Config,
    pub store: RecordStore,
    pub embedder: Option<Arc<dyn Embedder>>,
    pub index: Option<Arc<dyn VectorIndex>>,
}

impl AppContext {
    pub async fn init(config: Config) -> Result<Self> {
        let store = RecordStore::connect(&config.db).await?;

        let embedder = if config.embedding.is_enabled() {
            match create_embedder(&config.embedding) {
                Ok(embedder) => {
                    tracing::info!(
                        model = embedder.model_name(),
                        dims = embedder.dims(),
                        "embedder ready"
                    );
                    Some(embedder)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "embedder unavailable; continuing without vector indexing");
                    None
                }
            }
        } else {
            tracing::info!("embedding disabled");
            None
        };

        let index = if config.vector.is_enabled() {
            match open_index(&config.vector).await {
                Ok(index) => {
                    tracing::info!(index = index.name(), "vector index ready");
                    Some(index)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "vector index unavailable; continuing without it");
                    None
                }
            }
        } else {
            tracing::info!("vector index disabled");
            None
        };

        Ok(Self {
            config,
            store,
            embedder,
            index,
        })
    }

    /// Assemble a context from ready-made parts (test doubles included).
    pub fn from_parts(
        config: Config,
        store: RecordStore,
        embedder: Option<Arc<dyn Embedder>>,
        index: Option<Arc<dyn VectorIndex>>,
    ) -> Self {
        Self {
            config,
            store,
            embedder,
            index,
        }
    }

    pub fn embedder(&self) -> Result<&Arc<dyn Embedder>> {
        self.embedder
            .as_ref()
            .ok_or_else(|| Error::EmbeddingUnavailable("no embedder configured".to_string()))
    }

    pub fn index(&self) -> Result<&Arc<dyn VectorIndex>> {
        self.index
            .as_ref()
            .ok_or_else(|| Error::IndexUnavailable("no vector index configured".to_string()))
    }

    pub async fn shutdown(self) {
        self.store.close().await;
        tracing::debug!("context shut down");
    }
}
