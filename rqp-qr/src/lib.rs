//! rqp-qr library - Query Registry
//!
//! Tracks research queries from submission to finished result file:
//! content-derived identity, result file reservation, the finish state
//! machine, and chaining of post-processor analyses beneath a search.

use rqp_common::config::RootLayout;
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

pub mod analyses;
pub mod catalog;
pub mod db;
pub mod error;
pub mod key;
pub mod pipeline;
pub mod record;
pub mod results;

pub use analyses::{AnalysisEntry, AnalysisOverview};
pub use catalog::{Catalog, OptionKind, OptionSpec, ProcessorDescriptor};
pub use db::{Job, JobQueue, QueryRow};
pub use error::{Error, Result};
pub use record::{NewQuery, QueryLookup, QueryRecord, QueryStatus, ResultState};

/// Opaque parameter document of a query record
pub type Parameters = serde_json::Map<String, serde_json::Value>;

/// Everything a query record needs to talk to its collaborators
///
/// Cheap to clone: the pool and the catalog are shared.
#[derive(Clone)]
pub struct QueryContext {
    db: SqlitePool,
    results_dir: PathBuf,
    catalog: Arc<Catalog>,
}

impl QueryContext {
    pub fn new(db: SqlitePool, results_dir: impl Into<PathBuf>, catalog: Arc<Catalog>) -> Self {
        Self {
            db,
            results_dir: results_dir.into(),
            catalog,
        }
    }

    /// Create the folders of `layout`, open its database and bind `catalog`
    pub async fn open(layout: &RootLayout, catalog: Arc<Catalog>) -> Result<Self> {
        layout.ensure_directories()?;
        let db = rqp_common::db::init_database(&layout.database_path()).await?;
        info!(
            "Query registry at {} ({} post-processors)",
            layout.root().display(),
            catalog.len()
        );

        Ok(Self::new(db, layout.results_dir(), catalog))
    }

    pub fn db(&self) -> &SqlitePool {
        &self.db
    }

    /// Folder holding every result file
    pub fn results_dir(&self) -> &Path {
        &self.results_dir
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }
}
