//! Analysis chaining
//!
//! Which post-processors can run on a record, and what has already been
//! chained beneath it.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

use crate::catalog::ProcessorDescriptor;
use crate::db::queries::{self, QueryRow};
use crate::record::QueryRecord;
use crate::{Parameters, Result};

/// A child record annotated with its catalog metadata
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisEntry {
    pub record: QueryRow,
    pub parameters: Parameters,
    /// `None` when the child's type is no longer in the catalog
    pub processor: Option<ProcessorDescriptor>,
}

impl AnalysisEntry {
    fn from_row(row: QueryRow, processor: Option<&ProcessorDescriptor>) -> Self {
        let parameters = match serde_json::from_str::<Parameters>(&row.parameters) {
            Ok(parameters) => parameters,
            Err(e) => {
                warn!(key = %row.key, error = %e, "Malformed analysis parameters, using none");
                Parameters::new()
            }
        };

        Self {
            record: row,
            parameters,
            processor: processor.cloned(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.record.is_finished
    }
}

/// Everything a UI needs to show the analyses of one record
#[derive(Debug, Clone, Default, Serialize)]
pub struct AnalysisOverview {
    pub running: Vec<AnalysisEntry>,
    pub finished: Vec<AnalysisEntry>,
    /// Processors that may still be queued, keyed by type
    pub available: BTreeMap<String, ProcessorDescriptor>,
    /// Categories of every compatible processor
    pub categories: BTreeSet<String>,
    pub any_running: bool,
}

impl QueryRecord {
    /// Catalog entries that accept this record's type
    pub fn compatible_processors(&self) -> BTreeMap<String, ProcessorDescriptor> {
        self.context().catalog().compatible_with(self.query_type())
    }

    /// Direct children, oldest first
    pub async fn children(&self) -> Result<Vec<AnalysisEntry>> {
        let rows = queries::fetch_children(self.context().db(), self.key()).await?;
        let catalog = self.context().catalog();

        let entries = rows
            .into_iter()
            .map(|row| {
                let processor = catalog.get(&row.query_type);
                if processor.is_none() {
                    debug!(key = %row.key, kind = %row.query_type, "Analysis type not in catalog");
                }
                AnalysisEntry::from_row(row, processor)
            })
            .collect();

        Ok(entries)
    }

    /// Compatible processors that may still be queued on this record
    ///
    /// A processor without options runs at most once per record; one with
    /// options may run again with different settings.
    pub async fn available_processors(&self) -> Result<BTreeMap<String, ProcessorDescriptor>> {
        let children = queries::fetch_children(self.context().db(), self.key()).await?;
        Ok(filter_available(self.compatible_processors(), &children))
    }

    /// Children split by state, plus what may still be queued
    pub async fn analysis_overview(&self) -> Result<AnalysisOverview> {
        let children = self.children().await?;
        let compatible = self.compatible_processors();

        let categories = compatible.values().map(|p| p.category.clone()).collect();
        let rows: Vec<QueryRow> = children.iter().map(|c| c.record.clone()).collect();
        let available = filter_available(compatible, &rows);

        let (finished, running): (Vec<_>, Vec<_>) =
            children.into_iter().partition(AnalysisEntry::is_finished);

        Ok(AnalysisOverview {
            any_running: !running.is_empty(),
            running,
            finished,
            available,
            categories,
        })
    }
}

fn filter_available(
    compatible: BTreeMap<String, ProcessorDescriptor>,
    children: &[QueryRow],
) -> BTreeMap<String, ProcessorDescriptor> {
    let used: BTreeSet<&str> = children.iter().map(|c| c.query_type.as_str()).collect();

    compatible
        .into_iter()
        .filter(|(type_id, processor)| processor.has_options() || !used.contains(type_id.as_str()))
        .collect()
}
