//! Query records
//!
//! A [`QueryRecord`] is one unit of work: a root search or an analysis
//! chained beneath one. Records are addressed by their content-derived key,
//! created idempotently, and move one way from unfinished to finished.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::catalog::ProcessorDescriptor;
use crate::db::queries::{self, QueryRow};
use crate::{key, results, Error, Parameters, QueryContext, Result};

/// Record type of root searches
pub const SEARCH_TYPE: &str = "search";

/// Extension of root search result files
pub const DEFAULT_EXTENSION: &str = "csv";

/// Everything needed to resolve or create a record
#[derive(Debug, Clone)]
pub struct NewQuery {
    /// Query text, or the post-processor type for analyses
    pub query: String,
    pub parameters: Parameters,
    /// Key of the owning search; `None` for root searches
    pub parent: Option<String>,
    pub query_type: String,
    /// Extension of the result file to reserve
    pub extension: String,
}

impl NewQuery {
    /// A root search
    pub fn search(query: impl Into<String>, parameters: Parameters) -> Self {
        Self {
            query: query.into(),
            parameters,
            parent: None,
            query_type: SEARCH_TYPE.to_string(),
            extension: DEFAULT_EXTENSION.to_string(),
        }
    }

    /// An analysis of type `processor` beneath the record `parent`
    pub fn analysis(
        parent: impl Into<String>,
        processor: &ProcessorDescriptor,
        parameters: Parameters,
    ) -> Self {
        Self {
            query: processor.type_id.clone(),
            parameters,
            parent: Some(parent.into()),
            query_type: processor.type_id.clone(),
            extension: processor.extension.clone(),
        }
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    fn parent_key(&self) -> Option<&str> {
        self.parent.as_deref().filter(|p| !p.is_empty())
    }

    /// Key the record will have
    pub fn key(&self) -> String {
        key::query_key(&self.query, &self.parameters, self.parent_key())
    }
}

/// How a caller identifies the record it wants
#[derive(Debug, Clone)]
pub enum QueryLookup {
    /// An existing record
    ByKey(String),
    /// A record to resolve, created if absent
    New(NewQuery),
}

impl QueryLookup {
    /// Build a lookup from loosely supplied request values
    ///
    /// A key wins when present; otherwise both query text and parameters are
    /// required.
    pub fn from_parts(
        key: Option<String>,
        query: Option<String>,
        parameters: Option<Parameters>,
    ) -> Result<Self> {
        match (key, query, parameters) {
            (Some(key), _, _) => Ok(Self::ByKey(key)),
            (None, Some(query), Some(parameters)) => {
                Ok(Self::New(NewQuery::search(query, parameters)))
            }
            _ => Err(Error::InvalidArgument(
                "either a key, or both query and parameters, must be given".to_string(),
            )),
        }
    }
}

/// Outcome of [`QueryRecord::check_finished`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultState {
    /// Finished, and the result file exists at this path
    Ready(PathBuf),
    /// Finished without any results
    Empty,
    /// Not finished yet
    Pending,
}

/// Status summary for monitoring
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryStatus {
    pub status: String,
    pub query: String,
    pub rows: i64,
    pub key: String,
    pub done: bool,
    /// Result file name; empty until done
    pub path: String,
    pub empty: bool,
}

/// A query record bound to its context
#[derive(Clone)]
pub struct QueryRecord {
    ctx: QueryContext,
    row: QueryRow,
    is_new: bool,
}

impl std::fmt::Debug for QueryRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryRecord")
            .field("row", &self.row)
            .field("is_new", &self.is_new)
            .finish()
    }
}

impl QueryRecord {
    /// Resolve a record by key, or resolve-or-create it from query data
    pub async fn open(ctx: &QueryContext, lookup: QueryLookup) -> Result<Self> {
        match lookup {
            QueryLookup::ByKey(key) => Self::resolve_by_key(ctx, &key).await,
            QueryLookup::New(new) => Self::resolve_or_create(ctx, new).await,
        }
    }

    /// Load an existing record
    pub async fn resolve_by_key(ctx: &QueryContext, key: &str) -> Result<Self> {
        Self::find(ctx, key)
            .await?
            .ok_or_else(|| Error::NotFound(key.to_string()))
    }

    /// Load a record if it exists
    pub async fn find(ctx: &QueryContext, key: &str) -> Result<Option<Self>> {
        let row = queries::fetch_by_key(ctx.db(), key).await?;

        Ok(row.map(|row| Self {
            ctx: ctx.clone(),
            row,
            is_new: false,
        }))
    }

    /// Load the record for `new`, inserting it first if it does not exist
    ///
    /// Stored data always wins over the supplied arguments, but a stored row
    /// whose query text or parent differs is a [`Error::KeyConflict`]. A
    /// record without a result file gets one reserved, whether it was just
    /// inserted or an earlier reservation never happened.
    pub async fn resolve_or_create(ctx: &QueryContext, new: NewQuery) -> Result<Self> {
        if new.query.trim().is_empty() {
            return Err(Error::InvalidArgument("query text must not be empty".to_string()));
        }

        let key = new.key();
        let parent = new.parent_key();

        let existing = match parent {
            None => queries::fetch_by_key_and_query(ctx.db(), &key, &new.query).await?,
            Some(parent) => {
                if queries::fetch_by_key(ctx.db(), parent).await?.is_none() {
                    return Err(Error::NotFound(parent.to_string()));
                }
                queries::fetch_by_key(ctx.db(), &key).await?
            }
        };

        let (row, inserted) = match existing {
            Some(row) => (row, false),
            None => {
                let row = QueryRow {
                    key,
                    query: new.query.clone(),
                    parameters: serde_json::to_string(&new.parameters)?,
                    result_file: String::new(),
                    status: String::new(),
                    timestamp: rqp_common::time::epoch_seconds(),
                    is_empty: false,
                    is_finished: false,
                    num_rows: 0,
                    key_parent: parent.unwrap_or_default().to_string(),
                    query_type: new.query_type.clone(),
                };
                queries::insert_or_fetch(ctx.db(), &row).await?
            }
        };

        if row.query != new.query || row.key_parent != parent.unwrap_or_default() {
            warn!(
                key = %row.key,
                stored_query = %row.query,
                stored_parent = %row.key_parent,
                "Key already used by a different query"
            );
            return Err(Error::KeyConflict(row.key));
        }

        let mut record = Self {
            ctx: ctx.clone(),
            row,
            is_new: inserted,
        };

        if inserted {
            info!(
                key = %record.row.key,
                query = %record.row.query,
                parent = %record.row.key_parent,
                "Created query"
            );
        } else {
            debug!(key = %record.row.key, "Resolved existing query");
        }

        if record.row.result_file.is_empty() && !record.row.is_finished {
            record.reserve_result_file(&new.extension).await?;
        }

        Ok(record)
    }

    /// Reload the record from the store
    pub async fn refresh(&mut self) -> Result<()> {
        self.row = queries::fetch_by_key(self.ctx.db(), &self.row.key)
            .await?
            .ok_or_else(|| Error::NotFound(self.row.key.clone()))?;
        Ok(())
    }

    pub fn key(&self) -> &str {
        &self.row.key
    }

    pub fn query(&self) -> &str {
        &self.row.query
    }

    pub fn query_type(&self) -> &str {
        &self.row.query_type
    }

    /// Key of the owning search, for analyses
    pub fn parent_key(&self) -> Option<&str> {
        Some(self.row.key_parent.as_str()).filter(|p| !p.is_empty())
    }

    pub fn is_root(&self) -> bool {
        self.row.key_parent.is_empty()
    }

    /// Whether this handle inserted the record
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn is_finished(&self) -> bool {
        self.row.is_finished
    }

    pub fn is_empty(&self) -> bool {
        self.row.is_empty
    }

    pub fn num_rows(&self) -> i64 {
        self.row.num_rows
    }

    pub fn timestamp(&self) -> i64 {
        self.row.timestamp
    }

    pub fn status(&self) -> &str {
        &self.row.status
    }

    /// Reserved result file name; empty if none was reserved
    pub fn result_file(&self) -> &str {
        &self.row.result_file
    }

    pub fn row(&self) -> &QueryRow {
        &self.row
    }

    pub fn context(&self) -> &QueryContext {
        &self.ctx
    }

    /// Parsed parameter document
    ///
    /// A malformed stored document yields an empty map so monitoring keeps
    /// working.
    pub fn parameters(&self) -> Parameters {
        match serde_json::from_str::<Parameters>(&self.row.parameters) {
            Ok(parameters) => parameters,
            Err(e) => {
                warn!(key = %self.row.key, error = %e, "Malformed query parameters, using none");
                Parameters::new()
            }
        }
    }

    /// Id of the queue job linked to this record, if any
    pub fn job_id(&self) -> Option<i64> {
        self.parameters().get("job").and_then(|v| v.as_i64())
    }

    /// Folder holding the result file
    pub fn results_dir(&self) -> &Path {
        self.ctx.results_dir()
    }

    /// Location the result file is (or will be) written to
    pub fn results_path(&self) -> PathBuf {
        self.ctx.results_dir().join(&self.row.result_file)
    }

    /// Overwrite the user-facing status text
    pub async fn update_status(&mut self, status: &str) -> Result<bool> {
        self.row.status = status.to_string();
        let affected = queries::update_status(self.ctx.db(), &self.row.key, status).await?;
        debug!(key = %self.row.key, status, "Updated query status");
        Ok(affected > 0)
    }

    /// Declare the record finished with `num_rows` results
    ///
    /// Fails with [`Error::AlreadyFinished`] if it already was, including
    /// when another handle finished it first.
    pub async fn finish(&mut self, num_rows: u64) -> Result<()> {
        if self.row.is_finished {
            return Err(Error::AlreadyFinished(self.row.key.clone()));
        }

        let num_rows = i64::try_from(num_rows)
            .map_err(|_| Error::InvalidArgument(format!("row count {} too large", num_rows)))?;

        let affected = queries::mark_finished(self.ctx.db(), &self.row.key, num_rows).await?;
        if affected == 0 {
            self.refresh().await?;
            return Err(Error::AlreadyFinished(self.row.key.clone()));
        }

        self.row.is_finished = true;
        self.row.num_rows = num_rows;
        info!(key = %self.row.key, num_rows, "Finished query");

        Ok(())
    }

    /// Flag the record as having produced no results
    pub async fn mark_empty(&mut self) -> Result<bool> {
        let affected = queries::mark_empty(self.ctx.db(), &self.row.key).await?;
        self.row.is_empty = true;
        Ok(affected > 0)
    }

    /// Where the record stands: result file ready, empty, or still pending
    ///
    /// `Ready` is only returned when the file actually exists on disk, and
    /// `Empty` only for records flagged with [`QueryRecord::mark_empty`].
    pub fn check_finished(&self) -> ResultState {
        if !self.row.is_finished {
            return ResultState::Pending;
        }

        if !self.row.result_file.is_empty() {
            let path = self.results_path();
            if path.is_file() {
                return ResultState::Ready(path);
            }
        }

        if self.row.is_empty {
            ResultState::Empty
        } else {
            ResultState::Pending
        }
    }

    /// Summary used by status polling
    pub fn status_report(&self) -> QueryStatus {
        let state = self.check_finished();

        QueryStatus {
            status: self.row.status.clone(),
            query: self.row.query.clone(),
            rows: self.row.num_rows,
            key: self.row.key.clone(),
            done: state != ResultState::Pending,
            path: match state {
                ResultState::Ready(_) => self.row.result_file.clone(),
                _ => String::new(),
            },
            empty: self.row.num_rows == 0,
        }
    }

    /// Pick and persist a result file name no other record or file uses
    ///
    /// Tries `<slug>-<key>.<ext>`, then `<slug>-<key>-1.<ext>`, and so on.
    /// Returns whether the store write matched the record.
    pub async fn reserve_result_file(&mut self, extension: &str) -> Result<bool> {
        if self.row.is_finished {
            return Err(Error::AlreadyFinished(self.row.key.clone()));
        }

        let mut attempt = 0;
        let file = loop {
            let candidate =
                results::candidate_file_name(&self.row.query, &self.row.key, extension, attempt);

            let on_disk = self.ctx.results_dir().join(&candidate).exists();
            let reserved = candidate != self.row.result_file
                && queries::result_file_taken(self.ctx.db(), &candidate).await?;

            if !on_disk && !reserved {
                break candidate;
            }
            attempt += 1;
        };

        let affected = queries::set_result_file(self.ctx.db(), &self.row.key, &file).await?;
        info!(key = %self.row.key, result_file = %file, "Reserved result file");
        self.row.result_file = file;

        Ok(affected > 0)
    }

    /// Write rows to the result file as CSV, then finish with their count
    ///
    /// The header comes from the first row; later rows may omit columns but
    /// not add new ones. Rows go to a temporary file that only replaces the
    /// result file once the store accepted the finish, so a retried worker
    /// can never touch the artifact of a finished record.
    pub async fn write_csv_and_finish(&mut self, rows: &[BTreeMap<String, String>]) -> Result<()> {
        let Some(first) = rows.first() else {
            return Err(Error::InvalidArgument(
                "at least one row is needed to write a result file".to_string(),
            ));
        };

        if let Some(column) = rows
            .iter()
            .flat_map(|row| row.keys())
            .find(|column| !first.contains_key(*column))
        {
            return Err(Error::InvalidArgument(format!(
                "column '{}' is not in the header row",
                column
            )));
        }

        self.refresh().await?;
        if self.row.is_finished {
            return Err(Error::AlreadyFinished(self.row.key.clone()));
        }

        if self.row.result_file.is_empty() {
            self.reserve_result_file(DEFAULT_EXTENSION).await?;
        }

        let mut staged = tempfile::NamedTempFile::new_in(self.ctx.results_dir())?;
        {
            let mut writer = csv::Writer::from_writer(staged.as_file_mut());
            writer.write_record(first.keys())?;
            for row in rows {
                writer.write_record(
                    first
                        .keys()
                        .map(|column| row.get(column).map(String::as_str).unwrap_or("")),
                )?;
            }
            writer.flush()?;
        }

        // Dropping `staged` on error removes it
        self.finish(rows.len() as u64).await?;
        staged
            .persist(self.results_path())
            .map_err(|e| Error::Io(e.error))?;
        debug!(key = %self.row.key, path = %self.results_path().display(), "Wrote result file");

        Ok(())
    }

    /// Record the queue job working on this record in its parameters
    pub async fn link_job(&mut self, job_id: i64) -> Result<bool> {
        let mut parameters = self.parameters();
        parameters.insert("job".to_string(), job_id.into());

        let serialized = serde_json::to_string(&parameters)?;
        let affected = queries::set_parameters(self.ctx.db(), &self.row.key, &serialized).await?;
        self.row.parameters = serialized;

        Ok(affected > 0)
    }
}
