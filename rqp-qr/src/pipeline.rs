//! Queueing orchestration
//!
//! Glue between query records and the job queue: create the record, make
//! sure a job exists for it, and tell the record it is queued.

use std::collections::HashMap;
use tracing::{debug, info};

use crate::db::{Job, JobQueue};
use crate::record::{NewQuery, QueryRecord};
use crate::{Error, Parameters, QueryContext, Result};

/// Status text of a record waiting for a worker
pub const QUEUED_STATUS: &str = "Queued";

/// Queue a job unless it already is, returning it either way
async fn ensure_job(queue: &JobQueue, jobtype: &str, remote_id: &str) -> Result<Option<Job>> {
    match queue.add_job(jobtype, remote_id).await {
        Ok(job) => Ok(Some(job)),
        Err(Error::JobAlreadyExists { .. }) => {
            debug!(jobtype, remote_id, "Job already queued");
            queue.get_job(jobtype, remote_id).await
        }
        Err(e) => Err(e),
    }
}

/// Smallest accepted keyword-dense thread length
pub const MIN_DENSE_LENGTH: i64 = 10;

/// Smallest accepted keyword-dense thread percentage
pub const MIN_DENSE_PERCENTAGE: f64 = 10.0;

/// Widest date range, in seconds, a search without text may cover
pub const MAX_TEXTLESS_RANGE: i64 = 2_419_200;

fn integer_parameter(parameters: &Parameters, name: &str) -> Result<i64> {
    match parameters.get(name) {
        None | Some(serde_json::Value::Null) => Ok(0),
        Some(value) => value.as_i64().ok_or_else(|| {
            Error::InvalidArgument(format!("{} must be a whole number", name))
        }),
    }
}

fn number_parameter(parameters: &Parameters, name: &str) -> Result<f64> {
    match parameters.get(name) {
        None | Some(serde_json::Value::Null) => Ok(0.0),
        Some(value) => value
            .as_f64()
            .ok_or_else(|| Error::InvalidArgument(format!("{} must be a number", name))),
    }
}

/// Check the generic search parameters before a search is registered
///
/// Dates are epoch seconds where 0 means unbounded. Text comes from
/// `body_query`/`subject_query` when either is given, otherwise from the
/// query text itself. A search without text needs a closed date range of
/// less than four weeks.
pub fn validate_search_parameters(query_text: &str, parameters: &Parameters) -> Result<()> {
    let min_date = integer_parameter(parameters, "min_date")?;
    let max_date = integer_parameter(parameters, "max_date")?;

    if min_date < 0 || max_date < 0 {
        return Err(Error::InvalidArgument("dates must not be negative".to_string()));
    }
    if min_date != 0 && max_date != 0 && min_date >= max_date {
        return Err(Error::InvalidArgument(
            "min_date must be earlier than max_date".to_string(),
        ));
    }

    let dense_length = integer_parameter(parameters, "dense_length")?;
    if dense_length > 0 && dense_length < MIN_DENSE_LENGTH {
        return Err(Error::InvalidArgument(format!(
            "dense_length must be at least {}",
            MIN_DENSE_LENGTH
        )));
    }
    let dense_percentage = number_parameter(parameters, "dense_percentage")?;
    if dense_percentage > 0.0 && dense_percentage < MIN_DENSE_PERCENTAGE {
        return Err(Error::InvalidArgument(format!(
            "dense_percentage must be at least {}",
            MIN_DENSE_PERCENTAGE
        )));
    }

    let text_fields: Vec<&str> = ["body_query", "subject_query"]
        .iter()
        .filter_map(|name| parameters.get(*name))
        .map(|value| value.as_str().unwrap_or_default())
        .collect();
    let has_text = if text_fields.is_empty() {
        !query_text.trim().is_empty()
    } else {
        text_fields.iter().any(|text| !text.trim().is_empty())
    };

    if !has_text {
        if min_date == 0 || max_date == 0 {
            return Err(Error::InvalidArgument(
                "a search without text needs both min_date and max_date".to_string(),
            ));
        }
        if max_date - min_date >= MAX_TEXTLESS_RANGE {
            return Err(Error::InvalidArgument(
                "a search without text may cover less than four weeks".to_string(),
            ));
        }
    }

    Ok(())
}

/// Create (or resolve) a root search and queue its collection job
///
/// The platform is stored in the parameters and so becomes part of the key.
/// Finished searches are returned as they are, without a new job.
pub async fn queue_search(
    ctx: &QueryContext,
    queue: &JobQueue,
    platform: &str,
    query_text: &str,
    mut parameters: Parameters,
) -> Result<QueryRecord> {
    if platform.trim().is_empty() {
        return Err(Error::InvalidArgument("platform must not be empty".to_string()));
    }
    validate_search_parameters(query_text, &parameters)?;

    parameters.insert("platform".to_string(), platform.into());
    let mut record =
        QueryRecord::resolve_or_create(ctx, NewQuery::search(query_text, parameters)).await?;

    if record.is_finished() {
        debug!(key = %record.key(), "Search already finished, not queueing");
        return Ok(record);
    }

    let jobtype = format!("{}-search", platform);
    ensure_job(queue, &jobtype, record.key()).await?;

    if record.is_new() {
        record.update_status(QUEUED_STATUS).await?;
        info!(key = %record.key(), jobtype = %jobtype, "Queued search");
    }

    Ok(record)
}

/// Result of [`queue_analysis`]
#[derive(Debug)]
pub struct QueuedAnalysis {
    pub record: QueryRecord,
    /// False when an identical analysis already existed
    pub newly_queued: bool,
}

/// Chain an analysis of type `processor_type` beneath the search `root_key`
pub async fn queue_analysis(
    ctx: &QueryContext,
    queue: &JobQueue,
    root_key: &str,
    processor_type: &str,
    options: &HashMap<String, String>,
) -> Result<QueuedAnalysis> {
    let root = QueryRecord::resolve_by_key(ctx, root_key).await?;
    if !root.is_root() {
        return Err(Error::InvalidArgument(format!(
            "'{}' is an analysis, not a search",
            root_key
        )));
    }

    let compatible = root.compatible_processors();
    let Some(processor) = compatible.get(processor_type) else {
        return Err(Error::InvalidArgument(format!(
            "post-processor '{}' cannot run on '{}'",
            processor_type, root_key
        )));
    };

    let parameters = ctx.catalog().resolve_options(processor_type, options)?;
    let new = NewQuery::analysis(root.key(), processor, parameters);

    // An unfinished analysis whose job was never added is queued again
    let orphaned = QueryRecord::find(ctx, &new.key())
        .await?
        .is_some_and(|existing| !existing.is_finished() && existing.job_id().is_none());

    if !orphaned && !root.available_processors().await?.contains_key(processor_type) {
        return Err(Error::InvalidArgument(format!(
            "post-processor '{}' is not available for '{}'",
            processor_type, root_key
        )));
    }

    let mut record = QueryRecord::resolve_or_create(ctx, new).await?;

    let newly_queued = record.is_new() || orphaned;
    if newly_queued {
        if let Some(job) = ensure_job(queue, processor_type, record.key()).await? {
            record.link_job(job.id).await?;
        }
        record.update_status(QUEUED_STATUS).await?;
        info!(
            key = %record.key(),
            parent = %root.key(),
            processor = processor_type,
            "Queued analysis"
        );
    }

    Ok(QueuedAnalysis {
        record,
        newly_queued,
    })
}
