//! Integration tests for the query lifecycle
//!
//! Tests cover:
//! - Search registration and idempotent resolution
//! - Worker flow: claim job, write results, finish
//! - Analysis chaining beneath a finished search
//! - Root listing with user filter and paging

use rqp_common::config::RootLayout;
use rqp_qr::db::queries;
use rqp_qr::pipeline::{queue_analysis, queue_search};
use rqp_qr::{
    Catalog, Error, JobQueue, Parameters, QueryContext, QueryLookup, QueryRecord, ResultState,
};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tempfile::TempDir;

/// Test helper: fresh root folder with database and results directory
async fn setup() -> (TempDir, QueryContext, JobQueue) {
    let tmp = TempDir::new().unwrap();
    let layout = RootLayout::new(tmp.path());

    let ctx = QueryContext::open(&layout, Arc::new(Catalog::builtin()))
        .await
        .unwrap();
    assert!(layout.results_dir().is_dir());
    let queue = JobQueue::new(ctx.db().clone());
    (tmp, ctx, queue)
}

fn params(value: serde_json::Value) -> Parameters {
    value.as_object().unwrap().clone()
}

#[tokio::test]
async fn test_climate_change_scenario() {
    let (_tmp, ctx, _queue) = setup().await;
    let parameters = params(json!({"board": "news", "min_date": 0, "max_date": 0}));

    let lookup = QueryLookup::from_parts(
        None,
        Some("climate change".to_string()),
        Some(parameters.clone()),
    )
    .unwrap();
    let mut record = QueryRecord::open(&ctx, lookup).await.unwrap();

    assert_eq!(record.key().len(), 32);
    assert!(record.key().chars().all(|c| c.is_ascii_hexdigit()));
    assert!(record.result_file().ends_with(".csv"));
    assert!(!record.is_finished());

    // Identical arguments resolve to the same row
    let lookup = QueryLookup::from_parts(None, Some("climate change".to_string()), Some(parameters))
        .unwrap();
    let again = QueryRecord::open(&ctx, lookup).await.unwrap();
    assert_eq!(again.key(), record.key());
    assert!(!again.is_new());
    assert_eq!(queries::count_root_queries(ctx.db(), None).await.unwrap(), 1);

    // Worker writes the artifact, then finishes
    std::fs::write(record.results_path(), "id,body\n").unwrap();
    record.finish(42).await.unwrap();

    assert_eq!(record.num_rows(), 42);
    assert!(record.is_finished());
    assert_eq!(
        record.check_finished(),
        ResultState::Ready(record.results_path())
    );

    let by_key = QueryRecord::open(&ctx, QueryLookup::ByKey(record.key().to_string()))
        .await
        .unwrap();
    assert!(by_key.is_finished());
    assert_eq!(by_key.num_rows(), 42);
}

#[tokio::test]
async fn test_worker_flow() {
    let (_tmp, ctx, queue) = setup().await;
    let search = queue_search(&ctx, &queue, "news", "election", params(json!({"user": "alice"})))
        .await
        .unwrap();

    let job = queue.claim_next(Some("news-search")).await.unwrap().unwrap();
    assert_eq!(job.remote_id, search.key());

    let mut record = QueryRecord::resolve_by_key(&ctx, &job.remote_id).await.unwrap();
    record.update_status("Collecting posts").await.unwrap();
    assert!(!record.status_report().done);

    let rows: Vec<BTreeMap<String, String>> = (1..=3)
        .map(|i| {
            BTreeMap::from([
                ("id".to_string(), i.to_string()),
                ("body".to_string(), format!("post {}", i)),
            ])
        })
        .collect();
    record.write_csv_and_finish(&rows).await.unwrap();
    assert!(queue.finish_job(job.id).await.unwrap());

    let report = QueryRecord::resolve_by_key(&ctx, search.key())
        .await
        .unwrap()
        .status_report();
    assert!(report.done);
    assert!(!report.empty);
    assert_eq!(report.rows, 3);
    assert_eq!(report.path, search.result_file());
    assert_eq!(queue.count(None).await.unwrap(), 0);
}

#[tokio::test]
async fn test_search_without_results() {
    let (_tmp, ctx, queue) = setup().await;
    let search = queue_search(&ctx, &queue, "news", "nothing here", Parameters::new())
        .await
        .unwrap();

    let mut record = QueryRecord::resolve_by_key(&ctx, search.key()).await.unwrap();
    record.mark_empty().await.unwrap();
    record.finish(0).await.unwrap();

    assert_eq!(record.check_finished(), ResultState::Empty);
    assert!(matches!(
        record.finish(1).await,
        Err(Error::AlreadyFinished(_))
    ));
}

#[tokio::test]
async fn test_analysis_chain() {
    let (_tmp, ctx, queue) = setup().await;
    let search = queue_search(&ctx, &queue, "news", "q", Parameters::new())
        .await
        .unwrap();

    let options = HashMap::from([("attribute".to_string(), "country".to_string())]);
    let queued = queue_analysis(&ctx, &queue, search.key(), "attribute-frequencies", &options)
        .await
        .unwrap();
    let child = queued.record;

    assert_eq!(child.query(), "attribute-frequencies");
    assert_eq!(child.parameters()["attribute"], json!("country"));
    assert_eq!(child.parameters()["timeframe"], json!("month"));
    assert!(child.result_file().starts_with("attribute-frequencies-"));

    let job = queue.claim_next(Some("attribute-frequencies")).await.unwrap().unwrap();
    assert_eq!(job.remote_id, child.key());

    let overview = search.analysis_overview().await.unwrap();
    assert!(overview.any_running);
    assert_eq!(overview.running.len(), 1);
    assert_eq!(overview.running[0].record.key_parent, search.key());

    // Child never shows up among root searches
    let roots = queries::list_root_queries(ctx.db(), None, 10, 0).await.unwrap();
    assert_eq!(roots.len(), 1);
    assert_eq!(roots[0].key, search.key());
}

#[tokio::test]
async fn test_zip_processor_reserves_zip_file() {
    let (_tmp, ctx, queue) = setup().await;
    let search = queue_search(&ctx, &queue, "news", "q", Parameters::new())
        .await
        .unwrap();

    let queued = queue_analysis(&ctx, &queue, search.key(), "tokenise-posts", &HashMap::new())
        .await
        .unwrap();
    assert!(queued.record.result_file().ends_with(".zip"));
}

#[tokio::test]
async fn test_list_root_queries_by_user() {
    let (_tmp, ctx, queue) = setup().await;
    for (query, user) in [("a", "alice"), ("b", "bob"), ("c", "alice")] {
        queue_search(&ctx, &queue, "news", query, params(json!({"user": user})))
            .await
            .unwrap();
    }

    assert_eq!(queries::count_root_queries(ctx.db(), None).await.unwrap(), 3);
    assert_eq!(
        queries::count_root_queries(ctx.db(), Some("alice")).await.unwrap(),
        2
    );

    let page = queries::list_root_queries(ctx.db(), Some("alice"), 1, 1).await.unwrap();
    assert_eq!(page.len(), 1);
    assert!(page[0].parameters.contains("alice"));
}
