//! rqp-qr - Query Registry command-line tool
//!
//! Registers searches, chains analyses, and lets workers claim jobs and
//! report results. All output is JSON on stdout; logs go to stderr.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rqp_common::config::{self, RootLayout, TomlConfig};
use rqp_qr::db::queries;
use rqp_qr::pipeline::{queue_analysis, queue_search};
use rqp_qr::{Catalog, JobQueue, Parameters, QueryContext, QueryRecord, ResultState};

/// Command-line arguments for rqp-qr
#[derive(Parser, Debug)]
#[command(name = "rqp-qr")]
#[command(about = "Query registry for the research query pipeline")]
#[command(version)]
struct Args {
    /// Root folder holding the database and result files
    #[arg(short, long, env = "RQP_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    /// Post-processor catalog file (defaults to catalog.toml in the root folder)
    #[arg(long)]
    catalog: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register a search and queue its collection job
    Search {
        /// Platform the search runs against
        #[arg(short, long)]
        platform: String,
        /// Query text
        query: String,
        /// Search parameters as a JSON object
        #[arg(long, default_value = "{}")]
        parameters: String,
    },
    /// Show the status summary of a record
    Status { key: String },
    /// Show where the result of a record stands
    Result { key: String },
    /// Show the analyses of a record and what may still be queued
    Analyses { key: String },
    /// Queue an analysis beneath a search
    QueueAnalysis {
        key: String,
        processor: String,
        /// Processor option as name=value; repeatable
        #[arg(short, long = "option", value_parser = parse_option)]
        options: Vec<(String, String)>,
    },
    /// Mark a record finished
    Finish {
        key: String,
        /// Number of result rows
        #[arg(long, default_value_t = 0, conflicts_with = "empty")]
        rows: u64,
        /// Finished without results
        #[arg(long)]
        empty: bool,
    },
    /// List root searches, newest first
    List {
        #[arg(long)]
        user: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        offset: i64,
    },
    /// List known post-processors
    Processors,
    /// Claim the oldest unclaimed job
    Claim {
        #[arg(long)]
        jobtype: Option<String>,
    },
}

fn parse_option(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        // A bare name switches a toggle on
        None if !raw.is_empty() => Ok((raw.to_string(), String::new())),
        _ => Err(format!("invalid option '{}', expected name=value", raw)),
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let file_config = TomlConfig::load();

    // Logs go to stderr so stdout stays parseable
    let default_filter = file_config
        .log_level
        .clone()
        .unwrap_or_else(|| "rqp_qr=info,rqp_common=info".to_string());
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!(
        "Starting rqp-qr v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("RQP_GIT_HASH"),
        env!("RQP_BUILD_TIMESTAMP"),
        env!("RQP_BUILD_PROFILE")
    );

    let root = config::resolve_root_folder(
        args.root_folder.as_deref(),
        config::ROOT_FOLDER_ENV,
        &file_config,
    );
    let layout = RootLayout::with_config(root, &file_config);

    let catalog_path = args
        .catalog
        .clone()
        .unwrap_or_else(|| layout.catalog_path().to_path_buf());
    let catalog = Catalog::load_or_builtin(&catalog_path)
        .with_context(|| format!("Failed to load catalog {}", catalog_path.display()))?;

    let ctx = QueryContext::open(&layout, Arc::new(catalog))
        .await
        .with_context(|| format!("Failed to open root folder {}", layout.root().display()))?;
    let queue = JobQueue::new(ctx.db().clone());

    run(args.command, &ctx, &queue).await
}

async fn run(command: Command, ctx: &QueryContext, queue: &JobQueue) -> Result<()> {
    match command {
        Command::Search {
            platform,
            query,
            parameters,
        } => {
            let parameters: Parameters =
                serde_json::from_str(&parameters).context("Parameters must be a JSON object")?;
            let record = queue_search(ctx, queue, &platform, &query, parameters).await?;
            print_json(&json!({
                "key": record.key(),
                "new": record.is_new(),
                "result_file": record.result_file(),
                "status": record.status(),
            }))
        }
        Command::Status { key } => {
            let record = QueryRecord::resolve_by_key(ctx, &key).await?;
            print_json(&record.status_report())
        }
        Command::Result { key } => {
            let record = QueryRecord::resolve_by_key(ctx, &key).await?;
            let state = match record.check_finished() {
                ResultState::Ready(path) => json!({"state": "ready", "path": path}),
                ResultState::Empty => json!({"state": "empty"}),
                ResultState::Pending => json!({"state": "pending"}),
            };
            print_json(&state)
        }
        Command::Analyses { key } => {
            let record = QueryRecord::resolve_by_key(ctx, &key).await?;
            print_json(&record.analysis_overview().await?)
        }
        Command::QueueAnalysis {
            key,
            processor,
            options,
        } => {
            let options: HashMap<String, String> = options.into_iter().collect();
            let queued = queue_analysis(ctx, queue, &key, &processor, &options).await?;
            print_json(&json!({
                "key": queued.record.key(),
                "parent": key,
                "newly_queued": queued.newly_queued,
                "parameters": queued.record.parameters(),
            }))
        }
        Command::Finish { key, rows, empty } => {
            let mut record = QueryRecord::resolve_by_key(ctx, &key).await?;
            if empty {
                record.mark_empty().await?;
            }
            record.finish(rows).await?;
            print_json(&record.status_report())
        }
        Command::List {
            user,
            limit,
            offset,
        } => {
            if limit < 0 || offset < 0 {
                bail!("limit and offset must not be negative");
            }
            let rows = queries::list_root_queries(ctx.db(), user.as_deref(), limit, offset).await?;
            let total = queries::count_root_queries(ctx.db(), user.as_deref()).await?;
            print_json(&json!({"total": total, "queries": rows}))
        }
        Command::Processors => {
            let processors: Vec<_> = ctx.catalog().iter().collect();
            print_json(&processors)
        }
        Command::Claim { jobtype } => {
            let job = queue.claim_next(jobtype.as_deref()).await?;
            print_json(&job)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_option() {
        assert_eq!(
            parse_option("timeframe=week").unwrap(),
            ("timeframe".to_string(), "week".to_string())
        );
        assert_eq!(
            parse_option("stem").unwrap(),
            ("stem".to_string(), String::new())
        );
        assert_eq!(
            parse_option("query=a=b").unwrap(),
            ("query".to_string(), "a=b".to_string())
        );
        assert!(parse_option("=x").is_err());
        assert!(parse_option("").is_err());
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "rqp-qr",
            "--root-folder",
            "/tmp/rqp",
            "queue-analysis",
            "abc",
            "tokenise-posts",
            "-o",
            "timeframe=day",
            "-o",
            "stem",
        ])
        .unwrap();

        assert_eq!(args.root_folder, Some(PathBuf::from("/tmp/rqp")));
        match args.command {
            Command::QueueAnalysis {
                key,
                processor,
                options,
            } => {
                assert_eq!(key, "abc");
                assert_eq!(processor, "tokenise-posts");
                assert_eq!(options.len(), 2);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_finish_rows_conflicts_with_empty() {
        let result = Args::try_parse_from(["rqp-qr", "finish", "abc", "--rows", "3", "--empty"]);
        assert!(result.is_err());
    }
}
