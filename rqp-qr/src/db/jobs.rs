//! Job queue
//!
//! Jobs are `(jobtype, remote_id)` pairs, where `remote_id` is the key of the
//! query record the job works on. A pair can only be queued once; claiming
//! is an atomic `UPDATE ... WHERE claimed = 0`.

use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::{Error, Result};

const JOB_COLUMNS: &str = "id, jobtype, remote_id, timestamp, claimed, attempts";

/// One queued job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Job {
    pub id: i64,
    pub jobtype: String,
    pub remote_id: String,
    /// Time the job was queued, epoch seconds
    pub timestamp: i64,
    /// Time the job was claimed, epoch seconds; 0 while unclaimed
    pub claimed: i64,
    pub attempts: i64,
}

impl Job {
    pub fn is_claimed(&self) -> bool {
        self.claimed > 0
    }
}

/// SQLite-backed job queue
#[derive(Clone)]
pub struct JobQueue {
    pool: SqlitePool,
}

impl JobQueue {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Queue a job
    ///
    /// Fails with [`Error::JobAlreadyExists`] when the pair is already
    /// queued; callers that only need the job to exist should swallow it.
    pub async fn add_job(&self, jobtype: &str, remote_id: &str) -> Result<Job> {
        let now = rqp_common::time::epoch_seconds();

        let result = sqlx::query(
            r#"
            INSERT INTO jobs (jobtype, remote_id, timestamp)
            VALUES (?, ?, ?)
            ON CONFLICT(jobtype, remote_id) DO NOTHING
            "#,
        )
        .bind(jobtype)
        .bind(remote_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::JobAlreadyExists {
                jobtype: jobtype.to_string(),
                remote_id: remote_id.to_string(),
            });
        }

        let job = self.fetch(result.last_insert_rowid()).await?;
        info!(job_id = job.id, jobtype, remote_id, "Queued job");

        Ok(job)
    }

    /// Look up the job for a pair
    pub async fn get_job(&self, jobtype: &str, remote_id: &str) -> Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>(&format!(
            "SELECT {} FROM jobs WHERE jobtype = ? AND remote_id = ?",
            JOB_COLUMNS
        ))
        .bind(jobtype)
        .bind(remote_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }

    /// Atomically claim the oldest unclaimed job, optionally of one type
    pub async fn claim_next(&self, jobtype: Option<&str>) -> Result<Option<Job>> {
        let mut tx = self.pool.begin().await?;

        let job_id: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT id FROM jobs
            WHERE claimed = 0 AND (? IS NULL OR jobtype = ?)
            ORDER BY timestamp ASC, id ASC
            LIMIT 1
            "#,
        )
        .bind(jobtype)
        .bind(jobtype)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(job_id) = job_id else {
            tx.commit().await?;
            return Ok(None);
        };

        let now = rqp_common::time::epoch_seconds().max(1);
        let rows_affected = sqlx::query(
            "UPDATE jobs SET claimed = ?, attempts = attempts + 1 WHERE id = ? AND claimed = 0",
        )
        .bind(now)
        .bind(job_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            // Claimed by another worker in the meantime
            tx.commit().await?;
            return Ok(None);
        }

        let job = sqlx::query_as::<_, Job>(&format!("SELECT {} FROM jobs WHERE id = ?", JOB_COLUMNS))
            .bind(job_id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        info!(job_id = job.id, jobtype = %job.jobtype, remote_id = %job.remote_id, "Claimed job");

        Ok(Some(job))
    }

    /// Return a claimed job to the queue
    pub async fn release_job(&self, job_id: i64) -> Result<bool> {
        let affected = sqlx::query("UPDATE jobs SET claimed = 0 WHERE id = ?")
            .bind(job_id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        debug!(job_id, released = affected > 0, "Released job");
        Ok(affected > 0)
    }

    /// Remove a completed job from the queue
    pub async fn finish_job(&self, job_id: i64) -> Result<bool> {
        let affected = sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(job_id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        debug!(job_id, finished = affected > 0, "Finished job");
        Ok(affected > 0)
    }

    /// Number of queued jobs, optionally of one type
    pub async fn count(&self, jobtype: Option<&str>) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE (? IS NULL OR jobtype = ?)")
                .bind(jobtype)
                .bind(jobtype)
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }

    async fn fetch(&self, job_id: i64) -> Result<Job> {
        let job = sqlx::query_as::<_, Job>(&format!("SELECT {} FROM jobs WHERE id = ?", JOB_COLUMNS))
            .bind(job_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rqp_common::db::init_database;
    use tempfile::TempDir;

    async fn setup_queue() -> (TempDir, JobQueue) {
        let tmp = TempDir::new().unwrap();
        let pool = init_database(&tmp.path().join("rqp.db")).await.unwrap();
        (tmp, JobQueue::new(pool))
    }

    #[tokio::test]
    async fn test_add_job_rejects_duplicates() {
        let (_tmp, queue) = setup_queue().await;

        let job = queue.add_job("news-search", "abc").await.unwrap();
        assert_eq!(job.jobtype, "news-search");
        assert_eq!(job.remote_id, "abc");
        assert!(!job.is_claimed());

        let duplicate = queue.add_job("news-search", "abc").await;
        assert!(matches!(duplicate, Err(Error::JobAlreadyExists { .. })));

        // Same remote id under another job type is a different job
        queue.add_job("count-posts", "abc").await.unwrap();
        assert_eq!(queue.count(None).await.unwrap(), 2);
        assert_eq!(queue.count(Some("news-search")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_get_job() {
        let (_tmp, queue) = setup_queue().await;
        let added = queue.add_job("news-search", "abc").await.unwrap();

        let found = queue.get_job("news-search", "abc").await.unwrap();
        assert_eq!(found, Some(added));
        assert!(queue.get_job("news-search", "zzz").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_next_empty_queue() {
        let (_tmp, queue) = setup_queue().await;
        assert!(queue.claim_next(None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_next_claims_each_job_once() {
        let (_tmp, queue) = setup_queue().await;
        let first = queue.add_job("news-search", "a").await.unwrap();
        let second = queue.add_job("news-search", "b").await.unwrap();

        let claimed = queue.claim_next(None).await.unwrap().unwrap();
        assert_eq!(claimed.id, first.id);
        assert!(claimed.is_claimed());
        assert_eq!(claimed.attempts, 1);

        let claimed = queue.claim_next(None).await.unwrap().unwrap();
        assert_eq!(claimed.id, second.id);

        assert!(queue.claim_next(None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_next_filters_by_type() {
        let (_tmp, queue) = setup_queue().await;
        queue.add_job("news-search", "a").await.unwrap();
        let wanted = queue.add_job("count-posts", "b").await.unwrap();

        let claimed = queue.claim_next(Some("count-posts")).await.unwrap().unwrap();
        assert_eq!(claimed.id, wanted.id);
        assert!(queue.claim_next(Some("count-posts")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_release_and_finish() {
        let (_tmp, queue) = setup_queue().await;
        queue.add_job("news-search", "a").await.unwrap();

        let claimed = queue.claim_next(None).await.unwrap().unwrap();
        assert!(queue.release_job(claimed.id).await.unwrap());

        let reclaimed = queue.claim_next(None).await.unwrap().unwrap();
        assert_eq!(reclaimed.id, claimed.id);
        assert_eq!(reclaimed.attempts, 2);

        assert!(queue.finish_job(reclaimed.id).await.unwrap());
        assert!(!queue.finish_job(reclaimed.id).await.unwrap());
        assert_eq!(queue.count(None).await.unwrap(), 0);
    }
}
