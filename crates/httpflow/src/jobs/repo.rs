// crates/httpflow/src/jobs/repo.rs

use crate::jobs::model::{Job, JobStatus, NewJob, StatusCounts};
use crate::jobs::store::JobStore;
use async_trait::async_trait;
use sqlx::PgPool;
use std::time::Duration;
use uuid::Uuid;

/// Postgres-backed job store.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
    max_attempts: i32,
}

impl PgJobStore {
    pub fn new(pool: PgPool, max_attempts: i32) -> Self {
        Self { pool, max_attempts }
    }

    // ----------------------------
    // Enqueue / reads (operator + tests)
    // ----------------------------

    pub async fn enqueue(&self, job: NewJob) -> anyhow::Result<Uuid> {
        let id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO jobs (priority, method, url, headers, body, owner_id, status, attempts)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 0)
            RETURNING id
            "#,
        )
        .bind(job.priority)
        .bind(&job.method)
        .bind(&job.url)
        .bind(&job.headers)
        .bind(&job.body)
        .bind(&job.owner_id)
        .bind(JobStatus::Pending.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    /// Most recently touched jobs first. `limit` is clamped to [1, 500].
    pub async fn list_recent(&self, status: Option<&str>, limit: i64) -> anyhow::Result<Vec<Job>> {
        let limit = limit.clamp(1, 500);

        let rows = match status {
            Some(st) => {
                sqlx::query_as::<_, Job>(
                    r#"
                    SELECT * FROM jobs
                    WHERE status = $1
                    ORDER BY updated_at DESC, id DESC
                    LIMIT $2
                    "#,
                )
                .bind(st)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, Job>(
                    r#"
                    SELECT * FROM jobs
                    ORDER BY updated_at DESC, id DESC
                    LIMIT $1
                    "#,
                )
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows)
    }

    /// Operator re-drive of a terminally failed job: back to `pending` with a
    /// fresh attempt budget. Returns false when the job is not `failed`.
    pub async fn retry_failed(&self, job_id: Uuid) -> anyhow::Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'pending',
                attempts = 0,
                updated_at = now()
            WHERE id = $1
              AND status = 'failed'
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() == 1)
    }

    /// Operator recovery for jobs whose outcome never got written: anything
    /// `processing` and untouched for `older_than` goes back to `pending`, or
    /// to `failed` when its attempts are spent. Returns the number of jobs moved.
    pub async fn requeue_stuck(&self, older_than: Duration) -> anyhow::Result<u64> {
        let res = sqlx::query(
            r#"
            UPDATE jobs
            SET status = CASE WHEN attempts < $2 THEN 'pending' ELSE 'failed' END,
                error_message = $3,
                updated_at = now()
            WHERE status = 'processing'
              AND updated_at <= now() - make_interval(secs => $1)
            "#,
        )
        .bind(older_than.as_secs_f64())
        .bind(self.max_attempts)
        .bind(stuck_message(older_than))
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected())
    }
}

pub(crate) fn stuck_message(older_than: Duration) -> String {
    format!("abandoned in processing for over {}s", older_than.as_secs())
}

#[async_trait]
impl JobStore for PgJobStore {
    fn max_attempts(&self) -> i32 {
        self.max_attempts
    }

    /// Correctness: one statement, SELECT ... FOR UPDATE SKIP LOCKED feeding the
    /// UPDATE. A concurrent claimer skips the locked row instead of waiting on
    /// it and re-reading a row that is no longer pending.
    async fn claim_next(&self) -> anyhow::Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>(
            r#"
            WITH candidate AS (
              SELECT id
              FROM jobs
              WHERE status = 'pending'
                AND attempts < $1
              ORDER BY priority ASC, created_at ASC, id ASC
              FOR UPDATE SKIP LOCKED
              LIMIT 1
            )
            UPDATE jobs j
            SET status = 'processing',
                attempts = j.attempts + 1,
                updated_at = now()
            FROM candidate
            WHERE j.id = candidate.id
            RETURNING j.*
            "#,
        )
        .bind(self.max_attempts)
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }

    async fn complete(&self, job_id: Uuid, result: &str) -> anyhow::Result<()> {
        let res = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'completed',
                result = $2,
                error_message = NULL,
                updated_at = now()
            WHERE id = $1
              AND status = 'processing'
            "#,
        )
        .bind(job_id)
        .bind(result)
        .execute(&self.pool)
        .await?;

        if res.rows_affected() == 0 {
            anyhow::bail!("complete: job {job_id} is not processing");
        }
        Ok(())
    }

    async fn requeue(&self, job_id: Uuid, error_message: &str) -> anyhow::Result<()> {
        let res = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'pending',
                error_message = $2,
                updated_at = now()
            WHERE id = $1
              AND status = 'processing'
              AND attempts < $3
            "#,
        )
        .bind(job_id)
        .bind(error_message)
        .bind(self.max_attempts)
        .execute(&self.pool)
        .await?;

        if res.rows_affected() == 0 {
            anyhow::bail!(
                "requeue: job {job_id} is not processing with attempts below {}",
                self.max_attempts
            );
        }
        Ok(())
    }

    async fn fail(&self, job_id: Uuid, error_message: &str) -> anyhow::Result<()> {
        let res = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'failed',
                error_message = $2,
                updated_at = now()
            WHERE id = $1
              AND status = 'processing'
              AND attempts >= $3
            "#,
        )
        .bind(job_id)
        .bind(error_message)
        .bind(self.max_attempts)
        .execute(&self.pool)
        .await?;

        if res.rows_affected() == 0 {
            anyhow::bail!(
                "fail: job {job_id} is not processing with {} attempts used",
                self.max_attempts
            );
        }
        Ok(())
    }

    async fn status_counts(&self) -> anyhow::Result<StatusCounts> {
        let counts = sqlx::query_as::<_, StatusCounts>(
            r#"
            SELECT
              COUNT(*) FILTER (WHERE status = 'pending')    AS pending,
              COUNT(*) FILTER (WHERE status = 'processing') AS processing,
              COUNT(*) FILTER (WHERE status = 'failed')     AS failed,
              COUNT(*) FILTER (
                WHERE status = 'completed'
                  AND updated_at >= date_trunc('day', now() AT TIME ZONE 'utc') AT TIME ZONE 'utc'
              ) AS completed_today
            FROM jobs
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(counts)
    }

    async fn get_job(&self, job_id: Uuid) -> anyhow::Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }
}
