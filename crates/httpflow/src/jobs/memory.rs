use crate::jobs::model::{Job, JobStatus, NewJob, StatusCounts};
use crate::jobs::repo::stuck_message;
use crate::jobs::store::JobStore;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

/// In-process job store. Every operation runs inside one critical section, so
/// the claim is as indivisible as the Postgres statement. Nothing survives a
/// restart; used for tests and local runs without a database.
pub struct MemoryJobStore {
    max_attempts: i32,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<Uuid, Entry>,
    next_seq: u64,
}

struct Entry {
    // tie-breaker for jobs created within the same clock tick
    seq: u64,
    job: Job,
}

impl MemoryJobStore {
    pub fn new(max_attempts: i32) -> Self {
        Self {
            max_attempts,
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> anyhow::Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| anyhow::anyhow!("memory job store mutex poisoned"))
    }

    pub fn enqueue(&self, job: NewJob) -> anyhow::Result<Uuid> {
        let mut inner = self.lock()?;
        let now = Utc::now();
        let id = Uuid::new_v4();
        let seq = inner.next_seq;
        inner.next_seq += 1;

        inner.jobs.insert(
            id,
            Entry {
                seq,
                job: Job {
                    id,
                    priority: job.priority,
                    method: job.method,
                    url: job.url,
                    headers: job.headers,
                    body: job.body,
                    status: JobStatus::Pending.as_str().to_string(),
                    attempts: 0,
                    result: None,
                    error_message: None,
                    owner_id: job.owner_id,
                    created_at: now,
                    updated_at: now,
                },
            },
        );

        Ok(id)
    }

    /// Most recently touched jobs first. `limit` is clamped to [1, 500].
    pub fn list_recent(&self, status: Option<&str>, limit: i64) -> anyhow::Result<Vec<Job>> {
        let limit = limit.clamp(1, 500) as usize;
        let inner = self.lock()?;

        let mut rows: Vec<&Entry> = inner
            .jobs
            .values()
            .filter(|e| status.map_or(true, |st| e.job.status == st))
            .collect();
        rows.sort_by(|a, b| {
            b.job
                .updated_at
                .cmp(&a.job.updated_at)
                .then(b.seq.cmp(&a.seq))
        });

        Ok(rows.into_iter().take(limit).map(|e| e.job.clone()).collect())
    }

    pub fn retry_failed(&self, job_id: Uuid) -> anyhow::Result<bool> {
        let mut inner = self.lock()?;
        match inner.jobs.get_mut(&job_id) {
            Some(e) if e.job.status == JobStatus::Failed.as_str() => {
                e.job.status = JobStatus::Pending.as_str().to_string();
                e.job.attempts = 0;
                e.job.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Moves jobs stuck in `processing` for at least `older_than` back to
    /// `pending`, or to `failed` once their attempts are spent.
    pub fn requeue_stuck(&self, older_than: Duration) -> anyhow::Result<u64> {
        let cutoff = Utc::now() - chrono::Duration::from_std(older_than)?;
        let message = stuck_message(older_than);
        let max_attempts = self.max_attempts;
        let mut inner = self.lock()?;

        let mut moved = 0;
        for e in inner.jobs.values_mut() {
            if e.job.status != JobStatus::Processing.as_str() || e.job.updated_at > cutoff {
                continue;
            }
            let next = if e.job.attempts < max_attempts {
                JobStatus::Pending
            } else {
                JobStatus::Failed
            };
            e.job.status = next.as_str().to_string();
            e.job.error_message = Some(message.clone());
            e.job.updated_at = Utc::now();
            moved += 1;
        }

        Ok(moved)
    }

    /// Guarded transition out of `processing`; `allowed` sees the current
    /// attempt count.
    fn finish(
        &self,
        op: &str,
        job_id: Uuid,
        allowed: impl Fn(i32) -> bool,
        apply: impl FnOnce(&mut Job),
    ) -> anyhow::Result<()> {
        let mut inner = self.lock()?;
        let entry = inner
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| anyhow::anyhow!("{op}: job {job_id} not found"))?;

        if entry.job.status != JobStatus::Processing.as_str() || !allowed(entry.job.attempts) {
            anyhow::bail!(
                "{op}: job {job_id} not eligible (status={} attempts={} max_attempts={})",
                entry.job.status,
                entry.job.attempts,
                self.max_attempts
            );
        }

        apply(&mut entry.job);
        entry.job.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    fn max_attempts(&self) -> i32 {
        self.max_attempts
    }

    async fn claim_next(&self) -> anyhow::Result<Option<Job>> {
        let mut inner = self.lock()?;
        let max_attempts = self.max_attempts;

        let candidate = inner
            .jobs
            .values()
            .filter(|e| e.job.status == JobStatus::Pending.as_str() && e.job.attempts < max_attempts)
            .min_by(|a, b| {
                a.job
                    .priority
                    .cmp(&b.job.priority)
                    .then(a.job.created_at.cmp(&b.job.created_at))
                    .then(a.seq.cmp(&b.seq))
            })
            .map(|e| e.job.id);

        let Some(id) = candidate else {
            return Ok(None);
        };

        let entry = inner
            .jobs
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("claim: job {id} vanished"))?;
        entry.job.status = JobStatus::Processing.as_str().to_string();
        entry.job.attempts += 1;
        entry.job.updated_at = Utc::now();

        Ok(Some(entry.job.clone()))
    }

    async fn complete(&self, job_id: Uuid, result: &str) -> anyhow::Result<()> {
        self.finish("complete", job_id, |_| true, |job| {
            job.status = JobStatus::Completed.as_str().to_string();
            job.result = Some(result.to_string());
            job.error_message = None;
        })
    }

    async fn requeue(&self, job_id: Uuid, error_message: &str) -> anyhow::Result<()> {
        let max_attempts = self.max_attempts;
        self.finish("requeue", job_id, |attempts| attempts < max_attempts, |job| {
            job.status = JobStatus::Pending.as_str().to_string();
            job.error_message = Some(error_message.to_string());
        })
    }

    async fn fail(&self, job_id: Uuid, error_message: &str) -> anyhow::Result<()> {
        let max_attempts = self.max_attempts;
        self.finish("fail", job_id, |attempts| attempts >= max_attempts, |job| {
            job.status = JobStatus::Failed.as_str().to_string();
            job.error_message = Some(error_message.to_string());
        })
    }

    async fn status_counts(&self) -> anyhow::Result<StatusCounts> {
        let inner = self.lock()?;
        let today = Utc::now().date_naive();

        let mut counts = StatusCounts::default();
        for e in inner.jobs.values() {
            match e.job.status() {
                Some(JobStatus::Pending) => counts.pending += 1,
                Some(JobStatus::Processing) => counts.processing += 1,
                Some(JobStatus::Failed) => counts.failed += 1,
                Some(JobStatus::Completed) if e.job.updated_at.date_naive() == today => {
                    counts.completed_today += 1
                }
                _ => {}
            }
        }

        Ok(counts)
    }

    async fn get_job(&self, job_id: Uuid) -> anyhow::Result<Option<Job>> {
        Ok(self.lock()?.jobs.get(&job_id).map(|e| e.job.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn guarded_transitions_reject_jobs_not_in_flight() {
        let store = MemoryJobStore::new(2);
        let id = store.enqueue(NewJob::new("GET", "http://localhost/")).unwrap();

        // still pending: nothing to finish
        assert!(store.complete(id, "x").await.is_err());

        let job = store.claim_next().await.unwrap().expect("claim");
        assert_eq!(job.attempts, 1);

        // one attempt used out of two: terminal fail is not legal yet
        assert!(store.fail(id, "boom").await.is_err());
        store.requeue(id, "boom").await.unwrap();

        let job = store.claim_next().await.unwrap().expect("claim again");
        assert_eq!(job.attempts, 2);
        assert!(store.requeue(id, "boom").await.is_err());
        store.fail(id, "boom").await.unwrap();

        let failed = store.get_job(id).await.unwrap().unwrap();
        assert_eq!(failed.status(), Some(JobStatus::Failed));
        assert_eq!(failed.error_message.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn retry_failed_resets_the_attempt_budget() {
        let store = MemoryJobStore::new(1);
        let id = store.enqueue(NewJob::new("GET", "http://localhost/")).unwrap();

        store.claim_next().await.unwrap().expect("claim");
        store.fail(id, "nope").await.unwrap();

        assert!(store.retry_failed(id).unwrap());
        let job = store.claim_next().await.unwrap().expect("re-driven job is claimable");
        assert_eq!(job.attempts, 1);
        assert_eq!(job.error_message.as_deref(), Some("nope"));
        assert!(store.claim_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stuck_processing_jobs_are_recovered() {
        let store = MemoryJobStore::new(2);
        let retryable = store.enqueue(NewJob::new("GET", "http://localhost/a")).unwrap();
        store.claim_next().await.unwrap().unwrap();

        let spent = store.enqueue(NewJob::new("GET", "http://localhost/b")).unwrap();
        store.claim_next().await.unwrap().unwrap();
        store.requeue(spent, "boom").await.unwrap();
        store.claim_next().await.unwrap().unwrap();

        // nothing is old enough yet
        assert_eq!(store.requeue_stuck(Duration::from_secs(3600)).unwrap(), 0);

        assert_eq!(store.requeue_stuck(Duration::ZERO).unwrap(), 2);
        let a = store.get_job(retryable).await.unwrap().unwrap();
        assert_eq!(a.status(), Some(JobStatus::Pending));
        assert_eq!(a.attempts, 1);
        assert_eq!(
            a.error_message.as_deref(),
            Some("abandoned in processing for over 0s")
        );
        let b = store.get_job(spent).await.unwrap().unwrap();
        assert_eq!(b.status(), Some(JobStatus::Failed));
        assert_eq!(b.attempts, 2);

        // the retryable one is claimable again
        let again = store.claim_next().await.unwrap().unwrap();
        assert_eq!(again.id, retryable);
        assert_eq!(again.attempts, 2);
    }

    #[tokio::test]
    async fn status_counts_track_each_state() {
        let store = MemoryJobStore::new(1);
        let a = store.enqueue(NewJob::new("GET", "http://localhost/a")).unwrap();
        let _b = store.enqueue(NewJob::new("GET", "http://localhost/b")).unwrap();
        let _c = store.enqueue(NewJob::new("GET", "http://localhost/c")).unwrap();

        let first = store.claim_next().await.unwrap().unwrap();
        assert_eq!(first.id, a);
        store.complete(a, "{}").await.unwrap();

        let second = store.claim_next().await.unwrap().unwrap();
        store.fail(second.id, "x").await.unwrap();

        let _third = store.claim_next().await.unwrap().unwrap();

        let counts = store.status_counts().await.unwrap();
        assert_eq!(
            counts,
            StatusCounts {
                pending: 0,
                processing: 1,
                failed: 1,
                completed_today: 1,
            }
        );
    }
}
