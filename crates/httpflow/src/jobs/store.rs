use crate::jobs::model::{Job, StatusCounts};
use async_trait::async_trait;
use uuid::Uuid;

/// What the engine needs from persistent job storage.
///
/// `claim_next` must be a single indivisible operation: two callers (in this
/// process or another one sharing the store) can never receive the same job.
/// The three write operations only apply to a job that is currently
/// `processing`, and return an error when the guarded row does not match.
#[async_trait]
pub trait JobStore: Send + Sync + 'static {
    /// Attempt budget the guarded writes enforce. The executor decides
    /// between requeue and terminal failure against this same number.
    fn max_attempts(&self) -> i32;

    /// Take the oldest pending job with the lowest priority value, mark it
    /// `processing` and bump `attempts`. `None` when nothing is eligible.
    async fn claim_next(&self) -> anyhow::Result<Option<Job>>;

    async fn complete(&self, job_id: Uuid, result: &str) -> anyhow::Result<()>;

    /// Back to `pending`. Only legal while `attempts < max_attempts`.
    async fn requeue(&self, job_id: Uuid, error_message: &str) -> anyhow::Result<()>;

    /// Terminal failure. Only legal once `attempts >= max_attempts`.
    async fn fail(&self, job_id: Uuid, error_message: &str) -> anyhow::Result<()>;

    async fn status_counts(&self) -> anyhow::Result<StatusCounts>;

    /// Plain read, used by operator surfaces.
    async fn get_job(&self, job_id: Uuid) -> anyhow::Result<Option<Job>>;
}
