use crate::jobs::model::Job;
use crate::jobs::retry::{self, RetryDecision};
use crate::jobs::store::JobStore;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

const ERROR_BODY_SNIPPET_CHARS: usize = 500;
const JSON_MIME: &str = "application/json";

// outcome writes are retried so a store hiccup does not strand a job in `processing`
const REPORT_TRIES: u32 = 4;
const REPORT_BACKOFF: Duration = Duration::from_millis(100);

/// Why a single attempt failed. The `Display` text is what gets stored as the
/// job's `error_message`.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("invalid HTTP method: {0:?}")]
    InvalidMethod(String),

    #[error("invalid headers: {0}")]
    InvalidHeaders(String),

    #[error("failed to build request: {0}")]
    Build(String),

    #[error("request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("request failed: {0}")]
    Transport(String),

    #[error("HTTP {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("failed to decode JSON response: {0}")]
    Decode(String),

    #[error("execution aborted unexpectedly: {0}")]
    Aborted(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobExecutionOutcome {
    Completed,
    Requeued { error: String },
    Failed { error: String },
}

/// Runs one claimed job: one outbound request, then exactly one store write.
#[derive(Clone)]
pub struct Executor {
    http: reqwest::Client,
    store: Arc<dyn JobStore>,
    request_timeout: Duration,
    max_attempts: i32,
}

impl Executor {
    /// The attempt budget comes from the store, so the retry decision always
    /// matches what its guarded writes accept.
    pub fn new(store: Arc<dyn JobStore>, request_timeout: Duration) -> anyhow::Result<Self> {
        let max_attempts = store.max_attempts();
        let http = reqwest::Client::builder()
            .user_agent(concat!("httpflow/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            store,
            request_timeout,
            max_attempts,
        })
    }

    /// Execute and report. The request runs on its own task so that even a
    /// panic while building or sending ends in a failure report.
    ///
    /// An `Err` here means the outcome could not be written back.
    pub async fn run(&self, job: Job) -> anyhow::Result<JobExecutionOutcome> {
        let start = Instant::now();

        let attempt = {
            let this = self.clone();
            let job = job.clone();
            tokio::spawn(async move { this.execute(&job).await })
        };
        let result = match attempt.await {
            Ok(res) => res,
            Err(join_err) => Err(ExecError::Aborted(join_err.to_string())),
        };

        let latency_ms = start.elapsed().as_millis() as u64;
        let outcome = self.report(&job, result).await?;

        match &outcome {
            JobExecutionOutcome::Completed => tracing::info!(
                job_id = %job.id,
                attempts = job.attempts,
                latency_ms,
                "job completed"
            ),
            JobExecutionOutcome::Requeued { error } => tracing::warn!(
                job_id = %job.id,
                attempts = job.attempts,
                max_attempts = self.max_attempts,
                latency_ms,
                error = %error,
                "job attempt failed, requeued"
            ),
            JobExecutionOutcome::Failed { error } => tracing::error!(
                job_id = %job.id,
                attempts = job.attempts,
                latency_ms,
                error = %error,
                "job failed permanently"
            ),
        }

        Ok(outcome)
    }

    /// The single outbound call. Returns the value to store as `result`.
    pub async fn execute(&self, job: &Job) -> Result<String, ExecError> {
        let request = self.build_request(job)?;

        let response = self
            .http
            .execute(request)
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ExecError::Status {
                status,
                body: snippet(&text),
            });
        }

        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(is_json_content_type)
            .unwrap_or(false);

        let text = response.text().await.map_err(|e| self.transport_error(e))?;

        if is_json && !text.trim().is_empty() {
            let parsed: Value =
                serde_json::from_str(&text).map_err(|e| ExecError::Decode(e.to_string()))?;
            return serde_json::to_string(&parsed).map_err(|e| ExecError::Decode(e.to_string()));
        }

        Ok(text)
    }

    fn build_request(&self, job: &Job) -> Result<reqwest::Request, ExecError> {
        let method = Method::from_bytes(job.method.trim().to_ascii_uppercase().as_bytes())
            .map_err(|_| ExecError::InvalidMethod(job.method.clone()))?;

        let mut headers = parse_headers(&job.headers)?;
        apply_body_defaults(&mut headers, job.body.is_some());

        let mut header_map = HeaderMap::with_capacity(headers.len());
        for (name, value) in headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| ExecError::InvalidHeaders(format!("bad header name {name:?}")))?;
            let header_value = HeaderValue::from_str(&value)
                .map_err(|_| ExecError::InvalidHeaders(format!("bad value for header {name:?}")))?;
            header_map.append(header_name, header_value);
        }

        let mut builder = self
            .http
            .request(method, job.url.as_str())
            .headers(header_map)
            .timeout(self.request_timeout);

        if let Some(body) = &job.body {
            builder = builder.body(body.clone());
        }

        builder.build().map_err(|e| ExecError::Build(e.to_string()))
    }

    fn transport_error(&self, err: reqwest::Error) -> ExecError {
        if err.is_timeout() {
            ExecError::Timeout(self.request_timeout)
        } else {
            ExecError::Transport(err.to_string())
        }
    }

    async fn report(
        &self,
        job: &Job,
        result: Result<String, ExecError>,
    ) -> anyhow::Result<JobExecutionOutcome> {
        let (outcome, body) = match result {
            Ok(body) => (JobExecutionOutcome::Completed, body),
            Err(err) => {
                let error = err.to_string();
                let outcome = match retry::decide(job.attempts, self.max_attempts) {
                    RetryDecision::Requeue => JobExecutionOutcome::Requeued { error },
                    RetryDecision::TerminalFail => JobExecutionOutcome::Failed { error },
                };
                (outcome, String::new())
            }
        };

        let mut backoff = REPORT_BACKOFF;
        let mut tries = 0;
        loop {
            tries += 1;
            match self.write_outcome(job.id, &outcome, &body).await {
                Ok(()) => return Ok(outcome),
                Err(e) if tries < REPORT_TRIES => {
                    tracing::warn!(
                        job_id = %job.id,
                        tries,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "recording job outcome failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(e) => {
                    return Err(e.context(format!(
                        "gave up recording outcome of job {} after {tries} tries",
                        job.id
                    )))
                }
            }
        }
    }

    async fn write_outcome(
        &self,
        job_id: Uuid,
        outcome: &JobExecutionOutcome,
        body: &str,
    ) -> anyhow::Result<()> {
        match outcome {
            JobExecutionOutcome::Completed => self.store.complete(job_id, body).await,
            JobExecutionOutcome::Requeued { error } => self.store.requeue(job_id, error).await,
            JobExecutionOutcome::Failed { error } => self.store.fail(job_id, error).await,
        }
    }
}

/// Stored headers are a JSON object; key order is kept. Scalar values are
/// stringified, anything else is rejected.
pub fn parse_headers(raw: &str) -> Result<Vec<(String, String)>, ExecError> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }

    let value: Value =
        serde_json::from_str(raw).map_err(|e| ExecError::InvalidHeaders(e.to_string()))?;
    let Value::Object(map) = value else {
        return Err(ExecError::InvalidHeaders(
            "expected a JSON object of header name to value".to_string(),
        ));
    };

    map.into_iter()
        .map(|(name, v)| {
            let value = match v {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                other => {
                    return Err(ExecError::InvalidHeaders(format!(
                        "header {name:?} has non-scalar value {other}"
                    )))
                }
            };
            Ok((name, value))
        })
        .collect()
}

/// With a body, `content-type` and `accept` default to JSON unless the job
/// already sets them (names compared case-insensitively).
pub fn apply_body_defaults(headers: &mut Vec<(String, String)>, has_body: bool) {
    if !has_body {
        return;
    }

    let has = |headers: &[(String, String)], name: &str| {
        headers.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
    };

    if !has(headers, "content-type") {
        headers.push(("content-type".to_string(), JSON_MIME.to_string()));
    }
    if !has(headers, "accept") {
        headers.push(("accept".to_string(), JSON_MIME.to_string()));
    }
}

fn is_json_content_type(value: &str) -> bool {
    let essence = value
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    essence == JSON_MIME || essence.ends_with("+json")
}

fn snippet(text: &str) -> String {
    text.chars().take(ERROR_BODY_SNIPPET_CHARS).collect()
}
