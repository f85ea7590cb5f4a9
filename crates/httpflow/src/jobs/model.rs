use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Job {
    pub id: Uuid,
    pub priority: i32,

    pub method: String,
    pub url: String,
    /// JSON object text; insertion order is the header order on the wire.
    pub headers: String,
    pub body: Option<String>,

    pub status: String,
    pub attempts: i32,
    pub result: Option<String>,
    pub error_message: Option<String>,

    pub owner_id: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn status(&self) -> Option<JobStatus> {
        JobStatus::parse(&self.status)
    }
}

#[derive(Debug, Clone)]
pub struct NewJob {
    pub priority: i32,
    pub method: String,
    pub url: String,
    pub headers: String,
    pub body: Option<String>,
    pub owner_id: Option<String>,
}

impl NewJob {
    /// A body-less request with no extra headers at priority 0.
    pub fn new(method: &str, url: &str) -> Self {
        Self {
            priority: 0,
            method: method.to_string(),
            url: url.to_string(),
            headers: "{}".to_string(),
            body: None,
            owner_id: None,
        }
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn headers(mut self, headers: serde_json::Value) -> Self {
        self.headers = headers.to_string();
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

/// Job counts by status. `completed_today` is scoped to the current UTC day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct StatusCounts {
    pub pending: i64,
    pub processing: i64,
    pub failed: i64,
    pub completed_today: i64,
}
