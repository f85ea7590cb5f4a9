use crate::jobs::model::StatusCounts;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollerState {
    Idle,
    TickRunning,
}

/// Operator view of the queue and of this process's utilization.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub at: DateTime<Utc>,

    pub pending: i64,
    pub processing: i64,
    pub failed: i64,
    pub completed_today: i64,

    pub current_in_flight: usize,
    pub max_concurrent: usize,
    pub peak_in_flight: usize,

    pub poller_running: bool,
    pub poller_state: PollerState,
}

impl StatusSnapshot {
    pub fn counts(&self) -> StatusCounts {
        StatusCounts {
            pending: self.pending,
            processing: self.processing,
            failed: self.failed,
            completed_today: self.completed_today,
        }
    }

    /// Prometheus text exposition.
    pub fn to_prometheus(&self) -> String {
        format!(
            concat!(
                "# HELP httpflow_pending_jobs Jobs waiting to be claimed\n",
                "# TYPE httpflow_pending_jobs gauge\n",
                "httpflow_pending_jobs {}\n",
                "# HELP httpflow_processing_jobs Jobs claimed and not yet finished\n",
                "# TYPE httpflow_processing_jobs gauge\n",
                "httpflow_processing_jobs {}\n",
                "# HELP httpflow_failed_jobs Jobs that exhausted their attempts\n",
                "# TYPE httpflow_failed_jobs gauge\n",
                "httpflow_failed_jobs {}\n",
                "# HELP httpflow_completed_today Jobs completed since UTC midnight\n",
                "# TYPE httpflow_completed_today gauge\n",
                "httpflow_completed_today {}\n",
                "# HELP httpflow_in_flight Executions running in this process\n",
                "# TYPE httpflow_in_flight gauge\n",
                "httpflow_in_flight {}\n",
                "# HELP httpflow_max_concurrent Concurrency ceiling of this process\n",
                "# TYPE httpflow_max_concurrent gauge\n",
                "httpflow_max_concurrent {}\n"
            ),
            self.pending,
            self.processing,
            self.failed,
            self.completed_today,
            self.current_in_flight,
            self.max_concurrent
        )
    }
}
