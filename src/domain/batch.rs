//! Background batch tracking types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::takeoff::{AggregateResult, BatchProgress};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Queued,
    Running,
    Completed,
    Cancelled,
}

impl BatchStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, BatchStatus::Completed | BatchStatus::Cancelled)
    }
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BatchStatus::Queued => write!(f, "queued"),
            BatchStatus::Running => write!(f, "running"),
            BatchStatus::Completed => write!(f, "completed"),
            BatchStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Response for a newly started batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchCreated {
    pub batch_id: Uuid,
    pub total: usize,
}

/// Point-in-time view of a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSnapshot {
    pub batch_id: Uuid,
    pub status: BatchStatus,
    pub total: usize,
    /// Last document started, not last finished: `current` is the 1-based
    /// index of the document whose analysis began most recently. With
    /// `BATCH_CONCURRENCY` above 1, earlier documents may still be running.
    pub progress: Option<BatchProgress>,
    /// Progress as 0-100, counting the document in flight as half done.
    pub percent: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<AggregateResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}
