//! In-memory registry of background takeoff batches.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::batch::{BatchSnapshot, BatchStatus};
use crate::domain::takeoff::{AggregateResult, BatchProgress, Document};
use crate::services::analyzer::TakeoffAnalyzer;

#[derive(Debug)]
struct BatchEntry {
    status: BatchStatus,
    total: usize,
    progress: Option<BatchProgress>,
    result: Option<AggregateResult>,
    cancel: CancellationToken,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl BatchEntry {
    /// Finished batches expire `retention` after completion; running ones never do.
    fn is_expired(&self, now: DateTime<Utc>, retention: chrono::Duration) -> bool {
        match self.completed_at {
            Some(completed_at) if self.status.is_finished() => now - completed_at > retention,
            _ => false,
        }
    }

    fn snapshot(&self, batch_id: Uuid) -> BatchSnapshot {
        let percent = match (&self.progress, self.status) {
            (_, BatchStatus::Completed) => 100.0,
            (Some(p), _) if p.total > 0 => ((p.current as f64 - 0.5) / p.total as f64 * 100.0).max(0.0),
            _ => 0.0,
        };
        BatchSnapshot {
            batch_id,
            status: self.status,
            total: self.total,
            progress: self.progress.clone(),
            percent,
            result: self.result.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            completed_at: self.completed_at,
        }
    }
}

/// Batches keyed by id. Finished batches are pruned once they outlive the
/// retention window, on the next `create` or `snapshot`.
#[derive(Debug)]
pub struct BatchRegistry {
    batches: RwLock<HashMap<Uuid, BatchEntry>>,
    retention: chrono::Duration,
}

impl BatchRegistry {
    pub fn new(retention: Duration) -> Self {
        Self {
            batches: RwLock::new(HashMap::new()),
            retention: chrono::Duration::from_std(retention)
                .unwrap_or_else(|_| chrono::Duration::days(365 * 100)),
        }
    }

    fn prune_expired(&self, now: DateTime<Utc>) {
        let mut batches = self.batches.write();
        let before = batches.len();
        batches.retain(|_, entry| !entry.is_expired(now, self.retention));
        let pruned = before - batches.len();
        if pruned > 0 {
            debug!(pruned, remaining = batches.len(), "Pruned expired batches");
        }
    }

    /// Registers a queued batch and returns its id and cancellation token.
    pub fn create(&self, total: usize) -> (Uuid, CancellationToken) {
        self.prune_expired(Utc::now());
        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let now = Utc::now();
        self.batches.write().insert(
            id,
            BatchEntry {
                status: BatchStatus::Queued,
                total,
                progress: None,
                result: None,
                cancel: cancel.clone(),
                created_at: now,
                updated_at: now,
                completed_at: None,
            },
        );
        (id, cancel)
    }

    pub fn update_progress(&self, id: Uuid, progress: BatchProgress) {
        if let Some(entry) = self.batches.write().get_mut(&id) {
            if entry.status == BatchStatus::Queued {
                entry.status = BatchStatus::Running;
            }
            entry.progress = Some(progress);
            entry.updated_at = Utc::now();
        }
    }

    pub fn complete(&self, id: Uuid, result: AggregateResult) {
        if let Some(entry) = self.batches.write().get_mut(&id) {
            let now = Utc::now();
            entry.status = if result.cancelled {
                BatchStatus::Cancelled
            } else {
                BatchStatus::Completed
            };
            entry.result = Some(result);
            entry.updated_at = now;
            entry.completed_at = Some(now);
        }
    }

    /// Requests cancellation. Returns the status at the time of the request,
    /// or `None` for an unknown batch.
    pub fn cancel(&self, id: Uuid) -> Option<BatchStatus> {
        let batches = self.batches.read();
        let entry = batches.get(&id)?;
        if !entry.status.is_finished() {
            entry.cancel.cancel();
        }
        Some(entry.status)
    }

    pub fn snapshot(&self, id: Uuid) -> Option<BatchSnapshot> {
        self.snapshot_at(id, Utc::now())
    }

    fn snapshot_at(&self, id: Uuid, now: DateTime<Utc>) -> Option<BatchSnapshot> {
        self.prune_expired(now);
        self.batches.read().get(&id).map(|e| e.snapshot(id))
    }
}

/// Starts a batch on the runtime and returns its id immediately.
pub fn spawn_batch(
    registry: Arc<BatchRegistry>,
    analyzer: Arc<TakeoffAnalyzer>,
    documents: Vec<Document>,
) -> Uuid {
    let (batch_id, cancel) = registry.create(documents.len());
    info!(batch_id = %batch_id, documents = documents.len(), "Batch queued");

    tokio::spawn(async move {
        let progress_registry = registry.clone();
        let result = analyzer
            .analyze_all(
                &documents,
                move |progress| progress_registry.update_progress(batch_id, progress),
                &cancel,
            )
            .await;

        if result.cancelled {
            warn!(batch_id = %batch_id, "Batch cancelled");
        } else {
            info!(batch_id = %batch_id, issues = result.issues.len(), "Batch finished");
        }
        registry.complete(batch_id, result);
    });

    batch_id
}
