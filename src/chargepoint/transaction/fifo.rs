//! Durable transaction request FIFO.
//!
//! StartTransaction, StopTransaction and transactional MeterValues must
//! reach the Central System even across restarts and outages: losing one
//! corrupts billing state. Requests are persisted before they are enqueued
//! and removed only once the Central System has acknowledged them.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};

use serde_json::Value;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info};

use crate::infrastructure::database::RequestFifoRepository;
use crate::support::errors::StationResult;

#[derive(Debug, Clone)]
struct QueueEntry {
    id: i64,
    action: String,
    request: Value,
}

pub struct RequestFifo {
    entries: Mutex<VecDeque<QueueEntry>>,
    repo: RequestFifoRepository,
    next_id: AtomicI64,
    pushed: Notify,
}

impl RequestFifo {
    /// Restore the queue from the database, in `id` order, and seed the id
    /// counter past the highest persisted entry.
    pub async fn load(repo: RequestFifoRepository) -> StationResult<Self> {
        let rows = repo.load_all().await?;
        let next_id = rows.last().map(|row| row.id + 1).unwrap_or(0);

        let mut entries = VecDeque::with_capacity(rows.len());
        for row in rows {
            let request = serde_json::from_str(&row.request)?;
            entries.push_back(QueueEntry {
                id: row.id,
                action: row.action,
                request,
            });
        }

        info!(pending = entries.len(), "Transaction request FIFO loaded");
        Ok(Self {
            entries: Mutex::new(entries),
            repo,
            next_id: AtomicI64::new(next_id),
            pushed: Notify::new(),
        })
    }

    /// Persist and enqueue a request. Returns only once the row is
    /// committed.
    pub async fn push(&self, action: &str, request: Value) -> StationResult<()> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let serialized = request.to_string();

        // Persist first: a crash between the two steps must not lose the
        // request, a duplicate in memory is impossible since we hold no
        // entry until the insert returns.
        self.repo.insert(id, action, &serialized).await?;

        let mut entries = self.entries.lock().await;
        debug!(id, action, "FIFO push");
        entries.push_back(QueueEntry {
            id,
            action: action.to_string(),
            request,
        });
        drop(entries);

        self.pushed.notify_one();
        Ok(())
    }

    /// Peek the head without removing it.
    pub async fn front(&self) -> Option<(String, Value)> {
        let entries = self.entries.lock().await;
        entries
            .front()
            .map(|entry| (entry.action.clone(), entry.request.clone()))
    }

    /// Remove the head. Only call after the Central System acknowledged it
    /// with a CALLRESULT (or the request was classified undeliverable).
    pub async fn pop(&self) -> StationResult<()> {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.pop_front() {
            debug!(id = entry.id, action = entry.action.as_str(), "FIFO pop");
            drop(entries);
            self.repo.delete(entry.id).await?;
        }
        Ok(())
    }

    pub async fn size(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Wait until something is pushed. May wake spuriously; callers
    /// re-check `front()`.
    pub async fn wait_for_push(&self) {
        self.pushed.notified().await;
    }
}
