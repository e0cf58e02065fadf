//! Offline command queue.
//!
//! Per-actor FIFO lists, optionally mirrored to a JSON file after every
//! mutation. Mutations are serialized with their write, and a failed write
//! reverts the mutation, so memory and disk never disagree about what a
//! caller was told succeeded. Entries older than the expiry are never handed
//! out.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::adapters::directory::write_atomically;
use crate::ports::{OfflineQueue, QueueError, QueuedCommand, SystemTimeSource, TimeSource};

type Queues = BTreeMap<String, Vec<QueuedCommand>>;

/// Queue store keyed by actor name.
pub struct OfflineQueueStore {
    queues: Mutex<Queues>,
    writes: tokio::sync::Mutex<()>,
    path: Option<PathBuf>,
    expiry: Duration,
    clock: Arc<dyn TimeSource>,
}

impl OfflineQueueStore {
    /// Volatile store
    pub fn in_memory(expiry: Duration) -> Self {
        Self {
            queues: Mutex::new(Queues::new()),
            writes: tokio::sync::Mutex::new(()),
            path: None,
            expiry,
            clock: Arc::new(SystemTimeSource),
        }
    }

    /// File-backed store; a missing file starts empty.
    pub async fn open(path: impl Into<PathBuf>, expiry: Duration) -> Result<Self, QueueError> {
        let path = path.into();
        let queues: Queues = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Queues::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == ErrorKind::NotFound => Queues::new(),
            Err(e) => return Err(e.into()),
        };

        let pending: usize = queues.values().map(Vec::len).sum();
        info!(path = %path.display(), actors = queues.len(), pending, "Offline queue loaded");

        Ok(Self {
            queues: Mutex::new(queues),
            writes: tokio::sync::Mutex::new(()),
            path: Some(path),
            expiry,
            clock: Arc::new(SystemTimeSource),
        })
    }

    /// Replace the clock (tests)
    pub fn with_clock(mut self, clock: Arc<dyn TimeSource>) -> Self {
        self.clock = clock;
        self
    }

    /// Snapshot of what is queued for `actor`
    pub fn pending_for(&self, actor: &str) -> Vec<QueuedCommand> {
        self.queues.lock().get(actor).cloned().unwrap_or_default()
    }

    /// Total entries across all actors
    pub fn total_pending(&self) -> usize {
        self.queues.lock().values().map(Vec::len).sum()
    }

    /// Write the current state to disk, if file-backed.
    pub async fn flush(&self) -> Result<(), QueueError> {
        self.apply(|_| ((), true)).await
    }

    /// Run `change` and persist the result under the write lock. `change`
    /// reports whether it modified anything; unmodified state is not
    /// written. If persisting fails the change is undone.
    async fn apply<T>(&self, change: impl FnOnce(&mut Queues) -> (T, bool)) -> Result<T, QueueError> {
        let _write = self.writes.lock().await;
        let Some(path) = &self.path else {
            let (result, _) = change(&mut *self.queues.lock());
            return Ok(result);
        };

        let (result, previous, encoded) = {
            let mut queues = self.queues.lock();
            let previous = queues.clone();
            let (result, dirty) = change(&mut *queues);
            if !dirty {
                return Ok(result);
            }
            (result, previous, serde_json::to_vec_pretty(&*queues))
        };

        let persisted = match encoded {
            Ok(bytes) => write_atomically(path, &bytes).await.map_err(QueueError::from),
            Err(e) => Err(e.into()),
        };
        match persisted {
            Ok(()) => Ok(result),
            Err(e) => {
                *self.queues.lock() = previous;
                warn!(path = %path.display(), error = %e, "Queue write failed, change reverted");
                Err(e)
            }
        }
    }

    fn now(&self) -> i64 {
        self.clock.now() as i64
    }

    fn is_live(&self, entry: &QueuedCommand, now: i64) -> bool {
        now.saturating_sub(entry.enqueued_at) < self.expiry.as_secs() as i64
    }
}

#[async_trait]
impl OfflineQueue for OfflineQueueStore {
    async fn enqueue(&self, actor: &str, command: &str, requester: &str) -> Result<(), QueueError> {
        let entry = QueuedCommand {
            command: command.to_string(),
            enqueued_at: self.now(),
            requester: requester.to_string(),
        };
        self.apply(|queues| {
            queues.entry(actor.to_string()).or_default().push(entry);
            ((), true)
        })
        .await?;
        debug!(actor = %actor, requester = %requester, "Command enqueued");
        Ok(())
    }

    async fn drain_and_clear(&self, actor: &str) -> Result<Vec<QueuedCommand>, QueueError> {
        let now = self.now();
        let drained = self
            .apply(|queues| {
                let drained = queues.remove(actor).unwrap_or_default();
                let dirty = !drained.is_empty();
                (drained, dirty)
            })
            .await?;
        if drained.is_empty() {
            return Ok(drained);
        }

        let total = drained.len();
        let live: Vec<QueuedCommand> = drained
            .into_iter()
            .filter(|entry| self.is_live(entry, now))
            .collect();
        if live.len() < total {
            debug!(actor = %actor, expired = total - live.len(), "Dropped expired queue entries");
        }
        Ok(live)
    }

    async fn requeue(&self, actor: &str, entries: Vec<QueuedCommand>) -> Result<(), QueueError> {
        if entries.is_empty() {
            return Ok(());
        }
        self.apply(|queues| {
            let queue = queues.entry(actor.to_string()).or_default();
            let newer = std::mem::take(queue);
            *queue = entries;
            queue.extend(newer);
            ((), true)
        })
        .await
    }

    async fn purge_expired(&self) -> Result<usize, QueueError> {
        let now = self.now();
        let removed = self
            .apply(|queues| {
                let before: usize = queues.values().map(Vec::len).sum();
                for queue in queues.values_mut() {
                    queue.retain(|entry| self.is_live(entry, now));
                }
                queues.retain(|_, queue| !queue.is_empty());
                let removed = before - queues.values().map(Vec::len).sum::<usize>();
                (removed, removed > 0)
            })
            .await?;

        if removed > 0 {
            debug!(removed, "Purged expired queue entries");
        }
        Ok(removed)
    }
}

/// Background task to purge expired entries
pub async fn cleanup_task(queue: Arc<dyn OfflineQueue>, interval: Duration) {
    let mut cleanup_interval = tokio::time::interval(interval);
    cleanup_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        cleanup_interval.tick().await;
        if let Err(e) = queue.purge_expired().await {
            tracing::warn!(error = %e, "Offline queue purge failed");
        }
    }
}
