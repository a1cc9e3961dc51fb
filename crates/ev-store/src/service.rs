//! The service layer: owns the active-cursor registry, mediates store and
//! fetch under concurrent access, and cascades shutdown.
//!
//! Cursors derive their cancellation tokens from the service root created
//! by `up()`; `down()` cancels the root, every cursor drains, and each one's
//! watcher removes it from the registry. `close_iterator` removes and closes
//! atomically so a caller racing a fetch can never revive a closed cursor.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use ev_core::{Event, Payload};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use ulid::Ulid;

use crate::{Cursor, Error, Repository};

/// A registered cursor behind an async mutex, which guarantees the
/// single-fetcher rule per cursor.
pub type SharedCursor = Arc<tokio::sync::Mutex<Box<dyn Cursor>>>;

pub struct Service {
    repo: Arc<dyn Repository>,
    iterators: Arc<RwLock<HashMap<String, SharedCursor>>>,
    root: Mutex<Option<CancellationToken>>,
}

impl Service {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self {
            repo,
            iterators: Arc::new(RwLock::new(HashMap::new())),
            root: Mutex::new(None),
        }
    }

    /// Create the root cancellation token. Pair with a fresh instance; a
    /// second `up` on a running service is a no-op.
    pub fn up(&self) {
        let mut root = self.root.lock().unwrap_or_else(|e| e.into_inner());
        if root.is_none() {
            *root = Some(CancellationToken::new());
        }
        info!(service = "events", "up");
    }

    /// Cancel the root token. Every owned cursor observes the cascade,
    /// drains, and deregisters itself.
    pub fn down(&self) {
        let taken = self
            .root
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(root) = taken {
            root.cancel();
        }
        info!(service = "events", "down");
    }

    fn root_token(&self) -> Result<CancellationToken, Error> {
        self.root
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(Error::Unavailable)
    }

    /// Validate and persist one event. A missing id means "assign one".
    pub async fn store(
        &self,
        topic: &str,
        payload: Payload,
        id: Option<Ulid>,
    ) -> Result<(), Error> {
        if payload.is_empty() {
            return Err(Error::EmptyPayload);
        }

        let event = match id {
            Some(id) => Event::with_id(id, topic, payload),
            None => Event::new(topic, payload),
        };
        self.repo.store(event).await
    }

    /// Open a repository cursor bound to the service root and register it.
    ///
    /// `topic` travels with the request for observability only; the
    /// repositories do not filter server-side. Consumers filter in their
    /// handler.
    pub async fn new_iterator(&self, topic: &str, since: DateTime<Utc>) -> Result<String, Error> {
        let root = self.root_token()?;
        let cursor = self.repo.iterator(root, since).await?;

        let id = cursor.id().to_owned();
        let token = cursor.done();
        let shared: SharedCursor = Arc::new(tokio::sync::Mutex::new(cursor));
        self.iterators.write().await.insert(id.clone(), shared);
        debug!(iterator = %id, topic, since = %since, "iterator opened");

        // Garbage-collect the registry entry once the cursor is done,
        // whether it was closed explicitly or drained by shutdown.
        let iterators = Arc::clone(&self.iterators);
        let watched = id.clone();
        tokio::spawn(async move {
            token.cancelled().await;
            iterators.write().await.remove(&watched);
            debug!(iterator = %watched, "iterator removed");
        });

        Ok(id)
    }

    /// Look up a registered cursor.
    pub async fn iterator(&self, id: &str) -> Result<SharedCursor, Error> {
        self.iterators
            .read()
            .await
            .get(id)
            .map(Arc::clone)
            .ok_or(Error::IteratorNotFound)
    }

    /// Fetch the next batch from a registered cursor.
    pub async fn fetch_from_iterator(&self, batch: usize, id: &str) -> Result<Vec<Event>, Error> {
        let cursor = self.iterator(id).await?;
        let mut cursor = cursor.lock().await;
        cursor.fetch(batch).await
    }

    /// Atomically remove and cleanly close a cursor.
    pub async fn close_iterator(&self, id: &str) -> Result<(), Error> {
        let cursor = self
            .iterators
            .write()
            .await
            .remove(id)
            .ok_or(Error::IteratorNotFound)?;
        cursor.lock().await.close(None);
        Ok(())
    }

    /// Number of currently registered cursors.
    pub async fn iterator_count(&self) -> usize {
        self.iterators.read().await.len()
    }
}
