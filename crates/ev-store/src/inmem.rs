//! In-memory repository: a vector kept sorted by id, for tests and replay
//! of small corpora.
//!
//! Store is O(N) in the worst case, but the typical producer appends
//! monotonically generated ids, in which case insertion lands at the tail.
//! The cursor is pull-model: fetch seeks the sorted vector directly under a
//! read lock, with no background task.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ev_core::{id, Event};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use ulid::Ulid;

use crate::cursor::Lifecycle;
use crate::{Cursor, Error, Repository};

type SortedEvents = Arc<RwLock<Vec<Event>>>;

#[derive(Default)]
pub struct InMemRepository {
    events: SortedEvents,
}

impl InMemRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Repository for InMemRepository {
    async fn store(&self, event: Event) -> Result<(), Error> {
        let mut events = self.events.write().await;
        // First slot whose id is greater than the new one; equal ids end up
        // adjacent, not deduplicated.
        let at = events.partition_point(|stored| stored.id <= event.id);
        if at == events.len() {
            events.push(event);
        } else {
            events.insert(at, event);
        }
        Ok(())
    }

    async fn iterator(
        &self,
        token: CancellationToken,
        since: DateTime<Utc>,
    ) -> Result<Box<dyn Cursor>, Error> {
        Ok(Box::new(InMemCursor {
            id: format!("inmem-{}", id::make()),
            last: id::from_time(since),
            events: Arc::clone(&self.events),
            lifecycle: Lifecycle::new(&token),
        }))
    }

    async fn close(&self) -> Result<(), Error> {
        self.events.write().await.clear();
        Ok(())
    }
}

struct InMemCursor {
    id: String,
    /// Id of the last delivered event; fetch resumes strictly after it.
    last: Ulid,
    events: SortedEvents,
    lifecycle: Arc<Lifecycle>,
}

#[async_trait]
impl Cursor for InMemCursor {
    fn id(&self) -> &str {
        &self.id
    }

    async fn fetch(&mut self, batch: usize) -> Result<Vec<Event>, Error> {
        if self.lifecycle.is_closed() {
            return Err(Error::Closed);
        }
        if batch == 0 {
            return Ok(Vec::new());
        }

        let page = {
            let events = self.events.read().await;
            let start = events.partition_point(|stored| stored.id <= self.last);
            if start == events.len() {
                return Err(Error::Empty);
            }
            let end = events.len().min(start + batch);
            events[start..end].to_vec()
        };

        if let Some(newest) = page.last() {
            self.last = newest.id;
        }
        Ok(page)
    }

    fn close(&self, cause: Option<Error>) {
        self.lifecycle.close(cause);
    }

    fn done(&self) -> CancellationToken {
        self.lifecycle.token()
    }

    fn err(&self) -> Option<Arc<Error>> {
        self.lifecycle.cause()
    }
}
