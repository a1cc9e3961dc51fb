//! Log-structured repository on sled.
//!
//! Events are stored as `key = id bytes, value = JSON(event)`; the 16-byte
//! big-endian-time-first key makes the tree's byte order equal id order.
//! Each cursor gets a background pump that range-scans strictly past the
//! last delivered id on a ticker and feeds the prefetch channel; newly
//! stored events become visible on the next tick.

use std::ops::Bound;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ev_core::{id, Event};
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};
use ulid::Ulid;

use crate::cursor::{Lifecycle, PollCursor, PollOptions};
use crate::{Cursor, Error, Repository};

pub struct KvRepository {
    db: sled::Db,
    opts: PollOptions,
}

impl KvRepository {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        Self::with_options(path, PollOptions::default())
    }

    pub fn with_options(path: impl AsRef<Path>, opts: PollOptions) -> Result<Self, Error> {
        Ok(Self {
            db: sled::open(path)?,
            opts,
        })
    }
}

#[async_trait]
impl Repository for KvRepository {
    async fn store(&self, event: Event) -> Result<(), Error> {
        let key = event.id.to_bytes();
        let value = serde_json::to_vec(&event)?;
        self.db.insert(key, value)?;
        Ok(())
    }

    async fn iterator(
        &self,
        token: CancellationToken,
        since: DateTime<Utc>,
    ) -> Result<Box<dyn Cursor>, Error> {
        let lifecycle = Lifecycle::new(&token);
        let (tx, rx) = mpsc::channel((self.opts.prefetch * 2).max(1));
        let (err_tx, err_rx) = oneshot::channel();

        tokio::spawn(pump(
            self.db.clone(),
            id::from_time(since),
            self.opts.tick,
            tx,
            err_tx,
            lifecycle.token(),
        ));
        PollCursor::spawn_watcher(Arc::clone(&lifecycle), err_rx);

        Ok(Box::new(PollCursor::new(
            format!("sled-{}", id::make()),
            self.opts.fetch_timeout,
            rx,
            lifecycle,
        )))
    }

    async fn close(&self) -> Result<(), Error> {
        self.db.flush_async().await?;
        Ok(())
    }
}

async fn pump(
    db: sled::Db,
    mut last: Ulid,
    tick: Duration,
    tx: mpsc::Sender<Event>,
    err_tx: oneshot::Sender<Error>,
    token: CancellationToken,
) {
    // First scan after one full period, like a wall-clock ticker.
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + tick, tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                debug!(last = %last, "event pump cancelled");
                return;
            }
            _ = ticker.tick() => {
                if let Err(err) = scan(&db, &mut last, &tx, &token).await {
                    error!(error = %err, "event scan failed");
                    let _ = err_tx.send(err);
                    return;
                }
            }
        }
    }
}

/// One scan pass: every row strictly past `last`, in key order. The lower
/// bound is exclusive, so a boundary re-read of the previous key is
/// impossible by construction.
async fn scan(
    db: &sled::Db,
    last: &mut Ulid,
    tx: &mpsc::Sender<Event>,
    token: &CancellationToken,
) -> Result<(), Error> {
    let range = (Bound::Excluded(last.to_bytes()), Bound::Unbounded);
    for row in db.range::<[u8; 16], _>(range) {
        let (_, value) = row?;
        let event: Event = serde_json::from_slice(&value)?;
        let advanced = event.id;

        tokio::select! {
            _ = token.cancelled() => return Ok(()),
            sent = tx.send(event) => {
                if sent.is_err() {
                    // Cursor dropped; nobody is listening any more.
                    return Ok(());
                }
            }
        }
        *last = advanced;
    }
    Ok(())
}
