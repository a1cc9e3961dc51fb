//! Sqlite repository with write coalescing.
//!
//! Store does not touch the database: it appends to a mutex-protected
//! buffer which a flush task drains on a ticker (DSN `duration=`, default
//! 10 s) in one transaction. A failed flush is logged and the batch dropped,
//! so each batch gets at most one delivery attempt. Close cancels the ticker and
//! drains synchronously before the connection is released.
//!
//! The iterator side is the same pump/prefetch architecture as the sled
//! backend, with the seek expressed as `WHERE id > ? ORDER BY id`; the
//! 16-byte id key is a BLOB, whose memcmp order equals id order.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ev_core::{id, Event};
use rusqlite::{params, Connection};
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};
use ulid::Ulid;

use crate::config::split_dsn;
use crate::cursor::{Lifecycle, PollCursor, PollOptions};
use crate::{Cursor, Error, Repository};

const DEFAULT_FLUSH_EVERY: Duration = Duration::from_secs(10);
const FLUSH_DEADLINE: Duration = Duration::from_secs(3);

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS events (
    id    BLOB PRIMARY KEY,
    event TEXT NOT NULL
)";

type SharedConn = Arc<Mutex<Connection>>;
type WriteBuffer = Arc<Mutex<Vec<Event>>>;

#[derive(Debug)]
pub struct SqlRepository {
    conn: SharedConn,
    pending: WriteBuffer,
    opts: PollOptions,
    flush_token: CancellationToken,
}

impl SqlRepository {
    /// Open from a DSN: a file path or `:memory:`, with an optional
    /// `?duration=<humantime>` flush interval.
    pub fn open(dsn: &str) -> Result<Self, Error> {
        Self::with_options(dsn, PollOptions::default())
    }

    pub fn with_options(dsn: &str, opts: PollOptions) -> Result<Self, Error> {
        let (path, params) = split_dsn(dsn);

        let mut flush_every = DEFAULT_FLUSH_EVERY;
        for (key, value) in &params {
            if key == "duration" {
                flush_every = humantime::parse_duration(value)
                    .map_err(|err| Error::InvalidDsn(format!("duration: {err}")))?;
            }
        }

        let conn = if path == ":memory:" || path.is_empty() {
            Connection::open_in_memory()?
        } else {
            Connection::open(path)?
        };
        conn.execute_batch(SCHEMA)?;

        let repo = Self {
            conn: Arc::new(Mutex::new(conn)),
            pending: Arc::new(Mutex::new(Vec::new())),
            opts,
            flush_token: CancellationToken::new(),
        };

        tokio::spawn(flush_loop(
            Arc::clone(&repo.conn),
            Arc::clone(&repo.pending),
            flush_every,
            repo.flush_token.clone(),
        ));

        Ok(repo)
    }
}

#[async_trait]
impl Repository for SqlRepository {
    async fn store(&self, event: Event) -> Result<(), Error> {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.push(event);
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
            Arc::clone(&self.conn),
            id::from_time(since),
            self.opts.clone(),
            tx,
            err_tx,
            lifecycle.token(),
        ));
        PollCursor::spawn_watcher(Arc::clone(&lifecycle), err_rx);

        Ok(Box::new(PollCursor::new(
            format!("sqlite-{}", id::make()),
            self.opts.fetch_timeout,
            rx,
            lifecycle,
        )))
    }

    async fn close(&self) -> Result<(), Error> {
        self.flush_token.cancel();
        // Final drain before the connection is released; the flush loop may
        // have raced us here, in which case the buffer is already empty.
        flush(&self.conn, &self.pending).await;
        Ok(())
    }
}

async fn flush_loop(
    conn: SharedConn,
    pending: WriteBuffer,
    every: Duration,
    token: CancellationToken,
) {
    // First flush after one full period, like a wall-clock ticker.
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                flush(&conn, &pending).await;
                debug!("event flush loop done");
                return;
            }
            _ = ticker.tick() => {
                flush(&conn, &pending).await;
            }
        }
    }
}

/// Drain the buffer and write it in one transaction. Errors are logged and
/// the batch is dropped either way.
async fn flush(conn: &SharedConn, pending: &WriteBuffer) {
    let batch: Vec<Event> = {
        let mut pending = pending.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *pending)
    };
    if batch.is_empty() {
        return;
    }

    let size = batch.len();
    let conn = Arc::clone(conn);
    let write = tokio::task::spawn_blocking(move || write_batch(&conn, &batch));

    match tokio::time::timeout(FLUSH_DEADLINE, write).await {
        Ok(Ok(Ok(()))) => debug!(events = size, "events written"),
        Ok(Ok(Err(err))) => error!(error = %err, events = size, "batch write failed"),
        Ok(Err(err)) => error!(error = %err, events = size, "batch write task failed"),
        Err(_) => error!(events = size, "batch write deadline exceeded"),
    }
}

fn write_batch(conn: &SharedConn, batch: &[Event]) -> Result<(), Error> {
    let mut conn = conn.lock().unwrap_or_else(|e| e.into_inner());
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare_cached("INSERT OR REPLACE INTO events (id, event) VALUES (?1, ?2)")?;
        for event in batch {
            let encoded = serde_json::to_string(event)?;
            stmt.execute(params![event.id.to_bytes().as_slice(), encoded])?;
        }
    }
    tx.commit()?;
    Ok(())
}

async fn pump(
    conn: SharedConn,
    mut last: Ulid,
    opts: PollOptions,
    tx: mpsc::Sender<Event>,
    err_tx: oneshot::Sender<Error>,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + opts.tick, opts.tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // Bounded page per tick; the remainder surfaces on later ticks.
    let page = (opts.prefetch * 2).max(1);

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                debug!(last = %last, "event pump cancelled");
                return;
            }
            _ = ticker.tick() => {
                if let Err(err) = scan(&conn, &mut last, page, &tx, &token).await {
                    error!(error = %err, "event scan failed");
                    let _ = err_tx.send(err);
                    return;
                }
            }
        }
    }
}

async fn scan(
    conn: &SharedConn,
    last: &mut Ulid,
    page: usize,
    tx: &mpsc::Sender<Event>,
    token: &CancellationToken,
) -> Result<(), Error> {
    let from = last.to_bytes();
    let conn = Arc::clone(conn);
    let rows = tokio::task::spawn_blocking(move || -> Result<Vec<Event>, Error> {
        let conn = conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt =
            conn.prepare_cached("SELECT event FROM events WHERE id > ?1 ORDER BY id LIMIT ?2")?;
        let mut rows = stmt.query(params![from.as_slice(), page as i64])?;
        let mut events = Vec::new();
        while let Some(row) = rows.next()? {
            let encoded: String = row.get(0)?;
            events.push(serde_json::from_str(&encoded)?);
        }
        Ok(events)
    })
    .await
    .map_err(|err| Error::Task(err.to_string()))??;

    for event in rows {
        let advanced = event.id;
        tokio::select! {
            _ = token.cancelled() => return Ok(()),
            sent = tx.send(event) => {
                if sent.is_err() {
                    return Ok(());
                }
            }
        }
        *last = advanced;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ev_core::Payload;

    fn fast_opts() -> PollOptions {
        PollOptions {
            tick: Duration::from_millis(20),
            fetch_timeout: Duration::from_millis(100),
            prefetch: 10,
        }
    }

    fn repo(flush: &str) -> SqlRepository {
        SqlRepository::with_options(&format!(":memory:?duration={flush}"), fast_opts())
            .expect("open")
    }

    fn table_len(repo: &SqlRepository) -> i64 {
        let conn = repo.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))
            .expect("count")
    }

    #[tokio::test]
    async fn invalid_duration_is_rejected() {
        let err = SqlRepository::open(":memory:?duration=banana").unwrap_err();
        assert!(matches!(err, Error::InvalidDsn(_)));
    }

    #[tokio::test]
    async fn stores_coalesce_into_one_flush() {
        let repo = repo("50ms");
        for n in 0..5u8 {
            repo.store(Event::new("t", Payload::Bytes(vec![n])))
                .await
                .expect("store");
        }
        assert_eq!(table_len(&repo), 0, "writes are buffered, not immediate");

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(table_len(&repo), 5);
    }

    #[tokio::test]
    async fn close_flushes_the_remaining_buffer() {
        let repo = repo("1h");
        repo.store(Event::new("t", Payload::Bytes(vec![1])))
            .await
            .expect("store");
        assert_eq!(table_len(&repo), 0);

        repo.close().await.expect("close");
        assert_eq!(table_len(&repo), 1);
    }

    #[tokio::test]
    async fn flushed_events_reach_an_open_cursor_in_order() {
        let repo = repo("30ms");
        let mut expected = Vec::new();
        for n in 0..8u8 {
            let event = Event::new("t", Payload::Bytes(vec![n]));
            expected.push(event.id);
            repo.store(event).await.expect("store");
        }

        let mut cursor = repo
            .iterator(CancellationToken::new(), DateTime::UNIX_EPOCH)
            .await
            .expect("iterator");

        let mut seen = Vec::new();
        for _ in 0..50 {
            match cursor.fetch(3).await {
                Ok(events) => seen.extend(events.into_iter().map(|e| e.id)),
                Err(Error::Timeout) => {}
                Err(err) => panic!("unexpected error: {err}"),
            }
            if seen.len() >= expected.len() {
                break;
            }
        }
        assert_eq!(seen, expected);

        let err = cursor.fetch(1).await.unwrap_err();
        assert!(matches!(err, Error::Timeout));
    }

    #[tokio::test]
    async fn duplicate_id_is_last_write_wins() {
        let repo = repo("30ms");
        let first = Event::new("t", Payload::Bytes(vec![1]));
        let second = Event::with_id(first.id, "t", Payload::Bytes(vec![2]));
        repo.store(first.clone()).await.expect("store");
        repo.store(second).await.expect("store");

        tokio::time::sleep(Duration::from_millis(90)).await;
        assert_eq!(table_len(&repo), 1);

        let mut cursor = repo
            .iterator(CancellationToken::new(), DateTime::UNIX_EPOCH)
            .await
            .expect("iterator");
        let events = cursor.fetch(2).await.expect("fetch");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].payload, Payload::Bytes(vec![2]));
    }

    #[tokio::test]
    async fn since_floor_skips_older_events() {
        let repo = repo("20ms");
        let now = Utc::now();
        let old = Ulid::from_parts(
            (now - chrono::Duration::seconds(10)).timestamp_millis() as u64,
            Ulid::new().random(),
        );
        let recent = Ulid::from_parts(
            (now - chrono::Duration::seconds(5)).timestamp_millis() as u64,
            Ulid::new().random(),
        );
        for id in [old, recent] {
            repo.store(Event::with_id(id, "t", Payload::Bytes(vec![1])))
                .await
                .expect("store");
        }
        tokio::time::sleep(Duration::from_millis(60)).await;

        let mut cursor = repo
            .iterator(CancellationToken::new(), now - chrono::Duration::seconds(7))
            .await
            .expect("iterator");
        let events = cursor.fetch(10).await.expect("fetch");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, recent);
    }
}
