//! Cursor plumbing shared by the polling backends.
//!
//! A polling repository spawns one pump task per cursor. The pump scans the
//! backend on a ticker and pushes decoded events into a bounded prefetch
//! channel; the cursor drains that channel with a per-fetch deadline. A
//! watcher task routes pump failures into the cursor's close cause.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ev_core::Event;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::{Cursor, Error};

/// Timing knobs for the polling backends.
#[derive(Debug, Clone)]
pub struct PollOptions {
    /// Pump scan period.
    pub tick: Duration,
    /// Per-fetch deadline before `Error::Timeout`.
    pub fetch_timeout: Duration,
    /// Prefetch batch size; the channel holds twice this many events.
    pub prefetch: usize,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(500),
            fetch_timeout: Duration::from_millis(200),
            prefetch: 10,
        }
    }
}

/// Close state shared between a cursor, its pump watcher, and whoever holds
/// the cursor's done-token.
pub(crate) struct Lifecycle {
    token: CancellationToken,
    cause: Mutex<Option<Arc<Error>>>,
}

impl Lifecycle {
    /// New lifecycle bound to a child of the given token, so cancelling the
    /// parent drains this cursor while closing this cursor leaves siblings
    /// alone.
    pub fn new(parent: &CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            token: parent.child_token(),
            cause: Mutex::new(None),
        })
    }

    /// Record the close cause (first writer wins) and cancel the token.
    pub fn close(&self, cause: Option<Error>) {
        if let Some(cause) = cause {
            let mut slot = self.cause.lock().unwrap_or_else(|e| e.into_inner());
            if slot.is_none() {
                *slot = Some(Arc::new(cause));
            }
        }
        self.token.cancel();
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn cause(&self) -> Option<Arc<Error>> {
        self.cause
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// Pump-fed cursor: owns no buffer of its own, draining the prefetch
/// channel until the batch fills or the deadline fires.
pub(crate) struct PollCursor {
    id: String,
    timeout: Duration,
    rx: mpsc::Receiver<Event>,
    lifecycle: Arc<Lifecycle>,
}

impl PollCursor {
    pub fn new(
        id: String,
        timeout: Duration,
        rx: mpsc::Receiver<Event>,
        lifecycle: Arc<Lifecycle>,
    ) -> Self {
        Self {
            id,
            timeout,
            rx,
            lifecycle,
        }
    }

    /// Route a pump failure into the cursor's close cause. Exits quietly on
    /// cancellation or when the pump finishes without an error.
    pub fn spawn_watcher(lifecycle: Arc<Lifecycle>, err_rx: oneshot::Receiver<Error>) {
        let token = lifecycle.token();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                received = err_rx => {
                    if let Ok(cause) = received {
                        lifecycle.close(Some(cause));
                    }
                }
            }
        });
    }
}

#[async_trait]
impl Cursor for PollCursor {
    fn id(&self) -> &str {
        &self.id
    }

    async fn fetch(&mut self, batch: usize) -> Result<Vec<Event>, Error> {
        let mut events = Vec::new();
        if batch == 0 {
            return Ok(events);
        }
        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                received = self.rx.recv() => match received {
                    Some(event) => {
                        events.push(event);
                        if events.len() >= batch {
                            return Ok(events);
                        }
                    }
                    // Pump gone: the cursor is draining or closed. Hand out
                    // what is buffered, then turn terminal.
                    None => {
                        if events.is_empty() {
                            return Err(Error::Closed);
                        }
                        return Ok(events);
                    }
                },
                _ = &mut deadline => {
                    if events.is_empty() {
                        return Err(Error::Timeout);
                    }
                    return Ok(events);
                }
            }
        }
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

#[cfg(test)]
mod tests {
    use super::*;
    use ev_core::Payload;
    use std::time::Instant;

    fn cursor_pair(timeout: Duration) -> (PollCursor, mpsc::Sender<Event>) {
        let (tx, rx) = mpsc::channel(8);
        let lifecycle = Lifecycle::new(&CancellationToken::new());
        (
            PollCursor::new("test-cursor".to_owned(), timeout, rx, lifecycle),
            tx,
        )
    }

    #[tokio::test]
    async fn fetch_returns_once_the_batch_fills() {
        let (mut cursor, tx) = cursor_pair(Duration::from_secs(5));
        for n in 0..3 {
            tx.send(Event::new("t", Payload::Bytes(vec![n])))
                .await
                .expect("send");
        }

        let events = cursor.fetch(3).await.expect("fetch");
        assert_eq!(events.len(), 3);
    }

    #[tokio::test]
    async fn fetch_returns_partial_batch_at_the_deadline() {
        let (mut cursor, tx) = cursor_pair(Duration::from_millis(50));
        tx.send(Event::new("t", Payload::Bytes(vec![1])))
            .await
            .expect("send");

        let events = cursor.fetch(10).await.expect("fetch");
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn fetch_times_out_on_an_empty_channel() {
        let (mut cursor, _tx) = cursor_pair(Duration::from_millis(50));

        let started = Instant::now();
        let err = cursor.fetch(1).await.unwrap_err();
        assert!(matches!(err, Error::Timeout));
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn fetch_is_terminal_after_the_pump_is_gone() {
        let (mut cursor, tx) = cursor_pair(Duration::from_millis(50));
        drop(tx);

        let err = cursor.fetch(1).await.unwrap_err();
        assert!(matches!(err, Error::Closed));
    }

    #[tokio::test]
    async fn watcher_records_the_pump_cause() {
        let lifecycle = Lifecycle::new(&CancellationToken::new());
        let (err_tx, err_rx) = oneshot::channel();
        PollCursor::spawn_watcher(Arc::clone(&lifecycle), err_rx);

        err_tx.send(Error::Timeout).expect("send cause");
        lifecycle.token().cancelled().await;

        let cause = lifecycle.cause().expect("cause recorded");
        assert!(matches!(*cause, Error::Timeout));
    }

    #[test]
    fn close_keeps_the_first_cause() {
        let lifecycle = Lifecycle::new(&CancellationToken::new());
        lifecycle.close(Some(Error::Timeout));
        lifecycle.close(Some(Error::Empty));

        assert!(lifecycle.is_closed());
        assert!(matches!(*lifecycle.cause().expect("cause"), Error::Timeout));
    }
}
