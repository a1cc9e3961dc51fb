//! Event storage: the repository/cursor contracts, the backends that
//! implement them, and the service that multiplexes cursors for transports.
//!
//! Backends are interchangeable behind [`Repository`]; [`open`] builds one
//! from a `(driver, dsn)` pair. Cursors deliver events in strictly
//! increasing id order, starting after an exclusive `since` lower bound.

pub mod config;
pub mod service;

mod cursor;
mod error;
mod inmem;
mod kv;
mod sql;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ev_core::Event;
use tokio_util::sync::CancellationToken;

pub use cursor::PollOptions;
pub use error::Error;
pub use inmem::InMemRepository;
pub use kv::KvRepository;
pub use sql::SqlRepository;

use config::{Driver, Persistence};

/// Storage backend contract.
///
/// `iterator` opens a long-lived cursor bound to the given token: cancelling
/// it (directly or through a parent) drains the cursor. `close` releases
/// backend resources; open cursors are drained through token propagation.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn store(&self, event: Event) -> Result<(), Error>;

    async fn iterator(
        &self,
        token: CancellationToken,
        since: DateTime<Utc>,
    ) -> Result<Box<dyn Cursor>, Error>;

    async fn close(&self) -> Result<(), Error>;
}

/// A long-lived, pollable cursor over the event log.
///
/// `fetch` returns up to `batch` events and never blocks indefinitely: it
/// yields events, the backend's empty marker, or `Error::Timeout`. It is not
/// safe for concurrent callers on one cursor; the service serializes them.
#[async_trait]
pub trait Cursor: Send {
    /// Stable id, unique per open cursor.
    fn id(&self) -> &str;

    async fn fetch(&mut self, batch: usize) -> Result<Vec<Event>, Error>;

    /// Transition to draining with an optional cause; `None` is a clean
    /// close.
    fn close(&self, cause: Option<Error>);

    /// Token that resolves once the cursor is draining or closed.
    fn done(&self) -> CancellationToken;

    /// The close cause, if the cursor failed; `None` after a clean close.
    fn err(&self) -> Option<Arc<Error>>;
}

/// Build the repository selected by the configuration.
///
/// Must be called inside a tokio runtime: the sqlite backend spawns its
/// flush task on construction.
pub fn open(cfg: &Persistence) -> Result<Arc<dyn Repository>, Error> {
    match cfg.driver {
        Driver::InMem => Ok(Arc::new(InMemRepository::new())),
        Driver::Sled => Ok(Arc::new(KvRepository::open(&cfg.dsn)?)),
        Driver::Sqlite => Ok(Arc::new(SqlRepository::open(&cfg.dsn)?)),
    }
}
