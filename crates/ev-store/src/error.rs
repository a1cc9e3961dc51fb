use ev_core::PayloadError;

/// Error taxonomy for the store and service layers.
///
/// `Timeout` is the only recoverable variant: a fetch deadline fired on an
/// empty buffer and the caller should simply poll again. `Empty` is the
/// pull-model backends' exhaustion marker. Everything else terminates the
/// operation it came from.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Fetch deadline hit with an empty buffer; poll again.
    #[error("timeout")]
    Timeout,

    /// No event beyond the cursor position (pull-model backends).
    #[error("event empty")]
    Empty,

    /// Store called with a zero-length payload.
    #[error("empty payload")]
    EmptyPayload,

    /// The referenced cursor was closed or never opened.
    #[error("iterator not found")]
    IteratorNotFound,

    /// Fetch on a closed cursor; the cause is available via `Cursor::err`.
    #[error("iterator closed")]
    Closed,

    /// The service has not been brought up, or was already shut down.
    #[error("service is not up")]
    Unavailable,

    #[error("invalid dsn: {0}")]
    InvalidDsn(String),

    /// A blocking storage task died before reporting a result.
    #[error("storage task failed: {0}")]
    Task(String),

    #[error(transparent)]
    Payload(#[from] PayloadError),

    #[error(transparent)]
    Codec(#[from] serde_json::Error),

    #[error(transparent)]
    Kv(#[from] sled::Error),

    #[error(transparent)]
    Sql(#[from] rusqlite::Error),
}
