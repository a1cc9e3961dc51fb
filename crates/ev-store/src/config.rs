//! Persistence configuration: which backend, and how to reach it.

use serde::{Deserialize, Serialize};

/// The `persistence` section of the service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Persistence {
    pub driver: Driver,
    /// Backend-specific: a directory for `sled`, a file path or `:memory:`
    /// for `sqlite` (optionally with `?duration=<flush interval>`), unused
    /// for `inmem`.
    #[serde(default)]
    pub dsn: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    InMem,
    Sled,
    Sqlite,
}

impl Driver {
    pub fn as_str(self) -> &'static str {
        match self {
            Driver::InMem => "inmem",
            Driver::Sled => "sled",
            Driver::Sqlite => "sqlite",
        }
    }
}

/// Split a DSN into its path part and query parameters.
pub(crate) fn split_dsn(dsn: &str) -> (&str, Vec<(String, String)>) {
    match dsn.split_once('?') {
        Some((path, query)) => (
            path,
            url::form_urlencoded::parse(query.as_bytes())
                .into_owned()
                .collect(),
        ),
        None => (dsn, Vec::new()),
    }
}
