//! Core event model: time-sortable identifiers, the heterogeneous payload
//! codec, and the `(id, topic, payload)` event aggregate.
//!
//! Everything here is plain data, no I/O and no runtime. Storage backends and
//! the service layer live in `ev-store`.

pub mod id;

mod event;
mod payload;

pub use event::Event;
pub use payload::{Payload, PayloadError, BINARY_KEY};
