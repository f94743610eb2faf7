//! Wire message types for the Engram HTTP protocol.
//!
//! All bodies are JSON with snake_case keys. Timestamps travel as unix
//! milliseconds (see [`crate::changelog`]).

pub mod sync;

pub use sync::{
    DeltaResponse, EntryError, LoreUpsertRequest, LoreUpsertResponse, PushRequest, PushResponse,
    SyncStatusResponse,
};
