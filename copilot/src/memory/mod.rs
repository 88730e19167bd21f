//! Memory Store
//!
//! Durable facts, decisions and turn summaries scoped by session. Personas
//! read from it through the orchestrator; the session manager writes a
//! summary per turn.

pub mod store;

pub use store::{
    InMemoryMemoryStore, MemoryQuery, MemoryRecord, MemoryRecordKind, MemorySnapshot,
    MemoryStore, SharedMemoryStore,
};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    /// Backend unreachable or overloaded.
    #[error("memory store unavailable: {0}")]
    Unavailable(String),
    /// The record cannot be stored as given.
    #[error("invalid memory record: {0}")]
    InvalidRecord(String),
}

impl MemoryError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}
