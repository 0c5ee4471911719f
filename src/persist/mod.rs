/// SQLite journal sink.
pub mod sqlite;

use thiserror::Error;

use crate::{
    core::queue::{QueueError, QueueSnapshotV1},
    journal::StoredTransition,
    types::OpSeq,
};

/// Journal and snapshot storage failures.
#[derive(Debug, Error)]
pub enum PersistError {
    /// SQLite failure.
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Payload encoding failure.
    #[error("serde: {0}")]
    Serde(#[from] serde_json::Error),
    /// Anything else.
    #[error("{0}")]
    Message(String),
}

impl From<QueueError> for PersistError {
    fn from(value: QueueError) -> Self {
        Self::Message(format!("queue error: {value}"))
    }
}

/// Result alias for persistence calls.
pub type PersistResult<T> = Result<T, PersistError>;

/// Durable destination for queue transitions.
pub trait TransitionSink: Send {
    /// Appends a batch and returns the highest durable sequence.
    fn append_transitions(&mut self, transitions: &[StoredTransition]) -> PersistResult<OpSeq>;
    /// Forces buffered writes to disk.
    fn flush(&mut self) -> PersistResult<()> {
        Ok(())
    }
    /// Stores a snapshot covering everything through `last_seq`.
    fn write_snapshot(&mut self, _snapshot: &QueueSnapshotV1, _last_seq: OpSeq) -> PersistResult<()> {
        Ok(())
    }
    /// Drops journal rows at or below `seq`.
    fn compact_through(&mut self, _seq: OpSeq) -> PersistResult<usize> {
        Ok(0)
    }
}
