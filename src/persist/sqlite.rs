//! SQLite-backed append-only transition journal.
//!
//! Rows in `transitions` carry the operation id and transition kind next to
//! the versioned payload, so one operation's history can be read through the
//! `(op_id, seq)` index without decoding the whole journal.

use std::path::Path;

use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};

use crate::{
    core::queue::{OperationQueue, QueueSnapshotV1},
    journal::{StoredTransition, StoredTransitionEnvelope, TRANSITION_FORMAT_VERSION, Transition, now_ms},
    operation::OperationId,
    types::OpSeq,
};

use super::{PersistError, PersistResult, TransitionSink};

const SNAPSHOT_FORMAT_VERSION: u16 = 1;

const SELECT_TRANSITION: &str = "SELECT seq, ts_ms, payload FROM transitions";

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotEnvelope {
    format_version: u16,
    last_seq: OpSeq,
    snapshot: QueueSnapshotV1,
}

/// Journal row counts per transition kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JournalStats {
    /// `submitted` rows.
    pub submitted: u64,
    /// `executing` rows.
    pub executing: u64,
    /// `completed` rows.
    pub completed: u64,
}

/// SQLite implementation of [`crate::persist::TransitionSink`].
pub struct SqliteTransitionSink {
    conn: Connection,
}

impl SqliteTransitionSink {
    /// Opens or creates a journal at `path` in WAL mode.
    pub fn open(path: impl AsRef<Path>) -> PersistResult<Self> {
        Self::init_connection(Connection::open(path)?)
    }

    /// Opens an in-memory journal.
    pub fn open_in_memory() -> PersistResult<Self> {
        Self::init_connection(Connection::open_in_memory()?)
    }

    fn init_connection(conn: Connection) -> PersistResult<Self> {
        conn.execute_batch(include_str!("schema.sql"))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Ok(Self { conn })
    }

    /// Rebuilds the queue from the latest snapshot plus later transitions.
    ///
    /// Rows at or below the snapshot's sequence are ignored even when
    /// compaction has not removed them yet.
    pub fn load_queue(&self) -> PersistResult<OperationQueue> {
        let (queue, covered) = match self.latest_snapshot()? {
            Some(env) => (OperationQueue::from_snapshot(env.snapshot)?, env.last_seq),
            None => (OperationQueue::new(), 0),
        };

        let tail = self.load_transitions_after(covered)?;
        tracing::debug!(covered, replayed = tail.len(), "replaying journal");
        for stored in tail {
            queue.apply_replayed(stored)?;
        }
        Ok(queue)
    }

    /// Transitions strictly after `seq`, in sequence order.
    pub fn load_transitions_after(&self, seq: OpSeq) -> PersistResult<Vec<StoredTransition>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{SELECT_TRANSITION} WHERE seq > ?1 ORDER BY seq"))?;
        let rows = stmt.query_map(params![seq as i64], read_transition)?;
        rows.collect::<Result<_, _>>().map_err(PersistError::from)
    }

    /// Every journaled transition of one operation, oldest first.
    pub fn operation_history(&self, id: OperationId) -> PersistResult<Vec<StoredTransition>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{SELECT_TRANSITION} WHERE op_id = ?1 ORDER BY seq"))?;
        let rows = stmt.query_map(params![id.to_string()], read_transition)?;
        rows.collect::<Result<_, _>>().map_err(PersistError::from)
    }

    /// Row counts per transition kind.
    pub fn stats(&self) -> PersistResult<JournalStats> {
        let mut stmt = self
            .conn
            .prepare("SELECT kind, COUNT(*) FROM transitions GROUP BY kind")?;
        let mut rows = stmt.query([])?;
        let mut stats = JournalStats::default();
        while let Some(row) = rows.next()? {
            let kind: String = row.get(0)?;
            let count = row.get::<_, i64>(1)? as u64;
            match kind.as_str() {
                "submitted" => stats.submitted = count,
                "executing" => stats.executing = count,
                "completed" => stats.completed = count,
                other => return Err(PersistError::Message(format!("unknown transition kind {other:?}"))),
            }
        }
        Ok(stats)
    }

    /// Stores `snapshot` as covering every sequence through `last_seq`.
    pub fn write_snapshot(&mut self, snapshot: &QueueSnapshotV1, last_seq: OpSeq) -> PersistResult<()> {
        let payload = serde_json::to_vec(&SnapshotEnvelope {
            format_version: SNAPSHOT_FORMAT_VERSION,
            last_seq,
            snapshot: snapshot.clone(),
        })?;
        self.conn.execute(
            "INSERT INTO snapshots(last_seq, ts_ms, payload) VALUES (?1, ?2, ?3)",
            params![last_seq as i64, now_ms() as i64, payload],
        )?;
        Ok(())
    }

    /// Deletes transitions up to and including `seq`, and every snapshot
    /// but the newest.
    pub fn compact_through(&mut self, seq: OpSeq) -> PersistResult<usize> {
        let tx = self.conn.transaction()?;
        let removed = tx.execute("DELETE FROM transitions WHERE seq <= ?1", params![seq as i64])?;
        tx.execute(
            "DELETE FROM snapshots WHERE id < (SELECT MAX(id) FROM snapshots)",
            [],
        )?;
        tx.commit()?;
        Ok(removed)
    }

    /// Highest sequence stored in the journal, 0 when empty.
    pub fn latest_seq(&self) -> PersistResult<OpSeq> {
        let seq: Option<i64> = self
            .conn
            .query_row("SELECT MAX(seq) FROM transitions", [], |row| row.get(0))?;
        Ok(seq.unwrap_or(0) as OpSeq)
    }

    fn latest_snapshot(&self) -> PersistResult<Option<SnapshotEnvelope>> {
        let payload: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT payload FROM snapshots ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        let Some(payload) = payload else {
            return Ok(None);
        };

        let env: SnapshotEnvelope = serde_json::from_slice(&payload)?;
        if env.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(PersistError::Message(format!(
                "unsupported snapshot format version: {}",
                env.format_version
            )));
        }
        Ok(Some(env))
    }
}

impl TransitionSink for SqliteTransitionSink {
    fn append_transitions(&mut self, transitions: &[StoredTransition]) -> PersistResult<OpSeq> {
        let tx = self.conn.transaction()?;
        {
            let mut insert = tx.prepare_cached(
                "INSERT INTO transitions(seq, ts_ms, kind, op_id, payload) VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for stored in transitions {
                let payload = serde_json::to_vec(&StoredTransitionEnvelope::new(stored.clone()))?;
                insert.execute(params![
                    stored.seq as i64,
                    stored.ts_ms as i64,
                    kind_label(&stored.transition),
                    stored.transition.operation_id().to_string(),
                    payload,
                ])?;
            }
        }
        tx.commit()?;

        match transitions.iter().map(|t| t.seq).max() {
            Some(seq) => Ok(seq),
            None => self.latest_seq(),
        }
    }

    fn flush(&mut self) -> PersistResult<()> {
        self.conn.execute_batch("PRAGMA wal_checkpoint(PASSIVE);")?;
        Ok(())
    }

    fn write_snapshot(&mut self, snapshot: &QueueSnapshotV1, last_seq: OpSeq) -> PersistResult<()> {
        SqliteTransitionSink::write_snapshot(self, snapshot, last_seq)
    }

    fn compact_through(&mut self, seq: OpSeq) -> PersistResult<usize> {
        SqliteTransitionSink::compact_through(self, seq)
    }
}

fn kind_label(transition: &Transition) -> &'static str {
    match transition {
        Transition::Submitted { .. } => "submitted",
        Transition::Executing { .. } => "executing",
        Transition::Completed { .. } => "completed",
    }
}

fn read_transition(row: &Row<'_>) -> rusqlite::Result<StoredTransition> {
    let seq: i64 = row.get(0)?;
    let ts_ms: i64 = row.get(1)?;
    let payload: Vec<u8> = row.get(2)?;

    let env: StoredTransitionEnvelope = serde_json::from_slice(&payload).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Blob, Box::new(err))
    })?;
    if env.format_version != TRANSITION_FORMAT_VERSION {
        let msg = format!("unsupported transition format version: {}", env.format_version);
        return Err(rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Blob,
            Box::new(std::io::Error::other(msg)),
        ));
    }

    let mut stored = env.stored;
    stored.seq = seq as OpSeq;
    stored.ts_ms = ts_ms as u64;
    Ok(stored)
}
