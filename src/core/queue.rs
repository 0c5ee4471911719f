use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    journal::{StoredTransition, Transition, now_ms},
    operation::{OperationId, OperationRecord, OperationRequest, OperationState, Outcome},
    types::{Height, OpSeq},
};

/// Queue errors. `InvalidTransition` means a caller broke the lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// No record with this id.
    #[error("operation {0} not found")]
    NotFound(OperationId),
    /// A record with this id is already registered.
    #[error("operation {0} already registered")]
    AlreadyExists(OperationId),
    /// The record is not in the state the transition starts from.
    #[error("operation {id} cannot move from {from} to {to}")]
    InvalidTransition {
        /// Operation id.
        id: OperationId,
        /// Current state label.
        from: &'static str,
        /// Requested state label.
        to: &'static str,
    },
}

/// Serializable queue image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSnapshotV1 {
    /// Next journal sequence to hand out.
    pub next_seq: OpSeq,
    /// Records in submission order.
    pub records: Vec<OperationRecord>,
}

type Slot = Arc<RwLock<OperationRecord>>;

/// Registry of every operation submitted during the process lifetime.
///
/// Mutations are serialized through the journal lock so that journal
/// sequence order equals application order. Reads take only the map lock and
/// the record's own read lock, so polling never waits on an unrelated worker.
#[derive(Debug)]
pub struct OperationQueue {
    records: RwLock<HashMap<OperationId, Slot>>,
    order: RwLock<Vec<OperationId>>,
    next_seq: Mutex<OpSeq>,
}

impl Default for OperationQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationQueue {
    /// Empty queue.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            order: RwLock::new(Vec::new()),
            next_seq: Mutex::new(1),
        }
    }

    /// Rebuilds a queue from a snapshot.
    pub fn from_snapshot(snapshot: QueueSnapshotV1) -> Result<Self, QueueError> {
        let queue = Self::new();
        *queue.next_seq.lock() = snapshot.next_seq.max(1);
        for record in snapshot.records {
            queue.insert_record(record)?;
        }
        Ok(queue)
    }

    /// Consistent image of the queue; blocks mutations while it is taken.
    pub fn export_snapshot(&self) -> QueueSnapshotV1 {
        let next_seq = self.next_seq.lock();
        let order = self.order.read().clone();
        let records = {
            let map = self.records.read();
            order
                .iter()
                .filter_map(|id| map.get(id).map(|slot| slot.read().clone()))
                .collect()
        };
        QueueSnapshotV1 {
            next_seq: *next_seq,
            records,
        }
    }

    /// Registers `request` as `Pending` under a fresh id.
    pub fn submit(&self, request: OperationRequest, created_at: Height) -> (OperationId, StoredTransition) {
        let mut next_seq = self.next_seq.lock();

        let mut id = OperationId::new();
        while self.records.read().contains_key(&id) {
            id = OperationId::new();
        }

        let record = OperationRecord {
            id,
            request,
            state: OperationState::Pending,
            created_at,
            inclusion_height: None,
            completed_at: None,
        };
        self.records
            .write()
            .insert(id, Arc::new(RwLock::new(record.clone())));
        self.order.write().push(id);

        let stored = Self::stamp(&mut next_seq, Transition::Submitted { record });
        (id, stored)
    }

    /// `Pending` to `Executing`, fixing the inclusion height.
    pub fn mark_executing(&self, id: OperationId, inclusion_height: Height) -> Result<StoredTransition, QueueError> {
        let mut next_seq = self.next_seq.lock();
        self.apply_executing(id, inclusion_height)?;
        Ok(Self::stamp(
            &mut next_seq,
            Transition::Executing { id, inclusion_height },
        ))
    }

    /// `Executing` to `Succeeded` or `Failed`.
    pub fn complete(&self, id: OperationId, outcome: Outcome, height: Height) -> Result<StoredTransition, QueueError> {
        let mut next_seq = self.next_seq.lock();
        self.apply_completed(id, outcome.clone(), height)?;
        Ok(Self::stamp(
            &mut next_seq,
            Transition::Completed { id, outcome, height },
        ))
    }

    /// Re-applies a journaled transition, keeping its sequence number.
    pub fn apply_replayed(&self, stored: StoredTransition) -> Result<(), QueueError> {
        let mut next_seq = self.next_seq.lock();
        match stored.transition {
            Transition::Submitted { record } => {
                self.insert_record(record)?;
            }
            Transition::Executing { id, inclusion_height } => {
                self.apply_executing(id, inclusion_height)?;
            }
            Transition::Completed { id, outcome, height } => {
                self.apply_completed(id, outcome, height)?;
            }
        }
        *next_seq = (*next_seq).max(stored.seq.saturating_add(1));
        Ok(())
    }

    /// Copy of the record for `id`.
    pub fn get(&self, id: OperationId) -> Result<OperationRecord, QueueError> {
        Ok(self.slot(id)?.read().clone())
    }

    /// Current state of `id`.
    pub fn state(&self, id: OperationId) -> Result<OperationState, QueueError> {
        Ok(self.slot(id)?.read().state.clone())
    }

    /// Ids in submission order, optionally only those whose status label
    /// (`queued`, `executing`, `success`, `failed`) equals `status`.
    pub fn list(&self, status: Option<&str>) -> Vec<OperationId> {
        let order = self.order.read().clone();
        let map = self.records.read();
        order
            .into_iter()
            .filter(|id| match (status, map.get(id)) {
                (None, Some(_)) => true,
                (Some(label), Some(slot)) => slot.read().state.label() == label,
                (_, None) => false,
            })
            .collect()
    }

    /// Records still `Pending` or `Executing`, in submission order.
    pub fn unfinished(&self) -> Vec<OperationRecord> {
        let order = self.order.read().clone();
        let map = self.records.read();
        order
            .iter()
            .filter_map(|id| map.get(id))
            .map(|slot| slot.read().clone())
            .filter(|rec| !rec.state.is_terminal())
            .collect()
    }

    /// Number of registered operations.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// True when nothing was ever submitted.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Highest journal sequence handed out so far.
    pub fn latest_seq(&self) -> OpSeq {
        self.next_seq.lock().saturating_sub(1)
    }

    fn slot(&self, id: OperationId) -> Result<Slot, QueueError> {
        self.records
            .read()
            .get(&id)
            .cloned()
            .ok_or(QueueError::NotFound(id))
    }

    fn insert_record(&self, record: OperationRecord) -> Result<(), QueueError> {
        let id = record.id;
        {
            let mut map = self.records.write();
            if map.contains_key(&id) {
                return Err(QueueError::AlreadyExists(id));
            }
            map.insert(id, Arc::new(RwLock::new(record)));
        }
        self.order.write().push(id);
        Ok(())
    }

    fn apply_executing(&self, id: OperationId, inclusion_height: Height) -> Result<(), QueueError> {
        let slot = self.slot(id)?;
        let mut rec = slot.write();
        if rec.state != OperationState::Pending {
            return Err(QueueError::InvalidTransition {
                id,
                from: rec.state.label(),
                to: "executing",
            });
        }
        rec.state = OperationState::Executing;
        rec.inclusion_height = Some(inclusion_height);
        Ok(())
    }

    fn apply_completed(&self, id: OperationId, outcome: Outcome, height: Height) -> Result<(), QueueError> {
        let slot = self.slot(id)?;
        let mut rec = slot.write();
        if rec.state != OperationState::Executing {
            let state: OperationState = outcome.into();
            return Err(QueueError::InvalidTransition {
                id,
                from: rec.state.label(),
                to: state.label(),
            });
        }
        rec.state = outcome.into();
        rec.completed_at = Some(height);
        Ok(())
    }

    fn stamp(next_seq: &mut OpSeq, transition: Transition) -> StoredTransition {
        let seq = *next_seq;
        *next_seq += 1;
        StoredTransition {
            seq,
            ts_ms: now_ms(),
            transition,
        }
    }
}
