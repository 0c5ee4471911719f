//! Journaled state transitions and their on-disk envelopes.

use std::{
    collections::BTreeSet,
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

use crate::{
    operation::{OperationId, OperationRecord, Outcome},
    types::{Height, OpSeq},
};

/// Version number for serialized [`StoredTransitionEnvelope`] payloads.
pub const TRANSITION_FORMAT_VERSION: u16 = 1;

/// One state change applied to the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transition {
    /// A new record entered in `Pending`.
    Submitted {
        /// Registered record.
        record: OperationRecord,
    },
    /// `Pending` to `Executing`.
    Executing {
        /// Operation id.
        id: OperationId,
        /// Height the decision is made for.
        inclusion_height: Height,
    },
    /// `Executing` to a terminal state.
    Completed {
        /// Operation id.
        id: OperationId,
        /// Terminal result.
        outcome: Outcome,
        /// Tip height at completion.
        height: Height,
    },
}

impl Transition {
    /// Operation the transition belongs to.
    pub fn operation_id(&self) -> OperationId {
        match self {
            Transition::Submitted { record } => record.id,
            Transition::Executing { id, .. } | Transition::Completed { id, .. } => *id,
        }
    }
}

/// Journal row metadata plus transition payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredTransition {
    /// Monotonic journal sequence.
    pub seq: OpSeq,
    /// Wall-clock time in milliseconds.
    pub ts_ms: u64,
    /// Transition body.
    pub transition: Transition,
}

/// Versioned wrapper for stable on-disk payload decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredTransitionEnvelope {
    /// Payload format version.
    pub format_version: u16,
    /// Wrapped transition.
    pub stored: StoredTransition,
}

impl StoredTransitionEnvelope {
    /// Constructs an envelope using [`TRANSITION_FORMAT_VERSION`].
    pub fn new(stored: StoredTransition) -> Self {
        Self {
            format_version: TRANSITION_FORMAT_VERSION,
            stored,
        }
    }
}

/// Highest sequence below which every transition is known durable.
///
/// Transitions reach persistence in the order their senders win the channel,
/// not in sequence order, so a batch may land with gaps below it. The
/// watermark only moves across a contiguous run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DurableWatermark {
    through: OpSeq,
    ahead: BTreeSet<OpSeq>,
}

impl DurableWatermark {
    /// Watermark with everything through `seq` already durable.
    pub fn new(seq: OpSeq) -> Self {
        Self {
            through: seq,
            ahead: BTreeSet::new(),
        }
    }

    /// Every sequence at or below this is durable.
    pub fn through(&self) -> OpSeq {
        self.through
    }

    /// Records `seqs` as durable and returns the new watermark.
    pub fn mark(&mut self, seqs: impl IntoIterator<Item = OpSeq>) -> OpSeq {
        let through = self.through;
        self.ahead.extend(seqs.into_iter().filter(|seq| *seq > through));
        self.advance()
    }

    /// Everything through `seq` is durable by other means, e.g. a snapshot.
    pub fn cover_through(&mut self, seq: OpSeq) -> OpSeq {
        if seq > self.through {
            self.through = seq;
            self.ahead = self.ahead.split_off(&seq.saturating_add(1));
        }
        self.advance()
    }

    fn advance(&mut self) -> OpSeq {
        while self.ahead.remove(&(self.through + 1)) {
            self.through += 1;
        }
        self.through
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
