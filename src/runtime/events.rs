//! Runtime event stream payloads.

use crate::{operation::OperationId, types::OpSeq};

/// Events emitted as operations move through their lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationEvent {
    /// A request was registered.
    Submitted {
        /// Operation id.
        id: OperationId,
    },
    /// A worker picked the operation up.
    Executing {
        /// Operation id.
        id: OperationId,
    },
    /// The transaction was built.
    Succeeded {
        /// Operation id.
        id: OperationId,
        /// Built transaction id.
        txid: String,
    },
    /// Policy or construction rejected the operation.
    Failed {
        /// Operation id.
        id: OperationId,
        /// Caller-matchable reason.
        reason: String,
    },
    /// Persistence has reached at least this journal sequence.
    DurableUpTo {
        /// Highest sequence known durable.
        seq: OpSeq,
    },
}
