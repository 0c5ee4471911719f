//! Operation requests, identifiers, lifecycle states, and records.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::types::{Amount, Height, MAX_MONEY, PoolType};

/// Opaque caller-visible operation handle, rendered `opid-<uuid>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(Uuid);

impl OperationId {
    /// Fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parses the `opid-<uuid>` form.
    pub fn parse(s: &str) -> Option<Self> {
        let raw = s.strip_prefix("opid-")?;
        Uuid::parse_str(raw).ok().map(Self)
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "opid-{}", self.0.hyphenated())
    }
}

/// Kind of shielded operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    /// Sweep transparent coinbase outputs into one address.
    ShieldCoinbase,
    /// Pay one or more recipients from a single source.
    SendMany,
    /// Consolidate UTXOs and notes from several sources into one address.
    MergeToAddress,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OperationKind::ShieldCoinbase => "z_shieldcoinbase",
            OperationKind::SendMany => "z_sendmany",
            OperationKind::MergeToAddress => "z_mergetoaddress",
        })
    }
}

/// Output endpoint. `amount` is `None` for sweeping kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    /// Pool of the recipient address.
    pub pool: PoolType,
    /// Value to send.
    pub amount: Option<Amount>,
}

impl Recipient {
    /// Recipient that receives everything swept from the sources.
    pub fn sweep(pool: PoolType) -> Self {
        Self { pool, amount: None }
    }

    /// Recipient of a fixed amount.
    pub fn pay(pool: PoolType, amount: Amount) -> Self {
        Self {
            pool,
            amount: Some(amount),
        }
    }
}

/// Structural defects detected synchronously at submission.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    /// No source pools given.
    #[error("at least one source is required")]
    NoSources,
    /// No recipients given.
    #[error("at least one recipient is required")]
    NoRecipients,
    /// Shield-coinbase can only spend transparent coinbase.
    #[error("coinbase can only be shielded from the transparent pool")]
    CoinbaseNotTransparent,
    /// Sweeping kinds take exactly one destination.
    #[error("{0} takes exactly one destination")]
    SingleDestination(OperationKind),
    /// Sweeping kinds derive the amount from the sources.
    #[error("{0} does not accept explicit amounts")]
    UnexpectedAmount(OperationKind),
    /// Send-many spends from exactly one source.
    #[error("z_sendmany takes exactly one source")]
    SingleSource,
    /// Send-many outputs need a positive amount.
    #[error("z_sendmany recipients need a positive amount")]
    MissingAmount,
    /// An output or the output total exceeds the money supply.
    #[error("Amount out of range")]
    AmountOutOfRange,
}

/// Immutable request submitted by a caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRequest {
    /// What to build.
    pub kind: OperationKind,
    /// Pools value is taken from.
    pub sources: Vec<PoolType>,
    /// Outputs to create.
    pub recipients: Vec<Recipient>,
    /// Chain tip when the caller submitted.
    pub submitted_at: Height,
}

impl OperationRequest {
    /// Shield transparent coinbase into `to`.
    pub fn shield_coinbase(to: PoolType, submitted_at: Height) -> Self {
        Self {
            kind: OperationKind::ShieldCoinbase,
            sources: vec![PoolType::Transparent],
            recipients: vec![Recipient::sweep(to)],
            submitted_at,
        }
    }

    /// Pay `recipients` from `from`.
    pub fn send_many(from: PoolType, recipients: Vec<Recipient>, submitted_at: Height) -> Self {
        Self {
            kind: OperationKind::SendMany,
            sources: vec![from],
            recipients,
            submitted_at,
        }
    }

    /// Merge everything in `from` into `to`.
    pub fn merge_to_address(from: Vec<PoolType>, to: PoolType, submitted_at: Height) -> Self {
        Self {
            kind: OperationKind::MergeToAddress,
            sources: from,
            recipients: vec![Recipient::sweep(to)],
            submitted_at,
        }
    }

    /// Structural admissibility; says nothing about consensus rules.
    pub fn validate(&self) -> Result<(), RequestError> {
        if self.sources.is_empty() {
            return Err(RequestError::NoSources);
        }
        if self.recipients.is_empty() {
            return Err(RequestError::NoRecipients);
        }

        match self.kind {
            OperationKind::ShieldCoinbase | OperationKind::MergeToAddress => {
                if self.kind == OperationKind::ShieldCoinbase
                    && self.sources.iter().any(|p| *p != PoolType::Transparent)
                {
                    return Err(RequestError::CoinbaseNotTransparent);
                }
                if self.recipients.len() != 1 {
                    return Err(RequestError::SingleDestination(self.kind));
                }
                if self.recipients.iter().any(|r| r.amount.is_some()) {
                    return Err(RequestError::UnexpectedAmount(self.kind));
                }
            }
            OperationKind::SendMany => {
                if self.sources.len() != 1 {
                    return Err(RequestError::SingleSource);
                }
                if self.recipients.iter().any(|r| !matches!(r.amount, Some(a) if a > 0)) {
                    return Err(RequestError::MissingAmount);
                }
                let total = self
                    .recipients
                    .iter()
                    .try_fold(0, |acc: Amount, r| acc.checked_add(r.amount.unwrap_or(0)));
                if !matches!(total, Some(t) if t <= MAX_MONEY) {
                    return Err(RequestError::AmountOutOfRange);
                }
            }
        }
        Ok(())
    }

    /// True when some recipient is in `pool`.
    pub fn pays_into(&self, pool: PoolType) -> bool {
        self.recipients.iter().any(|r| r.pool == pool)
    }

    /// True when every source is `pool`.
    pub fn spends_only(&self, pool: PoolType) -> bool {
        !self.sources.is_empty() && self.sources.iter().all(|p| *p == pool)
    }
}

/// Lifecycle state. Terminal states never change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum OperationState {
    /// Registered, not yet picked up.
    Pending,
    /// A worker owns it.
    Executing,
    /// Transaction built.
    Succeeded {
        /// Built transaction id.
        txid: String,
    },
    /// Rejected by policy or construction.
    Failed {
        /// Caller-matchable reason.
        reason: String,
    },
}

impl OperationState {
    /// True for `Succeeded` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OperationState::Succeeded { .. } | OperationState::Failed { .. })
    }

    /// Status word reported to pollers.
    pub fn label(&self) -> &'static str {
        match self {
            OperationState::Pending => "queued",
            OperationState::Executing => "executing",
            OperationState::Succeeded { .. } => "success",
            OperationState::Failed { .. } => "failed",
        }
    }

    /// Failure reason, if failed.
    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            OperationState::Failed { reason } => Some(reason),
            _ => None,
        }
    }
}

/// Terminal result written by the executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    /// Built with this txid.
    Succeeded(String),
    /// Failed with this reason.
    Failed(String),
}

impl From<Outcome> for OperationState {
    fn from(value: Outcome) -> Self {
        match value {
            Outcome::Succeeded(txid) => OperationState::Succeeded { txid },
            Outcome::Failed(reason) => OperationState::Failed { reason },
        }
    }
}

/// Authoritative record owned by [`crate::core::queue::OperationQueue`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRecord {
    /// Handle returned to the caller.
    pub id: OperationId,
    /// Submitted request.
    pub request: OperationRequest,
    /// Current state.
    pub state: OperationState,
    /// Tip height at registration.
    pub created_at: Height,
    /// Height the policy decision was made for.
    pub inclusion_height: Option<Height>,
    /// Tip height when a terminal state was recorded.
    pub completed_at: Option<Height>,
}
