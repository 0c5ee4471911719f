//! Deprecated-pool admission rules gated on the cutover upgrade.
//!
//! Every decision is a pure function of the request, an explicit height, and
//! the immutable schedule. Operations are judged at the height they would be
//! mined at; address creation is judged at the current tip.

use std::sync::Arc;

use thiserror::Error;

use crate::{
    operation::{OperationKind, OperationRequest},
    types::{Height, PoolType},
    upgrade::{UpgradeId, UpgradeSchedule},
};

/// Reason recorded when value would enter the deprecated pool.
pub const DEPOSITS_DISABLED: &str = "destination pool deposits are permanently disabled";
/// Reason returned for deprecated-pool address requests after cutover.
pub const ADDRESS_AFTER_CUTOVER: &str = "address type is not allowed after cutover";

/// A policy rejection. `Display` renders the exact caller-facing reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PolicyDenied {
    /// Value may no longer enter the deprecated pool.
    #[error("destination pool deposits are permanently disabled")]
    DepositsDisabled,
    /// New deprecated-pool addresses are refused once cutover is active.
    #[error("address type is not allowed after cutover")]
    AddressAfterCutover,
}

impl PolicyDenied {
    /// Caller-facing reason string.
    pub fn reason(self) -> &'static str {
        match self {
            PolicyDenied::DepositsDisabled => DEPOSITS_DISABLED,
            PolicyDenied::AddressAfterCutover => ADDRESS_AFTER_CUTOVER,
        }
    }
}

/// Admission rules for operations touching the deprecated pool.
#[derive(Debug, Clone)]
pub struct ValidationPolicy {
    schedule: Arc<UpgradeSchedule>,
    cutover: UpgradeId,
    deprecated: PoolType,
}

impl ValidationPolicy {
    /// Policy deprecating Sprout at `cutover`.
    pub fn new(schedule: Arc<UpgradeSchedule>, cutover: UpgradeId) -> Self {
        Self {
            schedule,
            cutover,
            deprecated: PoolType::Sprout,
        }
    }

    /// Overrides the deprecated pool.
    pub fn with_deprecated_pool(mut self, pool: PoolType) -> Self {
        self.deprecated = pool;
        self
    }

    /// The schedule decisions are made against.
    pub fn schedule(&self) -> &UpgradeSchedule {
        &self.schedule
    }

    /// The cutover upgrade.
    pub fn cutover(&self) -> UpgradeId {
        self.cutover
    }

    /// The pool being phased out.
    pub fn deprecated_pool(&self) -> PoolType {
        self.deprecated
    }

    /// True when the cutover upgrade is active at `height`.
    pub fn cutover_active(&self, height: Height) -> bool {
        self.schedule.is_active(self.cutover, height)
    }

    /// Decides whether `request` may be mined at `inclusion_height`.
    pub fn evaluate(&self, request: &OperationRequest, inclusion_height: Height) -> Result<(), PolicyDenied> {
        if !request.pays_into(self.deprecated) {
            return Ok(());
        }

        // Value already inside the pool may keep moving within it.
        if request.spends_only(self.deprecated) {
            return Ok(());
        }

        match request.kind {
            OperationKind::ShieldCoinbase | OperationKind::SendMany => Err(PolicyDenied::DepositsDisabled),
            OperationKind::MergeToAddress => {
                if self.cutover_active(inclusion_height) {
                    Err(PolicyDenied::DepositsDisabled)
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Decides whether a new address in `pool` may be created at tip `height`.
    pub fn check_new_address(&self, pool: PoolType, height: Height) -> Result<(), PolicyDenied> {
        if pool == self.deprecated && self.cutover_active(height) {
            return Err(PolicyDenied::AddressAfterCutover);
        }
        Ok(())
    }
}
