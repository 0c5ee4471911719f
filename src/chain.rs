//! Read model over the chain tip and upgrade activation.

use std::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};

use crate::{
    types::Height,
    upgrade::{UpgradeId, UpgradeSchedule, UpgradeStatus},
};

/// Read-only view of the tip used by the executor and policy callers.
pub trait ChainView: Send + Sync {
    /// Current tip height.
    fn current_height(&self) -> Height;

    /// Schedule the chain was configured with.
    fn schedule(&self) -> &UpgradeSchedule;

    /// Earliest height a new transaction can be mined at.
    fn next_height(&self) -> Height {
        self.current_height().saturating_add(1)
    }

    /// Status of `upgrade` at the tip.
    fn upgrade_status(&self, upgrade: UpgradeId) -> UpgradeStatus {
        self.schedule().status(upgrade, self.current_height())
    }

    /// Every upgrade with its branch id and status at the tip.
    fn upgrades(&self) -> Vec<UpgradeInfo> {
        let height = self.current_height();
        UpgradeId::ALL
            .into_iter()
            .map(|upgrade| UpgradeInfo {
                upgrade,
                branch_id: upgrade.branch_id(),
                activation_height: self.schedule().activation_height(upgrade),
                status: self.schedule().status(upgrade, height),
            })
            .collect()
    }
}

/// One row of [`ChainView::upgrades`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpgradeInfo {
    /// Upgrade.
    pub upgrade: UpgradeId,
    /// Consensus branch id.
    pub branch_id: u32,
    /// Configured activation height.
    pub activation_height: Option<Height>,
    /// Status at the tip.
    pub status: UpgradeStatus,
}

/// Atomic tip height advanced by the consensus side.
#[derive(Debug)]
pub struct ChainTip {
    height: AtomicU32,
    schedule: Arc<UpgradeSchedule>,
}

impl ChainTip {
    /// Tip at `height` under `schedule`.
    pub fn new(schedule: Arc<UpgradeSchedule>, height: Height) -> Self {
        Self {
            height: AtomicU32::new(height),
            schedule,
        }
    }

    /// Connects `blocks` new blocks and returns the new height, stopping at
    /// `Height::MAX`.
    pub fn advance(&self, blocks: Height) -> Height {
        let bump = |h: Height| Some(h.saturating_add(blocks));
        let height = match self.height.fetch_update(Ordering::AcqRel, Ordering::Acquire, bump) {
            Ok(prev) | Err(prev) => prev.saturating_add(blocks),
        };
        tracing::debug!(height, "chain tip advanced");
        height
    }

    /// Moves the tip forward to `height`; lower heights are ignored.
    pub fn set_height(&self, height: Height) -> Height {
        let prev = self.height.fetch_max(height, Ordering::AcqRel);
        prev.max(height)
    }
}

impl ChainView for ChainTip {
    fn current_height(&self) -> Height {
        self.height.load(Ordering::Acquire)
    }

    fn schedule(&self) -> &UpgradeSchedule {
        &self.schedule
    }
}
