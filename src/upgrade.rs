//! Network upgrade identifiers and the height-indexed activation schedule.

use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{config::ConfigError, types::Height};

/// Network upgrades in activation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpgradeId {
    /// Overwinter.
    Overwinter,
    /// Sapling.
    Sapling,
    /// Blossom.
    Blossom,
    /// Heartwood.
    Heartwood,
    /// Canopy.
    Canopy,
    /// NU5.
    Nu5,
}

impl UpgradeId {
    /// Every upgrade, in activation order.
    pub const ALL: [UpgradeId; 6] = [
        UpgradeId::Overwinter,
        UpgradeId::Sapling,
        UpgradeId::Blossom,
        UpgradeId::Heartwood,
        UpgradeId::Canopy,
        UpgradeId::Nu5,
    ];

    /// Consensus branch id.
    pub fn branch_id(self) -> u32 {
        match self {
            UpgradeId::Overwinter => 0x5ba8_1b19,
            UpgradeId::Sapling => 0x76b8_09bb,
            UpgradeId::Blossom => 0x2bb4_0e60,
            UpgradeId::Heartwood => 0xf5b9_230b,
            UpgradeId::Canopy => 0xe9ff_75a6,
            UpgradeId::Nu5 => 0xc2d6_d0b4,
        }
    }

    /// Lowercase upgrade name.
    pub fn as_str(self) -> &'static str {
        match self {
            UpgradeId::Overwinter => "overwinter",
            UpgradeId::Sapling => "sapling",
            UpgradeId::Blossom => "blossom",
            UpgradeId::Heartwood => "heartwood",
            UpgradeId::Canopy => "canopy",
            UpgradeId::Nu5 => "nu5",
        }
    }
}

impl fmt::Display for UpgradeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UpgradeId {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        UpgradeId::ALL
            .into_iter()
            .find(|u| u.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ConfigError::UnknownUpgrade(s.to_string()))
    }
}

/// Activation status of an upgrade relative to some height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpgradeStatus {
    /// No activation height configured.
    Disabled,
    /// Configured but not yet reached.
    Pending,
    /// Active at the height in question.
    Active,
}

/// Immutable map from upgrade to activation height.
///
/// Heights are non-decreasing in [`UpgradeId`] order and every configured
/// upgrade has all of its predecessors configured.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UpgradeSchedule {
    heights: BTreeMap<UpgradeId, Height>,
}

impl UpgradeSchedule {
    /// Builds a schedule, rejecting out-of-order or gapped configurations.
    pub fn new<I>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (UpgradeId, Height)>,
    {
        let mut heights = BTreeMap::new();
        for (upgrade, height) in pairs {
            if heights.insert(upgrade, height).is_some() {
                return Err(ConfigError::DuplicateUpgrade(upgrade));
            }
        }

        let mut prev: Option<(UpgradeId, Height)> = None;
        for upgrade in UpgradeId::ALL {
            match (heights.get(&upgrade).copied(), prev) {
                (Some(height), Some((earlier, earlier_height))) if height < earlier_height => {
                    return Err(ConfigError::NonMonotonic {
                        upgrade,
                        height,
                        earlier,
                        earlier_height,
                    });
                }
                (Some(height), _) => prev = Some((upgrade, height)),
                (None, _) => {
                    if let Some(later) = UpgradeId::ALL
                        .into_iter()
                        .find(|u| *u > upgrade && heights.contains_key(u))
                    {
                        return Err(ConfigError::MissingHeight {
                            upgrade,
                            required_by: later,
                        });
                    }
                }
            }
        }

        Ok(Self { heights })
    }

    /// Mainnet activation heights.
    pub fn mainnet() -> Self {
        Self {
            heights: BTreeMap::from([
                (UpgradeId::Overwinter, 347_500),
                (UpgradeId::Sapling, 419_200),
                (UpgradeId::Blossom, 653_600),
                (UpgradeId::Heartwood, 903_000),
                (UpgradeId::Canopy, 1_046_400),
                (UpgradeId::Nu5, 1_687_104),
            ]),
        }
    }

    /// Activation height, or `None` when the upgrade never activates.
    pub fn activation_height(&self, upgrade: UpgradeId) -> Option<Height> {
        self.heights.get(&upgrade).copied()
    }

    /// True when `upgrade` has activated at or below `height`.
    pub fn is_active(&self, upgrade: UpgradeId, height: Height) -> bool {
        self.activation_height(upgrade)
            .is_some_and(|activation| activation <= height)
    }

    /// Status of `upgrade` at `height`.
    pub fn status(&self, upgrade: UpgradeId, height: Height) -> UpgradeStatus {
        match self.activation_height(upgrade) {
            None => UpgradeStatus::Disabled,
            Some(activation) if activation <= height => UpgradeStatus::Active,
            Some(_) => UpgradeStatus::Pending,
        }
    }

    /// Latest upgrade active at `height`.
    pub fn current_upgrade(&self, height: Height) -> Option<UpgradeId> {
        self.heights
            .iter()
            .rev()
            .find(|(_, activation)| **activation <= height)
            .map(|(upgrade, _)| *upgrade)
    }

    /// Configured upgrades and their heights, in activation order.
    pub fn iter(&self) -> impl Iterator<Item = (UpgradeId, Height)> + '_ {
        self.heights.iter().map(|(u, h)| (*u, *h))
    }
}
