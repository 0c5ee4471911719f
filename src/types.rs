//! Shared primitive heights, amounts, and pool enums.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Block height.
pub type Height = u32;
/// Monotonic journal sequence number.
pub type OpSeq = u64;
/// Value in zatoshi.
pub type Amount = u64;

/// Largest value any single output or transaction total may carry.
pub const MAX_MONEY: Amount = 21_000_000 * 100_000_000;

/// Value pool an endpoint of a transaction belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolType {
    /// Transparent outputs, including coinbase.
    Transparent,
    /// Legacy Sprout shielded pool.
    Sprout,
    /// Sapling shielded pool.
    Sapling,
    /// Orchard shielded pool.
    Orchard,
}

impl PoolType {
    /// Lowercase name used in config files and address-type arguments.
    pub fn as_str(self) -> &'static str {
        match self {
            PoolType::Transparent => "transparent",
            PoolType::Sprout => "sprout",
            PoolType::Sapling => "sapling",
            PoolType::Orchard => "orchard",
        }
    }
}

impl fmt::Display for PoolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
