use thiserror::Error;

use crate::{
    operation::OperationRequest,
    types::{Amount, Height},
};

/// Construction failures. `Display` is the reason recorded on the operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConstructionError {
    /// Sources hold less than the requested outputs.
    #[error("Insufficient funds: have {available}, need {required}")]
    InsufficientFunds {
        /// Spendable value in the sources.
        available: Amount,
        /// Value the outputs require.
        required: Amount,
    },
    /// Nothing to sweep for merge-to-address.
    #[error("Could not find any funds to merge")]
    NothingToMerge,
    /// Nothing to sweep for shield-coinbase.
    #[error("Could not find any coinbase funds to shield")]
    NothingToShield,
    /// Summed or credited value does not fit in an [`Amount`].
    #[error("Amount out of range")]
    AmountOutOfRange,
    /// Proving backend failed.
    #[error("Failed to build transaction: {0}")]
    Proof(String),
}

/// A transaction ready for broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltTransaction {
    /// Transaction id, hex.
    pub txid: String,
    /// Total value moved to recipients.
    pub value: Amount,
}

/// Opaque, possibly slow, transaction construction.
///
/// Called from the blocking pool after the policy has allowed the request.
pub trait TransactionBuilder: Send + Sync + 'static {
    /// Builds a transaction for `request` targeting `inclusion_height`.
    fn build(&self, request: &OperationRequest, inclusion_height: Height) -> Result<BuiltTransaction, ConstructionError>;
}
