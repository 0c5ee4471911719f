//! Transaction construction capability used by the executor.

/// In-process builder with per-pool balances.
pub mod simulated;
/// Builder trait and construction errors.
pub mod traits;
