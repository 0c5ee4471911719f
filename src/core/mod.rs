//! Concurrent operation registry.

/// Operation queue and its state-transition rules.
pub mod queue;
