//! Async worker pool, caller handle, and event stream.

/// Event stream types emitted by the runtime.
pub mod events;
/// Worker pool that drives operations to a terminal state.
pub mod executor;
/// Caller handle and persistence worker.
pub mod handle;
