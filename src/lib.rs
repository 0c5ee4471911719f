//! Upgrade-gated admission and asynchronous execution of shielded operations.
//!
//! # Examples
//!
//! Deciding admission directly with [`policy::ValidationPolicy`]:
//! ```
//! use std::sync::Arc;
//!
//! use shieldq::{
//!     operation::OperationRequest,
//!     policy::{PolicyDenied, ValidationPolicy},
//!     types::PoolType,
//!     upgrade::{UpgradeId, UpgradeSchedule},
//! };
//!
//! let schedule = UpgradeSchedule::new([
//!     (UpgradeId::Overwinter, 1),
//!     (UpgradeId::Sapling, 1),
//!     (UpgradeId::Blossom, 205),
//!     (UpgradeId::Heartwood, 210),
//!     (UpgradeId::Canopy, 220),
//! ]).expect("schedule");
//! let policy = ValidationPolicy::new(Arc::new(schedule), UpgradeId::Canopy);
//!
//! let merge = OperationRequest::merge_to_address(vec![PoolType::Transparent], PoolType::Sprout, 215);
//! assert_eq!(policy.evaluate(&merge, 216), Ok(()));
//! assert_eq!(policy.evaluate(&merge, 221), Err(PolicyDenied::DepositsDisabled));
//! assert_eq!(
//!     policy.check_new_address(PoolType::Sprout, 220).unwrap_err().to_string(),
//!     "address type is not allowed after cutover",
//! );
//! ```
//!
//! Runtime usage with a SQLite journal:
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//!
//! use shieldq::{
//!     build::simulated::SimulatedBuilder,
//!     chain::ChainTip,
//!     config::Config,
//!     core::queue::OperationQueue,
//!     operation::OperationRequest,
//!     persist::sqlite::SqliteTransitionSink,
//!     runtime::{executor::Services, handle::spawn_operations},
//!     types::PoolType,
//! };
//!
//! # #[tokio::main]
//! # async fn main() {
//! let config = Config::load("shieldq.toml").expect("config");
//! let schedule = Arc::new(config.schedule().expect("schedule"));
//! let chain = Arc::new(ChainTip::new(Arc::clone(&schedule), 215));
//! let services = Services {
//!     chain: chain.clone(),
//!     policy: Arc::new(config.policy().expect("policy")),
//!     builder: Arc::new(SimulatedBuilder::new()),
//! };
//! let sink = SqliteTransitionSink::open("shieldq.db").expect("open sqlite");
//! let handle = spawn_operations(
//!     OperationQueue::new(),
//!     services,
//!     Some(Box::new(sink)),
//!     config.runtime().expect("runtime"),
//! );
//! let id = handle
//!     .submit(OperationRequest::shield_coinbase(PoolType::Sapling, 215))
//!     .await
//!     .expect("submit");
//! let record = handle
//!     .wait_terminal(id, Duration::from_millis(50), Duration::from_secs(30))
//!     .await
//!     .expect("terminal");
//! println!("{id}: {}", record.state.label());
//! handle.shutdown().await.expect("shutdown");
//! # }
//! ```
#![deny(missing_docs)]

/// Transaction construction capability.
pub mod build;
/// Chain tip read model.
pub mod chain;
/// TOML configuration.
pub mod config;
/// Concurrent operation registry.
pub mod core;
/// Journaled transitions and envelopes.
pub mod journal;
/// Operation requests, ids, states, and records.
pub mod operation;
/// Persistence abstraction and SQLite implementation.
pub mod persist;
/// Deprecated-pool admission rules.
pub mod policy;
/// Worker pool, caller handle, and events.
pub mod runtime;
/// Tracing setup.
pub mod telemetry;
/// Shared primitive types and enums.
pub mod types;
/// Network upgrades and activation schedule.
pub mod upgrade;
