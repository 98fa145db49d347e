//! Account pool: session cache and send orchestration.

pub mod cache;
pub mod orchestrator;

pub use cache::{SessionCache, SessionLease};
pub use orchestrator::{PoolDeps, PoolOrchestrator, spawn_pending_prune_task};
