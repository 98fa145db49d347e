//! Outreach pool: a managed pool of messaging accounts with per-account send
//! limits and health monitoring.

pub mod accounts;
pub mod config;
pub mod console;
pub mod error;
pub mod monitor;
pub mod notify;
pub mod pool;
pub mod safety;
pub mod session;
pub mod store;
