//! Accounts: data model and lifecycle state machine.

pub mod model;

pub use model::{Account, AccountStatus};
