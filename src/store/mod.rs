//! Persistence layer: libSQL-backed account storage.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlAccountStore;
pub use traits::AccountStore;
