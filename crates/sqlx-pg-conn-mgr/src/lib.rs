//! # sqlx-pg-conn-mgr
//!
//! A thin layer over SQLx that runs PostgreSQL statements against whatever a
//! request scope is bound to, and supports arbitrarily nested transactions
//! with post-commit hooks.
//!
//! ## Core Types
//!
//! - **[`PgDatabase`]**: Connection pool with close tracking
//! - **[`PgDatabaseConfig`]**: Connection and pool settings
//! - **[`DbScope`]**: Explicit per-request binding (pool, leased connection, or transaction)
//! - **[`ConnectionSource`]**: Scope-aware queries, `COPY`, and transaction control
//! - **[`SqlValue`]**: Typed bind value
//! - **[`Error`]**: Error type for database operations
//!
//! ## Transactions
//!
//! - **Nesting**: Beginning a transaction in a transaction scope creates a
//!   savepoint on the same session
//! - **Hooks**: `after_commit` callbacks of nested transactions move to the
//!   parent on commit and fire after the outermost `COMMIT`, children first
//! - **Rollback**: Rolls back the whole subtree and drops its hooks
//! - **Abandoned trees**: Dropped without commit or rollback, the tree issues a
//!   `ROLLBACK` before its connection goes back to the pool

mod config;
mod database;
mod error;
mod scope;
mod source;
mod transaction;
mod value;

// Re-export public types
pub use config::{PgDatabaseConfig, default_max_connections};
pub use database::PgDatabase;
pub use error::{Error, Result};
pub use scope::DbScope;
pub use source::ConnectionSource;
pub use transaction::{PostCommitHook, TxNode, TxStatus};
pub use value::{SqlValue, is_valid_identifier, next_bind_var, to_arguments};
