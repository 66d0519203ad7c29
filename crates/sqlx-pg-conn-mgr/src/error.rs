//! Error types for sqlx-pg-conn-mgr

use thiserror::Error;

/// Errors that may occur when working with sqlx-pg-conn-mgr
#[derive(Error, Debug)]
pub enum Error {
   /// IO error when accessing sockets or files. Standard library IO errors
   /// are converted to this variant.
   #[error("IO error: {0}")]
   Io(#[from] std::io::Error),

   /// Error from the sqlx library. Standard sqlx errors are converted to this variant
   #[error("Sqlx error: {0}")]
   Sqlx(#[from] sqlx::Error),

   /// Database has been closed and cannot be used
   #[error("Database has been closed")]
   DatabaseClosed,

   /// The scope carries no transaction, or its transaction already finished.
   #[error("no active transaction in scope")]
   NoActiveTransaction,

   /// Acquiring a connection or starting a (sub-)transaction failed.
   #[error("failed to begin transaction: {source}")]
   BeginFailed {
      #[source]
      source: sqlx::Error,
   },

   /// The commit of transaction `id` failed; no post-commit hooks were run.
   #[error("failed to commit transaction {id}: {source}")]
   CommitFailed {
      id: i64,
      #[source]
      source: sqlx::Error,
   },

   /// The rollback of transaction `id` failed.
   #[error("failed to roll back transaction {id}: {source}")]
   RollbackFailed {
      id: i64,
      #[source]
      source: sqlx::Error,
   },

   /// The scope's leased connection is already in use elsewhere.
   #[error("leased connection is already in use")]
   ConnectionInUse,

   /// The transaction session is not backed by a live connection.
   #[error("transaction session has no usable connection")]
   SessionUnavailable,

   /// A bind value could not be encoded for PostgreSQL.
   #[error("failed to encode bind value: {0}")]
   Encode(#[source] sqlx::error::BoxDynError),

   /// Table or column identifier contains invalid characters.
   #[error("invalid identifier '{name}': must match [a-zA-Z_][a-zA-Z0-9_]*")]
   InvalidIdentifier { name: String },

   /// A COPY row does not have one value per column.
   #[error("copy row has {actual} values but {expected} columns were given")]
   CopyRowWidth { expected: usize, actual: usize },

   /// Database configuration could not be turned into connect options.
   #[error("invalid database configuration: {0}")]
   InvalidConfig(String),
}

/// A type alias for Results with our Error type
pub type Result<T> = std::result::Result<T, Error>;
