//! PostgreSQL database with a shared connection pool

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};
use tracing::debug;

use crate::{Error, PgDatabaseConfig, Result};

/// PostgreSQL database backed by a single connection pool.
///
/// ## State Management
///
/// - **`pool`**: Pool used for bare queries, leased connections and root transactions
/// - **`closed`**: Prevents use after the database has been closed
/// - **`isolated_transactions`**: Copied from the config; see
///   [`PgDatabaseConfig::isolated_transactions`]
///
/// ## Usage Pattern
///
/// ```text
/// 1. Connect (or connect lazily) from a PgDatabaseConfig
/// 2. Hand the Arc<PgDatabase> to a ConnectionSource
/// 3. Run scoped operations through the ConnectionSource
/// 4. Close the database when done
/// ```
#[derive(Debug)]
pub struct PgDatabase {
   pool: PgPool,

   closed: AtomicBool,

   isolated_transactions: bool,
}

impl PgDatabase {
   /// Connect to the configured server, establishing the pool eagerly.
   pub async fn connect(config: &PgDatabaseConfig) -> Result<Arc<Self>> {
      let options = config.connect_options()?;
      let pool = config.pool_options()?.connect_with(options).await?;

      debug!(
         max_connections = config.max_connections,
         "Connected PostgreSQL pool"
      );

      Ok(Arc::new(Self::from_pool(pool, config.isolated_transactions)))
   }

   /// Build the pool without opening any connection.
   ///
   /// Connections are established on first use. Must be called from within a
   /// Tokio runtime.
   pub fn connect_lazy(config: &PgDatabaseConfig) -> Result<Arc<Self>> {
      let options = config.connect_options()?;
      let pool = config.pool_options()?.connect_lazy_with(options);

      Ok(Arc::new(Self::from_pool(pool, config.isolated_transactions)))
   }

   /// Wrap an existing pool.
   pub fn from_pool(pool: PgPool, isolated_transactions: bool) -> Self {
      Self {
         pool,
         closed: AtomicBool::new(false),
         isolated_transactions,
      }
   }

   /// Get the underlying pool
   pub fn pool(&self) -> Result<&PgPool> {
      if self.closed.load(Ordering::Acquire) {
         return Err(Error::DatabaseClosed);
      }

      Ok(&self.pool)
   }

   /// Lease a connection from the pool.
   pub async fn acquire(&self) -> Result<PoolConnection<Postgres>> {
      Ok(self.pool()?.acquire().await?)
   }

   pub fn isolated_transactions(&self) -> bool {
      self.isolated_transactions
   }

   pub fn is_closed(&self) -> bool {
      self.closed.load(Ordering::Acquire)
   }

   /// Close the pool, waiting for leased connections to be returned.
   pub async fn close(&self) -> Result<()> {
      if self.closed.swap(true, Ordering::AcqRel) {
         return Ok(());
      }

      self.pool.close().await;
      debug!("Closed PostgreSQL pool");
      Ok(())
   }
}
