//! Scope-resolved statement execution and transaction control

use std::sync::Arc;

use sqlx::postgres::{PgPoolCopyExt, PgRow};
use sqlx::FromRow;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::scope::{Binding, DbScope};
use crate::transaction::TxNode;
use crate::value::{SqlValue, to_arguments, validate_identifier};
use crate::{Error, PgDatabase, Result};

/// Run `$body` with `$conn` bound to whatever executor the scope resolves to:
/// the pool, the leased connection, or the transaction's session.
macro_rules! on_executor {
   ($source:expr, $scope:expr, |$conn:ident| $body:expr) => {
      match $scope.binding() {
         Binding::Pool => {
            let $conn = $source.db.pool()?;
            $body
         }
         Binding::Connection(leased) => {
            let mut guard = leased.try_lock().map_err(|_| Error::ConnectionInUse)?;
            let $conn = &mut **guard;
            $body
         }
         Binding::Transaction(node) => {
            let mut session = node.session().await?;
            let $conn = session.connection()?;
            $body
         }
      }
   };
}

/// Resolves each [`DbScope`] to the connection its statements run on.
///
/// Entity stores hold a `ConnectionSource` and take a `&DbScope` per call, so
/// the same store code runs inside or outside a transaction.
#[derive(Debug, Clone)]
pub struct ConnectionSource {
   db: Arc<PgDatabase>,
}

impl ConnectionSource {
   pub fn new(db: Arc<PgDatabase>) -> Self {
      Self { db }
   }

   pub fn database(&self) -> &Arc<PgDatabase> {
      &self.db
   }

   /// Lease a dedicated connection for the returned scope.
   ///
   /// A scope already inside a transaction is returned as is, since its
   /// statements must keep running on the transaction's session.
   pub async fn with_connection(&self, scope: &DbScope) -> Result<DbScope> {
      if scope.in_transaction() {
         return Ok(scope.clone());
      }

      let conn = self.db.acquire().await?;
      debug!("Leased connection for scope");
      Ok(DbScope::bound(Binding::Connection(Arc::new(Mutex::new(conn)))))
   }

   /// Begin a transaction and return a scope bound to it.
   ///
   /// Inside a transaction this begins a nested one. With a leased connection
   /// the transaction runs on that connection; otherwise on a fresh one from
   /// the pool.
   pub async fn with_transaction(&self, scope: &DbScope) -> Result<DbScope> {
      let isolated = self.db.isolated_transactions();

      let node = match scope.binding() {
         Binding::Transaction(parent) => parent.begin_child().await?,
         Binding::Connection(leased) => {
            let guard = Arc::clone(leased)
               .try_lock_owned()
               .map_err(|_| Error::ConnectionInUse)?;
            TxNode::begin_root(Box::new(guard), isolated).await?
         }
         Binding::Pool => {
            let conn = self.db.acquire().await.map_err(|e| match e {
               Error::Sqlx(source) => Error::BeginFailed { source },
               other => other,
            })?;
            TxNode::begin_root(Box::new(conn), isolated).await?
         }
      };

      Ok(DbScope::bound(Binding::Transaction(node)))
   }

   /// Commit the scope's transaction, including any nested transactions
   /// still open below it.
   pub async fn commit(&self, scope: &DbScope) -> Result<()> {
      let node = scope.transaction().ok_or(Error::NoActiveTransaction)?;
      node.commit().await
   }

   /// Roll back the scope's transaction and everything nested below it.
   pub async fn rollback(&self, scope: &DbScope) -> Result<()> {
      let node = scope.transaction().ok_or(Error::NoActiveTransaction)?;
      node.rollback().await
   }

   /// Run `hook` once the scope's transaction is durably committed.
   ///
   /// Outside a transaction there is nothing to wait for and the hook runs
   /// immediately.
   pub fn after_commit(&self, scope: &DbScope, hook: impl FnOnce() + Send + 'static) -> Result<()> {
      match scope.transaction() {
         Some(node) => node.defer(Box::new(hook)),
         None => {
            hook();
            Ok(())
         }
      }
   }

   pub async fn fetch_all<T>(&self, scope: &DbScope, sql: &str, args: Vec<SqlValue>) -> Result<Vec<T>>
   where
      T: for<'r> FromRow<'r, PgRow> + Send + Unpin,
   {
      trace!(sql, args = args.len(), "fetch_all");
      let query = sqlx::query_as_with::<_, T, _>(sql, to_arguments(args)?);

      Ok(on_executor!(self, scope, |conn| query.fetch_all(conn).await?))
   }

   pub async fn fetch_optional<T>(
      &self,
      scope: &DbScope,
      sql: &str,
      args: Vec<SqlValue>,
   ) -> Result<Option<T>>
   where
      T: for<'r> FromRow<'r, PgRow> + Send + Unpin,
   {
      trace!(sql, args = args.len(), "fetch_optional");
      let query = sqlx::query_as_with::<_, T, _>(sql, to_arguments(args)?);

      Ok(on_executor!(self, scope, |conn| query.fetch_optional(conn).await?))
   }

   /// Execute a statement and return the number of affected rows.
   pub async fn execute(&self, scope: &DbScope, sql: &str, args: Vec<SqlValue>) -> Result<u64> {
      trace!(sql, args = args.len(), "execute");
      let query = sqlx::query_with(sql, to_arguments(args)?);

      let result = on_executor!(self, scope, |conn| query.execute(conn).await?);
      Ok(result.rows_affected())
   }

   /// Bulk load `rows` into `table` with `COPY ... FROM STDIN`.
   ///
   /// Every row must carry one value per column, in column order. Returns the
   /// number of rows copied.
   pub async fn copy_from(
      &self,
      scope: &DbScope,
      table: &str,
      columns: &[&str],
      rows: Vec<Vec<SqlValue>>,
   ) -> Result<u64> {
      validate_identifier(table)?;
      for column in columns {
         validate_identifier(column)?;
      }

      let mut data = String::new();
      for row in &rows {
         if row.len() != columns.len() {
            return Err(Error::CopyRowWidth {
               expected: columns.len(),
               actual: row.len(),
            });
         }

         for (i, value) in row.iter().enumerate() {
            if i > 0 {
               data.push(',');
            }
            value.write_csv_field(&mut data)?;
         }
         data.push('\n');
      }

      let statement = format!(
         "COPY {table} ({}) FROM STDIN WITH (FORMAT csv)",
         columns.join(", ")
      );
      trace!(statement, rows = rows.len(), "copy_from");

      let copied = on_executor!(self, scope, |conn| {
         let mut copy = conn.copy_in_raw(&statement).await?;
         copy.send(data.as_bytes()).await?;
         copy.finish().await?
      });

      Ok(copied)
   }
}
