//! Request-scoped database binding

use std::fmt;
use std::sync::Arc;

use sqlx::Postgres;
use sqlx::pool::PoolConnection;
use tokio::sync::Mutex;

use crate::transaction::TxNode;

/// What a scope runs its statements against.
#[derive(Clone, Default)]
pub(crate) enum Binding {
   #[default]
   Pool,
   Connection(Arc<Mutex<PoolConnection<Postgres>>>),
   Transaction(Arc<TxNode>),
}

/// Explicit per-request scope threaded through store calls.
///
/// A scope carries at most one binding:
///
/// - nothing: statements run on any pooled connection
/// - a leased connection from [`ConnectionSource::with_connection`]
/// - a transaction (possibly nested) from [`ConnectionSource::with_transaction`]
///
/// Scopes are cheap to clone; clones share the same binding.
///
/// [`ConnectionSource::with_connection`]: crate::ConnectionSource::with_connection
/// [`ConnectionSource::with_transaction`]: crate::ConnectionSource::with_transaction
#[derive(Clone, Default)]
pub struct DbScope {
   binding: Binding,
}

impl DbScope {
   /// A scope bound to the pool.
   pub fn new() -> Self {
      Self::default()
   }

   pub(crate) fn bound(binding: Binding) -> Self {
      Self { binding }
   }

   pub(crate) fn binding(&self) -> &Binding {
      &self.binding
   }

   pub fn has_connection(&self) -> bool {
      matches!(self.binding, Binding::Connection(_))
   }

   pub fn in_transaction(&self) -> bool {
      matches!(self.binding, Binding::Transaction(_))
   }

   /// The transaction this scope runs in, if any.
   pub fn transaction(&self) -> Option<&Arc<TxNode>> {
      match &self.binding {
         Binding::Transaction(node) => Some(node),
         _ => None,
      }
   }
}

impl fmt::Debug for DbScope {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      match &self.binding {
         Binding::Pool => f.write_str("DbScope::Pool"),
         Binding::Connection(_) => f.write_str("DbScope::Connection"),
         Binding::Transaction(node) => f.debug_tuple("DbScope::Transaction").field(&node.id()).finish(),
      }
   }
}
