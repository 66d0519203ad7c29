//! Nested transactions with deferred post-commit hooks
//!
//! A transaction tree owns one PostgreSQL session. The root node runs
//! `BEGIN`/`COMMIT`/`ROLLBACK`; every nested node is a savepoint on the same
//! session. Hooks registered on a nested node travel up to its parent when it
//! commits and only fire once the root commits.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use sqlx::pool::PoolConnection;
use sqlx::{PgConnection, Postgres};
use tokio::runtime::Handle;
use tokio::sync::{MutexGuard, OwnedMutexGuard};
use tracing::{debug, trace, warn};

use crate::{Error, Result};

/// Callback deferred until its transaction and every ancestor have committed.
pub type PostCommitHook = Box<dyn FnOnce() + Send + 'static>;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Fails with SQLSTATE 25P02 when the transaction is aborted. PostgreSQL
/// answers `COMMIT` in an aborted transaction with a silent rollback.
const ABORTED_CHECK: &str = "SELECT 1";

/// The connection a transaction tree runs on.
pub trait TxSession: Send {
   /// Run a control statement (`BEGIN`, `SAVEPOINT ...`) on the session.
   fn run<'a>(&'a mut self, statement: &'a str) -> BoxFuture<'a, std::result::Result<(), sqlx::Error>>;

   /// The live connection, for queries issued inside the transaction.
   fn connection(&mut self) -> Option<&mut PgConnection>;
}

impl TxSession for PoolConnection<Postgres> {
   fn run<'a>(&'a mut self, statement: &'a str) -> BoxFuture<'a, std::result::Result<(), sqlx::Error>> {
      Box::pin(async move {
         sqlx::Executor::execute(&mut **self, sqlx::raw_sql(statement)).await?;
         Ok(())
      })
   }

   fn connection(&mut self) -> Option<&mut PgConnection> {
      Some(&mut **self)
   }
}

/// A leased connection borrowed by a transaction for its lifetime.
impl TxSession for OwnedMutexGuard<PoolConnection<Postgres>> {
   fn run<'a>(&'a mut self, statement: &'a str) -> BoxFuture<'a, std::result::Result<(), sqlx::Error>> {
      Box::pin(async move {
         sqlx::Executor::execute(&mut ***self, sqlx::raw_sql(statement)).await?;
         Ok(())
      })
   }

   fn connection(&mut self) -> Option<&mut PgConnection> {
      Some(&mut ***self)
   }
}

/// Lifecycle of a transaction node.
///
/// `Committed` and `RolledBack` are terminal. A failed or interrupted commit
/// or rollback returns the node to `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
   Active,
   Committing,
   Committed,
   RollingBack,
   RolledBack,
}

/// State shared by every node of one tree
struct TreeShared {
   session: tokio::sync::Mutex<Option<Box<dyn TxSession>>>,

   /// Ids for nested nodes; the root is always 0
   next_id: AtomicI64,

   isolated: bool,

   /// Set once the root committed or rolled back
   finished: AtomicBool,
}

impl TreeShared {
   async fn run(
      &self,
      statement: &str,
      on_error: impl FnOnce(sqlx::Error) -> Error + Send,
   ) -> Result<()> {
      let mut slot = self.session.lock().await;
      let session = slot.as_deref_mut().ok_or(Error::SessionUnavailable)?;

      trace!(statement, "Running transaction statement");
      session.run(statement).await.map_err(on_error)
   }

   /// Run the root's final statement and hand the session back.
   ///
   /// The session leaves the slot under the same lock, so the pooled or leased
   /// connection is free as soon as the root resolves, however many scopes
   /// still point at the tree.
   async fn finish(
      &self,
      statement: &str,
      on_error: impl FnOnce(sqlx::Error) -> Error + Send,
   ) -> Result<()> {
      let mut slot = self.session.lock().await;
      let session = slot.as_deref_mut().ok_or(Error::SessionUnavailable)?;

      trace!(statement, "Running final transaction statement");
      session.run(statement).await.map_err(on_error)?;

      self.finished.store(true, Ordering::Release);
      drop(slot.take());
      Ok(())
   }
}

impl Drop for TreeShared {
   fn drop(&mut self) {
      if self.finished.load(Ordering::Acquire) {
         return;
      }

      let Some(mut session) = self.session.get_mut().take() else {
         return;
      };

      match Handle::try_current() {
         Ok(handle) => {
            debug!("Dropping unfinished transaction tree (will roll back)");
            handle.spawn(async move {
               if let Err(e) = session.run("ROLLBACK").await {
                  warn!(error = %e, "Rollback of abandoned transaction failed");
               }
            });
         }
         Err(_) => {
            warn!("Abandoned transaction dropped outside a Tokio runtime; connection released mid-transaction");
         }
      }
   }
}

struct NodeState {
   status: TxStatus,

   children: BTreeMap<i64, Arc<TxNode>>,

   /// Hooks handed up by children that already committed
   propagated_hooks: Vec<PostCommitHook>,

   hooks: Vec<PostCommitHook>,
}

/// One transaction in a tree: the root transaction or a savepoint below it.
pub struct TxNode {
   id: i64,

   parent: Option<Weak<TxNode>>,

   tree: Arc<TreeShared>,

   state: Mutex<NodeState>,
}

impl std::fmt::Debug for TxNode {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      f.debug_struct("TxNode")
         .field("id", &self.id)
         .field("status", &self.status())
         .finish_non_exhaustive()
   }
}

/// Restores an interrupted commit or rollback when dropped unsettled.
///
/// Hooks already collected from committed children go back to the node so a
/// later commit still fires them.
struct Unwind {
   node: Arc<TxNode>,
   collected: Vec<PostCommitHook>,
   settled: bool,
}

impl Drop for Unwind {
   fn drop(&mut self) {
      if self.settled {
         return;
      }

      let mut state = self.node.state.lock();
      state.status = TxStatus::Active;
      state.propagated_hooks.append(&mut self.collected);
   }
}

impl TxNode {
   /// Start a root transaction on `session`.
   pub(crate) async fn begin_root(session: Box<dyn TxSession>, isolated: bool) -> Result<Arc<Self>> {
      let tree = Arc::new(TreeShared {
         session: tokio::sync::Mutex::new(Some(session)),
         next_id: AtomicI64::new(1),
         isolated,
         finished: AtomicBool::new(false),
      });

      if let Err(e) = tree.run("BEGIN", |source| Error::BeginFailed { source }).await {
         tree.finished.store(true, Ordering::Release);
         return Err(e);
      }

      debug!(isolated, "Began root transaction");
      Ok(Arc::new(Self::new(0, None, tree)))
   }

   fn new(id: i64, parent: Option<Weak<TxNode>>, tree: Arc<TreeShared>) -> Self {
      Self {
         id,
         parent,
         tree,
         state: Mutex::new(NodeState {
            status: TxStatus::Active,
            children: BTreeMap::new(),
            propagated_hooks: Vec::new(),
            hooks: Vec::new(),
         }),
      }
   }

   pub fn id(&self) -> i64 {
      self.id
   }

   pub fn is_root(&self) -> bool {
      self.parent.is_none()
   }

   pub fn status(&self) -> TxStatus {
      self.state.lock().status
   }

   /// Nested transactions begun under this node that have not finished yet.
   pub fn open_children(&self) -> usize {
      self.state.lock().children.len()
   }

   fn ensure_active(&self) -> Result<()> {
      if self.state.lock().status == TxStatus::Active {
         Ok(())
      } else {
         Err(Error::NoActiveTransaction)
      }
   }

   /// Start a nested transaction under this node.
   ///
   /// The child is registered only after its savepoint exists, so a failed or
   /// cancelled begin leaves the tree untouched.
   pub(crate) async fn begin_child(self: &Arc<Self>) -> Result<Arc<Self>> {
      self.ensure_active()?;

      let id = self.tree.next_id.fetch_add(1, Ordering::Relaxed);
      self
         .tree
         .run(&format!("SAVEPOINT sp_{id}"), |source| Error::BeginFailed { source })
         .await?;

      let child = Arc::new(Self::new(
         id,
         Some(Arc::downgrade(self)),
         Arc::clone(&self.tree),
      ));

      let mut state = self.state.lock();
      if state.status != TxStatus::Active {
         return Err(Error::NoActiveTransaction);
      }
      state.children.insert(id, Arc::clone(&child));

      debug!(id, parent = self.id, "Began nested transaction");
      Ok(child)
   }

   /// Register a hook to run after the outermost commit.
   pub(crate) fn defer(&self, hook: PostCommitHook) -> Result<()> {
      let mut state = self.state.lock();
      if state.status != TxStatus::Active {
         return Err(Error::NoActiveTransaction);
      }

      state.hooks.push(hook);
      Ok(())
   }

   /// Lock the tree's session for a query issued in this transaction.
   pub(crate) async fn session(&self) -> Result<SessionGuard<'_>> {
      self.ensure_active()?;

      Ok(SessionGuard {
         slot: self.tree.session.lock().await,
      })
   }

   fn commit_statement(&self) -> String {
      if self.is_root() {
         "COMMIT".to_string()
      } else {
         format!("RELEASE SAVEPOINT sp_{}", self.id)
      }
   }

   fn rollback_statement(&self) -> String {
      if self.is_root() {
         "ROLLBACK".to_string()
      } else {
         format!("ROLLBACK TO SAVEPOINT sp_{0}; RELEASE SAVEPOINT sp_{0}", self.id)
      }
   }

   /// Run the statement that ends this node; the root also releases the session.
   async fn end(
      &self,
      statement: &str,
      on_error: impl FnOnce(sqlx::Error) -> Error + Send,
   ) -> Result<()> {
      if self.is_root() {
         self.tree.finish(statement, on_error).await
      } else {
         self.tree.run(statement, on_error).await
      }
   }

   fn first_child(&self) -> Option<Arc<TxNode>> {
      self.state.lock().children.values().next().cloned()
   }

   fn detach(&self, child_id: i64) {
      self.state.lock().children.remove(&child_id);
   }

   /// Commit this node and every open descendant.
   ///
   /// A nested node hands its hooks to the parent (or fires them in isolated
   /// mode); the root fires everything collected across the tree.
   pub(crate) async fn commit(self: &Arc<Self>) -> Result<()> {
      let parent = match &self.parent {
         Some(parent) => Some(parent.upgrade().ok_or(Error::NoActiveTransaction)?),
         None => None,
      };

      let hooks = Arc::clone(self).commit_subtree().await?;

      match parent {
         Some(parent) => {
            parent.detach(self.id);
            if self.tree.isolated {
               fire(self.id, hooks);
            } else {
               trace!(id = self.id, parent = parent.id, hooks = hooks.len(), "Propagating hooks");
               parent.state.lock().propagated_hooks.extend(hooks);
            }
         }
         None => fire(self.id, hooks),
      }

      Ok(())
   }

   /// Commit children in creation order, then this node.
   ///
   /// Returns every hook of the subtree: hooks propagated earlier, then those
   /// of the children committed now, then this node's own.
   fn commit_subtree(self: Arc<Self>) -> BoxFuture<'static, Result<Vec<PostCommitHook>>> {
      Box::pin(async move {
         {
            let mut state = self.state.lock();
            if state.status != TxStatus::Active {
               return Err(Error::NoActiveTransaction);
            }
            state.status = TxStatus::Committing;
         }

         let mut unwind = Unwind {
            node: Arc::clone(&self),
            collected: Vec::new(),
            settled: false,
         };

         while let Some(child) = self.first_child() {
            let hooks = Arc::clone(&child).commit_subtree().await?;
            self.detach(child.id);
            unwind.collected.extend(hooks);
         }

         let id = self.id;
         if self.is_root() {
            self
               .tree
               .run(ABORTED_CHECK, |source| Error::CommitFailed { id, source })
               .await?;
         }
         self
            .end(&self.commit_statement(), |source| Error::CommitFailed { id, source })
            .await?;

         unwind.settled = true;
         let mut state = self.state.lock();
         state.status = TxStatus::Committed;

         let mut hooks = std::mem::take(&mut state.propagated_hooks);
         hooks.append(&mut unwind.collected);
         hooks.append(&mut state.hooks);

         debug!(id, "Committed transaction");
         Ok(hooks)
      })
   }

   /// Roll back this node and every open descendant, dropping their hooks.
   pub(crate) async fn rollback(self: &Arc<Self>) -> Result<()> {
      Arc::clone(self).rollback_subtree().await?;

      if let Some(parent) = self.parent.as_ref().and_then(Weak::upgrade) {
         parent.detach(self.id);
      }

      Ok(())
   }

   fn rollback_subtree(self: Arc<Self>) -> BoxFuture<'static, Result<()>> {
      Box::pin(async move {
         {
            let mut state = self.state.lock();
            if state.status != TxStatus::Active {
               return Err(Error::NoActiveTransaction);
            }
            state.status = TxStatus::RollingBack;
         }

         let mut unwind = Unwind {
            node: Arc::clone(&self),
            collected: Vec::new(),
            settled: false,
         };

         while let Some(child) = self.first_child() {
            Arc::clone(&child).rollback_subtree().await?;
            self.detach(child.id);
         }

         let id = self.id;
         self
            .end(&self.rollback_statement(), |source| Error::RollbackFailed { id, source })
            .await?;

         unwind.settled = true;
         let mut state = self.state.lock();
         state.status = TxStatus::RolledBack;
         let dropped = state.hooks.len() + state.propagated_hooks.len();
         state.hooks.clear();
         state.propagated_hooks.clear();

         debug!(id, dropped_hooks = dropped, "Rolled back transaction");
         Ok(())
      })
   }
}

fn fire(id: i64, hooks: Vec<PostCommitHook>) {
   trace!(id, hooks = hooks.len(), "Running post-commit hooks");
   for hook in hooks {
      hook();
   }
}

/// Exclusive access to a transaction's session for one query.
pub struct SessionGuard<'a> {
   slot: MutexGuard<'a, Option<Box<dyn TxSession>>>,
}

impl SessionGuard<'_> {
   pub fn connection(&mut self) -> Result<&mut PgConnection> {
      self
         .slot
         .as_deref_mut()
         .and_then(|session| session.connection())
         .ok_or(Error::SessionUnavailable)
   }
}
