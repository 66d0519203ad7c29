//! Paged fetch builder

use std::future::{Future, IntoFuture};
use std::marker::PhantomData;
use std::pin::Pin;

use serde::de::DeserializeOwned;
use sqlx::FromRow;
use sqlx::postgres::PgRow;
use sqlx_pg_conn_mgr::{ConnectionSource, DbScope, SqlValue};
use tracing::debug;

use crate::Error;
use crate::config::PaginationConfig;
use crate::ordering::TableOrdering;
use crate::page::{Page, PagedEntity, page_entities};
use crate::pagination::{CursorPagination, paginate_query, paginate_query_without_order_by};

/// Builder for a paginated SELECT, run on the executor a scope resolves to.
///
/// Awaiting the builder runs it:
///
/// ```no_run
/// # use sqlx_pg_conn_mgr::{ConnectionSource, DbScope};
/// # use sqlx_pg_toolkit::{CursorPagination, FetchPage, Page, PagedEntity, TableOrdering};
/// # async fn example<T>(source: &ConnectionSource, ordering: TableOrdering) -> sqlx_pg_toolkit::Result<()>
/// # where
/// #    T: PagedEntity + for<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> + Send + Unpin + 'static,
/// #    T::Cursor: serde::de::DeserializeOwned,
/// # {
/// let page: Page<T> = source
///    .fetch_page(&DbScope::new(), "SELECT * FROM blocks", ordering)
///    .pagination(CursorPagination::new(Some(20), None, None, None, false)?)
///    .await?;
/// # Ok(())
/// # }
/// ```
pub struct FetchPageBuilder<T> {
   source: ConnectionSource,
   scope: DbScope,
   query: String,
   args: Vec<SqlValue>,
   ordering: TableOrdering,
   pagination: CursorPagination,
   config: Option<PaginationConfig>,
   order_by: bool,
   entity: PhantomData<fn() -> T>,
}

impl<T> FetchPageBuilder<T>
where
   T: PagedEntity + for<'r> FromRow<'r, PgRow> + Send + Unpin + 'static,
   T::Cursor: DeserializeOwned,
{
   pub(crate) fn new(
      source: ConnectionSource,
      scope: DbScope,
      query: String,
      ordering: TableOrdering,
   ) -> Self {
      Self {
         source,
         scope,
         query,
         args: Vec::new(),
         ordering,
         pagination: CursorPagination::default(),
         config: None,
         order_by: true,
         entity: PhantomData,
      }
   }

   /// Bind values for the base query's own placeholders
   pub fn args(mut self, args: Vec<SqlValue>) -> Self {
      self.args = args;
      self
   }

   pub fn pagination(mut self, pagination: CursorPagination) -> Self {
      self.pagination = pagination;
      self
   }

   /// Apply a page-size policy before building the query
   pub fn config(mut self, config: PaginationConfig) -> Self {
      self.config = Some(config);
      self
   }

   /// Leave ordering to the base query (subquery or window) and append no
   /// `ORDER BY`.
   pub fn without_order_by(mut self) -> Self {
      self.order_by = false;
      self
   }

   /// Execute the paginated query and return the trimmed page
   pub async fn execute(self) -> Result<Page<T>, Error> {
      let pagination = match &self.config {
         Some(config) => self.pagination.with_defaults(config)?,
         None => self.pagination,
      };

      let (sql, args) = if self.order_by {
         paginate_query::<T::Cursor>(&self.query, self.args, &self.ordering, &pagination)?
      } else {
         paginate_query_without_order_by::<T::Cursor>(
            &self.query,
            self.args,
            &self.ordering,
            &pagination,
         )?
      };

      let rows: Vec<T> = self.source.fetch_all(&self.scope, &sql, args).await?;
      let (items, page_info) = page_entities(rows, &pagination)?;

      debug!(
         items = items.len(),
         has_next_page = page_info.has_next_page,
         has_previous_page = page_info.has_previous_page,
         "Fetched page"
      );

      Ok(Page { items, page_info })
   }
}

impl<T> IntoFuture for FetchPageBuilder<T>
where
   T: PagedEntity + for<'r> FromRow<'r, PgRow> + Send + Unpin + 'static,
   T::Cursor: DeserializeOwned,
{
   type Output = Result<Page<T>, Error>;
   type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + Send>>;

   fn into_future(self) -> Self::IntoFuture {
      Box::pin(self.execute())
   }
}

/// Paged fetches on a [`ConnectionSource`].
pub trait FetchPage {
   /// Start a paginated fetch of `query` ordered by `ordering`.
   fn fetch_page<T>(
      &self,
      scope: &DbScope,
      query: impl Into<String>,
      ordering: TableOrdering,
   ) -> FetchPageBuilder<T>
   where
      T: PagedEntity + for<'r> FromRow<'r, PgRow> + Send + Unpin + 'static,
      T::Cursor: DeserializeOwned;
}

impl FetchPage for ConnectionSource {
   fn fetch_page<T>(
      &self,
      scope: &DbScope,
      query: impl Into<String>,
      ordering: TableOrdering,
   ) -> FetchPageBuilder<T>
   where
      T: PagedEntity + for<'r> FromRow<'r, PgRow> + Send + Unpin + 'static,
      T::Cursor: DeserializeOwned,
   {
      FetchPageBuilder::new(self.clone(), scope.clone(), query.into(), ordering)
   }
}
