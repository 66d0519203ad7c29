//! # sqlx-pg-toolkit
//!
//! Relay-style cursor pagination for PostgreSQL entity stores built on
//! [`sqlx_pg_conn_mgr`].
//!
//! ## Core Types
//!
//! - **[`TableOrdering`]**: Validated list of ordering columns
//! - **[`Cursor`]**: Opaque, versioned page cursor
//! - **[`PageCursor`]**: Per-entity cursor mapping ordering columns to values
//! - **[`CursorPagination`]**: Forward (`first`/`after`) or backward
//!   (`last`/`before`) page request
//! - **[`PagedEntity`]** and **[`Page`]**: Rows that know their cursor, and the
//!   trimmed page with its [`PageInfo`]
//! - **[`FetchPage`]**: Paged fetches on a [`ConnectionSource`](sqlx_pg_conn_mgr::ConnectionSource)
//! - **[`Error`]**: Error type for pagination and paged fetches
//!
//! ## Paging
//!
//! [`paginate_query`] rewrites a base query into the paginated one: the
//! cursor predicate, the effective `ORDER BY` and an over-fetching `LIMIT`.
//! [`page_entities`] trims the rows it returns into the page. [`FetchPage`]
//! does both around a scope-resolved fetch.

mod builders;
mod config;
mod cursor;
mod error;
mod page;
pub mod ordering;
mod pagination;

// Re-export public types
pub use builders::{FetchPage, FetchPageBuilder};
pub use config::PaginationConfig;
pub use cursor::{Cursor, PageCursor};
pub use error::{Error, Result};
pub use ordering::{ColumnOrdering, SortDirection, TableOrdering, cursor_predicate};
pub use page::{Page, PageInfo, PagedEntity, page_entities};
pub use pagination::{
   CursorPagination, Direction, Offset, paginate_query, paginate_query_without_order_by,
};
pub use sqlx_pg_conn_mgr::SqlValue;
