//! Turning over-fetched rows into a page.

use serde::Serialize;
use tracing::trace;

use crate::Error;
use crate::cursor::{Cursor, PageCursor};
use crate::pagination::{CursorPagination, Direction};

/// An entity that can be paged: every row knows its own cursor.
pub trait PagedEntity {
   type Cursor: PageCursor + Serialize;

   fn cursor(&self) -> Self::Cursor;
}

/// Relay page metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
   pub has_next_page: bool,
   pub has_previous_page: bool,
   pub start_cursor: Option<Cursor>,
   pub end_cursor: Option<Cursor>,
}

/// One page of entities.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
   pub items: Vec<T>,
   pub page_info: PageInfo,
}

/// Trim rows fetched with a query from
/// [`paginate_query`](crate::paginate_query) into the requested page.
///
/// `rows` must be in the order the paginated query returned them. The result
/// is in display order.
pub fn page_entities<T: PagedEntity>(
   mut rows: Vec<T>,
   pagination: &CursorPagination,
) -> Result<(Vec<T>, PageInfo), Error> {
   let fetched = rows.len();

   let mut cursor_seen = false;
   if let Some(cursor) = pagination.cursor()
      && let Some(first) = rows.first()
      && first.cursor().to_cursor()? == *cursor
   {
      rows.remove(0);
      cursor_seen = true;
   }

   let mut truncated = false;
   if let Some(limit) = pagination.limit() {
      let limit = limit as usize;
      if rows.len() > limit {
         rows.truncate(limit);
         truncated = true;
      }
   }

   let (has_next_page, has_previous_page) = match pagination.direction() {
      Some(Direction::Backward) => {
         rows.reverse();
         (cursor_seen, truncated)
      }
      Some(Direction::Forward) | None => (truncated, cursor_seen),
   };

   let start_cursor = rows.first().map(|r| r.cursor().to_cursor()).transpose()?;
   let end_cursor = rows.last().map(|r| r.cursor().to_cursor()).transpose()?;

   trace!(
      fetched,
      returned = rows.len(),
      has_next_page,
      has_previous_page,
      "Trimmed page"
   );

   Ok((
      rows,
      PageInfo {
         has_next_page,
         has_previous_page,
         start_cursor,
         end_cursor,
      },
   ))
}
