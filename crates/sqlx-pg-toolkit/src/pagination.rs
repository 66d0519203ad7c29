//! Relay-style cursor pagination and SQL generation.
//!
//! A [`CursorPagination`] request pages either forward (`first`/`after`) or
//! backward (`last`/`before`) through an entity ordering. The engine appends
//! the cursor predicate, the effective `ORDER BY` and an over-fetching `LIMIT`
//! to a caller-supplied base query; [`page_entities`](crate::page_entities)
//! then trims the fetched rows into the final page.
//!
//! # How It Works
//!
//! The seek predicate is inclusive, so the cursor row itself comes back as
//! the first fetched row whenever it still exists. The limit therefore asks
//! for `N + 1` rows without a cursor (one extra row tells whether another page
//! follows) and `N + 2` with one (the cursor row plus the extra row).
//!
//! To fetch the rows closest to the page boundary first, the ordering is
//! reversed when paging backward through the natural order, and when paging
//! forward (or not at all) through a newest-first order.
//!
//! # Example
//!
//! ```
//! use sqlx_pg_toolkit::{ColumnOrdering, CursorPagination, TableOrdering, paginate_query};
//! # use serde::{Deserialize, Serialize};
//! # use sqlx_pg_toolkit::{PageCursor, SqlValue};
//! # #[derive(Serialize, Deserialize)]
//! # struct BlockCursor { vega_time: i64 }
//! # impl PageCursor for BlockCursor {
//! #    fn column_value(&self, _: &str) -> Option<SqlValue> { Some(self.vega_time.into()) }
//! # }
//!
//! let ordering = TableOrdering::new(vec![ColumnOrdering::asc("vega_time")]).unwrap();
//! let pagination = CursorPagination::new(Some(10), None, None, None, false).unwrap();
//!
//! let (sql, args) =
//!    paginate_query::<BlockCursor>("SELECT * FROM blocks", Vec::new(), &ordering, &pagination)
//!       .unwrap();
//!
//! assert_eq!(sql, "SELECT * FROM blocks ORDER BY vega_time ASC LIMIT 11");
//! assert!(args.is_empty());
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sqlx_pg_conn_mgr::SqlValue;
use tracing::trace;

use crate::config::PaginationConfig;
use crate::cursor::{Cursor, PageCursor};
use crate::ordering::{TableOrdering, cursor_predicate};
use crate::Error;

/// One direction of a pagination request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offset {
   /// Page size; `None` fetches everything past the cursor
   pub limit: Option<u32>,
   pub cursor: Option<Cursor>,
}

impl Offset {
   /// The cursor, unless absent or empty.
   pub fn cursor(&self) -> Option<&Cursor> {
      self.cursor.as_ref().filter(|c| !c.is_empty())
   }

   pub fn has_cursor(&self) -> bool {
      self.cursor().is_some()
   }
}

/// Relay-style pagination request.
///
/// At most one of `forward` and `backward` may be set. `newest_first` flips
/// the entity's natural ordering before any cursor logic applies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorPagination {
   pub forward: Option<Offset>,
   pub backward: Option<Offset>,
   #[serde(default)]
   pub newest_first: bool,
}

/// The active direction of a validated request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
   Forward,
   Backward,
}

impl CursorPagination {
   /// Build a request from Relay arguments.
   ///
   /// `after`/`before` are encoded cursors; empty strings count as absent.
   /// Mixing forward and backward arguments is rejected, as is a zero page
   /// size.
   pub fn new(
      first: Option<u32>,
      after: Option<&str>,
      last: Option<u32>,
      before: Option<&str>,
      newest_first: bool,
   ) -> Result<Self, Error> {
      let after = after.filter(|s| !s.is_empty());
      let before = before.filter(|s| !s.is_empty());

      let wants_forward = first.is_some() || after.is_some();
      let wants_backward = last.is_some() || before.is_some();
      if wants_forward && wants_backward {
         return Err(Error::AmbiguousPagination);
      }
      if first == Some(0) || last == Some(0) {
         return Err(Error::InvalidPageSize);
      }

      let offset = |limit: Option<u32>, cursor: Option<&str>| -> Result<Offset, Error> {
         Ok(Offset {
            limit,
            cursor: cursor.map(Cursor::decode).transpose()?,
         })
      };

      Ok(Self {
         forward: if wants_forward {
            Some(offset(first, after)?)
         } else {
            None
         },
         backward: if wants_backward {
            Some(offset(last, before)?)
         } else {
            None
         },
         newest_first,
      })
   }

   /// Check a request assembled by hand.
   pub fn validate(&self) -> Result<(), Error> {
      if self.forward.is_some() && self.backward.is_some() {
         return Err(Error::AmbiguousPagination);
      }
      if self.offset().and_then(|o| o.limit) == Some(0) {
         return Err(Error::InvalidPageSize);
      }

      Ok(())
   }

   pub fn has_forward(&self) -> bool {
      self.forward.is_some()
   }

   pub fn has_backward(&self) -> bool {
      self.backward.is_some()
   }

   /// The direction in use, if any.
   pub fn direction(&self) -> Option<Direction> {
      match (&self.forward, &self.backward) {
         (Some(_), _) => Some(Direction::Forward),
         (None, Some(_)) => Some(Direction::Backward),
         (None, None) => None,
      }
   }

   /// The offset of the direction in use.
   pub fn offset(&self) -> Option<&Offset> {
      self.forward.as_ref().or(self.backward.as_ref())
   }

   pub fn limit(&self) -> Option<u32> {
      self.offset().and_then(|o| o.limit)
   }

   pub fn cursor(&self) -> Option<&Cursor> {
      self.offset().and_then(Offset::cursor)
   }

   /// Whether the effective ordering is the reverse of the natural one.
   ///
   /// True when paging backward through the natural order, or forward (or
   /// without a direction) through a newest-first order.
   pub fn reverses_ordering(&self) -> bool {
      match self.direction() {
         Some(Direction::Backward) => !self.newest_first,
         Some(Direction::Forward) | None => self.newest_first,
      }
   }

   /// Apply configured page-size defaults and limits.
   ///
   /// A request without a direction becomes a forward request for the default
   /// page size; a direction without a limit gets the default page size.
   pub fn with_defaults(&self, config: &PaginationConfig) -> Result<Self, Error> {
      self.validate()?;
      if config.default_page_size == 0 {
         return Err(Error::InvalidPageSize);
      }

      let mut paged = self.clone();
      if paged.direction().is_none() {
         paged.forward = Some(Offset::default());
      }

      if let Some(offset) = paged.forward.as_mut().or(paged.backward.as_mut()) {
         let limit = *offset.limit.get_or_insert(config.default_page_size);
         if let Some(max) = config.max_page_size
            && limit > max
         {
            return Err(Error::PageSizeTooLarge {
               requested: limit,
               max,
            });
         }
      }

      Ok(paged)
   }
}

/// Check whether `keyword` appears as a standalone keyword at position `i`
/// in the uppercased byte slice `bytes` (length `len`).
///
/// "Standalone" means the character before and after the keyword (if present)
/// is not an identifier character (`[A-Z0-9_]`).
fn is_keyword_at(bytes: &[u8], len: usize, i: usize, keyword: &[u8]) -> bool {
   let klen = keyword.len();
   if i + klen > len {
      return false;
   }
   if &bytes[i..i + klen] != keyword {
      return false;
   }
   let before_ok = i == 0 || !is_ident_byte(bytes[i - 1]);
   let after_ok = i + klen >= len || !is_ident_byte(bytes[i + klen]);

   before_ok && after_ok
}

fn is_ident_byte(b: u8) -> bool {
   b.is_ascii_alphanumeric() || b == b'_'
}

/// `ORDER` and `BY` separated by any run of whitespace.
fn is_order_by_at(bytes: &[u8], len: usize, i: usize) -> bool {
   if !is_keyword_at(bytes, len, i, b"ORDER") {
      return false;
   }

   let mut j = i + 5;
   while j < len && bytes[j].is_ascii_whitespace() {
      j += 1;
   }

   j > i + 5 && is_keyword_at(bytes, len, j, b"BY")
}

/// Advance the scanner index past a quoted literal or identifier.
///
/// `quote` is the opening quote character (`'` or `"`). The scanner handles
/// SQL-standard doubled-quote escaping (`''` or `""`).
fn skip_quoted(bytes: &[u8], len: usize, i: usize, quote: u8) -> usize {
   let mut j = i + 1;
   while j < len {
      if bytes[j] == quote {
         // Doubled quote is an escape
         if j + 1 < len && bytes[j + 1] == quote {
            j += 2;
            continue;
         }
         return j;
      }
      j += 1;
   }
   j
}

/// Advance past a dollar-quoted string (`$$...$$` or `$tag$...$tag$`).
///
/// Returns `None` when the `$` at `i` starts a positional parameter (`$1`)
/// rather than a dollar quote.
fn skip_dollar_quoted(bytes: &[u8], len: usize, i: usize) -> Option<usize> {
   let mut j = i + 1;
   if j < len && (bytes[j].is_ascii_alphabetic() || bytes[j] == b'_') {
      while j < len && is_ident_byte(bytes[j]) {
         j += 1;
      }
   }
   if j >= len || bytes[j] != b'$' {
      return None;
   }

   let tag = &bytes[i..=j];
   let mut k = j + 1;
   while k + tag.len() <= len {
      if &bytes[k..k + tag.len()] == tag {
         return Some(k + tag.len() - 1);
      }
      k += 1;
   }
   Some(len)
}

/// Advance the scanner index past a `--` line comment (until newline or end).
fn skip_line_comment(bytes: &[u8], len: usize, i: usize) -> usize {
   let mut j = i + 2;
   while j < len && bytes[j] != b'\n' {
      j += 1;
   }
   j
}

/// Advance the scanner index past a `/* … */` block comment.
fn skip_block_comment(bytes: &[u8], len: usize, i: usize) -> usize {
   let mut j = i + 2;
   while j + 1 < len {
      if bytes[j] == b'*' && bytes[j + 1] == b'/' {
         return j + 1;
      }
      j += 1;
   }
   len.saturating_sub(1)
}

/// Scan the uppercased query, calling `on_keyword` at each top-level position
/// (depth == 0, outside quotes and comments).
///
/// `on_keyword` receives `(uppercased_bytes, len, position)` and returns
/// `Some(T)` to short-circuit or `None` to keep scanning.
fn scan_top_level<T>(
   query: &str,
   mut on_keyword: impl FnMut(&[u8], usize, usize) -> Option<T>,
) -> Option<T> {
   let upper = query.to_ascii_uppercase();
   let bytes = upper.as_bytes();
   let len = bytes.len();
   let mut depth: i32 = 0;
   let mut i = 0;

   while i < len {
      match bytes[i] {
         b'(' => depth += 1,
         b')' => depth -= 1,
         b'\'' => {
            i = skip_quoted(bytes, len, i, b'\'');
         }
         b'"' => {
            i = skip_quoted(bytes, len, i, b'"');
         }
         b'$' if i == 0 || !is_ident_byte(bytes[i - 1]) => {
            if let Some(end) = skip_dollar_quoted(bytes, len, i) {
               i = end;
            }
         }
         b'-' if i + 1 < len && bytes[i + 1] == b'-' => {
            i = skip_line_comment(bytes, len, i);
         }
         b'/' if i + 1 < len && bytes[i + 1] == b'*' => {
            i = skip_block_comment(bytes, len, i);
         }
         _ if depth == 0 => {
            if let Some(result) = on_keyword(bytes, len, i) {
               return Some(result);
            }
         }
         _ => {}
      }
      i += 1;
   }

   None
}

/// Validate that a base query does not contain top-level ORDER BY or LIMIT.
///
/// These clauses conflict with the pagination logic, which appends its own
/// ORDER BY and LIMIT. Clauses inside parenthesized subexpressions (subqueries,
/// window definitions), comments, and string literals are allowed.
pub(crate) fn validate_base_query(query: &str) -> Result<(), Error> {
   let found_forbidden = scan_top_level(query, |bytes, len, i| {
      if is_order_by_at(bytes, len, i) || is_keyword_at(bytes, len, i, b"LIMIT") {
         return Some(());
      }
      None
   });

   if found_forbidden.is_some() {
      return Err(Error::InvalidPaginationQuery);
   }

   Ok(())
}

/// Detect whether a base query has a WHERE clause at paren depth 0.
pub(crate) fn has_top_level_where(query: &str) -> bool {
   scan_top_level(query, |bytes, len, i| {
      if is_keyword_at(bytes, len, i, b"WHERE") {
         Some(())
      } else {
         None
      }
   })
   .is_some()
}

/// Paginate `query` with `ordering`, appending `ORDER BY`.
///
/// `args` are the bind values of the base query; cursor values are appended
/// after them. `C` is the entity cursor type the request's cursor decodes to.
///
/// Returns the final SQL and its full argument list.
pub fn paginate_query<C>(
   query: &str,
   args: Vec<SqlValue>,
   ordering: &TableOrdering,
   pagination: &CursorPagination,
) -> Result<(String, Vec<SqlValue>), Error>
where
   C: PageCursor + DeserializeOwned,
{
   build_paginated_query::<C>(query, args, ordering, pagination, true)
}

/// Like [`paginate_query`], for queries whose ordering is already expressed
/// upstream (in a subquery or window), so no `ORDER BY` is appended.
pub fn paginate_query_without_order_by<C>(
   query: &str,
   args: Vec<SqlValue>,
   ordering: &TableOrdering,
   pagination: &CursorPagination,
) -> Result<(String, Vec<SqlValue>), Error>
where
   C: PageCursor + DeserializeOwned,
{
   build_paginated_query::<C>(query, args, ordering, pagination, false)
}

fn build_paginated_query<C>(
   query: &str,
   mut args: Vec<SqlValue>,
   ordering: &TableOrdering,
   pagination: &CursorPagination,
   with_order_by: bool,
) -> Result<(String, Vec<SqlValue>), Error>
where
   C: PageCursor + DeserializeOwned,
{
   pagination.validate()?;
   validate_base_query(query)?;

   let effective;
   let ordering = if pagination.reverses_ordering() {
      effective = ordering.reversed();
      &effective
   } else {
      ordering
   };

   let mut sql = query.trim_end().trim_end_matches(';').trim_end().to_string();

   let cursor = pagination.cursor();
   if let Some(cursor) = cursor {
      let decoded = C::parse(cursor)?;
      let (predicate, with_cursor) = cursor_predicate(args, &decoded, ordering)?;
      args = with_cursor;

      if has_top_level_where(&sql) {
         sql = format!("{} AND ({})", sql, predicate);
      } else {
         sql = format!("{} WHERE ({})", sql, predicate);
      }
   }

   if with_order_by {
      sql = format!("{} {}", sql, ordering.order_by_clause());
   }

   if let Some(limit) = pagination.limit() {
      let extra = if cursor.is_some() { 2 } else { 1 };
      sql = format!("{} LIMIT {}", sql, u64::from(limit) + extra);
   }

   trace!(sql = %sql, args = args.len(), "Built paginated query");
   Ok((sql, args))
}
