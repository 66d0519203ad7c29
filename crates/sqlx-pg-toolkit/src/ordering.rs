//! Orderings over entity rows and the cursor seek predicate.
//!
//! A [`TableOrdering`] is a list of columns with a direction each. The columns
//! together must identify a row uniquely (for most entities that means ending
//! with a unique column such as `id`), otherwise rows that tie on every column
//! can be skipped or repeated between pages.
//!
//! # Example
//!
//! ```
//! use sqlx_pg_toolkit::ordering::{ColumnOrdering, TableOrdering};
//!
//! let ordering = TableOrdering::new(vec![
//!    ColumnOrdering::asc("vega_time"),
//!    ColumnOrdering::asc("id"),
//! ])
//! .unwrap();
//!
//! assert_eq!(ordering.order_by_clause(), "ORDER BY vega_time ASC, id ASC");
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx_pg_conn_mgr::{SqlValue, is_valid_identifier, next_bind_var};

use crate::Error;
use crate::cursor::PageCursor;

/// Sort direction for an ordering column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
   /// Ascending order (smallest first)
   Asc,
   /// Descending order (largest first)
   Desc,
}

impl SortDirection {
   /// Return the opposite sort direction.
   pub fn reversed(self) -> Self {
      match self {
         SortDirection::Asc => SortDirection::Desc,
         SortDirection::Desc => SortDirection::Asc,
      }
   }

   pub fn as_sql(self) -> &'static str {
      match self {
         SortDirection::Asc => "ASC",
         SortDirection::Desc => "DESC",
      }
   }

   /// Comparison selecting rows that come after a value in this direction.
   fn seek_operator(self, inclusive: bool) -> &'static str {
      match (self, inclusive) {
         (SortDirection::Asc, false) => ">",
         (SortDirection::Asc, true) => ">=",
         (SortDirection::Desc, false) => "<",
         (SortDirection::Desc, true) => "<=",
      }
   }
}

impl FromStr for SortDirection {
   type Err = Error;

   fn from_str(s: &str) -> Result<Self, Error> {
      if s.eq_ignore_ascii_case("ASC") {
         Ok(SortDirection::Asc)
      } else if s.eq_ignore_ascii_case("DESC") {
         Ok(SortDirection::Desc)
      } else {
         Err(Error::UnknownSortDirection(s.to_string()))
      }
   }
}

impl fmt::Display for SortDirection {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.write_str(self.as_sql())
   }
}

/// One sort key of an ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnOrdering {
   /// Column name; also the key the entity cursor is asked for
   pub name: String,
   pub direction: SortDirection,
   /// Table alias used to qualify the column in joins
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub prefix: Option<String>,
}

impl ColumnOrdering {
   /// Create an ordering column with ascending sort direction.
   pub fn asc(name: impl Into<String>) -> Self {
      Self {
         name: name.into(),
         direction: SortDirection::Asc,
         prefix: None,
      }
   }

   /// Create an ordering column with descending sort direction.
   pub fn desc(name: impl Into<String>) -> Self {
      Self {
         name: name.into(),
         direction: SortDirection::Desc,
         prefix: None,
      }
   }

   /// Create an ordering column from a textual direction (`ASC`/`DESC`).
   pub fn parse(name: impl Into<String>, direction: &str) -> Result<Self, Error> {
      Ok(Self {
         name: name.into(),
         direction: direction.parse()?,
         prefix: None,
      })
   }

   /// Qualify the column with a table alias, e.g. `o.vega_time`.
   pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
      self.prefix = Some(prefix.into());
      self
   }

   /// The column as it appears in generated SQL.
   pub fn qualified_name(&self) -> String {
      match &self.prefix {
         Some(prefix) => format!("{}.{}", prefix, self.name),
         None => self.name.clone(),
      }
   }

   fn reversed(&self) -> Self {
      Self {
         direction: self.direction.reversed(),
         ..self.clone()
      }
   }

   fn validate(&self) -> Result<(), Error> {
      let names = std::iter::once(self.name.as_str()).chain(self.prefix.as_deref());
      for name in names {
         if !is_valid_identifier(name) {
            return Err(Error::InvalidColumnName {
               name: name.to_string(),
            });
         }
      }

      Ok(())
   }
}

/// Non-empty, validated list of ordering columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct TableOrdering {
   columns: Vec<ColumnOrdering>,
}

impl TableOrdering {
   /// Build an ordering, rejecting empty lists and unsafe column names.
   pub fn new(columns: Vec<ColumnOrdering>) -> Result<Self, Error> {
      if columns.is_empty() {
         return Err(Error::EmptyOrdering);
      }
      for column in &columns {
         column.validate()?;
      }

      Ok(Self { columns })
   }

   pub fn columns(&self) -> &[ColumnOrdering] {
      &self.columns
   }

   pub fn len(&self) -> usize {
      self.columns.len()
   }

   pub fn is_empty(&self) -> bool {
      self.columns.is_empty()
   }

   /// The same columns with every direction flipped.
   pub fn reversed(&self) -> Self {
      Self {
         columns: self.columns.iter().map(ColumnOrdering::reversed).collect(),
      }
   }

   /// `ORDER BY a ASC, b DESC`
   pub fn order_by_clause(&self) -> String {
      let parts: Vec<String> = self
         .columns
         .iter()
         .map(|c| format!("{} {}", c.qualified_name(), c.direction))
         .collect();

      format!("ORDER BY {}", parts.join(", "))
   }
}

impl<'de> Deserialize<'de> for TableOrdering {
   fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
      let columns = Vec::<ColumnOrdering>::deserialize(deserializer)?;
      TableOrdering::new(columns).map_err(serde::de::Error::custom)
   }
}

/// Build the predicate selecting the cursor's row and every row after it.
///
/// Cursor values are appended to `args`, so placeholders continue after the
/// caller's own (`$len+1`, ...). Each value is bound once and reused by every
/// clause that compares against it.
///
/// For `[a ASC, b DESC, c ASC]`:
///
/// ```text
/// (a > $1) OR (a = $1 AND b < $2) OR (a = $1 AND b = $2 AND c >= $3)
/// ```
///
/// Only the last column compares inclusively, which keeps the cursor row
/// itself in the result.
pub fn cursor_predicate<C: PageCursor + ?Sized>(
   mut args: Vec<SqlValue>,
   cursor: &C,
   ordering: &TableOrdering,
) -> Result<(String, Vec<SqlValue>), Error> {
   let mut placeholders = Vec::with_capacity(ordering.len());
   for column in ordering.columns() {
      let value = cursor
         .column_value(&column.name)
         .ok_or_else(|| Error::MissingColumnValue {
            column: column.name.clone(),
         })?;
      placeholders.push(next_bind_var(&mut args, value));
   }

   let last = ordering.len() - 1;
   let mut clauses = Vec::with_capacity(ordering.len());

   for (level, column) in ordering.columns().iter().enumerate() {
      let mut parts: Vec<String> = ordering.columns()[..level]
         .iter()
         .zip(&placeholders)
         .map(|(prev, placeholder)| format!("{} = {}", prev.qualified_name(), placeholder))
         .collect();

      parts.push(format!(
         "{} {} {}",
         column.qualified_name(),
         column.direction.seek_operator(level == last),
         placeholders[level]
      ));

      clauses.push(format!("({})", parts.join(" AND ")));
   }

   Ok((clauses.join(" OR "), args))
}
