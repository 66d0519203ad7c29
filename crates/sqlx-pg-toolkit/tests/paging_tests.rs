//! End-to-end paging over blocks.
//!
//! Most tests run the generated SQL against a small in-memory evaluator that
//! understands exactly what the pagination engine emits: a cursor predicate of
//! `col op $n` comparisons, `ORDER BY` and `LIMIT`. The last test needs a live
//! PostgreSQL server at `DATABASE_URL` and is ignored by default.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use sqlx::Row;
use sqlx::postgres::PgRow;
use sqlx_pg_conn_mgr::{ConnectionSource, DbScope, PgDatabase, PgDatabaseConfig};
use sqlx_pg_toolkit::{
   ColumnOrdering, Cursor, CursorPagination, Error, FetchPage, Offset, PageCursor, PageInfo,
   PagedEntity, SqlValue, TableOrdering, page_entities, paginate_query,
};

#[derive(Debug, Clone, PartialEq)]
struct Block {
   vega_time: i64,
   id: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct BlockCursor {
   vega_time: i64,
   id: i64,
}

impl PageCursor for BlockCursor {
   fn column_value(&self, column: &str) -> Option<SqlValue> {
      match column {
         "vega_time" => Some(self.vega_time.into()),
         "id" => Some(self.id.into()),
         _ => None,
      }
   }
}

impl PagedEntity for Block {
   type Cursor = BlockCursor;

   fn cursor(&self) -> BlockCursor {
      BlockCursor {
         vega_time: self.vega_time,
         id: self.id,
      }
   }
}

impl<'r> sqlx::FromRow<'r, PgRow> for Block {
   fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
      Ok(Self {
         vega_time: row.try_get("vega_time")?,
         id: row.try_get("id")?,
      })
   }
}

fn blocks(count: i64) -> Vec<Block> {
   (0..count)
      .map(|id| Block {
         vega_time: 1_000 + id * 10,
         id,
      })
      .collect()
}

fn ordering() -> TableOrdering {
   TableOrdering::new(vec![ColumnOrdering::asc("vega_time"), ColumnOrdering::asc("id")]).unwrap()
}

fn cursor_of(block: &Block) -> String {
   block.cursor().to_cursor().unwrap().encode()
}

fn ids(rows: &[Block]) -> Vec<i64> {
   rows.iter().map(|b| b.id).collect()
}

// ─── in-memory evaluation of generated SQL ───

fn column(block: &Block, name: &str) -> i64 {
   match name {
      "vega_time" => block.vega_time,
      "id" => block.id,
      other => panic!("unknown column {other}"),
   }
}

fn bound_int(args: &[SqlValue], placeholder: &str) -> i64 {
   let index: usize = placeholder.trim_start_matches('$').parse().unwrap();
   match &args[index - 1] {
      SqlValue::Int(v) => *v,
      other => panic!("unexpected bind value {other:?}"),
   }
}

fn comparison_holds(block: &Block, comparison: &str, args: &[SqlValue]) -> bool {
   let parts: Vec<&str> = comparison.split_whitespace().collect();
   let [name, op, placeholder] = parts.as_slice() else {
      panic!("unexpected comparison {comparison}");
   };

   let lhs = column(block, name);
   let rhs = bound_int(args, placeholder);
   match *op {
      "=" => lhs == rhs,
      ">" => lhs > rhs,
      ">=" => lhs >= rhs,
      "<" => lhs < rhs,
      "<=" => lhs <= rhs,
      other => panic!("unexpected operator {other}"),
   }
}

fn predicate_holds(block: &Block, predicate: &str, args: &[SqlValue]) -> bool {
   let inner = predicate
      .strip_prefix('(')
      .and_then(|p| p.strip_suffix(')'))
      .unwrap();

   inner.split(" OR ").any(|clause| {
      clause
         .trim_start_matches('(')
         .trim_end_matches(')')
         .split(" AND ")
         .all(|comparison| comparison_holds(block, comparison, args))
   })
}

fn compare_by(a: &Block, b: &Block, order_by: &str) -> Ordering {
   order_by.split(", ").fold(Ordering::Equal, |acc, key| {
      acc.then_with(|| {
         let (name, direction) = key.split_once(' ').unwrap();
         let ordering = column(a, name).cmp(&column(b, name));
         if direction == "DESC" {
            ordering.reverse()
         } else {
            ordering
         }
      })
   })
}

fn simulate(table: &[Block], sql: &str, args: &[SqlValue]) -> Vec<Block> {
   let (rest, limit) = match sql.rsplit_once(" LIMIT ") {
      Some((rest, limit)) => (rest, Some(limit.parse::<usize>().unwrap())),
      None => (sql, None),
   };
   let (rest, order_by) = match rest.rsplit_once(" ORDER BY ") {
      Some((rest, order_by)) => (rest, Some(order_by)),
      None => (rest, None),
   };
   let predicate = rest.split_once(" WHERE ").map(|(_, predicate)| predicate);

   let mut rows: Vec<Block> = table
      .iter()
      .filter(|b| predicate.is_none_or(|p| predicate_holds(b, p, args)))
      .cloned()
      .collect();
   if let Some(order_by) = order_by {
      rows.sort_by(|a, b| compare_by(a, b, order_by));
   }
   if let Some(limit) = limit {
      rows.truncate(limit);
   }

   rows
}

fn fetch(table: &[Block], pagination: &CursorPagination) -> (Vec<Block>, PageInfo) {
   let (sql, args) =
      paginate_query::<BlockCursor>("SELECT * FROM blocks", Vec::new(), &ordering(), pagination)
         .unwrap();
   let rows = simulate(table, &sql, &args);
   page_entities(rows, pagination).unwrap()
}

fn forward(first: u32, after: Option<&str>) -> CursorPagination {
   CursorPagination::new(Some(first), after, None, None, false).unwrap()
}

fn backward(last: u32, before: Option<&str>) -> CursorPagination {
   CursorPagination::new(None, None, Some(last), before, false).unwrap()
}

// ─── scenarios ───

#[test]
fn first_and_last_pages_of_ten_blocks() {
   let table = blocks(10);

   let (rows, info) = fetch(&table, &forward(3, None));
   assert_eq!(ids(&rows), vec![0, 1, 2]);
   assert!(info.has_next_page);
   assert!(!info.has_previous_page);

   let (rows, info) = fetch(&table, &backward(3, None));
   assert_eq!(ids(&rows), vec![7, 8, 9]);
   assert!(!info.has_next_page);
   assert!(info.has_previous_page);
}

#[test]
fn forward_walk_visits_every_block_once() {
   let table = blocks(10);
   let mut seen = Vec::new();
   let mut after: Option<String> = None;

   loop {
      let (rows, info) = fetch(&table, &forward(3, after.as_deref()));
      assert_eq!(info.has_previous_page, after.is_some());
      seen.extend(ids(&rows));

      if !info.has_next_page {
         break;
      }
      after = info.end_cursor.map(|c| c.encode());
   }

   assert_eq!(seen, (0..10).collect::<Vec<_>>());
}

#[test]
fn backward_walk_visits_every_block_once() {
   let table = blocks(10);
   let mut pages = Vec::new();
   let mut before: Option<String> = None;

   loop {
      let (rows, info) = fetch(&table, &backward(4, before.as_deref()));
      assert_eq!(info.has_next_page, before.is_some());
      pages.push(ids(&rows));

      if !info.has_previous_page {
         break;
      }
      before = info.start_cursor.map(|c| c.encode());
   }

   assert_eq!(pages, vec![vec![6, 7, 8, 9], vec![2, 3, 4, 5], vec![0, 1]]);
}

#[test]
fn forward_and_backward_pages_agree() {
   let table = blocks(10);
   let n = 3;

   for k in 0..=5 {
      let (ahead, _) = fetch(&table, &forward(n, Some(&cursor_of(&table[k]))));
      let (behind, _) = fetch(&table, &backward(n, Some(&cursor_of(&table[k + 4]))));

      assert_eq!(ahead, behind, "k = {k}");
      assert_eq!(ids(&ahead), vec![k as i64 + 1, k as i64 + 2, k as i64 + 3]);
   }
}

#[test]
fn newest_first_pages_from_the_end() {
   let table = blocks(10);

   let pagination = CursorPagination::new(Some(3), None, None, None, true).unwrap();
   let (rows, info) = fetch(&table, &pagination);
   assert_eq!(ids(&rows), vec![9, 8, 7]);
   assert!(info.has_next_page);
   assert!(!info.has_previous_page);

   let after = info.end_cursor.unwrap().encode();
   let pagination = CursorPagination::new(Some(3), Some(&after), None, None, true).unwrap();
   let (rows, info) = fetch(&table, &pagination);
   assert_eq!(ids(&rows), vec![6, 5, 4]);
   assert!(info.has_next_page);
   assert!(info.has_previous_page);

   // Last page of a newest-first listing holds the oldest blocks
   let pagination = CursorPagination::new(None, None, Some(3), None, true).unwrap();
   let (rows, info) = fetch(&table, &pagination);
   assert_eq!(ids(&rows), vec![2, 1, 0]);
   assert!(!info.has_next_page);
   assert!(info.has_previous_page);
}

#[test]
fn ties_on_leading_column_are_broken_by_id() {
   // Three blocks share each timestamp
   let table: Vec<Block> = (0..9)
      .map(|id| Block {
         vega_time: id / 3,
         id,
      })
      .collect();

   let mut seen = Vec::new();
   let mut after: Option<String> = None;
   loop {
      let (rows, info) = fetch(&table, &forward(2, after.as_deref()));
      seen.extend(ids(&rows));
      if !info.has_next_page {
         break;
      }
      after = info.end_cursor.map(|c| c.encode());
   }

   assert_eq!(seen, (0..9).collect::<Vec<_>>());
}

#[test]
fn unbounded_request_returns_all_rows() {
   let table = blocks(10);
   let (rows, info) = fetch(&table, &CursorPagination::default());

   assert_eq!(rows, table);
   assert!(!info.has_next_page);
   assert!(!info.has_previous_page);
}

#[test]
fn malformed_cursors_are_rejected() {
   assert!(matches!(
      CursorPagination::new(Some(3), Some("not a cursor"), None, None, false),
      Err(Error::CursorParseFailure(_))
   ));

   let pagination = CursorPagination {
      forward: Some(Offset {
         limit: Some(3),
         cursor: Some(Cursor::new(r#"{"height":12}"#)),
      }),
      ..Default::default()
   };
   let result =
      paginate_query::<BlockCursor>("SELECT * FROM blocks", Vec::new(), &ordering(), &pagination);
   assert!(matches!(result, Err(Error::CursorParseFailure(_))));
}

// ─── PostgreSQL ───

#[tokio::test]
#[ignore = "requires PostgreSQL at DATABASE_URL"]
async fn fetch_page_against_postgres() {
   let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
   let db = PgDatabase::connect(&PgDatabaseConfig::from_url(url)).await.unwrap();
   let source = ConnectionSource::new(db);
   let scope = DbScope::new();

   source
      .execute(&scope, "DROP TABLE IF EXISTS paging_blocks", Vec::new())
      .await
      .unwrap();
   source
      .execute(
         &scope,
         "CREATE TABLE paging_blocks (vega_time BIGINT NOT NULL, id BIGINT PRIMARY KEY)",
         Vec::new(),
      )
      .await
      .unwrap();
   let rows = blocks(10)
      .into_iter()
      .map(|b| vec![SqlValue::from(b.vega_time), SqlValue::from(b.id)])
      .collect();
   source
      .copy_from(&scope, "paging_blocks", &["vega_time", "id"], rows)
      .await
      .unwrap();

   let page = source
      .fetch_page::<Block>(&scope, "SELECT vega_time, id FROM paging_blocks", ordering())
      .pagination(forward(3, None))
      .await
      .unwrap();
   assert_eq!(ids(&page.items), vec![0, 1, 2]);
   assert!(page.page_info.has_next_page);

   let after = page.page_info.end_cursor.unwrap().encode();
   let page = source
      .fetch_page::<Block>(
         &scope,
         "SELECT vega_time, id FROM paging_blocks WHERE id <> $1",
         ordering(),
      )
      .args(vec![SqlValue::from(4_i64)])
      .pagination(forward(3, Some(&after)))
      .await
      .unwrap();
   assert_eq!(ids(&page.items), vec![3, 5, 6]);
   assert!(page.page_info.has_previous_page);

   let page = source
      .fetch_page::<Block>(&scope, "SELECT vega_time, id FROM paging_blocks", ordering())
      .pagination(backward(3, None))
      .await
      .unwrap();
   assert_eq!(ids(&page.items), vec![7, 8, 9]);
   assert!(page.page_info.has_previous_page);
   assert!(!page.page_info.has_next_page);
}
