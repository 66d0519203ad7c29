use serde::Deserialize;

/// Page-size policy applied by [`CursorPagination::with_defaults`](crate::CursorPagination::with_defaults).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PaginationConfig {
   /// Limit used when a request names no page size
   pub default_page_size: u32,
   /// Largest page size a request may ask for; `None` allows any
   pub max_page_size: Option<u32>,
}

impl Default for PaginationConfig {
   fn default() -> Self {
      Self {
         default_page_size: 1000,
         max_page_size: None,
      }
   }
}
