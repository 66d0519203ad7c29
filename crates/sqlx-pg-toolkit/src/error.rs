/// Result type alias for toolkit operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for pagination and paged fetches.
#[derive(Debug, thiserror::Error)]
pub enum Error {
   /// Error from SQLx operations, including statements run by the
   /// connection manager.
   #[error(transparent)]
   Sqlx(#[from] sqlx::Error),

   /// Error from the connection manager other than a plain SQLx failure.
   #[error(transparent)]
   ConnectionManager(sqlx_pg_conn_mgr::Error),

   /// Sort direction text other than `ASC` or `DESC`.
   #[error("unknown sort direction '{0}': expected ASC or DESC")]
   UnknownSortDirection(String),

   /// An ordering needs at least one column.
   #[error("ordering requires at least one column")]
   EmptyOrdering,

   /// Ordering column name or prefix contains invalid characters.
   ///
   /// Names and prefixes must match `[a-zA-Z_][a-zA-Z0-9_]*`.
   #[error("invalid ordering column name '{name}': must match [a-zA-Z_][a-zA-Z0-9_]*")]
   InvalidColumnName { name: String },

   /// The cursor has no value for one of the ordering columns.
   #[error("cursor has no value for ordering column '{column}'")]
   MissingColumnValue { column: String },

   /// Cursor string is not a valid encoded cursor for this entity.
   #[error("failed to parse cursor: {0}")]
   CursorParseFailure(String),

   /// Entity cursor could not be serialized.
   #[error("failed to encode cursor: {0}")]
   CursorEncodeFailure(#[source] serde_json::Error),

   /// Forward (`first`/`after`) and backward (`last`/`before`) arguments
   /// were combined.
   #[error("cannot paginate forward (first/after) and backward (last/before) at the same time")]
   AmbiguousPagination,

   /// Page size must be greater than zero.
   #[error("page size must be greater than zero")]
   InvalidPageSize,

   /// Page size exceeds the configured maximum.
   #[error("page size {requested} exceeds the maximum of {max}")]
   PageSizeTooLarge { requested: u32, max: u32 },

   /// Pagination base query must not contain top-level ORDER BY or LIMIT clauses.
   #[error(
      "pagination base query must not contain top-level ORDER BY or LIMIT clauses (these are added automatically; subquery usage is fine)"
   )]
   InvalidPaginationQuery,
}

impl From<sqlx_pg_conn_mgr::Error> for Error {
   fn from(err: sqlx_pg_conn_mgr::Error) -> Self {
      match err {
         sqlx_pg_conn_mgr::Error::Sqlx(e) => Error::Sqlx(e),
         other => Error::ConnectionManager(other),
      }
   }
}

impl Error {
   /// Extract a structured error code from the error type.
   ///
   /// This provides machine-readable error codes for error handling.
   pub fn error_code(&self) -> String {
      match self {
         Error::Sqlx(e) => {
            if let Some(code) = e.as_database_error().and_then(|db_err| db_err.code()) {
               return format!("PG_{}", code);
            }
            "SQLX_ERROR".to_string()
         }
         Error::ConnectionManager(e) => match e {
            sqlx_pg_conn_mgr::Error::NoActiveTransaction => "NO_ACTIVE_TRANSACTION".to_string(),
            sqlx_pg_conn_mgr::Error::DatabaseClosed => "DATABASE_CLOSED".to_string(),
            _ => "CONNECTION_ERROR".to_string(),
         },
         Error::UnknownSortDirection(_) => "UNKNOWN_SORT_DIRECTION".to_string(),
         Error::EmptyOrdering => "EMPTY_ORDERING".to_string(),
         Error::InvalidColumnName { .. } => "INVALID_COLUMN_NAME".to_string(),
         Error::MissingColumnValue { .. } => "MISSING_COLUMN_VALUE".to_string(),
         Error::CursorParseFailure(_) => "CURSOR_PARSE_FAILURE".to_string(),
         Error::CursorEncodeFailure(_) => "CURSOR_ENCODE_FAILURE".to_string(),
         Error::AmbiguousPagination => "AMBIGUOUS_PAGINATION".to_string(),
         Error::InvalidPageSize => "INVALID_PAGE_SIZE".to_string(),
         Error::PageSizeTooLarge { .. } => "PAGE_SIZE_TOO_LARGE".to_string(),
         Error::InvalidPaginationQuery => "INVALID_PAGINATION_QUERY".to_string(),
      }
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_error_code_sqlx_non_database() {
      // RowNotFound is not a database error, so no PostgreSQL code
      let err = Error::Sqlx(sqlx::Error::RowNotFound);
      assert_eq!(err.error_code(), "SQLX_ERROR");
   }

   #[test]
   fn test_connection_manager_sqlx_errors_unwrap() {
      let err = Error::from(sqlx_pg_conn_mgr::Error::Sqlx(sqlx::Error::RowNotFound));
      assert!(matches!(err, Error::Sqlx(sqlx::Error::RowNotFound)));
      assert_eq!(err.error_code(), "SQLX_ERROR");
   }

   #[test]
   fn test_error_code_connection_manager() {
      let err = Error::from(sqlx_pg_conn_mgr::Error::NoActiveTransaction);
      assert_eq!(err.error_code(), "NO_ACTIVE_TRANSACTION");

      let err = Error::from(sqlx_pg_conn_mgr::Error::DatabaseClosed);
      assert_eq!(err.error_code(), "DATABASE_CLOSED");

      let err = Error::from(sqlx_pg_conn_mgr::Error::ConnectionInUse);
      assert_eq!(err.error_code(), "CONNECTION_ERROR");
   }

   #[test]
   fn test_error_code_unknown_sort_direction() {
      let err = Error::UnknownSortDirection("SIDEWAYS".into());
      assert_eq!(err.error_code(), "UNKNOWN_SORT_DIRECTION");
      assert!(err.to_string().contains("SIDEWAYS"));
   }

   #[test]
   fn test_error_code_empty_ordering() {
      let err = Error::EmptyOrdering;
      assert_eq!(err.error_code(), "EMPTY_ORDERING");
      assert!(err.to_string().contains("at least one column"));
   }

   #[test]
   fn test_error_code_invalid_column_name() {
      let err = Error::InvalidColumnName {
         name: "bad;name".into(),
      };
      assert_eq!(err.error_code(), "INVALID_COLUMN_NAME");
      assert!(err.to_string().contains("bad;name"));
   }

   #[test]
   fn test_error_code_missing_column_value() {
      let err = Error::MissingColumnValue {
         column: "vega_time".into(),
      };
      assert_eq!(err.error_code(), "MISSING_COLUMN_VALUE");
      assert!(err.to_string().contains("vega_time"));
   }

   #[test]
   fn test_error_code_cursor_parse_failure() {
      let err = Error::CursorParseFailure("not base64".into());
      assert_eq!(err.error_code(), "CURSOR_PARSE_FAILURE");
      assert!(err.to_string().contains("not base64"));
   }

   #[test]
   fn test_error_code_ambiguous_pagination() {
      let err = Error::AmbiguousPagination;
      assert_eq!(err.error_code(), "AMBIGUOUS_PAGINATION");
      assert!(err.to_string().contains("first/after"));
      assert!(err.to_string().contains("last/before"));
   }

   #[test]
   fn test_error_code_invalid_page_size() {
      let err = Error::InvalidPageSize;
      assert_eq!(err.error_code(), "INVALID_PAGE_SIZE");
      assert!(err.to_string().contains("greater than zero"));
   }

   #[test]
   fn test_error_code_page_size_too_large() {
      let err = Error::PageSizeTooLarge {
         requested: 5000,
         max: 1000,
      };
      assert_eq!(err.error_code(), "PAGE_SIZE_TOO_LARGE");
      assert!(err.to_string().contains("5000"));
      assert!(err.to_string().contains("1000"));
   }

   #[test]
   fn test_error_code_invalid_pagination_query() {
      let err = Error::InvalidPaginationQuery;
      assert_eq!(err.error_code(), "INVALID_PAGINATION_QUERY");
      assert!(err.to_string().contains("top-level ORDER BY or LIMIT"));
   }
}
