//! Opaque page cursors.
//!
//! A cursor records the ordering-column values of one row. Entity cursor
//! types serialize themselves to JSON; [`Cursor`] wraps that JSON and is what
//! crosses the API boundary, encoded as unpadded URL-safe base64 over a
//! version byte followed by the JSON bytes.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sqlx_pg_conn_mgr::SqlValue;

use crate::Error;

const CURSOR_VERSION: u8 = 1;

/// Encoded position of one row along an ordering.
///
/// Equality is byte equality of the cursor data. The default cursor is empty
/// and means "no cursor".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Cursor {
   data: String,
}

impl Cursor {
   /// Wrap already-serialized cursor data.
   pub fn new(data: impl Into<String>) -> Self {
      Self { data: data.into() }
   }

   pub fn data(&self) -> &str {
      &self.data
   }

   pub fn is_empty(&self) -> bool {
      self.data.is_empty()
   }

   /// The opaque wire form. Empty for the empty cursor.
   pub fn encode(&self) -> String {
      if self.data.is_empty() {
         return String::new();
      }

      let mut bytes = Vec::with_capacity(self.data.len() + 1);
      bytes.push(CURSOR_VERSION);
      bytes.extend_from_slice(self.data.as_bytes());
      URL_SAFE_NO_PAD.encode(bytes)
   }

   /// Parse the wire form produced by [`Cursor::encode`].
   pub fn decode(encoded: &str) -> Result<Self, Error> {
      if encoded.is_empty() {
         return Ok(Self::default());
      }

      let bytes = URL_SAFE_NO_PAD
         .decode(encoded)
         .map_err(|e| Error::CursorParseFailure(format!("invalid encoding: {e}")))?;

      let Some((&version, data)) = bytes.split_first() else {
         return Err(Error::CursorParseFailure("empty cursor payload".into()));
      };
      if version != CURSOR_VERSION {
         return Err(Error::CursorParseFailure(format!(
            "unsupported cursor version {version}"
         )));
      }
      if data.is_empty() {
         return Err(Error::CursorParseFailure("empty cursor payload".into()));
      }

      let data = String::from_utf8(data.to_vec())
         .map_err(|_| Error::CursorParseFailure("cursor data is not UTF-8".into()))?;

      Ok(Self { data })
   }
}

impl fmt::Display for Cursor {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.write_str(&self.encode())
   }
}

impl Serialize for Cursor {
   fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
      serializer.serialize_str(&self.encode())
   }
}

impl<'de> Deserialize<'de> for Cursor {
   fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
      let encoded = String::deserialize(deserializer)?;
      Cursor::decode(&encoded).map_err(serde::de::Error::custom)
   }
}

/// Per-entity cursor: the ordering-column values of one row.
///
/// Implementations map column names to values explicitly:
///
/// ```
/// use serde::{Deserialize, Serialize};
/// use sqlx_pg_toolkit::{PageCursor, SqlValue};
///
/// #[derive(Serialize, Deserialize)]
/// struct BlockCursor {
///    vega_time: i64,
///    height: i64,
/// }
///
/// impl PageCursor for BlockCursor {
///    fn column_value(&self, column: &str) -> Option<SqlValue> {
///       match column {
///          "vega_time" => Some(self.vega_time.into()),
///          "height" => Some(self.height.into()),
///          _ => None,
///       }
///    }
/// }
/// ```
pub trait PageCursor {
   /// Value of ordering column `column` for this cursor's row.
   fn column_value(&self, column: &str) -> Option<SqlValue>;

   /// Read an entity cursor out of a decoded [`Cursor`].
   fn parse(cursor: &Cursor) -> Result<Self, Error>
   where
      Self: Sized + DeserializeOwned,
   {
      serde_json::from_str(cursor.data()).map_err(|e| Error::CursorParseFailure(e.to_string()))
   }

   fn to_cursor(&self) -> Result<Cursor, Error>
   where
      Self: Serialize,
   {
      serde_json::to_string(self)
         .map(Cursor::new)
         .map_err(Error::CursorEncodeFailure)
   }
}
