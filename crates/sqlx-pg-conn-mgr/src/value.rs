//! Typed bind values and argument building.

use std::fmt::Write as _;

use sqlx::encode::{Encode, IsNull};
use sqlx::error::BoxDynError;
use sqlx::postgres::types::Oid;
use sqlx::postgres::{PgArgumentBuffer, PgArguments, PgTypeInfo};
use sqlx::{Arguments, Postgres, Type};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

use crate::{Error, Result};

/// A value bound to a `$N` placeholder.
///
/// Variants map onto the PostgreSQL types they encode as, so cursor values
/// compare against their columns without casts.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
   /// Sent with an unspecified type, so the server infers it from context
   /// (`col > $1` takes the type of `col`). A placeholder with no typed
   /// context, such as a bare `$1 IS NULL`, needs an explicit cast.
   Null,
   Bool(bool),
   /// `int8`
   Int(i64),
   /// `float8`
   Float(f64),
   Text(String),
   /// `bytea`
   Bytes(Vec<u8>),
   /// `timestamptz`
   Timestamp(OffsetDateTime),
   Uuid(Uuid),
}

impl SqlValue {
   pub fn is_null(&self) -> bool {
      matches!(self, SqlValue::Null)
   }

   fn add_to(self, arguments: &mut PgArguments) -> Result<()> {
      let added = match self {
         SqlValue::Null => arguments.add(UntypedNull),
         SqlValue::Bool(v) => arguments.add(v),
         SqlValue::Int(v) => arguments.add(v),
         SqlValue::Float(v) => arguments.add(v),
         SqlValue::Text(v) => arguments.add(v),
         SqlValue::Bytes(v) => arguments.add(v),
         SqlValue::Timestamp(v) => arguments.add(v),
         SqlValue::Uuid(v) => arguments.add(v),
      };

      added.map_err(Error::Encode)
   }

   /// Append this value as one CSV field of a `COPY ... (FORMAT csv)` row.
   ///
   /// NULL is the unquoted empty field; everything else is quoted so an empty
   /// string stays distinguishable from NULL.
   pub(crate) fn write_csv_field(&self, out: &mut String) -> Result<()> {
      match self {
         SqlValue::Null => {}
         SqlValue::Bool(v) => out.push_str(if *v { "t" } else { "f" }),
         SqlValue::Int(v) => {
            let _ = write!(out, "{v}");
         }
         SqlValue::Float(v) => {
            if v.is_infinite() {
               out.push_str(if v.is_sign_positive() {
                  "Infinity"
               } else {
                  "-Infinity"
               });
            } else {
               let _ = write!(out, "{v}");
            }
         }
         SqlValue::Text(v) => {
            out.push('"');
            out.push_str(&v.replace('"', "\"\""));
            out.push('"');
         }
         SqlValue::Bytes(v) => {
            out.push_str("\\x");
            for byte in v {
               let _ = write!(out, "{byte:02x}");
            }
         }
         SqlValue::Timestamp(v) => {
            let formatted = v.format(&Rfc3339).map_err(|e| Error::Encode(e.into()))?;
            out.push_str(&formatted);
         }
         SqlValue::Uuid(v) => {
            let _ = write!(out, "{}", v.hyphenated());
         }
      }

      Ok(())
   }
}

/// NULL parameter declared with OID 0, leaving its type to the server.
struct UntypedNull;

impl Type<Postgres> for UntypedNull {
   fn type_info() -> PgTypeInfo {
      PgTypeInfo::with_oid(Oid(0))
   }
}

impl Encode<'_, Postgres> for UntypedNull {
   fn encode_by_ref(&self, _buf: &mut PgArgumentBuffer) -> std::result::Result<IsNull, BoxDynError> {
      Ok(IsNull::Yes)
   }
}

macro_rules! sql_value_from {
   ($($ty:ty => $variant:ident),* $(,)?) => {
      $(
         impl From<$ty> for SqlValue {
            fn from(value: $ty) -> Self {
               SqlValue::$variant(value.into())
            }
         }
      )*
   };
}

sql_value_from! {
   bool => Bool,
   i16 => Int,
   i32 => Int,
   i64 => Int,
   u8 => Int,
   u16 => Int,
   u32 => Int,
   f32 => Float,
   f64 => Float,
   String => Text,
   Vec<u8> => Bytes,
   OffsetDateTime => Timestamp,
   Uuid => Uuid,
}

impl From<&str> for SqlValue {
   fn from(value: &str) -> Self {
      SqlValue::Text(value.to_owned())
   }
}

impl From<&[u8]> for SqlValue {
   fn from(value: &[u8]) -> Self {
      SqlValue::Bytes(value.to_vec())
   }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
   fn from(value: Option<T>) -> Self {
      value.map_or(SqlValue::Null, Into::into)
   }
}

/// Push `value` onto `args` and return its placeholder (`$N`, 1-based).
///
/// Placeholders are numbered by position in `args`, so interleaving calls with
/// hand-written placeholders for earlier arguments stays consistent.
pub fn next_bind_var(args: &mut Vec<SqlValue>, value: impl Into<SqlValue>) -> String {
   args.push(value.into());
   format!("${}", args.len())
}

/// Encode bind values in order.
pub fn to_arguments(values: Vec<SqlValue>) -> Result<PgArguments> {
   let mut arguments = PgArguments::default();
   for value in values {
      value.add_to(&mut arguments)?;
   }
   Ok(arguments)
}

/// Whether `name` is a plain SQL identifier: `[a-zA-Z_][a-zA-Z0-9_]*`.
pub fn is_valid_identifier(name: &str) -> bool {
   let mut chars = name.chars();
   match chars.next() {
      Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
      _ => return false,
   }

   chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

pub(crate) fn validate_identifier(name: &str) -> Result<()> {
   if is_valid_identifier(name) {
      Ok(())
   } else {
      Err(Error::InvalidIdentifier {
         name: name.to_string(),
      })
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use time::macros::datetime;

   #[test]
   fn bind_vars_follow_existing_args() {
      let mut args = vec![SqlValue::from("party")];

      assert_eq!(next_bind_var(&mut args, 7_i64), "$2");
      assert_eq!(next_bind_var(&mut args, true), "$3");
      assert_eq!(
         args,
         vec![
            SqlValue::Text("party".into()),
            SqlValue::Int(7),
            SqlValue::Bool(true)
         ]
      );
   }

   #[test]
   fn option_maps_to_null() {
      assert_eq!(SqlValue::from(None::<i64>), SqlValue::Null);
      assert_eq!(SqlValue::from(Some(3_i32)), SqlValue::Int(3));
      assert!(SqlValue::from(None::<String>).is_null());
   }

   #[test]
   fn arguments_accept_every_variant() {
      let values = vec![
         SqlValue::Null,
         SqlValue::Bool(false),
         SqlValue::Int(-1),
         SqlValue::Float(0.5),
         SqlValue::Text("x".into()),
         SqlValue::Bytes(vec![1, 2]),
         SqlValue::Timestamp(datetime!(2024-01-02 03:04:05 UTC)),
         SqlValue::Uuid(Uuid::nil()),
      ];

      assert!(to_arguments(values).is_ok());
   }

   #[test]
   fn identifiers() {
      assert!(is_valid_identifier("vega_time"));
      assert!(is_valid_identifier("_x1"));
      assert!(!is_valid_identifier(""));
      assert!(!is_valid_identifier("1abc"));
      assert!(!is_valid_identifier("a.b"));
      assert!(!is_valid_identifier("id; DROP TABLE blocks"));
   }

   fn csv(value: SqlValue) -> String {
      let mut out = String::new();
      value.write_csv_field(&mut out).unwrap();
      out
   }

   #[test]
   fn csv_fields() {
      assert_eq!(csv(SqlValue::Null), "");
      assert_eq!(csv(SqlValue::Bool(true)), "t");
      assert_eq!(csv(SqlValue::Int(42)), "42");
      assert_eq!(csv(SqlValue::Float(f64::NEG_INFINITY)), "-Infinity");
      assert_eq!(csv(SqlValue::Text(String::new())), "\"\"");
      assert_eq!(csv(SqlValue::Text("say \"hi\", ok".into())), "\"say \"\"hi\"\", ok\"");
      assert_eq!(csv(SqlValue::Bytes(vec![0xde, 0xad, 0x01])), "\\xdead01");
      assert_eq!(
         csv(SqlValue::Timestamp(datetime!(2024-01-02 03:04:05 UTC))),
         "2024-01-02T03:04:05Z"
      );
   }
}
