//! PostgreSQL type identifiers and raw column values.
//!
//! `RawValue` is what a database driver hands over for one column, or one
//! element of an array/composite: a native scalar, a native array, a
//! database array or composite handle, or plain text still to be parsed.
//! Reference: https://www.postgresql.org/docs/current/datatype.html

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value as JsonValue;

use super::hstore;
use super::literal;
use crate::error::{MapError, Result};

// ============================================================================
// Type OIDs
// ============================================================================

/// PostgreSQL type object identifiers (OIDs).
///
/// These are the built-in type OIDs from PostgreSQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Oid(pub i32);

impl Oid {
    // Boolean types
    pub const BOOL: Oid = Oid(16);

    // Binary data
    pub const BYTEA: Oid = Oid(17);

    // Character types
    pub const CHAR: Oid = Oid(18);
    pub const NAME: Oid = Oid(19);

    // Integer types
    pub const INT8: Oid = Oid(20);
    pub const INT2: Oid = Oid(21);
    pub const INT4: Oid = Oid(23);

    // Text types
    pub const TEXT: Oid = Oid(25);

    // Floating point types
    pub const FLOAT4: Oid = Oid(700);
    pub const FLOAT8: Oid = Oid(701);

    // String types
    pub const VARCHAR: Oid = Oid(1043);
    pub const BPCHAR: Oid = Oid(1042);

    // Date/time types
    pub const DATE: Oid = Oid(1082);
    pub const TIME: Oid = Oid(1083);
    pub const TIMESTAMP: Oid = Oid(1114);
    pub const TIMESTAMPTZ: Oid = Oid(1184);

    // UUID
    pub const UUID: Oid = Oid(2950);

    // JSON types
    pub const JSON: Oid = Oid(114);
    pub const JSONB: Oid = Oid(3802);

    // Anonymous row type
    pub const RECORD: Oid = Oid(2249);

    // Array types
    pub const BOOL_ARRAY: Oid = Oid(1000);
    pub const INT2_ARRAY: Oid = Oid(1005);
    pub const INT4_ARRAY: Oid = Oid(1007);
    pub const TEXT_ARRAY: Oid = Oid(1009);
    pub const VARCHAR_ARRAY: Oid = Oid(1015);
    pub const INT8_ARRAY: Oid = Oid(1016);
    pub const FLOAT4_ARRAY: Oid = Oid(1021);
    pub const FLOAT8_ARRAY: Oid = Oid(1022);
    pub const UUID_ARRAY: Oid = Oid(2951);
    pub const RECORD_ARRAY: Oid = Oid(2287);

    /// Create from raw i32 value
    #[inline]
    pub fn from_i32(oid: i32) -> Self {
        Oid(oid)
    }

    /// Get the raw i32 value
    #[inline]
    pub fn as_i32(self) -> i32 {
        self.0
    }

    /// Check if this is a text-like type
    pub fn is_text_like(self) -> bool {
        matches!(
            self,
            Oid::TEXT | Oid::VARCHAR | Oid::BPCHAR | Oid::CHAR | Oid::NAME
        )
    }

    /// Check if this is an integer type
    pub fn is_integer(self) -> bool {
        matches!(self, Oid::INT2 | Oid::INT4 | Oid::INT8)
    }

    /// Check if this is a floating point type
    pub fn is_float(self) -> bool {
        matches!(self, Oid::FLOAT4 | Oid::FLOAT8)
    }

    /// Element type of a built-in array type.
    pub fn element_type(self) -> Option<Oid> {
        let element = match self {
            Oid::BOOL_ARRAY => Oid::BOOL,
            Oid::INT2_ARRAY => Oid::INT2,
            Oid::INT4_ARRAY => Oid::INT4,
            Oid::TEXT_ARRAY => Oid::TEXT,
            Oid::VARCHAR_ARRAY => Oid::VARCHAR,
            Oid::INT8_ARRAY => Oid::INT8,
            Oid::FLOAT4_ARRAY => Oid::FLOAT4,
            Oid::FLOAT8_ARRAY => Oid::FLOAT8,
            Oid::UUID_ARRAY => Oid::UUID,
            Oid::RECORD_ARRAY => Oid::RECORD,
            _ => return None,
        };
        Some(element)
    }

    /// Check if this is one of the built-in array types
    pub fn is_array(self) -> bool {
        self.element_type().is_some()
    }
}

// ============================================================================
// Database handles
// ============================================================================

/// A database-native array, as a driver exposes it.
///
/// Elements are read through [`ArrayHandle::iter`]; the coercion engine never
/// looks at the array's text form.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayHandle {
    element_type: Oid,
    elements: Vec<RawValue>,
}

impl ArrayHandle {
    pub fn new(element_type: Oid, elements: Vec<RawValue>) -> Self {
        Self {
            element_type,
            elements,
        }
    }

    /// Build a handle from an array literal, decoding each element by `element_type`.
    pub fn from_literal(element_type: Oid, text: &str) -> Result<Self> {
        let mut elements = Vec::new();
        for element in literal::parse_array(text)? {
            let value = match element {
                None => RawValue::Null,
                // multi-dimensional arrays nest unquoted
                Some(inner) if inner.starts_with('{') => {
                    RawValue::DbArray(ArrayHandle::from_literal(element_type, &inner)?)
                }
                Some(inner) => RawValue::decode_text(element_type, inner.as_bytes())?,
            };
            elements.push(value);
        }
        Ok(Self::new(element_type, elements))
    }

    #[inline]
    pub fn element_type(&self) -> Oid {
        self.element_type
    }

    /// Element cursor.
    pub fn iter(&self) -> std::slice::Iter<'_, RawValue> {
        self.elements.iter()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn into_elements(self) -> Vec<RawValue> {
        self.elements
    }
}

/// A database-native composite (row type) value: its type name plus its
/// textual row form `(…)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeHandle {
    type_name: String,
    value: String,
}

impl CompositeHandle {
    pub fn new(type_name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            value: value.into(),
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn into_value(self) -> String {
        self.value
    }
}

// ============================================================================
// Raw values
// ============================================================================

/// A raw column value with type information.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Null,
    Bool(bool),
    Char(char),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Float4(f32),
    Float8(f64),
    Text(String),
    Bytea(Vec<u8>),
    Uuid([u8; 16]),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Date(NaiveDate),
    Time(NaiveTime),
    Json(JsonValue),
    /// Native array already materialised by the driver
    Array(Vec<RawValue>),
    /// Database array handle
    DbArray(ArrayHandle),
    /// Database composite handle
    Composite(CompositeHandle),
    /// Decoded hstore pairs
    Hstore(Vec<hstore::Entry>),
}

impl RawValue {
    /// Check if this value is NULL
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, RawValue::Null)
    }

    /// Short type name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            RawValue::Null => "null",
            RawValue::Bool(_) => "bool",
            RawValue::Char(_) => "char",
            RawValue::Int2(_) => "int2",
            RawValue::Int4(_) => "int4",
            RawValue::Int8(_) => "int8",
            RawValue::Float4(_) => "float4",
            RawValue::Float8(_) => "float8",
            RawValue::Text(_) => "text",
            RawValue::Bytea(_) => "bytea",
            RawValue::Uuid(_) => "uuid",
            RawValue::Timestamp(_) => "timestamp",
            RawValue::TimestampTz(_) => "timestamptz",
            RawValue::Date(_) => "date",
            RawValue::Time(_) => "time",
            RawValue::Json(_) => "json",
            RawValue::Array(_) => "array",
            RawValue::DbArray(_) => "database array",
            RawValue::Composite(_) => "composite",
            RawValue::Hstore(_) => "hstore",
        }
    }

    /// Integer payload of the integer variants.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            RawValue::Int2(v) => Some(i64::from(*v)),
            RawValue::Int4(v) => Some(i64::from(*v)),
            RawValue::Int8(v) => Some(*v),
            _ => None,
        }
    }

    /// Floating payload of the numeric variants.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            RawValue::Float4(v) => Some(f64::from(*v)),
            RawValue::Float8(v) => Some(*v),
            RawValue::Int2(v) => Some(f64::from(*v)),
            RawValue::Int4(v) => Some(f64::from(*v)),
            RawValue::Int8(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            RawValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Decode from text format (simple query protocol).
    pub fn decode_text(oid: Oid, data: &[u8]) -> Result<Self> {
        let text = String::from_utf8_lossy(data).into_owned();
        let invalid = |reason: String| MapError::NotConvertible {
            value: String::from_utf8_lossy(data).into_owned(),
            target: format!("oid {}", oid.as_i32()),
            reason,
        };

        match oid {
            Oid::BOOL => match text.as_str() {
                "t" | "true" => Ok(RawValue::Bool(true)),
                "f" | "false" => Ok(RawValue::Bool(false)),
                _ => Err(invalid("not a boolean".to_string())),
            },

            Oid::INT2 => text
                .parse::<i16>()
                .map(RawValue::Int2)
                .map_err(|e| invalid(e.to_string())),

            Oid::INT4 => text
                .parse::<i32>()
                .map(RawValue::Int4)
                .map_err(|e| invalid(e.to_string())),

            Oid::INT8 => text
                .parse::<i64>()
                .map(RawValue::Int8)
                .map_err(|e| invalid(e.to_string())),

            Oid::FLOAT4 => text
                .parse::<f32>()
                .map(RawValue::Float4)
                .map_err(|e| invalid(e.to_string())),

            Oid::FLOAT8 => text
                .parse::<f64>()
                .map(RawValue::Float8)
                .map_err(|e| invalid(e.to_string())),

            Oid::UUID => uuid::Uuid::parse_str(&text)
                .map(|u| RawValue::Uuid(*u.as_bytes()))
                .map_err(|e| invalid(e.to_string())),

            Oid::DATE => NaiveDate::parse_from_str(&text, "%Y-%m-%d")
                .map(RawValue::Date)
                .map_err(|e| invalid(e.to_string())),

            Oid::TIME => NaiveTime::parse_from_str(&text, "%H:%M:%S%.f")
                .map(RawValue::Time)
                .map_err(|e| invalid(e.to_string())),

            Oid::TIMESTAMP => parse_timestamp(&text)
                .map(RawValue::Timestamp)
                .map_err(|e| invalid(e.to_string())),

            Oid::TIMESTAMPTZ => parse_timestamptz(&text)
                .map(RawValue::TimestampTz)
                .map_err(|e| invalid(e.to_string())),

            Oid::JSON | Oid::JSONB => serde_json::from_str(&text)
                .map(RawValue::Json)
                .map_err(|e| invalid(e.to_string())),

            Oid::BYTEA => decode_bytea_hex(&text)
                .map(RawValue::Bytea)
                .ok_or_else(|| invalid("not a hex-encoded bytea".to_string())),

            Oid::RECORD => Ok(RawValue::Composite(CompositeHandle::new("record", text))),

            _ if oid.is_array() => {
                let element = oid.element_type().unwrap_or(Oid::TEXT);
                ArrayHandle::from_literal(element, &text).map(RawValue::DbArray)
            }

            // Text types, and anything we do not know: keep the text
            _ => Ok(RawValue::Text(text)),
        }
    }
}

/// Parse PostgreSQL's `timestamp` output.
pub(crate) fn parse_timestamp(text: &str) -> chrono::ParseResult<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f"))
}

/// Parse PostgreSQL's `timestamptz` output (`+00`, `+05:30` offsets).
pub(crate) fn parse_timestamptz(text: &str) -> chrono::ParseResult<DateTime<Utc>> {
    DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%#z")
        .or_else(|_| DateTime::parse_from_rfc3339(text))
        .map(|dt| dt.with_timezone(&Utc))
}

/// Decode bytea hex output (`\xdeadbeef`).
pub(crate) fn decode_bytea_hex(text: &str) -> Option<Vec<u8>> {
    let hex = text.strip_prefix("\\x")?;
    if hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok())
        .collect()
}

/// Write an array element, quoting it when the array grammar requires it.
fn write_array_element(f: &mut fmt::Formatter<'_>, value: &RawValue) -> fmt::Result {
    match value {
        RawValue::Null => f.write_str("NULL"),
        RawValue::Array(_) | RawValue::DbArray(_) => write!(f, "{}", value),
        other => {
            let text = other.to_string();
            let needs_quotes = text.is_empty()
                || text.eq_ignore_ascii_case("NULL")
                || text
                    .chars()
                    .any(|c| matches!(c, '{' | '}' | ',' | '"' | '\\') || c.is_whitespace());
            if !needs_quotes {
                return f.write_str(&text);
            }
            f.write_str("\"")?;
            for c in text.chars() {
                if c == '"' || c == '\\' {
                    f.write_str("\\")?;
                }
                write!(f, "{}", c)?;
            }
            f.write_str("\"")
        }
    }
}

fn write_array<'a>(
    f: &mut fmt::Formatter<'_>,
    elements: impl Iterator<Item = &'a RawValue>,
) -> fmt::Result {
    f.write_str("{")?;
    for (i, element) in elements.enumerate() {
        if i > 0 {
            f.write_str(",")?;
        }
        write_array_element(f, element)?;
    }
    f.write_str("}")
}

/// PostgreSQL text output form of the value.
impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawValue::Null => f.write_str("NULL"),
            RawValue::Bool(v) => f.write_str(if *v { "t" } else { "f" }),
            RawValue::Char(v) => write!(f, "{}", v),
            RawValue::Int2(v) => write!(f, "{}", v),
            RawValue::Int4(v) => write!(f, "{}", v),
            RawValue::Int8(v) => write!(f, "{}", v),
            RawValue::Float4(v) => write!(f, "{}", v),
            RawValue::Float8(v) => write!(f, "{}", v),
            RawValue::Text(v) => f.write_str(v),
            RawValue::Bytea(v) => {
                f.write_str("\\x")?;
                v.iter().try_for_each(|byte| write!(f, "{:02x}", byte))
            }
            RawValue::Uuid(v) => write!(f, "{}", uuid::Uuid::from_bytes(*v).hyphenated()),
            RawValue::Timestamp(v) => write!(f, "{}", v.format("%Y-%m-%d %H:%M:%S%.f")),
            RawValue::TimestampTz(v) => write!(f, "{}", v.format("%Y-%m-%d %H:%M:%S%.f%:z")),
            RawValue::Date(v) => write!(f, "{}", v.format("%Y-%m-%d")),
            RawValue::Time(v) => write!(f, "{}", v.format("%H:%M:%S%.f")),
            RawValue::Json(v) => write!(f, "{}", v),
            RawValue::Array(items) => write_array(f, items.iter()),
            RawValue::DbArray(handle) => write_array(f, handle.iter()),
            RawValue::Composite(handle) => f.write_str(handle.value()),
            RawValue::Hstore(entries) => {
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "\"{}\"=>", key.replace('\\', "\\\\").replace('"', "\\\""))?;
                    match value {
                        Some(v) => {
                            write!(f, "\"{}\"", v.replace('\\', "\\\\").replace('"', "\\\""))?
                        }
                        None => f.write_str("NULL")?,
                    }
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oid_classification() {
        assert!(Oid::TEXT.is_text_like());
        assert!(Oid::VARCHAR.is_text_like());
        assert!(!Oid::INT4.is_text_like());

        assert!(Oid::INT4.is_integer());
        assert!(Oid::INT8.is_integer());
        assert!(!Oid::FLOAT8.is_integer());

        assert!(Oid::FLOAT4.is_float());
        assert!(Oid::FLOAT8.is_float());
        assert!(!Oid::INT4.is_float());

        assert_eq!(Oid::INT4_ARRAY.element_type(), Some(Oid::INT4));
        assert!(Oid::TEXT_ARRAY.is_array());
        assert!(!Oid::TEXT.is_array());
    }

    #[test]
    fn test_decode_text_scalars() {
        assert_eq!(
            RawValue::decode_text(Oid::INT4, b"42").unwrap(),
            RawValue::Int4(42)
        );
        assert_eq!(
            RawValue::decode_text(Oid::BOOL, b"t").unwrap(),
            RawValue::Bool(true)
        );
        assert_eq!(
            RawValue::decode_text(Oid::VARCHAR, b"hello").unwrap(),
            RawValue::Text("hello".to_string())
        );
        assert_eq!(
            RawValue::decode_text(Oid::BYTEA, b"\\xdeadbeef").unwrap(),
            RawValue::Bytea(vec![0xde, 0xad, 0xbe, 0xef])
        );
        assert!(RawValue::decode_text(Oid::INT2, b"70000").is_err());
        assert!(RawValue::decode_text(Oid::BOOL, b"maybe").is_err());
    }

    #[test]
    fn test_decode_text_datetime() {
        let ts = RawValue::decode_text(Oid::TIMESTAMP, b"2024-03-01 12:30:45.5").unwrap();
        assert_eq!(ts.to_string(), "2024-03-01 12:30:45.500");

        let tz = RawValue::decode_text(Oid::TIMESTAMPTZ, b"2024-03-01 12:30:45+02").unwrap();
        match tz {
            RawValue::TimestampTz(dt) => assert_eq!(dt.format("%H").to_string(), "10"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_decode_text_array() {
        let value = RawValue::decode_text(Oid::INT4_ARRAY, b"{1,NULL,3}").unwrap();
        let handle = match value {
            RawValue::DbArray(handle) => handle,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(handle.element_type(), Oid::INT4);
        assert_eq!(
            handle.iter().cloned().collect::<Vec<_>>(),
            vec![RawValue::Int4(1), RawValue::Null, RawValue::Int4(3)]
        );
    }

    #[test]
    fn test_decode_text_nested_array() {
        let value = RawValue::decode_text(Oid::INT4_ARRAY, b"{{1,2},{3,4}}").unwrap();
        assert_eq!(value.to_string(), "{{1,2},{3,4}}");
    }

    #[test]
    fn test_display_array_quotes_when_needed() {
        let value = RawValue::Array(vec![
            RawValue::Text("a".to_string()),
            RawValue::Text("b c".to_string()),
            RawValue::Text("NULL".to_string()),
            RawValue::Null,
            RawValue::Text("q\"".to_string()),
        ]);
        assert_eq!(value.to_string(), r#"{a,"b c","NULL",NULL,"q\""}"#);
    }

    #[test]
    fn test_display_scalars() {
        assert_eq!(RawValue::Bool(true).to_string(), "t");
        assert_eq!(RawValue::Bytea(vec![0x01, 0xab]).to_string(), "\\x01ab");
        assert_eq!(
            RawValue::Uuid([0u8; 16]).to_string(),
            "00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(
            RawValue::Composite(CompositeHandle::new("pair", "(1,2)")).to_string(),
            "(1,2)"
        );
    }
}
