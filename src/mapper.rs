//! Result rows and the row mapper.
//!
//! A [`Row`] holds decoded values keyed by shared column names. A
//! [`RowMapper`] fills one record per row through the record's cached
//! schema, reading each field's column with the field's [`DataKind`].

use std::sync::Arc;

use bytes::Bytes;
use chrono::{NaiveDate, NaiveDateTime};
use smallvec::SmallVec;
use tracing::trace;

use crate::cache::SchemaCache;
use crate::coerce::{self, Context, FromRaw, Source};
use crate::config::MapperConfig;
use crate::error::Result;
use crate::pg::{Oid, RawValue};
use crate::schema::{Record, Schema};

/// Column names shared by every row of a result.
pub type SharedColumns = Arc<Vec<String>>;

// ============================================================================
// Data kinds
// ============================================================================

/// How a field's column value is read from a row.
///
/// `Automatic` passes the decoded value through, materializing database
/// array handles. The other kinds normalize the value to one representation
/// before coercion. NULL stays NULL for every kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum DataKind {
    #[default]
    Automatic,
    Int2,
    Int4,
    Int8,
    Text,
    /// Driver-neutral text; read exactly like `Text`
    CommonText,
    Real,
    Timestamp,
    Date,
    Boolean,
    ArrayInt4,
    ArrayText,
}

impl DataKind {
    /// Normalize a column value.
    pub fn extract(self, raw: RawValue, cx: &Context) -> Result<RawValue> {
        if raw.is_null() {
            return Ok(RawValue::Null);
        }
        match self {
            DataKind::Automatic => Ok(match raw {
                RawValue::DbArray(handle) => RawValue::Array(handle.into_elements()),
                other => other,
            }),
            DataKind::Int2 => i16::from_raw(raw, cx).map(RawValue::Int2),
            DataKind::Int4 => i32::from_raw(raw, cx).map(RawValue::Int4),
            DataKind::Int8 => i64::from_raw(raw, cx).map(RawValue::Int8),
            DataKind::Text | DataKind::CommonText => String::from_raw(raw, cx).map(RawValue::Text),
            DataKind::Real => f64::from_raw(raw, cx).map(RawValue::Float8),
            DataKind::Timestamp => NaiveDateTime::from_raw(raw, cx).map(RawValue::Timestamp),
            DataKind::Date => NaiveDate::from_raw(raw, cx).map(RawValue::Date),
            DataKind::Boolean => bool::from_raw(raw, cx).map(RawValue::Bool),
            DataKind::ArrayInt4 => Vec::<Option<i32>>::from_raw(raw, cx).map(|items| {
                RawValue::Array(
                    items
                        .into_iter()
                        .map(|v| v.map_or(RawValue::Null, RawValue::Int4))
                        .collect(),
                )
            }),
            DataKind::ArrayText => Vec::<Option<String>>::from_raw(raw, cx).map(|items| {
                RawValue::Array(
                    items
                        .into_iter()
                        .map(|v| v.map_or(RawValue::Null, RawValue::Text))
                        .collect(),
                )
            }),
        }
    }
}

// ============================================================================
// Rows
// ============================================================================

/// One result row.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: SharedColumns,
    values: SmallVec<[RawValue; 16]>,
}

impl Row {
    pub fn new(columns: SharedColumns, values: impl IntoIterator<Item = RawValue>) -> Self {
        Self {
            columns,
            values: values.into_iter().collect(),
        }
    }

    /// Build a row from `(column, value)` pairs.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, RawValue)>) -> Self {
        let (columns, values): (Vec<String>, SmallVec<[RawValue; 16]>) = pairs
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .unzip();
        Self {
            columns: Arc::new(columns),
            values,
        }
    }

    /// Decode a text-format row. Columns without a type OID decode as text.
    pub fn decode_text(columns: SharedColumns, oids: &[Oid], values: &[Option<Bytes>]) -> Result<Self> {
        let mut decoded = SmallVec::with_capacity(values.len());
        for (i, value) in values.iter().enumerate() {
            let raw = match value {
                Some(data) => {
                    let oid = oids.get(i).copied().unwrap_or(Oid::TEXT);
                    RawValue::decode_text(oid, data)?
                }
                None => RawValue::Null,
            };
            decoded.push(raw);
        }
        Ok(Self {
            columns,
            values: decoded,
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[RawValue] {
        &self.values
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[inline]
    pub fn value(&self, index: usize) -> Option<&RawValue> {
        self.values.get(index)
    }

    /// Index of a column: exact match first, then ASCII case-insensitive.
    pub fn find_column(&self, name: &str) -> Option<usize> {
        let len = self.columns.len().min(self.values.len());
        let columns = &self.columns[..len];
        columns
            .iter()
            .position(|c| c == name)
            .or_else(|| columns.iter().position(|c| c.eq_ignore_ascii_case(name)))
    }

    pub fn get(&self, name: &str) -> Option<&RawValue> {
        self.find_column(name).and_then(|i| self.value(i))
    }
}

// ============================================================================
// Row mapper
// ============================================================================

/// Maps rows onto records of type `T`.
pub struct RowMapper<T> {
    schema: Arc<Schema<T>>,
    config: MapperConfig,
}

impl<T: Record> RowMapper<T> {
    pub fn new() -> Result<Self> {
        Self::with_config(MapperConfig::default())
    }

    pub fn with_config(config: MapperConfig) -> Result<Self> {
        Ok(Self {
            schema: SchemaCache::global().get::<T>()?,
            config,
        })
    }

    pub fn schema(&self) -> &Schema<T> {
        &self.schema
    }

    pub fn config(&self) -> &MapperConfig {
        &self.config
    }

    /// Map one row. Errors carry `row_num` and the failing field path.
    pub fn map_row(&self, row: &Row, row_num: usize) -> Result<T> {
        let mut record = T::default();
        self.fill(row, &mut record).map_err(|e| e.at_row(row_num))?;
        Ok(record)
    }

    /// Fill an existing record from a row.
    pub fn fill(&self, row: &Row, record: &mut T) -> Result<()> {
        let cx = Context::new(&self.config);
        let source = Source::Row {
            row,
            strict: self.config.strict_columns,
        };
        coerce::fill(&self.schema, record, &source, &cx)
    }

    /// Map every row, stopping at the first failure.
    pub fn map_rows<'r>(&self, rows: impl IntoIterator<Item = &'r Row>) -> Result<Vec<T>> {
        let mapped = rows
            .into_iter()
            .enumerate()
            .map(|(i, row)| self.map_row(row, i))
            .collect::<Result<Vec<_>>>()?;
        trace!(record = self.schema.type_name(), rows = mapped.len(), "rows mapped");
        Ok(mapped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MapError;
    use crate::pg::ArrayHandle;

    #[test]
    fn test_find_column() {
        let row = Row::from_pairs([("Id", RawValue::Int4(1)), ("id", RawValue::Int4(2)), ("Name", RawValue::Null)]);
        assert_eq!(row.find_column("id"), Some(1));
        assert_eq!(row.find_column("name"), Some(2));
        assert_eq!(row.find_column("NAME"), Some(2));
        assert_eq!(row.find_column("missing"), None);
        assert_eq!(row.get("Id"), Some(&RawValue::Int4(1)));
    }

    #[test]
    fn test_decode_text_row() {
        let columns = Arc::new(vec!["id".to_string(), "tags".to_string(), "note".to_string()]);
        let row = Row::decode_text(
            columns,
            &[Oid::INT4, Oid::TEXT_ARRAY],
            &[
                Some(Bytes::from_static(b"42")),
                Some(Bytes::from_static(b"{a,b}")),
                None,
            ],
        )
        .unwrap();
        assert_eq!(row.get("id"), Some(&RawValue::Int4(42)));
        assert!(matches!(row.get("tags"), Some(RawValue::DbArray(_))));
        assert_eq!(row.get("note"), Some(&RawValue::Null));
    }

    #[test]
    fn test_data_kind_extract() {
        let cx = Context::default();
        assert_eq!(
            DataKind::Int8.extract(RawValue::Int2(3), &cx).unwrap(),
            RawValue::Int8(3)
        );
        assert_eq!(
            DataKind::Boolean.extract(RawValue::Text("t".into()), &cx).unwrap(),
            RawValue::Bool(true)
        );
        assert_eq!(
            DataKind::CommonText.extract(RawValue::Int4(9), &cx).unwrap(),
            DataKind::Text.extract(RawValue::Int4(9), &cx).unwrap()
        );
        assert_eq!(DataKind::Int4.extract(RawValue::Null, &cx).unwrap(), RawValue::Null);
        assert_eq!(
            DataKind::ArrayInt4
                .extract(RawValue::Text("{1,NULL}".into()), &cx)
                .unwrap(),
            RawValue::Array(vec![RawValue::Int4(1), RawValue::Null])
        );

        let handle = ArrayHandle::new(Oid::INT4, vec![RawValue::Int4(5)]);
        assert_eq!(
            DataKind::Automatic.extract(RawValue::DbArray(handle), &cx).unwrap(),
            RawValue::Array(vec![RawValue::Int4(5)])
        );

        assert!(matches!(
            DataKind::Int2.extract(RawValue::Int8(1 << 40), &cx),
            Err(MapError::NotConvertible { .. })
        ));
    }
}
