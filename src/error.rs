//! Error types for row and value mapping.
//!
//! No external database driver dependencies.

use thiserror::Error;

use crate::pg::error::ParseError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MapError {
    #[error("Malformed literal: {0}")]
    MalformedLiteral(#[from] ParseError),

    #[error("Cannot derive field schema for {type_name}: {reason}")]
    SchemaDerivation { type_name: String, reason: String },

    #[error(
        "NULL value is not possible when filling {target}; use Option or allow primitive defaults"
    )]
    NullNotAllowed { target: String },

    #[error("Cannot convert {value:?} to {target}: {reason}")]
    NotConvertible {
        value: String,
        target: String,
        reason: String,
    },

    #[error("Cannot map value of type {from} to expected type {to}")]
    NotAssignable { from: String, to: String },

    #[error("Value nesting exceeds the limit of {limit} levels")]
    SchemaTooDeep { limit: usize },

    #[error("Column [{column}] not found in row")]
    MissingColumn { column: String },

    #[error("Element {ordinal} not present, value has {len} elements")]
    MissingElement { ordinal: usize, len: usize },

    #[error("{field}: {source}")]
    Field {
        field: String,
        #[source]
        source: Box<MapError>,
    },

    #[error("Row {row}: {source}")]
    Row {
        row: usize,
        #[source]
        source: Box<MapError>,
    },
}

impl MapError {
    /// Attribute this error to a named field.
    pub fn in_field(self, field: impl Into<String>) -> Self {
        MapError::Field {
            field: field.into(),
            source: Box::new(self),
        }
    }

    /// Attribute this error to a collection element.
    pub fn at_index(self, index: usize) -> Self {
        self.in_field(format!("[{}]", index))
    }

    /// Attribute this error to a result row.
    pub fn at_row(self, row: usize) -> Self {
        MapError::Row {
            row,
            source: Box::new(self),
        }
    }

    /// The innermost error, with field and row context peeled off.
    pub fn root_cause(&self) -> &MapError {
        match self {
            MapError::Field { source, .. } | MapError::Row { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Dotted field path leading to the root cause, e.g. `inner.tags.[2]`.
    pub fn field_path(&self) -> Vec<&str> {
        let mut path = Vec::new();
        let mut current = self;
        loop {
            match current {
                MapError::Field { field, source } => {
                    path.push(field.as_str());
                    current = source;
                }
                MapError::Row { source, .. } => current = source,
                _ => return path,
            }
        }
    }

    pub(crate) fn not_assignable(from: &str, to: &str) -> Self {
        MapError::NotAssignable {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    pub(crate) fn not_convertible(
        value: impl Into<String>,
        target: &str,
        reason: impl ToString,
    ) -> Self {
        MapError::NotConvertible {
            value: value.into(),
            target: target.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn derivation(type_name: &str, reason: impl Into<String>) -> Self {
        MapError::SchemaDerivation {
            type_name: type_name.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, MapError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_cause_and_path() {
        let err = MapError::NullNotAllowed {
            target: "i32".to_string(),
        }
        .at_index(2)
        .in_field("marks")
        .in_field("inner")
        .at_row(7);

        assert!(matches!(err.root_cause(), MapError::NullNotAllowed { .. }));
        assert_eq!(err.field_path(), vec!["inner", "marks", "[2]"]);
        assert!(err.to_string().starts_with("Row 7: inner: marks: [2]: NULL value"));
    }

    #[test]
    fn test_parse_error_converts() {
        let err: MapError = ParseError::UnterminatedQuote { position: 3 }.into();
        assert!(matches!(err, MapError::MalformedLiteral(_)));
        assert!(err.to_string().contains("position 3"));
    }
}
