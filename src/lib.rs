//! pgrowmap - map PostgreSQL rows, composite values and arrays onto Rust records.
//!
//! Records register their fields once with a [`SchemaBuilder`]; the
//! [`SchemaCache`] derives and keeps the flattened schema; [`FromRaw`]
//! coerces raw values into field types, descending into composite and array
//! literals as needed.

pub mod cache;
pub mod coerce;
pub mod config;
pub mod error;
pub mod mapper;
pub mod pg;
pub mod schema;


pub use cache::{get_schema, SchemaCache};
pub use coerce::{coerce, coerce_element, Context, FromRaw};
pub use config::MapperConfig;
pub use error::{MapError, Result};
pub use mapper::{DataKind, Row, RowMapper};
pub use pg::{ArrayHandle, CompositeHandle, Oid, RawValue};
pub use schema::{
    FieldConfig, FieldOption, FieldOptions, FieldSchema, NestedSchema, Record, Schema, SchemaBuilder,
    TypeRef,
};
