//! Type-directed value coercion.
//!
//! [`FromRaw`] converts one [`RawValue`] into a declared Rust type. Rules are
//! tried in order and the first applicable one wins:
//!
//! 1. NULL: `Option` targets get `None`; primitives fail with
//!    `NullNotAllowed` unless the field allows primitive defaults; every
//!    other target is left untouched.
//! 2. Identity: the raw value already has the target's representation.
//! 3. Primitive conversion: lossless widening, checked narrowing, text
//!    parsing for numbers, booleans and single characters.
//! 4. Collections: array values, database array handles or array literals,
//!    coerced element by element.
//! 5. Records: composite handles or composite literals, filled through the
//!    record's schema.
//! 6. Maps: hstore values or hstore literals.
//! 7. Construction from a single value, for newtypes (see [`construct`]).
//!
//! Anything else fails with `NotAssignable`.

use std::any::type_name;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, LinkedList, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::iter;
use std::str::FromStr;

use bytes::Bytes;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value as JsonValue;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::cache::SchemaCache;
use crate::config::MapperConfig;
use crate::error::{MapError, Result};
use crate::mapper::Row;
use crate::pg::hstore;
use crate::pg::literal::{LiteralKind, LiteralParser};
use crate::pg::types::{decode_bytea_hex, parse_timestamp, parse_timestamptz};
use crate::pg::RawValue;
use crate::schema::{FieldOption, FieldOptions, FieldSchema, NestedSchema, Record, Schema, TypeRef};

// ============================================================================
// Context
// ============================================================================

/// Per-conversion state: limits from the config, the options of the field
/// being filled and the current nesting depth.
#[derive(Debug, Clone, Copy)]
pub struct Context {
    max_depth: usize,
    element_capacity: usize,
    options: FieldOptions,
    depth: usize,
}

impl Context {
    pub fn new(config: &MapperConfig) -> Self {
        Self {
            max_depth: config.max_depth,
            element_capacity: config.element_capacity,
            options: FieldOptions::empty(),
            depth: 0,
        }
    }

    /// Options of the field currently being filled.
    pub fn options(&self) -> FieldOptions {
        self.options
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn element_capacity(&self) -> usize {
        self.element_capacity
    }

    pub fn with_options(self, options: FieldOptions) -> Self {
        Self { options, ..self }
    }

    /// Enter a composite or collection body.
    pub fn descend(&self) -> Result<Self> {
        if self.depth >= self.max_depth {
            return Err(MapError::SchemaTooDeep {
                limit: self.max_depth,
            });
        }
        Ok(Self {
            depth: self.depth + 1,
            ..*self
        })
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new(&MapperConfig::default())
    }
}

// ============================================================================
// FromRaw
// ============================================================================

/// Conversion from a raw database value.
pub trait FromRaw: Sized + 'static {
    /// Convert a non-NULL value.
    fn from_raw(raw: RawValue, cx: &Context) -> Result<Self>;

    /// Value for NULL. `Ok(None)` leaves a field at its current value.
    fn from_null(cx: &Context) -> Result<Option<Self>> {
        let _ = cx;
        Ok(None)
    }

    /// Element type, for collection and map targets.
    fn element_type() -> Option<TypeRef> {
        None
    }

    /// Schema of a record target.
    fn nested_schema() -> Option<NestedSchema> {
        None
    }
}

/// Coerce `raw` to `T`. `Ok(None)` means NULL with nothing to assign.
pub fn coerce<T: FromRaw>(raw: RawValue, cx: &Context) -> Result<Option<T>> {
    if raw.is_null() {
        return T::from_null(cx);
    }
    T::from_raw(raw, cx).map(Some)
}

/// Coerce a collection element; a NULL with nothing to assign is an error.
pub fn coerce_element<T: FromRaw>(raw: RawValue, cx: &Context) -> Result<T> {
    coerce::<T>(raw, cx)?.ok_or_else(|| MapError::NullNotAllowed {
        target: type_name::<T>().to_string(),
    })
}

/// Build `T` from a single value of `S`.
///
/// ```ignore
/// impl FromRaw for UserId {
///     fn from_raw(raw: RawValue, cx: &Context) -> Result<Self> {
///         coerce::construct::<Self, i64>(raw, cx)
///     }
/// }
/// ```
pub fn construct<T, S>(raw: RawValue, cx: &Context) -> Result<T>
where
    T: From<S>,
    S: FromRaw,
{
    S::from_raw(raw, cx).map(T::from)
}

fn null_not_allowed<T>() -> MapError {
    MapError::NullNotAllowed {
        target: type_name::<T>().to_string(),
    }
}

fn primitive_null<T>(cx: &Context, zero: T) -> Result<Option<T>> {
    if cx.options().is(FieldOption::AllowPrimitiveDefault) {
        debug!(target_type = type_name::<T>(), "NULL replaced by primitive default");
        return Ok(Some(zero));
    }
    Err(null_not_allowed::<T>())
}

// ============================================================================
// Primitives
// ============================================================================

fn is_integral(value: f64) -> bool {
    value.is_finite() && value.fract() == 0.0 && value >= i64::MIN as f64 && value <= i64::MAX as f64
}

fn integer<T>(raw: RawValue) -> Result<T>
where
    T: TryFrom<i64> + FromStr + 'static,
    <T as FromStr>::Err: fmt::Display,
{
    let target = type_name::<T>();
    let wide = match raw {
        RawValue::Int2(v) => i64::from(v),
        RawValue::Int4(v) => i64::from(v),
        RawValue::Int8(v) => v,
        RawValue::Float4(v) if is_integral(f64::from(v)) => f64::from(v) as i64,
        RawValue::Float8(v) if is_integral(v) => v as i64,
        RawValue::Float4(_) | RawValue::Float8(_) => {
            return Err(MapError::not_convertible(raw.to_string(), target, "not an integral value"))
        }
        RawValue::Text(text) => {
            return text
                .trim()
                .parse::<T>()
                .map_err(|e| MapError::not_convertible(text.as_str(), target, e))
        }
        other => return Err(MapError::not_assignable(other.type_name(), target)),
    };
    T::try_from(wide).map_err(|_| MapError::not_convertible(wide.to_string(), target, "out of range"))
}

fn float<T>(raw: RawValue, narrow: fn(f64) -> T) -> Result<T>
where
    T: FromStr + 'static,
    <T as FromStr>::Err: fmt::Display,
{
    let target = type_name::<T>();
    if let Some(value) = raw.as_f64() {
        return Ok(narrow(value));
    }
    match raw {
        RawValue::Text(text) => text
            .trim()
            .parse::<T>()
            .map_err(|e| MapError::not_convertible(text.as_str(), target, e)),
        other => Err(MapError::not_assignable(other.type_name(), target)),
    }
}

macro_rules! integer_from_raw {
    ($($ty:ty),* $(,)?) => {$(
        impl FromRaw for $ty {
            fn from_raw(raw: RawValue, _cx: &Context) -> Result<Self> {
                integer::<$ty>(raw)
            }

            fn from_null(cx: &Context) -> Result<Option<Self>> {
                primitive_null(cx, 0)
            }
        }
    )*};
}

integer_from_raw!(i8, i16, i32, i64, u8, u16, u32, u64);

impl FromRaw for f32 {
    fn from_raw(raw: RawValue, _cx: &Context) -> Result<Self> {
        if let RawValue::Float4(v) = raw {
            return Ok(v);
        }
        float(raw, |v| v as f32)
    }

    fn from_null(cx: &Context) -> Result<Option<Self>> {
        primitive_null(cx, 0.0)
    }
}

impl FromRaw for f64 {
    fn from_raw(raw: RawValue, _cx: &Context) -> Result<Self> {
        float(raw, |v| v)
    }

    fn from_null(cx: &Context) -> Result<Option<Self>> {
        primitive_null(cx, 0.0)
    }
}

/// Parse a boolean literal: `t`, `true`, `1`, `f`, `false`, `0`, any case.
pub fn parse_bool(text: &str) -> Result<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "t" | "true" | "1" => Ok(true),
        "f" | "false" | "0" => Ok(false),
        _ => Err(MapError::not_convertible(text, "bool", "expected t, true, 1, f, false or 0")),
    }
}

impl FromRaw for bool {
    fn from_raw(raw: RawValue, _cx: &Context) -> Result<Self> {
        match raw {
            RawValue::Bool(v) => Ok(v),
            RawValue::Text(text) => parse_bool(&text),
            other => Err(MapError::not_assignable(other.type_name(), "bool")),
        }
    }

    fn from_null(cx: &Context) -> Result<Option<Self>> {
        primitive_null(cx, false)
    }
}

impl FromRaw for char {
    fn from_raw(raw: RawValue, _cx: &Context) -> Result<Self> {
        match raw {
            RawValue::Char(c) => Ok(c),
            RawValue::Text(text) => {
                let mut chars = text.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Ok(c),
                    _ => Err(MapError::not_convertible(text.as_str(), "char", "expected exactly one character")),
                }
            }
            other => Err(MapError::not_assignable(other.type_name(), "char")),
        }
    }

    fn from_null(cx: &Context) -> Result<Option<Self>> {
        primitive_null(cx, '\0')
    }
}

// ============================================================================
// Text, binary and temporal targets
// ============================================================================

impl FromRaw for String {
    fn from_raw(raw: RawValue, _cx: &Context) -> Result<Self> {
        Ok(match raw {
            RawValue::Text(text) => text,
            RawValue::Composite(handle) => handle.into_value(),
            other => other.to_string(),
        })
    }
}

impl FromRaw for Bytes {
    fn from_raw(raw: RawValue, _cx: &Context) -> Result<Self> {
        match raw {
            RawValue::Bytea(data) => Ok(Bytes::from(data)),
            RawValue::Text(text) => decode_bytea_hex(&text)
                .map(Bytes::from)
                .ok_or_else(|| MapError::not_convertible(text.as_str(), "bytes", "expected \\x hex format")),
            other => Err(MapError::not_assignable(other.type_name(), "bytes")),
        }
    }
}

impl FromRaw for Uuid {
    fn from_raw(raw: RawValue, _cx: &Context) -> Result<Self> {
        match raw {
            RawValue::Uuid(bytes) => Ok(Uuid::from_bytes(bytes)),
            RawValue::Text(text) => {
                Uuid::parse_str(text.trim()).map_err(|e| MapError::not_convertible(text.as_str(), "uuid", e))
            }
            other => Err(MapError::not_assignable(other.type_name(), "uuid")),
        }
    }
}

impl FromRaw for NaiveDateTime {
    fn from_raw(raw: RawValue, _cx: &Context) -> Result<Self> {
        match raw {
            RawValue::Timestamp(ts) => Ok(ts),
            RawValue::TimestampTz(ts) => Ok(ts.naive_utc()),
            RawValue::Date(date) => Ok(date.and_time(NaiveTime::MIN)),
            RawValue::Text(text) => {
                parse_timestamp(&text).map_err(|e| MapError::not_convertible(text.as_str(), "timestamp", e))
            }
            other => Err(MapError::not_assignable(other.type_name(), "timestamp")),
        }
    }
}

impl FromRaw for DateTime<Utc> {
    fn from_raw(raw: RawValue, _cx: &Context) -> Result<Self> {
        match raw {
            RawValue::TimestampTz(ts) => Ok(ts),
            RawValue::Timestamp(ts) => Ok(ts.and_utc()),
            RawValue::Text(text) => {
                parse_timestamptz(&text).map_err(|e| MapError::not_convertible(text.as_str(), "timestamptz", e))
            }
            other => Err(MapError::not_assignable(other.type_name(), "timestamptz")),
        }
    }
}

impl FromRaw for NaiveDate {
    fn from_raw(raw: RawValue, _cx: &Context) -> Result<Self> {
        match raw {
            RawValue::Date(date) => Ok(date),
            RawValue::Timestamp(ts) => Ok(ts.date()),
            RawValue::Text(text) => NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d")
                .map_err(|e| MapError::not_convertible(text.as_str(), "date", e)),
            other => Err(MapError::not_assignable(other.type_name(), "date")),
        }
    }
}

impl FromRaw for NaiveTime {
    fn from_raw(raw: RawValue, _cx: &Context) -> Result<Self> {
        match raw {
            RawValue::Time(time) => Ok(time),
            RawValue::Timestamp(ts) => Ok(ts.time()),
            RawValue::Text(text) => NaiveTime::parse_from_str(text.trim(), "%H:%M:%S%.f")
                .map_err(|e| MapError::not_convertible(text.as_str(), "time", e)),
            other => Err(MapError::not_assignable(other.type_name(), "time")),
        }
    }
}

impl FromRaw for JsonValue {
    fn from_raw(raw: RawValue, _cx: &Context) -> Result<Self> {
        match raw {
            RawValue::Json(value) => Ok(value),
            RawValue::Text(text) => {
                serde_json::from_str(&text).map_err(|e| MapError::not_convertible(text.as_str(), "json", e))
            }
            RawValue::Bool(v) => Ok(JsonValue::from(v)),
            RawValue::Int2(v) => Ok(JsonValue::from(v)),
            RawValue::Int4(v) => Ok(JsonValue::from(v)),
            RawValue::Int8(v) => Ok(JsonValue::from(v)),
            RawValue::Float4(v) => Ok(JsonValue::from(v)),
            RawValue::Float8(v) => Ok(JsonValue::from(v)),
            other => Err(MapError::not_assignable(other.type_name(), "json")),
        }
    }
}

// ============================================================================
// Wrappers
// ============================================================================

impl<T: FromRaw> FromRaw for Option<T> {
    fn from_raw(raw: RawValue, cx: &Context) -> Result<Self> {
        T::from_raw(raw, cx).map(Some)
    }

    fn from_null(_cx: &Context) -> Result<Option<Self>> {
        Ok(Some(None))
    }

    fn element_type() -> Option<TypeRef> {
        T::element_type()
    }

    fn nested_schema() -> Option<NestedSchema> {
        T::nested_schema()
    }
}

impl<T: FromRaw> FromRaw for Box<T> {
    fn from_raw(raw: RawValue, cx: &Context) -> Result<Self> {
        T::from_raw(raw, cx).map(Box::new)
    }

    fn from_null(cx: &Context) -> Result<Option<Self>> {
        Ok(T::from_null(cx)?.map(Box::new))
    }

    fn element_type() -> Option<TypeRef> {
        T::element_type()
    }

    fn nested_schema() -> Option<NestedSchema> {
        T::nested_schema()
    }
}

// ============================================================================
// Collections and maps
// ============================================================================

fn array_elements(raw: RawValue, cx: &Context, target: &str) -> Result<Vec<RawValue>> {
    match raw {
        RawValue::Array(items) => Ok(items),
        RawValue::DbArray(handle) => Ok(handle.iter().cloned().collect()),
        RawValue::Text(text) => {
            let elements = LiteralParser::new(LiteralKind::Array)
                .with_capacity(cx.element_capacity())
                .parse(&text)?;
            Ok(elements
                .into_iter()
                .map(|e| e.map_or(RawValue::Null, RawValue::Text))
                .collect())
        }
        other => Err(MapError::not_assignable(other.type_name(), target)),
    }
}

/// Fill a default-constructed collection `C` with the coerced elements.
///
/// Element order is kept; whether duplicates survive is up to `C`.
pub fn collection<C, T>(raw: RawValue, cx: &Context) -> Result<C>
where
    C: Default + Extend<T> + 'static,
    T: FromRaw,
{
    let cx = cx.descend()?.with_options(FieldOptions::empty());
    let items = array_elements(raw, &cx, type_name::<C>())?;
    let mut out = C::default();
    for (i, item) in items.into_iter().enumerate() {
        let value = coerce_element::<T>(item, &cx).map_err(|e| e.at_index(i))?;
        out.extend(iter::once(value));
    }
    trace!(target_type = type_name::<C>(), depth = cx.depth(), "collection filled");
    Ok(out)
}

fn hstore_entries(raw: RawValue, target: &str) -> Result<Vec<hstore::Entry>> {
    match raw {
        RawValue::Hstore(entries) => Ok(entries),
        RawValue::Text(text) => Ok(hstore::parse(&text)?),
        other => Err(MapError::not_assignable(other.type_name(), target)),
    }
}

/// Fill a default-constructed map `M` from an hstore value.
pub fn string_map<M, V>(raw: RawValue, cx: &Context) -> Result<M>
where
    M: Default + Extend<(String, V)> + 'static,
    V: FromRaw,
{
    let cx = cx.descend()?.with_options(FieldOptions::empty());
    let mut out = M::default();
    for (key, value) in hstore_entries(raw, type_name::<M>())? {
        let raw = value.map_or(RawValue::Null, RawValue::Text);
        let value = coerce_element::<V>(raw, &cx).map_err(|e| e.in_field(key.as_str()))?;
        out.extend(iter::once((key, value)));
    }
    Ok(out)
}

macro_rules! collection_from_raw {
    ($($coll:ident<T $(: $bound:path)?>),* $(,)?) => {$(
        impl<T: FromRaw $(+ $bound)?> FromRaw for $coll<T> {
            fn from_raw(raw: RawValue, cx: &Context) -> Result<Self> {
                collection::<Self, T>(raw, cx)
            }

            fn element_type() -> Option<TypeRef> {
                Some(TypeRef::of::<T>())
            }
        }
    )*};
}

collection_from_raw!(Vec<T>, VecDeque<T>, LinkedList<T>, BTreeSet<T: Ord>);

impl<T: FromRaw + Eq + Hash> FromRaw for HashSet<T> {
    fn from_raw(raw: RawValue, cx: &Context) -> Result<Self> {
        collection::<Self, T>(raw, cx)
    }

    fn element_type() -> Option<TypeRef> {
        Some(TypeRef::of::<T>())
    }
}

impl<V: FromRaw> FromRaw for HashMap<String, V> {
    fn from_raw(raw: RawValue, cx: &Context) -> Result<Self> {
        string_map::<Self, V>(raw, cx)
    }

    fn element_type() -> Option<TypeRef> {
        Some(TypeRef::of::<V>())
    }
}

impl<V: FromRaw> FromRaw for BTreeMap<String, V> {
    fn from_raw(raw: RawValue, cx: &Context) -> Result<Self> {
        string_map::<Self, V>(raw, cx)
    }

    fn element_type() -> Option<TypeRef> {
        Some(TypeRef::of::<V>())
    }
}

// ============================================================================
// Records
// ============================================================================

/// Where field values come from while filling a record.
pub(crate) enum Source<'a> {
    /// Composite elements, addressed by ordinal
    Elements(&'a [Option<String>]),
    /// Result row, addressed by column name
    Row { row: &'a Row, strict: bool },
}

impl<'a> Source<'a> {
    /// Raw value for a non-embedded field, `None` if absent.
    fn lookup(&self, field: &FieldSchema, cx: &Context) -> Result<Option<RawValue>> {
        match self {
            Source::Elements(elements) => Ok(elements
                .get(field.ordinal() - 1)
                .map(|e| e.clone().map_or(RawValue::Null, RawValue::Text))),
            Source::Row { row, .. } => match row.find_column(field.database_name()) {
                Some(index) => {
                    let raw = row.value(index).cloned().unwrap_or(RawValue::Null);
                    field.data_kind().extract(raw, cx).map(Some)
                }
                None => Ok(None),
            },
        }
    }

    /// Source for an embedded field's own schema.
    fn embedded(&self, field: &FieldSchema) -> Source<'a> {
        match *self {
            Source::Elements(elements) => {
                let range = field.positions();
                let start = range.start.min(elements.len());
                let end = range.end.min(elements.len());
                Source::Elements(&elements[start..end])
            }
            Source::Row { row, strict } => Source::Row { row, strict },
        }
    }

    /// Whether any slot of an embedded field is present.
    fn has_embedded(&self, field: &FieldSchema) -> Result<bool> {
        match self {
            Source::Elements(elements) => Ok(field.positions().start < elements.len()),
            Source::Row { row, .. } => any_column(row, field),
        }
    }

    fn missing(&self, field: &FieldSchema) -> Option<MapError> {
        match self {
            Source::Elements(elements) => Some(MapError::MissingElement {
                ordinal: field.ordinal(),
                len: elements.len(),
            }),
            Source::Row { strict: true, .. } => Some(MapError::MissingColumn {
                column: field.database_name().to_string(),
            }),
            Source::Row { strict: false, .. } => None,
        }
    }
}

fn any_column(row: &Row, field: &FieldSchema) -> Result<bool> {
    match field.nested_schema() {
        Some(nested) if field.is(FieldOption::Embed) => {
            for inner in nested.fields()?.iter() {
                if any_column(row, inner)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        _ => Ok(row.find_column(field.database_name()).is_some()),
    }
}

/// What an assigner receives for its field.
pub(crate) enum Slot<'a> {
    Value(RawValue),
    Embedded(Source<'a>),
}

impl Slot<'_> {
    pub(crate) fn into_value<T>(self) -> Result<RawValue> {
        match self {
            Slot::Value(raw) => Ok(raw),
            Slot::Embedded(_) => Err(MapError::not_assignable("embedded record", type_name::<T>())),
        }
    }
}

/// Fill `target` field by field from `source`.
pub(crate) fn fill<T>(schema: &Schema<T>, target: &mut T, source: &Source<'_>, cx: &Context) -> Result<()> {
    for (field, assign) in schema.entries() {
        let cx = cx.with_options(field.options());

        let slot = if field.is(FieldOption::Embed) {
            if field.is(FieldOption::Optional)
                && !source
                    .has_embedded(field)
                    .map_err(|e| e.in_field(field.name()))?
            {
                debug!(
                    record = schema.type_name(),
                    field = field.name(),
                    "no values for embedded field, skipped"
                );
                continue;
            }
            Slot::Embedded(source.embedded(field))
        } else {
            match source.lookup(field, &cx).map_err(|e| e.in_field(field.name()))? {
                Some(raw) => Slot::Value(raw),
                None => {
                    let missing = source.missing(field);
                    match missing {
                        Some(err) if !field.is(FieldOption::Optional) => {
                            return Err(err.in_field(field.name()))
                        }
                        _ => {
                            debug!(
                                record = schema.type_name(),
                                field = field.name(),
                                column = field.database_name(),
                                "no value for field, skipped"
                            );
                            continue;
                        }
                    }
                }
            }
        };

        assign(target, slot, &cx).map_err(|e| e.in_field(field.name()))?;
    }
    Ok(())
}

pub(crate) fn fill_embedded<E>(schema: &Schema<E>, target: &mut E, slot: Slot<'_>, cx: &Context) -> Result<()> {
    match slot {
        Slot::Embedded(source) => fill(schema, target, &source, cx),
        Slot::Value(raw) => Err(MapError::not_assignable(raw.type_name(), schema.type_name())),
    }
}

/// Coerce a composite value into record `T`.
///
/// Accepts a composite handle or composite literal text; the elements fill
/// `T::default()` by ordinal.
pub fn composite<T: Record>(raw: RawValue, cx: &Context) -> Result<T> {
    let text = match raw {
        RawValue::Composite(handle) => handle.into_value(),
        RawValue::Text(text) if text.starts_with('(') => text,
        other => return Err(MapError::not_assignable(other.type_name(), type_name::<T>())),
    };

    let cx = cx.descend()?;
    let elements = LiteralParser::new(LiteralKind::Composite)
        .with_capacity(cx.element_capacity())
        .parse(&text)?;
    let schema = SchemaCache::global().get::<T>()?;

    let mut record = T::default();
    fill(&schema, &mut record, &Source::Elements(&elements), &cx)?;
    trace!(record = schema.type_name(), depth = cx.depth(), "composite filled");
    Ok(record)
}

/// Implement [`FromRaw`] for record types, so they can be used as field,
/// element and map value types.
///
/// ```ignore
/// #[derive(Default)]
/// struct Address { street: String, zip: i32 }
///
/// impl Record for Address {
///     fn describe(s: &mut SchemaBuilder<Self>) {
///         s.field("street", |r: &mut Self, v: String| r.street = v);
///         s.field("zip", |r: &mut Self, v: i32| r.zip = v);
///     }
/// }
///
/// impl_record!(Address);
/// ```
#[macro_export]
macro_rules! impl_record {
    ($($ty:ty),+ $(,)?) => {$(
        impl $crate::coerce::FromRaw for $ty {
            fn from_raw(
                raw: $crate::pg::RawValue,
                cx: &$crate::coerce::Context,
            ) -> $crate::error::Result<Self> {
                $crate::coerce::composite::<Self>(raw, cx)
            }

            fn nested_schema() -> Option<$crate::schema::NestedSchema> {
                Some($crate::schema::NestedSchema::of::<Self>())
            }
        }
    )+};
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pg::{ArrayHandle, CompositeHandle, Oid};

    fn cx() -> Context {
        Context::default()
    }

    fn text(s: &str) -> RawValue {
        RawValue::Text(s.to_string())
    }

    #[test]
    fn test_null_rules() {
        assert_eq!(coerce::<Option<i32>>(RawValue::Null, &cx()).unwrap(), Some(None));
        assert_eq!(coerce::<String>(RawValue::Null, &cx()).unwrap(), None);
        assert!(matches!(
            coerce::<i32>(RawValue::Null, &cx()),
            Err(MapError::NullNotAllowed { .. })
        ));

        let lenient = cx().with_options(FieldOptions::empty().with(FieldOption::AllowPrimitiveDefault));
        assert_eq!(coerce::<i32>(RawValue::Null, &lenient).unwrap(), Some(0));
        assert_eq!(coerce::<bool>(RawValue::Null, &lenient).unwrap(), Some(false));
        assert_eq!(coerce::<f64>(RawValue::Null, &lenient).unwrap(), Some(0.0));

        assert!(matches!(
            coerce_element::<String>(RawValue::Null, &cx()),
            Err(MapError::NullNotAllowed { .. })
        ));
    }

    #[test]
    fn test_numeric_conversion() {
        assert_eq!(i64::from_raw(RawValue::Int2(7), &cx()).unwrap(), 7);
        assert_eq!(i16::from_raw(RawValue::Int8(300), &cx()).unwrap(), 300);
        assert_eq!(i32::from_raw(RawValue::Float8(12.0), &cx()).unwrap(), 12);
        assert_eq!(i32::from_raw(text(" 42 "), &cx()).unwrap(), 42);
        assert_eq!(f64::from_raw(RawValue::Int4(3), &cx()).unwrap(), 3.0);
        assert_eq!(f32::from_raw(text("1.5"), &cx()).unwrap(), 1.5);

        assert!(matches!(
            i8::from_raw(RawValue::Int4(1000), &cx()),
            Err(MapError::NotConvertible { .. })
        ));
        assert!(matches!(
            i32::from_raw(RawValue::Float8(1.5), &cx()),
            Err(MapError::NotConvertible { .. })
        ));
        assert!(matches!(
            u32::from_raw(RawValue::Int4(-1), &cx()),
            Err(MapError::NotConvertible { .. })
        ));
        assert!(matches!(
            i32::from_raw(text("abc"), &cx()),
            Err(MapError::NotConvertible { .. })
        ));
        assert!(matches!(
            i32::from_raw(RawValue::Bool(true), &cx()),
            Err(MapError::NotAssignable { .. })
        ));
    }

    #[test]
    fn test_bool_and_char() {
        for (input, expected) in [("t", true), ("TRUE", true), ("1", true), ("f", false), ("False", false), ("0", false)] {
            assert_eq!(bool::from_raw(text(input), &cx()).unwrap(), expected, "{}", input);
        }
        assert!(bool::from_raw(text("yes"), &cx()).is_err());

        assert_eq!(char::from_raw(text("x"), &cx()).unwrap(), 'x');
        assert_eq!(char::from_raw(text("é"), &cx()).unwrap(), 'é');
        assert!(matches!(
            char::from_raw(text("xy"), &cx()),
            Err(MapError::NotConvertible { .. })
        ));
        assert!(char::from_raw(text(""), &cx()).is_err());
    }

    #[test]
    fn test_string_from_display() {
        assert_eq!(String::from_raw(RawValue::Int4(5), &cx()).unwrap(), "5");
        assert_eq!(String::from_raw(RawValue::Bool(true), &cx()).unwrap(), "t");
        let composite = RawValue::Composite(CompositeHandle::new("pair", "(1,2)"));
        assert_eq!(String::from_raw(composite, &cx()).unwrap(), "(1,2)");
    }

    #[test]
    fn test_temporal_and_uuid() {
        let ts = NaiveDateTime::from_raw(text("2024-01-15 10:30:00"), &cx()).unwrap();
        assert_eq!(ts.to_string(), "2024-01-15 10:30:00");
        let date = NaiveDate::from_raw(RawValue::Timestamp(ts), &cx()).unwrap();
        assert_eq!(date.to_string(), "2024-01-15");
        let utc = DateTime::<Utc>::from_raw(RawValue::Timestamp(ts), &cx()).unwrap();
        assert_eq!(utc.naive_utc(), ts);

        let id = Uuid::from_raw(text("550e8400-e29b-41d4-a716-446655440000"), &cx()).unwrap();
        assert_eq!(Uuid::from_raw(RawValue::Uuid(*id.as_bytes()), &cx()).unwrap(), id);

        let bytes = Bytes::from_raw(text("\\xdead"), &cx()).unwrap();
        assert_eq!(&bytes[..], &[0xde, 0xad]);
    }

    #[test]
    fn test_collections() {
        let list = Vec::<i32>::from_raw(text("{3,1,3}"), &cx()).unwrap();
        assert_eq!(list, vec![3, 1, 3]);

        let set = BTreeSet::<i32>::from_raw(text("{3,1,3}"), &cx()).unwrap();
        assert_eq!(set.into_iter().collect::<Vec<_>>(), vec![1, 3]);

        let hashed = HashSet::<String>::from_raw(text("{a,b,a}"), &cx()).unwrap();
        assert_eq!(hashed.len(), 2);

        let handle = ArrayHandle::new(Oid::INT4, vec![RawValue::Int4(1), RawValue::Null]);
        let opt = Vec::<Option<i64>>::from_raw(RawValue::DbArray(handle), &cx()).unwrap();
        assert_eq!(opt, vec![Some(1), None]);

        let nested = Vec::<Vec<i32>>::from_raw(text("{{1,2},{3}}"), &cx()).unwrap();
        assert_eq!(nested, vec![vec![1, 2], vec![3]]);

        let err = Vec::<i32>::from_raw(text("{1,NULL}"), &cx()).unwrap_err();
        assert_eq!(err.field_path(), vec!["[1]"]);
        assert!(matches!(err.root_cause(), MapError::NullNotAllowed { .. }));

        assert!(matches!(
            Vec::<i32>::from_raw(RawValue::Int4(1), &cx()),
            Err(MapError::NotAssignable { .. })
        ));
    }

    #[test]
    fn test_hstore_maps() {
        let map = HashMap::<String, i32>::from_raw(text("a=>1, b=>2"), &cx()).unwrap();
        assert_eq!(map.get("a"), Some(&1));
        assert_eq!(map.get("b"), Some(&2));

        let entries = vec![("k".to_string(), None)];
        let optional = BTreeMap::<String, Option<String>>::from_raw(RawValue::Hstore(entries), &cx()).unwrap();
        assert_eq!(optional.get("k"), Some(&None));

        let err = HashMap::<String, i32>::from_raw(text("k=>NULL"), &cx()).unwrap_err();
        assert_eq!(err.field_path(), vec!["k"]);
    }

    #[test]
    fn test_depth_limit() {
        let shallow = Context::new(&MapperConfig::default().max_depth(1));
        assert!(Vec::<i32>::from_raw(text("{1}"), &shallow).is_ok());
        assert!(matches!(
            Vec::<Vec<i32>>::from_raw(text("{{1}}"), &shallow).unwrap_err().root_cause(),
            MapError::SchemaTooDeep { limit: 1 }
        ));
    }

    #[derive(Debug, PartialEq)]
    struct UserId(i64);

    impl From<i64> for UserId {
        fn from(v: i64) -> Self {
            UserId(v)
        }
    }

    impl FromRaw for UserId {
        fn from_raw(raw: RawValue, cx: &Context) -> Result<Self> {
            construct::<Self, i64>(raw, cx)
        }
    }

    #[test]
    fn test_construct_newtype() {
        assert_eq!(UserId::from_raw(text("17"), &cx()).unwrap(), UserId(17));
        assert_eq!(coerce::<UserId>(RawValue::Null, &cx()).unwrap(), None);
    }
}
