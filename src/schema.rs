//! Field schemas for record types.
//!
//! A record describes its fields once through [`SchemaBuilder`]. The
//! [`SchemaCache`] turns that description into an immutable [`Schema`]:
//! the flattened, ordinal-ordered list of [`FieldSchema`] entries that the
//! coercion engine walks when filling an instance.
//!
//! Flattening rules:
//! - a base record declared with [`SchemaBuilder::extends`] contributes its
//!   fields first, at ordinals `1..=base.width()`
//! - declared fields follow in declaration order
//! - an embedded record occupies the ordinal range of its own flattened
//!   schema but is a single entry here

use std::any::{type_name, TypeId};
use std::collections::HashSet;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::trace;

use crate::cache::SchemaCache;
use crate::coerce::{self, Context, FromRaw, Slot};
use crate::error::{MapError, Result};
use crate::mapper::DataKind;

/// A type that can be filled from a row or a composite value.
///
/// `Default` is the construction path: every mapped instance starts as
/// `Self::default()` and is then filled field by field.
pub trait Record: Default + Send + Sync + 'static {
    /// Register this record's fields.
    fn describe(schema: &mut SchemaBuilder<Self>);
}

// ============================================================================
// Field options
// ============================================================================

/// Per-field mapping flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldOption {
    /// Absent column / out-of-range element is skipped, not an error
    Optional,
    /// NULL for a primitive target becomes the type's zero value
    AllowPrimitiveDefault,
    /// The field's record is spliced into the enclosing ordinal sequence
    Embed,
}

/// Set of [`FieldOption`]s.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FieldOptions(u8);

impl FieldOptions {
    pub const fn empty() -> Self {
        FieldOptions(0)
    }

    #[inline]
    const fn bit(option: FieldOption) -> u8 {
        1 << option as u8
    }

    pub fn with(self, option: FieldOption) -> Self {
        FieldOptions(self.0 | Self::bit(option))
    }

    #[inline]
    pub fn is(self, option: FieldOption) -> bool {
        self.0 & Self::bit(option) != 0
    }
}

// ============================================================================
// Type references
// ============================================================================

/// Identity and name of a Rust type.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeRef {
    id: TypeId,
    name: &'static str,
}

impl TypeRef {
    pub fn of<T: 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Reference to the schema of a nested record, resolved on first use.
#[derive(Clone)]
pub struct NestedSchema {
    ty: TypeRef,
    resolve: fn() -> Result<Arc<[FieldSchema]>>,
    fields: OnceCell<Arc<[FieldSchema]>>,
}

impl NestedSchema {
    pub fn of<R: Record>() -> Self {
        Self {
            ty: TypeRef::of::<R>(),
            resolve: resolve_fields::<R>,
            fields: OnceCell::new(),
        }
    }

    fn with_fields(self, fields: Arc<[FieldSchema]>) -> Self {
        Self {
            fields: OnceCell::with_value(fields),
            ..self
        }
    }

    pub fn type_ref(&self) -> TypeRef {
        self.ty
    }

    /// The nested record's flattened fields.
    pub fn fields(&self) -> Result<Arc<[FieldSchema]>> {
        self.fields.get_or_try_init(self.resolve).map(Arc::clone)
    }
}

impl fmt::Debug for NestedSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NestedSchema")
            .field("type", &self.ty)
            .field("resolved", &self.fields.get().is_some())
            .finish()
    }
}

fn resolve_fields<R: Record>() -> Result<Arc<[FieldSchema]>> {
    Ok(SchemaCache::global().get::<R>()?.fields_arc())
}

// ============================================================================
// Field schema
// ============================================================================

/// One mapped field of a record.
#[derive(Debug, Clone)]
pub struct FieldSchema {
    name: String,
    database_name: String,
    ordinal: usize,
    span: usize,
    data_kind: DataKind,
    options: FieldOptions,
    element_type: Option<TypeRef>,
    nested: Option<NestedSchema>,
}

impl FieldSchema {
    /// Field identifier as registered.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Column name used for row lookup.
    pub fn database_name(&self) -> &str {
        &self.database_name
    }

    /// 1-based position in the flattened schema.
    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    /// Number of ordinals consumed: 1, or an embedded record's width.
    pub fn span(&self) -> usize {
        self.span
    }

    /// 0-based element range this field reads in a composite value.
    pub fn positions(&self) -> Range<usize> {
        self.ordinal - 1..self.ordinal - 1 + self.span
    }

    pub fn data_kind(&self) -> DataKind {
        self.data_kind
    }

    pub fn options(&self) -> FieldOptions {
        self.options
    }

    #[inline]
    pub fn is(&self, option: FieldOption) -> bool {
        self.options.is(option)
    }

    /// Element type for array, collection and map fields.
    pub fn element_type(&self) -> Option<TypeRef> {
        self.element_type
    }

    /// Schema of a nested or embedded record field.
    pub fn nested_schema(&self) -> Option<&NestedSchema> {
        self.nested.as_ref()
    }
}

/// Assigns one field of `T` from its slot.
pub(crate) type Assigner<T> = Arc<dyn Fn(&mut T, Slot<'_>, &Context) -> Result<()> + Send + Sync>;

/// The flattened field list of a record type plus the code that fills it.
pub struct Schema<T> {
    type_name: &'static str,
    fields: Arc<[FieldSchema]>,
    assigners: Vec<Assigner<T>>,
    width: usize,
}

impl<T> Schema<T> {
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn fields(&self) -> &[FieldSchema] {
        &self.fields
    }

    pub(crate) fn fields_arc(&self) -> Arc<[FieldSchema]> {
        Arc::clone(&self.fields)
    }

    /// Look up a field by its identifier.
    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Number of ordinals the flattened schema spans.
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub(crate) fn entries(&self) -> impl Iterator<Item = (&FieldSchema, &Assigner<T>)> {
        self.fields.iter().zip(self.assigners.iter())
    }
}

impl<T> fmt::Debug for Schema<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("type_name", &self.type_name)
            .field("width", &self.width)
            .field("fields", &self.fields)
            .finish()
    }
}

// ============================================================================
// Name rewriting
// ============================================================================

/// Rewrite a medial-capital identifier to lowercase-underscore form.
///
/// An uppercase letter after a lowercase letter or digit starts a new
/// segment; acronyms stay together until the capital that begins the next
/// word (`myFieldName` -> `my_field_name`, `MyFILEName` -> `my_file_name`).
pub fn snake_case_name(identifier: &str) -> String {
    let chars: Vec<char> = identifier.chars().collect();
    let mut out = String::with_capacity(identifier.len() * 2);

    for (i, &ch) in chars.iter().enumerate() {
        if ch.is_uppercase() {
            if i > 0 {
                let prev = chars[i - 1];
                let next_is_lower = chars.get(i + 1).is_some_and(|c| c.is_lowercase());
                let boundary = prev.is_lowercase()
                    || prev.is_ascii_digit()
                    || (prev.is_uppercase() && next_is_lower);
                if boundary && prev != '_' {
                    out.push('_');
                }
            }
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

// ============================================================================
// Builder
// ============================================================================

type BaseParts<T> = Result<(Arc<[FieldSchema]>, Vec<Assigner<T>>)>;
type EmbedParts<T> = Result<(NestedSchema, Assigner<T>)>;
type BaseFactory<T> = Box<dyn FnOnce(&SchemaCache) -> BaseParts<T>>;
type EmbedFactory<T> = Box<dyn FnOnce(&SchemaCache) -> EmbedParts<T>>;

enum Declared<T> {
    Value {
        assign: Assigner<T>,
        element_type: Option<TypeRef>,
        nested: Option<NestedSchema>,
    },
    Embed(EmbedFactory<T>),
}

/// Configuration of one declared field; returned by [`SchemaBuilder::field`].
pub struct FieldConfig<T> {
    name: String,
    column: Option<String>,
    prefix: Option<String>,
    data_kind: DataKind,
    options: FieldOptions,
    declared: Declared<T>,
}

impl<T> FieldConfig<T> {
    /// Explicit column name; disables name rewriting and prefixes.
    pub fn column(&mut self, name: &str) -> &mut Self {
        self.column = Some(name.to_string());
        self
    }

    /// Field-level name prefix, overriding the record's prefix.
    ///
    /// An empty prefix suppresses the record's prefix for this field.
    pub fn prefix(&mut self, prefix: &str) -> &mut Self {
        self.prefix = Some(prefix.to_string());
        self
    }

    /// Extraction strategy used when reading from a row.
    pub fn data_kind(&mut self, kind: DataKind) -> &mut Self {
        self.data_kind = kind;
        self
    }

    pub fn optional(&mut self) -> &mut Self {
        self.options = self.options.with(FieldOption::Optional);
        self
    }

    pub fn allow_primitive_default(&mut self) -> &mut Self {
        self.options = self.options.with(FieldOption::AllowPrimitiveDefault);
        self
    }
}

/// Collects a record's field declarations.
pub struct SchemaBuilder<T> {
    prefix: Option<String>,
    bases: Vec<BaseFactory<T>>,
    fields: Vec<FieldConfig<T>>,
}

impl<T: Record> SchemaBuilder<T> {
    pub(crate) fn new() -> Self {
        Self {
            prefix: None,
            bases: Vec::new(),
            fields: Vec::new(),
        }
    }

    /// Record-level prefix for generated column names.
    pub fn prefix(&mut self, prefix: &str) -> &mut Self {
        self.prefix = Some(prefix.to_string());
        self
    }

    /// Inherit the fields of `B`, reached through `base`. They come first.
    pub fn extends<B: Record>(&mut self, base: fn(&mut T) -> &mut B) -> &mut Self {
        self.bases.push(Box::new(move |cache: &SchemaCache| -> BaseParts<T> {
            let schema = cache.get::<B>()?;
            let assigners = schema
                .assigners
                .iter()
                .map(|inner| {
                    let inner = Arc::clone(inner);
                    Arc::new(move |target: &mut T, slot: Slot<'_>, cx: &Context| {
                        inner(base(target), slot, cx)
                    }) as Assigner<T>
                })
                .collect::<Vec<_>>();
            Ok((schema.fields_arc(), assigners))
        }));
        self
    }

    /// Declare a field holding a `V`, stored through `setter`.
    pub fn field<V, F>(&mut self, name: &str, setter: F) -> &mut FieldConfig<T>
    where
        V: FromRaw,
        F: Fn(&mut T, V) + Send + Sync + 'static,
    {
        let assign: Assigner<T> = Arc::new(move |target: &mut T, slot: Slot<'_>, cx: &Context| -> Result<()> {
            let raw = slot.into_value::<V>()?;
            // NULL into a type without a NULL representation keeps the current value
            if let Some(value) = coerce::coerce::<V>(raw, cx)? {
                setter(target, value);
            }
            Ok(())
        });
        self.push(
            name,
            FieldOptions::empty(),
            Declared::Value {
                assign,
                element_type: V::element_type(),
                nested: V::nested_schema(),
            },
        )
    }

    /// Declare an embedded record whose fields continue this record's ordinals.
    pub fn embed<E, F>(&mut self, name: &str, setter: F) -> &mut FieldConfig<T>
    where
        E: Record,
        F: Fn(&mut T, E) + Send + Sync + 'static,
    {
        let factory: EmbedFactory<T> = Box::new(move |cache: &SchemaCache| -> EmbedParts<T> {
            let schema = cache.get::<E>()?;
            let nested = NestedSchema::of::<E>().with_fields(schema.fields_arc());
            let assign: Assigner<T> = Arc::new(move |target: &mut T, slot: Slot<'_>, cx: &Context| -> Result<()> {
                let mut embedded = E::default();
                coerce::fill_embedded(&schema, &mut embedded, slot, cx)?;
                setter(target, embedded);
                Ok(())
            });
            Ok((nested, assign))
        });
        self.push(
            name,
            FieldOptions::empty().with(FieldOption::Embed),
            Declared::Embed(factory),
        )
    }

    fn push(&mut self, name: &str, options: FieldOptions, declared: Declared<T>) -> &mut FieldConfig<T> {
        self.fields.push(FieldConfig {
            name: name.to_string(),
            column: None,
            prefix: None,
            data_kind: DataKind::Automatic,
            options,
            declared,
        });
        let last = self.fields.len() - 1;
        &mut self.fields[last]
    }

    /// Flatten the declarations into a schema.
    pub(crate) fn build(self, cache: &SchemaCache) -> Result<Schema<T>> {
        let record = type_name::<T>();
        let global_prefix = self.prefix;

        if self.bases.len() > 1 {
            return Err(MapError::derivation(record, "more than one base record declared"));
        }

        let mut fields: Vec<FieldSchema> = Vec::with_capacity(self.fields.len());
        let mut assigners: Vec<Assigner<T>> = Vec::with_capacity(self.fields.len());

        if let Some(base) = self.bases.into_iter().next() {
            let (base_fields, base_assigners) = base(cache)
                .map_err(|e| MapError::derivation(record, format!("base record: {}", e)))?;
            fields.extend(base_fields.iter().cloned());
            assigners.extend(base_assigners);
        }

        let mut next = fields.iter().map(|f| f.span).sum::<usize>() + 1;

        for config in self.fields {
            if config.name.is_empty() {
                return Err(MapError::derivation(record, "field with an empty name"));
            }

            let database_name = match config.column {
                Some(column) => column,
                None => {
                    let prefix = config
                        .prefix
                        .as_deref()
                        .or(global_prefix.as_deref())
                        .unwrap_or("");
                    format!("{}{}", prefix, snake_case_name(&config.name))
                }
            };

            let (span, element_type, nested, assign) = match config.declared {
                Declared::Value {
                    assign,
                    element_type,
                    nested,
                } => (1, element_type, nested, assign),
                Declared::Embed(factory) => {
                    let (nested, assign) = factory(cache).map_err(|e| {
                        MapError::derivation(record, format!("embedded field {}: {}", config.name, e))
                    })?;
                    let span = nested.fields()?.iter().map(|f| f.span).sum::<usize>();
                    (span, None, Some(nested), assign)
                }
            };

            trace!(
                record,
                field = %config.name,
                column = %database_name,
                ordinal = next,
                "field mapped"
            );

            fields.push(FieldSchema {
                name: config.name,
                database_name,
                ordinal: next,
                span,
                data_kind: config.data_kind,
                options: config.options,
                element_type,
                nested,
            });
            assigners.push(assign);
            next += span;
        }

        let mut names = HashSet::new();
        let mut columns = HashSet::new();
        for field in &fields {
            if !names.insert(field.name.as_str()) {
                return Err(MapError::derivation(
                    record,
                    format!("field {} is declared twice", field.name),
                ));
            }
            if !field.is(FieldOption::Embed) && !columns.insert(field.database_name.as_str()) {
                return Err(MapError::derivation(
                    record,
                    format!("column [{}] is mapped twice", field.database_name),
                ));
            }
        }

        Ok(Schema {
            type_name: record,
            fields: fields.into(),
            assigners,
            width: next - 1,
        })
    }
}
