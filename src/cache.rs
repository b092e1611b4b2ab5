//! Process-wide cache of derived record schemas.
//!
//! Each record type is derived at most once per cache. Concurrent first
//! lookups of the same type block on a per-type cell while one thread runs
//! the derivation; lookups of other types are not blocked. Failed
//! derivations are cached as well and every later lookup sees the same
//! error.

use std::any::{type_name, Any, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::{Lazy, OnceCell};
use parking_lot::RwLock;
use tracing::debug;

use crate::error::{MapError, Result};
use crate::schema::{Record, Schema, SchemaBuilder};

type Published = std::result::Result<Arc<dyn Any + Send + Sync>, MapError>;
type Cell = Arc<OnceCell<Published>>;

static GLOBAL: Lazy<SchemaCache> = Lazy::new(SchemaCache::new);

thread_local! {
    /// Record types whose derivation is running on this thread.
    static DERIVING: RefCell<Vec<TypeId>> = const { RefCell::new(Vec::new()) };
}

/// Pops the in-progress marker even if `describe` panics.
struct DerivingGuard;

impl DerivingGuard {
    fn enter(id: TypeId) -> Self {
        DERIVING.with(|stack| stack.borrow_mut().push(id));
        DerivingGuard
    }
}

impl Drop for DerivingGuard {
    fn drop(&mut self) {
        DERIVING.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// Maps record types to their derived schemas.
#[derive(Default)]
pub struct SchemaCache {
    entries: RwLock<HashMap<TypeId, Cell>>,
}

impl SchemaCache {
    /// Create an empty cache. Most callers want [`SchemaCache::global`].
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide cache.
    pub fn global() -> &'static SchemaCache {
        &GLOBAL
    }

    /// Schema of `T`, deriving it on first use.
    ///
    /// A record that embeds or extends itself, directly or through other
    /// records, fails with `SchemaDerivation`. Such a cycle is only detected
    /// when the whole chain is derived on one thread, which is always the
    /// case since nested derivations run on the deriving thread.
    pub fn get<T: Record>(&self) -> Result<Arc<Schema<T>>> {
        let id = TypeId::of::<T>();
        let cell = self.cell(id);

        if let Some(published) = cell.get() {
            return downcast::<T>(published);
        }

        if DERIVING.with(|stack| stack.borrow().contains(&id)) {
            return Err(MapError::derivation(
                type_name::<T>(),
                "record embeds or extends itself",
            ));
        }

        let published = cell.get_or_init(|| {
            let _guard = DerivingGuard::enter(id);
            derive::<T>(self).map(|schema| Arc::new(schema) as Arc<dyn Any + Send + Sync>)
        });
        downcast::<T>(published)
    }

    /// Whether a schema (or a derivation error) is published for `T`.
    pub fn contains<T: Record>(&self) -> bool {
        self.entries
            .read()
            .get(&TypeId::of::<T>())
            .is_some_and(|cell| cell.get().is_some())
    }

    /// Number of published entries.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .values()
            .filter(|cell| cell.get().is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cell(&self, id: TypeId) -> Cell {
        if let Some(cell) = self.entries.read().get(&id) {
            return Arc::clone(cell);
        }
        Arc::clone(self.entries.write().entry(id).or_default())
    }
}

/// Schema of `T` from the process-wide cache.
pub fn get_schema<T: Record>() -> Result<Arc<Schema<T>>> {
    SchemaCache::global().get::<T>()
}

fn derive<T: Record>(cache: &SchemaCache) -> Result<Schema<T>> {
    let mut builder = SchemaBuilder::<T>::new();
    T::describe(&mut builder);
    let result = builder.build(cache);
    match &result {
        Ok(schema) => debug!(
            record = type_name::<T>(),
            fields = schema.len(),
            width = schema.width(),
            "schema derived"
        ),
        Err(e) => debug!(record = type_name::<T>(), error = %e, "schema derivation failed"),
    }
    result
}

fn downcast<T: Record>(published: &Published) -> Result<Arc<Schema<T>>> {
    match published {
        Ok(schema) => Arc::clone(schema).downcast::<Schema<T>>().map_err(|_| {
            MapError::derivation(type_name::<T>(), "cache entry holds another type")
        }),
        Err(e) => Err(e.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    static DESCRIBED: AtomicUsize = AtomicUsize::new(0);

    #[derive(Default)]
    struct Counted {
        id: i64,
    }

    impl Record for Counted {
        fn describe(s: &mut SchemaBuilder<Self>) {
            DESCRIBED.fetch_add(1, Ordering::SeqCst);
            s.field("id", |r: &mut Self, v: i64| r.id = v);
        }
    }

    #[test]
    fn test_concurrent_lookups_derive_once() {
        let cache = SchemaCache::new();
        let schemas: Vec<_> = thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| cache.get::<Counted>().unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(DESCRIBED.load(Ordering::SeqCst), 1);
        assert!(schemas.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert!(cache.contains::<Counted>());
        assert_eq!(cache.len(), 1);
    }

    #[derive(Default)]
    struct Broken;

    impl Record for Broken {
        fn describe(s: &mut SchemaBuilder<Self>) {
            s.field("x", |_: &mut Self, _: i32| {});
            s.field("x", |_: &mut Self, _: i32| {}).column("y");
        }
    }

    #[test]
    fn test_errors_are_cached() {
        let cache = SchemaCache::new();
        let first = cache.get::<Broken>().unwrap_err();
        let second = cache.get::<Broken>().unwrap_err();
        assert_eq!(first, second);
        assert!(cache.contains::<Broken>());
    }

    #[derive(Default)]
    struct Node {
        child: Option<Box<Node>>,
    }

    impl Record for Node {
        fn describe(s: &mut SchemaBuilder<Self>) {
            s.embed("child", |r: &mut Self, v: Node| r.child = Some(Box::new(v)));
        }
    }

    #[test]
    fn test_self_embedding_is_rejected() {
        let cache = SchemaCache::new();
        let err = cache.get::<Node>().unwrap_err();
        assert!(matches!(err, MapError::SchemaDerivation { .. }));
        assert!(err.to_string().contains("itself"));
    }
}
