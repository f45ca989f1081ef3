pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::document::{Map, Value, PRIMARY_KEY};
use crate::error::{DocrestError, Result};
use crate::index::IndexSpec;
use crate::query::{Condition, Predicate, Projection, Sort};
use std::fmt;

/// A (database, table) pair addressing one collection of documents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Namespace {
    pub db: String,
    pub table: String,
}

impl Namespace {
    pub fn new(db: impl Into<String>, table: impl Into<String>) -> Self {
        Namespace {
            db: db.into(),
            table: table.into(),
        }
    }

    /// Key used by the index scheduler.
    pub fn key(&self) -> String {
        format!("{}|{}", self.db, self.table)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.db, self.table)
    }
}

/// Options for [`StoreSession::find`].
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub sort: Sort,
    pub projection: Projection,
    pub skip: usize,
    pub limit: Option<usize>,
}

/// Primitive operations against a document store, all in storage naming
/// (the primary key is `_id`).
pub trait StoreSession {
    /// Insert a new document. A document with the same primary key is a
    /// conflict.
    fn insert(&self, ns: &Namespace, doc: Map) -> Result<()>;

    /// Set the given (possibly dotted) paths on the first document matching
    /// `cond`, atomically. Returns whether a document matched.
    fn update(&self, ns: &Namespace, cond: &Condition, set: &Map) -> Result<bool>;

    /// Create or fully overwrite the document with primary key `id`.
    fn upsert(&self, ns: &Namespace, id: &str, doc: Map) -> Result<()>;

    fn find_one(&self, ns: &Namespace, cond: &Condition, projection: &Projection)
        -> Result<Option<Map>>;

    fn find(&self, ns: &Namespace, cond: &Condition, opts: &FindOptions) -> Result<Vec<Map>>;

    fn count(&self, ns: &Namespace, cond: &Condition) -> Result<u64>;

    /// Remove the first document matching `cond`. Returns whether one was
    /// removed.
    fn remove(&self, ns: &Namespace, cond: &Condition) -> Result<bool>;

    fn list_indexes(&self, ns: &Namespace) -> Result<Vec<IndexSpec>>;

    fn create_index(&self, ns: &Namespace, spec: &IndexSpec) -> Result<()>;
}

/// A document store handing out scoped sessions. A session is released
/// when dropped.
pub trait DocumentStore: Send + Sync {
    fn session(&self) -> Result<Box<dyn StoreSession + '_>>;
}

/// The primary key of a stored document.
pub(crate) fn primary_key(doc: &Map) -> Result<&str> {
    match doc.get(PRIMARY_KEY) {
        Some(Value::String(id)) => Ok(id),
        _ => Err(DocrestError::Storage("document has no string primary key".to_string())),
    }
}

/// The id a condition pins down, when it compares the primary key for
/// equality.
pub(crate) fn pinned_id(cond: &Condition) -> Option<&str> {
    match cond.fields.get(PRIMARY_KEY) {
        Some(Predicate::Eq(Value::String(id))) => Some(id),
        _ => None,
    }
}

/// Apply `set` to `doc`. Dotted keys address nested members and may not
/// pass through a non-object value.
pub(crate) fn apply_set(doc: &mut Map, set: &Map) -> Result<()> {
    for (path, value) in set {
        if !crate::document::set_path(doc, path, value.clone()) {
            return Err(DocrestError::BadRequest(format!(
                "cannot set {path}: parent is not an object"
            )));
        }
    }
    Ok(())
}

/// Sort, page and project a set of matching documents.
pub(crate) fn arrange(mut docs: Vec<Map>, opts: &FindOptions) -> Vec<Map> {
    if !opts.sort.is_empty() {
        docs.sort_by(|a, b| opts.sort.compare(a, b));
    }
    let limit = opts.limit.unwrap_or(usize::MAX);
    docs.into_iter()
        .skip(opts.skip)
        .take(limit)
        .map(|d| opts.projection.apply(&d))
        .collect()
}

/// Whether two documents collide on a unique index. Missing fields
/// compare as null.
pub(crate) fn unique_collision(spec: &IndexSpec, a: &Map, b: &Map) -> bool {
    spec.unique
        && spec.key.iter().all(|k| {
            let va = crate::document::get_path(a, &k.field).unwrap_or(&Value::Null);
            let vb = crate::document::get_path(b, &k.field).unwrap_or(&Value::Null);
            va.loose_eq(vb)
        })
}
