use super::{
    apply_set, arrange, pinned_id, primary_key, unique_collision, DocumentStore, FindOptions,
    Namespace, StoreSession,
};
use crate::document::Map;
use crate::error::{DocrestError, Result};
use crate::index::IndexSpec;
use crate::query::{Condition, Projection};
use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Default)]
struct Collection {
    docs: BTreeMap<String, Map>,
    indexes: Vec<IndexSpec>,
}

impl Collection {
    fn matching<'a>(&'a self, cond: &'a Condition) -> impl Iterator<Item = (&'a String, &'a Map)> {
        let narrowed: Box<dyn Iterator<Item = (&'a String, &'a Map)> + 'a> = match pinned_id(cond) {
            Some(id) => Box::new(self.docs.get_key_value(id).into_iter()),
            None => Box::new(self.docs.iter()),
        };
        narrowed.filter(move |(_, d)| cond.matches(d))
    }

    fn check_unique(&self, id: &str, doc: &Map) -> Result<()> {
        for spec in self.indexes.iter().filter(|s| s.unique) {
            let clash = self
                .docs
                .iter()
                .any(|(other_id, other)| other_id != id && unique_collision(spec, doc, other));
            if clash {
                return Err(DocrestError::Conflict(format!(
                    "duplicate key for index {}",
                    spec.name()
                )));
            }
        }
        Ok(())
    }
}

/// In-process document store. Documents are kept per namespace in primary
/// key order.
#[derive(Debug, Default)]
pub struct MemoryStore {
    namespaces: RwLock<HashMap<Namespace, Collection>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<Namespace, Collection>> {
        self.namespaces.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Namespace, Collection>> {
        self.namespaces.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DocumentStore for MemoryStore {
    fn session(&self) -> Result<Box<dyn StoreSession + '_>> {
        Ok(Box::new(MemorySession { store: self }))
    }
}

struct MemorySession<'a> {
    store: &'a MemoryStore,
}

impl StoreSession for MemorySession<'_> {
    fn insert(&self, ns: &Namespace, doc: Map) -> Result<()> {
        let id = primary_key(&doc)?.to_string();
        let mut namespaces = self.store.write();
        let coll = namespaces.entry(ns.clone()).or_default();
        if coll.docs.contains_key(&id) {
            return Err(DocrestError::Conflict(format!("duplicate id {id}")));
        }
        coll.check_unique(&id, &doc)?;
        coll.docs.insert(id, doc);
        Ok(())
    }

    fn update(&self, ns: &Namespace, cond: &Condition, set: &Map) -> Result<bool> {
        let mut namespaces = self.store.write();
        let Some(coll) = namespaces.get_mut(ns) else {
            return Ok(false);
        };
        let Some(id) = coll.matching(cond).map(|(id, _)| id.clone()).next() else {
            return Ok(false);
        };
        let mut updated = coll.docs.get(&id).cloned().unwrap_or_default();
        apply_set(&mut updated, set)?;
        coll.check_unique(&id, &updated)?;
        coll.docs.insert(id, updated);
        Ok(true)
    }

    fn upsert(&self, ns: &Namespace, id: &str, mut doc: Map) -> Result<()> {
        doc.insert(crate::document::PRIMARY_KEY.to_string(), id.into());
        let mut namespaces = self.store.write();
        let coll = namespaces.entry(ns.clone()).or_default();
        coll.check_unique(id, &doc)?;
        coll.docs.insert(id.to_string(), doc);
        Ok(())
    }

    fn find_one(
        &self,
        ns: &Namespace,
        cond: &Condition,
        projection: &Projection,
    ) -> Result<Option<Map>> {
        let namespaces = self.store.read();
        Ok(namespaces
            .get(ns)
            .and_then(|coll| coll.matching(cond).next().map(|(_, d)| projection.apply(d))))
    }

    fn find(&self, ns: &Namespace, cond: &Condition, opts: &FindOptions) -> Result<Vec<Map>> {
        let namespaces = self.store.read();
        let docs = match namespaces.get(ns) {
            Some(coll) => coll.matching(cond).map(|(_, d)| d.clone()).collect(),
            None => Vec::new(),
        };
        Ok(arrange(docs, opts))
    }

    fn count(&self, ns: &Namespace, cond: &Condition) -> Result<u64> {
        let namespaces = self.store.read();
        Ok(namespaces
            .get(ns)
            .map_or(0, |coll| coll.matching(cond).count() as u64))
    }

    fn remove(&self, ns: &Namespace, cond: &Condition) -> Result<bool> {
        let mut namespaces = self.store.write();
        let Some(coll) = namespaces.get_mut(ns) else {
            return Ok(false);
        };
        let Some(id) = coll.matching(cond).map(|(id, _)| id.clone()).next() else {
            return Ok(false);
        };
        Ok(coll.docs.remove(&id).is_some())
    }

    fn list_indexes(&self, ns: &Namespace) -> Result<Vec<IndexSpec>> {
        let namespaces = self.store.read();
        Ok(namespaces
            .get(ns)
            .map(|coll| coll.indexes.clone())
            .unwrap_or_default())
    }

    fn create_index(&self, ns: &Namespace, spec: &IndexSpec) -> Result<()> {
        let mut namespaces = self.store.write();
        let coll = namespaces.entry(ns.clone()).or_default();
        if coll.indexes.contains(spec) {
            return Ok(());
        }
        if spec.unique {
            let docs: Vec<(&String, &Map)> = coll.docs.iter().collect();
            for (i, (_, a)) in docs.iter().enumerate() {
                if docs[i + 1..].iter().any(|(_, b)| unique_collision(spec, a, b)) {
                    return Err(DocrestError::Conflict(format!(
                        "cannot build unique index {}: duplicate keys",
                        spec.name()
                    )));
                }
            }
        }
        log::debug!("created index {} on {ns}", spec.name());
        coll.indexes.push(spec.clone());
        Ok(())
    }
}
