pub mod sync;

pub use sync::{SearchSync, SyncTask};

use crate::document::{resolve, Map, Value, ID_FIELD, PRIMARY_KEY};
use crate::error::Result;
use crate::store::Namespace;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{PoisonError, RwLock};

/// Full-text search over documents, addressed per namespace.
pub trait SearchBackend: Send + Sync {
    /// Index `content` as the searchable text of document `id`.
    fn upsert(&self, ns: &Namespace, id: &str, content: &str) -> Result<()>;

    fn remove(&self, ns: &Namespace, id: &str) -> Result<()>;

    /// Ids of documents matching every term of `query`, at most `limit`.
    fn search(&self, ns: &Namespace, query: &str, limit: usize) -> Result<Vec<String>>;
}

/// Space-joined text of the string and string-array values at `fields`.
/// `doc` is in storage form, so the `id` field reads the primary key.
pub fn build_search_content<S: AsRef<str>>(doc: &Map, fields: &[S]) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for field in fields {
        let path = match field.as_ref() {
            ID_FIELD => PRIMARY_KEY,
            other => other,
        };
        for value in resolve(doc, path) {
            match value {
                Value::String(s) => parts.push(s),
                Value::Array(items) => parts.extend(items.iter().filter_map(Value::as_str)),
                _ => {}
            }
        }
    }
    parts.retain(|p| !p.is_empty());
    parts.join(" ")
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

/// In-process search backend. A document matches when it contains every
/// query term; hits come back in id order.
#[derive(Debug, Default)]
pub struct MemorySearch {
    namespaces: RwLock<HashMap<Namespace, BTreeMap<String, BTreeSet<String>>>>,
}

impl MemorySearch {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SearchBackend for MemorySearch {
    fn upsert(&self, ns: &Namespace, id: &str, content: &str) -> Result<()> {
        let terms = tokenize(content).collect();
        let mut namespaces = self.namespaces.write().unwrap_or_else(PoisonError::into_inner);
        namespaces
            .entry(ns.clone())
            .or_default()
            .insert(id.to_string(), terms);
        Ok(())
    }

    fn remove(&self, ns: &Namespace, id: &str) -> Result<()> {
        let mut namespaces = self.namespaces.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(docs) = namespaces.get_mut(ns) {
            docs.remove(id);
        }
        Ok(())
    }

    fn search(&self, ns: &Namespace, query: &str, limit: usize) -> Result<Vec<String>> {
        let wanted: Vec<String> = tokenize(query).collect();
        if wanted.is_empty() {
            return Ok(Vec::new());
        }
        let namespaces = self.namespaces.read().unwrap_or_else(PoisonError::into_inner);
        let Some(docs) = namespaces.get(ns) else {
            return Ok(Vec::new());
        };
        Ok(docs
            .iter()
            .filter(|(_, terms)| wanted.iter().all(|w| terms.contains(w)))
            .map(|(id, _)| id.clone())
            .take(limit)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn doc(v: serde_json::Value) -> Map {
        match Value::from(v) {
            Value::Object(m) => m,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_build_search_content() {
        let d = doc(json!({
            "title": "Blade Runner",
            "tags": ["noir", "", "scifi"],
            "year": 1982,
            "cast": [{ "name": "Ford" }, { "name": "Hauer" }],
        }));
        assert_eq!(
            build_search_content(&d, &["title", "tags", "year", "cast.name", "missing"]),
            "Blade Runner noir scifi Ford Hauer"
        );
        assert_eq!(build_search_content(&d, &["year"]), "");
    }

    #[test]
    fn test_search_content_reads_id_from_primary_key() {
        let d = doc(json!({ "_id": "tt0083658", "title": "Blade Runner" }));
        assert_eq!(
            build_search_content(&d, &["id", "title"]),
            "tt0083658 Blade Runner"
        );
    }

    #[test]
    fn test_memory_search_requires_every_term() {
        let search = MemorySearch::new();
        let ns = Namespace::new("rest_movie", "cn");
        search.upsert(&ns, "b", "Blade Runner noir").unwrap();
        search.upsert(&ns, "a", "Runner runs").unwrap();
        search.upsert(&ns, "c", "Alien").unwrap();
        assert_eq!(search.search(&ns, "runner", 10).unwrap(), vec!["a", "b"]);
        assert_eq!(search.search(&ns, "RUNNER noir", 10).unwrap(), vec!["b"]);
        assert_eq!(search.search(&ns, "runner", 1).unwrap(), vec!["a"]);
        assert!(search.search(&ns, "  ", 10).unwrap().is_empty());
        assert!(search
            .search(&Namespace::new("other", "cn"), "alien", 10)
            .unwrap()
            .is_empty());

        search.remove(&ns, "b").unwrap();
        assert!(search.search(&ns, "noir", 10).unwrap().is_empty());
    }
}
