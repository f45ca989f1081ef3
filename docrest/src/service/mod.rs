use crate::error::{DocrestError, Result};
use crate::index::{IndexScheduler, WorkerHandle};
use crate::resource::Resource;
use crate::schema::{IdStrategy, ServiceConfig};
use crate::search::{SearchBackend, SearchSync};
use crate::store::DocumentStore;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

/// State shared by every resource of a service.
pub(crate) struct Context {
    pub store: Arc<dyn DocumentStore>,
    pub scheduler: Arc<IndexScheduler>,
    pub search: Option<SearchSync>,
    pub search_limit: usize,
    pub id_strategy: IdStrategy,
    pub default_db: Option<String>,
    pub default_collection: String,
}

/// A set of compiled resources over one store, plus the background index
/// and search workers serving them.
pub struct Service {
    resources: Vec<Resource>,
    by_name: HashMap<String, usize>,
    ctx: Arc<Context>,
    index_worker: Mutex<Option<WorkerHandle>>,
}

impl Service {
    /// Compile every resource of `config` and start the background workers.
    ///
    /// `search` is required when the config enables search, and ignored
    /// otherwise.
    pub fn from_config(
        config: &ServiceConfig,
        store: Arc<dyn DocumentStore>,
        search: Option<Arc<dyn SearchBackend>>,
    ) -> Result<Self> {
        if config.resources.is_empty() {
            return Err(DocrestError::Config("no resources defined".to_string()));
        }
        let search = match (config.search.enabled, search) {
            (true, Some(backend)) => Some(SearchSync::start(&config.sync, Arc::clone(&store), backend)),
            (true, None) => {
                return Err(DocrestError::Config(
                    "search enabled but no search backend configured".to_string(),
                ))
            }
            (false, Some(_)) => {
                log::info!("search backend supplied but search is disabled; ignoring it");
                None
            }
            (false, None) => None,
        };
        let scheduler = Arc::new(IndexScheduler::new(Arc::clone(&store), &config.index));
        let ctx = Arc::new(Context {
            store,
            scheduler: Arc::clone(&scheduler),
            search,
            search_limit: config.search.limit,
            id_strategy: config.id_generator,
            default_db: config.default_db.clone(),
            default_collection: config.default_collection.clone(),
        });

        let mut resources = Vec::with_capacity(config.resources.len());
        let mut by_name = HashMap::new();
        let mut paths = HashSet::new();
        for rc in &config.resources {
            if by_name.contains_key(&rc.name) {
                return Err(DocrestError::Config(format!("resource {} conflict", rc.name)));
            }
            if !paths.insert(rc.url_path()) {
                return Err(DocrestError::Config(format!(
                    "resource {}: path {} already served",
                    rc.name,
                    rc.url_path()
                )));
            }
            let resource = Resource::compile(rc, Arc::clone(&ctx))?;
            by_name.insert(rc.name.clone(), resources.len());
            resources.push(resource);
        }

        let worker = scheduler.start();
        log::info!("service ready with {} resources", resources.len());
        Ok(Service {
            resources,
            by_name,
            ctx,
            index_worker: Mutex::new(Some(worker)),
        })
    }

    pub fn resource(&self, name: &str) -> Option<&Resource> {
        self.by_name.get(name).map(|&i| &self.resources[i])
    }

    /// Resources in declaration order.
    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    pub fn scheduler(&self) -> &IndexScheduler {
        &self.ctx.scheduler
    }

    /// Stop the index worker and drain the search sync queue.
    pub fn shutdown(&self) {
        let worker = self
            .index_worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            worker.shutdown();
        }
        if let Some(search) = self.ctx.search.as_ref() {
            search.shutdown();
        }
        log::info!("service stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{to_json, Map, Value};
    use crate::error::Reason;
    use crate::handler::{Method, PathVars};
    use crate::query::QueryParams;
    use crate::schema::parse_config_str;
    use crate::search::MemorySearch;
    use crate::query::Condition;
    use crate::store::{MemoryStore, Namespace, SqliteStore, StoreSession};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Barrier;
    use std::time::{Duration, Instant};

    const CONFIG: &str = r#"
search:
  enabled: true
index:
  poll_interval_ms: 5
sync:
  workers: 0
resources:
  - name: movie
    fields:
      id: string
      btime: int
      mtime: int
      seq: string
      title: string
      year: int
      rating: f64?
      tags: [string]
      ratings: "{int}"
      cast:
        - name: string
          role: string
      meta:
        studio: string
        budget: uint
    create_only: [meta.studio]
    read_only: [rating]
    search_fields: [title, tags]
    indexes:
      - key: ["+title"]
        unique: true
      - key: ["-year", "+title"]
  - name: note
    path: /notes
    fields:
      id: string
      btime: int
      mtime: int
      seq: string
      text: string
    regex_search_fields: [text]
"#;

    fn doc(v: serde_json::Value) -> Map {
        match Value::from(v) {
            Value::Object(m) => m,
            _ => panic!("not an object"),
        }
    }

    fn params(pairs: &[(&str, &str)]) -> QueryParams {
        pairs.iter().copied().collect()
    }

    fn service() -> (Service, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (service_over(store.clone()), store)
    }

    fn service_over(store: Arc<dyn DocumentStore>) -> Service {
        let config = parse_config_str(CONFIG).unwrap();
        let search: Arc<dyn SearchBackend> = Arc::new(MemorySearch::new());
        Service::from_config(&config, store, Some(search)).unwrap()
    }

    fn seq_of(out: &Map) -> String {
        out.get("seq").and_then(Value::as_str).unwrap().to_string()
    }

    #[test]
    fn test_setup_errors() {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let config = parse_config_str(CONFIG).unwrap();
        let err = Service::from_config(&config, store.clone(), None).err().unwrap();
        assert!(matches!(err, DocrestError::Config(_)));

        let dup = parse_config_str(
            "resources:\n  - name: a\n    fields: {id: string, btime: int, mtime: int, seq: string}\n  - name: a\n    path: /b\n    fields: {id: string, btime: int, mtime: int, seq: string}\n",
        )
        .unwrap();
        assert!(Service::from_config(&dup, store.clone(), None).is_err());

        let missing = parse_config_str(
            "resources:\n  - name: a\n    fields: {id: string, btime: int, seq: string}\n",
        )
        .unwrap();
        let err = Service::from_config(&missing, store.clone(), None).err().unwrap();
        assert!(err.to_string().contains("mtime"), "{err}");

        let bad_index = parse_config_str(
            "resources:\n  - name: a\n    fields: {id: string, btime: int, mtime: int, seq: string}\n    indexes:\n      - key: [\"+id\"]\n",
        )
        .unwrap();
        assert!(Service::from_config(&bad_index, store, None).is_err());
    }

    #[test]
    fn test_create_then_get() {
        let (svc, _) = service();
        let movie = svc.resource("movie").unwrap();
        let q = QueryParams::new();
        let out = movie
            .create(
                &q,
                doc(json!({ "title": "Alien", "year": 1979.0, "meta": { "studio": "Fox" } })),
            )
            .unwrap();
        assert_eq!(seq_of(&out), "1");
        assert_eq!(out.get("btime"), out.get("mtime"));
        let id = out.get("id").and_then(Value::as_str).unwrap().to_string();
        assert_eq!(id.len(), 26);

        let got = movie.get(&id, &q).unwrap();
        assert_eq!(got.get("year"), Some(&Value::Int(1979)));
        assert_eq!(got.get("id").and_then(Value::as_str), Some(id.as_str()));
        assert!(got.get("_id").is_none());

        let selected = movie.get(&id, &params(&[("select", r#"["title"]"#)])).unwrap();
        assert_eq!(
            to_json(&selected),
            json!({ "id": id, "title": "Alien" })
        );
        let err = movie.get("nope", &q).unwrap_err();
        assert_eq!(err.status(), 404);
    }

    #[test]
    fn test_create_rejects_bad_documents() {
        let (svc, _) = service();
        let movie = svc.resource("movie").unwrap();
        let q = QueryParams::new();
        let err = movie
            .create(&q, doc(json!({ "title": 1, "rating": 3.5, "nope": true })))
            .unwrap_err();
        let DocrestError::Validation(v) = &err else {
            panic!("expected validation error, got {err}");
        };
        assert_eq!(v.reason_for("title"), Some(Reason::TypeMismatch));
        assert_eq!(v.reason_for("rating"), Some(Reason::ReadOnly));
        assert_eq!(v.reason_for("nope"), Some(Reason::Unknown));
        assert_eq!(err.status(), 400);

        let long = "x".repeat(65);
        assert!(movie.create(&q, doc(json!({ "id": long }))).is_err());
        assert!(movie.create(&q, doc(json!({ "id": "" }))).is_err());

        movie.create(&q, doc(json!({ "id": "m1" }))).unwrap();
        let dup = movie.create(&q, doc(json!({ "id": "m1" }))).unwrap_err();
        assert_eq!(dup.status(), 409);
    }

    #[test]
    fn test_replace_preserves_btime_and_advances_seq() {
        let (svc, store) = service();
        let movie = svc.resource("movie").unwrap();
        let q = QueryParams::new();
        let ns = Namespace::new("rest_movie", "cn");
        store
            .session()
            .unwrap()
            .insert(&ns, doc(json!({ "_id": "m1", "btime": 100, "seq": "7", "title": "Old" })))
            .unwrap();
        let out = movie
            .replace("m1", &q, doc(json!({ "title": "New", "id": "ignored" })))
            .unwrap();
        assert_eq!(seq_of(&out), "8");
        assert_eq!(out.get("btime"), Some(&Value::Int(100)));
        assert_eq!(out.get("id").and_then(Value::as_str), Some("m1"));

        let fresh = movie.replace("m2", &q, doc(json!({ "title": "Two" }))).unwrap();
        assert_eq!(seq_of(&fresh), "1");
        let got = movie.get("m1", &q).unwrap();
        assert_eq!(got.get("title").and_then(Value::as_str), Some("New"));
    }

    #[test]
    fn test_patch_with_seq_token() {
        let (svc, _) = service();
        let movie = svc.resource("movie").unwrap();
        let q = QueryParams::new();
        movie
            .create(&q, doc(json!({ "id": "m1", "title": "Alien", "ratings": { "imdb": 8 } })))
            .unwrap();

        let need = movie
            .update("m1", &q, doc(json!({ "year": 1979 })))
            .unwrap_err();
        assert_eq!(need.to_string(), "need seq");

        let out = movie
            .update(
                "m1",
                &params(&[("seq", "1")]),
                doc(json!({ "year": 1979, "ratings.rt": 98.6 })),
            )
            .unwrap();
        assert_eq!(seq_of(&out), "2");

        let stale = movie
            .update("m1", &params(&[("seq", "1")]), doc(json!({ "year": 1980 })))
            .unwrap_err();
        assert_eq!(stale.status(), 409);
        assert_eq!(stale.to_string(), "id not found or seq conflict");

        let got = movie.get("m1", &q).unwrap();
        assert_eq!(got.get("year"), Some(&Value::Int(1979)));
        assert_eq!(
            to_json(got.get("ratings").and_then(Value::as_object).unwrap()),
            json!({ "imdb": 8, "rt": 98 })
        );

        let create_only = movie
            .update("m1", &params(&[("seq", "2")]), doc(json!({ "meta.studio": "MGM" })))
            .unwrap_err();
        assert_eq!(create_only.status(), 400);
        let bad_seq = movie
            .update("m1", &params(&[("seq", "x")]), doc(json!({ "year": 1 })))
            .unwrap_err();
        assert_eq!(bad_seq.to_string(), "invalid seq");
    }

    #[test]
    fn test_replace_after_malformed_seq_starts_over() {
        let (svc, store) = service();
        let movie = svc.resource("movie").unwrap();
        let ns = Namespace::new("rest_movie", "cn");
        store
            .session()
            .unwrap()
            .insert(&ns, doc(json!({ "_id": "m1", "btime": 100, "seq": "abc", "title": "Old" })))
            .unwrap();
        let out = movie
            .replace("m1", &QueryParams::new(), doc(json!({ "title": "New" })))
            .unwrap();
        assert_eq!(seq_of(&out), "1");
        assert_ne!(out.get("btime"), Some(&Value::Int(100)));
        assert_eq!(out.get("btime"), out.get("mtime"));
    }

    #[test]
    fn test_patch_through_array_field_is_rejected() {
        let (svc, store) = service();
        let movie = svc.resource("movie").unwrap();
        let q = QueryParams::new();
        let cast = json!([{ "name": "a", "role": "b" }, { "name": "c", "role": "d" }]);
        movie
            .create(&q, doc(json!({ "id": "x", "cast": cast.clone() })))
            .unwrap();

        let err = movie
            .update("x", &params(&[("seq", "1")]), doc(json!({ "cast.name": "zzz" })))
            .unwrap_err();
        assert_eq!(err.status(), 400);
        let DocrestError::Validation(v) = &err else {
            panic!("expected validation error, got {err}");
        };
        assert_eq!(v.reason_for("cast.name"), Some(Reason::DotInvalid));

        let ns = Namespace::new("rest_movie", "cn");
        let raw = store
            .session()
            .unwrap()
            .update(&ns, &Condition::by_id("x"), &doc(json!({ "cast.name": "zzz" })))
            .unwrap_err();
        assert!(matches!(raw, DocrestError::BadRequest(_)), "{raw}");

        let got = movie.get("x", &q).unwrap();
        assert_eq!(serde_json::Value::from(got.get("cast").unwrap().clone()), cast);
        assert_eq!(seq_of(&got), "1");
    }

    fn racing_patches(svc: &Service) {
        const RACERS: usize = 8;
        let movie = svc.resource("movie").unwrap();
        let q = QueryParams::new();
        movie.create(&q, doc(json!({ "id": "m1", "title": "Alien" }))).unwrap();

        let barrier = Barrier::new(RACERS);
        let results: Vec<Result<Map>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..RACERS)
                .map(|i| {
                    let barrier = &barrier;
                    s.spawn(move || {
                        barrier.wait();
                        movie.update(
                            "m1",
                            &params(&[("seq", "1")]),
                            doc(json!({ "year": 1900 + i })),
                        )
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let (won, lost): (Vec<_>, Vec<_>) = results.into_iter().partition(Result::is_ok);
        assert_eq!(won.len(), 1);
        assert_eq!(lost.len(), RACERS - 1);
        for err in lost.into_iter().map(Result::unwrap_err) {
            assert!(
                matches!(err, DocrestError::Conflict(ref m) if m == "id not found or seq conflict"),
                "{err}"
            );
        }
        assert_eq!(seq_of(&movie.get("m1", &q).unwrap()), "2");
    }

    #[test]
    fn test_concurrent_patches_memory_store() {
        let (svc, _) = service();
        racing_patches(&svc);
        svc.shutdown();
    }

    #[test]
    fn test_concurrent_patches_sqlite_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStore::open(&dir.path().join("race.db")).unwrap());
        let svc = service_over(store);
        racing_patches(&svc);
        svc.shutdown();
    }

    #[test]
    fn test_patch_ignoring_seq() {
        let (svc, _) = service();
        let movie = svc.resource("movie").unwrap();
        let q = QueryParams::new();
        movie.create(&q, doc(json!({ "id": "m1", "title": "Alien" }))).unwrap();
        let out = movie
            .update(
                "m1",
                &params(&[("ignore_seq", "true")]),
                doc(json!({ "seq": "99", "year": 1979 })),
            )
            .unwrap();
        assert!(out.get("seq").is_none());
        let got = movie.get("m1", &q).unwrap();
        assert_eq!(seq_of(&got), "1");
        assert_eq!(got.get("year"), Some(&Value::Int(1979)));

        let missing = movie
            .update("zz", &params(&[("ignore_seq", "true")]), doc(json!({ "year": 1 })))
            .unwrap_err();
        assert_eq!(missing.status(), 404);
    }

    #[test]
    fn test_list_pages_and_sorts() {
        let (svc, _) = service();
        let movie = svc.resource("movie").unwrap();
        let q = QueryParams::new();
        for (id, title, year) in [
            ("a", "Alien", 1979),
            ("b", "Aliens", 1986),
            ("c", "Heat", 1995),
            ("d", "Ronin", 1998),
        ] {
            movie
                .create(&q, doc(json!({ "id": id, "title": title, "year": year })))
                .unwrap();
        }
        let page = movie
            .list(&params(&[
                ("size", "2"),
                ("page", "1"),
                ("range", r#"{"year": {"gte": 1980}}"#),
                ("order", r#"["-year"]"#),
                ("select", r#"["title"]"#),
            ]))
            .unwrap();
        assert_eq!(page.total, 3);
        let hits: Vec<serde_json::Value> = page.hits.iter().map(to_json).collect();
        assert_eq!(
            hits,
            vec![
                json!({ "id": "d", "title": "Ronin" }),
                json!({ "id": "c", "title": "Heat" }),
            ]
        );

        let all = movie
            .list(&params(&[("size", "-1"), ("page", "1"), ("in", r#"{"id": ["a", "c"]}"#)]))
            .unwrap();
        assert_eq!(all.total, 2);

        let none = movie
            .list(&params(&[("size", "10"), ("page", "1"), ("filter", r#"{"title": "Nope"}"#)]))
            .unwrap();
        assert_eq!(none, crate::resource::Page::default());

        let err = movie.list(&params(&[("page", "1")])).unwrap_err();
        assert_eq!(err.to_string(), "need size or size invalid");
        let err = movie
            .list(&params(&[("size", "1"), ("page", "1"), ("filter", "{")]))
            .unwrap_err();
        assert_eq!(err.to_string(), "filter invalid");
    }

    #[test]
    fn test_full_text_search_follows_writes() {
        let (svc, _) = service();
        let movie = svc.resource("movie").unwrap();
        let q = QueryParams::new();
        movie
            .create(&q, doc(json!({ "id": "a", "title": "Blade Runner", "tags": ["noir"] })))
            .unwrap();
        movie
            .create(&q, doc(json!({ "id": "b", "title": "Alien", "tags": ["horror"] })))
            .unwrap();
        let search = |text: &str| {
            movie
                .list(&params(&[("size", "10"), ("page", "1"), ("search", text)]))
                .unwrap()
        };
        assert_eq!(search("noir").total, 1);
        assert_eq!(search("missing").total, 0);

        movie
            .update("b", &params(&[("seq", "1")]), doc(json!({ "tags": ["noir", "space"] })))
            .unwrap();
        assert_eq!(search("noir").total, 2);

        movie.delete("a", &q).unwrap();
        let page = search("noir");
        assert_eq!(page.total, 1);
        assert_eq!(page.hits[0].get("id").and_then(Value::as_str), Some("b"));
    }

    #[test]
    fn test_regex_search_without_backend() {
        let (svc, _) = service();
        let note = svc.resource("note").unwrap();
        assert_eq!(note.path(), "/notes");
        let q = QueryParams::new();
        note.create(&q, doc(json!({ "id": "n1", "text": "Buy MILK (2l)" }))).unwrap();
        note.create(&q, doc(json!({ "id": "n2", "text": "walk dog" }))).unwrap();
        let page = note
            .list(&params(&[("size", "10"), ("page", "1"), ("search", "milk (2")]))
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.hits[0].get("id").and_then(Value::as_str), Some("n1"));
    }

    #[test]
    fn test_namespace_override_and_delete() {
        let (svc, store) = service();
        let movie = svc.resource("movie").unwrap();
        let q = params(&[("db", "archive"), ("col", "old")]);
        movie.create(&q, doc(json!({ "id": "m1", "title": "Heat" }))).unwrap();
        let session = store.session().unwrap();
        assert_eq!(
            session
                .count(&Namespace::new("archive", "old"), &crate::query::Condition::new())
                .unwrap(),
            1
        );
        assert_eq!(movie.get("m1", &QueryParams::new()).unwrap_err().status(), 404);
        assert_eq!(to_json(&movie.delete("m1", &q).unwrap()), json!({ "id": "m1" }));
        assert_eq!(movie.delete("m1", &q).unwrap_err().status(), 404);
    }

    #[test]
    fn test_indexes_provisioned_after_write() {
        let (svc, store) = service();
        let movie = svc.resource("movie").unwrap();
        movie
            .create(&QueryParams::new(), doc(json!({ "id": "m1", "title": "Heat" })))
            .unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while !svc.scheduler().is_ensured("rest_movie|cn") && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        let indexes = store
            .session()
            .unwrap()
            .list_indexes(&Namespace::new("rest_movie", "cn"))
            .unwrap();
        assert_eq!(indexes.len(), 2);
        let names: Vec<String> = indexes.iter().map(|i| i.name()).collect();
        assert_eq!(names, vec!["title_1", "year_-1_title_1"]);

        let dup = movie
            .create(&QueryParams::new(), doc(json!({ "id": "m2", "title": "Heat" })))
            .unwrap_err();
        assert_eq!(dup.status(), 409);
        svc.shutdown();
    }

    #[test]
    fn test_handle_dispatch() {
        let (svc, _) = service();
        let movie = svc.resource("movie").unwrap();
        let mut vars = PathVars::new();
        let q = QueryParams::new();
        let created = movie.handle(Method::Post, &vars, &q, br#"{"id": "m1", "title": "Heat"}"#);
        assert_eq!(created.status, 200);
        assert_eq!(created.to_json()["code"], json!(0));
        assert_eq!(created.to_json()["msg"], json!("post ok"));

        vars.insert("id".to_string(), "m1".to_string());
        let got = movie.handle(Method::Get, &vars, &q, b"");
        assert_eq!(got.to_json()["data"]["title"], json!("Heat"));

        let bad = movie.handle(Method::Patch, &vars, &q, b"not json");
        assert_eq!(bad.status, 400);
        assert_eq!(bad.to_json()["code"], json!(400));

        let deleted = movie.handle(Method::Delete, &vars, &q, b"");
        assert_eq!(deleted.msg, "delete ok");
        let gone = movie.handle(Method::Get, &vars, &q, b"");
        assert_eq!(gone.status, 404);
        assert_eq!(gone.msg, "id not found");
    }
}
