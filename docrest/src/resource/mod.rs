use crate::document::{rename_in, rename_out, Map, Value, ID_FIELD};
use crate::error::{DocrestError, Reason, Result, ValidationError};
use crate::index::{IndexSpec, IndexTarget};
use crate::query::{
    compile_page_query, compile_select, Condition, Pagination, Predicate, Projection, QueryParams,
};
use crate::schema::{self, FieldSet, ResourceConfig};
use crate::search::{build_search_content, SyncTask};
use crate::seq::{initial_seq, next_seq};
use crate::service::Context;
use crate::store::{FindOptions, Namespace, StoreSession};
use crate::validation::Mode;
use std::sync::Arc;

/// Longest client-supplied id accepted on create.
pub const MAX_ID_LEN: usize = 64;

/// One page of a list query, in boundary naming.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub total: u64,
    pub hits: Vec<Map>,
}

/// What a write did, for the post-write effects.
enum Written<'a> {
    Stored(&'a Map),
    Patched,
    Removed,
}

/// A schema-driven resource: its compiled field table, search settings and
/// indexes, bound to the shared service context.
pub struct Resource {
    name: String,
    path: String,
    fields: FieldSet,
    search_fields: Arc<Vec<String>>,
    regex_search_fields: Vec<String>,
    indexes: Arc<Vec<IndexSpec>>,
    default_db: String,
    ctx: Arc<Context>,
}

fn in_resource(name: &str, e: DocrestError) -> DocrestError {
    match e {
        DocrestError::Config(msg) => DocrestError::Config(format!("resource {name}: {msg}")),
        other => other,
    }
}

fn now() -> Value {
    Value::Int(chrono::Utc::now().timestamp())
}

impl Resource {
    pub(crate) fn compile(config: &ResourceConfig, ctx: Arc<Context>) -> Result<Self> {
        let fields = schema::compile(config).map_err(|e| in_resource(&config.name, e))?;
        let indexes = config
            .indexes
            .iter()
            .map(|decl| IndexSpec::parse(decl, &fields))
            .collect::<Result<Vec<_>>>()
            .map_err(|e| in_resource(&config.name, e))?;
        let default_db = ctx
            .default_db
            .clone()
            .unwrap_or_else(|| format!("rest_{}", config.name));
        log::debug!(
            "resource {} compiled: {} fields, {} indexes",
            config.name,
            fields.paths().len(),
            indexes.len()
        );
        Ok(Resource {
            name: config.name.clone(),
            path: config.url_path(),
            fields,
            search_fields: Arc::new(config.search_fields.clone()),
            regex_search_fields: config.regex_search_fields.clone(),
            indexes: Arc::new(indexes),
            default_db,
            ctx,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// URL path the resource is served under.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn fields(&self) -> &FieldSet {
        &self.fields
    }

    pub fn indexes(&self) -> &[IndexSpec] {
        &self.indexes
    }

    /// The namespace a call addresses. `db` and `col` override the defaults.
    pub fn namespace(&self, query: &QueryParams) -> Namespace {
        Namespace::new(
            query.get("db").unwrap_or(self.default_db.as_str()),
            query
                .get("col")
                .unwrap_or(self.ctx.default_collection.as_str()),
        )
    }

    fn validate(&self, doc: &mut Map, mode: Mode) -> Result<()> {
        self.fields.check_object(doc, mode).map_err(|e| {
            log::warn!("invalid field exists, resource={} err={e}", self.name);
            DocrestError::Validation(e)
        })
    }

    /// Store a new document. The id is generated unless the body carries one.
    pub fn create(&self, query: &QueryParams, mut doc: Map) -> Result<Map> {
        match doc.get(ID_FIELD) {
            Some(id) => match id.as_str() {
                Some(s) if !s.is_empty() && s.chars().count() <= MAX_ID_LEN => {}
                _ => {
                    log::warn!("custom id too long or empty");
                    return Err(DocrestError::BadRequest(
                        "custom id too long or empty".to_string(),
                    ));
                }
            },
            None => {
                doc.insert(ID_FIELD.to_string(), self.ctx.id_strategy.generate().into());
            }
        }
        self.validate(&mut doc, Mode::Create)?;
        rename_in(&mut doc);

        let now = now();
        doc.insert("btime".to_string(), now.clone());
        doc.insert("mtime".to_string(), now);
        doc.insert("seq".to_string(), initial_seq().into());

        let ns = self.namespace(query);
        let stored = self.fields.storage_layout(&doc);
        {
            let session = self.ctx.store.session()?;
            session.insert(&ns, stored).map_err(|e| {
                log::warn!("db access fail, err={e}");
                match e {
                    DocrestError::Conflict(_) => DocrestError::Conflict("duplicate id".to_string()),
                    other => other,
                }
            })?;
        }

        self.after_write(&ns, crate::store::primary_key(&doc)?, Written::Stored(&doc));
        Ok(receipt(&doc, &["seq", "btime", "mtime"]))
    }

    /// Create or fully overwrite the document `id`, preserving its birth
    /// time and advancing its sequence token. A prior version with a
    /// malformed seq is treated as absent.
    pub fn replace(&self, id: &str, query: &QueryParams, mut doc: Map) -> Result<Map> {
        doc.insert(ID_FIELD.to_string(), id.into());
        self.validate(&mut doc, Mode::Create)?;
        rename_in(&mut doc);

        let now = now();
        doc.insert("btime".to_string(), now.clone());
        doc.insert("mtime".to_string(), now);
        doc.insert("seq".to_string(), initial_seq().into());

        let ns = self.namespace(query);
        {
            let session = self.ctx.store.session()?;
            let prior = Projection(["btime", "seq"].iter().map(|s| s.to_string()).collect());
            if let Some(old) = session.find_one(&ns, &Condition::by_id(id), &prior)? {
                // A prior version only counts when its seq is well formed.
                match old.get("seq").and_then(Value::as_str).map(next_seq) {
                    Some(Ok(next)) => {
                        if let Some(btime) = old.get("btime") {
                            doc.insert("btime".to_string(), btime.clone());
                        }
                        doc.insert("seq".to_string(), next.into());
                    }
                    _ => log::debug!("prior seq of {id} malformed, resetting btime and seq"),
                }
            }
            session.upsert(&ns, id, self.fields.storage_layout(&doc))?;
        }

        self.after_write(&ns, id, Written::Stored(&doc));
        Ok(receipt(&doc, &["seq", "btime", "mtime"]))
    }

    /// Partially update the document `id`.
    ///
    /// The `seq` query parameter must name the stored sequence token unless
    /// `ignore_seq=true` opts out of versioning.
    pub fn update(&self, id: &str, query: &QueryParams, mut doc: Map) -> Result<Map> {
        self.validate(&mut doc, Mode::Patch)?;
        if doc.contains_key(ID_FIELD) {
            return Err(ValidationError {
                violations: vec![(ID_FIELD.to_string(), Reason::CreateOnly)],
            }
            .into());
        }

        let ignore_seq = query.flag("ignore_seq");
        let seq = query.get("seq");
        if !ignore_seq && seq.is_none() {
            log::warn!("need seq");
            return Err(DocrestError::BadRequest("need seq".to_string()));
        }

        doc.insert("mtime".to_string(), now());
        let ns = self.namespace(query);
        let session = self.ctx.store.session()?;
        match seq.filter(|_| !ignore_seq) {
            None => {
                doc.remove("seq");
                if !session.update(&ns, &Condition::by_id(id), &doc)? {
                    log::warn!("patch id={id}: not found");
                    return Err(DocrestError::NotFound("id not found".to_string()));
                }
            }
            Some(seq) => {
                let next = next_seq(seq).map_err(|_| {
                    log::warn!("invalid seq: {seq}");
                    DocrestError::BadRequest("invalid seq".to_string())
                })?;
                doc.insert("seq".to_string(), next.into());
                let cond = Condition::by_id(id).with("seq", Predicate::Eq(seq.into()));
                if !session.update(&ns, &cond, &doc)? {
                    log::warn!("id not found or seq conflict");
                    return Err(DocrestError::Conflict(
                        "id not found or seq conflict".to_string(),
                    ));
                }
            }
        }
        drop(session);

        self.after_write(&ns, id, Written::Patched);
        doc.insert(ID_FIELD.to_string(), id.into());
        Ok(receipt(&doc, &["seq", "mtime"]))
    }

    /// Read one document, optionally projected by `select`.
    pub fn get(&self, id: &str, query: &QueryParams) -> Result<Map> {
        let projection = compile_select(&self.fields, query)?;
        let ns = self.namespace(query);
        let found = {
            let session = self.ctx.store.session()?;
            session.find_one(&ns, &Condition::by_id(id), &projection)?
        };
        match found {
            Some(mut doc) => {
                rename_out(&mut doc);
                Ok(doc)
            }
            None => {
                log::warn!("get id={id}: not found");
                Err(DocrestError::NotFound("id not found".to_string()))
            }
        }
    }

    /// Run a paged list query.
    pub fn list(&self, query: &QueryParams) -> Result<Page> {
        let pagination = Pagination::from_params(query)?;
        let ns = self.namespace(query);
        let compiled = compile_page_query(
            &self.fields,
            query,
            &self.regex_search_fields,
            |text| self.search_ids(&ns, text),
        )?;
        if compiled.no_match {
            return Ok(Page::default());
        }
        log::debug!(
            "query={:?}, condition={}, order={:?}, select={:?}",
            query,
            compiled.condition.to_json(),
            compiled.sort.to_signed(),
            compiled.projection.0
        );

        let session = self.ctx.store.session()?;
        let total = session.count(&ns, &compiled.condition)?;
        if total == 0 {
            return Ok(Page::default());
        }
        let opts = FindOptions {
            sort: compiled.sort,
            projection: compiled.projection,
            skip: pagination.skip(),
            limit: pagination.limit(),
        };
        let mut hits = session.find(&ns, &compiled.condition, &opts)?;
        hits.iter_mut().for_each(rename_out);
        Ok(Page { total, hits })
    }

    /// Remove the document `id`.
    pub fn delete(&self, id: &str, query: &QueryParams) -> Result<Map> {
        let ns = self.namespace(query);
        let removed = {
            let session = self.ctx.store.session()?;
            session.remove(&ns, &Condition::by_id(id))?
        };
        if !removed {
            log::warn!("delete id={id}: not found");
            return Err(DocrestError::NotFound("id not found".to_string()));
        }
        self.after_write(&ns, id, Written::Removed);
        let mut out = Map::new();
        out.insert(ID_FIELD.to_string(), id.into());
        Ok(out)
    }

    /// Ask the full-text backend for matching ids. `None` when this resource
    /// has no backend.
    fn search_ids(&self, ns: &Namespace, text: &str) -> Result<Option<Vec<String>>> {
        let Some(sync) = self.ctx.search.as_ref() else {
            return Ok(None);
        };
        if self.search_fields.is_empty() {
            return Ok(None);
        }
        sync.backend()
            .search(ns, text, self.ctx.search_limit)
            .map(Some)
            .map_err(|e| {
                log::warn!("search on {ns} failed: {e}");
                DocrestError::Search(e.to_string())
            })
    }

    fn after_write(&self, ns: &Namespace, id: &str, written: Written<'_>) {
        if !self.indexes.is_empty() {
            self.ctx.scheduler.enqueue(IndexTarget {
                ns: ns.clone(),
                indexes: Arc::clone(&self.indexes),
            });
        }
        let Some(sync) = self.ctx.search.as_ref() else {
            return;
        };
        if self.search_fields.is_empty() {
            return;
        }
        let (ns, id) = (ns.clone(), id.to_string());
        let task = match written {
            Written::Stored(doc) => SyncTask::Upsert {
                ns,
                id,
                content: build_search_content(doc, &self.search_fields),
            },
            Written::Patched => SyncTask::Refresh {
                ns,
                id,
                fields: Arc::clone(&self.search_fields),
            },
            Written::Removed => SyncTask::Remove { ns, id },
        };
        sync.dispatch(task);
    }
}

/// The identity plus the named bookkeeping fields of a written document.
fn receipt(doc: &Map, keys: &[&str]) -> Map {
    let mut out = Map::new();
    if let Some(id) = doc
        .get(crate::document::PRIMARY_KEY)
        .or_else(|| doc.get(ID_FIELD))
    {
        out.insert(ID_FIELD.to_string(), id.clone());
    }
    for key in keys {
        if let Some(v) = doc.get(*key) {
            out.insert(key.to_string(), v.clone());
        }
    }
    out
}
