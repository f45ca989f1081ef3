use crate::document::ID_FIELD;
use crate::error::{DocrestError, Result};
use crate::schema::{FieldSet, IndexConfig, IndexDecl};
use crate::store::{DocumentStore, Namespace, StoreSession};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{mpsc, Arc, Mutex, PoisonError, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// One field of an index key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexKey {
    pub field: String,
    #[serde(default)]
    pub descending: bool,
}

/// A secondary index: an ordered key and a uniqueness flag. Two specs are
/// the same index when both match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexSpec {
    pub key: Vec<IndexKey>,
    #[serde(default)]
    pub unique: bool,
}

impl IndexSpec {
    /// Check a declared index against the field table.
    pub fn parse(decl: &IndexDecl, fields: &FieldSet) -> Result<Self> {
        if decl.key.is_empty() {
            return Err(DocrestError::Config("index fields empty".to_string()));
        }
        let distinct: HashSet<&String> = decl.key.iter().collect();
        if distinct.len() != decl.key.len() {
            return Err(DocrestError::Config("index fields dup".to_string()));
        }
        let mut key = Vec::with_capacity(decl.key.len());
        for (i, signed) in decl.key.iter().enumerate() {
            if signed.chars().count() <= 1 {
                return Err(DocrestError::Config(format!(
                    "index fields[{i}]={signed} invalid"
                )));
            }
            let (descending, field) = if let Some(field) = signed.strip_prefix('+') {
                (false, field)
            } else if let Some(field) = signed.strip_prefix('-') {
                (true, field)
            } else {
                return Err(DocrestError::Config(format!(
                    "index fields[{i}]={signed} should start with +/-"
                )));
            };
            if field == ID_FIELD {
                return Err(DocrestError::Config(
                    "index fields should not contain the id field".to_string(),
                ));
            }
            if fields.member(field).is_none() {
                return Err(DocrestError::Config(format!(
                    "index fields[{i}]={signed} unknown"
                )));
            }
            key.push(IndexKey {
                field: field.to_string(),
                descending,
            });
        }
        Ok(IndexSpec {
            key,
            unique: decl.unique,
        })
    }

    /// Conventional index name, e.g. `name_1_year_-1`.
    pub fn name(&self) -> String {
        self.key
            .iter()
            .map(|k| format!("{}_{}", k.field, if k.descending { -1 } else { 1 }))
            .collect::<Vec<_>>()
            .join("_")
    }
}

/// Where and which indexes to provision.
#[derive(Debug, Clone)]
pub struct IndexTarget {
    pub ns: Namespace,
    pub indexes: Arc<Vec<IndexSpec>>,
}

#[derive(Default)]
struct Pending {
    items: HashMap<String, IndexTarget>,
    order: VecDeque<String>,
}

/// Deduplicated queue of index provisioning work plus a cache of recently
/// ensured namespaces.
pub struct IndexScheduler {
    store: Arc<dyn DocumentStore>,
    pending: Mutex<Pending>,
    ensured: RwLock<HashMap<String, Instant>>,
    ttl: Duration,
    poll_interval: Duration,
}

impl IndexScheduler {
    pub fn new(store: Arc<dyn DocumentStore>, config: &IndexConfig) -> Self {
        IndexScheduler {
            store,
            pending: Mutex::new(Pending::default()),
            ensured: RwLock::new(HashMap::new()),
            ttl: Duration::from_secs(config.ttl_secs),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        }
    }

    /// Queue a target unless the same namespace is already pending.
    pub fn enqueue(&self, target: IndexTarget) {
        if target.indexes.is_empty() {
            return;
        }
        let key = target.ns.key();
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if pending.items.contains_key(&key) {
            return;
        }
        pending.order.push_back(key.clone());
        pending.items.insert(key, target);
    }

    pub fn pending_len(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .order
            .len()
    }

    fn pop(&self) -> Option<IndexTarget> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        while let Some(key) = pending.order.pop_front() {
            if let Some(target) = pending.items.remove(&key) {
                return Some(target);
            }
        }
        None
    }

    /// Whether the namespace key was ensured within the freshness window.
    pub fn is_ensured(&self, key: &str) -> bool {
        let ensured = self.ensured.read().unwrap_or_else(PoisonError::into_inner);
        ensured.get(key).map_or(false, |expiry| *expiry > Instant::now())
    }

    fn mark_ensured(&self, key: String) {
        let mut ensured = self.ensured.write().unwrap_or_else(PoisonError::into_inner);
        ensured.insert(key, Instant::now() + self.ttl);
    }

    /// Service one queued target. Returns false when the queue was empty.
    pub fn run_once(&self) -> bool {
        let Some(target) = self.pop() else {
            return false;
        };
        let key = target.ns.key();
        if self.is_ensured(&key) {
            log::debug!("indexes on {} fresh, skipped", target.ns);
            return true;
        }
        if self.ensure(&target) {
            self.mark_ensured(key);
        }
        true
    }

    /// Create every declared index missing from the target. Returns false
    /// when the existing indexes could not be listed.
    fn ensure(&self, target: &IndexTarget) -> bool {
        let session = match self.store.session() {
            Ok(s) => s,
            Err(e) => {
                log::warn!("index session for {} failed: {e}", target.ns);
                return false;
            }
        };
        let existing = match session.list_indexes(&target.ns) {
            Ok(list) => list,
            Err(e) => {
                log::warn!("db={} table={} list indexes err: {e}", target.ns.db, target.ns.table);
                return false;
            }
        };
        for spec in target.indexes.iter() {
            if existing.contains(spec) {
                continue;
            }
            match session.create_index(&target.ns, spec) {
                Ok(()) => log::info!("index {} ensured on {}", spec.name(), target.ns),
                Err(e) => log::warn!(
                    "db={} table={} ensure index {} err: {e}",
                    target.ns.db,
                    target.ns.table,
                    spec.name()
                ),
            }
        }
        true
    }

    /// Spawn the polling worker. It stops when the handle is shut down or
    /// dropped.
    pub fn start(self: &Arc<Self>) -> WorkerHandle {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let scheduler = Arc::clone(self);
        let thread = std::thread::spawn(move || loop {
            match stop_rx.recv_timeout(scheduler.poll_interval) {
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    scheduler.run_once();
                }
                Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        });
        WorkerHandle {
            stop: Some(stop_tx),
            thread: Some(thread),
        }
    }
}

/// Handle to a background worker thread.
pub struct WorkerHandle {
    stop: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        self.stop.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("index worker panicked");
            }
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}
