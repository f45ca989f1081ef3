use super::{build_search_content, SearchBackend};
use crate::error::Result;
use crate::query::{Condition, Projection};
use crate::schema::SyncConfig;
use crate::store::{DocumentStore, Namespace, StoreSession};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

/// Work for the search synchronisation pool.
#[derive(Debug, Clone)]
pub enum SyncTask {
    /// Index the given text for a document; empty text removes it.
    Upsert {
        ns: Namespace,
        id: String,
        content: String,
    },
    /// Re-read the stored document and index its search fields.
    Refresh {
        ns: Namespace,
        id: String,
        fields: Arc<Vec<String>>,
    },
    Remove {
        ns: Namespace,
        id: String,
    },
}

impl SyncTask {
    fn describe(&self) -> (&'static str, &Namespace, &str) {
        match self {
            SyncTask::Upsert { ns, id, .. } => ("upsert", ns, id),
            SyncTask::Refresh { ns, id, .. } => ("refresh", ns, id),
            SyncTask::Remove { ns, id } => ("remove", ns, id),
        }
    }
}

struct Shared {
    store: Arc<dyn DocumentStore>,
    backend: Arc<dyn SearchBackend>,
}

impl Shared {
    fn run(&self, task: &SyncTask) {
        if let Err(e) = self.execute(task) {
            let (op, ns, id) = task.describe();
            log::warn!("search sync {op} {ns}/{id} failed: {e}");
        }
    }

    fn execute(&self, task: &SyncTask) -> Result<()> {
        match task {
            SyncTask::Upsert { ns, id, content } => self.index(ns, id, content),
            SyncTask::Refresh { ns, id, fields } => {
                let projection = Projection(fields.iter().cloned().collect());
                let stored = {
                    let session = self.store.session()?;
                    session.find_one(ns, &Condition::by_id(id), &projection)?
                };
                match stored {
                    Some(doc) => self.index(ns, id, &build_search_content(&doc, fields)),
                    None => {
                        log::debug!("search refresh {ns}/{id}: document gone");
                        Ok(())
                    }
                }
            }
            SyncTask::Remove { ns, id } => self.backend.remove(ns, id),
        }
    }

    fn index(&self, ns: &Namespace, id: &str, content: &str) -> Result<()> {
        if content.is_empty() {
            self.backend.remove(ns, id)
        } else {
            self.backend.upsert(ns, id, content)
        }
    }
}

/// Bounded queue feeding a small pool of search synchronisation threads.
///
/// Every dispatched task runs once. A full queue makes the dispatcher wait
/// for room; failures are logged and tasks may complete in any order. With
/// zero workers, or after shutdown, tasks run inline on the dispatching
/// thread.
pub struct SearchSync {
    shared: Arc<Shared>,
    sender: Mutex<Option<SyncSender<SyncTask>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl SearchSync {
    pub fn start(
        config: &SyncConfig,
        store: Arc<dyn DocumentStore>,
        backend: Arc<dyn SearchBackend>,
    ) -> Self {
        let shared = Arc::new(Shared { store, backend });
        if config.workers == 0 {
            return SearchSync {
                shared,
                sender: Mutex::new(None),
                workers: Mutex::new(Vec::new()),
            };
        }

        let (tx, rx) = mpsc::sync_channel::<SyncTask>(config.queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let workers = (0..config.workers)
            .map(|_| {
                let shared = Arc::clone(&shared);
                let rx = Arc::clone(&rx);
                std::thread::spawn(move || worker_loop(&shared, &rx))
            })
            .collect();
        SearchSync {
            shared,
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
        }
    }

    pub fn backend(&self) -> &Arc<dyn SearchBackend> {
        &self.shared.backend
    }

    /// Hand a task to the pool. Waits only while the queue is full.
    pub fn dispatch(&self, task: SyncTask) {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(tx) = sender else {
            self.shared.run(&task);
            return;
        };
        let task = match tx.try_send(task) {
            Ok(()) => return,
            Err(TrySendError::Full(task)) => {
                let (op, ns, id) = task.describe();
                log::warn!("search sync queue full, waiting to queue {op} {ns}/{id}");
                match tx.send(task) {
                    Ok(()) => return,
                    Err(mpsc::SendError(task)) => task,
                }
            }
            Err(TrySendError::Disconnected(task)) => task,
        };
        self.shared.run(&task);
    }

    /// Close the queue and wait for the workers to drain it.
    pub fn shutdown(&self) {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let workers = std::mem::take(
            &mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for worker in workers {
            if worker.join().is_err() {
                log::error!("search sync worker panicked");
            }
        }
    }
}

impl Drop for SearchSync {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: &Shared, rx: &Mutex<Receiver<SyncTask>>) {
    loop {
        let next = rx.lock().unwrap_or_else(PoisonError::into_inner).recv();
        match next {
            Ok(task) => shared.run(&task),
            Err(_) => break,
        }
    }
}
