use super::{
    apply_set, arrange, pinned_id, primary_key, DocumentStore, FindOptions, Namespace,
    StoreSession,
};
use crate::document::{Map, Value, PRIMARY_KEY};
use crate::error::{DocrestError, Result};
use crate::index::IndexSpec;
use crate::query::{Condition, Projection};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Document store backed by a single SQLite database.
///
/// Documents are stored as JSON rows keyed by (db, tbl, id). Conditions are
/// evaluated in process; declared indexes become SQLite expression indexes
/// over `json_extract`, partial to their namespace.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the store at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS documents (
                db TEXT NOT NULL,
                tbl TEXT NOT NULL,
                id TEXT NOT NULL,
                data_json TEXT NOT NULL,
                PRIMARY KEY (db, tbl, id)
            );

            CREATE TABLE IF NOT EXISTS doc_indexes (
                db TEXT NOT NULL,
                tbl TEXT NOT NULL,
                name TEXT NOT NULL,
                spec_json TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                PRIMARY KEY (db, tbl, name)
            );
            ",
        )?;
        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every namespace holding at least one document.
    pub fn namespaces(&self) -> Result<Vec<Namespace>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT DISTINCT db, tbl FROM documents ORDER BY db, tbl")?;
        let rows = stmt.query_map([], |row| {
            Ok(Namespace {
                db: row.get(0)?,
                table: row.get(1)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

impl DocumentStore for SqliteStore {
    fn session(&self) -> Result<Box<dyn StoreSession + '_>> {
        Ok(Box::new(SqliteSession { store: self }))
    }
}

/// Map a write failure, reporting constraint violations as conflicts.
fn write_err(e: rusqlite::Error) -> DocrestError {
    if let rusqlite::Error::SqliteFailure(f, _) = &e {
        if f.code == ErrorCode::ConstraintViolation {
            return DocrestError::Conflict("duplicate key".to_string());
        }
    }
    DocrestError::Sqlite(e)
}

fn parse_row(data_json: &str) -> Result<Map> {
    let json: serde_json::Value = serde_json::from_str(data_json)
        .map_err(|e| DocrestError::Storage(format!("corrupt document: {e}")))?;
    match Value::from(json) {
        Value::Object(m) => Ok(m),
        _ => Err(DocrestError::Storage("corrupt document: not an object".to_string())),
    }
}

fn encode(doc: &Map) -> Result<String> {
    Ok(serde_json::to_string(&crate::document::to_json(doc))?)
}

/// Documents of `ns` matching `cond`, in primary key order.
fn load(conn: &Connection, ns: &Namespace, cond: &Condition) -> Result<Vec<Map>> {
    let mut rows: Vec<String> = Vec::new();
    match pinned_id(cond) {
        Some(id) => {
            let found: Option<String> = conn
                .query_row(
                    "SELECT data_json FROM documents WHERE db = ?1 AND tbl = ?2 AND id = ?3",
                    params![ns.db, ns.table, id],
                    |row| row.get(0),
                )
                .optional()?;
            rows.extend(found);
        }
        None => {
            let mut stmt = conn.prepare(
                "SELECT data_json FROM documents WHERE db = ?1 AND tbl = ?2 ORDER BY id",
            )?;
            let mapped = stmt.query_map(params![ns.db, ns.table], |row| row.get(0))?;
            for row in mapped {
                rows.push(row?);
            }
        }
    }
    let mut docs = Vec::with_capacity(rows.len());
    for data_json in rows {
        let doc = parse_row(&data_json)?;
        if cond.matches(&doc) {
            docs.push(doc);
        }
    }
    Ok(docs)
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// JSON path of a dotted field, each segment quoted.
fn json_path(field: &str) -> String {
    let segments: Vec<String> = field
        .split('.')
        .map(|s| format!("\"{}\"", s.replace('"', "\\\"")))
        .collect();
    format!("$.{}", segments.join("."))
}

fn index_sql(ns: &Namespace, spec: &IndexSpec) -> String {
    let name = quote_ident(&format!("doc_{}_{}_{}", ns.db, ns.table, spec.name()));
    let columns: Vec<String> = spec
        .key
        .iter()
        .map(|k| {
            format!(
                "json_extract(data_json, {}){}",
                quote_literal(&json_path(&k.field)),
                if k.descending { " DESC" } else { "" }
            )
        })
        .collect();
    format!(
        "CREATE {}INDEX IF NOT EXISTS {name} ON documents ({}) WHERE db = {} AND tbl = {}",
        if spec.unique { "UNIQUE " } else { "" },
        columns.join(", "),
        quote_literal(&ns.db),
        quote_literal(&ns.table),
    )
}

struct SqliteSession<'a> {
    store: &'a SqliteStore,
}

impl StoreSession for SqliteSession<'_> {
    fn insert(&self, ns: &Namespace, doc: Map) -> Result<()> {
        let id = primary_key(&doc)?;
        let data_json = encode(&doc)?;
        let conn = self.store.conn();
        conn.execute(
            "INSERT INTO documents (db, tbl, id, data_json) VALUES (?1, ?2, ?3, ?4)",
            params![ns.db, ns.table, id, data_json],
        )
        .map_err(write_err)?;
        Ok(())
    }

    fn update(&self, ns: &Namespace, cond: &Condition, set: &Map) -> Result<bool> {
        let mut conn = self.store.conn();
        let tx = conn.transaction()?;
        let Some(mut doc) = load(&tx, ns, cond)?.into_iter().next() else {
            return Ok(false);
        };
        let id = primary_key(&doc)?.to_string();
        apply_set(&mut doc, set)?;
        tx.execute(
            "UPDATE documents SET data_json = ?4 WHERE db = ?1 AND tbl = ?2 AND id = ?3",
            params![ns.db, ns.table, id, encode(&doc)?],
        )
        .map_err(write_err)?;
        tx.commit()?;
        Ok(true)
    }

    fn upsert(&self, ns: &Namespace, id: &str, mut doc: Map) -> Result<()> {
        doc.insert(PRIMARY_KEY.to_string(), Value::from(id));
        let data_json = encode(&doc)?;
        let conn = self.store.conn();
        conn.execute(
            "INSERT INTO documents (db, tbl, id, data_json) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (db, tbl, id) DO UPDATE SET data_json = excluded.data_json",
            params![ns.db, ns.table, id, data_json],
        )
        .map_err(write_err)?;
        Ok(())
    }

    fn find_one(
        &self,
        ns: &Namespace,
        cond: &Condition,
        projection: &Projection,
    ) -> Result<Option<Map>> {
        let conn = self.store.conn();
        Ok(load(&conn, ns, cond)?
            .first()
            .map(|d| projection.apply(d)))
    }

    fn find(&self, ns: &Namespace, cond: &Condition, opts: &FindOptions) -> Result<Vec<Map>> {
        let conn = self.store.conn();
        Ok(arrange(load(&conn, ns, cond)?, opts))
    }

    fn count(&self, ns: &Namespace, cond: &Condition) -> Result<u64> {
        let conn = self.store.conn();
        Ok(load(&conn, ns, cond)?.len() as u64)
    }

    fn remove(&self, ns: &Namespace, cond: &Condition) -> Result<bool> {
        let mut conn = self.store.conn();
        let tx = conn.transaction()?;
        let Some(doc) = load(&tx, ns, cond)?.into_iter().next() else {
            return Ok(false);
        };
        let removed = tx.execute(
            "DELETE FROM documents WHERE db = ?1 AND tbl = ?2 AND id = ?3",
            params![ns.db, ns.table, primary_key(&doc)?],
        )?;
        tx.commit()?;
        Ok(removed > 0)
    }

    fn list_indexes(&self, ns: &Namespace) -> Result<Vec<IndexSpec>> {
        let conn = self.store.conn();
        let mut stmt = conn.prepare(
            "SELECT spec_json FROM doc_indexes WHERE db = ?1 AND tbl = ?2 ORDER BY created_at, name",
        )?;
        let rows = stmt.query_map(params![ns.db, ns.table], |row| row.get::<_, String>(0))?;
        let mut specs = Vec::new();
        for row in rows {
            specs.push(serde_json::from_str(&row?)?);
        }
        Ok(specs)
    }

    fn create_index(&self, ns: &Namespace, spec: &IndexSpec) -> Result<()> {
        let mut conn = self.store.conn();
        let tx = conn.transaction()?;
        tx.execute_batch(&index_sql(ns, spec)).map_err(write_err)?;
        tx.execute(
            "INSERT OR REPLACE INTO doc_indexes (db, tbl, name, spec_json) VALUES (?1, ?2, ?3, ?4)",
            params![ns.db, ns.table, spec.name(), serde_json::to_string(spec)?],
        )?;
        tx.commit()?;
        log::debug!("created index {} on {ns}", spec.name());
        Ok(())
    }
}
