// logsight-store/src/store.rs
//! Disk-backed analytical store, one per session.
//!
//! Lifecycle: `create` → many `add_entry` (batched through the appender)
//! → `finalize` (flush + timestamp index) → reads only → `close` (drops
//! the backing file unless marked persistent). Row ids are dense, 0-based,
//! and match insertion order; rows are never updated or deleted.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use duckdb::{params, Connection};
use parking_lot::{Mutex, RwLock};

use logsight_core::{global_pool, Error, LogEntry, Result, SignalType, TimeRange, Value};
use logsight_parsers::EntrySink;

use crate::query::QueryCaches;

/// Rows buffered before a batch write, sized to stay well under SQL
/// parameter limits
pub const ENTRY_BATCH_SIZE: usize = 2048;

/// In-memory running metadata so summary queries never hit storage
#[derive(Default)]
pub(crate) struct StoreMeta {
    pub time_range: Option<TimeRange>,
    pub devices: HashSet<String>,
    pub signal_types: HashMap<String, SignalType>,
}

/// Per-session analytical table
pub struct AnalyticalStore {
    conn: Mutex<Option<Connection>>,
    path: PathBuf,
    batch: Mutex<Vec<LogEntry>>,
    next_id: AtomicI64,
    finalized: AtomicBool,
    persistent: AtomicBool,
    pub(crate) meta: RwLock<StoreMeta>,
    pub(crate) caches: Mutex<QueryCaches>,
}

impl AnalyticalStore {
    /// Create the backing file and schema
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&path).map_err(|e| Error::store(e.to_string()))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS entries (
                id        BIGINT  NOT NULL,
                ts        BIGINT  NOT NULL,
                device_id VARCHAR NOT NULL,
                signal    VARCHAR NOT NULL,
                category  VARCHAR,
                val_type  VARCHAR NOT NULL,
                val_bool  BOOLEAN,
                val_int   BIGINT,
                val_float DOUBLE,
                val_str   VARCHAR
            );",
        )
        .map_err(|e| Error::store(e.to_string()))?;

        tracing::debug!(path = %path.display(), "Analytical store created");

        Ok(Self {
            conn: Mutex::new(Some(conn)),
            path,
            batch: Mutex::new(Vec::with_capacity(ENTRY_BATCH_SIZE)),
            next_id: AtomicI64::new(0),
            finalized: AtomicBool::new(false),
            persistent: AtomicBool::new(false),
            meta: RwLock::new(StoreMeta::default()),
            caches: Mutex::new(QueryCaches::default()),
        })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` with the open connection
    pub(crate) fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let guard = self.conn.lock();
        match guard.as_ref() {
            Some(conn) => f(conn),
            None => Err(Error::store("store is closed")),
        }
    }

    /// Whether `finalize` has run
    pub fn is_finalized(&self) -> bool {
        self.finalized.load(Ordering::Acquire)
    }

    /// Total rows accepted so far (including the unflushed batch)
    pub fn len(&self) -> u64 {
        self.next_id.load(Ordering::Acquire) as u64
    }

    /// Whether no rows were accepted
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Buffer one entry, flushing at the batch boundary
    pub fn add_entry(&self, entry: LogEntry) -> Result<()> {
        if self.is_finalized() {
            return Err(Error::StoreFinalized);
        }

        {
            let mut meta = self.meta.write();
            match &mut meta.time_range {
                Some(range) => range.extend(entry.timestamp),
                None => meta.time_range = Some(TimeRange::point(entry.timestamp)),
            }
            meta.devices.insert(entry.device_id.to_string());
            meta.signal_types
                .entry(entry.signal_key())
                .or_insert(entry.signal_type);
        }

        self.next_id.fetch_add(1, Ordering::AcqRel);

        let full = {
            let mut batch = self.batch.lock();
            batch.push(entry);
            batch.len() >= ENTRY_BATCH_SIZE
        };
        if full {
            self.flush_batch()?;
        }
        Ok(())
    }

    /// Write the pending batch through the appender
    ///
    /// A failed flush is retried once; the second failure is fatal to the
    /// owning session.
    fn flush_batch(&self) -> Result<()> {
        let pending: Vec<LogEntry> = {
            let mut batch = self.batch.lock();
            if batch.is_empty() {
                return Ok(());
            }
            std::mem::take(&mut *batch)
        };

        let first_id = self.next_id.load(Ordering::Acquire) - pending.len() as i64;

        let result = self.append_rows(&pending, first_id);
        if let Err(err) = result {
            tracing::warn!(error = %err, rows = pending.len(), "Batch write failed, retrying once");
            self.append_rows(&pending, first_id)?;
        }
        Ok(())
    }

    fn append_rows(&self, rows: &[LogEntry], first_id: i64) -> Result<()> {
        self.with_conn(|conn| {
            let mut appender = conn
                .appender("entries")
                .map_err(|e| Error::store(e.to_string()))?;

            for (offset, entry) in rows.iter().enumerate() {
                let id = first_id + offset as i64;
                let (val_type, val_bool, val_int, val_float, val_str) = encode_value(&entry.value);
                appender
                    .append_row(params![
                        id,
                        entry.timestamp,
                        &*entry.device_id,
                        &*entry.signal,
                        entry.category.as_deref(),
                        val_type,
                        val_bool,
                        val_int,
                        val_float,
                        val_str,
                    ])
                    .map_err(|e| Error::store(e.to_string()))?;
            }

            appender.flush().map_err(|e| Error::store(e.to_string()))?;
            Ok(())
        })
    }

    /// Flush the tail batch and build the timestamp index
    ///
    /// Must be called before any query; no write is accepted afterwards.
    pub fn finalize(&self) -> Result<()> {
        if self.is_finalized() {
            return Ok(());
        }
        self.flush_batch()?;
        self.with_conn(|conn| {
            conn.execute_batch("CREATE INDEX IF NOT EXISTS idx_entries_ts ON entries (ts);")
                .map_err(|e| Error::store(e.to_string()))
        })?;
        self.finalized.store(true, Ordering::Release);
        tracing::debug!(path = %self.path.display(), rows = self.len(), "Store finalized");
        Ok(())
    }

    pub(crate) fn ensure_finalized(&self) -> Result<()> {
        if self.is_finalized() {
            Ok(())
        } else {
            Err(Error::StoreNotFinalized)
        }
    }

    /// Observed `device::signal` keys, served from memory
    pub fn signals(&self) -> Vec<String> {
        let meta = self.meta.read();
        let mut keys: Vec<String> = meta.signal_types.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Observed device ids, served from memory
    pub fn devices(&self) -> Vec<String> {
        let meta = self.meta.read();
        let mut devices: Vec<String> = meta.devices.iter().cloned().collect();
        devices.sort();
        devices
    }

    /// Per-signal resolved types, served from memory
    pub fn signal_types(&self) -> HashMap<String, SignalType> {
        self.meta.read().signal_types.clone()
    }

    /// Inclusive time range, served from memory
    pub fn time_range(&self) -> Option<TimeRange> {
        self.meta.read().time_range
    }

    /// Drop cached counts and page offsets
    pub fn clear_count_cache(&self) {
        self.caches.lock().clear();
    }

    /// Keep the backing file on `close`
    pub fn mark_persistent(&self) {
        self.persistent.store(true, Ordering::Release);
    }

    /// Close the engine and remove the backing file unless persistent
    pub fn close(&self) {
        let conn = self.conn.lock().take();
        drop(conn);

        if !self.persistent.load(Ordering::Acquire) {
            if let Err(err) = std::fs::remove_file(&self.path) {
                if err.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %self.path.display(), error = %err, "Failed to remove store file");
                }
            }
            // DuckDB may leave a write-ahead log beside the database.
            let wal = self.path.with_extension("db.wal");
            let _ = std::fs::remove_file(wal);
        }
    }
}

impl Drop for AnalyticalStore {
    fn drop(&mut self) {
        self.close();
    }
}

impl EntrySink for &AnalyticalStore {
    fn add_entry(&mut self, entry: LogEntry) -> Result<()> {
        AnalyticalStore::add_entry(self, entry)
    }
}

/// Split a value into its store columns
pub(crate) fn encode_value(
    value: &Value,
) -> (&'static str, Option<bool>, Option<i64>, Option<f64>, Option<&str>) {
    match value {
        Value::Bool(b) => ("bool", Some(*b), None, None, None),
        Value::Int(i) => ("int", None, Some(*i), None, None),
        Value::Float(f) => ("float", None, None, Some(*f), None),
        Value::Str(s) => ("str", None, None, None, Some(s)),
    }
}

/// Rebuild an entry from a result row laid out as
/// `(id, ts, device_id, signal, category, val_type, val_bool, val_int,
/// val_float, val_str)`; every query selects exactly these columns.
pub(crate) fn entry_from_row(row: &duckdb::Row<'_>) -> Result<(i64, LogEntry)> {
    let map_err = |e: duckdb::Error| Error::store(e.to_string());

    let id: i64 = row.get(0).map_err(map_err)?;
    let ts: i64 = row.get(1).map_err(map_err)?;
    let device: String = row.get(2).map_err(map_err)?;
    let signal: String = row.get(3).map_err(map_err)?;
    let category: Option<String> = row.get(4).map_err(map_err)?;
    let val_type: String = row.get(5).map_err(map_err)?;

    let pool = global_pool();
    let value = match val_type.as_str() {
        "bool" => Value::Bool(row.get::<_, bool>(6).map_err(map_err)?),
        "int" => Value::Int(row.get::<_, i64>(7).map_err(map_err)?),
        "float" => Value::Float(row.get::<_, f64>(8).map_err(map_err)?),
        "str" => Value::Str(pool.intern(&row.get::<_, String>(9).map_err(map_err)?)),
        other => return Err(Error::store(format!("unknown val_type {other}"))),
    };

    let signal_type = value.signal_type();
    Ok((
        id,
        LogEntry {
            device_id: pool.intern(&device),
            signal: pool.intern(&signal),
            timestamp: ts,
            value,
            signal_type,
            category: category.map(|c| pool.intern(&c)),
            source_id: None,
        },
    ))
}
