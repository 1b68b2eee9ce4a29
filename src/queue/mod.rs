//! Durable FIFO work queue backed by SQLite.
//!
//! One table, `queue(id INTEGER PRIMARY KEY AUTOINCREMENT, item BLOB)`,
//! where `item` is a UTF-8 JSON document. The layout matches queues
//! written by earlier add-on releases, so existing `queue.db` files open
//! unchanged.
//!
//! Each thread talks to the database through its own connection (see
//! [`conn`]). Dequeue takes an immediate-mode transaction, reads the head
//! row and deletes it before committing, so two threads can never receive
//! the same entry and a crash before the commit leaves the entry in place.

mod conn;
mod iter;
mod poll;

pub use iter::QueueIter;
pub use poll::{Backoff, PollMode};

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use opentelemetry::KeyValue;
use rusqlite::{Connection, OptionalExtension, Row, Transaction, TransactionBehavior, params};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::telemetry::metrics;
use crate::telemetry::queue::{record_dequeue, start_queue_span};
use conn::ConnectionCache;

/// File name of the queue database inside the profile directory.
pub const QUEUE_FILE_NAME: &str = "queue.db";

/// Lock-wait timeout applied to every connection.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(60);

/// Longest lock-wait timeout SQLite accepts (`i32::MAX` milliseconds).
pub const MAX_BUSY_TIMEOUT: Duration = Duration::from_millis(i32::MAX as u64);

const CREATE_TABLE: &str =
    "CREATE TABLE IF NOT EXISTS queue (id INTEGER PRIMARY KEY AUTOINCREMENT, item BLOB)";
const COUNT: &str = "SELECT COUNT(*) FROM queue";
const MAX_ID: &str = "SELECT COALESCE(MAX(id), 0) FROM queue";
const APPEND: &str = "INSERT INTO queue (item) VALUES (?1)";
const SELECT_HEAD: &str = "SELECT id, item FROM queue ORDER BY id LIMIT 1";
const DELETE_BY_ID: &str = "DELETE FROM queue WHERE id = ?1";
const PURGE: &str = "DELETE FROM queue";

/// Tunables for a [`SqliteQueue`].
#[derive(Debug, Clone)]
pub struct QueueOptions {
    /// How long a connection waits on a locked database before failing.
    pub busy_timeout: Duration,
    /// First sleep of a blocking dequeue that found the queue empty.
    pub initial_wait: Duration,
    /// Upper bound for any single sleep between polls.
    pub max_wait: Duration,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            initial_wait: Duration::from_millis(100),
            max_wait: Duration::from_secs(2),
        }
    }
}

/// Persistent, thread-safe FIFO queue of JSON payloads.
///
/// Share it between threads behind an `Arc`; every method may be called
/// from any thread.
pub struct SqliteQueue {
    path: PathBuf,
    options: QueueOptions,
    connections: ConnectionCache,
}

impl SqliteQueue {
    /// Open or create the queue database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, QueueOptions::default())
    }

    /// Open or create `queue.db` inside a profile directory, creating the
    /// directory first if needed.
    pub fn open_in_dir(profile_dir: impl AsRef<Path>) -> Result<Self> {
        Self::open(profile_dir.as_ref().join(QUEUE_FILE_NAME))
    }

    /// Open or create the queue database at `path` with explicit options.
    pub fn open_with(path: impl AsRef<Path>, options: QueueOptions) -> Result<Self> {
        if options.busy_timeout > MAX_BUSY_TIMEOUT {
            return Err(Error::Config(format!(
                "busy timeout {:?} exceeds the maximum of {MAX_BUSY_TIMEOUT:?}",
                options.busy_timeout
            )));
        }

        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            if !dir.exists() {
                debug!(dir = %dir.display(), "creating queue profile directory");
                std::fs::create_dir_all(dir)?;
            }
        }

        let queue = Self {
            connections: ConnectionCache::new(&path, options.busy_timeout),
            path,
            options,
        };
        queue.with_conn(|conn| {
            conn.execute_batch(CREATE_TABLE)?;
            Ok(())
        })?;
        debug!(path = %queue.path.display(), "queue opened");
        Ok(queue)
    }

    /// Location of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of entries currently stored.
    ///
    /// A point-in-time count; concurrent writers may change it immediately.
    pub fn size(&self) -> Result<usize> {
        let count: i64 = self.with_conn(|conn| Ok(conn.query_row(COUNT, [], |row| row.get(0))?))?;
        count_op("size");
        Ok(usize::try_from(count).unwrap_or(0))
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.size()? == 0)
    }

    /// Iterate over every payload in FIFO order without removing anything.
    ///
    /// Entries appended after this call are not visited.
    pub fn iter(&self) -> Result<QueueIter<'_>> {
        let upper: i64 = self.with_conn(|conn| Ok(conn.query_row(MAX_ID, [], |row| row.get(0))?))?;
        count_op("iterate");
        Ok(QueueIter::new(self, upper))
    }

    /// Delete every entry. Returns how many rows were removed.
    pub fn purge(&self) -> Result<usize> {
        let removed = self.with_conn(|conn| Ok(conn.execute(PURGE, [])?))?;
        debug!(removed, "queue purged");
        count_op("purge");
        Ok(removed)
    }

    /// Serialize `payload` and add it to the tail. Returns the assigned id.
    pub fn append<T: Serialize + ?Sized>(&self, payload: &T) -> Result<i64> {
        let encoded = serde_json::to_string(payload)?;
        let id = self.with_conn(|conn| {
            conn.prepare_cached(APPEND)?.execute(params![encoded])?;
            Ok(conn.last_insert_rowid())
        })?;
        trace!(id, "appended queue entry");
        count_op("append");
        Ok(id)
    }

    /// Remove and return the head entry.
    ///
    /// With `blocking`, polls with backoff until an entry shows up; there
    /// is no upper bound on the wait. Without it, returns `None` at once
    /// when the queue is empty.
    pub fn get(&self, blocking: bool) -> Result<Option<Value>> {
        let mode = if blocking {
            PollMode::Blocking
        } else {
            PollMode::NonBlocking
        };
        self.dequeue(mode)
    }

    /// Remove and return the head entry, waiting at most `wait` for one.
    ///
    /// A `wait` too large to express as a deadline waits indefinitely.
    pub fn get_timeout(&self, wait: Duration) -> Result<Option<Value>> {
        let mode = Instant::now()
            .checked_add(wait)
            .map_or(PollMode::Blocking, PollMode::Until);
        self.dequeue(mode)
    }

    /// Return the head entry without removing it.
    pub fn peek(&self) -> Result<Option<Value>> {
        let head = self.with_conn(|conn| read_head(conn))?;
        count_op("peek");
        head.map(|(_, bytes)| decode_item(&bytes)).transpose()
    }

    /// Number of cached connections owned by live threads.
    pub fn cached_connections(&self) -> Result<usize> {
        self.connections.live_count()
    }

    fn dequeue(&self, mode: PollMode) -> Result<Option<Value>> {
        let span = start_queue_span("get", &self.path);
        let _enter = span.enter();
        let started = Instant::now();

        let backoff = Backoff::new(self.options.initial_wait, self.options.max_wait);
        let polled = poll::run(mode, backoff, || self.with_conn(take_head))?;

        let id = polled.value.as_ref().map(|(id, _)| *id);
        record_dequeue(&span, id, polled.retries);
        if polled.retries > 0 {
            metrics::poll_retries().add(u64::from(polled.retries), &[]);
        }
        metrics::operation_duration_ms().record(
            started.elapsed().as_secs_f64() * 1000.0,
            &[KeyValue::new("operation", "get")],
        );
        count_op(if id.is_some() { "get" } else { "get_empty" });

        Ok(polled.value.map(|(_, value)| value))
    }

    fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let handle = self.connections.acquire()?;
        let mut conn = conn::lock(&handle)?;
        f(&mut conn)
    }
}

/// One dequeue attempt: lock, read the head, delete it, commit.
///
/// An empty queue commits the empty transaction to release the lock.
fn take_head(conn: &mut Connection) -> Result<Option<(i64, Value)>> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let head = remove_head_on(&tx)?;
    tx.commit()?;
    Ok(head)
}

/// Read and delete the head row inside `tx`. Nothing is durable until the
/// caller commits; a dropped transaction leaves the entry in place.
fn remove_head_on(tx: &Transaction<'_>) -> Result<Option<(i64, Value)>> {
    let Some((id, bytes)) = read_head(tx)? else {
        return Ok(None);
    };
    let value = decode_item(&bytes)?;
    tx.execute(DELETE_BY_ID, params![id])?;
    Ok(Some((id, value)))
}

fn read_head(conn: &Connection) -> Result<Option<(i64, Vec<u8>)>> {
    Ok(conn
        .query_row(SELECT_HEAD, [], |row| Ok((row.get(0)?, item_bytes(row, 1)?)))
        .optional()?)
}

/// Raw bytes of a stored payload. Rows written as TEXT and as BLOB are
/// both accepted.
fn item_bytes(row: &Row<'_>, idx: usize) -> rusqlite::Result<Vec<u8>> {
    let value = row.get_ref(idx)?;
    value.as_bytes().map(<[u8]>::to_vec).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, value.data_type(), Box::new(e))
    })
}

fn decode_item(bytes: &[u8]) -> Result<Value> {
    Ok(serde_json::from_slice(bytes)?)
}

fn count_op(operation: &'static str) {
    metrics::queue_operations().add(1, &[KeyValue::new("operation", operation)]);
}
