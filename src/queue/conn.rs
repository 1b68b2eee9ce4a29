//! Per-thread SQLite connections.
//!
//! Every thread that touches the queue gets its own connection, opened
//! lazily and cached by [`ThreadId`]. Each thread also owns a liveness
//! token in thread-local storage; the cache keeps only a weak reference,
//! so once the thread exits its entry can be recognised as stale and its
//! connection closed on the next lookup from any thread.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread::{self, ThreadId};
use std::time::Duration;

use rusqlite::Connection;
use tracing::debug;

use crate::error::{Error, Result};

thread_local! {
    static LIVENESS: Arc<()> = Arc::new(());
}

/// Shared handle to one thread's connection.
pub(crate) type ConnHandle = Arc<Mutex<Connection>>;

struct CachedConnection {
    conn: ConnHandle,
    owner: Weak<()>,
}

impl CachedConnection {
    fn is_stale(&self) -> bool {
        self.owner.strong_count() == 0
    }
}

/// Thread-keyed connection cache with liveness-based eviction.
pub(crate) struct ConnectionCache {
    path: PathBuf,
    busy_timeout: Duration,
    entries: Mutex<HashMap<ThreadId, CachedConnection>>,
}

impl ConnectionCache {
    pub fn new(path: impl Into<PathBuf>, busy_timeout: Duration) -> Self {
        Self {
            path: path.into(),
            busy_timeout,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve the calling thread's connection, opening it on first use.
    ///
    /// Evicts connections of exited threads before the lookup.
    pub fn acquire(&self) -> Result<ConnHandle> {
        let mut entries = self.lock_entries()?;
        evict_stale(&mut entries);

        let tid = thread::current().id();
        if let Some(cached) = entries.get(&tid) {
            return Ok(Arc::clone(&cached.conn));
        }

        let owner = LIVENESS
            .try_with(Arc::downgrade)
            .map_err(|e| Error::Other(format!("thread is shutting down: {e}")))?;
        let conn = Arc::new(Mutex::new(open_connection(&self.path, self.busy_timeout)?));
        debug!(thread = ?tid, path = %self.path.display(), "opened queue connection");

        entries.insert(
            tid,
            CachedConnection {
                conn: Arc::clone(&conn),
                owner,
            },
        );
        Ok(conn)
    }

    /// Number of cached connections belonging to live threads.
    pub fn live_count(&self) -> Result<usize> {
        let mut entries = self.lock_entries()?;
        evict_stale(&mut entries);
        Ok(entries.len())
    }

    fn lock_entries(&self) -> Result<MutexGuard<'_, HashMap<ThreadId, CachedConnection>>> {
        self.entries
            .lock()
            .map_err(|_| Error::Other("connection cache lock poisoned".to_string()))
    }
}

/// Lock a connection handle for exclusive use by the calling thread.
pub(crate) fn lock(handle: &ConnHandle) -> Result<MutexGuard<'_, Connection>> {
    handle
        .lock()
        .map_err(|_| Error::Other("queue connection lock poisoned".to_string()))
}

fn open_connection(path: &Path, busy_timeout: Duration) -> Result<Connection> {
    // SQLite takes the timeout as i32 milliseconds.
    if i32::try_from(busy_timeout.as_millis()).is_err() {
        return Err(Error::Config(format!(
            "busy timeout {busy_timeout:?} does not fit SQLite's millisecond range"
        )));
    }
    let conn = Connection::open(path)?;
    conn.busy_timeout(busy_timeout)?;
    Ok(conn)
}

fn evict_stale(entries: &mut HashMap<ThreadId, CachedConnection>) {
    let stale: Vec<ThreadId> = entries
        .iter()
        .filter(|(_, cached)| cached.is_stale())
        .map(|(tid, _)| *tid)
        .collect();

    for tid in stale {
        let Some(cached) = entries.remove(&tid) else {
            continue;
        };
        // Close failures are ignored; the caller's operation must proceed.
        let Ok(mutex) = Arc::try_unwrap(cached.conn) else {
            continue;
        };
        match mutex.into_inner() {
            Ok(conn) => match conn.close() {
                Ok(()) => debug!(thread = ?tid, "closed connection of exited thread"),
                Err((_, e)) => {
                    debug!(thread = ?tid, error = %e, "failed to close stale connection")
                }
            },
            Err(_) => debug!(thread = ?tid, "dropping poisoned stale connection"),
        }
    }
}
