//! Purpose: Bounded pool of SQLite connections with scoped, guaranteed release.
//! Exports: `ConnectionPool`, `PooledConnection`.
//! Role: Capacity accounting for the store engine; callers never hold a bare connection.
//! Invariants: At most `max_size` connections are checked out at once.
//! Invariants: Dropping a `PooledConnection` releases its permit on every exit path.
//! Invariants: Connections marked broken are closed instead of returned to the idle set.
//! Invariants: The sole in-memory connection is never closed; it owns the database.

use rusqlite::{Connection, OpenFlags};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::core::error::{Error, ErrorKind};

const MEMORY_URL: &str = ":memory:";
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

static MEMORY_DB_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Clone, Debug)]
enum Target {
    File(PathBuf),
    Memory(String),
}

struct Shared {
    target: Target,
    idle: Mutex<Vec<Connection>>,
    permits: Arc<Semaphore>,
    max_size: usize,
    acquire_timeout: Duration,
}

impl Shared {
    fn idle(&self) -> MutexGuard<'_, Vec<Connection>> {
        self.idle.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    fn open(&self) -> Result<Connection, Error> {
        let conn = match &self.target {
            Target::File(path) => Connection::open(path).map_err(|err| {
                Error::new(ErrorKind::Store)
                    .with_message(format!("failed to open database {}", path.display()))
                    .with_source(err)
            })?,
            Target::Memory(uri) => Connection::open_with_flags(
                uri,
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_URI
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )
            .map_err(|err| {
                Error::new(ErrorKind::Store)
                    .with_message("failed to open in-memory database")
                    .with_source(err)
            })?,
        };
        conn.busy_timeout(BUSY_TIMEOUT).map_err(|err| {
            Error::new(ErrorKind::Store)
                .with_message("failed to configure connection")
                .with_source(err)
        })?;
        Ok(conn)
    }
}

#[derive(Clone)]
pub struct ConnectionPool {
    shared: Arc<Shared>,
}

impl ConnectionPool {
    /// `url` is a database file path, or `:memory:` for a private in-memory
    /// database. In-memory databases use one connection: shared-cache mode
    /// reports table locks instead of waiting on them.
    pub fn new(url: &str, max_size: usize, acquire_timeout: Duration) -> Result<Self, Error> {
        if max_size == 0 {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("pool size must be greater than zero")
                .with_hint("Use a positive value like 30."));
        }
        let (target, max_size) = if url == MEMORY_URL {
            let n = MEMORY_DB_COUNTER.fetch_add(1, Ordering::Relaxed);
            let pid = std::process::id();
            let uri = format!("file:wikibus-mem-{pid}-{n}?mode=memory&cache=shared");
            (Target::Memory(uri), 1)
        } else {
            (Target::File(PathBuf::from(url)), max_size)
        };
        Ok(Self {
            shared: Arc::new(Shared {
                target,
                idle: Mutex::new(Vec::new()),
                permits: Arc::new(Semaphore::new(max_size)),
                max_size,
                acquire_timeout,
            }),
        })
    }

    pub fn max_size(&self) -> usize {
        self.shared.max_size
    }

    pub fn available(&self) -> usize {
        self.shared.permits.available_permits()
    }

    pub fn idle_count(&self) -> usize {
        self.shared.idle().len()
    }

    /// Waits up to the configured timeout for capacity. The connection itself
    /// is opened lazily by [`PooledConnection::connection`], off the async path.
    pub async fn acquire(&self) -> Result<PooledConnection, Error> {
        let timeout = self.shared.acquire_timeout;
        let acquire = self.shared.permits.clone().acquire_owned();
        let permit = match tokio::time::timeout(timeout, acquire).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                return Err(Error::new(ErrorKind::Store).with_message("connection pool is closed"));
            }
            Err(_) => {
                return Err(Error::new(ErrorKind::Store)
                    .with_message(format!(
                        "timed out after {}ms waiting for a pooled connection",
                        timeout.as_millis()
                    ))
                    .with_hint("Raise the pool size or the acquire timeout."));
            }
        };
        let conn = self.shared.idle().pop();
        Ok(PooledConnection {
            conn,
            broken: false,
            shared: Arc::clone(&self.shared),
            _permit: permit,
        })
    }
}

pub struct PooledConnection {
    conn: Option<Connection>,
    broken: bool,
    shared: Arc<Shared>,
    // Dropped after `Drop::drop` has put the connection back.
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    /// Blocking: may open a new connection. Call from a blocking context.
    pub fn connection(&mut self) -> Result<&Connection, Error> {
        if self.conn.is_none() {
            self.conn = Some(self.shared.open()?);
        }
        self.conn
            .as_ref()
            .ok_or_else(|| Error::new(ErrorKind::Internal).with_message("connection missing"))
    }

    pub fn mark_broken(&mut self) {
        self.broken = true;
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        if self.broken {
            if let Target::Memory(_) = self.shared.target {
                // Closing it would drop every table with it.
                tracing::error!("in-memory database connection failed; keeping it in service");
            } else {
                tracing::warn!("discarding broken database connection");
                return;
            }
        }
        self.shared.idle().push(conn);
    }
}

#[cfg(test)]
mod tests {
    use super::ConnectionPool;
    use crate::core::error::ErrorKind;
    use std::time::Duration;

    fn temp_pool(max: usize) -> (tempfile::TempDir, ConnectionPool) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("pool.db");
        let pool = ConnectionPool::new(path.to_str().expect("utf8"), max, Duration::from_millis(50))
            .expect("pool");
        (dir, pool)
    }

    #[test]
    fn zero_size_is_usage_error() {
        let err = ConnectionPool::new("x.db", 0, Duration::from_secs(1))
            .err()
            .expect("usage error");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn memory_pool_uses_single_connection() {
        let pool = ConnectionPool::new(":memory:", 30, Duration::from_secs(1)).expect("pool");
        assert_eq!(pool.max_size(), 1);
    }

    #[tokio::test]
    async fn release_returns_connection_to_idle_set() {
        let (_dir, pool) = temp_pool(2);
        {
            let mut guard = pool.acquire().await.expect("acquire");
            guard.connection().expect("open");
            assert_eq!(pool.available(), 1);
        }
        assert_eq!(pool.available(), 2);
        assert_eq!(pool.idle_count(), 1);
    }

    #[tokio::test]
    async fn exhausted_pool_times_out() {
        let (_dir, pool) = temp_pool(1);
        let held = pool.acquire().await.expect("acquire");
        let err = pool.acquire().await.err().expect("timeout");
        assert_eq!(err.kind(), ErrorKind::Store);
        drop(held);
        pool.acquire().await.expect("capacity restored");
    }

    #[tokio::test]
    async fn broken_connection_is_discarded_but_permit_released() {
        let (_dir, pool) = temp_pool(1);
        {
            let mut guard = pool.acquire().await.expect("acquire");
            guard.connection().expect("open");
            guard.mark_broken();
        }
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn broken_memory_connection_keeps_its_data() {
        let pool = ConnectionPool::new(":memory:", 1, Duration::from_millis(50)).expect("pool");
        {
            let mut guard = pool.acquire().await.expect("acquire");
            let conn = guard.connection().expect("open");
            conn.execute_batch(
                "CREATE TABLE kept (v TEXT); INSERT INTO kept VALUES ('still here');",
            )
            .expect("seed");
            guard.mark_broken();
        }
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(pool.available(), 1);

        let mut guard = pool.acquire().await.expect("reacquire");
        let value: String = guard
            .connection()
            .expect("open")
            .query_row("SELECT v FROM kept", [], |row| row.get(0))
            .expect("row survives");
        assert_eq!(value, "still here");
    }

    #[tokio::test]
    async fn panic_while_holding_connection_releases_it() {
        let (_dir, pool) = temp_pool(1);
        let guard = pool.acquire().await.expect("acquire");
        let result = tokio::task::spawn_blocking(move || {
            let mut guard = guard;
            if guard.connection().is_ok() {
                panic!("statement blew up");
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(pool.available(), 1);
        assert_eq!(pool.idle_count(), 1);
    }
}
