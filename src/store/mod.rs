//! Purpose: Store engine executing the fixed statement set against pooled SQLite connections.
//! Exports: `Store`, `StoreConfig`, `Statement`, `SqlQueries`, `Param`, `Row`, `Column`.
//! Role: Single owner of the connection pool; used only by the page service.
//! Invariants: Every operation before `start` completes fails with `NotReady`; nothing queues.
//! Invariants: `start` succeeds at most once and creates the schema idempotently.
//! Invariants: SQLite calls run on the blocking pool, never on an async worker.
//! Invariants: Failures surface as `ErrorKind::Store` with the cause attached; no retries.

mod pool;
mod sql;

pub use pool::{ConnectionPool, PooledConnection};
pub use sql::{Column, Param, Row, SqlQueries, Statement};

use rusqlite::{Connection, ErrorCode, params_from_iter};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use crate::core::error::{Error, ErrorKind};

pub const DEFAULT_MAX_POOL_SIZE: usize = 30;
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

const IDLE: u8 = 0;
const STARTING: u8 = 1;
const READY: u8 = 2;

#[derive(Clone, Debug)]
pub struct StoreConfig {
    pub url: String,
    pub max_pool_size: usize,
    pub acquire_timeout: Duration,
    pub queries: SqlQueries,
}

impl StoreConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_pool_size: DEFAULT_MAX_POOL_SIZE,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            queries: SqlQueries::default(),
        }
    }

    pub fn with_max_pool_size(mut self, max_pool_size: usize) -> Self {
        self.max_pool_size = max_pool_size;
        self
    }

    pub fn with_acquire_timeout(mut self, acquire_timeout: Duration) -> Self {
        self.acquire_timeout = acquire_timeout;
        self
    }

    pub fn with_queries(mut self, queries: SqlQueries) -> Self {
        self.queries = queries;
        self
    }
}

pub struct Store {
    pool: ConnectionPool,
    queries: Arc<SqlQueries>,
    state: AtomicU8,
}

impl Store {
    pub fn new(config: StoreConfig) -> Result<Self, Error> {
        let pool = ConnectionPool::new(&config.url, config.max_pool_size, config.acquire_timeout)?;
        Ok(Self {
            pool,
            queries: Arc::new(config.queries),
            state: AtomicU8::new(IDLE),
        })
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn is_ready(&self) -> bool {
        self.state.load(Ordering::Acquire) == READY
    }

    /// Prepares the schema and marks the engine ready. Completes once.
    pub async fn start(&self) -> Result<(), Error> {
        if self
            .state
            .compare_exchange(IDLE, STARTING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::new(ErrorKind::Usage).with_message("store already started"));
        }
        let result = self
            .run(Statement::CreatePagesTable, |conn, sql| conn.execute_batch(sql))
            .await;
        match result {
            Ok(()) => {
                self.state.store(READY, Ordering::Release);
                tracing::info!("database successfully prepared");
                Ok(())
            }
            Err(err) => {
                self.state.store(IDLE, Ordering::Release);
                tracing::error!(error = %err.describe(), "database preparation error");
                Err(err)
            }
        }
    }

    /// Runs a write statement and returns the number of rows it touched.
    pub async fn execute(&self, statement: Statement, params: Vec<Param>) -> Result<u64, Error> {
        self.ensure_ready()?;
        self.run(statement, move |conn, sql| {
            conn.execute(sql, params_from_iter(params.iter()))
                .map(|rows| rows as u64)
        })
        .await
    }

    pub async fn query(&self, statement: Statement, params: Vec<Param>) -> Result<Vec<Row>, Error> {
        self.ensure_ready()?;
        self.run(statement, move |conn, sql| {
            let mut prepared = conn.prepare(sql)?;
            let column_count = prepared.column_count();
            let rows = prepared.query_map(params_from_iter(params.iter()), |row| {
                let mut columns = Vec::with_capacity(column_count);
                for index in 0..column_count {
                    columns.push(Column::from(row.get_ref(index)?));
                }
                Ok(Row::new(columns))
            })?;
            rows.collect()
        })
        .await
    }

    fn ensure_ready(&self) -> Result<(), Error> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(Error::new(ErrorKind::NotReady)
                .with_message("store is not ready")
                .with_hint("Wait for start() to complete before issuing statements."))
        }
    }

    async fn run<T, F>(&self, statement: Statement, f: F) -> Result<T, Error>
    where
        T: Send + 'static,
        F: FnOnce(&Connection, &str) -> rusqlite::Result<T> + Send + 'static,
    {
        let mut guard = self.pool.acquire().await?;
        let sql = self.queries.get(statement).to_string();
        let result = tokio::task::spawn_blocking(move || {
            let conn = guard.connection()?;
            match f(conn, &sql) {
                Ok(value) => Ok(value),
                Err(err) => {
                    if is_connection_fault(&err) {
                        guard.mark_broken();
                    }
                    Err(Error::new(ErrorKind::Store)
                        .with_message(format!("{statement:?} failed"))
                        .with_source(err))
                }
            }
        })
        .await
        .map_err(|err| {
            Error::new(ErrorKind::Store)
                .with_message(format!("{statement:?} aborted"))
                .with_source(err)
        })?;
        if let Err(err) = &result {
            tracing::error!(?statement, error = %err.describe(), "database error");
        }
        result
    }
}

fn is_connection_fault(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(
            ErrorCode::CannotOpen
                | ErrorCode::NotADatabase
                | ErrorCode::SystemIoFailure
                | ErrorCode::DatabaseCorrupt
        )
    )
}
