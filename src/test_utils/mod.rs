//! In-memory engine for tests.
//!
//! `FakeEngine` keeps tables in memory, runs the statement shapes in [`sql`],
//! buffers read-write work per attempt and applies it on commit, and retries
//! attempts the way the real client does. It also counts calls and can be
//! told to fail in specific places.

mod sql;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::config::Config;
use crate::connector::Connector;
use crate::context::Context;
use crate::engine::{
    Code, Engine, EngineError, EngineFactory, EngineRow, Field, ReadOnlySnapshot,
    ReadWriteTransaction, RowStream, Statement, TimestampBound, TransactionBody, TypeCode,
};
use crate::error::DriverError;
use crate::logging::Logger;
use crate::types::Value;

use sql::{Database, Table};

/// Database path used by the helpers below.
pub const TEST_DATABASE: &str = "projects/test-project/instances/test-instance/databases/test-db";

const MAX_ATTEMPTS: usize = 10;

type Canned = Result<Vec<EngineRow>, EngineError>;

#[derive(Default)]
struct Faults {
    begin_error: Option<EngineError>,
    commit_error: Option<EngineError>,
    abort_commits: usize,
    statement_delay: Option<Duration>,
    hang_begin: bool,
    canned: HashMap<String, Canned>,
}

#[derive(Default)]
struct Counters {
    calls: AtomicUsize,
    attempts: AtomicUsize,
    commits: AtomicUsize,
    snapshots_closed: AtomicUsize,
    streams_stopped: AtomicUsize,
    engine_closes: AtomicUsize,
}

#[derive(Default)]
struct Inner {
    db: Mutex<Database>,
    faults: Mutex<Faults>,
    counters: Counters,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scriptable in-memory engine. Clones share state.
#[derive(Clone, Default)]
pub struct FakeEngine {
    inner: Arc<Inner>,
}

impl FakeEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or replace) a table. The first column acts as the primary key.
    pub fn create_table(&self, name: &str, columns: &[(&str, TypeCode)]) {
        let fields = columns.iter().map(|(n, t)| Field::new(*n, *t)).collect();
        lock(&self.inner.db).tables.insert(
            name.to_owned(),
            Table {
                fields,
                rows: Vec::new(),
            },
        );
    }

    /// Insert a committed row directly, bypassing transactions.
    ///
    /// # Panics
    /// If the table does not exist.
    pub fn insert_row(&self, table: &str, row: Vec<Value>) {
        let mut db = lock(&self.inner.db);
        let table = db.tables.get_mut(table).expect("table exists");
        table.rows.push(row);
        db.version += 1;
    }

    /// Committed rows of `table`, in insertion order.
    #[must_use]
    pub fn rows(&self, table: &str) -> Vec<Vec<Value>> {
        lock(&self.inner.db)
            .tables
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// Answer `sql` with fixed rows instead of evaluating it.
    pub fn script_query(&self, sql: &str, fields: Vec<Field>, rows: Vec<Vec<serde_json::Value>>) {
        let fields = Arc::new(fields);
        let rows = rows
            .into_iter()
            .map(|values| EngineRow::new(Arc::clone(&fields), values))
            .collect();
        lock(&self.inner.faults).canned.insert(sql.to_owned(), Ok(rows));
    }

    /// Fail every query of `sql` with `err`.
    pub fn fail_query(&self, sql: &str, err: EngineError) {
        lock(&self.inner.faults).canned.insert(sql.to_owned(), Err(err));
    }

    /// Fail the next read-write transaction before its first attempt.
    pub fn fail_next_begin(&self, err: EngineError) {
        lock(&self.inner.faults).begin_error = Some(err);
    }

    /// Fail the next commit with `err`, without retrying.
    pub fn fail_next_commit(&self, err: EngineError) {
        lock(&self.inner.faults).commit_error = Some(err);
    }

    /// Abort the next `n` commits so the runner retries the attempt.
    pub fn abort_next_commits(&self, n: usize) {
        lock(&self.inner.faults).abort_commits = n;
    }

    /// Delay every statement by `delay`.
    pub fn set_statement_delay(&self, delay: Option<Duration>) {
        lock(&self.inner.faults).statement_delay = delay;
    }

    /// Keep read-write transactions from starting until their context fires.
    pub fn hang_begin(&self, hang: bool) {
        lock(&self.inner.faults).hang_begin = hang;
    }

    /// Round trips made to the engine: reads, statements and transaction starts.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.inner.counters.calls.load(Ordering::SeqCst)
    }

    /// Read-write attempts started, retries included.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.inner.counters.attempts.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn commits(&self) -> usize {
        self.inner.counters.commits.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn snapshots_closed(&self) -> usize {
        self.inner.counters.snapshots_closed.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn streams_stopped(&self) -> usize {
        self.inner.counters.streams_stopped.load(Ordering::SeqCst)
    }

    /// How often the client was closed.
    #[must_use]
    pub fn close_count(&self) -> usize {
        self.inner.counters.engine_closes.load(Ordering::SeqCst)
    }

    /// A factory handing out this engine.
    #[must_use]
    pub fn factory(&self) -> Arc<dyn EngineFactory> {
        Arc::new(FakeFactory {
            engine: self.clone(),
            failure: None,
        })
    }

    /// A factory that fails with `err`.
    #[must_use]
    pub fn failing_factory(err: EngineError) -> Arc<dyn EngineFactory> {
        Arc::new(FakeFactory {
            engine: Self::new(),
            failure: Some(err),
        })
    }

    /// Configuration for [`TEST_DATABASE`] with logging disabled.
    ///
    /// # Panics
    /// Never; the test path is valid.
    #[must_use]
    pub fn config() -> Config {
        Config::builder(TEST_DATABASE)
            .expect("valid test database path")
            .logger(Logger::disabled())
            .finish()
            .expect("valid test config")
    }

    /// A connector over this engine using [`FakeEngine::config`].
    #[must_use]
    pub fn connector(&self) -> Connector {
        self.connector_with(Self::config())
    }

    #[must_use]
    pub fn connector_with(&self, config: Config) -> Connector {
        Connector::from_engine(config, Arc::new(self.clone()))
    }

    fn count_call(&self) {
        self.inner.counters.calls.fetch_add(1, Ordering::SeqCst);
    }

    fn stream(&self, rows: Vec<EngineRow>) -> Box<dyn RowStream> {
        Box::new(FakeRowStream {
            rows: rows.into(),
            stopped: false,
            engine: self.clone(),
        })
    }

    /// Canned answer for `stmt`, if one was scripted.
    fn canned(&self, stmt: &Statement) -> Option<Canned> {
        lock(&self.inner.faults).canned.get(&stmt.sql).cloned()
    }

    async fn pause(&self, ctx: &Context) -> Result<(), EngineError> {
        let delay = lock(&self.inner.faults).statement_delay;
        let Some(delay) = delay else {
            return Ok(());
        };
        tokio::select! {
            err = ctx.done() => Err(context_error(&err)),
            () = tokio::time::sleep(delay) => Ok(()),
        }
    }

    async fn read(&self, ctx: &Context, db: &Database, stmt: &Statement) -> Result<Box<dyn RowStream>, EngineError> {
        self.count_call();
        if let Some(err) = ctx.err() {
            return Err(context_error(&err));
        }
        self.pause(ctx).await?;
        let rows = match self.canned(stmt) {
            Some(canned) => canned?,
            None => db.select(stmt)?,
        };
        Ok(self.stream(rows))
    }

    fn snapshot_db(&self) -> Database {
        lock(&self.inner.db).clone()
    }
}

/// How the engine reports a fired context.
fn context_error(err: &DriverError) -> EngineError {
    match err {
        DriverError::DeadlineExceeded => EngineError::new(Code::DeadlineExceeded, "context deadline exceeded"),
        _ => EngineError::new(Code::Cancelled, "context canceled"),
    }
}

#[async_trait]
impl Engine for FakeEngine {
    async fn single_query(&self, ctx: &Context, stmt: Statement) -> Result<Box<dyn RowStream>, EngineError> {
        let db = self.snapshot_db();
        self.read(ctx, &db, &stmt).await
    }

    fn read_only_transaction(&self, _bound: TimestampBound) -> Arc<dyn ReadOnlySnapshot> {
        Arc::new(FakeSnapshot {
            db: self.snapshot_db(),
            closed: AtomicBool::new(false),
            engine: self.clone(),
        })
    }

    async fn run_read_write(&self, ctx: &Context, mut body: TransactionBody) -> Result<(), DriverError> {
        self.count_call();
        let (begin_error, hang) = {
            let mut faults = lock(&self.inner.faults);
            (faults.begin_error.take(), faults.hang_begin)
        };
        if hang {
            return Err(ctx.done().await);
        }
        if let Some(err) = begin_error {
            return Err(err.into());
        }

        for _ in 0..MAX_ATTEMPTS {
            if let Some(err) = ctx.err() {
                return Err(err);
            }
            self.inner.counters.attempts.fetch_add(1, Ordering::SeqCst);
            let base = self.snapshot_db();
            let base_version = base.version;
            let txn = Arc::new(FakeTransaction {
                working: Mutex::new(base),
                engine: self.clone(),
            });

            match body(Arc::clone(&txn) as Arc<dyn ReadWriteTransaction>).await {
                Ok(()) => {}
                Err(DriverError::Engine(err)) if err.is_retryable() => continue,
                Err(err) => return Err(err),
            }

            let mut faults = lock(&self.inner.faults);
            if faults.abort_commits > 0 {
                faults.abort_commits -= 1;
                continue;
            }
            if let Some(err) = faults.commit_error.take() {
                return Err(err.into());
            }
            drop(faults);

            let working = lock(&txn.working).clone();
            let mut db = lock(&self.inner.db);
            if db.version != base_version {
                // Another transaction committed first.
                continue;
            }
            *db = working;
            db.version = base_version + 1;
            self.inner.counters.commits.fetch_add(1, Ordering::SeqCst);
            return Ok(());
        }
        Err(EngineError::new(Code::Aborted, "transaction aborted too many times").into())
    }

    fn close(&self) {
        self.inner.counters.engine_closes.fetch_add(1, Ordering::SeqCst);
    }
}

struct FakeFactory {
    engine: FakeEngine,
    failure: Option<EngineError>,
}

#[async_trait]
impl EngineFactory for FakeFactory {
    async fn connect(&self, _config: &Config) -> Result<Arc<dyn Engine>, EngineError> {
        match &self.failure {
            Some(err) => Err(err.clone()),
            None => Ok(Arc::new(self.engine.clone())),
        }
    }
}

struct FakeSnapshot {
    db: Database,
    closed: AtomicBool,
    engine: FakeEngine,
}

#[async_trait]
impl ReadOnlySnapshot for FakeSnapshot {
    async fn query(&self, ctx: &Context, stmt: Statement) -> Result<Box<dyn RowStream>, EngineError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineError::new(
                Code::FailedPrecondition,
                "read-only transaction is closed",
            ));
        }
        self.engine.read(ctx, &self.db, &stmt).await
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.engine
                .inner
                .counters
                .snapshots_closed
                .fetch_add(1, Ordering::SeqCst);
        }
    }
}

struct FakeTransaction {
    working: Mutex<Database>,
    engine: FakeEngine,
}

#[async_trait]
impl ReadWriteTransaction for FakeTransaction {
    async fn query(&self, ctx: &Context, stmt: Statement) -> Result<Box<dyn RowStream>, EngineError> {
        let db = lock(&self.working).clone();
        self.engine.read(ctx, &db, &stmt).await
    }

    async fn update(&self, ctx: &Context, stmt: Statement) -> Result<i64, EngineError> {
        self.engine.count_call();
        if let Some(err) = ctx.err() {
            return Err(context_error(&err));
        }
        self.engine.pause(ctx).await?;
        lock(&self.working).update(&stmt)
    }
}

struct FakeRowStream {
    rows: VecDeque<EngineRow>,
    stopped: bool,
    engine: FakeEngine,
}

#[async_trait]
impl RowStream for FakeRowStream {
    async fn next(&mut self) -> Result<Option<EngineRow>, EngineError> {
        if self.stopped {
            return Ok(None);
        }
        Ok(self.rows.pop_front())
    }

    fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.engine
                .inner
                .counters
                .streams_stopped
                .fetch_add(1, Ordering::SeqCst);
        }
    }
}
