pub(crate) mod state;
pub(crate) mod watcher;

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::config::Config;
use crate::connector::EngineHandle;
use crate::context::Context;
use crate::engine::{Statement, TransactionBody};
use crate::error::DriverError;
use crate::logging::Logger;
use crate::params::{bind_statement, param_names};
use crate::result::ExecResult;
use crate::rows::Rows;
use crate::statement::PreparedStatement;
use crate::transaction::bridge::{BridgeState, RwBridge};
use crate::transaction::read_only::ReadOnlyHandle;
use crate::transaction::{Transaction, TxKind};
use crate::types::{NamedValue, TxOptions};
use state::{ActiveTx, ConnState};
use tokio_util::sync::CancellationToken;
use watcher::{WatchGuard, Watcher};

/// State shared by a connection and the transactions and statements it hands out.
pub(crate) struct ConnShared {
    state: ConnState,
    /// Cancelled on teardown; ends the watcher and any running attempt.
    closing: CancellationToken,
    watcher: Watcher,
    config: Arc<Config>,
    logger: Logger,
}

impl ConnShared {
    pub(crate) fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    pub(crate) fn logger(&self) -> &Logger {
        &self.logger
    }

    /// The engine, or invalid-connection once the connection is closed.
    fn live_engine(&self, operation: &str) -> Result<EngineHandle, DriverError> {
        match self.state.engine() {
            Some(engine) if !self.state.is_closed() => Ok(engine),
            _ => {
                self.logger.invalid_connection(operation);
                Err(DriverError::InvalidConnection)
            }
        }
    }

    /// Register the current operation with the watcher.
    fn watch_cancel(&self, ctx: &Context, operation: &str) -> Result<WatchGuard<'_>, DriverError> {
        if let Some(err) = ctx.err() {
            self.cancel(err.clone());
            return Err(err);
        }
        if !ctx.can_fire() {
            return Ok(WatchGuard::inert());
        }
        if !self.state.begin_watch() {
            // Only one operation may be in flight per connection.
            self.logger.invalid_connection(operation);
            self.cleanup();
            return Err(DriverError::InvalidConnection);
        }
        match self.watcher.register(ctx.clone()) {
            Some(finish) => Ok(WatchGuard::active(&self.state, finish)),
            None => {
                self.state.end_watch();
                Ok(WatchGuard::inert())
            }
        }
    }

    /// Store `err` as the reason for teardown and close the connection.
    pub(crate) fn cancel(&self, err: DriverError) {
        if self.state.set_canceled(err.clone()) {
            self.logger.connection_canceled(&err);
        }
        self.cleanup();
    }

    /// Tear the connection down. Only the first call does anything.
    fn cleanup(&self) -> bool {
        if !self.state.try_close() {
            return false;
        }
        self.closing.cancel();
        self.state.take_active().release();
        drop(self.state.take_engine());
        true
    }

    /// Await `fut` unless the connection is torn down or `ctx` fires first.
    async fn interruptible<T>(
        &self,
        ctx: &Context,
        fut: impl Future<Output = Result<T, DriverError>>,
    ) -> Result<T, DriverError> {
        tokio::select! {
            biased;
            () = self.closing.cancelled() => {
                Err(self.state.canceled().unwrap_or(DriverError::InvalidConnection))
            }
            err = ctx.done() => Err(err),
            result = fut => result,
        }
    }

    /// Cancellation errors always invalidate the connection.
    fn settle<T>(&self, result: Result<T, DriverError>) -> Result<T, DriverError> {
        if let Err(err) = &result {
            if err.is_fatal() {
                self.cancel(err.clone());
            }
        }
        result
    }

    async fn begin_tx(&self, ctx: &Context, opts: TxOptions) -> Result<(u64, TxKind), DriverError> {
        let engine = self.live_engine("begin_tx")?;
        let _watch = self.watch_cancel(ctx, "begin_tx")?;
        if self.state.in_transaction() {
            return Err(DriverError::AlreadyInTransaction);
        }

        if opts.read_only {
            let handle = Arc::new(ReadOnlyHandle::strong(&*engine));
            return match self.state.install_read_only(Arc::clone(&handle)) {
                Ok(id) => Ok((id, TxKind::ReadOnly)),
                Err(err) => {
                    handle.release();
                    Err(err)
                }
            };
        }

        let (bridge, ready) = RwBridge::start(engine, ctx, self.closing.child_token());
        let started = self
            .interruptible(ctx, bridge.wait_ready(ready, self.config.begin_timeout))
            .await;
        if let Err(err) = started {
            bridge.abandon();
            self.logger.begin_failed(&err);
            return self.settle(Err(err));
        }
        match self.state.install_read_write(Arc::clone(&bridge)) {
            Ok(id) => Ok((id, TxKind::ReadWrite)),
            Err(err) => {
                bridge.abandon();
                Err(err)
            }
        }
    }

    pub(crate) async fn exec(
        &self,
        ctx: &Context,
        query: &str,
        args: &[NamedValue],
    ) -> Result<ExecResult, DriverError> {
        let engine = self.live_engine("exec")?;
        let _watch = self.watch_cancel(ctx, "exec")?;
        let active = self.state.active();
        if let ActiveTx::ReadOnly { .. } = active {
            return Err(DriverError::WriteInReadOnlyTransaction);
        }
        let stmt = bind_statement(query, args)?;

        let affected = match active {
            ActiveTx::ReadWrite { bridge, .. } => self.interruptible(ctx, bridge.update(ctx, stmt)).await,
            _ => self.interruptible(ctx, single_update(&engine, ctx, stmt)).await,
        };
        self.settle(affected).map(ExecResult::new)
    }

    pub(crate) async fn query(
        &self,
        ctx: &Context,
        query: &str,
        args: &[NamedValue],
    ) -> Result<Rows, DriverError> {
        let engine = self.live_engine("query")?;
        let _watch = self.watch_cancel(ctx, "query")?;
        let stmt = bind_statement(query, args)?;

        let stream = match self.state.active() {
            ActiveTx::ReadOnly { handle, .. } => self.interruptible(ctx, handle.query(ctx, stmt)).await,
            ActiveTx::ReadWrite { bridge, .. } => self.interruptible(ctx, bridge.query(ctx, stmt)).await,
            ActiveTx::None => {
                let single = async { engine.single_query(ctx, stmt).await.map_err(DriverError::from) };
                self.interruptible(ctx, single).await
            }
        };
        let stream = self.settle(stream)?;
        let rows = self
            .interruptible(ctx, Rows::open(stream, self.logger.clone()))
            .await;
        self.settle(rows)
    }

    async fn ping(&self, ctx: &Context) -> Result<(), DriverError> {
        self.live_engine("ping")?;
        if self.state.in_transaction() {
            return Ok(());
        }
        let mut rows = self.query(ctx, "SELECT 1", &[]).await?;
        rows.close();
        Ok(())
    }

    fn reset_session(&self) -> Result<(), DriverError> {
        if self.state.is_closed() {
            self.logger.invalid_connection("reset_session");
            return Err(DriverError::InvalidConnection);
        }
        self.state.take_active().release();
        Ok(())
    }

    pub(crate) async fn commit(&self, id: u64) -> Result<(), DriverError> {
        let Some(active) = self.state.take_active_if(id) else {
            self.logger.invalid_connection("commit");
            return Err(DriverError::InvalidConnection);
        };
        match active {
            ActiveTx::ReadOnly { handle, .. } => {
                handle.release();
                Ok(())
            }
            ActiveTx::ReadWrite { bridge, .. } => {
                let result = self.interruptible(&Context::background(), bridge.commit()).await;
                self.settle(result)
            }
            ActiveTx::None => Err(DriverError::InvalidConnection),
        }
    }

    pub(crate) async fn rollback(&self, id: u64) -> Result<(), DriverError> {
        let Some(active) = self.state.take_active_if(id) else {
            self.logger.invalid_connection("rollback");
            return Err(DriverError::InvalidConnection);
        };
        match active {
            ActiveTx::ReadOnly { handle, .. } => {
                handle.release();
                Ok(())
            }
            ActiveTx::ReadWrite { bridge, .. } => {
                let result = self.interruptible(&Context::background(), bridge.rollback()).await;
                self.settle(result)
            }
            ActiveTx::None => Err(DriverError::InvalidConnection),
        }
    }

    pub(crate) fn is_active(&self, id: u64) -> bool {
        self.state.is_active(id)
    }

    /// State of the bridge behind transaction `id`, while it is active.
    pub(crate) fn bridge_state(&self, id: u64) -> Option<BridgeState> {
        match self.state.active() {
            ActiveTx::ReadWrite { id: active, bridge } if active == id => Some(bridge.state()),
            _ => None,
        }
    }
}

impl Drop for ConnShared {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Run one DML statement in its own read-write transaction.
///
/// The statement is re-run if the engine retries the attempt.
async fn single_update(engine: &EngineHandle, ctx: &Context, stmt: Statement) -> Result<i64, DriverError> {
    let affected = Arc::new(AtomicI64::new(0));
    let body_affected = Arc::clone(&affected);
    let body_ctx = ctx.clone();
    let body: TransactionBody = Box::new(move |txn| {
        let ctx = body_ctx.clone();
        let stmt = stmt.clone();
        let affected = Arc::clone(&body_affected);
        Box::pin(async move {
            let count = txn.update(&ctx, stmt).await?;
            affected.store(count, Ordering::SeqCst);
            Ok(())
        })
    });
    engine.run_read_write(ctx, body).await?;
    Ok(affected.load(Ordering::SeqCst))
}

/// A session on the database.
///
/// Calls on one connection are expected to be awaited one at a time. Each call
/// taking a [`Context`] is abandoned, and the connection closed, if that
/// context fires before the call completes.
pub struct Connection {
    shared: Arc<ConnShared>,
}

impl Connection {
    pub(crate) fn new(engine: EngineHandle, config: Arc<Config>, logger: Logger) -> Self {
        let closing = CancellationToken::new();
        let shared = Arc::new_cyclic(|weak| ConnShared {
            state: ConnState::new(engine),
            watcher: Watcher::spawn(weak.clone(), closing.clone()),
            closing,
            config,
            logger,
        });
        Self { shared }
    }

    /// Prepare `query`. Only placeholders are inspected; nothing is sent to the engine.
    ///
    /// # Errors
    /// Returns [`DriverError::InvalidConnection`] on a closed connection.
    pub fn prepare(&self, query: &str) -> Result<PreparedStatement, DriverError> {
        self.shared.live_engine("prepare")?;
        Ok(PreparedStatement::new(
            Arc::clone(&self.shared),
            query.to_owned(),
            param_names(query).len(),
        ))
    }

    /// Like [`Connection::prepare`], failing if `ctx` has already fired.
    /// A fired context closes the connection, as it does for every other call.
    ///
    /// # Errors
    /// The context's error, or [`DriverError::InvalidConnection`].
    pub fn prepare_context(&self, ctx: &Context, query: &str) -> Result<PreparedStatement, DriverError> {
        if let Some(err) = ctx.err() {
            return self.shared.settle(Err(err));
        }
        self.prepare(query)
    }

    /// Transactions must be started with [`Connection::begin_tx`].
    ///
    /// # Errors
    /// Always returns [`DriverError::Unimplemented`].
    pub fn begin(&self) -> Result<Transaction, DriverError> {
        Err(DriverError::not_implemented("Connection", "begin"))
    }

    /// Start a transaction.
    ///
    /// A read-only transaction reads from a strong snapshot. A read-write
    /// transaction is started on the engine and this call returns once it is
    /// ready to take statements, or fails after the configured begin timeout.
    /// A begin timeout closes the connection.
    ///
    /// # Errors
    /// [`DriverError::AlreadyInTransaction`], startup errors from the engine,
    /// [`DriverError::BeginTimeout`], or the context's error.
    pub async fn begin_tx(&self, ctx: &Context, opts: TxOptions) -> Result<Transaction, DriverError> {
        let (id, kind) = self.shared.begin_tx(ctx, opts).await?;
        Ok(Transaction::new(Arc::clone(&self.shared), id, kind))
    }

    /// Run a DML statement, in the active transaction if there is one.
    ///
    /// # Errors
    /// Binding errors, [`DriverError::WriteInReadOnlyTransaction`], engine errors,
    /// or the context's error.
    pub async fn exec(
        &self,
        ctx: &Context,
        query: &str,
        args: &[NamedValue],
    ) -> Result<ExecResult, DriverError> {
        self.shared.exec(ctx, query, args).await
    }

    /// Run a query, in the active transaction if there is one.
    ///
    /// # Errors
    /// Binding errors, engine errors (including those of the first fetch), or
    /// the context's error.
    pub async fn query(&self, ctx: &Context, query: &str, args: &[NamedValue]) -> Result<Rows, DriverError> {
        self.shared.query(ctx, query, args).await
    }

    /// Check that the database is reachable.
    ///
    /// # Errors
    /// [`DriverError::InvalidConnection`] or the error of `SELECT 1`.
    pub async fn ping(&self, ctx: &Context) -> Result<(), DriverError> {
        self.shared.ping(ctx).await
    }

    /// Drop the active transaction, if any, without closing the connection.
    ///
    /// # Errors
    /// [`DriverError::InvalidConnection`] on a closed connection.
    pub fn reset_session(&self, _ctx: &Context) -> Result<(), DriverError> {
        self.shared.reset_session()
    }

    /// Close the connection. Later calls do nothing.
    pub fn close(&self) {
        self.shared.cleanup();
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.shared.is_closed()
    }

    /// The error that canceled this connection, if it was torn down by a context.
    #[must_use]
    pub fn canceled(&self) -> Option<DriverError> {
        self.shared.state.canceled()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("closed", &self.shared.is_closed())
            .field("in_transaction", &self.shared.state.in_transaction())
            .finish_non_exhaustive()
    }
}
