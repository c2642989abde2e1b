use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::connector::EngineHandle;
use crate::context::Context;
use crate::engine::{Code, EngineError, ReadWriteTransaction, RowStream, Statement, TransactionBody};
use crate::error::DriverError;

type QueryReply = Result<Box<dyn RowStream>, EngineError>;
type UpdateReply = Result<i64, EngineError>;

/// Messages from the caller to the attempt running inside the engine.
enum BridgeCommand {
    Query {
        ctx: Context,
        stmt: Statement,
        respond_to: oneshot::Sender<QueryReply>,
    },
    Update {
        ctx: Context,
        stmt: Statement,
        respond_to: oneshot::Sender<UpdateReply>,
    },
    Commit,
    Rollback,
}

/// Lifecycle of a bridged read-write transaction.
#[derive(Debug, Clone)]
pub enum BridgeState {
    Starting,
    Ready,
    Executing,
    Committed,
    RolledBack,
    Aborted(DriverError),
}

/// State owned by the transaction body across attempts.
struct AttemptShared {
    commands: mpsc::Receiver<BridgeCommand>,
    ready: Option<oneshot::Sender<()>>,
    relayed: bool,
    finished: bool,
}

/// Outcome of the engine's transaction runner, read at most once from the
/// channel and remembered afterwards.
struct OutcomeSlot {
    receiver: Option<oneshot::Receiver<Result<(), DriverError>>>,
    result: Option<Result<(), DriverError>>,
}

/// Runs the engine's read-write transaction callback on its own task and
/// exposes it as query/update/commit/rollback calls.
///
/// The caller waits for each reply before sending the next command, so the
/// attempt sees statements one at a time and in issue order.
pub(crate) struct RwBridge {
    commands: mpsc::Sender<BridgeCommand>,
    outcome: AsyncMutex<OutcomeSlot>,
    state: Mutex<BridgeState>,
    token: CancellationToken,
}

impl RwBridge {
    /// Start one read-write transaction on `engine`.
    ///
    /// `token` ends the attempt when cancelled. The returned receiver fires once
    /// the callback is running and waiting for the first command; it is dropped
    /// without firing if the transaction fails to start.
    pub(crate) fn start(
        engine: EngineHandle,
        ctx: &Context,
        token: CancellationToken,
    ) -> (Arc<Self>, oneshot::Receiver<()>) {
        let (command_tx, command_rx) = mpsc::channel(1);
        let (ready_tx, ready_rx) = oneshot::channel();
        let (outcome_tx, outcome_rx) = oneshot::channel();

        let attempt_ctx = ctx.linked(token.clone());
        let shared = Arc::new(AsyncMutex::new(AttemptShared {
            commands: command_rx,
            ready: Some(ready_tx),
            relayed: false,
            finished: false,
        }));
        let body_ctx = attempt_ctx.clone();
        let body: TransactionBody = Box::new(move |txn| {
            let shared = Arc::clone(&shared);
            let ctx = body_ctx.clone();
            Box::pin(async move { run_attempt(&ctx, txn, &shared).await })
        });

        tokio::spawn(async move {
            let result = engine.run_read_write(&attempt_ctx, body).await;
            let _ = outcome_tx.send(result);
        });

        let bridge = Arc::new(Self {
            commands: command_tx,
            outcome: AsyncMutex::new(OutcomeSlot {
                receiver: Some(outcome_rx),
                result: None,
            }),
            state: Mutex::new(BridgeState::Starting),
            token,
        });
        (bridge, ready_rx)
    }

    /// Wait until the attempt is ready, it fails to start, or `timeout` passes.
    pub(crate) async fn wait_ready(
        &self,
        ready: oneshot::Receiver<()>,
        timeout: Duration,
    ) -> Result<(), DriverError> {
        match tokio::time::timeout(timeout, ready).await {
            Ok(Ok(())) => {
                self.set_state(BridgeState::Ready);
                Ok(())
            }
            // The body was dropped before signalling: the runner ended early.
            Ok(Err(_)) => Err(self.ended_without_reply().await),
            Err(_) => {
                self.abandon();
                Err(DriverError::BeginTimeout(timeout))
            }
        }
    }

    pub(crate) async fn query(
        &self,
        ctx: &Context,
        stmt: Statement,
    ) -> Result<Box<dyn RowStream>, DriverError> {
        let (respond_to, reply) = oneshot::channel();
        self.send(BridgeCommand::Query {
            ctx: ctx.clone(),
            stmt,
            respond_to,
        })
        .await?;
        match reply.await {
            Ok(result) => {
                self.set_state(BridgeState::Executing);
                Ok(result?)
            }
            Err(_) => Err(self.ended_without_reply().await),
        }
    }

    pub(crate) async fn update(&self, ctx: &Context, stmt: Statement) -> Result<i64, DriverError> {
        let (respond_to, reply) = oneshot::channel();
        self.send(BridgeCommand::Update {
            ctx: ctx.clone(),
            stmt,
            respond_to,
        })
        .await?;
        match reply.await {
            Ok(result) => {
                self.set_state(BridgeState::Executing);
                Ok(result?)
            }
            Err(_) => Err(self.ended_without_reply().await),
        }
    }

    /// Ask the attempt to commit and return the runner's final result.
    pub(crate) async fn commit(&self) -> Result<(), DriverError> {
        // A closed channel means the attempt already ended; its outcome says why.
        let _ = self.commands.send(BridgeCommand::Commit).await;
        let result = self.outcome().await;
        self.token.cancel();
        match &result {
            Ok(()) => self.set_state(BridgeState::Committed),
            Err(err) => self.set_state(BridgeState::Aborted(err.clone())),
        }
        result
    }

    /// Ask the attempt to roll back. The abort sentinel counts as success.
    pub(crate) async fn rollback(&self) -> Result<(), DriverError> {
        let _ = self.commands.send(BridgeCommand::Rollback).await;
        let result = match self.outcome().await {
            Ok(()) | Err(DriverError::Aborted) => Ok(()),
            Err(err) => Err(err),
        };
        self.token.cancel();
        match &result {
            Ok(()) => self.set_state(BridgeState::RolledBack),
            Err(err) => self.set_state(BridgeState::Aborted(err.clone())),
        }
        result
    }

    /// End the attempt without waiting for it.
    pub(crate) fn abandon(&self) {
        self.token.cancel();
    }

    pub(crate) fn state(&self) -> BridgeState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_state(&self, next: BridgeState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }

    async fn send(&self, command: BridgeCommand) -> Result<(), DriverError> {
        if self.commands.send(command).await.is_err() {
            return Err(self.ended_without_reply().await);
        }
        Ok(())
    }

    /// The attempt stopped listening; report what ended it.
    async fn ended_without_reply(&self) -> DriverError {
        let err = match self.outcome().await {
            Err(err) => err,
            Ok(()) => DriverError::InvalidConnection,
        };
        self.set_state(BridgeState::Aborted(err.clone()));
        err
    }

    async fn outcome(&self) -> Result<(), DriverError> {
        let mut slot = self.outcome.lock().await;
        if let Some(result) = &slot.result {
            return result.clone();
        }
        let result = match slot.receiver.take() {
            Some(receiver) => receiver.await.unwrap_or(Err(DriverError::InvalidConnection)),
            None => Err(DriverError::InvalidConnection),
        };
        slot.result = Some(result.clone());
        result
    }
}

/// One attempt of the transaction body: relay commands into `txn` until the
/// caller commits or rolls back, or `ctx` fires.
async fn run_attempt(
    ctx: &Context,
    txn: Arc<dyn ReadWriteTransaction>,
    shared: &AsyncMutex<AttemptShared>,
) -> Result<(), DriverError> {
    let mut shared = shared.lock().await;
    if shared.finished {
        // The engine retried after the caller already committed. Statements the
        // caller ran earlier cannot be replayed from here.
        if shared.relayed {
            return Err(EngineError::new(
                Code::FailedPrecondition,
                "transaction was aborted by the database after statements were applied; it cannot be replayed",
            )
            .into());
        }
        return Ok(());
    }
    if shared.relayed {
        return Err(EngineError::new(
            Code::FailedPrecondition,
            "transaction was aborted by the database and cannot be replayed",
        )
        .into());
    }
    if let Some(ready) = shared.ready.take() {
        let _ = ready.send(());
    }

    loop {
        let command = tokio::select! {
            biased;
            err = ctx.done() => return Err(err),
            command = shared.commands.recv() => command,
        };
        match command {
            // The caller dropped the transaction.
            None => return Err(DriverError::Aborted),
            Some(BridgeCommand::Query {
                ctx: op_ctx,
                stmt,
                respond_to,
            }) => {
                shared.relayed = true;
                let result = tokio::select! {
                    biased;
                    err = ctx.done() => return Err(err),
                    result = txn.query(&op_ctx, stmt) => result,
                };
                let _ = respond_to.send(result);
            }
            Some(BridgeCommand::Update {
                ctx: op_ctx,
                stmt,
                respond_to,
            }) => {
                shared.relayed = true;
                let result = tokio::select! {
                    biased;
                    err = ctx.done() => return Err(err),
                    result = txn.update(&op_ctx, stmt) => result,
                };
                let _ = respond_to.send(result);
            }
            Some(BridgeCommand::Commit) => {
                shared.finished = true;
                return Ok(());
            }
            Some(BridgeCommand::Rollback) => {
                shared.finished = true;
                return Err(DriverError::Aborted);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::engine::{Code, TypeCode};
    use crate::test_utils::FakeEngine;
    use crate::types::Value;

    fn engine() -> (FakeEngine, EngineHandle) {
        let engine = FakeEngine::new();
        engine.create_table("t", &[("id", TypeCode::String)]);
        let handle = EngineHandle::new(Arc::new(engine.clone()));
        (engine, handle)
    }

    fn insert(id: &str) -> Statement {
        Statement::with_params(
            "INSERT INTO t (id) VALUES (@id)",
            [("id".to_owned(), Value::from(id))].into_iter().collect(),
        )
    }

    async fn started(handle: EngineHandle) -> Arc<RwBridge> {
        let (bridge, ready) = RwBridge::start(handle, &Context::background(), CancellationToken::new());
        bridge.wait_ready(ready, Duration::from_secs(5)).await.unwrap();
        bridge
    }

    #[tokio::test]
    async fn statements_apply_in_issue_order() {
        let (engine, handle) = engine();
        let bridge = started(handle).await;
        assert!(matches!(bridge.state(), BridgeState::Ready));

        let ctx = Context::background();
        for id in ["a", "b", "c"] {
            assert_eq!(bridge.update(&ctx, insert(id)).await.unwrap(), 1);
        }
        assert!(matches!(bridge.state(), BridgeState::Executing));
        bridge.commit().await.unwrap();
        assert!(matches!(bridge.state(), BridgeState::Committed));

        let ids: Vec<Value> = engine.rows("t").into_iter().map(|row| row[0].clone()).collect();
        assert_eq!(ids, vec![Value::from("a"), Value::from("b"), Value::from("c")]);
    }

    #[tokio::test]
    async fn ended_attempt_surfaces_on_next_operation() {
        let (engine, handle) = engine();
        let bridge = started(handle).await;
        bridge.abandon();

        let err = bridge.update(&Context::background(), insert("a")).await.unwrap_err();
        assert!(matches!(err, DriverError::Canceled));
        assert!(matches!(bridge.state(), BridgeState::Aborted(DriverError::Canceled)));
        // The outcome is read once and replayed.
        assert!(matches!(bridge.commit().await, Err(DriverError::Canceled)));
        assert_eq!(engine.commits(), 0);
    }

    #[tokio::test]
    async fn startup_failure_fails_wait_ready_and_rollback() {
        let (engine, handle) = engine();
        engine.fail_next_begin(EngineError::new(Code::Unavailable, "no sessions"));
        let (bridge, ready) = RwBridge::start(handle, &Context::background(), CancellationToken::new());

        let err = bridge.wait_ready(ready, Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(&err, DriverError::Engine(e) if e.code() == Code::Unavailable));
        let err = bridge.rollback().await.unwrap_err();
        assert!(matches!(&err, DriverError::Engine(e) if e.code() == Code::Unavailable));
    }

    #[tokio::test]
    async fn rollback_reports_success_for_the_abort_sentinel() {
        let (engine, handle) = engine();
        let bridge = started(handle).await;
        bridge.update(&Context::background(), insert("a")).await.unwrap();
        bridge.rollback().await.unwrap();
        assert!(matches!(bridge.state(), BridgeState::RolledBack));
        assert!(engine.rows("t").is_empty());
        assert_eq!(engine.attempts(), 1);
    }
}
