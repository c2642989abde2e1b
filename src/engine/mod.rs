// Engine module - the boundary to the underlying database client.
//
// The driver never talks to the network itself. Everything it needs from the
// database is expressed by the traits below:
// - Engine: single-use reads, read-only snapshots, the retrying read-write runner
// - ReadOnlySnapshot / ReadWriteTransaction: handles passed out by the engine
// - RowStream: a server-side result cursor
// - EngineFactory: builds an engine from the driver configuration

pub mod error;
pub mod row;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;

use crate::config::Config;
use crate::context::Context;
use crate::error::DriverError;
use crate::types::Value;

pub use error::{Code, EngineError};
pub use row::{EngineRow, Field, TypeCode};

/// Query text plus bound parameters, ready to be sent to the engine.
///
/// Built once per exec/query call and never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: BTreeMap<String, Value>,
}

impl Statement {
    #[must_use]
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_params(sql: impl Into<String>, params: BTreeMap<String, Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

/// Consistency point for read-only snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimestampBound {
    /// Read the latest committed data.
    #[default]
    Strong,
    /// Read data no older than the given staleness.
    MaxStaleness(std::time::Duration),
    /// Read data exactly the given staleness in the past.
    ExactStaleness(std::time::Duration),
}

/// Callback run by [`Engine::run_read_write`] once per attempt.
///
/// The body returns `Ok(())` to ask for a commit. Any error ends the attempt;
/// only retryable engine errors make the runner invoke the body again.
pub type TransactionBody =
    Box<dyn FnMut(Arc<dyn ReadWriteTransaction>) -> BoxFuture<'static, Result<(), DriverError>> + Send>;

/// A server-side result cursor.
#[async_trait]
pub trait RowStream: Send {
    /// Advance the cursor. `Ok(None)` once the result is exhausted.
    async fn next(&mut self) -> Result<Option<EngineRow>, EngineError>;

    /// Release the cursor. Must be safe to call more than once.
    fn stop(&mut self);
}

/// A read-only transaction reading at a fixed timestamp bound.
#[async_trait]
pub trait ReadOnlySnapshot: Send + Sync {
    async fn query(&self, ctx: &Context, stmt: Statement) -> Result<Box<dyn RowStream>, EngineError>;

    fn close(&self);
}

/// The transaction handle the engine passes to a [`TransactionBody`] attempt.
#[async_trait]
pub trait ReadWriteTransaction: Send + Sync {
    async fn query(&self, ctx: &Context, stmt: Statement) -> Result<Box<dyn RowStream>, EngineError>;

    /// Apply a DML statement and return the number of affected rows.
    async fn update(&self, ctx: &Context, stmt: Statement) -> Result<i64, EngineError>;
}

/// The database client wrapped by the driver.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Run a strongly-consistent, single-use read.
    async fn single_query(
        &self,
        ctx: &Context,
        stmt: Statement,
    ) -> Result<Box<dyn RowStream>, EngineError>;

    fn read_only_transaction(&self, bound: TimestampBound) -> Arc<dyn ReadOnlySnapshot>;

    /// Run `body` inside a read-write transaction, retrying aborted attempts,
    /// and commit when the body returns `Ok(())`.
    ///
    /// Errors returned by the body are passed back unchanged; engine failures
    /// are wrapped in [`DriverError::Engine`].
    async fn run_read_write(&self, ctx: &Context, body: TransactionBody) -> Result<(), DriverError>;

    /// Release sessions held by the client.
    fn close(&self);
}

/// Builds the engine client for a connector.
#[async_trait]
pub trait EngineFactory: Send + Sync {
    async fn connect(&self, config: &Config) -> Result<Arc<dyn Engine>, EngineError>;
}
