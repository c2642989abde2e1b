use std::sync::Arc;

use async_trait::async_trait;

use crate::config::Config;
use crate::connection::Connection;
use crate::connector::Connector;
use crate::context::Context;
use crate::engine::EngineFactory;
use crate::error::DriverError;
use crate::logging::Logger;
use crate::result::ExecResult;
use crate::rows::Rows;
use crate::statement::PreparedStatement;
use crate::transaction::Transaction;
use crate::types::{NamedValue, TxOptions, Value};

/// Entry point: turns a database path into connectors and connections.
///
/// ```rust,no_run
/// use spanner_sql_driver::prelude::*;
///
/// # async fn demo(factory: std::sync::Arc<dyn EngineFactory>) -> Result<(), DriverError> {
/// let driver = Driver::new(factory);
/// let conn = driver.open("projects/p/instances/i/databases/d").await?;
/// let ctx = Context::background();
/// let tx = conn.begin_tx(&ctx, TxOptions::read_write()).await?;
/// tx.exec(&ctx, "INSERT INTO t (id, v) VALUES (@id, @v)", &positional_args(["k1".into(), true.into()]))
///     .await?;
/// tx.commit().await?;
/// # Ok(()) }
/// ```
#[derive(Clone)]
pub struct Driver {
    factory: Arc<dyn EngineFactory>,
    logger: Option<Logger>,
}

impl Driver {
    #[must_use]
    pub fn new(factory: Arc<dyn EngineFactory>) -> Self {
        Self {
            factory,
            logger: None,
        }
    }

    /// Use `logger` for every connector opened by this driver.
    #[must_use]
    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Build a connector for the database named by `identifier`.
    ///
    /// # Errors
    /// [`DriverError::Config`] for a malformed path, or the engine factory's error.
    pub async fn open_connector(&self, identifier: &str) -> Result<Connector, DriverError> {
        let mut builder = Config::builder(identifier)?;
        if let Some(logger) = &self.logger {
            builder = builder.logger(logger.clone());
        }
        self.open_connector_with(builder.finish()?).await
    }

    /// Build a connector from a full configuration.
    ///
    /// # Errors
    /// The engine factory's error.
    pub async fn open_connector_with(&self, config: Config) -> Result<Connector, DriverError> {
        Connector::new(config, self.factory.as_ref()).await
    }

    /// Open a single connection to the database named by `identifier`.
    ///
    /// # Errors
    /// Same as [`Driver::open_connector`].
    pub async fn open(&self, identifier: &str) -> Result<Connection, DriverError> {
        let connector = self.open_connector(identifier).await?;
        connector.connect(&Context::background()).await
    }
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver").finish_non_exhaustive()
    }
}

/// Opens connections from a database identifier.
#[async_trait]
pub trait AsyncDriver {
    type Conn: AsyncConnection;

    async fn open(&self, identifier: &str) -> Result<Self::Conn, DriverError>;
}

/// Opens connections to one preconfigured database.
#[async_trait]
pub trait AsyncConnector {
    type Conn: AsyncConnection;

    async fn connect(&self, ctx: &Context) -> Result<Self::Conn, DriverError>;
}

/// The connection contract: statements, transactions and session lifecycle.
#[async_trait]
pub trait AsyncConnection: Send + Sync {
    type Tx: AsyncTransaction;
    type Stmt: AsyncStatement;
    type Rows: AsyncRows;

    fn prepare_context(&self, ctx: &Context, query: &str) -> Result<Self::Stmt, DriverError>;

    async fn begin_tx(&self, ctx: &Context, opts: TxOptions) -> Result<Self::Tx, DriverError>;

    async fn exec(&self, ctx: &Context, query: &str, args: &[NamedValue]) -> Result<ExecResult, DriverError>;

    async fn query(&self, ctx: &Context, query: &str, args: &[NamedValue]) -> Result<Self::Rows, DriverError>;

    async fn ping(&self, ctx: &Context) -> Result<(), DriverError>;

    fn reset_session(&self, ctx: &Context) -> Result<(), DriverError>;

    fn is_valid(&self) -> bool;

    fn close(&self);
}

#[async_trait]
pub trait AsyncTransaction: Send + Sync {
    async fn commit(&self) -> Result<(), DriverError>;

    async fn rollback(&self) -> Result<(), DriverError>;
}

#[async_trait]
pub trait AsyncStatement: Send + Sync {
    type Rows: AsyncRows;

    fn num_input(&self) -> usize;

    async fn exec(&self, ctx: &Context, args: &[NamedValue]) -> Result<ExecResult, DriverError>;

    async fn query(&self, ctx: &Context, args: &[NamedValue]) -> Result<Self::Rows, DriverError>;

    fn close(&self) -> Result<(), DriverError>;
}

#[async_trait]
pub trait AsyncRows: Send {
    async fn columns(&mut self) -> Vec<String>;

    async fn next(&mut self, dest: &mut [Value]) -> Result<bool, DriverError>;

    fn close(&mut self);
}

#[async_trait]
impl AsyncDriver for Driver {
    type Conn = Connection;

    async fn open(&self, identifier: &str) -> Result<Connection, DriverError> {
        Driver::open(self, identifier).await
    }
}

#[async_trait]
impl AsyncConnector for Connector {
    type Conn = Connection;

    async fn connect(&self, ctx: &Context) -> Result<Connection, DriverError> {
        Connector::connect(self, ctx).await
    }
}

#[async_trait]
impl AsyncConnection for Connection {
    type Tx = Transaction;
    type Stmt = PreparedStatement;
    type Rows = Rows;

    fn prepare_context(&self, ctx: &Context, query: &str) -> Result<PreparedStatement, DriverError> {
        Connection::prepare_context(self, ctx, query)
    }

    async fn begin_tx(&self, ctx: &Context, opts: TxOptions) -> Result<Transaction, DriverError> {
        Connection::begin_tx(self, ctx, opts).await
    }

    async fn exec(&self, ctx: &Context, query: &str, args: &[NamedValue]) -> Result<ExecResult, DriverError> {
        Connection::exec(self, ctx, query, args).await
    }

    async fn query(&self, ctx: &Context, query: &str, args: &[NamedValue]) -> Result<Rows, DriverError> {
        Connection::query(self, ctx, query, args).await
    }

    async fn ping(&self, ctx: &Context) -> Result<(), DriverError> {
        Connection::ping(self, ctx).await
    }

    fn reset_session(&self, ctx: &Context) -> Result<(), DriverError> {
        Connection::reset_session(self, ctx)
    }

    fn is_valid(&self) -> bool {
        Connection::is_valid(self)
    }

    fn close(&self) {
        Connection::close(self);
    }
}

#[async_trait]
impl AsyncTransaction for Transaction {
    async fn commit(&self) -> Result<(), DriverError> {
        Transaction::commit(self).await
    }

    async fn rollback(&self) -> Result<(), DriverError> {
        Transaction::rollback(self).await
    }
}

#[async_trait]
impl AsyncStatement for PreparedStatement {
    type Rows = Rows;

    fn num_input(&self) -> usize {
        PreparedStatement::num_input(self)
    }

    async fn exec(&self, ctx: &Context, args: &[NamedValue]) -> Result<ExecResult, DriverError> {
        PreparedStatement::exec(self, ctx, args).await
    }

    async fn query(&self, ctx: &Context, args: &[NamedValue]) -> Result<Rows, DriverError> {
        PreparedStatement::query(self, ctx, args).await
    }

    fn close(&self) -> Result<(), DriverError> {
        PreparedStatement::close(self)
    }
}

#[async_trait]
impl AsyncRows for Rows {
    async fn columns(&mut self) -> Vec<String> {
        Rows::columns(self).await.to_vec()
    }

    async fn next(&mut self, dest: &mut [Value]) -> Result<bool, DriverError> {
        Rows::next(self, dest).await
    }

    fn close(&mut self) {
        Rows::close(self);
    }
}
