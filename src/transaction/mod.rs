pub(crate) mod bridge;
pub(crate) mod read_only;

use std::sync::Arc;

use crate::connection::ConnShared;
use crate::context::Context;
use crate::error::DriverError;
use crate::result::ExecResult;
use crate::rows::Rows;
use crate::types::NamedValue;

pub use bridge::BridgeState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TxKind {
    ReadOnly,
    ReadWrite,
}

/// A transaction started with [`crate::Connection::begin_tx`].
///
/// The handle only works while its connection still considers it the active
/// transaction. After commit, rollback, `reset_session` or connection close,
/// every call fails with [`DriverError::InvalidConnection`].
pub struct Transaction {
    conn: Arc<ConnShared>,
    id: u64,
    kind: TxKind,
}

impl Transaction {
    pub(crate) fn new(conn: Arc<ConnShared>, id: u64, kind: TxKind) -> Self {
        Self { conn, id, kind }
    }

    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.kind == TxKind::ReadOnly
    }

    /// Where the read-write transaction is in its lifecycle. `None` for a
    /// read-only transaction and once the handle is inert.
    #[must_use]
    pub fn state(&self) -> Option<BridgeState> {
        self.conn.bridge_state(self.id)
    }

    /// Commit the transaction.
    ///
    /// # Errors
    /// [`DriverError::InvalidConnection`] if the transaction is no longer
    /// active, or the engine's commit error.
    pub async fn commit(&self) -> Result<(), DriverError> {
        self.conn.commit(self.id).await
    }

    /// Roll the transaction back.
    ///
    /// # Errors
    /// [`DriverError::InvalidConnection`] if the transaction is no longer
    /// active, or an error the engine reported before the rollback.
    pub async fn rollback(&self) -> Result<(), DriverError> {
        self.conn.rollback(self.id).await
    }

    /// Run a DML statement in this transaction.
    ///
    /// # Errors
    /// Same as [`crate::Connection::exec`], plus [`DriverError::InvalidConnection`]
    /// once the transaction is finished.
    pub async fn exec(
        &self,
        ctx: &Context,
        query: &str,
        args: &[NamedValue],
    ) -> Result<ExecResult, DriverError> {
        self.ensure_active("exec")?;
        self.conn.exec(ctx, query, args).await
    }

    /// Run a query in this transaction.
    ///
    /// # Errors
    /// Same as [`crate::Connection::query`], plus [`DriverError::InvalidConnection`]
    /// once the transaction is finished.
    pub async fn query(&self, ctx: &Context, query: &str, args: &[NamedValue]) -> Result<Rows, DriverError> {
        self.ensure_active("query")?;
        self.conn.query(ctx, query, args).await
    }

    fn ensure_active(&self, operation: &str) -> Result<(), DriverError> {
        if self.conn.is_active(self.id) {
            Ok(())
        } else {
            self.conn.logger().invalid_connection(operation);
            Err(DriverError::InvalidConnection)
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}
