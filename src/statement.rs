use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::connection::ConnShared;
use crate::context::Context;
use crate::error::DriverError;
use crate::result::ExecResult;
use crate::rows::Rows;
use crate::types::NamedValue;

/// A query bound to the connection that prepared it.
///
/// Preparing only counts the placeholders; the query text is sent with every
/// execution.
pub struct PreparedStatement {
    conn: Arc<ConnShared>,
    query: String,
    num_input: usize,
    closed: AtomicBool,
}

impl PreparedStatement {
    pub(crate) fn new(conn: Arc<ConnShared>, query: String, num_input: usize) -> Self {
        Self {
            conn,
            query,
            num_input,
            closed: AtomicBool::new(false),
        }
    }

    /// Number of distinct `@name` placeholders.
    #[must_use]
    pub fn num_input(&self) -> usize {
        self.num_input
    }

    #[must_use]
    pub fn query_text(&self) -> &str {
        &self.query
    }

    /// # Errors
    /// Same as [`crate::Connection::exec`], plus [`DriverError::InvalidConnection`]
    /// after [`PreparedStatement::close`].
    pub async fn exec(&self, ctx: &Context, args: &[NamedValue]) -> Result<ExecResult, DriverError> {
        self.ensure_open("exec")?;
        self.conn.exec(ctx, &self.query, args).await
    }

    /// # Errors
    /// Same as [`crate::Connection::query`], plus [`DriverError::InvalidConnection`]
    /// after [`PreparedStatement::close`].
    pub async fn query(&self, ctx: &Context, args: &[NamedValue]) -> Result<Rows, DriverError> {
        self.ensure_open("query")?;
        self.conn.query(ctx, &self.query, args).await
    }

    /// Detach the statement from its connection.
    ///
    /// # Errors
    /// [`DriverError::InvalidConnection`] if the statement was already closed
    /// or its connection is closed.
    pub fn close(&self) -> Result<(), DriverError> {
        if self.closed.swap(true, Ordering::SeqCst) || self.conn.is_closed() {
            self.conn.logger().invalid_connection("statement close");
            return Err(DriverError::InvalidConnection);
        }
        Ok(())
    }

    fn ensure_open(&self, operation: &str) -> Result<(), DriverError> {
        if self.closed.load(Ordering::SeqCst) {
            self.conn.logger().invalid_connection(operation);
            return Err(DriverError::InvalidConnection);
        }
        Ok(())
    }
}

impl std::fmt::Debug for PreparedStatement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedStatement")
            .field("query", &self.query)
            .field("num_input", &self.num_input)
            .finish_non_exhaustive()
    }
}
