use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::context::Context;
use crate::engine::{Engine, ReadOnlySnapshot, RowStream, Statement, TimestampBound};
use crate::error::DriverError;

/// Snapshot reads at a fixed timestamp bound.
///
/// Statements need no ordering between them, so the snapshot is used directly
/// instead of going through a bridge.
pub(crate) struct ReadOnlyHandle {
    snapshot: Arc<dyn ReadOnlySnapshot>,
    released: AtomicBool,
}

impl ReadOnlyHandle {
    pub(crate) fn new(snapshot: Arc<dyn ReadOnlySnapshot>) -> Self {
        Self {
            snapshot,
            released: AtomicBool::new(false),
        }
    }

    /// Open a snapshot reading the latest committed data.
    pub(crate) fn strong(engine: &dyn Engine) -> Self {
        Self::new(engine.read_only_transaction(TimestampBound::Strong))
    }

    pub(crate) async fn query(
        &self,
        ctx: &Context,
        stmt: Statement,
    ) -> Result<Box<dyn RowStream>, DriverError> {
        if self.released.load(Ordering::SeqCst) {
            return Err(DriverError::InvalidConnection);
        }
        Ok(self.snapshot.query(ctx, stmt).await?)
    }

    /// Close the snapshot. Only the first call reaches the engine.
    pub(crate) fn release(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.snapshot.close();
        }
    }
}
