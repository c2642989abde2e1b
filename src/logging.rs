use std::fmt;

use tracing::Dispatch;

use crate::error::DriverError;

/// Sink for the driver's diagnostic events.
///
/// Each connector carries its own logger and hands it to every connection it
/// creates, so two connectors in one process can log to different places. The
/// default writes formatted events to stderr.
#[derive(Clone)]
pub struct Logger {
    dispatch: Dispatch,
}

impl Logger {
    /// Route driver events to an existing `tracing` subscriber.
    #[must_use]
    pub fn new(dispatch: Dispatch) -> Self {
        Self { dispatch }
    }

    /// Formatted events on stderr.
    #[must_use]
    pub fn stderr() -> Self {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_target(true)
            .finish();
        Self::new(Dispatch::new(subscriber))
    }

    /// Drop every event.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(Dispatch::none())
    }

    fn emit(&self, f: impl FnOnce()) {
        tracing::dispatcher::with_default(&self.dispatch, f);
    }

    pub(crate) fn invalid_connection(&self, operation: &str) {
        self.emit(|| {
            tracing::error!(target: "spanner", operation, "{}", DriverError::InvalidConnection);
        });
    }

    pub(crate) fn connection_canceled(&self, err: &DriverError) {
        self.emit(|| tracing::warn!(target: "spanner", error = %err, "connection canceled"));
    }

    pub(crate) fn begin_failed(&self, err: &DriverError) {
        self.emit(|| {
            tracing::error!(target: "spanner", error = %err, "read-write transaction failed to start");
        });
    }

    pub(crate) fn cursor_error(&self, err: &DriverError) {
        self.emit(|| tracing::error!(target: "spanner", error = %err, "error from row iterator"));
    }

    pub(crate) fn debug(&self, message: &str) {
        self.emit(|| tracing::debug!(target: "spanner", "{message}"));
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::stderr()
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger").finish_non_exhaustive()
    }
}
