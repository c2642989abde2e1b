use std::time::Duration;

use thiserror::Error;

use crate::engine::{EngineError, TypeCode};

/// Errors returned by every public operation of the driver.
///
/// Errors raised locally (invalid connection, transaction misuse, parameter
/// binding, column decoding) never reach the engine. [`DriverError::Engine`]
/// wraps whatever the engine reported, untouched.
#[derive(Debug, Clone, Error)]
pub enum DriverError {
    #[error("invalid connection")]
    InvalidConnection,

    #[error("already in a transaction")]
    AlreadyInTransaction,

    #[error("cannot write in read-only transaction")]
    WriteInReadOnlyTransaction,

    #[error("query has {placeholders} placeholders but {arguments} arguments are provided")]
    PlaceholderMismatch { placeholders: usize, arguments: usize },

    #[error("unsupported column type: {0:?}")]
    UnsupportedColumnType(TypeCode),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("context canceled")]
    Canceled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,

    #[error("cannot begin transaction, timeout after {0:?}")]
    BeginTimeout(Duration),

    /// Returned by the transaction body to end an attempt on purpose.
    #[error("aborted")]
    Aborted,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parameter error: {0}")]
    Parameter(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Unimplemented feature: {0}")]
    Unimplemented(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

impl DriverError {
    /// True for errors caused by the caller's cancellation signal firing.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Canceled | Self::DeadlineExceeded)
    }

    /// True for errors after which the connection cannot be used again.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.is_cancellation() || matches!(self, Self::BeginTimeout(_))
    }

    pub(crate) fn not_implemented(receiver: &str, method: &str) -> Self {
        Self::Unimplemented(format!("{receiver}.{method} is not implemented"))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn begin_timeout_is_fatal_but_not_a_cancellation() {
        let timeout = DriverError::BeginTimeout(Duration::from_secs(10));
        assert!(timeout.is_fatal());
        assert!(!timeout.is_cancellation());
        assert!(DriverError::Canceled.is_fatal());
        assert!(DriverError::DeadlineExceeded.is_fatal());
        assert!(!DriverError::InvalidConnection.is_fatal());
        assert!(!DriverError::AlreadyInTransaction.is_fatal());
    }
}
