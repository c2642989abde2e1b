//! Convenient imports for common functionality.
//!
//! This module re-exports the most commonly used types and functions
//! to make it easier to get started with the library.

pub use crate::config::{Config, ConfigBuilder, DatabasePath, SessionPoolConfig};
pub use crate::connection::Connection;
pub use crate::connector::Connector;
pub use crate::context::Context;
pub use crate::driver::{
    AsyncConnection, AsyncConnector, AsyncDriver, AsyncRows, AsyncStatement, AsyncTransaction,
    Driver,
};
pub use crate::engine::{
    Code, Engine, EngineError, EngineFactory, EngineRow, Field, Statement, TimestampBound,
    TypeCode,
};
pub use crate::error::DriverError;
pub use crate::logging::Logger;
pub use crate::params::{bind_statement, param_names};
pub use crate::result::ExecResult;
pub use crate::rows::Rows;
pub use crate::statement::PreparedStatement;
pub use crate::transaction::{BridgeState, Transaction};
pub use crate::types::{NamedValue, TxOptions, Value, positional_args};
