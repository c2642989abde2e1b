//! Connection, transaction and row-cursor driver for a distributed,
//! strongly-consistent SQL database.
//!
//! The database client runs read-write transactions as retried callbacks.
//! This crate turns that into `begin_tx` / `exec` / `query` / `commit` calls
//! driven by the caller, and tears a connection down when the [`Context`] of
//! an in-flight call fires.
//!
//! ```rust,no_run
//! use spanner_sql_driver::prelude::*;
//!
//! # async fn demo(connector: Connector) -> Result<(), DriverError> {
//! let ctx = Context::background();
//! let conn = connector.connect(&ctx).await?;
//! let mut rows = conn
//!     .query(&ctx, "SELECT id, v FROM t WHERE id = @id", &positional_args(["k1".into()]))
//!     .await?;
//! while let Some(row) = rows.next_row().await? {
//!     println!("{row:?}");
//! }
//! # Ok(()) }
//! ```

pub mod config;
pub mod connection;
pub mod connector;
pub mod context;
pub mod driver;
pub mod engine;
pub mod error;
pub mod logging;
pub mod params;
pub mod prelude;
pub mod result;
pub mod rows;
pub mod statement;
pub mod transaction;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::{Config, ConfigBuilder, DatabasePath, SessionPoolConfig};
pub use connection::Connection;
pub use connector::Connector;
pub use context::Context;
pub use driver::Driver;
pub use error::DriverError;
pub use logging::Logger;
pub use result::ExecResult;
pub use rows::Rows;
pub use statement::PreparedStatement;
pub use transaction::Transaction;
pub use types::{NamedValue, TxOptions, Value};
