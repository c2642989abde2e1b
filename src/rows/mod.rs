pub mod decode;

use crate::engine::{EngineRow, RowStream};
use crate::error::DriverError;
use crate::logging::Logger;
use crate::types::Value;

pub use decode::decode_column;

/// Cursor over a query result.
///
/// Column names are only known once the engine has produced the first row,
/// so the cursor fetches that row ahead of the caller and keeps it until the
/// next call to [`Rows::next`].
pub struct Rows {
    stream: Box<dyn RowStream>,
    lookahead: Option<EngineRow>,
    columns: Vec<String>,
    fetched: bool,
    done: bool,
    deferred: Option<DriverError>,
    logger: Logger,
}

impl Rows {
    pub(crate) fn new(stream: Box<dyn RowStream>, logger: Logger) -> Self {
        Self {
            stream,
            lookahead: None,
            columns: Vec::new(),
            fetched: false,
            done: false,
            deferred: None,
            logger,
        }
    }

    /// Open a cursor and fetch its first row, so errors of the first fetch
    /// surface to the caller of `query`.
    pub(crate) async fn open(stream: Box<dyn RowStream>, logger: Logger) -> Result<Self, DriverError> {
        let mut rows = Self::new(stream, logger);
        if let Err(err) = rows.fetch_first().await {
            rows.close();
            return Err(err);
        }
        Ok(rows)
    }

    async fn fetch_first(&mut self) -> Result<(), DriverError> {
        if self.fetched {
            return Ok(());
        }
        self.fetched = true;
        match self.stream.next().await? {
            Some(row) => {
                self.columns = row.column_names();
                self.lookahead = Some(row);
            }
            None => self.done = true,
        }
        Ok(())
    }

    /// Names of the result columns; empty for a result without rows.
    pub async fn columns(&mut self) -> &[String] {
        if let Err(err) = self.fetch_first().await {
            self.logger.cursor_error(&err);
            self.deferred = Some(err);
        }
        &self.columns
    }

    /// Decode the next row into `dest`.
    ///
    /// Returns `Ok(false)` once the result is exhausted; every later call does
    /// the same.
    ///
    /// # Errors
    /// Engine errors while advancing, unsupported column types, or a `dest`
    /// shorter than the row.
    pub async fn next(&mut self, dest: &mut [Value]) -> Result<bool, DriverError> {
        if let Some(err) = self.deferred.take() {
            return Err(err);
        }
        self.fetch_first().await?;

        let row = match self.lookahead.take() {
            Some(row) => row,
            None => {
                if self.done {
                    return Ok(false);
                }
                match self.stream.next().await? {
                    Some(row) => row,
                    None => {
                        self.done = true;
                        return Ok(false);
                    }
                }
            }
        };
        decode::decode_row(&row, dest)?;
        Ok(true)
    }

    /// Fetch the next row as an owned vector.
    ///
    /// # Errors
    /// Same as [`Rows::next`].
    pub async fn next_row(&mut self) -> Result<Option<Vec<Value>>, DriverError> {
        let width = self.columns().await.len();
        let mut dest = vec![Value::Null; width];
        if self.next(&mut dest).await? {
            Ok(Some(dest))
        } else {
            Ok(None)
        }
    }

    /// Stop the server cursor. Safe to call repeatedly.
    pub fn close(&mut self) {
        self.stream.stop();
        self.lookahead = None;
        self.fetched = true;
        self.done = true;
    }
}

impl Drop for Rows {
    fn drop(&mut self) {
        self.stream.stop();
    }
}

impl std::fmt::Debug for Rows {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rows")
            .field("columns", &self.columns)
            .field("buffered", &self.lookahead.is_some())
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}
