use crate::error::DriverError;

/// Outcome of [`crate::Connection::exec`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecResult {
    rows_affected: i64,
}

impl ExecResult {
    pub(crate) fn new(rows_affected: i64) -> Self {
        Self { rows_affected }
    }

    #[must_use]
    pub fn rows_affected(&self) -> i64 {
        self.rows_affected
    }

    /// The database does not generate row IDs.
    ///
    /// # Errors
    /// Always returns [`DriverError::Unsupported`].
    pub fn last_insert_id(&self) -> Result<i64, DriverError> {
        Err(DriverError::Unsupported(
            "spanner doesn't autogenerate IDs".into(),
        ))
    }
}
