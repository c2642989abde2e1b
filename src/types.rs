use chrono::{DateTime, Local, Utc};

/// Values bound as statement parameters and decoded from result rows.
///
/// ```rust
/// use spanner_sql_driver::prelude::*;
///
/// let args = vec![
///     NamedValue::positional("k1"),
///     NamedValue::named("v", true),
/// ];
/// # let _ = args;
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// NULL value
    Null,
    /// Integer value (64-bit)
    Int(i64),
    /// Floating point value (64-bit)
    Float(f64),
    /// Text/string value
    Text(String),
    /// Boolean value
    Bool(bool),
    /// Binary data
    Bytes(Vec<u8>),
    /// Calendar date, as midnight in the local time zone
    Date(DateTime<Local>),
    /// Timestamp value
    Timestamp(DateTime<Utc>),
}

impl Value {
    /// Check if this value is NULL
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        if let Value::Int(value) = self {
            Some(*value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        if let Value::Float(value) = self {
            Some(*value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        if let Value::Text(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        if let Value::Bool(value) = self {
            Some(*value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        if let Value::Bytes(bytes) = self {
            Some(bytes)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_date(&self) -> Option<DateTime<Local>> {
        if let Value::Date(value) = self {
            Some(*value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Timestamp(value) => Some(*value),
            Value::Text(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Bytes(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::Timestamp(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

/// A statement argument, optionally carrying the placeholder name it binds to.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedValue {
    /// Placeholder name without the leading `@`. `None` binds by position.
    pub name: Option<String>,
    pub value: Value,
}

impl NamedValue {
    #[must_use]
    pub fn positional(value: impl Into<Value>) -> Self {
        Self {
            name: None,
            value: value.into(),
        }
    }

    #[must_use]
    pub fn named(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: Some(name.into()),
            value: value.into(),
        }
    }
}

/// Build a positional argument list.
///
/// ```rust
/// use spanner_sql_driver::prelude::*;
///
/// let args = positional_args([Value::from("k1"), Value::from(true)]);
/// assert_eq!(args.len(), 2);
/// ```
#[must_use]
pub fn positional_args(values: impl IntoIterator<Item = Value>) -> Vec<NamedValue> {
    values.into_iter().map(NamedValue::positional).collect()
}

/// Options accepted by `begin_tx`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TxOptions {
    pub read_only: bool,
}

impl TxOptions {
    #[must_use]
    pub fn read_only() -> Self {
        Self { read_only: true }
    }

    #[must_use]
    pub fn read_write() -> Self {
        Self { read_only: false }
    }
}
