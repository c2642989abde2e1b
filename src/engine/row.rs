use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as WireValue;

/// Type codes the engine attaches to every result column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TypeCode {
    Unspecified,
    Bool,
    Int64,
    Float64,
    Timestamp,
    Date,
    String,
    Bytes,
    Array,
    Struct,
    Numeric,
    Json,
}

/// Name and type of one result column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub type_code: TypeCode,
}

impl Field {
    #[must_use]
    pub fn new(name: impl Into<String>, type_code: TypeCode) -> Self {
        Self {
            name: name.into(),
            type_code,
        }
    }
}

/// A row as delivered by the engine: column metadata shared by every row of
/// the result, plus the values in their wire (JSON) encoding.
#[derive(Debug, Clone)]
pub struct EngineRow {
    fields: Arc<Vec<Field>>,
    values: Vec<WireValue>,
}

impl EngineRow {
    #[must_use]
    pub fn new(fields: Arc<Vec<Field>>, values: Vec<WireValue>) -> Self {
        Self { fields, values }
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    #[must_use]
    pub fn column_names(&self) -> Vec<String> {
        self.fields.iter().map(|field| field.name.clone()).collect()
    }

    /// Type code and wire value of column `index`.
    #[must_use]
    pub fn column(&self, index: usize) -> Option<(TypeCode, &WireValue)> {
        let field = self.fields.get(index)?;
        let value = self.values.get(index)?;
        Some((field.type_code, value))
    }
}
