//! The handful of statement shapes the in-memory engine understands.

use std::collections::BTreeMap;
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Value as WireValue, json};

use crate::engine::{Code, EngineError, EngineRow, Field, Statement, TypeCode};
use crate::types::Value;

lazy_static! {
    static ref SELECT_ONE: Regex = Regex::new(r"(?is)^\s*SELECT\s+1\s*;?\s*$").expect("valid regex");
    static ref SELECT: Regex = Regex::new(
        r"(?is)^\s*SELECT\s+(?P<cols>.+?)\s+FROM\s+(?P<table>\w+)(?:\s+WHERE\s+(?P<wcol>\w+)\s*=\s*(?P<wval>\S+))?\s*;?\s*$"
    )
    .expect("valid regex");
    static ref INSERT: Regex = Regex::new(
        r"(?is)^\s*INSERT\s+(?:INTO\s+)?(?P<table>\w+)\s*\((?P<cols>[^)]*)\)\s*VALUES\s*\((?P<vals>[^)]*)\)\s*;?\s*$"
    )
    .expect("valid regex");
    static ref UPDATE: Regex = Regex::new(
        r"(?is)^\s*UPDATE\s+(?P<table>\w+)\s+SET\s+(?P<sets>.+?)\s+WHERE\s+(?P<wcol>\w+)\s*=\s*(?P<wval>\S+)\s*;?\s*$"
    )
    .expect("valid regex");
    static ref DELETE: Regex = Regex::new(
        r"(?is)^\s*DELETE\s+(?:FROM\s+)?(?P<table>\w+)(?:\s+WHERE\s+(?P<wcol>\w+)\s*=\s*(?P<wval>\S+))?\s*;?\s*$"
    )
    .expect("valid regex");
}

#[derive(Debug, Clone)]
pub(crate) struct Table {
    pub(crate) fields: Vec<Field>,
    pub(crate) rows: Vec<Vec<Value>>,
}

/// Committed contents of the fake database. `version` moves on every commit.
#[derive(Debug, Clone, Default)]
pub(crate) struct Database {
    pub(crate) tables: BTreeMap<String, Table>,
    pub(crate) version: u64,
}

fn invalid(message: impl Into<String>) -> EngineError {
    EngineError::new(Code::InvalidArgument, message)
}

fn resolve(token: &str, params: &BTreeMap<String, Value>) -> Result<Value, EngineError> {
    let token = token.trim();
    if let Some(name) = token.strip_prefix('@') {
        return params
            .get(name)
            .cloned()
            .ok_or_else(|| invalid(format!("No parameter found for binding: {name}")));
    }
    if token.len() >= 2 && token.starts_with('\'') && token.ends_with('\'') {
        return Ok(Value::Text(token[1..token.len() - 1].to_owned()));
    }
    if token.eq_ignore_ascii_case("null") {
        return Ok(Value::Null);
    }
    if token.eq_ignore_ascii_case("true") {
        return Ok(Value::Bool(true));
    }
    if token.eq_ignore_ascii_case("false") {
        return Ok(Value::Bool(false));
    }
    if let Ok(int) = token.parse::<i64>() {
        return Ok(Value::Int(int));
    }
    if let Ok(float) = token.parse::<f64>() {
        return Ok(Value::Float(float));
    }
    Err(invalid(format!("Syntax error: unexpected value {token}")))
}

fn split_list(list: &str) -> Vec<&str> {
    list.split(',').map(str::trim).filter(|s| !s.is_empty()).collect()
}

impl Table {
    fn column(&self, table: &str, name: &str) -> Result<usize, EngineError> {
        self.fields
            .iter()
            .position(|field| field.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| {
                EngineError::new(
                    Code::InvalidArgument,
                    format!("Unrecognized name: {name} in table {table}"),
                )
            })
    }

    /// Indexes of the rows matching `wcol = wval`, or all rows without a filter.
    fn matching(
        &self,
        table: &str,
        filter: Option<(&str, &str)>,
        params: &BTreeMap<String, Value>,
    ) -> Result<Vec<usize>, EngineError> {
        let Some((column, token)) = filter else {
            return Ok((0..self.rows.len()).collect());
        };
        let index = self.column(table, column)?;
        let wanted = resolve(token, params)?;
        Ok(self
            .rows
            .iter()
            .enumerate()
            .filter(|(_, row)| row[index] == wanted)
            .map(|(i, _)| i)
            .collect())
    }
}

impl Database {
    fn table(&self, name: &str) -> Result<&Table, EngineError> {
        self.tables
            .get(name)
            .ok_or_else(|| EngineError::new(Code::NotFound, format!("Table not found: {name}")))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut Table, EngineError> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| EngineError::new(Code::NotFound, format!("Table not found: {name}")))
    }

    /// Run a read. Only `SELECT 1` and single-table selects are understood.
    pub(crate) fn select(&self, stmt: &Statement) -> Result<Vec<EngineRow>, EngineError> {
        if SELECT_ONE.is_match(&stmt.sql) {
            let fields = Arc::new(vec![Field::new("", TypeCode::Int64)]);
            return Ok(vec![EngineRow::new(fields, vec![json!("1")])]);
        }
        let caps = SELECT
            .captures(&stmt.sql)
            .ok_or_else(|| invalid(format!("Syntax error: unsupported query {}", stmt.sql)))?;
        let table_name = &caps["table"];
        let table = self.table(table_name)?;

        let columns: Vec<usize> = if caps["cols"].trim() == "*" {
            (0..table.fields.len()).collect()
        } else {
            split_list(&caps["cols"])
                .into_iter()
                .map(|name| table.column(table_name, name))
                .collect::<Result<_, _>>()?
        };
        let fields: Arc<Vec<Field>> = Arc::new(columns.iter().map(|&i| table.fields[i].clone()).collect());

        let filter = caps
            .name("wcol")
            .zip(caps.name("wval"))
            .map(|(c, v)| (c.as_str(), v.as_str()));
        let matching = table.matching(table_name, filter, &stmt.params)?;
        Ok(matching
            .into_iter()
            .map(|row| {
                let values = columns.iter().map(|&i| encode(&table.rows[row][i])).collect();
                EngineRow::new(Arc::clone(&fields), values)
            })
            .collect())
    }

    /// Apply a DML statement and return the affected row count.
    pub(crate) fn update(&mut self, stmt: &Statement) -> Result<i64, EngineError> {
        if let Some(caps) = INSERT.captures(&stmt.sql) {
            return self.insert(&caps["table"], &caps["cols"], &caps["vals"], &stmt.params);
        }
        if let Some(caps) = UPDATE.captures(&stmt.sql) {
            let table_name = &caps["table"];
            let params = &stmt.params;
            let table = self.table_mut(table_name)?;
            let mut assignments = Vec::new();
            for set in split_list(&caps["sets"]) {
                let (column, token) = set
                    .split_once('=')
                    .ok_or_else(|| invalid(format!("Syntax error: bad assignment {set}")))?;
                assignments.push((table.column(table_name, column.trim())?, resolve(token, params)?));
            }
            let matching = table.matching(table_name, Some((&caps["wcol"], &caps["wval"])), params)?;
            for &row in &matching {
                for (column, value) in &assignments {
                    table.rows[row][*column] = value.clone();
                }
            }
            return Ok(count(matching.len()));
        }
        if let Some(caps) = DELETE.captures(&stmt.sql) {
            let table_name = &caps["table"];
            let table = self.table_mut(table_name)?;
            let filter = caps
                .name("wcol")
                .zip(caps.name("wval"))
                .map(|(c, v)| (c.as_str(), v.as_str()));
            let matching = table.matching(table_name, filter, &stmt.params)?;
            for &row in matching.iter().rev() {
                table.rows.remove(row);
            }
            return Ok(count(matching.len()));
        }
        Err(invalid(format!("Syntax error: unsupported DML {}", stmt.sql)))
    }

    fn insert(
        &mut self,
        table_name: &str,
        cols: &str,
        vals: &str,
        params: &BTreeMap<String, Value>,
    ) -> Result<i64, EngineError> {
        let table = self.table_mut(table_name)?;
        let cols = split_list(cols);
        let vals = split_list(vals);
        if cols.len() != vals.len() {
            return Err(invalid("Syntax error: column and value counts differ"));
        }
        let mut row = vec![Value::Null; table.fields.len()];
        for (column, token) in cols.iter().zip(vals) {
            row[table.column(table_name, column)?] = resolve(token, params)?;
        }
        // The first column acts as the primary key.
        if table.rows.iter().any(|existing| existing[0] == row[0]) {
            return Err(EngineError::new(
                Code::AlreadyExists,
                format!("Row [{:?}] in table {table_name} already exists", row[0]),
            ));
        }
        table.rows.push(row);
        Ok(1)
    }
}

fn count(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

/// Wire encoding of a stored value.
pub(crate) fn encode(value: &Value) -> WireValue {
    match value {
        Value::Null => WireValue::Null,
        Value::Int(v) => json!(v.to_string()),
        Value::Float(v) if v.is_nan() => json!("NaN"),
        Value::Float(v) if v.is_infinite() => {
            json!(if *v > 0.0 { "Infinity" } else { "-Infinity" })
        }
        Value::Float(v) => json!(v),
        Value::Text(v) => json!(v),
        Value::Bool(v) => json!(v),
        Value::Bytes(v) => json!(STANDARD.encode(v)),
        Value::Date(v) => json!(v.format("%Y-%m-%d").to_string()),
        Value::Timestamp(v) => json!(v.to_rfc3339()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> Database {
        let mut db = Database::default();
        db.tables.insert(
            "t".into(),
            Table {
                fields: vec![Field::new("id", TypeCode::String), Field::new("v", TypeCode::Bool)],
                rows: Vec::new(),
            },
        );
        db
    }

    fn stmt(sql: &str, params: &[(&str, Value)]) -> Statement {
        Statement::with_params(
            sql,
            params.iter().map(|(k, v)| ((*k).to_owned(), v.clone())).collect(),
        )
    }

    #[test]
    fn insert_select_update_delete() {
        let mut db = db();
        let insert = stmt(
            "INSERT INTO t (id, v) VALUES (@id, @v)",
            &[("id", Value::from("a")), ("v", Value::Bool(true))],
        );
        assert_eq!(db.update(&insert).unwrap(), 1);
        assert_eq!(db.update(&insert).unwrap_err().code(), Code::AlreadyExists);

        let rows = db.select(&stmt("SELECT v FROM t WHERE id = @id", &[("id", Value::from("a"))])).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].column(0).map(|(_, v)| v.clone()), Some(json!(true)));

        let update = stmt("UPDATE t SET v = false WHERE id = 'a'", &[]);
        assert_eq!(db.update(&update).unwrap(), 1);
        assert_eq!(db.update(&stmt("DELETE FROM t WHERE id = 'zz'", &[])).unwrap(), 0);
        assert_eq!(db.update(&stmt("DELETE FROM t", &[])).unwrap(), 1);
        assert!(db.select(&stmt("SELECT * FROM t", &[])).unwrap().is_empty());
    }

    #[test]
    fn unknown_shapes_and_tables_fail_like_the_server() {
        let mut db = db();
        assert_eq!(db.select(&stmt("SELECT * FROM nope", &[])).unwrap_err().code(), Code::NotFound);
        assert_eq!(db.update(&stmt("MERGE t", &[])).unwrap_err().code(), Code::InvalidArgument);
        assert_eq!(
            db.update(&stmt("INSERT INTO t (id, v) VALUES (@id, true)", &[])).unwrap_err().code(),
            Code::InvalidArgument
        );
    }
}
