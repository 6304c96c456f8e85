//! Static per-scope schema for table-backed stores.

use crate::error::{CacheError, Result};
use crate::store::relational::SqlValue;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;

/// Storage type of one column. Columns without a declared type are text.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    #[default]
    Text,
    #[serde(alias = "int")]
    Integer,
    #[serde(alias = "float")]
    Real,
    #[serde(alias = "bool")]
    Boolean,
    /// Any JSON value, persisted as its text encoding.
    Json,
}

impl ColumnType {
    /// Column type in DDL, understood by both sqlite and postgres.
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::Text | ColumnType::Json => "TEXT",
            ColumnType::Integer | ColumnType::Boolean => "BIGINT",
            ColumnType::Real => "DOUBLE PRECISION",
        }
    }

    /// Converts an incoming field to its persisted form.
    pub fn to_sql(&self, column: &str, value: &Value) -> Result<SqlValue> {
        if value.is_null() {
            return Ok(SqlValue::Null);
        }
        let mismatch = || {
            CacheError::InvalidValue(format!(
                "column `{column}` expects {self:?}, got {value}"
            ))
        };

        let converted = match (self, value) {
            (ColumnType::Json, value) => SqlValue::Text(serde_json::to_string(value)?),
            (ColumnType::Text, Value::String(s)) => SqlValue::Text(s.clone()),
            (ColumnType::Text, Value::Number(n)) => SqlValue::Text(n.to_string()),
            (ColumnType::Text, Value::Bool(b)) => SqlValue::Text(b.to_string()),
            (ColumnType::Text, compound) => SqlValue::Text(serde_json::to_string(compound)?),
            (ColumnType::Integer, Value::Number(n)) => {
                SqlValue::Integer(integral(n).ok_or_else(mismatch)?)
            }
            (ColumnType::Integer, Value::String(s)) => {
                SqlValue::Integer(parse_integral(s).ok_or_else(mismatch)?)
            }
            (ColumnType::Integer | ColumnType::Boolean, Value::Bool(b)) => {
                SqlValue::Integer(i64::from(*b))
            }
            (ColumnType::Real, Value::Number(n)) => SqlValue::Real(n.as_f64().ok_or_else(mismatch)?),
            (ColumnType::Real, Value::String(s)) => {
                SqlValue::Real(s.trim().parse().map_err(|_| mismatch())?)
            }
            (ColumnType::Boolean, Value::Number(n)) => match n.as_i64() {
                Some(i @ (0 | 1)) => SqlValue::Integer(i),
                _ => return Err(mismatch()),
            },
            (ColumnType::Boolean, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => SqlValue::Integer(1),
                "false" | "0" => SqlValue::Integer(0),
                _ => return Err(mismatch()),
            },
            _ => return Err(mismatch()),
        };
        Ok(converted)
    }

    /// Converts a persisted field back to its value form.
    pub fn from_sql(&self, value: SqlValue) -> Value {
        match (self, value) {
            (_, SqlValue::Null) => Value::Null,
            (ColumnType::Text, SqlValue::Text(s)) => Value::String(s),
            (ColumnType::Text, SqlValue::Integer(i)) => Value::String(i.to_string()),
            (ColumnType::Text, SqlValue::Real(f)) => Value::String(f.to_string()),
            (ColumnType::Integer, SqlValue::Integer(i)) => Value::Number(i.into()),
            (ColumnType::Integer, SqlValue::Real(f)) if f.fract() == 0.0 => {
                Value::Number((f as i64).into())
            }
            (ColumnType::Integer, SqlValue::Text(s)) => match parse_integral(&s) {
                Some(i) => Value::Number(i.into()),
                None => Value::String(s),
            },
            (ColumnType::Real, SqlValue::Real(f)) => real(f),
            (ColumnType::Real, SqlValue::Integer(i)) => real(i as f64),
            (ColumnType::Boolean, SqlValue::Integer(i)) => Value::Bool(i != 0),
            (ColumnType::Json, SqlValue::Text(s)) => {
                serde_json::from_str(&s).unwrap_or(Value::String(s))
            }
            (_, SqlValue::Integer(i)) => Value::Number(i.into()),
            (_, SqlValue::Real(f)) => real(f),
            (_, SqlValue::Text(s)) => Value::String(s),
        }
    }
}

impl FromStr for ColumnType {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "str" => Ok(ColumnType::Text),
            "int" | "integer" => Ok(ColumnType::Integer),
            "real" | "float" => Ok(ColumnType::Real),
            "bool" | "boolean" => Ok(ColumnType::Boolean),
            "json" => Ok(ColumnType::Json),
            other => Err(CacheError::InvalidScopeConfig(format!(
                "unknown column type: {other}"
            ))),
        }
    }
}

fn integral(n: &Number) -> Option<i64> {
    n.as_i64().or_else(|| {
        n.as_f64()
            .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
            .map(|f| f as i64)
    })
}

fn parse_integral(s: &str) -> Option<i64> {
    let s = s.trim();
    s.parse::<i64>().ok().or_else(|| {
        s.parse::<f64>()
            .ok()
            .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
            .map(|f| f as i64)
    })
}

fn real(f: f64) -> Value {
    Number::from_f64(f).map_or(Value::Null, Value::Number)
}

/// Physical shape of one scope: one table, one identifying column.
///
/// The identifying column is always part of `columns`, and it doubles as the
/// externally visible key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawScopeConfig")]
pub struct ScopeConfig {
    scope: String,
    table: String,
    uniq_column: String,
    columns: Vec<String>,
    column_types: HashMap<String, ColumnType>,
}

#[derive(Deserialize)]
struct RawScopeConfig {
    scope: String,
    #[serde(default)]
    table: Option<String>,
    #[serde(default = "default_uniq_column")]
    uniq_column: String,
    #[serde(default = "default_columns")]
    columns: Vec<String>,
    #[serde(default)]
    column_types: HashMap<String, ColumnType>,
}

fn default_uniq_column() -> String {
    "id".to_string()
}

fn default_columns() -> Vec<String> {
    vec!["id".to_string(), "data".to_string()]
}

impl TryFrom<RawScopeConfig> for ScopeConfig {
    type Error = CacheError;

    fn try_from(raw: RawScopeConfig) -> Result<Self> {
        let mut config = ScopeConfig::new(raw.scope, raw.uniq_column, raw.columns)?;
        if let Some(table) = raw.table {
            config = config.with_table(table)?;
        }
        for (column, column_type) in raw.column_types {
            config = config.with_column_type(&column, column_type)?;
        }
        Ok(config)
    }
}

impl ScopeConfig {
    pub fn new<I, S>(scope: impl Into<String>, uniq_column: impl Into<String>, columns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let scope = scope.into();
        let uniq_column = uniq_column.into();
        let mut columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        if !columns.contains(&uniq_column) {
            columns.insert(0, uniq_column.clone());
        }

        check_identifier(&scope)?;
        let mut seen = HashSet::new();
        for column in &columns {
            check_identifier(column)?;
            if !seen.insert(column.as_str()) {
                return Err(CacheError::InvalidScopeConfig(format!(
                    "duplicated column `{column}` in scope `{scope}`"
                )));
            }
        }

        Ok(ScopeConfig {
            table: scope.clone(),
            scope,
            uniq_column,
            columns,
            column_types: HashMap::new(),
        })
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        check_identifier(&table)?;
        self.table = table;
        Ok(self)
    }

    pub fn with_column_type(mut self, column: &str, column_type: ColumnType) -> Result<Self> {
        if !self.columns.iter().any(|c| c == column) {
            return Err(CacheError::InvalidScopeConfig(format!(
                "typed column `{column}` is not a column of scope `{}`",
                self.scope
            )));
        }
        self.column_types.insert(column.to_string(), column_type);
        Ok(self)
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn uniq_column(&self) -> &str {
        &self.uniq_column
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn column_type(&self, column: &str) -> ColumnType {
        self.column_types.get(column).copied().unwrap_or_default()
    }

    pub fn coerce_in(&self, column: &str, value: &Value) -> Result<SqlValue> {
        self.column_type(column).to_sql(column, value)
    }

    pub fn coerce_out(&self, column: &str, value: SqlValue) -> Value {
        self.column_type(column).from_sql(value)
    }
}

fn check_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(CacheError::InvalidScopeConfig(format!(
            "`{name}` is not a valid identifier"
        )))
    }
}
