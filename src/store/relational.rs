pub mod postgres;
pub mod sqlite;

use crate::error::{CacheError, Result};
use crate::scope::ScopeConfig;
use crate::store::{render_key, BackendKind, CacheStoreStrategy, Entry, Key, UpdateOptions};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

const BACKEND: BackendKind = BackendKind::Relational;

/// A driver-neutral column value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl SqlValue {
    fn render(&self) -> String {
        match self {
            SqlValue::Null => String::new(),
            SqlValue::Integer(i) => i.to_string(),
            SqlValue::Real(f) => f.to_string(),
            SqlValue::Text(s) => s.clone(),
        }
    }
}

/// How bound parameters are written into statement text.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ParamStyle {
    /// `?1`, `?2`, ...
    Numbered,
    /// `$1`, `$2`, ...
    Dollar,
}

/// One statement with its bound parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub statement: String,
    pub parameters: Vec<SqlValue>,
}

impl Operation {
    fn new(statement: String) -> Self {
        Operation {
            statement,
            parameters: Vec::new(),
        }
    }
}

/// The physical driver of a relational store: runs statements against one open connection.
pub trait SqlExecutor: Send {
    fn param_style(&self) -> ParamStyle;

    /// Runs a statement that returns no rows, answering the number of affected rows.
    fn execute(&mut self, operation: &Operation) -> Result<usize>;

    fn query(&mut self, operation: &Operation) -> Result<Vec<Vec<SqlValue>>>;

    /// Runs every operation or none of them.
    fn execute_all(&mut self, operations: &[Operation]) -> Result<()>;
}

/// Builds every statement a relational store issues.
#[derive(Debug, Clone, Copy)]
pub struct SqlBuilder {
    style: ParamStyle,
}

impl SqlBuilder {
    pub fn new(style: ParamStyle) -> Self {
        SqlBuilder { style }
    }

    fn placeholder(&self, order: usize) -> String {
        match self.style {
            ParamStyle::Numbered => format!("?{order}"),
            ParamStyle::Dollar => format!("${order}"),
        }
    }

    pub fn create_table(&self, config: &ScopeConfig) -> Operation {
        let columns = config
            .columns()
            .iter()
            .map(|column| {
                let mut definition =
                    format!("{} {}", quote(column), config.column_type(column).sql_type());
                if column == config.uniq_column() {
                    definition.push_str(" PRIMARY KEY");
                }
                definition
            })
            .collect::<Vec<_>>()
            .join(", ");

        Operation::new(format!(
            "CREATE TABLE IF NOT EXISTS {} ({columns})",
            quote(config.table())
        ))
    }

    /// Selects every configured column, optionally narrowed to one key.
    pub fn select(&self, config: &ScopeConfig, key: Option<SqlValue>) -> Operation {
        self.select_columns(config, &quote_all(config.columns()), key)
    }

    pub fn select_keys(&self, config: &ScopeConfig) -> Operation {
        self.select_columns(config, &quote(config.uniq_column()), None)
    }

    fn select_columns(&self, config: &ScopeConfig, columns: &str, key: Option<SqlValue>) -> Operation {
        let mut operation = Operation::new(format!("SELECT {columns} FROM {}", quote(config.table())));
        if let Some(key) = key {
            operation.statement.push_str(&format!(
                " WHERE {} = {} LIMIT 1",
                quote(config.uniq_column()),
                self.placeholder(1)
            ));
            operation.parameters.push(key);
        }
        operation
    }

    /// Inserts the row, or on a key conflict overwrites exactly the columns given.
    pub fn upsert(&self, config: &ScopeConfig, row: Vec<(String, SqlValue)>) -> Operation {
        let names: Vec<String> = row.iter().map(|(name, _)| quote(name)).collect();
        let placeholders: Vec<String> = (1..=row.len()).map(|i| self.placeholder(i)).collect();
        let assignments: Vec<String> = row
            .iter()
            .filter(|(name, _)| name != config.uniq_column())
            .map(|(name, _)| format!("{0} = excluded.{0}", quote(name)))
            .collect();

        let on_conflict = if assignments.is_empty() {
            "DO NOTHING".to_string()
        } else {
            format!("DO UPDATE SET {}", assignments.join(", "))
        };

        Operation {
            statement: format!(
                "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) {on_conflict}",
                quote(config.table()),
                names.join(", "),
                placeholders.join(", "),
                quote(config.uniq_column()),
            ),
            parameters: row.into_iter().map(|(_, value)| value).collect(),
        }
    }

    pub fn delete(&self, config: &ScopeConfig, key: SqlValue) -> Operation {
        Operation {
            statement: format!(
                "DELETE FROM {} WHERE {} = {}",
                quote(config.table()),
                quote(config.uniq_column()),
                self.placeholder(1)
            ),
            parameters: vec![key],
        }
    }
}

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

fn quote_all(columns: &[String]) -> String {
    columns.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", ")
}

/// One table per scope; each key is a row whose identifying column holds the key.
///
/// Scopes are fixed at construction. Values are JSON objects keyed by column name,
/// coerced through the scope's column types on every write and read.
pub struct RelationalStore {
    executor: Mutex<Option<Box<dyn SqlExecutor>>>,
    builder: SqlBuilder,
    scopes: BTreeMap<String, ScopeConfig>,
}

impl RelationalStore {
    /// Registers the scopes and creates any missing tables.
    pub fn new(executor: Box<dyn SqlExecutor>, configs: Vec<ScopeConfig>) -> Result<Self> {
        let builder = SqlBuilder::new(executor.param_style());
        let mut scopes = BTreeMap::new();
        let mut tables = Vec::new();
        for config in configs {
            if tables.contains(&config.table().to_string()) {
                return Err(CacheError::InvalidScopeConfig(format!(
                    "duplicated table: {}",
                    config.table()
                )));
            }
            tables.push(config.table().to_string());
            let name = config.scope().to_string();
            if scopes.insert(name.clone(), config).is_some() {
                return Err(CacheError::InvalidScopeConfig(format!("duplicated scope: {name}")));
            }
        }

        let store = RelationalStore {
            executor: Mutex::new(Some(executor)),
            builder,
            scopes,
        };
        let create: Vec<Operation> = store.scopes.values().map(|c| builder.create_table(c)).collect();
        store.with_executor(|executor| executor.execute_all(&create))?;
        tracing::debug!(scopes = store.scopes.len(), "relational store ready");

        Ok(store)
    }

    pub fn scope_config(&self, scope: Option<&str>) -> Result<&ScopeConfig> {
        let name = scope.unwrap_or_default();
        self.scopes
            .get(name)
            .ok_or_else(|| CacheError::UnknownScope(scope.unwrap_or("<default>").to_string()))
    }

    fn with_executor<T>(&self, f: impl FnOnce(&mut dyn SqlExecutor) -> Result<T>) -> Result<T> {
        let mut guard = self.executor.lock();
        let executor = guard
            .as_mut()
            .ok_or_else(|| CacheError::unavailable(BACKEND, "connection closed"))?;
        f(executor.as_mut())
    }

    fn key_param(config: &ScopeConfig, key: &str) -> Result<SqlValue> {
        config.coerce_in(config.uniq_column(), &Value::String(key.to_string()))
    }

    /// Shapes an incoming record into a row, uniq column first. With `fill` every
    /// configured column is present and absent ones are NULL.
    fn build_row(config: &ScopeConfig, key: &str, value: &Value, fill: bool) -> Result<Vec<(String, SqlValue)>> {
        let Value::Object(record) = value else {
            return Err(CacheError::InvalidValue(format!(
                "scope `{}` stores records, got {value}",
                config.scope()
            )));
        };

        if let Some(id) = record.get(config.uniq_column()) {
            if render_key(id).as_deref() != Some(key) {
                return Err(CacheError::InvalidValue(format!(
                    "key {key} is different from {} {id}",
                    config.uniq_column()
                )));
            }
        }

        let mut row = vec![(config.uniq_column().to_string(), Self::key_param(config, key)?)];
        for column in config.columns() {
            if column == config.uniq_column() {
                continue;
            }
            match record.get(column) {
                Some(field) => row.push((column.clone(), config.coerce_in(column, field)?)),
                None if fill => row.push((column.clone(), SqlValue::Null)),
                None => {}
            }
        }
        Ok(row)
    }

    fn record(config: &ScopeConfig, columns: &[String], row: Vec<SqlValue>) -> Value {
        let record: Map<String, Value> = columns
            .iter()
            .zip(row)
            .map(|(column, field)| (column.clone(), config.coerce_out(column, field)))
            .collect();
        Value::Object(record)
    }

    /// The key bound for a read. A key the uniq column cannot hold names no row.
    fn lookup_param(config: &ScopeConfig, key: &str) -> Option<SqlValue> {
        Self::key_param(config, key).ok()
    }

    fn select_one(&self, executor: &mut dyn SqlExecutor, config: &ScopeConfig, key: &str) -> Result<Option<Value>> {
        let Some(param) = Self::lookup_param(config, key) else {
            return Ok(None);
        };
        let operation = self.builder.select(config, Some(param));
        Ok(executor
            .query(&operation)?
            .into_iter()
            .next()
            .map(|row| Self::record(config, config.columns(), row)))
    }
}

impl CacheStoreStrategy for RelationalStore {
    fn kind(&self) -> BackendKind {
        BACKEND
    }

    fn exists(&self, key: &str, scope: Option<&str>) -> Result<bool> {
        let config = self.scope_config(scope)?;
        let operation = Self::lookup_param(config, key)
            .map(|param| self.builder.select_columns(config, &quote(config.uniq_column()), Some(param)));
        self.with_executor(|executor| match operation {
            Some(operation) => Ok(!executor.query(&operation)?.is_empty()),
            None => Ok(false),
        })
    }

    fn fetch(&self, key: &str, scope: Option<&str>) -> Result<Option<Value>> {
        let config = self.scope_config(scope)?;
        self.with_executor(|executor| self.select_one(executor, config, key))
    }

    fn set(&self, key: &str, value: Value, scope: Option<&str>) -> Result<Value> {
        let config = self.scope_config(scope)?;
        let row = Self::build_row(config, key, &value, true)?;
        let stored = Self::record(
            config,
            &row.iter().map(|(name, _)| name.clone()).collect::<Vec<_>>(),
            row.iter().map(|(_, field)| field.clone()).collect(),
        );

        let operation = self.builder.upsert(config, row);
        self.with_executor(|executor| executor.execute(&operation))?;
        Ok(stored)
    }

    /// Changes only the supplied columns and answers the full persisted row.
    fn update(
        &self,
        key: &str,
        value: Value,
        scope: Option<&str>,
        _options: &UpdateOptions,
    ) -> Result<Value> {
        let config = self.scope_config(scope)?;
        let operation = self.builder.upsert(config, Self::build_row(config, key, &value, false)?);
        self.with_executor(|executor| {
            executor.execute(&operation)?;
            self.select_one(executor, config, key)?
                .ok_or_else(|| CacheError::io(BACKEND, format!("row {key} vanished after update")))
        })
    }

    fn pop(&self, key: &str, scope: Option<&str>) -> Result<Option<Value>> {
        let config = self.scope_config(scope)?;
        let delete = Self::lookup_param(config, key).map(|param| self.builder.delete(config, param));
        self.with_executor(|executor| {
            let Some(delete) = delete else {
                return Ok(None);
            };
            let previous = self.select_one(executor, config, key)?;
            if previous.is_some() {
                executor.execute(&delete)?;
            }
            Ok(previous)
        })
    }

    fn keys(&self, scope: Option<&str>) -> Result<Vec<Key>> {
        let config = self.scope_config(scope)?;
        let operation = self.builder.select_keys(config);
        let rows = self.with_executor(|executor| executor.query(&operation))?;
        Ok(rows
            .into_iter()
            .filter_map(|row| row.into_iter().next())
            .map(|key| key.render())
            .collect())
    }

    /// The configured scope names; the database itself is not introspected.
    fn scopes(&self) -> Result<Vec<String>> {
        Ok(self.scopes.keys().cloned().collect())
    }

    fn bulk_read(&self, scopes: Option<&[&str]>) -> Result<Vec<Entry>> {
        let configs: Vec<&ScopeConfig> = match scopes {
            Some(names) => names
                .iter()
                .map(|name| self.scope_config(Some(*name)))
                .collect::<Result<_>>()?,
            None => self.scopes.values().collect(),
        };

        self.with_executor(|executor| {
            let mut entries = Vec::new();
            for config in configs {
                for row in executor.query(&self.builder.select(config, None))? {
                    let record = Self::record(config, config.columns(), row);
                    let key = record
                        .get(config.uniq_column())
                        .and_then(render_key)
                        .unwrap_or_default();
                    entries.push(Entry::new(Some(config.scope()), key, record));
                }
            }
            Ok(entries)
        })
    }

    /// All entries are written in one transaction.
    fn bulk_write(&self, entries: &[Entry]) -> Result<()> {
        let mut operations = Vec::with_capacity(entries.len());
        for entry in entries {
            let config = self.scope_config(entry.scope.as_deref())?;
            let row = Self::build_row(config, &entry.key, &entry.value, true)?;
            operations.push(self.builder.upsert(config, row));
        }
        self.with_executor(|executor| executor.execute_all(&operations))
    }

    fn close(&self) -> Result<()> {
        if self.executor.lock().take().is_some() {
            tracing::info!("relational connection closed");
        }
        Ok(())
    }
}
