use crate::error::{IoContext, Result};
use crate::store::relational::{Operation, ParamStyle, SqlExecutor, SqlValue};
use crate::store::BackendKind;
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{params_from_iter, Connection, ToSql};
use std::path::Path;

const BACKEND: BackendKind = BackendKind::Relational;

/// Runs relational store statements on one sqlite connection.
pub struct SqliteExecutor {
    connection: Connection,
}

impl SqliteExecutor {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let connection = Connection::open(path).backend_io(BACKEND)?;
        Ok(SqliteExecutor { connection })
    }

    pub fn open_in_memory() -> Result<Self> {
        let connection = Connection::open_in_memory().backend_io(BACKEND)?;
        Ok(SqliteExecutor { connection })
    }
}

impl From<Connection> for SqliteExecutor {
    fn from(connection: Connection) -> Self {
        SqliteExecutor { connection }
    }
}

impl SqlExecutor for SqliteExecutor {
    fn param_style(&self) -> ParamStyle {
        ParamStyle::Numbered
    }

    fn execute(&mut self, operation: &Operation) -> Result<usize> {
        self.connection
            .execute(&operation.statement, params_from_iter(operation.parameters.iter()))
            .backend_io(BACKEND)
    }

    fn query(&mut self, operation: &Operation) -> Result<Vec<Vec<SqlValue>>> {
        let mut statement = self.connection.prepare(&operation.statement).backend_io(BACKEND)?;
        let width = statement.column_count();
        let rows = statement
            .query_map(params_from_iter(operation.parameters.iter()), |row| {
                (0..width)
                    .map(|i| row.get_ref(i).map(SqlValue::from))
                    .collect::<rusqlite::Result<Vec<_>>>()
            })
            .backend_io(BACKEND)?;

        rows.collect::<rusqlite::Result<Vec<_>>>().backend_io(BACKEND)
    }

    fn execute_all(&mut self, operations: &[Operation]) -> Result<()> {
        let transaction = self.connection.transaction().backend_io(BACKEND)?;
        for operation in operations {
            transaction
                .execute(&operation.statement, params_from_iter(operation.parameters.iter()))
                .backend_io(BACKEND)?;
        }
        transaction.commit().backend_io(BACKEND)
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            SqlValue::Integer(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
            SqlValue::Real(f) => ToSqlOutput::Borrowed(ValueRef::Real(*f)),
            SqlValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

impl From<ValueRef<'_>> for SqlValue {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => SqlValue::Null,
            ValueRef::Integer(i) => SqlValue::Integer(i),
            ValueRef::Real(f) => SqlValue::Real(f),
            ValueRef::Text(bytes) => SqlValue::Text(String::from_utf8_lossy(bytes).into_owned()),
            ValueRef::Blob(bytes) => SqlValue::Text(hex::encode(bytes)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CacheError;
    use crate::scope::{ColumnType, ScopeConfig};
    use crate::store::relational::RelationalStore;
    use crate::store::{CacheStoreStrategy, Entry, UpdateOptions};
    use serde_json::json;

    fn store() -> RelationalStore {
        let a = ScopeConfig::new("a", "id", ["id", "name", "count"])
            .unwrap()
            .with_column_type("count", ColumnType::Integer)
            .unwrap();
        let b = ScopeConfig::new("b", "eid", ["eid", "name", "status"]).unwrap();
        RelationalStore::new(Box::new(SqliteExecutor::open_in_memory().unwrap()), vec![a, b]).unwrap()
    }

    #[test]
    fn integer_columns_are_coerced() {
        let store = store();
        store
            .set("a", json!({"id": "a", "name": "x", "count": "5"}), Some("a"))
            .unwrap();

        let record = store.fetch("a", Some("a")).unwrap().unwrap();
        assert_eq!(record["count"], json!(5));
        assert_eq!(record, json!({"id": "a", "name": "x", "count": 5}));
    }

    #[test]
    fn set_overwrites_and_update_merges() {
        let store = store();
        store.set("a1", json!({"name": "jii", "count": 1}), Some("a")).unwrap();
        store.set("a1", json!({"count": 4}), Some("a")).unwrap();
        assert_eq!(
            store.fetch("a1", Some("a")).unwrap(),
            Some(json!({"id": "a1", "name": null, "count": 4}))
        );

        let merged = store
            .update("a1", json!({"name": "again"}), Some("a"), &UpdateOptions::default())
            .unwrap();
        assert_eq!(merged, json!({"id": "a1", "name": "again", "count": 4}));
    }

    #[test]
    fn unknown_scope_fails() {
        let store = store();
        assert!(matches!(
            store.set("c1", json!({"id": "c1"}), Some("c")),
            Err(CacheError::UnknownScope(_))
        ));
        assert!(matches!(store.fetch("c1", None), Err(CacheError::UnknownScope(_))));
    }

    #[test]
    fn pop_keys_and_scopes() {
        let store = store();
        store.set("a1", json!({"name": "x"}), Some("a")).unwrap();
        store.set("a2", json!({"name": "y"}), Some("a")).unwrap();

        assert_eq!(
            store.pop("a2", Some("a")).unwrap(),
            Some(json!({"id": "a2", "name": "y", "count": null}))
        );
        assert_eq!(store.pop("a2", Some("a")).unwrap(), None);
        assert_eq!(store.keys(Some("a")).unwrap(), vec!["a1".to_string()]);
        assert_eq!(store.scopes().unwrap(), vec!["a".to_string(), "b".to_string()]);
        assert!(!store.exists("a2", Some("a")).unwrap());
    }

    #[test]
    fn bulk_write_stops_at_invalid_entry() {
        let store = store();
        let entries = vec![
            Entry::new(Some("a"), "ok", json!({"count": 1})),
            Entry::new(Some("a"), "bad", json!({"count": "many"})),
        ];

        assert!(store.bulk_write(&entries).is_err());
        assert!(!store.exists("ok", Some("a")).unwrap());

        store.bulk_write(&entries[..1]).unwrap();
        assert_eq!(store.bulk_read(Some(&["a"])).unwrap().len(), 1);
    }

    #[test]
    fn uncoercible_key_reads_as_absent() {
        let numbered = ScopeConfig::new("n", "id", ["id", "name"])
            .unwrap()
            .with_column_type("id", ColumnType::Integer)
            .unwrap();
        let store =
            RelationalStore::new(Box::new(SqliteExecutor::open_in_memory().unwrap()), vec![numbered]).unwrap();
        store.set("7", json!({"name": "seven"}), Some("n")).unwrap();

        assert!(!store.exists("abc", Some("n")).unwrap());
        assert_eq!(store.fetch("abc", Some("n")).unwrap(), None);
        assert_eq!(store.pop("abc", Some("n")).unwrap(), None);
        assert!(matches!(
            store.set("abc", json!({"name": "x"}), Some("n")),
            Err(CacheError::InvalidValue(_))
        ));
        assert_eq!(store.fetch("7", Some("n")).unwrap(), Some(json!({"id": 7, "name": "seven"})));
    }

    #[test]
    fn closed_store_is_unavailable() {
        let store = store();
        store.close().unwrap();

        assert!(matches!(
            store.fetch("a", Some("a")),
            Err(CacheError::BackendUnavailable { .. })
        ));
    }
}
