// File: src/interpreter/database.rs
//
// Database collaborator boundary for connect/use/cursor statements.
// The evaluator only sees the DbAdapter, DbConnection and DbCursor traits;
// SqliteAdapter is the bundled implementation used by the CLI and tests.

use super::value::{RecordMap, Value, DATE_FORMAT};
use crate::config::InterpreterConfig;
use crate::errors::{ErrorType, ScriptException};
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;

/// One result row: column name to value, in select-list order
pub type Row = RecordMap;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("unsupported database driver '{0}'")]
    Unsupported(String),

    #[error("connection is closed")]
    Closed,

    #[error("cursor has no more rows")]
    Exhausted,

    #[error("{0}")]
    Other(String),
}

impl From<DbError> for ScriptException {
    fn from(error: DbError) -> Self {
        ScriptException::new(ErrorType::DbError, error.to_string())
    }
}

/// A cursor declared with `cursor name = select ...`, bound to the
/// connection that was current at declaration time
#[derive(Debug, Clone, PartialEq)]
pub struct CursorSpec {
    pub connection: String,
    pub sql: String,
}

/// Where to connect: a driver name and a driver-specific location
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionTarget {
    pub driver: String,
    pub location: String,
}

impl ConnectionTarget {
    /// Resolves a `connect` spec value.
    ///
    /// Strings are `sqlite:<path>`, `:memory:` or a bare path. Records and
    /// JSON objects carry `type`/`path`, or a `name` that refers to a
    /// connection alias in the configuration.
    pub fn resolve(spec: &Value, config: &InterpreterConfig) -> Result<Self, ScriptException> {
        match spec {
            Value::Str(text) => Ok(Self::from_url(text)),
            Value::Record(_) | Value::Json(_) => {
                let json = spec.to_json();
                let field = |key: &str| json.get(key).and_then(|v| v.as_str()).map(str::to_string);

                if let Some(alias) = field("name") {
                    let url = config.databases.get(&alias.to_lowercase()).ok_or_else(|| {
                        ScriptException::not_found(format!(
                            "No database named '{}' in configuration",
                            alias
                        ))
                    })?;
                    return Ok(Self::from_url(url));
                }

                let driver = field("type").unwrap_or_else(|| "sqlite".to_string());
                let location = field("path").ok_or_else(|| {
                    ScriptException::new(ErrorType::ValidationError, "Connection spec needs a 'path'")
                })?;
                Ok(ConnectionTarget { driver: driver.to_lowercase(), location })
            }
            Value::Null => Err(ScriptException::new(ErrorType::NullError, "Connection spec is null")),
            other => Err(ScriptException::type_error(format!(
                "Connection spec must be a string or record, got {}",
                other.type_name()
            ))),
        }
    }

    fn from_url(url: &str) -> Self {
        match url.split_once(':') {
            Some((driver, rest)) if !driver.is_empty() && driver.chars().all(|c| c.is_ascii_alphanumeric()) => {
                ConnectionTarget { driver: driver.to_lowercase(), location: rest.to_string() }
            }
            _ => ConnectionTarget { driver: "sqlite".to_string(), location: url.to_string() },
        }
    }
}

pub trait DbAdapter {
    fn connect(&self, target: &ConnectionTarget) -> Result<Box<dyn DbConnection>, DbError>;
}

pub trait DbConnection {
    fn open_cursor(
        &mut self,
        sql: &str,
        named: &[(String, Value)],
        positional: &[Value],
    ) -> Result<Box<dyn DbCursor>, DbError>;

    fn execute_select(
        &mut self,
        sql: &str,
        named: &[(String, Value)],
        positional: &[Value],
    ) -> Result<Vec<Row>, DbError>;

    fn close(&mut self) -> Result<(), DbError>;
}

/// Forward-only row iterator; `close` must be idempotent
pub trait DbCursor {
    fn has_next(&mut self) -> Result<bool, DbError>;
    fn next(&mut self) -> Result<Row, DbError>;
    fn close(&mut self) -> Result<(), DbError>;
}

fn map_sqlite_value(value: rusqlite::types::Value) -> Value {
    match value {
        rusqlite::types::Value::Integer(number) => {
            i32::try_from(number).map(Value::Int).unwrap_or(Value::Long(number))
        }
        rusqlite::types::Value::Real(number) => Value::Double(number),
        rusqlite::types::Value::Text(text) => Value::Str(Arc::new(text)),
        rusqlite::types::Value::Null => Value::Null,
        rusqlite::types::Value::Blob(_) => Value::string("[blob]"),
    }
}

fn to_sqlite_value(value: &Value) -> rusqlite::types::Value {
    match value {
        Value::Null => rusqlite::types::Value::Null,
        Value::Int(n) => rusqlite::types::Value::Integer(*n as i64),
        Value::Long(n) => rusqlite::types::Value::Integer(*n),
        Value::Float(n) => rusqlite::types::Value::Real(*n as f64),
        Value::Double(n) => rusqlite::types::Value::Real(*n),
        Value::Bool(b) => rusqlite::types::Value::Integer(*b as i64),
        Value::Date(d) => rusqlite::types::Value::Text(d.format(DATE_FORMAT).to_string()),
        Value::Bitmap { bits, .. } => rusqlite::types::Value::Integer(*bits as i64),
        Value::Intmap { bits, .. } => rusqlite::types::Value::Integer(*bits as i64),
        other => rusqlite::types::Value::Text(other.to_string()),
    }
}

/// Adapter for SQLite files and in-memory databases
#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteAdapter;

impl DbAdapter for SqliteAdapter {
    fn connect(&self, target: &ConnectionTarget) -> Result<Box<dyn DbConnection>, DbError> {
        if target.driver != "sqlite" {
            return Err(DbError::Unsupported(target.driver.clone()));
        }
        let connection = if target.location == ":memory:" || target.location.is_empty() {
            rusqlite::Connection::open_in_memory()?
        } else {
            rusqlite::Connection::open(&target.location)?
        };
        tracing::debug!(path = %target.location, "sqlite connection opened");
        Ok(Box::new(SqliteConnection::from_connection(connection)))
    }
}

pub struct SqliteConnection {
    connection: Option<rusqlite::Connection>,
}

impl SqliteConnection {
    pub fn from_connection(connection: rusqlite::Connection) -> Self {
        SqliteConnection { connection: Some(connection) }
    }

    fn query(
        &mut self,
        sql: &str,
        named: &[(String, Value)],
        positional: &[Value],
    ) -> Result<Vec<Row>, DbError> {
        let connection = self.connection.as_ref().ok_or(DbError::Closed)?;
        let mut statement = connection.prepare(sql)?;

        for (index, value) in positional.iter().enumerate() {
            statement.raw_bind_parameter(index + 1, to_sqlite_value(value))?;
        }
        for (name, value) in named {
            let index = statement
                .parameter_index(&format!(":{}", name))?
                .ok_or_else(|| DbError::Other(format!("SQL has no parameter ':{}'", name)))?;
            statement.raw_bind_parameter(index, to_sqlite_value(value))?;
        }

        let columns: Vec<String> =
            statement.column_names().into_iter().map(|c| c.to_lowercase()).collect();
        let mut rows = statement.raw_query();
        let mut result = Vec::new();
        while let Some(row) = rows.next()? {
            let mut record = Row::with_capacity(columns.len());
            for (index, column) in columns.iter().enumerate() {
                let value: rusqlite::types::Value = row.get(index)?;
                record.insert(column.clone(), map_sqlite_value(value));
            }
            result.push(record);
        }
        Ok(result)
    }
}

impl DbConnection for SqliteConnection {
    fn open_cursor(
        &mut self,
        sql: &str,
        named: &[(String, Value)],
        positional: &[Value],
    ) -> Result<Box<dyn DbCursor>, DbError> {
        let rows = self.query(sql, named, positional)?;
        Ok(Box::new(MaterializedCursor { rows: rows.into(), closed: false }))
    }

    fn execute_select(
        &mut self,
        sql: &str,
        named: &[(String, Value)],
        positional: &[Value],
    ) -> Result<Vec<Row>, DbError> {
        self.query(sql, named, positional)
    }

    fn close(&mut self) -> Result<(), DbError> {
        if let Some(connection) = self.connection.take() {
            connection.close().map_err(|(_, error)| DbError::Sqlite(error))?;
        }
        Ok(())
    }
}

/// Cursor over rows fetched up front
pub struct MaterializedCursor {
    rows: VecDeque<Row>,
    closed: bool,
}

impl MaterializedCursor {
    pub fn new(rows: Vec<Row>) -> Self {
        MaterializedCursor { rows: rows.into(), closed: false }
    }
}

impl DbCursor for MaterializedCursor {
    fn has_next(&mut self) -> Result<bool, DbError> {
        Ok(!self.closed && !self.rows.is_empty())
    }

    fn next(&mut self) -> Result<Row, DbError> {
        if self.closed {
            return Err(DbError::Closed);
        }
        self.rows.pop_front().ok_or(DbError::Exhausted)
    }

    fn close(&mut self) -> Result<(), DbError> {
        self.closed = true;
        self.rows.clear();
        Ok(())
    }
}
