// ABOUTME: Generic SQL execution interface shared by both dialects
// ABOUTME: Defines SqlValue, ResultSet, the SqlConnection trait and connection factories

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDateTime;

use crate::config::ConnectionDescriptor;

pub mod mssql;
pub mod mysql;

#[cfg(test)]
pub mod fake;

/// A single value travelling between the two dialects.
///
/// Driver-native values are converted into this representation on read and
/// back into driver parameters on write, so the replication core never touches
/// a driver type directly.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    DateTime(NaiveDateTime),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }
}

/// A fully materialized query result: column names plus row values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
}

impl ResultSet {
    /// Locate a column by case-insensitive name match.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
    }

    /// Fetch a value from a row by case-insensitive column name.
    pub fn value<'a>(&self, row: &'a [SqlValue], name: &str) -> Option<&'a SqlValue> {
        self.column_index(name).and_then(|idx| row.get(idx))
    }
}

/// Generic SQL execution surface over one open connection.
///
/// Both dialects implement this: parameterized query and exec, plus
/// transaction control as connection state. `placeholder` renders the
/// dialect's positional parameter marker (1-based).
#[async_trait]
pub trait SqlConnection: Send {
    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<ResultSet>;

    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64>;

    async fn begin(&mut self) -> Result<()>;

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;

    fn placeholder(&self, index: usize) -> String;
}

/// Opens source/target connections scoped to one schema (database) name.
///
/// The orchestrator only ever sees this trait, so tests can substitute
/// scripted connections without a live server.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn open_source(&self, database: &str) -> Result<Box<dyn SqlConnection>>;

    async fn open_target(&self, database: &str) -> Result<Box<dyn SqlConnection>>;
}

/// Factory backed by the configured drivers.
pub struct DriverFactory {
    source: ConnectionDescriptor,
    target: ConnectionDescriptor,
}

impl DriverFactory {
    pub fn new(source: ConnectionDescriptor, target: ConnectionDescriptor) -> Self {
        Self { source, target }
    }

    async fn open(descriptor: &ConnectionDescriptor, database: &str) -> Result<Box<dyn SqlConnection>> {
        let url = descriptor.for_database(database);
        match descriptor.driver.to_ascii_lowercase().as_str() {
            "mssql" | "sqlserver" => Ok(Box::new(
                mssql::MssqlConnection::connect(&url)
                    .await
                    .with_context(|| format!("connecting to SQL Server database {database}"))?,
            )),
            "mysql" => Ok(Box::new(
                mysql::MysqlConnection::connect(&url)
                    .await
                    .with_context(|| format!("connecting to MySQL database {database}"))?,
            )),
            other => anyhow::bail!("unsupported driver {other:?}"),
        }
    }
}

#[async_trait]
impl ConnectionFactory for DriverFactory {
    async fn open_source(&self, database: &str) -> Result<Box<dyn SqlConnection>> {
        Self::open(&self.source, database).await
    }

    async fn open_target(&self, database: &str) -> Result<Box<dyn SqlConnection>> {
        Self::open(&self.target, database).await
    }
}
