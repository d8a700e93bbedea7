// ABOUTME: SQL Server connection backed by tiberius
// ABOUTME: Converts between tiberius ColumnData and the dialect-neutral SqlValue

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use tiberius::{Client, ColumnData, Config, FromSql, ToSql};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use super::{ResultSet, SqlConnection, SqlValue};

pub struct MssqlConnection {
    client: Client<Compat<TcpStream>>,
}

impl MssqlConnection {
    /// Open a connection from an ADO-style connection string
    /// (`server=tcp:host,1433;user=...;password=...;database=...`).
    pub async fn connect(connection_string: &str) -> Result<Self> {
        let config = Config::from_ado_string(connection_string)
            .context("invalid SQL Server connection string")?;
        let tcp = TcpStream::connect(config.get_addr())
            .await
            .with_context(|| format!("connecting to SQL Server at {}", config.get_addr()))?;
        tcp.set_nodelay(true)?;
        let client = Client::connect(config, tcp.compat_write())
            .await
            .context("SQL Server handshake failed")?;
        Ok(Self { client })
    }

    async fn run_statement(&mut self, sql: &str) -> Result<()> {
        self.client
            .simple_query(sql)
            .await
            .with_context(|| format!("executing {sql:?}"))?
            .into_results()
            .await
            .with_context(|| format!("executing {sql:?}"))?;
        Ok(())
    }
}

#[async_trait]
impl SqlConnection for MssqlConnection {
    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<ResultSet> {
        let params: Vec<&dyn ToSql> = params.iter().map(|p| p as &dyn ToSql).collect();
        let stream = self
            .client
            .query(sql, &params)
            .await
            .with_context(|| format!("query failed: {sql}"))?;
        let results = stream
            .into_results()
            .await
            .with_context(|| format!("reading result rows for: {sql}"))?;

        let mut rs = ResultSet::default();
        if let Some(rows) = results.into_iter().next() {
            if let Some(first) = rows.first() {
                rs.columns = first.columns().iter().map(|c| c.name().to_string()).collect();
            }
            for row in rows {
                let mut values = Vec::with_capacity(rs.columns.len());
                for data in row.into_iter() {
                    values.push(column_data_to_value(data)?);
                }
                rs.rows.push(values);
            }
        }
        Ok(rs)
    }

    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        let params: Vec<&dyn ToSql> = params.iter().map(|p| p as &dyn ToSql).collect();
        let result = self
            .client
            .execute(sql, &params)
            .await
            .with_context(|| format!("exec failed: {sql}"))?;
        Ok(result.total())
    }

    async fn begin(&mut self) -> Result<()> {
        self.run_statement("BEGIN TRANSACTION").await
    }

    async fn commit(&mut self) -> Result<()> {
        self.run_statement("COMMIT TRANSACTION").await
    }

    async fn rollback(&mut self) -> Result<()> {
        self.run_statement("ROLLBACK TRANSACTION").await
    }

    fn placeholder(&self, index: usize) -> String {
        format!("@P{index}")
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> ColumnData<'_> {
        match self {
            SqlValue::Null => ColumnData::String(None),
            SqlValue::Bool(b) => ColumnData::Bit(Some(*b)),
            SqlValue::Int(i) => ColumnData::I64(Some(*i)),
            SqlValue::Float(f) => ColumnData::F64(Some(*f)),
            SqlValue::Text(s) => ColumnData::String(Some(s.as_str().into())),
            SqlValue::Bytes(b) => ColumnData::Binary(Some(b.as_slice().into())),
            SqlValue::DateTime(dt) => dt.to_sql(),
        }
    }
}

fn column_data_to_value(data: ColumnData<'static>) -> Result<SqlValue> {
    let value = match data {
        ColumnData::U8(v) => v.map(|n| SqlValue::Int(n as i64)).unwrap_or(SqlValue::Null),
        ColumnData::I16(v) => v.map(|n| SqlValue::Int(n as i64)).unwrap_or(SqlValue::Null),
        ColumnData::I32(v) => v.map(|n| SqlValue::Int(n as i64)).unwrap_or(SqlValue::Null),
        ColumnData::I64(v) => v.map(SqlValue::Int).unwrap_or(SqlValue::Null),
        ColumnData::F32(v) => v.map(|n| SqlValue::Float(n as f64)).unwrap_or(SqlValue::Null),
        ColumnData::F64(v) => v.map(SqlValue::Float).unwrap_or(SqlValue::Null),
        ColumnData::Bit(v) => v.map(SqlValue::Bool).unwrap_or(SqlValue::Null),
        ColumnData::String(v) => v
            .map(|s| SqlValue::Text(s.into_owned()))
            .unwrap_or(SqlValue::Null),
        ColumnData::Guid(v) => v
            .map(|g| SqlValue::Text(g.to_string()))
            .unwrap_or(SqlValue::Null),
        ColumnData::Binary(v) => v
            .map(|b| SqlValue::Bytes(b.into_owned()))
            .unwrap_or(SqlValue::Null),
        ColumnData::Numeric(v) => v
            .map(|n| SqlValue::Float(n.value() as f64 / 10f64.powi(n.scale() as i32)))
            .unwrap_or(SqlValue::Null),
        ColumnData::Xml(v) => v
            .map(|x| SqlValue::Text(x.to_string()))
            .unwrap_or(SqlValue::Null),
        data @ (ColumnData::DateTime(_)
        | ColumnData::SmallDateTime(_)
        | ColumnData::DateTime2(_)) => NaiveDateTime::from_sql(&data)
            .context("decoding datetime column")?
            .map(SqlValue::DateTime)
            .unwrap_or(SqlValue::Null),
        data @ ColumnData::Date(_) => NaiveDate::from_sql(&data)
            .context("decoding date column")?
            .map(|d| SqlValue::DateTime(d.and_time(NaiveTime::MIN)))
            .unwrap_or(SqlValue::Null),
        data @ ColumnData::Time(_) => NaiveTime::from_sql(&data)
            .context("decoding time column")?
            .map(|t| SqlValue::Text(t.to_string()))
            .unwrap_or(SqlValue::Null),
        data @ ColumnData::DateTimeOffset(_) => {
            chrono::DateTime::<chrono::Utc>::from_sql(&data)
                .context("decoding datetimeoffset column")?
                .map(|dt| SqlValue::DateTime(dt.naive_utc()))
                .unwrap_or(SqlValue::Null)
        }
    };
    Ok(value)
}
