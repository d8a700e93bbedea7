// ABOUTME: Schema translation between the source and target dialects
// ABOUTME: Reads column metadata, maps types, and creates missing target tables

use anyhow::{Context, Result};

use crate::db::{ResultSet, SqlConnection, SqlValue};

/// Dialect-neutral column description, produced fresh on every schema check.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDefinition {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
}

/// Normalize a column name for matching across dialects: case-insensitive,
/// with the `%` delimiter stripped the same way generated DDL strips it.
pub fn normalize_column_name(name: &str) -> String {
    name.to_ascii_lowercase().replace('%', "")
}

/// Map a source-dialect type descriptor to the target dialect's type name.
///
/// `precision` and `scale` drive the numeric split; `length` drives the
/// character types. Anything unrecognized falls back to `<type>(<length>)`.
pub fn translate_type(type_name: &str, precision: i64, length: i64, scale: i64) -> String {
    match type_name.to_ascii_lowercase().as_str() {
        "numeric" | "decimal" => {
            if scale > 0 {
                "double".to_string()
            } else if precision > 9 {
                "bigint".to_string()
            } else {
                "int".to_string()
            }
        }
        "varchar" => {
            if length < 400 {
                format!("varchar({length})")
            } else {
                "text".to_string()
            }
        }
        "nvarchar" => format!("varchar({length})"),
        "nchar" => format!("char({length})"),
        "ntext" => "text".to_string(),
        "datetime" | "datetime2" | "smalldatetime" => "datetime".to_string(),
        other => format!("{other}({length})"),
    }
}

fn text_field(rs: &ResultSet, row: &[SqlValue], name: &str) -> Result<String> {
    match rs.value(row, name) {
        Some(SqlValue::Text(s)) => Ok(s.clone()),
        Some(other) => anyhow::bail!("metadata field {name} has unexpected value {other:?}"),
        None => anyhow::bail!("metadata field {name} missing from column inspector result"),
    }
}

fn int_field(rs: &ResultSet, row: &[SqlValue], name: &str) -> Result<i64> {
    match rs.value(row, name) {
        Some(SqlValue::Int(i)) => Ok(*i),
        // Some inspector fields are NULL for non-numeric types.
        Some(SqlValue::Null) | None => Ok(0),
        Some(other) => anyhow::bail!("metadata field {name} has unexpected value {other:?}"),
    }
}

fn source_column_from_row(rs: &ResultSet, row: &[SqlValue]) -> Result<ColumnDefinition> {
    let name = text_field(rs, row, "COLUMN_NAME")?;
    let type_name = text_field(rs, row, "TYPE_NAME")?;
    let precision = int_field(rs, row, "PRECISION")?;
    let length = int_field(rs, row, "LENGTH")?;
    let scale = int_field(rs, row, "SCALE")?;
    let nullable = int_field(rs, row, "NULLABLE")? != 0;

    Ok(ColumnDefinition {
        name: name.replace('%', ""),
        data_type: translate_type(&type_name, precision, length, scale),
        nullable,
    })
}

/// Read the source table's columns through the driver-level column inspector
/// and translate each into a target-dialect definition.
pub async fn read_source_columns(
    conn: &mut dyn SqlConnection,
    table: &str,
) -> Result<Vec<ColumnDefinition>> {
    let rs = conn
        .query(&format!("sp_columns {table}"), &[])
        .await
        .with_context(|| format!("reading source columns for table {table}"))?;
    rs.rows
        .iter()
        .map(|row| {
            source_column_from_row(&rs, row)
                .with_context(|| format!("translating a column of table {table}"))
        })
        .collect()
}

/// Read the target table's columns in their native types.
///
/// Returns an empty list when the table does not exist; a query error is a
/// read failure, never a signal to create the table.
pub async fn read_target_columns(
    conn: &mut dyn SqlConnection,
    table: &str,
) -> Result<Vec<ColumnDefinition>> {
    let sql = format!(
        "SELECT COLUMN_NAME, COLUMN_TYPE, IS_NULLABLE \
         FROM information_schema.columns \
         WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = {} \
         ORDER BY ORDINAL_POSITION",
        conn.placeholder(1)
    );
    let rs = conn
        .query(&sql, &[SqlValue::Text(table.to_string())])
        .await
        .with_context(|| format!("reading target columns for table {table}"))?;

    rs.rows
        .iter()
        .map(|row| {
            Ok(ColumnDefinition {
                name: text_field(&rs, row, "COLUMN_NAME")?,
                data_type: text_field(&rs, row, "COLUMN_TYPE")?,
                nullable: text_field(&rs, row, "IS_NULLABLE")?.eq_ignore_ascii_case("YES"),
            })
        })
        .collect()
}

/// Render the `CREATE TABLE IF NOT EXISTS` statement for a missing target
/// table. Nullable is the implicit default and is never declared explicitly.
pub fn build_create_table(table: &str, columns: &[ColumnDefinition]) -> String {
    let clauses: Vec<String> = columns
        .iter()
        .map(|col| {
            let name = col.name.replace('%', "");
            if col.nullable {
                format!("`{name}` {}", col.data_type)
            } else {
                format!("`{name}` {} NOT NULL", col.data_type)
            }
        })
        .collect();
    format!(
        "CREATE TABLE IF NOT EXISTS `{table}` ({})",
        clauses.join(", ")
    )
}

fn columns_match(source: &[ColumnDefinition], target: &[ColumnDefinition]) -> bool {
    let mut left: Vec<String> = source.iter().map(|c| normalize_column_name(&c.name)).collect();
    let mut right: Vec<String> = target.iter().map(|c| normalize_column_name(&c.name)).collect();
    left.sort();
    right.sort();
    left == right
}

/// Make sure a structurally compatible table exists on the target.
///
/// Returns the target table's effective column list, in target order, for
/// name-keyed insert binding. Schema drift on an existing table is detected
/// and logged but not reconciled; altering columns is an unimplemented
/// extension point.
pub async fn ensure_target_table(
    source: &mut dyn SqlConnection,
    target: &mut dyn SqlConnection,
    table: &str,
) -> Result<Vec<ColumnDefinition>> {
    let source_columns = read_source_columns(source, table).await?;
    if source_columns.is_empty() {
        anyhow::bail!("table {table} has no readable columns on the source");
    }

    let target_columns = read_target_columns(target, table).await?;
    if target_columns.is_empty() {
        let ddl = build_create_table(table, &source_columns);
        tracing::info!(table, "creating target table");
        tracing::debug!(%ddl, "create statement");
        target
            .execute(&ddl, &[])
            .await
            .with_context(|| format!("creating target table {table}"))?;
        return Ok(source_columns);
    }

    if !columns_match(&source_columns, &target_columns) {
        tracing::warn!(
            table,
            source_columns = source_columns.len(),
            target_columns = target_columns.len(),
            "schema drift detected; target table left unchanged"
        );
    }
    Ok(target_columns)
}
