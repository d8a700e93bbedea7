// ABOUTME: Incremental row copier with bounded batch commits
// ABOUTME: Selects rows past the cursor, inserts them name-keyed, checkpoints per batch

use anyhow::anyhow;

use crate::config::TableSyncSpec;
use crate::cursor::CursorValue;
use crate::db::{SqlConnection, SqlValue};
use crate::schema::{normalize_column_name, ColumnDefinition};

/// Rows per target transaction.
pub const DEFAULT_BATCH_SIZE: usize = 20;

/// Outcome of one table's sync: rows durably committed and the cursor that
/// reflects exactly that committed prefix.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncResult {
    pub rows_copied: u64,
    pub cursor: CursorValue,
}

/// How a table sync failed.
///
/// `Aborted` means nothing was committed and the cursor is unchanged.
/// `Commit` means a transaction failed mid-way; `committed` carries the
/// progress that did reach durable storage, so the caller can advance the
/// cursor to the last successful batch boundary instead of losing or
/// double-counting rows.
#[derive(Debug, thiserror::Error)]
pub enum CopyError {
    #[error(transparent)]
    Aborted(anyhow::Error),
    #[error("commit failed after {} durably copied rows", .committed.rows_copied)]
    Commit {
        committed: SyncResult,
        #[source]
        source: anyhow::Error,
    },
}

pub struct RowCopier {
    batch_size: usize,
}

impl Default for RowCopier {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl RowCopier {
    pub fn new(batch_size: usize) -> Self {
        assert!(batch_size > 0, "batch size must be positive");
        Self { batch_size }
    }

    /// Copy every source row whose ordering column is past `cursor` into the
    /// target table, in ascending ordering-column order, committing every
    /// `batch_size` rows.
    pub async fn copy_new_rows(
        &self,
        source: &mut dyn SqlConnection,
        target: &mut dyn SqlConnection,
        spec: &TableSyncSpec,
        target_columns: &[ColumnDefinition],
        cursor: &CursorValue,
    ) -> Result<SyncResult, CopyError> {
        let table = &spec.table;
        let order = &spec.order_column;

        // An unset cursor means first-ever sync: no lower bound at all,
        // rather than a comparison against some sentinel value.
        let (select, params) = if cursor.is_unset() {
            (
                format!("SELECT * FROM [{table}] ORDER BY [{order}] ASC"),
                vec![],
            )
        } else {
            (
                format!(
                    "SELECT * FROM [{table}] WHERE {} < [{order}] ORDER BY [{order}] ASC",
                    source.placeholder(1)
                ),
                vec![cursor.to_sql_value()],
            )
        };

        let rs = source
            .query(&select, &params)
            .await
            .map_err(|e| CopyError::Aborted(e.context(format!("selecting new rows from {table}"))))?;

        if rs.rows.is_empty() {
            return Ok(SyncResult {
                rows_copied: 0,
                cursor: cursor.clone(),
            });
        }

        let order_idx = rs.column_index(order).ok_or_else(|| {
            CopyError::Aborted(anyhow!(
                "ordering column {order} not present in the result for table {table}"
            ))
        })?;

        // Validate the ordering column's type before anything is staged.
        CursorValue::from_sql_value(&rs.rows[0][order_idx]).map_err(|e| {
            CopyError::Aborted(e.context(format!("ordering column {order} of table {table}")))
        })?;

        // Bind each target column to a source result column by name; relying
        // on positional parity would corrupt data silently if the orders ever
        // diverged.
        let mut source_indexes = Vec::with_capacity(target_columns.len());
        for col in target_columns {
            let wanted = normalize_column_name(&col.name);
            let idx = rs
                .columns
                .iter()
                .position(|c| normalize_column_name(c) == wanted)
                .ok_or_else(|| {
                    CopyError::Aborted(anyhow!(
                        "target column `{}` has no counterpart in the source result for table {table}",
                        col.name
                    ))
                })?;
            source_indexes.push(idx);
        }

        let column_list: Vec<String> = target_columns
            .iter()
            .map(|c| format!("`{}`", c.name))
            .collect();
        let placeholders: Vec<String> = (1..=target_columns.len())
            .map(|i| target.placeholder(i))
            .collect();
        let insert = format!(
            "INSERT INTO `{table}` ({}) VALUES ({})",
            column_list.join(", "),
            placeholders.join(", ")
        );

        target.begin().await.map_err(|e| {
            CopyError::Aborted(e.context(format!("opening target transaction for {table}")))
        })?;

        let mut committed = SyncResult {
            rows_copied: 0,
            cursor: cursor.clone(),
        };
        let mut latest = cursor.clone();
        let mut count: u64 = 0;

        for row in &rs.rows {
            let row_params: Vec<SqlValue> =
                source_indexes.iter().map(|&i| row[i].clone()).collect();
            if let Err(e) = target.execute(&insert, &row_params).await {
                let _ = target.rollback().await;
                return Err(CopyError::Commit {
                    committed,
                    source: e.context(format!("inserting a row into {table}")),
                });
            }

            latest = match CursorValue::from_sql_value(&row[order_idx]) {
                Ok(value) => value,
                Err(e) => {
                    let _ = target.rollback().await;
                    return Err(CopyError::Commit {
                        committed,
                        source: e.context(format!("ordering column {order} of table {table}")),
                    });
                }
            };
            count += 1;

            if count % self.batch_size as u64 == 0 {
                if let Err(e) = target.commit().await {
                    let _ = target.rollback().await;
                    return Err(CopyError::Commit {
                        committed,
                        source: e.context(format!("committing a batch of {table}")),
                    });
                }
                // Checkpoint at the batch boundary: the cursor may only ever
                // reflect rows that are durably on the target.
                committed = SyncResult {
                    rows_copied: count,
                    cursor: latest.clone(),
                };
                if let Err(e) = target.begin().await {
                    return Err(CopyError::Commit {
                        committed,
                        source: e.context(format!("reopening a transaction for {table}")),
                    });
                }
            }
        }

        match target.commit().await {
            Ok(()) => Ok(SyncResult {
                rows_copied: count,
                cursor: latest,
            }),
            Err(e) => {
                let _ = target.rollback().await;
                Err(CopyError::Commit {
                    committed,
                    source: e.context(format!("final commit of {table}")),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::fake::{result_set, FakeConnection};

    fn spec() -> TableSyncSpec {
        TableSyncSpec {
            table: "events".to_string(),
            order_column: "insert_dt".to_string(),
        }
    }

    fn columns() -> Vec<ColumnDefinition> {
        vec![
            ColumnDefinition {
                name: "id".into(),
                data_type: "int".into(),
                nullable: false,
            },
            ColumnDefinition {
                name: "insert_dt".into(),
                data_type: "varchar(20)".into(),
                nullable: false,
            },
        ]
    }

    fn rows_with_minutes(n: usize) -> Vec<Vec<SqlValue>> {
        (1..=n)
            .map(|i| {
                vec![
                    SqlValue::Int(i as i64),
                    SqlValue::Text(format!("10:{i:02}")),
                ]
            })
            .collect()
    }

    #[tokio::test]
    async fn test_first_sync_copies_everything_in_order() {
        let mut source = FakeConnection::new();
        let mut target = FakeConnection::new();
        source.state.lock().unwrap().script(
            "SELECT * FROM [events]",
            result_set(
                &["id", "insert_dt"],
                vec![
                    vec![SqlValue::Int(1), SqlValue::Text("10:00".into())],
                    vec![SqlValue::Int(2), SqlValue::Text("10:05".into())],
                ],
            ),
        );

        let result = RowCopier::default()
            .copy_new_rows(
                &mut source,
                &mut target,
                &spec(),
                &columns(),
                &CursorValue::Unset,
            )
            .await
            .unwrap();

        assert_eq!(result.rows_copied, 2);
        assert_eq!(result.cursor, CursorValue::Text("10:05".into()));

        let src = source.state.lock().unwrap();
        // Unset cursor: no lower-bound predicate at all.
        assert!(!src.queries[0].0.contains("WHERE"));

        let tgt = target.state.lock().unwrap();
        assert_eq!(tgt.commits, 1);
        assert_eq!(tgt.execs.len(), 2);
        assert_eq!(
            tgt.execs[0].1,
            vec![SqlValue::Int(1), SqlValue::Text("10:00".into())]
        );
        assert_eq!(
            tgt.execs[1].1,
            vec![SqlValue::Int(2), SqlValue::Text("10:05".into())]
        );
    }

    #[tokio::test]
    async fn test_set_cursor_bounds_the_select() {
        let mut source = FakeConnection::new();
        let mut target = FakeConnection::new();
        // Scripted as "nothing newer than the cursor".
        source
            .state
            .lock()
            .unwrap()
            .script("WHERE", result_set(&["id", "insert_dt"], vec![]));

        let cursor = CursorValue::Text("10:05".into());
        let result = RowCopier::default()
            .copy_new_rows(&mut source, &mut target, &spec(), &columns(), &cursor)
            .await
            .unwrap();

        // Idempotence: nothing new means zero rows and an unchanged cursor.
        assert_eq!(result.rows_copied, 0);
        assert_eq!(result.cursor, cursor);

        let src = source.state.lock().unwrap();
        assert!(src.queries[0].0.contains("WHERE ? < [insert_dt]"));
        assert_eq!(src.queries[0].1, vec![SqlValue::Text("10:05".into())]);
        assert_eq!(target.state.lock().unwrap().begins, 0);
    }

    #[tokio::test]
    async fn test_batch_commit_boundaries_for_45_rows() {
        let mut source = FakeConnection::new();
        let mut target = FakeConnection::new();
        source.state.lock().unwrap().script(
            "SELECT * FROM [events]",
            result_set(&["id", "insert_dt"], rows_with_minutes(45)),
        );

        let result = RowCopier::default()
            .copy_new_rows(
                &mut source,
                &mut target,
                &spec(),
                &columns(),
                &CursorValue::Unset,
            )
            .await
            .unwrap();

        assert_eq!(result.rows_copied, 45);
        assert_eq!(result.cursor, CursorValue::Text("10:45".into()));

        let tgt = target.state.lock().unwrap();
        // Two intermediate commits (rows 20 and 40) plus the final one.
        assert_eq!(tgt.commits, 3);
        assert_eq!(tgt.committed.len(), 3);
        assert_eq!(tgt.committed[0].len(), 20);
        assert_eq!(tgt.committed[1].len(), 20);
        assert_eq!(tgt.committed[2].len(), 5);
    }

    #[tokio::test]
    async fn test_final_commit_failure_keeps_last_boundary_cursor() {
        let mut source = FakeConnection::new();
        let mut target = FakeConnection::new();
        source.state.lock().unwrap().script(
            "SELECT * FROM [events]",
            result_set(&["id", "insert_dt"], rows_with_minutes(45)),
        );
        target.state.lock().unwrap().fail_commit_at = Some(3);

        let err = RowCopier::default()
            .copy_new_rows(
                &mut source,
                &mut target,
                &spec(),
                &columns(),
                &CursorValue::Unset,
            )
            .await
            .unwrap_err();

        match err {
            CopyError::Commit { committed, .. } => {
                // Row 40's ordering value, not row 45's and not the pre-sync value.
                assert_eq!(committed.rows_copied, 40);
                assert_eq!(committed.cursor, CursorValue::Text("10:40".into()));
            }
            other => panic!("expected commit error, got {other:?}"),
        }

        let tgt = target.state.lock().unwrap();
        assert_eq!(tgt.rollbacks, 1);
        assert_eq!(tgt.committed.len(), 2);
    }

    #[tokio::test]
    async fn test_select_failure_leaves_cursor_unchanged() {
        // No scripted result and a result set with no ordering column both
        // abort before any transaction is opened.
        let mut source = FakeConnection::new();
        let mut target = FakeConnection::new();
        source.state.lock().unwrap().script(
            "SELECT * FROM [events]",
            result_set(&["id", "other"], vec![vec![SqlValue::Int(1), SqlValue::Int(2)]]),
        );

        let err = RowCopier::default()
            .copy_new_rows(
                &mut source,
                &mut target,
                &spec(),
                &columns(),
                &CursorValue::Unset,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, CopyError::Aborted(_)));
        assert_eq!(target.state.lock().unwrap().begins, 0);
    }

    #[tokio::test]
    async fn test_missing_target_column_fails_explicitly() {
        let mut source = FakeConnection::new();
        let mut target = FakeConnection::new();
        source.state.lock().unwrap().script(
            "SELECT * FROM [events]",
            result_set(
                &["id", "insert_dt"],
                vec![vec![SqlValue::Int(1), SqlValue::Text("10:00".into())]],
            ),
        );
        let mut cols = columns();
        cols.push(ColumnDefinition {
            name: "extra".into(),
            data_type: "int".into(),
            nullable: true,
        });

        let err = RowCopier::default()
            .copy_new_rows(
                &mut source,
                &mut target,
                &spec(),
                &cols,
                &CursorValue::Unset,
            )
            .await
            .unwrap_err();

        match err {
            CopyError::Aborted(e) => assert!(e.to_string().contains("extra")),
            other => panic!("expected abort, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_insert_binding_follows_target_column_order() {
        let mut source = FakeConnection::new();
        let mut target = FakeConnection::new();
        // Source result has the columns reversed relative to the target table.
        source.state.lock().unwrap().script(
            "SELECT * FROM [events]",
            result_set(
                &["insert_dt", "id"],
                vec![vec![SqlValue::Text("10:00".into()), SqlValue::Int(1)]],
            ),
        );

        RowCopier::default()
            .copy_new_rows(
                &mut source,
                &mut target,
                &spec(),
                &columns(),
                &CursorValue::Unset,
            )
            .await
            .unwrap();

        let tgt = target.state.lock().unwrap();
        assert_eq!(tgt.execs[0].0, "INSERT INTO `events` (`id`, `insert_dt`) VALUES (?, ?)");
        assert_eq!(
            tgt.execs[0].1,
            vec![SqlValue::Int(1), SqlValue::Text("10:00".into())]
        );
    }

    #[tokio::test]
    async fn test_exec_failure_mid_batch_keeps_boundary() {
        let mut source = FakeConnection::new();
        let mut target = FakeConnection::new();
        source.state.lock().unwrap().script(
            "SELECT * FROM [events]",
            result_set(&["id", "insert_dt"], rows_with_minutes(25)),
        );
        // The first batch of 20 commits; the 21st insert fails.
        target.state.lock().unwrap().fail_exec_at = Some(21);

        let err = RowCopier::new(20)
            .copy_new_rows(
                &mut source,
                &mut target,
                &spec(),
                &columns(),
                &CursorValue::Unset,
            )
            .await
            .unwrap_err();

        match err {
            CopyError::Commit { committed, .. } => {
                assert_eq!(committed.rows_copied, 20);
                assert_eq!(committed.cursor, CursorValue::Text("10:20".into()));
            }
            other => panic!("expected commit error, got {other:?}"),
        }
        let tgt = target.state.lock().unwrap();
        assert_eq!(tgt.rollbacks, 1);
        assert_eq!(tgt.committed.len(), 1);
    }
}
