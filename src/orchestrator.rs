// ABOUTME: Drives one replication cycle across all configured schemas
// ABOUTME: Owns the cycle lock, per-table cursor persistence, and the scheduler loop

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::time::interval;

use crate::config::{Settings, TableSyncSpec};
use crate::copier::{CopyError, RowCopier};
use crate::cursor::CursorStore;
use crate::db::{ConnectionFactory, SqlConnection};
use crate::{schema, views};

/// Statistics from one replication cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleStats {
    pub tables_synced: usize,
    pub rows_copied: u64,
    pub views_created: u64,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

impl CycleStats {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Replication driver. Holds the resolved settings and a connection factory;
/// no hidden global state.
pub struct Orchestrator {
    settings: Settings,
    factory: Arc<dyn ConnectionFactory>,
    copier: RowCopier,
    cycle_lock: tokio::sync::Mutex<()>,
}

impl Orchestrator {
    pub fn new(settings: Settings, factory: Arc<dyn ConnectionFactory>) -> Self {
        Self {
            settings,
            factory,
            copier: RowCopier::default(),
            cycle_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Run one replication cycle over every configured schema.
    ///
    /// Safe to call repeatedly; a trigger arriving while a cycle is still in
    /// flight is rejected instead of opening duplicate connections.
    pub async fn run_cycle(&self, store: &mut CursorStore) -> Result<CycleStats> {
        let _guard = self
            .cycle_lock
            .try_lock()
            .map_err(|_| anyhow::anyhow!("a replication cycle is already in progress"))?;

        let start = std::time::Instant::now();
        let mut stats = CycleStats::default();

        for (schema_name, tables) in &self.settings.schemas {
            let (mut source, mut target) = match self.open_pair(schema_name).await {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::error!(schema = %schema_name, "connection failed: {e:?}");
                    stats.errors.push(format!("{schema_name}: {e}"));
                    continue;
                }
            };
            tracing::info!(schema = %schema_name, tables = tables.len(), "replicating schema");

            for spec in tables {
                match self
                    .sync_table(source.as_mut(), target.as_mut(), schema_name, spec, store)
                    .await
                {
                    Ok(rows) => {
                        stats.tables_synced += 1;
                        stats.rows_copied += rows;
                    }
                    Err(e) => {
                        tracing::error!(
                            schema = %schema_name,
                            table = %spec.table,
                            "table sync failed: {e:?}"
                        );
                        stats
                            .errors
                            .push(format!("{schema_name}.{}: {e}", spec.table));
                    }
                }
            }
        }

        stats.duration_ms = start.elapsed().as_millis() as u64;
        Ok(stats)
    }

    async fn sync_table(
        &self,
        source: &mut dyn SqlConnection,
        target: &mut dyn SqlConnection,
        schema_name: &str,
        spec: &TableSyncSpec,
        store: &mut CursorStore,
    ) -> Result<u64> {
        let target_columns = schema::ensure_target_table(source, target, &spec.table).await?;

        let cursor = store.get(schema_name, &spec.table);
        tracing::info!(
            schema = %schema_name,
            table = %spec.table,
            cursor = %cursor,
            "syncing table"
        );

        match self
            .copier
            .copy_new_rows(source, target, spec, &target_columns, &cursor)
            .await
        {
            Ok(result) => {
                store.set(schema_name, &spec.table, result.cursor.clone());
                store.save().context("persisting cursor store")?;
                tracing::info!(
                    schema = %schema_name,
                    table = %spec.table,
                    rows = result.rows_copied,
                    cursor = %result.cursor,
                    "table synced"
                );
                Ok(result.rows_copied)
            }
            Err(CopyError::Commit { committed, source: cause }) => {
                // The cursor moves exactly to the last durable batch
                // boundary; already-committed rows are not re-read next cycle.
                store.set(schema_name, &spec.table, committed.cursor.clone());
                store.save().context("persisting cursor store")?;
                Err(cause.context(format!(
                    "commit failed after {} durably copied rows",
                    committed.rows_copied
                )))
            }
            Err(CopyError::Aborted(e)) => Err(e),
        }
    }

    /// Replicate view definitions only. Shares the cycle lock with
    /// `run_cycle` so views and tables never interleave on one target.
    pub async fn replicate_views(&self) -> Result<CycleStats> {
        let _guard = self
            .cycle_lock
            .try_lock()
            .map_err(|_| anyhow::anyhow!("a replication cycle is already in progress"))?;

        let start = std::time::Instant::now();
        let mut stats = CycleStats::default();

        for schema_name in self.settings.schemas.keys() {
            let (mut source, mut target) = match self.open_pair(schema_name).await {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::error!(schema = %schema_name, "connection failed: {e:?}");
                    stats.errors.push(format!("{schema_name}: {e}"));
                    continue;
                }
            };
            match views::replicate_views(source.as_mut(), target.as_mut(), schema_name).await {
                Ok(created) => stats.views_created += created,
                Err(e) => {
                    tracing::error!(schema = %schema_name, "view replication failed: {e:?}");
                    stats.errors.push(format!("{schema_name} views: {e}"));
                }
            }
        }

        stats.duration_ms = start.elapsed().as_millis() as u64;
        Ok(stats)
    }

    /// Run replication cycles on the configured schedule until shutdown.
    pub async fn run_scheduled(
        &self,
        period: Duration,
        store: &mut CursorStore,
        mut shutdown: tokio::sync::broadcast::Receiver<()>,
    ) -> Result<()> {
        let mut ticker = interval(period);
        let mut cycles = 0u64;

        tracing::info!(period_secs = period.as_secs(), "scheduler started");

        loop {
            tokio::select! {
                biased;

                _ = shutdown.recv() => {
                    tracing::info!("shutdown signal received, stopping scheduler");
                    break;
                }
                _ = ticker.tick() => {
                    cycles += 1;
                    tracing::info!(cycle = cycles, "starting replication cycle");
                    match self.run_cycle(store).await {
                        Ok(stats) => {
                            tracing::info!(
                                cycle = cycles,
                                tables = stats.tables_synced,
                                rows = stats.rows_copied,
                                duration_ms = stats.duration_ms,
                                "replication cycle completed"
                            );
                            if !stats.errors.is_empty() {
                                tracing::warn!(
                                    cycle = cycles,
                                    errors = stats.errors.len(),
                                    "cycle finished with errors"
                                );
                            }
                        }
                        Err(e) => tracing::error!(cycle = cycles, "cycle failed: {e}"),
                    }
                }
            }
        }

        Ok(())
    }

    async fn open_pair(
        &self,
        schema_name: &str,
    ) -> Result<(Box<dyn SqlConnection>, Box<dyn SqlConnection>)> {
        let source = self
            .factory
            .open_source(schema_name)
            .await
            .context("opening source connection")?;
        let target = self
            .factory
            .open_target(schema_name)
            .await
            .context("opening target connection")?;
        Ok((source, target))
    }
}
