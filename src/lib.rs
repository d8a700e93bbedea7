// ABOUTME: Library root for mssql-mysql-replicator
// ABOUTME: Exposes the replication engine modules to the CLI and tests

pub mod config;
pub mod copier;
pub mod cursor;
pub mod daemon;
pub mod db;
pub mod orchestrator;
pub mod schema;
pub mod views;

pub use config::{ConnectionDescriptor, Settings, TableSyncSpec};
pub use copier::{CopyError, RowCopier, SyncResult};
pub use cursor::{CursorStore, CursorValue};
pub use orchestrator::{CycleStats, Orchestrator};
pub use schema::ColumnDefinition;
