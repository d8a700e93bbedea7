// ABOUTME: Scripted in-memory SqlConnection for unit tests
// ABOUTME: Replays canned result sets and records exec/transaction activity

use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;

use super::{ConnectionFactory, ResultSet, SqlConnection, SqlValue};

/// Shared, inspectable state behind one fake connection.
#[derive(Debug, Default)]
pub struct FakeState {
    /// `(substring, result)` pairs; the first matching substring wins.
    pub results: Vec<(String, ResultSet)>,
    /// Every query issued, with its bound parameters.
    pub queries: Vec<(String, Vec<SqlValue>)>,
    /// Every exec issued, with its bound parameters, in order.
    pub execs: Vec<(String, Vec<SqlValue>)>,
    /// Statements grouped per committed transaction.
    pub committed: Vec<Vec<(String, Vec<SqlValue>)>>,
    pub pending: Vec<(String, Vec<SqlValue>)>,
    pub begins: usize,
    pub commits: usize,
    pub rollbacks: usize,
    pub in_transaction: bool,
    /// Fail the n-th commit (1-based).
    pub fail_commit_at: Option<usize>,
    /// Fail the n-th exec (1-based).
    pub fail_exec_at: Option<usize>,
}

impl FakeState {
    pub fn script(&mut self, matcher: &str, result: ResultSet) {
        self.results.push((matcher.to_string(), result));
    }
}

#[derive(Clone)]
pub struct FakeConnection {
    pub state: Arc<Mutex<FakeState>>,
}

impl FakeConnection {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState::default())),
        }
    }
}

/// Build a result set from literal columns and rows.
pub fn result_set(columns: &[&str], rows: Vec<Vec<SqlValue>>) -> ResultSet {
    ResultSet {
        columns: columns.iter().map(|c| c.to_string()).collect(),
        rows,
    }
}

#[async_trait]
impl SqlConnection for FakeConnection {
    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<ResultSet> {
        let mut state = self.state.lock().unwrap();
        state.queries.push((sql.to_string(), params.to_vec()));
        let found = state
            .results
            .iter()
            .find(|(matcher, _)| sql.contains(matcher.as_str()))
            .map(|(_, rs)| rs.clone());
        Ok(found.unwrap_or_default())
    }

    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        if state.fail_exec_at == Some(state.execs.len() + 1) {
            anyhow::bail!("injected exec failure for {sql}");
        }
        state.execs.push((sql.to_string(), params.to_vec()));
        if state.in_transaction {
            state.pending.push((sql.to_string(), params.to_vec()));
        }
        Ok(1)
    }

    async fn begin(&mut self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.begins += 1;
        state.in_transaction = true;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.commits += 1;
        if state.fail_commit_at == Some(state.commits) {
            anyhow::bail!("injected commit failure");
        }
        let batch = std::mem::take(&mut state.pending);
        state.committed.push(batch);
        state.in_transaction = false;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.rollbacks += 1;
        state.pending.clear();
        state.in_transaction = false;
        Ok(())
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }
}

/// Factory returning connections over two shared fake states.
pub struct FakeFactory {
    pub source: Arc<Mutex<FakeState>>,
    pub target: Arc<Mutex<FakeState>>,
}

impl FakeFactory {
    pub fn new() -> Self {
        Self {
            source: Arc::new(Mutex::new(FakeState::default())),
            target: Arc::new(Mutex::new(FakeState::default())),
        }
    }
}

#[async_trait]
impl ConnectionFactory for FakeFactory {
    async fn open_source(&self, _database: &str) -> Result<Box<dyn SqlConnection>> {
        Ok(Box::new(FakeConnection {
            state: Arc::clone(&self.source),
        }))
    }

    async fn open_target(&self, _database: &str) -> Result<Box<dyn SqlConnection>> {
        Ok(Box::new(FakeConnection {
            state: Arc::clone(&self.target),
        }))
    }
}
