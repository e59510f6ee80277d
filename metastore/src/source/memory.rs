use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use metastore_config::shared::ConnectionConfig;
use tracing::{debug, info};

use crate::bail;
use crate::error::{ErrorKind, MetadataResult};
use crate::source::{MetadataSource, MetadataSourceProvider, RecordSet};

/// A call that a [`MemoryMetadataSource`] completed successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEntry {
    Connect,
    Begin,
    Execute(String),
    Commit,
    Rollback,
    Close,
    /// A connected source was dropped without being closed.
    Release,
}

/// Operations of [`MetadataSource`] that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Connect,
    Begin,
    ExecuteQuery,
    Commit,
    Rollback,
    Close,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Connect => "connect",
            Operation::Begin => "begin",
            Operation::ExecuteQuery => "execute_query",
            Operation::Commit => "commit",
            Operation::Rollback => "rollback",
            Operation::Close => "close",
        };
        f.write_str(name)
    }
}

/// How an injected fault manifests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultType {
    /// The operation returns an error of the kind the real driver would use.
    Error,
    /// The operation panics.
    Panic,
}

/// Faults injected into every source of a [`MemoryProvider`], per operation.
#[derive(Debug, Clone, Copy, Default)]
pub struct FaultConfig {
    pub connect: Option<FaultType>,
    pub begin: Option<FaultType>,
    pub execute_query: Option<FaultType>,
    pub commit: Option<FaultType>,
    pub rollback: Option<FaultType>,
    pub close: Option<FaultType>,
}

impl FaultConfig {
    fn fault_for(&self, operation: Operation) -> Option<FaultType> {
        match operation {
            Operation::Connect => self.connect,
            Operation::Begin => self.begin,
            Operation::ExecuteQuery => self.execute_query,
            Operation::Commit => self.commit,
            Operation::Rollback => self.rollback,
            Operation::Close => self.close,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    databases: BTreeSet<String>,
    journal: Vec<JournalEntry>,
    open_sessions: usize,
    faults: FaultConfig,
}

/// In-memory stand-in for a MySQL server, for tests and local development.
///
/// All sources created by one provider share the same server state: the set of existing
/// databases, a journal of completed calls, the number of open sessions and the injected
/// faults. Cloning the provider shares that state too, so a test can keep a clone for
/// inspection while the lifecycle manager owns another.
///
/// Only `CREATE DATABASE [IF NOT EXISTS] <name>`, `DROP DATABASE [IF EXISTS] <name>` and
/// `SHOW DATABASES` are understood; any other statement fails like a syntax error. Changes
/// become visible on commit and are discarded on rollback, and the last commit wins.
#[derive(Debug, Clone, Default)]
pub struct MemoryProvider {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryProvider {
    /// Creates a provider for an empty server.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a provider for a server that already has `databases`.
    pub fn with_databases<I, S>(databases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let provider = Self::new();
        provider.lock().databases = databases.into_iter().map(Into::into).collect();
        provider
    }

    /// Replaces the faults injected into every source of this provider.
    pub fn set_faults(&self, faults: FaultConfig) {
        self.lock().faults = faults;
    }

    /// Returns `true` if `name` exists on the server.
    pub fn database_exists(&self, name: &str) -> bool {
        self.lock().databases.contains(name)
    }

    /// Returns the names of all databases on the server, sorted.
    pub fn databases(&self) -> Vec<String> {
        self.lock().databases.iter().cloned().collect()
    }

    /// Returns a copy of all completed calls, in order.
    pub fn journal(&self) -> Vec<JournalEntry> {
        self.lock().journal.clone()
    }

    /// Returns the statements executed successfully, in order.
    pub fn executed_statements(&self) -> Vec<String> {
        self.lock()
            .journal
            .iter()
            .filter_map(|entry| match entry {
                JournalEntry::Execute(statement) => Some(statement.clone()),
                _ => None,
            })
            .collect()
    }

    /// Returns the number of sessions that are currently open.
    pub fn open_sessions(&self) -> usize {
        self.lock().open_sessions
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        lock_inner(&self.inner)
    }
}

impl MetadataSourceProvider for MemoryProvider {
    type Source = MemoryMetadataSource;

    fn name() -> &'static str {
        "memory"
    }

    fn create_source(&self, config: &ConnectionConfig) -> Self::Source {
        debug!(endpoint = %config, "creating memory metadata source");

        MemoryMetadataSource {
            inner: self.inner.clone(),
            connected: false,
            transaction: None,
        }
    }
}

/// A session with a [`MemoryProvider`] server.
#[derive(Debug)]
pub struct MemoryMetadataSource {
    inner: Arc<Mutex<Inner>>,
    connected: bool,
    /// Working copy of the databases while a transaction is open.
    transaction: Option<BTreeSet<String>>,
}

impl MemoryMetadataSource {
    /// Returns `true` while the session is open.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Returns `true` while a transaction is open.
    pub fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        lock_inner(&self.inner)
    }

    fn inject_fault(&self, operation: Operation) -> MetadataResult<()> {
        // The guard must be gone before panicking so the shared state is not poisoned.
        let fault = self.lock().faults.fault_for(operation);

        match fault {
            None => Ok(()),
            Some(FaultType::Panic) => panic!("injected panic in memory source {operation}"),
            Some(FaultType::Error) => {
                let kind = match operation {
                    Operation::Connect | Operation::Close => ErrorKind::ConnectionError,
                    _ => ErrorKind::TransactionError,
                };
                bail!(
                    kind,
                    "Injected memory source failure",
                    format!("fault injected into `{operation}`")
                );
            }
        }
    }

    fn ensure_connected(&self) -> MetadataResult<()> {
        if !self.connected {
            bail!(ErrorKind::InvalidState, "Memory session is not connected");
        }

        Ok(())
    }

    fn record(&self, entry: JournalEntry) {
        self.lock().journal.push(entry);
    }
}

impl MetadataSource for MemoryMetadataSource {
    async fn connect(&mut self) -> MetadataResult<()> {
        if self.connected {
            bail!(ErrorKind::InvalidState, "Memory session is already connected");
        }
        self.inject_fault(Operation::Connect)?;

        let mut inner = self.lock();
        inner.open_sessions += 1;
        inner.journal.push(JournalEntry::Connect);
        drop(inner);

        self.connected = true;
        info!("connected to memory metadata source");

        Ok(())
    }

    async fn begin(&mut self) -> MetadataResult<()> {
        self.ensure_connected()?;
        if self.transaction.is_some() {
            bail!(ErrorKind::InvalidState, "A memory transaction is already open");
        }
        self.inject_fault(Operation::Begin)?;

        let databases = self.lock().databases.clone();
        self.transaction = Some(databases);
        self.record(JournalEntry::Begin);

        Ok(())
    }

    async fn execute_query(&mut self, statement: &str) -> MetadataResult<RecordSet> {
        self.ensure_connected()?;
        if self.transaction.is_none() {
            bail!(ErrorKind::InvalidState, "No memory transaction is open");
        }
        self.inject_fault(Operation::ExecuteQuery)?;

        let Some(databases) = self.transaction.as_mut() else {
            bail!(ErrorKind::InvalidState, "No memory transaction is open");
        };
        let record_set = apply_statement(databases, statement)?;
        self.record(JournalEntry::Execute(statement.to_string()));

        Ok(record_set)
    }

    async fn commit(&mut self) -> MetadataResult<()> {
        self.ensure_connected()?;
        if self.transaction.is_none() {
            bail!(ErrorKind::InvalidState, "No memory transaction is open");
        }
        self.inject_fault(Operation::Commit)?;

        if let Some(databases) = self.transaction.take() {
            let mut inner = self.lock();
            inner.databases = databases;
            inner.journal.push(JournalEntry::Commit);
        }

        Ok(())
    }

    async fn rollback(&mut self) -> MetadataResult<()> {
        self.ensure_connected()?;
        if self.transaction.is_none() {
            bail!(ErrorKind::InvalidState, "No memory transaction is open");
        }
        self.inject_fault(Operation::Rollback)?;

        self.transaction = None;
        self.record(JournalEntry::Rollback);

        Ok(())
    }

    async fn close(&mut self) -> MetadataResult<()> {
        self.ensure_connected()?;
        // A failed close leaves the session open; dropping the source still releases it.
        self.inject_fault(Operation::Close)?;

        self.connected = false;
        self.transaction = None;

        let mut inner = self.lock();
        inner.open_sessions = inner.open_sessions.saturating_sub(1);
        inner.journal.push(JournalEntry::Close);

        Ok(())
    }
}

impl Drop for MemoryMetadataSource {
    fn drop(&mut self) {
        if !self.connected {
            return;
        }

        let mut inner = self.lock();
        inner.open_sessions = inner.open_sessions.saturating_sub(1);
        inner.journal.push(JournalEntry::Release);
    }
}

fn lock_inner(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    // A panicking fault never holds the lock, so recovering the guard is safe.
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Applies one statement to the transaction's working copy of the databases.
fn apply_statement(
    databases: &mut BTreeSet<String>,
    statement: &str,
) -> MetadataResult<RecordSet> {
    let tokens: Vec<String> = statement
        .trim()
        .trim_end_matches(';')
        .split_whitespace()
        .map(|token| token.to_ascii_uppercase())
        .collect();
    let words: Vec<&str> = tokens.iter().map(String::as_str).collect();
    let raw_words: Vec<&str> = statement
        .trim()
        .trim_end_matches(';')
        .split_whitespace()
        .collect();

    match words.as_slice() {
        ["SHOW", "DATABASES"] => Ok(RecordSet {
            column_names: vec!["Database".to_string()],
            records: databases
                .iter()
                .map(|name| vec![Some(name.clone())])
                .collect(),
        }),
        ["CREATE", "DATABASE", "IF", "NOT", "EXISTS", _] => {
            databases.insert(database_name(raw_words[5]));
            Ok(RecordSet::default())
        }
        ["CREATE", "DATABASE", _] => {
            let name = database_name(raw_words[2]);
            if databases.contains(&name) {
                bail!(
                    ErrorKind::TransactionError,
                    "MySQL statement failed",
                    format!("Can't create database '{name}'; database exists")
                );
            }
            databases.insert(name);
            Ok(RecordSet::default())
        }
        ["DROP", "DATABASE", "IF", "EXISTS", _] => {
            databases.remove(&database_name(raw_words[4]));
            Ok(RecordSet::default())
        }
        ["DROP", "DATABASE", _] => {
            let name = database_name(raw_words[2]);
            if !databases.remove(&name) {
                bail!(
                    ErrorKind::TransactionError,
                    "MySQL statement failed",
                    format!("Can't drop database '{name}'; database doesn't exist")
                );
            }
            Ok(RecordSet::default())
        }
        _ => bail!(
            ErrorKind::TransactionError,
            "MySQL statement failed",
            format!("unsupported statement for the memory source: {statement}")
        ),
    }
}

fn database_name(token: &str) -> String {
    token.trim_matches('`').to_string()
}
