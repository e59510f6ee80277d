//! Backing store drivers for the metadata store.
//!
//! A [`MetadataSource`] is one session with the backing store. It is created unconnected
//! by a [`MetadataSourceProvider`] and driven by the
//! [`ConnectionLifecycleManager`](crate::lifecycle::ConnectionLifecycleManager), which owns
//! it exclusively. Dropping a source releases its session.

#[cfg(any(test, feature = "test-utils"))]
pub mod memory;
pub mod mysql;

use std::future::Future;

use metastore_config::shared::ConnectionConfig;

use crate::error::MetadataResult;

/// Rows returned by [`MetadataSource::execute_query`].
///
/// Values are kept in their text form; SQL `NULL` is [`None`]. Statements that return no
/// rows produce an empty record set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordSet {
    pub column_names: Vec<String>,
    pub records: Vec<Vec<Option<String>>>,
}

impl RecordSet {
    /// Returns `true` when no rows were returned.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns the number of rows.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns the value at `row` in the column named `column`.
    ///
    /// Returns [`None`] if the row or column does not exist or the value is `NULL`.
    pub fn value(&self, row: usize, column: &str) -> Option<&str> {
        let index = self.column_names.iter().position(|name| name == column)?;
        self.records.get(row)?.get(index)?.as_deref()
    }
}

/// A single session with the backing store.
///
/// Implementations check their own preconditions (for example, that a transaction is open
/// before executing a statement) and report violations as
/// [`ErrorKind::InvalidState`](crate::error::ErrorKind::InvalidState). Every method
/// completes its round trip with the server before returning.
pub trait MetadataSource: Send {
    /// Opens the session.
    fn connect(&mut self) -> impl Future<Output = MetadataResult<()>> + Send;

    /// Starts a transaction.
    fn begin(&mut self) -> impl Future<Output = MetadataResult<()>> + Send;

    /// Executes one statement inside the open transaction.
    fn execute_query(
        &mut self,
        statement: &str,
    ) -> impl Future<Output = MetadataResult<RecordSet>> + Send;

    /// Commits the open transaction.
    fn commit(&mut self) -> impl Future<Output = MetadataResult<()>> + Send;

    /// Rolls back the open transaction.
    fn rollback(&mut self) -> impl Future<Output = MetadataResult<()>> + Send;

    /// Gracefully closes the session.
    fn close(&mut self) -> impl Future<Output = MetadataResult<()>> + Send;
}

/// Creates unconnected [`MetadataSource`]s from a validated [`ConnectionConfig`].
pub trait MetadataSourceProvider {
    type Source: MetadataSource;

    /// Returns the name of the backing store, used in tracing output.
    fn name() -> &'static str;

    /// Creates a source for `config`. No I/O happens until
    /// [`MetadataSource::connect`] is called.
    fn create_source(&self, config: &ConnectionConfig) -> Self::Source;
}
