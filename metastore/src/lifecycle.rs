//! Lifecycle of a single metadata store connection.
//!
//! [`ConnectionLifecycleManager`] walks one [`MetadataSource`] through
//! `Uninitialized → Connected → (TransactionOpen → Connected)* → Closed`. The manager owns
//! the source exclusively, so the session is released on every exit path: an explicit
//! [`close`](ConnectionLifecycleManager::close), a [`cleanup`](ConnectionLifecycleManager::cleanup),
//! a failed connect, an early return with `?`, or the manager being dropped.

use std::fmt;

use metastore_config::shared::{ConnectionConfig, validate_database_name};
use tracing::{debug, info, warn};

use crate::bail;
use crate::error::{ErrorKind, MetadataResult};
use crate::metastore_error;
use crate::source::{MetadataSource, MetadataSourceProvider, RecordSet};

/// Observable state of a [`ConnectionLifecycleManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// No session has been opened yet, or the last one was cleaned up.
    Uninitialized,
    /// A session is open and no transaction is running.
    Connected,
    /// A session is open and a transaction is running.
    TransactionOpen,
    /// The session was closed. Terminal.
    Closed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Uninitialized => "uninitialized",
            LifecycleState::Connected => "connected",
            LifecycleState::TransactionOpen => "transaction_open",
            LifecycleState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Owns one metadata store connection from configuration to release.
///
/// At most one session is open per manager. After [`close`](Self::close) the manager stays
/// [`LifecycleState::Closed`]; create a new manager to reconnect. Callers needing
/// concurrent access use one manager per task.
///
/// Errors are returned to the caller unchanged and never retried here.
pub struct ConnectionLifecycleManager<P>
where
    P: MetadataSourceProvider,
{
    provider: P,
    config: Option<ConnectionConfig>,
    source: Option<P::Source>,
    state: LifecycleState,
}

impl<P> ConnectionLifecycleManager<P>
where
    P: MetadataSourceProvider,
{
    /// Creates an uninitialized manager that opens sources through `provider`.
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            config: None,
            source: None,
            state: LifecycleState::Uninitialized,
        }
    }

    /// Returns the current [`LifecycleState`].
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Returns `true` while a session is open, with or without a running transaction.
    pub fn is_connected(&self) -> bool {
        matches!(
            self.state,
            LifecycleState::Connected | LifecycleState::TransactionOpen
        )
    }

    /// Returns the configuration of the open session.
    pub fn config(&self) -> Option<&ConnectionConfig> {
        self.config.as_ref()
    }

    /// Returns the open source, if any.
    pub fn source(&self) -> Option<&P::Source> {
        self.source.as_ref()
    }

    /// Returns the open source, or [`ErrorKind::InvalidState`] when none is held.
    pub fn source_mut(&mut self) -> MetadataResult<&mut P::Source> {
        let state = self.state;
        self.source.as_mut().ok_or_else(|| {
            metastore_error!(
                ErrorKind::InvalidState,
                "No metadata source is connected",
                format!("the manager is {state}")
            )
        })
    }

    /// Validates `config` and opens a session with it.
    ///
    /// Returns [`ErrorKind::InvalidState`] unless the manager is
    /// [`LifecycleState::Uninitialized`], and [`ErrorKind::ConfigurationError`] before any
    /// I/O when the configuration is invalid. A source that fails to connect is dropped
    /// and the manager stays uninitialized.
    pub async fn initialize(&mut self, config: ConnectionConfig) -> MetadataResult<&mut P::Source> {
        self.ensure_state(LifecycleState::Uninitialized, "initialize")?;
        config.validate()?;

        let mut source = self.provider.create_source(&config);
        source.connect().await?;

        info!(
            provider = P::name(),
            endpoint = %config,
            "metadata source connected"
        );

        self.config = Some(config);
        self.state = LifecycleState::Connected;

        Ok(self.source.insert(source))
    }

    /// Starts a transaction on the open session.
    pub async fn begin(&mut self) -> MetadataResult<()> {
        self.ensure_state(LifecycleState::Connected, "begin")?;

        self.source_mut()?.begin().await?;
        self.state = LifecycleState::TransactionOpen;

        debug!("metadata transaction started");

        Ok(())
    }

    /// Executes `statement` inside the running transaction.
    pub async fn execute_query(&mut self, statement: &str) -> MetadataResult<RecordSet> {
        self.ensure_state(LifecycleState::TransactionOpen, "execute_query")?;

        self.source_mut()?.execute_query(statement).await
    }

    /// Commits the running transaction.
    ///
    /// On failure the transaction is still considered open so that the caller can roll
    /// it back.
    pub async fn commit(&mut self) -> MetadataResult<()> {
        self.ensure_state(LifecycleState::TransactionOpen, "commit")?;

        self.source_mut()?.commit().await?;
        self.state = LifecycleState::Connected;

        debug!("metadata transaction committed");

        Ok(())
    }

    /// Rolls back the running transaction.
    pub async fn rollback(&mut self) -> MetadataResult<()> {
        self.ensure_state(LifecycleState::TransactionOpen, "rollback")?;

        self.source_mut()?.rollback().await?;
        self.state = LifecycleState::Connected;

        debug!("metadata transaction rolled back");

        Ok(())
    }

    /// Drops `database_name` in its own transaction.
    ///
    /// Issues exactly `DROP DATABASE IF EXISTS <database_name>` once and commits it. The
    /// session is left without a target database; recreating the schema is up to the
    /// caller. Failures are returned as they are, without retry or rollback: if the
    /// transaction was started, the manager stays in [`LifecycleState::TransactionOpen`].
    pub async fn reset_database(&mut self, database_name: &str) -> MetadataResult<()> {
        self.ensure_state(LifecycleState::Connected, "reset_database")?;
        validate_database_name(database_name)?;

        let statement = format!("DROP DATABASE IF EXISTS {database_name}");

        self.begin().await?;
        self.execute_query(&statement).await?;
        self.commit().await?;

        info!(database = database_name, "metadata database reset");

        Ok(())
    }

    /// Closes the open session.
    ///
    /// Returns [`ErrorKind::InvalidState`] when no session is open or a transaction is
    /// still running. The manager is [`LifecycleState::Closed`] afterwards even if the
    /// driver fails to close gracefully; in that case the session is released by dropping
    /// the source and the driver's error is returned.
    pub async fn close(&mut self) -> MetadataResult<()> {
        match self.state {
            LifecycleState::Connected => {}
            LifecycleState::TransactionOpen => bail!(
                ErrorKind::InvalidState,
                "Cannot close a metadata source with an open transaction",
                "commit or roll back the transaction before closing"
            ),
            state => bail!(
                ErrorKind::InvalidState,
                "No metadata source is connected",
                format!("`close` requires state connected, but the manager is {state}")
            ),
        }

        let mut source = self.source.take().ok_or_else(|| {
            metastore_error!(ErrorKind::InvalidState, "No metadata source is connected")
        })?;
        self.state = LifecycleState::Closed;

        let result = source.close().await;
        drop(source);

        info!(provider = P::name(), "metadata source closed");

        result
    }

    /// Releases any held source and returns to [`LifecycleState::Uninitialized`].
    ///
    /// A held source is dropped without a graceful close, which releases its session. In
    /// [`LifecycleState::Closed`] this does nothing. Never fails and may be called any
    /// number of times.
    pub fn cleanup(&mut self) {
        if self.state == LifecycleState::Closed {
            return;
        }

        if let Some(source) = self.source.take() {
            debug!(state = %self.state, "releasing metadata source");
            drop(source);
        }

        self.config = None;
        self.state = LifecycleState::Uninitialized;
    }

    fn ensure_state(&self, expected: LifecycleState, operation: &'static str) -> MetadataResult<()> {
        if self.state != expected {
            bail!(
                ErrorKind::InvalidState,
                "Operation is not valid in the current lifecycle state",
                format!(
                    "`{operation}` requires state {expected}, but the manager is {}",
                    self.state
                )
            );
        }

        Ok(())
    }
}

impl<P> fmt::Debug for ConnectionLifecycleManager<P>
where
    P: MetadataSourceProvider,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionLifecycleManager")
            .field("provider", &P::name())
            .field("config", &self.config)
            .field("state", &self.state)
            .finish()
    }
}

impl<P> Drop for ConnectionLifecycleManager<P>
where
    P: MetadataSourceProvider,
{
    fn drop(&mut self) {
        if self.source.is_some() {
            warn!(
                provider = P::name(),
                state = %self.state,
                "metadata source dropped without close, releasing session"
            );
        }
    }
}

/// Drops the configured metadata database on a short-lived connection.
///
/// Opens a session with `config`, resets `config.database` and closes the session. On a
/// failed reset an open transaction is rolled back and the session is released before
/// returning; if the rollback fails too, both errors are returned together.
///
/// The database no longer exists afterwards. Callers that need it again create it and
/// connect with a new manager.
pub async fn reset_metadata_database<P>(provider: P, config: ConnectionConfig) -> MetadataResult<()>
where
    P: MetadataSourceProvider,
{
    let database = config.database.clone();

    let mut manager = ConnectionLifecycleManager::new(provider);
    manager.initialize(config).await?;

    if let Err(err) = manager.reset_database(&database).await {
        let mut errors = vec![err];
        if manager.state() == LifecycleState::TransactionOpen {
            if let Err(rollback_err) = manager.rollback().await {
                errors.push(rollback_err);
            }
        }
        manager.cleanup();

        return Err(errors.into());
    }

    manager.close().await
}
