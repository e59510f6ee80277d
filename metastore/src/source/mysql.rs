use std::num::NonZeroI32;

use metastore_config::shared::ConnectionConfig;
use sqlx::{Column, Connection, Executor, MySqlConnection, Row, mysql::MySqlRow};
use tracing::{debug, info};

use crate::bail;
use crate::error::{ErrorKind, MetadataError, MetadataResult};
use crate::metastore_error;
use crate::source::{MetadataSource, MetadataSourceProvider, RecordSet};

const START_TRANSACTION: &str = "START TRANSACTION";
const COMMIT: &str = "COMMIT";
const ROLLBACK: &str = "ROLLBACK";

/// Creates [`MySqlMetadataSource`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlProvider;

impl MetadataSourceProvider for MySqlProvider {
    type Source = MySqlMetadataSource;

    fn name() -> &'static str {
        "mysql"
    }

    fn create_source(&self, config: &ConnectionConfig) -> Self::Source {
        MySqlMetadataSource::new(config.clone())
    }
}

/// A single MySQL session backed by a [`MySqlConnection`].
///
/// The session is opened without selecting a database, so administrative statements
/// such as `DROP DATABASE` work whether or not the metadata database exists. Statements
/// run over the text protocol and transactions are driven with explicit
/// `START TRANSACTION`, `COMMIT` and `ROLLBACK` statements.
#[derive(Debug)]
pub struct MySqlMetadataSource {
    config: ConnectionConfig,
    connection: Option<MySqlConnection>,
    in_transaction: bool,
    server_version: Option<NonZeroI32>,
}

impl MySqlMetadataSource {
    /// Creates an unconnected source for `config`.
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            connection: None,
            in_transaction: false,
            server_version: None,
        }
    }

    /// Returns the configuration this source connects with.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Returns the server version reported at connect time, as
    /// `MAJOR * 10000 + MINOR * 100 + PATCH`.
    pub fn server_version(&self) -> Option<NonZeroI32> {
        self.server_version
    }

    /// Returns `true` while the session is open.
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Returns `true` while a transaction is open.
    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    fn connection(&mut self) -> MetadataResult<&mut MySqlConnection> {
        self.connection.as_mut().ok_or_else(|| {
            metastore_error!(ErrorKind::InvalidState, "MySQL session is not connected")
        })
    }

    fn ensure_transaction(&self) -> MetadataResult<()> {
        if !self.in_transaction {
            bail!(
                ErrorKind::InvalidState,
                "No MySQL transaction is open",
                "begin a transaction before executing statements or ending it"
            );
        }

        Ok(())
    }

    async fn run_transaction_statement(
        &mut self,
        statement: &'static str,
        description: &'static str,
    ) -> MetadataResult<()> {
        // A plain `&str` has no arguments, so it runs over the text protocol.
        self.connection()?
            .execute(statement)
            .await
            .map_err(driver_error(ErrorKind::TransactionError, description))?;

        Ok(())
    }
}

impl MetadataSource for MySqlMetadataSource {
    async fn connect(&mut self) -> MetadataResult<()> {
        if self.connection.is_some() {
            bail!(ErrorKind::InvalidState, "MySQL session is already connected");
        }

        let mut connection = MySqlConnection::connect_with(&self.config.without_db())
            .await
            .map_err(driver_error(
                ErrorKind::ConnectionError,
                "Failed to connect to MySQL",
            ))?;

        let version_row: (String,) = sqlx::query_as("SELECT VERSION()")
            .fetch_one(&mut connection)
            .await
            .map_err(driver_error(
                ErrorKind::ConnectionError,
                "Failed to read the MySQL server version",
            ))?;
        self.server_version = extract_server_version(&version_row.0);

        info!(
            endpoint = %self.config,
            server_version = %version_row.0,
            "connected to mysql"
        );

        self.connection = Some(connection);

        Ok(())
    }

    async fn begin(&mut self) -> MetadataResult<()> {
        if self.in_transaction {
            bail!(ErrorKind::InvalidState, "A MySQL transaction is already open");
        }

        self.run_transaction_statement(START_TRANSACTION, "Failed to start MySQL transaction")
            .await?;
        self.in_transaction = true;

        Ok(())
    }

    async fn execute_query(&mut self, statement: &str) -> MetadataResult<RecordSet> {
        self.ensure_transaction()?;

        debug!(%statement, "executing mysql statement");

        let rows = self
            .connection()?
            .fetch_all(statement)
            .await
            .map_err(driver_error(
                ErrorKind::TransactionError,
                "MySQL statement failed",
            ))?;

        into_record_set(&rows)
    }

    async fn commit(&mut self) -> MetadataResult<()> {
        self.ensure_transaction()?;

        self.run_transaction_statement(COMMIT, "Failed to commit MySQL transaction")
            .await?;
        self.in_transaction = false;

        Ok(())
    }

    async fn rollback(&mut self) -> MetadataResult<()> {
        self.ensure_transaction()?;

        self.run_transaction_statement(ROLLBACK, "Failed to roll back MySQL transaction")
            .await?;
        self.in_transaction = false;

        Ok(())
    }

    async fn close(&mut self) -> MetadataResult<()> {
        let Some(connection) = self.connection.take() else {
            bail!(ErrorKind::InvalidState, "MySQL session is not connected");
        };
        self.in_transaction = false;

        connection.close().await.map_err(driver_error(
            ErrorKind::ConnectionError,
            "Failed to close MySQL session",
        ))?;

        info!(endpoint = %self.config, "closed mysql session");

        Ok(())
    }
}

impl Drop for MySqlMetadataSource {
    fn drop(&mut self) {
        if self.connection.is_some() {
            debug!(endpoint = %self.config, "dropping open mysql session");
        }
    }
}

/// Maps a [`sqlx::Error`] to the [`ErrorKind`] of the lifecycle step that failed.
fn driver_error(
    kind: ErrorKind,
    description: &'static str,
) -> impl FnOnce(sqlx::Error) -> MetadataError {
    move |err| metastore_error!(kind, description, err, source = err)
}

/// Converts text-protocol rows into a [`RecordSet`].
fn into_record_set(rows: &[MySqlRow]) -> MetadataResult<RecordSet> {
    let Some(first) = rows.first() else {
        return Ok(RecordSet::default());
    };

    let column_names = first
        .columns()
        .iter()
        .map(|column| column.name().to_string())
        .collect();

    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        let mut record = Vec::with_capacity(row.len());
        for index in 0..row.len() {
            // Text protocol values are strings regardless of their SQL type.
            let value = row
                .try_get_unchecked::<Option<String>, _>(index)
                .map_err(driver_error(
                    ErrorKind::TransactionError,
                    "Failed to decode MySQL value as text",
                ))?;
            record.push(value);
        }
        records.push(record);
    }

    Ok(RecordSet {
        column_names,
        records,
    })
}

/// Extracts the MySQL server version from a version string.
///
/// Parses strings like `8.0.35` or `5.7.44-log` into `MAJOR * 10000 + MINOR * 100 + PATCH`,
/// so MySQL 8.0.35 becomes 80035. Returns [`None`] when nothing parseable remains or the
/// encoded version does not fit in an `i32`.
pub fn extract_server_version(server_version_str: impl AsRef<str>) -> Option<NonZeroI32> {
    let version_part = server_version_str
        .as_ref()
        .split_whitespace()
        .next()
        .unwrap_or("0.0.0");
    let version_part = version_part.split('-').next().unwrap_or("0.0.0");

    let mut components = version_part
        .split('.')
        .map(|component| component.parse::<i32>().unwrap_or(0));
    let major = components.next().unwrap_or(0);
    let minor = components.next().unwrap_or(0);
    let patch = components.next().unwrap_or(0);

    let version = major
        .checked_mul(10000)?
        .checked_add(minor.checked_mul(100)?)?
        .checked_add(patch)?;

    NonZeroI32::new(version)
}
