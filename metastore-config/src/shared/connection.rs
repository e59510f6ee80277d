use std::fmt;
use std::path::PathBuf;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sqlx::mysql::MySqlConnectOptions;

use crate::shared::ValidationError;
use crate::shared::identifier::{is_reserved_word, starts_like_number};

/// Port used by MySQL servers when none is configured.
pub const DEFAULT_MYSQL_PORT: u16 = 3306;

/// Longest database name MySQL accepts.
pub const MAX_DATABASE_NAME_LEN: usize = 64;

/// Transport used to reach the MySQL server.
///
/// Exactly one transport is active for a [`ConnectionConfig`], and it cannot change after
/// construction.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnectionMode {
    /// TCP connection to `host:port`.
    Tcp {
        host: String,
        #[serde(default = "default_port")]
        port: u16,
    },
    /// Unix-domain socket connection.
    Socket { path: PathBuf },
}

fn default_port() -> u16 {
    DEFAULT_MYSQL_PORT
}

/// Configuration for connecting to a MySQL-backed metadata store.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ConnectionConfig {
    /// Name of the metadata database.
    pub database: String,
    /// Login id used to authenticate.
    pub user: String,
    /// Password for [`ConnectionConfig::user`]. [`None`] only allows accounts without a
    /// password. Redacted in debug output.
    #[serde(default)]
    pub password: Option<SecretString>,
    /// Transport used to reach the server.
    pub mode: ConnectionMode,
}

impl ConnectionConfig {
    /// Creates a configuration that connects over TCP.
    pub fn tcp(
        database: impl Into<String>,
        user: impl Into<String>,
        host: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            database: database.into(),
            user: user.into(),
            password: None,
            mode: ConnectionMode::Tcp {
                host: host.into(),
                port,
            },
        }
    }

    /// Creates a configuration that connects through a Unix-domain socket.
    pub fn socket(
        database: impl Into<String>,
        user: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            database: database.into(),
            user: user.into(),
            password: None,
            mode: ConnectionMode::Socket { path: path.into() },
        }
    }

    /// Sets the password. An empty password is treated as no password.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        let password = password.into();
        self.password = (!password.is_empty()).then(|| SecretString::new(password));
        self
    }

    /// Validates the [`ConnectionConfig`].
    ///
    /// Checks the database name with [`validate_database_name`] and then the fields of the
    /// active [`ConnectionMode`].
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_database_name(&self.database)?;

        match &self.mode {
            ConnectionMode::Tcp { host, port } => {
                if host.trim().is_empty() {
                    return Err(ValidationError::EmptyHostName);
                }
                if *port == 0 {
                    return Err(ValidationError::InvalidPort);
                }
            }
            ConnectionMode::Socket { path } => {
                if path.as_os_str().is_empty() {
                    return Err(ValidationError::EmptySocketPath);
                }
            }
        }

        Ok(())
    }

    /// Creates connection options that reach the server without selecting a database.
    ///
    /// Administrative statements such as dropping or creating the metadata database must
    /// run on a session that does not depend on that database existing.
    pub fn without_db(&self) -> MySqlConnectOptions {
        let mut options = MySqlConnectOptions::new().username(&self.user);

        options = match &self.mode {
            ConnectionMode::Tcp { host, port } => options.host(host).port(*port),
            ConnectionMode::Socket { path } => options.socket(path),
        };

        if let Some(password) = &self.password {
            options = options.password(password.expose_secret());
        }

        options
    }
}

impl fmt::Display for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.mode {
            ConnectionMode::Tcp { host, port } => {
                write!(f, "{}@{host}:{port}/{}", self.user, self.database)
            }
            ConnectionMode::Socket { path } => {
                write!(f, "{}@unix:{}/{}", self.user, path.display(), self.database)
            }
        }
    }
}

/// Checks that `name` can be spliced into a statement as an unquoted MySQL identifier.
///
/// Accepts ASCII letters, digits, `_` and `$`, up to [`MAX_DATABASE_NAME_LEN`] bytes.
/// Reserved words and names the server would lex as a number (`123`, `1e5`, `0x1f`) are
/// rejected too, since they only work quoted.
pub fn validate_database_name(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::EmptyDatabaseName);
    }

    let valid_chars = name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'$');
    if !valid_chars || name.len() > MAX_DATABASE_NAME_LEN {
        return Err(ValidationError::InvalidDatabaseName(name.to_owned()));
    }

    if is_reserved_word(name) || starts_like_number(name) {
        return Err(ValidationError::ReservedDatabaseName(name.to_owned()));
    }

    Ok(())
}
