use std::path::PathBuf;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::shared::{ConnectionConfig, ConnectionMode, DEFAULT_MYSQL_PORT, ValidationError};

/// Transport requested by the caller when turning [`MetadataSourceFlags`] into a
/// [`ConnectionConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionType {
    Tcp,
    Socket,
}

/// Flag-shaped connection settings, named exactly as the external options.
///
/// Every field except `db_name` may be omitted. An empty `password` means that only
/// accounts without a password can connect.
#[derive(Debug, Clone, Deserialize)]
pub struct MetadataSourceFlags {
    /// Name of the MySQL database to connect to.
    pub db_name: String,
    /// MySQL login id.
    #[serde(default)]
    pub user_name: String,
    /// Password for `user_name`.
    #[serde(default)]
    pub password: Option<SecretString>,
    /// Host name or IP address of the MySQL server.
    #[serde(default)]
    pub host_name: String,
    /// TCP port the MySQL server accepts connections on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Unix socket file for connecting to the MySQL server.
    #[serde(default)]
    pub socket: String,
}

fn default_port() -> u16 {
    DEFAULT_MYSQL_PORT
}

impl MetadataSourceFlags {
    /// Builds a validated [`ConnectionConfig`] for an explicitly chosen transport.
    ///
    /// Only the flags of the chosen transport are used: `host_name` and `port` for
    /// [`ConnectionType::Tcp`], `socket` for [`ConnectionType::Socket`].
    pub fn into_connection_config(
        self,
        connection_type: ConnectionType,
    ) -> Result<ConnectionConfig, ValidationError> {
        let mode = match connection_type {
            ConnectionType::Tcp => ConnectionMode::Tcp {
                host: self.host_name,
                port: self.port,
            },
            ConnectionType::Socket => ConnectionMode::Socket {
                path: PathBuf::from(self.socket),
            },
        };

        let config = ConnectionConfig {
            database: self.db_name,
            user: self.user_name,
            password: self
                .password
                .filter(|password| !password.expose_secret().is_empty()),
            mode,
        };
        config.validate()?;

        Ok(config)
    }

    /// Infers the transport from which flags are set.
    ///
    /// Returns [`ValidationError::MissingConnectionMode`] when neither `host_name` nor
    /// `socket` is set and [`ValidationError::AmbiguousConnectionMode`] when both are.
    pub fn connection_type(&self) -> Result<ConnectionType, ValidationError> {
        match (self.host_name.is_empty(), self.socket.is_empty()) {
            (false, true) => Ok(ConnectionType::Tcp),
            (true, false) => Ok(ConnectionType::Socket),
            (true, true) => Err(ValidationError::MissingConnectionMode),
            (false, false) => Err(ValidationError::AmbiguousConnectionMode),
        }
    }
}

impl TryFrom<MetadataSourceFlags> for ConnectionConfig {
    type Error = ValidationError;

    fn try_from(flags: MetadataSourceFlags) -> Result<Self, Self::Error> {
        let connection_type = flags.connection_type()?;
        flags.into_connection_config(connection_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags() -> MetadataSourceFlags {
        MetadataSourceFlags {
            db_name: "md_test".to_string(),
            user_name: "root".to_string(),
            password: Some(SecretString::new(String::new())),
            host_name: String::new(),
            port: DEFAULT_MYSQL_PORT,
            socket: String::new(),
        }
    }

    #[test]
    fn infers_tcp_from_host_name() {
        let flags = MetadataSourceFlags {
            host_name: "127.0.0.1".to_string(),
            ..flags()
        };

        let config = ConnectionConfig::try_from(flags).unwrap();

        assert_eq!(config.database, "md_test");
        assert_eq!(config.user, "root");
        assert!(config.password.is_none());
        assert_eq!(
            config.mode,
            ConnectionMode::Tcp {
                host: "127.0.0.1".to_string(),
                port: 3306
            }
        );
    }

    #[test]
    fn infers_socket_from_socket_flag() {
        let flags = MetadataSourceFlags {
            socket: "/tmp/mysql.sock".to_string(),
            ..flags()
        };

        let config = ConnectionConfig::try_from(flags).unwrap();

        assert_eq!(
            config.mode,
            ConnectionMode::Socket {
                path: PathBuf::from("/tmp/mysql.sock")
            }
        );
    }

    #[test]
    fn neither_host_nor_socket_is_rejected() {
        let err = ConnectionConfig::try_from(flags()).unwrap_err();
        assert_eq!(err, ValidationError::MissingConnectionMode);
    }

    #[test]
    fn host_and_socket_together_are_rejected() {
        let flags = MetadataSourceFlags {
            host_name: "localhost".to_string(),
            socket: "/tmp/mysql.sock".to_string(),
            ..flags()
        };

        let err = ConnectionConfig::try_from(flags).unwrap_err();
        assert_eq!(err, ValidationError::AmbiguousConnectionMode);
    }

    #[test]
    fn explicit_type_ignores_flags_of_the_other_mode() {
        let flags = MetadataSourceFlags {
            host_name: "localhost".to_string(),
            port: 3307,
            socket: "/tmp/mysql.sock".to_string(),
            ..flags()
        };

        let config = flags
            .clone()
            .into_connection_config(ConnectionType::Tcp)
            .unwrap();
        assert_eq!(
            config.mode,
            ConnectionMode::Tcp {
                host: "localhost".to_string(),
                port: 3307
            }
        );

        let config = flags.into_connection_config(ConnectionType::Socket).unwrap();
        assert!(matches!(config.mode, ConnectionMode::Socket { .. }));
    }

    #[test]
    fn explicit_type_requires_its_flags() {
        assert_eq!(
            flags()
                .into_connection_config(ConnectionType::Tcp)
                .unwrap_err(),
            ValidationError::EmptyHostName
        );
        assert_eq!(
            flags()
                .into_connection_config(ConnectionType::Socket)
                .unwrap_err(),
            ValidationError::EmptySocketPath
        );
    }

    #[test]
    fn empty_database_name_is_rejected() {
        let flags = MetadataSourceFlags {
            db_name: String::new(),
            host_name: "localhost".to_string(),
            ..flags()
        };

        assert_eq!(
            ConnectionConfig::try_from(flags).unwrap_err(),
            ValidationError::EmptyDatabaseName
        );
    }

    #[test]
    fn non_empty_password_is_kept() {
        let flags = MetadataSourceFlags {
            host_name: "localhost".to_string(),
            password: Some(SecretString::new("secret".to_string())),
            ..flags()
        };

        let config = ConnectionConfig::try_from(flags).unwrap();
        assert_eq!(config.password.unwrap().expose_secret(), "secret");
    }
}
