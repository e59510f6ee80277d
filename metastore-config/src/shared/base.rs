use thiserror::Error;

/// Connection configuration validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// The database name is empty.
    #[error("`db_name` cannot be empty")]
    EmptyDatabaseName,
    /// The database name cannot be used as an unquoted MySQL identifier.
    #[error(
        "`db_name` `{0}` must be an unquoted MySQL identifier: at most 64 bytes of ASCII letters, digits, `_` or `$`"
    )]
    InvalidDatabaseName(String),
    /// The database name would be read as a keyword or a number when left unquoted.
    #[error("`db_name` `{0}` is a reserved MySQL word or reads as a number when unquoted")]
    ReservedDatabaseName(String),
    /// TCP mode was selected without a host.
    #[error("`host_name` cannot be empty when connecting over TCP")]
    EmptyHostName,
    /// TCP mode was selected with port zero.
    #[error("`port` must be greater than zero when connecting over TCP")]
    InvalidPort,
    /// Unix-domain mode was selected without a socket path.
    #[error("`socket` cannot be empty when connecting over a Unix-domain socket")]
    EmptySocketPath,
    /// Neither a host nor a socket was provided.
    #[error("no connection mode configured: set either `host_name` or `socket`")]
    MissingConnectionMode,
    /// Both a host and a socket were provided.
    #[error("ambiguous connection mode: `host_name` and `socket` cannot both be set")]
    AmbiguousConnectionMode,
}
