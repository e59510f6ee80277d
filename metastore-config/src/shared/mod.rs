//! Shared configuration types for metadata store connections.

mod base;
mod connection;
mod flags;
mod identifier;

pub use base::ValidationError;
pub use connection::{
    ConnectionConfig, ConnectionMode, DEFAULT_MYSQL_PORT, MAX_DATABASE_NAME_LEN,
    validate_database_name,
};
pub use flags::{ConnectionType, MetadataSourceFlags};
