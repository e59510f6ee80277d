//! Configuration types and loading for metadata store connections.
//!
//! The [`shared`] module holds the connection configuration consumed by the `metastore`
//! crate, while [`load_config`] builds any deserializable configuration from layered
//! files and `APP_`-prefixed environment variables.

mod environment;
mod load;
pub mod shared;

pub use environment::Environment;
pub use load::{LoadConfigError, load_config, load_config_from};
