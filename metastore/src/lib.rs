//! Connection lifecycle for the metadata store.
//!
//! This crate opens, resets and releases the single session the metadata store keeps with
//! its MySQL backing store. The [`lifecycle::ConnectionLifecycleManager`] owns the session
//! and drives it through its states. The backing store is reached through the
//! [`source::MetadataSource`] trait, with a MySQL implementation built on [`sqlx`].
//!
//! Connection settings live in the `metastore-config` crate.

pub mod error;
mod macros;
pub mod lifecycle;
pub mod source;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use lifecycle::{ConnectionLifecycleManager, LifecycleState, reset_metadata_database};
