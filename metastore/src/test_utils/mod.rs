//! Utilities for testing code built on the metadata store connection lifecycle.
//!
//! The [`memory`] re-exports give tests a backing store with a call journal, session
//! counting and fault injection, so lifecycle behavior can be checked without a server.
//! The [`database`] module creates isolated databases on a live MySQL server configured
//! through `MYSQL_TESTS_*` environment variables.

pub mod database;

pub mod memory {
    pub use crate::source::memory::{
        FaultConfig, FaultType, JournalEntry, MemoryMetadataSource, MemoryProvider, Operation,
    };
}
