//! Tracing setup shared by metadata store binaries and test suites.

pub mod tracing;
