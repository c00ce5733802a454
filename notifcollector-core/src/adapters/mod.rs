//! Adapter implementations
//!
//! Adapters implement the port traits with concrete technologies:
//! - DuckDB for EventStore and AssignmentStore
//! - reqwest HTTP client for LedgerApi
//! - settings.json for CredentialProvider
//! - Mock ledger HTTP server for testing

pub mod duckdb;
pub mod http_ledger;
pub mod settings_credentials;

#[cfg(test)]
pub mod ledger_mock;
