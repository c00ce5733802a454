//! Port definitions (hexagonal architecture)
//!
//! Ports define the interfaces for external dependencies. The core domain
//! depends only on these traits, not on concrete implementations.

mod ledger;
mod store;

pub use ledger::{
    CreateAssignmentRequest, Credential, CredentialProvider, LedgerApi, RemoteAssignment,
};
pub use store::{AssignmentStore, EventStore};
