//! Core domain entities
//!
//! All business entities are defined here. These are pure data structures
//! with validation logic - no I/O or external dependencies.

pub mod amount;
mod assignment;
mod event;
mod provider;
pub mod result;
pub mod rule;
mod user;

pub use amount::{canonical_amount, normalize_amount, seed_amount};
pub use assignment::Assignment;
pub use event::{
    DedupSeed, EventPayload, EventType, NormalizedEvent, RawNotification, RawPayload,
    DEDUP_BODY_PREFIX_CHARS,
};
pub use provider::Provider;
pub use rule::{AmountCodeRule, PatternRule, ReceivedFromRule, RuleMatch, SymbolAmountRule};
pub use user::User;
