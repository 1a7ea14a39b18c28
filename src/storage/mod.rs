//! Shared stores used during supervised execution.
//!
//! - [`artifact`]: content-addressed observation cache, shared across sessions
//! - [`ledger`]: per-session record of performed actions
//! - [`context`]: write-only audit log

pub mod artifact;
pub mod context;
pub mod ledger;

pub use artifact::{ArtifactCache, CacheConfig, CacheStats, ContentKey};
pub use context::{
    ContextEntry, ContextKind, ContextStore, JsonlContextStore, MemoryContextStore,
    NullContextStore,
};
pub use ledger::{AccomplishmentLedger, AccomplishmentRecord, LedgerView};
