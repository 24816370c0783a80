//! In-memory cache tier.
//!
//! The store is the only shared mutable resource in the process: the sync
//! engine writes through `replace_all`/`apply_delta`, every other
//! component is a read-only consumer. Reads are lock-free snapshot loads;
//! a writer installs a complete new snapshot, so a reader never observes
//! a half-applied generation.

pub mod store;
pub mod token_mirror;

pub use store::{CacheStore, SnapshotStatus};
pub use token_mirror::TokenMirror;
