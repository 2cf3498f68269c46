//! Bitmask ACL engine with SQLite persistence.
//!
//! A permission-granting authorization library: security and object
//! identities as value objects, ordered access control entries with
//! tracked mutation, a deny-first granting strategy with parent-ACL
//! inheritance, batched cached retrieval over an ancestor closure, and
//! diff-based incremental flushes.

pub mod cache;
pub mod db;
pub mod errors;
pub mod model;
pub mod mutable;
pub mod permission;
pub mod provider;
pub mod schema;
pub mod strategy;

mod hydrator;

// Re-export the types almost every embedder touches.
pub use cache::{AclCache, InMemoryAclCache};
pub use errors::{AclError, AclResult};
pub use model::{Acl, AclRef, AclSnapshot, DomainObject, Entry, ObjectIdentity, SecurityIdentity, StrategyKind};
pub use mutable::MutableAclProvider;
pub use provider::AclProvider;
pub use strategy::PermissionGrantingStrategy;
