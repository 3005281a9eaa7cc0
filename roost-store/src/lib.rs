//! roost-store: the tenant-scoped data boundary for Roost.
//!
//! Business feature code reads and writes tenant-owned records through
//! exactly one gateway, the [`ScopedClient`]. The client does not
//! implement authorization - the underlying store's row policies do -
//! but it enforces write attribution, refuses to run unscoped, never
//! duplicates the store's tenant filtering on reads, and classifies
//! every failure before it reaches a caller.

pub mod membership;
pub mod memory;
pub mod scoped;
pub mod store;

pub use membership::{MembershipRepository, StoreMembershipRepository};
pub use memory::MemoryStore;
pub use scoped::{ObserverId, Scope, ScopedClient};
pub use store::{RowStore, StoreAuth, StoreResult};
