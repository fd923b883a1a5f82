//! Applied-state management.
//!
//! This module records the last successfully applied form of every managed
//! resource, keyed by logical name, plus a short apply history. Entries are
//! versioned: a writer states which version its change is based on and a
//! mismatch surfaces as a conflict instead of a lost update.

mod local;
mod lock;
mod memory;
mod store;
mod types;

pub use local::LocalStateStore;
pub use lock::{KeyLocks, LOCK_EXPIRY_SECS, LockInfo, generate_holder_id};
pub use memory::MemoryStateStore;
pub use store::StateStore;
pub use types::{
    AppliedResource, AppliedState, ApplyOperation, DeposedInstance, HistoryEntry, STATE_VERSION,
};
