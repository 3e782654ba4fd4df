//! State management for provisio.
//!
//! Every reconciled resource instance is persisted as exactly one
//! [`StateRecord`] keyed by its [`ResourceIdentity`]. Backends guarantee that
//! a saved record is either fully visible or not visible at all.

mod store;
mod local;
mod memory;
mod lock;
mod types;

pub use store::StateStore;
pub use local::{LocalStateStore, STATE_DIR};
pub use memory::MemoryStateStore;
pub use lock::{LockInfo, acquire_with_retry, generate_holder_id, LOCK_EXPIRY_SECS};
pub use types::{PropertyMap, ResourceIdentity, StateRecord, STATE_VERSION};
