//! Backend seam for realtime auth + live data stores.
//!
//! The driver in `rtdb-core` adapts a callback-style backend into async
//! streams. This crate defines what such a backend looks like:
//!
//! - **[`Backend`]** / **[`AppHandle`]**: named app sessions, each owning
//!   one auth handle and one store handle.
//! - **[`StoreBackend`]**: hierarchical live store with `on` / `off`
//!   listener registration. Listeners are removed by structural match on
//!   the [`SnapshotListener`] handle returned from `on`.
//! - **[`AuthBackend`]**: auth observers (process-lifetime, no teardown)
//!   and one-shot lookups returning boxed futures.
//! - **[`memory`]**: a complete in-memory implementation of all of the
//!   above, used as the test double throughout the workspace.

pub mod backend;
pub mod error;
pub mod memory;
pub mod types;

pub use backend::{AppHandle, AuthBackend, AuthObserver, Backend, SnapshotListener, StoreBackend};
pub use error::Error;
pub use memory::{MemoryApp, MemoryAuth, MemoryBackend, MemoryStore};
pub use types::{AppOptions, AuthCredential, DataSnapshot, EventType, User, UserCredential};

/// Result alias used by every backend operation.
pub type Result<T> = std::result::Result<T, Error>;
