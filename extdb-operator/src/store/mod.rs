//! Desired-state store abstraction.
//!
//! Reconcilers only see the narrow contract in [`traits`]: get, list, status
//! updates and finalizer edits. Whatever keeps the records (an API server, a
//! replicated log, a manifest file) sits behind it.
//!
//! # Architecture
//!
//! ```text
//! reconciler → Arc<dyn DesiredStateStore>
//!                     ↓
//!               store.get_database(&key).await
//!               store.update_database_status(&key, status).await
//!               store.add_database_finalizer(&key, FINALIZER).await
//! ```
//!
//! [`MemoryStore`] is the in-process implementation used by the binary and
//! the tests.

mod error;
mod event;
mod memory;
mod traits;

pub use error::{Result, StoreError};
pub use event::Event;
pub use memory::MemoryStore;
pub use traits::*;
