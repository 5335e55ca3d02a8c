//! Contact persistence.
//!
//! Backends implement [`ContactStore`] with blocking I/O; the async
//! [`IdentityService`](crate::service::IdentityService) runs every call on
//! `spawn_blocking`.
//!
//! Ordered queries return rows ascending by `(created_at, id)` so that
//! seniority tiebreaks downstream are deterministic.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryContactStore;
pub use sqlite::SqliteContactStore;

use std::fs;
use std::sync::Arc;

use crate::config::{StoreBackend, StoreConfig};
use crate::contact::{Contact, ContactId};
use crate::error::StoreError;

/// Pluggable contact store.
pub trait ContactStore: Send + Sync {
    /// Backend name (e.g. `"sqlite"`).
    fn backend(&self) -> &str;

    /// Every contact whose email equals `email` OR whose phone equals `phone`.
    fn find_exact_matches(
        &self,
        email: Option<&str>,
        phone: Option<&str>,
    ) -> Result<Vec<Contact>, StoreError>;

    fn find_by_id(&self, id: ContactId) -> Result<Option<Contact>, StoreError>;

    fn find_secondaries_of(&self, primary_id: ContactId) -> Result<Vec<Contact>, StoreError>;

    /// The row `primary_id` plus every row linked to it, in no particular
    /// order. Taken as one consistent read: a concurrent merge is either
    /// wholly visible or not at all.
    fn find_group(&self, primary_id: ContactId) -> Result<Vec<Contact>, StoreError>;

    fn create_primary(
        &self,
        email: Option<&str>,
        phone: Option<&str>,
    ) -> Result<Contact, StoreError>;

    fn create_secondary(
        &self,
        email: Option<&str>,
        phone: Option<&str>,
        primary_id: ContactId,
    ) -> Result<Contact, StoreError>;

    fn demote_to_secondary(
        &self,
        contact_id: ContactId,
        new_primary_id: ContactId,
    ) -> Result<(), StoreError>;

    /// Re-point every contact linked to `old_primary_id`; returns the number moved.
    fn relink_children(
        &self,
        old_primary_id: ContactId,
        new_primary_id: ContactId,
    ) -> Result<usize, StoreError>;

    /// Demote each of `absorbed` under `survivor_id` and relink their
    /// secondaries, as one atomic unit.
    fn merge_groups(
        &self,
        survivor_id: ContactId,
        absorbed: &[ContactId],
    ) -> Result<(), StoreError>;

    fn count(&self) -> Result<usize, StoreError>;
}

/// Open the backend selected by `config`, creating the database directory if needed.
pub fn open(config: &StoreConfig) -> Result<Arc<dyn ContactStore>, StoreError> {
    match config.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryContactStore::new())),
        StoreBackend::Sqlite => {
            if let Some(parent) = config.db_path.parent() {
                fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Backend(format!("cannot create {}: {e}", parent.display()))
                })?;
            }
            Ok(Arc::new(SqliteContactStore::open(&config.db_path, config.timeout)?))
        }
    }
}
