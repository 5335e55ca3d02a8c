//! Resolves any contact to the primary at the root of its group.

use std::collections::HashSet;

use tracing::error;

use crate::contact::{Contact, ContactId};
use crate::error::ReconcileError;
use crate::store::ContactStore;

pub struct PrimaryResolver<'a> {
    store: &'a dyn ContactStore,
}

impl<'a> PrimaryResolver<'a> {
    pub fn new(store: &'a dyn ContactStore) -> Self {
        Self { store }
    }

    /// Follow `linked_id` until a primary is reached.
    ///
    /// Linkage is flat after every merge, so this is one hop in practice;
    /// longer chains are still followed. Cycles and dangling links fail with
    /// [`ReconcileError::CorruptGroup`].
    pub fn resolve(&self, contact: Contact) -> Result<Contact, ReconcileError> {
        let mut visited = HashSet::new();
        let mut current = contact;

        while !current.is_primary() {
            if !visited.insert(current.id) {
                return Err(corrupt(current.id, "cyclic linkage"));
            }
            let Some(next_id) = current.linked_id else {
                return Err(corrupt(current.id, "secondary contact without a linked id"));
            };
            current = match self.store.find_by_id(next_id)? {
                Some(next) => next,
                None => {
                    return Err(corrupt(
                        current.id,
                        &format!("linked contact {next_id} does not exist"),
                    ));
                }
            };
        }
        Ok(current)
    }
}

pub(super) fn corrupt(contact_id: ContactId, reason: &str) -> ReconcileError {
    error!(contact_id, reason, "corrupt contact group");
    ReconcileError::CorruptGroup {
        contact_id,
        reason: reason.to_string(),
    }
}
