//! Folds several groups into the most senior one.

use tracing::info;

use crate::contact::{Contact, ContactId};
use crate::error::ReconcileError;
use crate::store::ContactStore;

/// Which primary survives and which primaries get demoted under it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergePlan {
    pub survivor: Contact,
    pub absorbed: Vec<Contact>,
}

impl MergePlan {
    /// Plan a merge of `primaries`, or `None` if fewer than two distinct ones.
    ///
    /// The survivor is the earliest by `(created_at, id)`.
    pub fn from_primaries(mut primaries: Vec<Contact>) -> Option<Self> {
        primaries.sort_by_key(Contact::seniority);
        primaries.dedup_by_key(|c| c.id);
        if primaries.len() < 2 {
            return None;
        }
        let survivor = primaries.remove(0);
        Some(Self {
            survivor,
            absorbed: primaries,
        })
    }

    pub fn absorbed_ids(&self) -> Vec<ContactId> {
        self.absorbed.iter().map(|c| c.id).collect()
    }
}

pub struct GroupMerger<'a> {
    store: &'a dyn ContactStore,
}

impl<'a> GroupMerger<'a> {
    pub fn new(store: &'a dyn ContactStore) -> Self {
        Self { store }
    }

    /// Apply `plan` as a single atomic store operation; returns the survivor.
    pub fn apply(&self, plan: MergePlan) -> Result<Contact, ReconcileError> {
        let absorbed = plan.absorbed_ids();
        self.store.merge_groups(plan.survivor.id, &absorbed)?;
        info!(
            survivor = plan.survivor.id,
            absorbed = ?absorbed,
            "contact groups merged"
        );
        Ok(plan.survivor)
    }
}
