//! Consolidated identity view of one group.

use std::collections::HashSet;

use serde::Serialize;
use tracing::debug;

use crate::contact::{Contact, ContactId};
use crate::error::{ReconcileError, StoreError};
use crate::store::ContactStore;

use super::resolver::corrupt;

/// Deduplicated, primary-first projection of a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidatedIdentity {
    pub primary_contact_id: ContactId,
    pub emails: Vec<String>,
    pub phone_numbers: Vec<String>,
    pub secondary_contact_ids: Vec<ContactId>,
}

/// Insertion-ordered set of strings.
#[derive(Default)]
struct OrderedValues {
    seen: HashSet<String>,
    values: Vec<String>,
}

impl OrderedValues {
    fn push(&mut self, value: Option<&str>) {
        if let Some(v) = value {
            if self.seen.insert(v.to_string()) {
                self.values.push(v.to_string());
            }
        }
    }
}

pub struct ResponseBuilder<'a> {
    store: &'a dyn ContactStore,
}

impl<'a> ResponseBuilder<'a> {
    pub fn new(store: &'a dyn ContactStore) -> Self {
        Self { store }
    }

    /// Build the view from one group snapshot. If `primary_id` was absorbed
    /// by a merge, the view of the surviving group is returned instead.
    pub fn build_view(&self, primary_id: ContactId) -> Result<ConsolidatedIdentity, ReconcileError> {
        let mut visited = HashSet::new();
        let mut root_id = primary_id;
        loop {
            if !visited.insert(root_id) {
                return Err(corrupt(root_id, "cyclic linkage"));
            }
            let mut group = self.store.find_group(root_id)?;
            let Some(pos) = group.iter().position(|c| c.id == root_id) else {
                return Err(StoreError::NotFound(root_id).into());
            };
            let root = group.swap_remove(pos);
            if root.is_primary() {
                group.sort_by_key(Contact::seniority);
                return Ok(assemble(&root, &group));
            }
            root_id = root
                .linked_id
                .ok_or_else(|| corrupt(root.id, "secondary contact without a linked id"))?;
            debug!(from = root.id, to = root_id, "view follows merged primary");
        }
    }
}

fn assemble(primary: &Contact, secondaries: &[Contact]) -> ConsolidatedIdentity {
    let mut emails = OrderedValues::default();
    let mut phones = OrderedValues::default();
    emails.push(primary.email.as_deref());
    phones.push(primary.phone_number.as_deref());

    let mut secondary_contact_ids = Vec::with_capacity(secondaries.len());
    for sec in secondaries {
        emails.push(sec.email.as_deref());
        phones.push(sec.phone_number.as_deref());
        secondary_contact_ids.push(sec.id);
    }

    ConsolidatedIdentity {
        primary_contact_id: primary.id,
        emails: emails.values,
        phone_numbers: phones.values,
        secondary_contact_ids,
    }
}
