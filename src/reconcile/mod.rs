//! Reconciliation engine.
//!
//! [`Reconciler::identify`] is the synchronous match → resolve → merge →
//! extend pipeline over a [`ContactStore`]. It performs no locking of its
//! own; [`IdentityService`](crate::service::IdentityService) serializes calls.

pub mod merger;
pub mod resolver;
pub mod view;

pub use merger::{GroupMerger, MergePlan};
pub use resolver::PrimaryResolver;
pub use view::{ConsolidatedIdentity, ResponseBuilder};

use std::collections::{BTreeMap, HashSet};

use tracing::{debug, info};

use crate::contact::{Contact, ContactId, Submission};
use crate::error::{ReconcileError, StoreError};
use crate::store::ContactStore;

pub struct Reconciler<'a> {
    store: &'a dyn ContactStore,
}

impl<'a> Reconciler<'a> {
    pub fn new(store: &'a dyn ContactStore) -> Self {
        Self { store }
    }

    pub fn identify(&self, submission: &Submission) -> Result<ConsolidatedIdentity, ReconcileError> {
        let matches = self
            .store
            .find_exact_matches(submission.email(), submission.phone())?;
        debug!(matches = matches.len(), "exact matches found");

        if matches.is_empty() {
            let contact = self
                .store
                .create_primary(submission.email(), submission.phone())?;
            info!(contact_id = contact.id, "new primary contact");
            return self.view(contact.id);
        }

        let primaries = self.distinct_primaries(matches)?;

        let primary = match MergePlan::from_primaries(primaries.clone()) {
            Some(plan) => GroupMerger::new(self.store).apply(plan)?,
            None => {
                let primary = primaries.into_iter().next().ok_or_else(|| {
                    StoreError::Backend("matches resolved to no primary".into())
                })?;
                self.extend_if_new(&primary, submission)?;
                primary
            }
        };

        self.view(primary.id)
    }

    /// Resolve every match and keep one entry per primary.
    fn distinct_primaries(&self, matches: Vec<Contact>) -> Result<Vec<Contact>, ReconcileError> {
        let resolver = PrimaryResolver::new(self.store);
        let mut primaries = BTreeMap::new();
        for contact in matches {
            if contact.is_primary() {
                primaries.entry(contact.id).or_insert(contact);
                continue;
            }
            let primary = resolver.resolve(contact)?;
            primaries.entry(primary.id).or_insert(primary);
        }
        Ok(primaries.into_values().collect())
    }

    /// Attach a secondary carrying the full submission if it adds an unseen value.
    fn extend_if_new(&self, primary: &Contact, submission: &Submission) -> Result<(), ReconcileError> {
        let group = self.store.find_group(primary.id)?;
        let emails: HashSet<&str> = group.iter().filter_map(|c| c.email.as_deref()).collect();
        let phones: HashSet<&str> = group
            .iter()
            .filter_map(|c| c.phone_number.as_deref())
            .collect();

        let new_email = submission.email().is_some_and(|e| !emails.contains(e));
        let new_phone = submission.phone().is_some_and(|p| !phones.contains(p));
        if !(new_email || new_phone) {
            return Ok(());
        }

        let contact = self.store.create_secondary(
            submission.email(),
            submission.phone(),
            primary.id,
        )?;
        info!(
            contact_id = contact.id,
            primary_id = primary.id,
            new_email,
            new_phone,
            "new secondary contact"
        );
        Ok(())
    }

    pub fn view(&self, primary_id: ContactId) -> Result<ConsolidatedIdentity, ReconcileError> {
        ResponseBuilder::new(self.store).build_view(primary_id)
    }
}
