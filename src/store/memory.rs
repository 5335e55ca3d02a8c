//! `memory` backend — process-local contact table.
//!
//! All rows live behind one mutex, so every trait method (and in particular
//! [`merge_groups`](ContactStore::merge_groups)) is a single critical section.
//! Data is discarded when the process exits.

use std::sync::{Mutex, MutexGuard};

use chrono::Utc;

use crate::contact::{Contact, ContactId, LinkPrecedence};
use crate::error::StoreError;

use super::ContactStore;

#[derive(Default)]
struct Table {
    rows: Vec<Contact>,
    next_id: ContactId,
}

impl Table {
    fn insert(
        &mut self,
        email: Option<&str>,
        phone: Option<&str>,
        linked_id: Option<ContactId>,
        precedence: LinkPrecedence,
    ) -> Contact {
        self.next_id += 1;
        let now = Utc::now();
        let contact = Contact {
            id: self.next_id,
            email: email.map(str::to_string),
            phone_number: phone.map(str::to_string),
            linked_id,
            link_precedence: precedence,
            created_at: now,
            updated_at: now,
        };
        self.rows.push(contact.clone());
        contact
    }

    fn demote(&mut self, contact_id: ContactId, new_primary_id: ContactId) -> Result<(), StoreError> {
        let row = self
            .rows
            .iter_mut()
            .find(|c| c.id == contact_id)
            .ok_or(StoreError::NotFound(contact_id))?;
        row.link_precedence = LinkPrecedence::Secondary;
        row.linked_id = Some(new_primary_id);
        row.updated_at = Utc::now();
        Ok(())
    }

    fn relink(&mut self, old_primary_id: ContactId, new_primary_id: ContactId) -> usize {
        let now = Utc::now();
        let mut moved = 0;
        for row in self.rows.iter_mut().filter(|c| c.linked_id == Some(old_primary_id)) {
            row.linked_id = Some(new_primary_id);
            row.updated_at = now;
            moved += 1;
        }
        moved
    }
}

/// In-memory [`ContactStore`].
#[derive(Default)]
pub struct MemoryContactStore {
    table: Mutex<Table>,
}

impl MemoryContactStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Table>, StoreError> {
        self.table.lock().map_err(|_| StoreError::LockPoisoned)
    }

    /// Test hook: overwrite linkage without any invariant checks.
    #[cfg(test)]
    pub(crate) fn force_link(
        &self,
        contact_id: ContactId,
        linked_id: Option<ContactId>,
        precedence: LinkPrecedence,
    ) {
        let mut table = self.table.lock().unwrap();
        let row = table.rows.iter_mut().find(|c| c.id == contact_id).unwrap();
        row.linked_id = linked_id;
        row.link_precedence = precedence;
    }
}

fn sorted(mut rows: Vec<Contact>) -> Vec<Contact> {
    rows.sort_by_key(Contact::seniority);
    rows
}

impl ContactStore for MemoryContactStore {
    fn backend(&self) -> &str {
        "memory"
    }

    fn find_exact_matches(
        &self,
        email: Option<&str>,
        phone: Option<&str>,
    ) -> Result<Vec<Contact>, StoreError> {
        let table = self.lock()?;
        let rows = table
            .rows
            .iter()
            .filter(|c| {
                let email_hit = email.is_some() && c.email.as_deref() == email;
                let phone_hit = phone.is_some() && c.phone_number.as_deref() == phone;
                email_hit || phone_hit
            })
            .cloned()
            .collect();
        Ok(sorted(rows))
    }

    fn find_by_id(&self, id: ContactId) -> Result<Option<Contact>, StoreError> {
        Ok(self.lock()?.rows.iter().find(|c| c.id == id).cloned())
    }

    fn find_secondaries_of(&self, primary_id: ContactId) -> Result<Vec<Contact>, StoreError> {
        let table = self.lock()?;
        let rows = table
            .rows
            .iter()
            .filter(|c| c.linked_id == Some(primary_id))
            .cloned()
            .collect();
        Ok(sorted(rows))
    }

    fn find_group(&self, primary_id: ContactId) -> Result<Vec<Contact>, StoreError> {
        let table = self.lock()?;
        Ok(table
            .rows
            .iter()
            .filter(|c| c.id == primary_id || c.linked_id == Some(primary_id))
            .cloned()
            .collect())
    }

    fn create_primary(
        &self,
        email: Option<&str>,
        phone: Option<&str>,
    ) -> Result<Contact, StoreError> {
        Ok(self.lock()?.insert(email, phone, None, LinkPrecedence::Primary))
    }

    fn create_secondary(
        &self,
        email: Option<&str>,
        phone: Option<&str>,
        primary_id: ContactId,
    ) -> Result<Contact, StoreError> {
        Ok(self
            .lock()?
            .insert(email, phone, Some(primary_id), LinkPrecedence::Secondary))
    }

    fn demote_to_secondary(
        &self,
        contact_id: ContactId,
        new_primary_id: ContactId,
    ) -> Result<(), StoreError> {
        self.lock()?.demote(contact_id, new_primary_id)
    }

    fn relink_children(
        &self,
        old_primary_id: ContactId,
        new_primary_id: ContactId,
    ) -> Result<usize, StoreError> {
        Ok(self.lock()?.relink(old_primary_id, new_primary_id))
    }

    fn merge_groups(
        &self,
        survivor_id: ContactId,
        absorbed: &[ContactId],
    ) -> Result<(), StoreError> {
        let mut table = self.lock()?;
        // Validate up front so a missing id leaves the table untouched.
        for id in absorbed {
            if !table.rows.iter().any(|c| c.id == *id) {
                return Err(StoreError::NotFound(*id));
            }
        }
        for &id in absorbed {
            table.demote(id, survivor_id)?;
            table.relink(id, survivor_id);
        }
        Ok(())
    }

    fn count(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.rows.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonic() {
        let store = MemoryContactStore::new();
        let a = store.create_primary(Some("a@x.com"), None).unwrap();
        let b = store.create_primary(None, Some("1")).unwrap();
        assert!(b.id > a.id);
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn exact_matches_are_or_of_both_keys() {
        let store = MemoryContactStore::new();
        let a = store.create_primary(Some("a@x.com"), Some("1")).unwrap();
        let b = store.create_primary(Some("b@x.com"), Some("2")).unwrap();
        store.create_primary(Some("c@x.com"), Some("3")).unwrap();

        let hits = store.find_exact_matches(Some("a@x.com"), Some("2")).unwrap();
        let ids: Vec<_> = hits.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![a.id, b.id]);

        assert!(store.find_exact_matches(None, Some("9")).unwrap().is_empty());
    }

    #[test]
    fn absent_key_does_not_match_absent_field() {
        let store = MemoryContactStore::new();
        store.create_primary(Some("a@x.com"), None).unwrap();
        assert!(store.find_exact_matches(None, Some("1")).unwrap().is_empty());
    }

    #[test]
    fn merge_groups_demotes_and_relinks() {
        let store = MemoryContactStore::new();
        let p1 = store.create_primary(Some("a"), Some("1")).unwrap();
        let p2 = store.create_primary(Some("b"), Some("2")).unwrap();
        let s = store.create_secondary(Some("c"), Some("2"), p2.id).unwrap();

        store.merge_groups(p1.id, &[p2.id]).unwrap();

        let p2 = store.find_by_id(p2.id).unwrap().unwrap();
        assert_eq!(p2.link_precedence, LinkPrecedence::Secondary);
        assert_eq!(p2.linked_id, Some(p1.id));
        let s = store.find_by_id(s.id).unwrap().unwrap();
        assert_eq!(s.linked_id, Some(p1.id));
        assert_eq!(store.find_secondaries_of(p2.id).unwrap().len(), 0);
        assert_eq!(store.find_group(p1.id).unwrap().len(), 3);
    }

    #[test]
    fn merge_with_unknown_id_changes_nothing() {
        let store = MemoryContactStore::new();
        let p1 = store.create_primary(Some("a"), None).unwrap();
        let p2 = store.create_primary(Some("b"), None).unwrap();
        let err = store.merge_groups(p1.id, &[p2.id, 99]).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(99)));
        assert!(store.find_by_id(p2.id).unwrap().unwrap().is_primary());
    }
}
