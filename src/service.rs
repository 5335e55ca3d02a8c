//! [`IdentityService`] — async front of the reconciliation engine.
//!
//! Store backends are blocking, so every call runs on
//! `tokio::task::spawn_blocking`. `identify` calls are serialized behind one
//! async gate so that match → decide → write never interleaves between two
//! submissions. Every call is bounded by a timeout; a blocking task that
//! outlives it still runs to completion (or rolls back) on its own.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::warn;

use crate::contact::{ContactId, Submission};
use crate::error::ReconcileError;
use crate::reconcile::{ConsolidatedIdentity, Reconciler};
use crate::store::ContactStore;

/// Cheaply cloneable (`Arc`-backed) handle to the engine.
#[derive(Clone)]
pub struct IdentityService {
    store: Arc<dyn ContactStore>,
    gate: Arc<Mutex<()>>,
    timeout: Duration,
}

impl IdentityService {
    pub fn new(store: Arc<dyn ContactStore>, timeout: Duration) -> Self {
        Self {
            store,
            gate: Arc::new(Mutex::new(())),
            timeout,
        }
    }

    pub fn store(&self) -> &Arc<dyn ContactStore> {
        &self.store
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Reconcile `submission` using the configured timeout.
    pub async fn identify(&self, submission: Submission) -> Result<ConsolidatedIdentity, ReconcileError> {
        self.identify_within(submission, self.timeout).await
    }

    /// Reconcile `submission`, failing with [`ReconcileError::StoreTimeout`]
    /// if waiting for the gate plus store work exceeds `timeout`.
    pub async fn identify_within(
        &self,
        submission: Submission,
        timeout: Duration,
    ) -> Result<ConsolidatedIdentity, ReconcileError> {
        let store = self.store.clone();
        let gate = self.gate.clone();

        let work = async move {
            let guard = gate.lock_owned().await;
            tokio::task::spawn_blocking(move || {
                // Held until the blocking work finishes, even if the caller gave up.
                let _guard = guard;
                Reconciler::new(store.as_ref()).identify(&submission)
            })
            .await
            .map_err(|e| join_error("identify", e))?
        };

        match tokio::time::timeout(timeout, work).await {
            Ok(result) => result,
            Err(_) => {
                warn!(?timeout, "identify timed out");
                Err(ReconcileError::StoreTimeout(timeout))
            }
        }
    }

    /// Consolidated view of the group rooted at `primary_id` (read-only).
    pub async fn view(&self, primary_id: ContactId) -> Result<ConsolidatedIdentity, ReconcileError> {
        let store = self.store.clone();
        let work = tokio::task::spawn_blocking(move || Reconciler::new(store.as_ref()).view(primary_id));
        match tokio::time::timeout(self.timeout, work).await {
            Ok(joined) => joined.map_err(|e| join_error("view", e))?,
            Err(_) => Err(ReconcileError::StoreTimeout(self.timeout)),
        }
    }
}

fn join_error(op: &str, e: tokio::task::JoinError) -> ReconcileError {
    crate::error::StoreError::Backend(format!("{op} join: {e}")).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contact::Contact;
    use crate::error::StoreError;
    use crate::store::MemoryContactStore;

    /// Memory store whose match lookup blocks for `delay`.
    struct SlowStore {
        inner: MemoryContactStore,
        delay: Duration,
    }

    impl ContactStore for SlowStore {
        fn backend(&self) -> &str {
            "slow"
        }
        fn find_exact_matches(
            &self,
            email: Option<&str>,
            phone: Option<&str>,
        ) -> Result<Vec<Contact>, StoreError> {
            std::thread::sleep(self.delay);
            self.inner.find_exact_matches(email, phone)
        }
        fn find_by_id(&self, id: ContactId) -> Result<Option<Contact>, StoreError> {
            self.inner.find_by_id(id)
        }
        fn find_secondaries_of(&self, primary_id: ContactId) -> Result<Vec<Contact>, StoreError> {
            self.inner.find_secondaries_of(primary_id)
        }
        fn find_group(&self, primary_id: ContactId) -> Result<Vec<Contact>, StoreError> {
            self.inner.find_group(primary_id)
        }
        fn create_primary(&self, email: Option<&str>, phone: Option<&str>) -> Result<Contact, StoreError> {
            self.inner.create_primary(email, phone)
        }
        fn create_secondary(
            &self,
            email: Option<&str>,
            phone: Option<&str>,
            primary_id: ContactId,
        ) -> Result<Contact, StoreError> {
            self.inner.create_secondary(email, phone, primary_id)
        }
        fn demote_to_secondary(&self, contact_id: ContactId, new_primary_id: ContactId) -> Result<(), StoreError> {
            self.inner.demote_to_secondary(contact_id, new_primary_id)
        }
        fn relink_children(&self, old_primary_id: ContactId, new_primary_id: ContactId) -> Result<usize, StoreError> {
            self.inner.relink_children(old_primary_id, new_primary_id)
        }
        fn merge_groups(&self, survivor_id: ContactId, absorbed: &[ContactId]) -> Result<(), StoreError> {
            self.inner.merge_groups(survivor_id, absorbed)
        }
        fn count(&self) -> Result<usize, StoreError> {
            self.inner.count()
        }
    }

    fn service() -> IdentityService {
        IdentityService::new(Arc::new(MemoryContactStore::new()), Duration::from_secs(5))
    }

    fn sub(email: &str, phone: &str) -> Submission {
        Submission::new(Some(email.into()), Some(phone.into())).unwrap()
    }

    #[tokio::test]
    async fn identify_and_view_agree() {
        let svc = service();
        let created = svc.identify(sub("a@x.com", "1")).await.unwrap();
        let viewed = svc.view(created.primary_contact_id).await.unwrap();
        assert_eq!(created, viewed);
    }

    #[tokio::test]
    async fn timeout_while_gate_is_held() {
        let svc = service();
        let _held = svc.gate.clone().lock_owned().await;
        let err = svc
            .identify_within(sub("a@x.com", "1"), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(svc.store().count().unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_sightings_create_one_primary() {
        let svc = service();
        let mut tasks = Vec::new();
        for _ in 0..16 {
            let svc = svc.clone();
            tasks.push(tokio::spawn(async move { svc.identify(sub("same@x.com", "42")).await }));
        }
        let mut primaries = std::collections::HashSet::new();
        for t in tasks {
            primaries.insert(t.await.unwrap().unwrap().primary_contact_id);
        }
        assert_eq!(primaries.len(), 1);
        assert_eq!(svc.store().count().unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_extensions_do_not_duplicate() {
        let svc = service();
        let base = svc.identify(sub("a@x.com", "1")).await.unwrap();
        let mut tasks = Vec::new();
        for email in ["a@x.com", "b@x.com"] {
            for _ in 0..4 {
                let svc = svc.clone();
                tasks.push(tokio::spawn(async move { svc.identify(sub(email, "2")).await }));
            }
        }
        for t in tasks {
            t.await.unwrap().unwrap();
        }
        // Sequentially: (a,2) adds phone 2; (b,2) adds email b. Nothing else is new.
        let view = svc.view(base.primary_contact_id).await.unwrap();
        assert_eq!(view.phone_numbers, vec!["1", "2"]);
        assert_eq!(view.emails.len(), 2);
        assert!(svc.store().count().unwrap() <= 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn timeout_during_slow_store_work() {
        let store = Arc::new(SlowStore {
            inner: MemoryContactStore::new(),
            delay: Duration::from_millis(300),
        });
        let svc = IdentityService::new(store.clone(), Duration::from_secs(5));

        let err = svc
            .identify_within(sub("a@x.com", "1"), Duration::from_millis(30))
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::StoreTimeout(t) if t == Duration::from_millis(30)));
        assert!(err.is_retryable());

        // The abandoned call still finishes and releases the gate; a retry is idempotent.
        let view = svc.identify(sub("a@x.com", "1")).await.unwrap();
        assert_eq!(view.emails, vec!["a@x.com"]);
        assert_eq!(store.count().unwrap(), 1);
    }
}
