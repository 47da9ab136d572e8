//! In-memory bundle storage.
//!
//! The registry maps bundle ids to [`BundleEntry`] handles. Each entry has
//! its own locks, so work on one bundle never waits on another; the map
//! itself is a sharded `DashMap`.

mod entry;

pub use entry::{BundleEntry, BundleUpdate};

use crate::core::{Bundle, BundleId, BundleSummary, NodeJob};
use crate::errors::BundleError;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::debug;

/// Concurrency-safe store of every live bundle.
#[derive(Default)]
pub struct BundleRegistry {
    entries: DashMap<BundleId, Arc<BundleEntry>>,
    /// Ids of deleted bundles. Held while inserting or retiring so an id can
    /// never be inserted after it was retired.
    retired: Mutex<HashSet<BundleId>>,
}

impl BundleRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if `id` is live or was deleted before.
    #[must_use]
    pub fn is_known(&self, id: &BundleId) -> bool {
        self.entries.contains_key(id) || self.retired.lock().contains(id)
    }

    /// Registers a new bundle.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the id is live or was used by a deleted bundle.
    pub fn put(&self, bundle: Bundle, deadline: Instant) -> Result<Arc<BundleEntry>, BundleError> {
        let retired = self.retired.lock();
        if retired.contains(&bundle.id) {
            return Err(BundleError::Internal(format!(
                "bundle id {} was already used by a deleted bundle",
                bundle.id
            )));
        }

        match self.entries.entry(bundle.id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(BundleError::Internal(format!(
                "bundle id {} is already registered",
                bundle.id
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                debug!(bundle_id = %bundle.id, phase = %bundle.phase, "Registered bundle");
                let entry = Arc::new(BundleEntry::new(bundle, deadline));
                slot.insert(entry.clone());
                Ok(entry)
            }
        }
    }

    /// Returns the handle for a live bundle.
    #[must_use]
    pub fn get(&self, id: &BundleId) -> Option<Arc<BundleEntry>> {
        self.entries.get(id).map(|entry| entry.value().clone())
    }

    /// Returns a snapshot of a live bundle.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown or deleted ids.
    pub fn snapshot(&self, id: &BundleId) -> Result<Bundle, BundleError> {
        self.get(id)
            .map(|entry| entry.snapshot())
            .ok_or_else(|| BundleError::not_found(id))
    }

    /// Applies `mutate` to a bundle's jobs and recomputes its phase.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown or deleted ids.
    pub fn update_jobs<F>(&self, id: &BundleId, mutate: F) -> Result<BundleUpdate, BundleError>
    where
        F: FnOnce(&mut [NodeJob]),
    {
        self.get(id)
            .and_then(|entry| entry.update_jobs(mutate))
            .ok_or_else(|| BundleError::not_found(id))
    }

    /// Removes a bundle, retires its id and cancels in-flight work on it.
    ///
    /// Returns the bundle as it was just before deletion.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown or already deleted ids.
    pub fn delete(&self, id: &BundleId) -> Result<Bundle, BundleError> {
        let mut retired = self.retired.lock();
        let (_, entry) = self
            .entries
            .remove(id)
            .ok_or_else(|| BundleError::not_found(id))?;
        retired.insert(id.clone());
        drop(retired);

        let before = entry.mark_deleted();
        entry.cancel_token().cancel("bundle deleted");
        debug!(bundle_id = %id, "Removed bundle");
        Ok(before)
    }

    /// Returns summaries of every live bundle, most recent first.
    #[must_use]
    pub fn list(&self) -> Vec<BundleSummary> {
        let mut summaries: Vec<BundleSummary> = self
            .entries
            .iter()
            .map(|entry| entry.value().snapshot().summary())
            .collect();
        summaries.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        summaries
    }

    /// Returns the number of live bundles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no bundle is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for BundleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundleRegistry")
            .field("live", &self.entries.len())
            .field("retired", &self.retired.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{BundlePhase, NodePhase, RemoteJobId};
    use std::time::Duration;

    fn bundle(id: &str, nodes: &[&str]) -> Bundle {
        Bundle::new(
            BundleId::new(id),
            nodes
                .iter()
                .map(|n| NodeJob::running(*n, RemoteJobId(format!("job-{n}"))))
                .collect(),
        )
    }

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    #[test]
    fn test_put_and_get() {
        let registry = BundleRegistry::new();
        registry.put(bundle("b1", &["n1"]), deadline()).unwrap();

        assert_eq!(registry.len(), 1);
        let snapshot = registry.snapshot(&BundleId::new("b1")).unwrap();
        assert_eq!(snapshot.phase, BundlePhase::InProgress);
    }

    #[test]
    fn test_put_duplicate_rejected() {
        let registry = BundleRegistry::new();
        registry.put(bundle("b1", &["n1"]), deadline()).unwrap();
        let err = registry.put(bundle("b1", &["n2"]), deadline()).unwrap_err();
        assert_eq!(err.code(), "INTERNAL");
    }

    #[test]
    fn test_deleted_id_is_never_reused() {
        let registry = BundleRegistry::new();
        let id = BundleId::new("b1");
        registry.put(bundle("b1", &["n1"]), deadline()).unwrap();
        registry.delete(&id).unwrap();

        assert!(registry.is_known(&id));
        assert!(registry.put(bundle("b1", &["n1"]), deadline()).is_err());
    }

    #[test]
    fn test_delete_twice_is_not_found() {
        let registry = BundleRegistry::new();
        let id = BundleId::new("b1");
        registry.put(bundle("b1", &["n1"]), deadline()).unwrap();

        let before = registry.delete(&id).unwrap();
        assert_eq!(before.phase, BundlePhase::InProgress);
        assert_eq!(registry.delete(&id), Err(BundleError::not_found(&id)));
        assert_eq!(registry.snapshot(&id), Err(BundleError::not_found(&id)));
    }

    #[test]
    fn test_delete_cancels_entry() {
        let registry = BundleRegistry::new();
        let entry = registry.put(bundle("b1", &["n1"]), deadline()).unwrap();
        registry.delete(&BundleId::new("b1")).unwrap();

        assert!(entry.cancel_token().is_cancelled());
        assert!(entry.is_deleted());
        assert!(entry.update_jobs(|_| {}).is_none());
    }

    #[test]
    fn test_update_jobs_recomputes_phase() {
        let registry = BundleRegistry::new();
        let id = BundleId::new("b1");
        registry.put(bundle("b1", &["n1", "n2"]), deadline()).unwrap();

        let update = registry
            .update_jobs(&id, |jobs| {
                jobs[0].phase = NodePhase::Succeeded;
                jobs[1].phase = NodePhase::Failed;
            })
            .unwrap();

        assert_eq!(update.previous_phase, Some(BundlePhase::InProgress));
        assert_eq!(update.bundle.phase, BundlePhase::PartialFailure);
        assert!(update.finished());
    }

    #[test]
    fn test_update_unknown_is_not_found() {
        let registry = BundleRegistry::new();
        let err = registry.update_jobs(&BundleId::new("nope"), |_| {}).unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[test]
    fn test_list_most_recent_first() {
        let registry = BundleRegistry::new();
        registry.put(bundle("b1", &["n1"]), deadline()).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        registry.put(bundle("b2", &["n1"]), deadline()).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        registry.put(bundle("b3", &["n1"]), deadline()).unwrap();

        let ids: Vec<String> = registry
            .list()
            .into_iter()
            .map(|s| s.id.to_string())
            .collect();
        assert_eq!(ids, vec!["b3", "b2", "b1"]);
    }

    #[tokio::test]
    async fn test_concurrent_updates_on_distinct_bundles() {
        let registry = Arc::new(BundleRegistry::new());
        for i in 0..16 {
            registry
                .put(bundle(&format!("b{i}"), &["n1"]), deadline())
                .unwrap();
        }

        let mut handles = Vec::new();
        for i in 0..16 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry
                    .update_jobs(&BundleId::new(format!("b{i}")), |jobs| {
                        jobs[0].phase = NodePhase::Succeeded;
                    })
                    .unwrap()
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().bundle.phase, BundlePhase::Done);
        }
    }
}
