//! A single registry entry and its per-bundle synchronization.

use crate::archive::BundleArchive;
use crate::cancellation::CancellationToken;
use crate::core::{Bundle, BundlePhase, NodeJob};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard};
use tokio::time::Instant;

/// Result of mutating a bundle's jobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleUpdate {
    /// The phase before the update, if the update changed it.
    pub previous_phase: Option<BundlePhase>,
    /// The bundle after the update.
    pub bundle: Bundle,
}

impl BundleUpdate {
    /// Returns true if this update moved the bundle into a terminal phase.
    #[must_use]
    pub fn finished(&self) -> bool {
        self.previous_phase.is_some() && self.bundle.phase.is_terminal()
    }
}

/// Storage and locks for one bundle.
///
/// Bundle state sits behind a short-lived read/write lock and is recomputed
/// on every write. Polling passes are serialized by a separate async lock so
/// at most one status query per node is in flight for this bundle.
pub struct BundleEntry {
    bundle: RwLock<Bundle>,
    poll_lock: AsyncMutex<()>,
    archive: AsyncMutex<Option<Arc<BundleArchive>>>,
    cancel: CancellationToken,
    deadline: Instant,
}

impl BundleEntry {
    pub(crate) fn new(bundle: Bundle, deadline: Instant) -> Self {
        Self {
            bundle: RwLock::new(bundle),
            poll_lock: AsyncMutex::new(()),
            archive: AsyncMutex::new(None),
            cancel: CancellationToken::new(),
            deadline,
        }
    }

    /// Returns a copy of the current bundle state.
    #[must_use]
    pub fn snapshot(&self) -> Bundle {
        self.bundle.read().clone()
    }

    /// Returns the cached aggregate phase.
    #[must_use]
    pub fn phase(&self) -> BundlePhase {
        self.bundle.read().phase
    }

    /// Returns true once the bundle has been deleted.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.phase() == BundlePhase::Deleted
    }

    /// Instant after which unfinished jobs are timed out.
    #[must_use]
    pub const fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Token cancelled when the bundle is deleted.
    #[must_use]
    pub const fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Waits for exclusive polling rights on this bundle.
    pub async fn lock_polling(&self) -> MutexGuard<'_, ()> {
        self.poll_lock.lock().await
    }

    /// Waits for the archive cache slot.
    pub async fn lock_archive(&self) -> MutexGuard<'_, Option<Arc<BundleArchive>>> {
        self.archive.lock().await
    }

    /// Applies `mutate` to the jobs and recomputes the aggregate phase.
    ///
    /// Returns `None` if the bundle was deleted.
    pub fn update_jobs<F>(&self, mutate: F) -> Option<BundleUpdate>
    where
        F: FnOnce(&mut [NodeJob]),
    {
        let mut bundle = self.bundle.write();
        if bundle.phase == BundlePhase::Deleted {
            return None;
        }
        mutate(&mut bundle.jobs);
        let previous_phase = bundle.recompute_phase();
        Some(BundleUpdate {
            previous_phase,
            bundle: bundle.clone(),
        })
    }

    /// Records the size of the assembled archive.
    pub fn set_archive_size(&self, size: u64) {
        let mut bundle = self.bundle.write();
        if bundle.phase != BundlePhase::Deleted {
            bundle.archive_size = Some(size);
        }
    }

    /// Marks the bundle deleted and returns its state just before.
    pub(crate) fn mark_deleted(&self) -> Bundle {
        let mut bundle = self.bundle.write();
        let before = bundle.clone();
        bundle.phase = BundlePhase::Deleted;
        before
    }
}

impl std::fmt::Debug for BundleEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bundle = self.bundle.read();
        f.debug_struct("BundleEntry")
            .field("id", &bundle.id)
            .field("phase", &bundle.phase)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}
