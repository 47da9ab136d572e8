//! The bundle coordinator.
//!
//! [`BundleCoordinator`] is the public entry point of the engine. It fans
//! collection requests out to nodes, keeps the registry in step with what
//! the poller observes, and serves status, listing, download and deletion.
//!
//! All node calls made here and by the poller share a single semaphore, so
//! the cluster never sees more than `max_concurrency` requests from one
//! coordinator at a time.

use crate::archive::{BundleArchive, NodeArtifact};
use crate::config::CoordinatorConfig;
use crate::core::{Bundle, BundleId, BundleSummary, NodeJob, RemoteJobId};
use crate::errors::{BundleError, NodeError};
use crate::events::{BundleEvent, EventSink, NoOpEventSink};
use crate::node::NodeClient;
use crate::observability::bundle_span;
use crate::poller::StatusPoller;
use crate::registry::{BundleEntry, BundleRegistry, BundleUpdate};
use crate::tracker::NodeJobTracker;
use crate::utils::generate_bundle_id;
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, info, warn, Instrument};

/// Coordinates diagnostics bundles across cluster nodes.
pub struct BundleCoordinator {
    client: Arc<dyn NodeClient>,
    registry: Arc<BundleRegistry>,
    poller: StatusPoller,
    limiter: Arc<Semaphore>,
    config: CoordinatorConfig,
    events: Arc<dyn EventSink>,
}

impl BundleCoordinator {
    /// Creates a coordinator with an empty registry.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` if the configuration fails validation.
    pub fn new(client: Arc<dyn NodeClient>, config: CoordinatorConfig) -> Result<Self, BundleError> {
        config.validate()?;
        let limiter = Arc::new(Semaphore::new(config.max_concurrency));
        let poller = StatusPoller::new(client.clone(), limiter.clone(), &config);
        Ok(Self {
            client,
            registry: Arc::new(BundleRegistry::new()),
            poller,
            limiter,
            config,
            events: Arc::new(NoOpEventSink),
        })
    }

    /// Sets the sink that receives lifecycle events.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Returns the registry backing this coordinator.
    #[must_use]
    pub fn registry(&self) -> &Arc<BundleRegistry> {
        &self.registry
    }

    /// Returns the active configuration.
    #[must_use]
    pub const fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Starts a bundle on `nodes` and returns its identifier.
    ///
    /// Every node is asked to start collecting concurrently. Nodes that
    /// refuse, or do not answer within the per-node timeout, are recorded as
    /// failed or timed out; they never fail the call. The bundle is
    /// registered as soon as every start call has settled, without waiting
    /// for collection to finish.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` if `nodes` is empty or contains blank or
    /// duplicate addresses.
    pub async fn create<S: AsRef<str>>(&self, nodes: &[S]) -> Result<BundleId, BundleError> {
        let nodes = validate_nodes(nodes)?;
        let deadline = Instant::now() + self.config.overall_deadline();
        let id = self.fresh_id();

        async {
            let jobs = join_all(nodes.iter().map(|node| self.start_one(node))).await;
            let bundle = Bundle::new(id.clone(), jobs);
            let counts = bundle.counts();
            let phase = bundle.phase;

            self.registry.put(bundle, deadline)?;
            info!(
                nodes = counts.total(),
                accepted = counts.active,
                rejected = counts.failed,
                phase = %phase,
                "Created bundle"
            );

            BundleEvent::Created {
                bundle_id: id.clone(),
                nodes: counts.total(),
                phase,
            }
            .emit_to(self.events.as_ref());
            if phase.is_terminal() {
                BundleEvent::Completed {
                    bundle_id: id.clone(),
                    phase,
                    succeeded: counts.succeeded,
                    failed: counts.failed,
                }
                .emit_to(self.events.as_ref());
            }
            Ok::<_, BundleError>(id.clone())
        }
        .instrument(bundle_span("create", &id))
        .await
    }

    /// Runs one polling pass for a bundle and returns its current state.
    ///
    /// Concurrent calls on one bundle take turns; calls on different
    /// bundles do not wait on each other. Node failures show up in the
    /// returned jobs, never as an error.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the bundle is unknown or was deleted.
    pub async fn status(&self, id: &BundleId) -> Result<Bundle, BundleError> {
        let entry = self.entry(id)?;
        self.poll_pass(id, &entry)
            .instrument(bundle_span("status", id))
            .await
    }

    /// Polls a bundle until it reaches a terminal phase.
    ///
    /// Jobs still unfinished at the bundle's overall deadline are marked
    /// timed out, so this always returns a terminal bundle unless the bundle
    /// is deleted first.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the bundle is unknown or is deleted while
    /// waiting.
    pub async fn wait(&self, id: &BundleId) -> Result<Bundle, BundleError> {
        let entry = self.entry(id)?;
        let interval = self.config.poll_interval();

        async {
            loop {
                let bundle = self.poll_pass(id, &entry).await?;
                if bundle.phase.is_terminal() {
                    return Ok(bundle);
                }

                let wake = (Instant::now() + interval).min(entry.deadline());
                tokio::select! {
                    () = tokio::time::sleep_until(wake) => {}
                    () = entry.cancel_token().cancelled() => {
                        return Err(BundleError::not_found(id));
                    }
                }
            }
        }
        .instrument(bundle_span("wait", id))
        .await
    }

    /// Returns summaries of every live bundle, most recent first.
    ///
    /// Does not contact any node.
    #[must_use]
    pub fn list(&self) -> Vec<BundleSummary> {
        self.registry.list()
    }

    /// Returns the assembled archive of a finished bundle.
    ///
    /// The archive is built on the first call by fetching every succeeded
    /// node's artifact, then cached. Artifacts that cannot be fetched are
    /// listed as missing in the manifest; such an archive is returned but
    /// not cached, so the next call fetches again.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown or deleted bundles and `NotReady`
    /// unless the bundle is `Done` or `PartialFailure`.
    pub async fn download(&self, id: &BundleId) -> Result<Arc<BundleArchive>, BundleError> {
        let entry = self.entry(id)?;

        async {
            let bundle = entry.snapshot();
            if !bundle.phase.is_downloadable() {
                return Err(BundleError::not_ready(id, bundle.phase));
            }

            let mut cached = entry.lock_archive().await;
            if let Some(archive) = cached.as_ref() {
                debug!("Serving cached archive");
                return Ok(archive.clone());
            }

            let parts = self.fetch_artifacts(&bundle).await;
            let archive = Arc::new(BundleArchive::assemble(&bundle, parts));
            if entry.is_deleted() {
                return Err(BundleError::not_found(id));
            }

            let missing = archive.manifest().missing.len();
            if archive.is_complete() {
                *cached = Some(archive.clone());
                entry.set_archive_size(archive.size());
                info!(size = archive.size(), "Assembled archive");
            } else {
                warn!(
                    size = archive.size(),
                    missing, "Assembled incomplete archive; it will be rebuilt on next download"
                );
            }

            BundleEvent::ArchiveAssembled {
                bundle_id: id.clone(),
                size: archive.size(),
                missing,
            }
            .emit_to(self.events.as_ref());
            Ok(archive)
        }
        .instrument(bundle_span("download", id))
        .await
    }

    /// Deletes a bundle.
    ///
    /// The bundle disappears from the registry at once and any polling of
    /// it is abandoned. Nodes whose jobs are still running are asked to
    /// cancel on a detached task; their errors are logged and otherwise
    /// ignored.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the bundle is unknown or already deleted.
    pub async fn delete(&self, id: &BundleId) -> Result<(), BundleError> {
        let before = self.registry.delete(id)?;

        let unfinished: Vec<(String, RemoteJobId)> = before
            .jobs
            .iter()
            .filter(|job| !job.is_terminal())
            .filter_map(|job| job.remote_job_id.clone().map(|r| (job.node.clone(), r)))
            .collect();

        info!(
            bundle_id = %id,
            phase = %before.phase,
            unfinished = unfinished.len(),
            "Deleted bundle"
        );
        BundleEvent::Deleted {
            bundle_id: id.clone(),
            phase: before.phase,
        }
        .emit_to(self.events.as_ref());

        if !unfinished.is_empty() {
            let cleanup = cancel_jobs(
                self.client.clone(),
                self.limiter.clone(),
                self.config.node_timeout(),
                unfinished,
            );
            tokio::spawn(cleanup.instrument(bundle_span("delete", id)));
        }
        Ok(())
    }

    fn entry(&self, id: &BundleId) -> Result<Arc<BundleEntry>, BundleError> {
        self.registry
            .get(id)
            .ok_or_else(|| BundleError::not_found(id))
    }

    fn fresh_id(&self) -> BundleId {
        loop {
            let id = generate_bundle_id();
            if !self.registry.is_known(&id) {
                return id;
            }
        }
    }

    async fn start_one(&self, node: &str) -> NodeJob {
        let timeout = self.config.node_timeout();
        let Ok(_permit) = self.limiter.acquire().await else {
            return NodeJob::rejected(node, "concurrency limiter closed");
        };

        match tokio::time::timeout(timeout, self.client.start_collection(node)).await {
            Ok(Ok(job)) => {
                debug!(node, job = %job, "Node accepted collection");
                NodeJob::running(node, job)
            }
            Ok(Err(error)) if error.is_timeout() => {
                warn!(node, error = %error, "Start call timed out");
                NodeJob::timed_out(node, error.to_string())
            }
            Ok(Err(error)) => {
                warn!(node, error = %error, "Node rejected collection");
                NodeJob::rejected(node, error.to_string())
            }
            Err(_) => {
                let error = NodeError::timeout(node, timeout);
                warn!(node, error = %error, "Start call timed out");
                NodeJob::timed_out(node, error.to_string())
            }
        }
    }

    /// One serialized polling round, published back to the registry.
    async fn poll_pass(&self, id: &BundleId, entry: &BundleEntry) -> Result<Bundle, BundleError> {
        let _polling = entry.lock_polling().await;
        if entry.is_deleted() {
            return Err(BundleError::not_found(id));
        }

        let mut trackers: Vec<NodeJobTracker> = entry
            .snapshot()
            .jobs
            .into_iter()
            .map(NodeJobTracker::new)
            .collect();

        let round = self
            .poller
            .poll_once(&mut trackers, entry.deadline(), entry.cancel_token())
            .await;
        if round.queried > 0 || round.changed() {
            debug!(
                queried = round.queried,
                transitions = round.transitions.len(),
                interrupted = round.interrupted,
                "Polling round finished"
            );
        }

        self.publish(id, entry, &trackers).map(|update| update.bundle)
    }

    /// Folds tracker state into the stored bundle and reports what changed.
    fn publish(
        &self,
        id: &BundleId,
        entry: &BundleEntry,
        trackers: &[NodeJobTracker],
    ) -> Result<BundleUpdate, BundleError> {
        let mut transitions = Vec::new();
        let update = entry
            .update_jobs(|jobs| {
                for (job, observed) in jobs.iter_mut().zip(trackers) {
                    let mut stored = NodeJobTracker::new(job.clone());
                    if let Some(transition) = stored.merge(observed.job()) {
                        transitions.push((job.node.clone(), transition));
                        *job = stored.into_job();
                    }
                }
            })
            .ok_or_else(|| BundleError::not_found(id))?;

        for (node, transition) in transitions {
            BundleEvent::NodeTransition {
                bundle_id: id.clone(),
                node,
                from: transition.from,
                to: transition.to,
            }
            .emit_to(self.events.as_ref());
        }

        if update.finished() {
            let counts = update.bundle.counts();
            info!(
                phase = %update.bundle.phase,
                succeeded = counts.succeeded,
                failed = counts.failed,
                "Bundle finished"
            );
            BundleEvent::Completed {
                bundle_id: id.clone(),
                phase: update.bundle.phase,
                succeeded: counts.succeeded,
                failed: counts.failed,
            }
            .emit_to(self.events.as_ref());
        }
        Ok(update)
    }

    async fn fetch_artifacts(&self, bundle: &Bundle) -> Vec<NodeArtifact> {
        let timeout = self.config.node_timeout();
        let fetches = bundle
            .jobs
            .iter()
            .filter(|job| job.phase.is_success())
            .map(|job| async move {
                let node = job.node.clone();
                let Some(artifact) = job.artifact.clone() else {
                    return NodeArtifact::Missing {
                        node,
                        reason: "no artifact recorded".to_string(),
                    };
                };
                let Ok(_permit) = self.limiter.acquire().await else {
                    return NodeArtifact::Missing {
                        node,
                        reason: "concurrency limiter closed".to_string(),
                    };
                };

                let fetched =
                    tokio::time::timeout(timeout, self.client.fetch_artifact(&node, &artifact))
                        .await
                        .unwrap_or_else(|_| Err(NodeError::timeout(node.as_str(), timeout)));
                match fetched {
                    Ok(bytes) => NodeArtifact::Fetched {
                        node,
                        artifact,
                        bytes,
                    },
                    Err(error) => {
                        warn!(node = %node, error = %error, "Artifact fetch failed");
                        NodeArtifact::Missing {
                            node,
                            reason: error.to_string(),
                        }
                    }
                }
            });
        join_all(fetches).await
    }
}

impl std::fmt::Debug for BundleCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundleCoordinator")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("poller", &self.poller)
            .finish_non_exhaustive()
    }
}

/// Checks a node list and returns it as owned addresses.
fn validate_nodes<S: AsRef<str>>(nodes: &[S]) -> Result<Vec<String>, BundleError> {
    if nodes.is_empty() {
        return Err(BundleError::invalid_request("node list is empty"));
    }

    let mut seen = HashSet::with_capacity(nodes.len());
    let mut owned = Vec::with_capacity(nodes.len());
    for node in nodes {
        let node = node.as_ref();
        if node.trim().is_empty() {
            return Err(BundleError::invalid_request("node address is blank"));
        }
        if !seen.insert(node) {
            return Err(BundleError::invalid_request(format!(
                "node {node} is listed more than once"
            )));
        }
        owned.push(node.to_string());
    }
    Ok(owned)
}

/// Best-effort cancellation of node jobs left behind by a deleted bundle.
async fn cancel_jobs(
    client: Arc<dyn NodeClient>,
    limiter: Arc<Semaphore>,
    timeout: Duration,
    jobs: Vec<(String, RemoteJobId)>,
) {
    let calls = jobs.iter().map(|(node, job)| {
        let client = client.clone();
        let limiter = limiter.clone();
        async move {
            let Ok(_permit) = limiter.acquire().await else {
                return;
            };
            match tokio::time::timeout(timeout, client.cancel(node, job)).await {
                Ok(Ok(())) => debug!(node = %node, job = %job, "Cancelled node job"),
                Ok(Err(error)) => {
                    warn!(node = %node, error = %error, "Failed to cancel node job");
                }
                Err(_) => warn!(node = %node, "Cancel call timed out"),
            }
        }
    });
    join_all(calls).await;
}
