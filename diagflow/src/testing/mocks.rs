//! Scripted node client for tests and local simulation.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::core::{ArtifactRef, RemoteJobId};
use crate::errors::NodeError;
use crate::node::{NodeClient, NodeStatusReport};

/// How a node answers a start request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartBehavior {
    /// The node accepts and returns a job id.
    Accept,
    /// The node refuses with a reason.
    Reject(String),
    /// The call never returns.
    Hang,
}

/// How a node's job ends once its running polls are used up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishBehavior {
    /// The job succeeds with an artifact.
    Succeed,
    /// The node reports an error.
    Fail(String),
    /// The node keeps reporting running.
    RunForever,
    /// Status calls never return.
    Hang,
    /// Status calls fail at the transport level.
    Unreachable,
}

/// Scripted behavior for one node.
#[derive(Debug, Clone)]
pub struct NodeScript {
    /// Answer to `start_collection`.
    pub start: StartBehavior,
    /// Status queries answered with "running" before the job finishes.
    pub running_polls: usize,
    /// What happens after the running polls.
    pub finish: FinishBehavior,
    /// Delay before every status answer.
    pub status_delay: Duration,
    /// Artifact payload; defaults to a line naming the node.
    pub artifact: Option<Vec<u8>>,
    /// Whether artifact downloads fail.
    pub fetch_fails: bool,
    /// Whether cancel calls fail.
    pub cancel_fails: bool,
}

impl NodeScript {
    fn with_finish(running_polls: usize, finish: FinishBehavior) -> Self {
        Self {
            start: StartBehavior::Accept,
            running_polls,
            finish,
            status_delay: Duration::ZERO,
            artifact: None,
            fetch_fails: false,
            cancel_fails: false,
        }
    }

    /// Succeeds after `running_polls` status queries.
    #[must_use]
    pub fn succeeds_after(running_polls: usize) -> Self {
        Self::with_finish(running_polls, FinishBehavior::Succeed)
    }

    /// Fails with `reason` after `running_polls` status queries.
    #[must_use]
    pub fn fails_after(running_polls: usize, reason: impl Into<String>) -> Self {
        Self::with_finish(running_polls, FinishBehavior::Fail(reason.into()))
    }

    /// Never finishes.
    #[must_use]
    pub fn runs_forever() -> Self {
        Self::with_finish(0, FinishBehavior::RunForever)
    }

    /// Status calls never return.
    #[must_use]
    pub fn hangs() -> Self {
        Self::with_finish(0, FinishBehavior::Hang)
    }

    /// Status calls fail with a transport error.
    #[must_use]
    pub fn unreachable() -> Self {
        Self::with_finish(0, FinishBehavior::Unreachable)
    }

    /// Succeeds on the first query after `delay_ms` milliseconds.
    #[must_use]
    pub fn slow_success(delay_ms: u64) -> Self {
        Self {
            status_delay: Duration::from_millis(delay_ms),
            ..Self::succeeds_after(0)
        }
    }

    /// Refuses the start request.
    #[must_use]
    pub fn rejects_start(reason: impl Into<String>) -> Self {
        Self {
            start: StartBehavior::Reject(reason.into()),
            ..Self::succeeds_after(0)
        }
    }

    /// The start request never returns.
    #[must_use]
    pub fn start_hangs() -> Self {
        Self {
            start: StartBehavior::Hang,
            ..Self::succeeds_after(0)
        }
    }

    /// Sets the artifact payload.
    #[must_use]
    pub fn with_artifact(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.artifact = Some(bytes.into());
        self
    }

    /// Makes artifact downloads fail.
    #[must_use]
    pub fn with_fetch_failure(mut self) -> Self {
        self.fetch_fails = true;
        self
    }

    /// Makes cancel calls fail.
    #[must_use]
    pub fn with_cancel_failure(mut self) -> Self {
        self.cancel_fails = true;
        self
    }
}

impl Default for NodeScript {
    fn default() -> Self {
        Self::succeeds_after(0)
    }
}

/// Decrements the in-flight counter when a call ends or is aborted.
struct InFlightGuard<'a>(&'a AtomicUsize);

impl<'a> InFlightGuard<'a> {
    fn enter(in_flight: &'a AtomicUsize, max: &AtomicUsize) -> Self {
        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        max.fetch_max(now, Ordering::SeqCst);
        Self(in_flight)
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A node client whose answers follow per-node scripts.
///
/// Job ids are unique per start call, so two bundles that share a node
/// progress independently.
#[derive(Debug, Default)]
pub struct ScriptedNodeClient {
    scripts: HashMap<String, NodeScript>,
    default_script: NodeScript,
    /// Status queries seen per remote job id.
    polls: Mutex<HashMap<String, usize>>,
    /// Node owning each remote job id.
    job_nodes: Mutex<HashMap<String, String>>,
    cancelled: Mutex<Vec<String>>,
    next_job: AtomicUsize,
    start_calls: AtomicUsize,
    status_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedNodeClient {
    /// Creates a client where every node succeeds on the first query.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the script for one node.
    #[must_use]
    pub fn with_node(mut self, node: impl Into<String>, script: NodeScript) -> Self {
        self.scripts.insert(node.into(), script);
        self
    }

    /// Sets the script used for nodes without their own.
    #[must_use]
    pub fn with_default(mut self, script: NodeScript) -> Self {
        self.default_script = script;
        self
    }

    /// Number of start calls received.
    #[must_use]
    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    /// Number of status calls received.
    #[must_use]
    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    /// Number of artifact downloads received.
    #[must_use]
    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// Nodes that received a cancel call, in arrival order.
    #[must_use]
    pub fn cancelled_nodes(&self) -> Vec<String> {
        self.cancelled.lock().clone()
    }

    /// Highest number of calls observed in flight at once.
    #[must_use]
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn script(&self, node: &str) -> &NodeScript {
        self.scripts.get(node).unwrap_or(&self.default_script)
    }

    fn artifact_for(&self, node: &str) -> Vec<u8> {
        self.script(node)
            .artifact
            .clone()
            .unwrap_or_else(|| format!("diagnostics from {node}\n").into_bytes())
    }
}

#[async_trait]
impl NodeClient for ScriptedNodeClient {
    async fn start_collection(&self, node: &str) -> Result<RemoteJobId, NodeError> {
        let _guard = InFlightGuard::enter(&self.in_flight, &self.max_in_flight);
        self.start_calls.fetch_add(1, Ordering::SeqCst);

        match &self.script(node).start {
            StartBehavior::Accept => {
                let seq = self.next_job.fetch_add(1, Ordering::SeqCst);
                let job = format!("{node}-job-{seq}");
                self.job_nodes.lock().insert(job.clone(), node.to_string());
                Ok(RemoteJobId(job))
            }
            StartBehavior::Reject(reason) => Err(NodeError::rejected(node, reason.clone())),
            StartBehavior::Hang => {
                std::future::pending::<()>().await;
                Err(NodeError::unreachable(node, "unreachable"))
            }
        }
    }

    async fn get_status(
        &self,
        node: &str,
        job: &RemoteJobId,
    ) -> Result<NodeStatusReport, NodeError> {
        let _guard = InFlightGuard::enter(&self.in_flight, &self.max_in_flight);
        self.status_calls.fetch_add(1, Ordering::SeqCst);

        if self.job_nodes.lock().get(&job.0).map(String::as_str) != Some(node) {
            return Err(NodeError::unknown_job(node, job.0.clone()));
        }

        let script = self.script(node).clone();
        if !script.status_delay.is_zero() {
            tokio::time::sleep(script.status_delay).await;
        }

        let seen = {
            let mut polls = self.polls.lock();
            let count = polls.entry(job.0.clone()).or_insert(0);
            *count += 1;
            *count
        };

        if seen <= script.running_polls {
            return Ok(NodeStatusReport::running());
        }

        match script.finish {
            FinishBehavior::Succeed => Ok(NodeStatusReport::succeeded(format!("{}.zip", job.0))),
            FinishBehavior::Fail(reason) => Ok(NodeStatusReport::failed(reason)),
            FinishBehavior::RunForever => Ok(NodeStatusReport::running()),
            FinishBehavior::Hang => {
                std::future::pending::<()>().await;
                Ok(NodeStatusReport::running())
            }
            FinishBehavior::Unreachable => {
                Err(NodeError::unreachable(node, "connection refused"))
            }
        }
    }

    async fn fetch_artifact(
        &self,
        node: &str,
        artifact: &ArtifactRef,
    ) -> Result<Vec<u8>, NodeError> {
        let _guard = InFlightGuard::enter(&self.in_flight, &self.max_in_flight);
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);

        if self.script(node).fetch_fails {
            return Err(NodeError::unknown_job(node, artifact.0.clone()));
        }
        Ok(self.artifact_for(node))
    }

    async fn cancel(&self, node: &str, _job: &RemoteJobId) -> Result<(), NodeError> {
        self.cancelled.lock().push(node.to_string());
        if self.script(node).cancel_fails {
            return Err(NodeError::unreachable(node, "cancel endpoint unavailable"));
        }
        Ok(())
    }
}
