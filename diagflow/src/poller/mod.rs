//! Concurrent status polling of node jobs.
//!
//! A polling round queries every non-terminal tracker at once, capped by a
//! semaphore shared with the rest of the coordinator. Two independent expiry
//! signals apply: the per-node timeout bounds each individual query, and the
//! overall deadline (or the bundle's cancellation token) abandons whatever is
//! still in flight. Abandoned and expired queries mark their job `TimedOut`.

use crate::cancellation::CancellationToken;
use crate::config::CoordinatorConfig;
use crate::core::{NodePhase, RemoteJobId};
use crate::errors::NodeError;
use crate::node::{NodeClient, NodeStatusReport};
use crate::tracker::{NodeJobTracker, PhaseTransition};
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

/// What a single status query produced.
#[derive(Debug)]
enum QueryOutcome {
    Report(NodeStatusReport),
    Error(NodeError),
    Expired,
}

/// Result of one polling round.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PollRound {
    /// Number of nodes queried.
    pub queried: usize,
    /// Phase changes applied during the round, by node address.
    pub transitions: Vec<(String, PhaseTransition)>,
    /// Whether the round was cut short by the deadline or cancellation.
    pub interrupted: bool,
}

impl PollRound {
    /// Returns true if any job changed phase.
    #[must_use]
    pub fn changed(&self) -> bool {
        !self.transitions.is_empty()
    }
}

/// How a multi-round poll ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Every job reached a terminal phase on its own.
    Completed {
        /// Rounds run.
        rounds: usize,
    },
    /// The overall deadline elapsed; leftover jobs were marked timed out.
    DeadlineElapsed {
        /// Rounds run.
        rounds: usize,
    },
    /// The cancellation token fired.
    Cancelled {
        /// Rounds run.
        rounds: usize,
    },
}

/// Returns true if every tracker is terminal.
#[must_use]
pub fn all_terminal(trackers: &[NodeJobTracker]) -> bool {
    trackers.iter().all(NodeJobTracker::is_terminal)
}

/// Drives status queries for sets of node job trackers.
#[derive(Clone)]
pub struct StatusPoller {
    client: Arc<dyn NodeClient>,
    limiter: Arc<Semaphore>,
    node_timeout: Duration,
    poll_interval: Duration,
}

impl StatusPoller {
    /// Creates a poller that shares `limiter` with other node fan-outs.
    #[must_use]
    pub fn new(
        client: Arc<dyn NodeClient>,
        limiter: Arc<Semaphore>,
        config: &CoordinatorConfig,
    ) -> Self {
        Self {
            client,
            limiter,
            node_timeout: config.node_timeout(),
            poll_interval: config.poll_interval(),
        }
    }

    /// Returns the per-node timeout.
    #[must_use]
    pub const fn node_timeout(&self) -> Duration {
        self.node_timeout
    }

    /// Runs exactly one polling round.
    ///
    /// Returns immediately without issuing any query when every tracker is
    /// already terminal. If the deadline has already passed or `cancel` has
    /// fired, non-terminal trackers are marked timed out without querying.
    pub async fn poll_once(
        &self,
        trackers: &mut [NodeJobTracker],
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> PollRound {
        let mut round = PollRound::default();
        if all_terminal(trackers) {
            return round;
        }

        if Instant::now() >= deadline || cancel.is_cancelled() {
            round.interrupted = true;
            expire_remaining(trackers, &interrupt_reason(cancel), &mut round);
            return round;
        }

        let mut in_flight: FuturesUnordered<JoinHandle<(usize, QueryOutcome)>> =
            FuturesUnordered::new();
        let mut handles = Vec::new();

        for (index, tracker) in trackers.iter_mut().enumerate() {
            if tracker.is_terminal() {
                continue;
            }
            let Some(job_id) = tracker.job().remote_job_id.clone() else {
                if let Some(t) = tracker.mark_failed("node never accepted the collection request") {
                    round.transitions.push((tracker.node().to_string(), t));
                }
                continue;
            };

            let handle = self.spawn_query(index, tracker.node().to_string(), job_id);
            handles.push(handle.abort_handle());
            in_flight.push(handle);
            round.queried += 1;
        }

        let sleep = tokio::time::sleep_until(deadline);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                next = in_flight.next() => {
                    let Some(joined) = next else { break };
                    match joined {
                        Ok((index, outcome)) => {
                            self.apply_outcome(&mut trackers[index], outcome, &mut round);
                        }
                        Err(join_error) => {
                            warn!(error = %join_error, "Status query task failed to join");
                        }
                    }
                }
                () = &mut sleep => {
                    round.interrupted = true;
                    break;
                }
                () = cancel.cancelled() => {
                    round.interrupted = true;
                    break;
                }
            }
        }

        if round.interrupted {
            for handle in handles {
                handle.abort();
            }
            expire_remaining(trackers, &interrupt_reason(cancel), &mut round);
        }

        round
    }

    /// Polls until every tracker is terminal, the deadline elapses, or the
    /// token is cancelled, sleeping the poll interval between rounds.
    ///
    /// `on_round` sees the trackers after every round so the caller can
    /// publish intermediate state.
    pub async fn poll_until_terminal<F>(
        &self,
        trackers: &mut [NodeJobTracker],
        deadline: Instant,
        cancel: &CancellationToken,
        mut on_round: F,
    ) -> PollOutcome
    where
        F: FnMut(&[NodeJobTracker], &PollRound) + Send,
    {
        let mut rounds = 0;
        loop {
            if all_terminal(trackers) {
                return PollOutcome::Completed { rounds };
            }

            let round = self.poll_once(trackers, deadline, cancel).await;
            rounds += 1;
            on_round(trackers, &round);

            if cancel.is_cancelled() {
                return PollOutcome::Cancelled { rounds };
            }
            if round.interrupted || Instant::now() >= deadline {
                expire_remaining(trackers, "overall deadline elapsed", &mut PollRound::default());
                return PollOutcome::DeadlineElapsed { rounds };
            }
            if all_terminal(trackers) {
                return PollOutcome::Completed { rounds };
            }

            let wake = (Instant::now() + self.poll_interval).min(deadline);
            tokio::select! {
                () = tokio::time::sleep_until(wake) => {}
                () = cancel.cancelled() => {
                    return PollOutcome::Cancelled { rounds };
                }
            }
        }
    }

    fn spawn_query(
        &self,
        index: usize,
        node: String,
        job_id: RemoteJobId,
    ) -> JoinHandle<(usize, QueryOutcome)> {
        let client = self.client.clone();
        let limiter = self.limiter.clone();
        let node_timeout = self.node_timeout;

        tokio::spawn(async move {
            let Ok(_permit) = limiter.acquire().await else {
                return (
                    index,
                    QueryOutcome::Error(NodeError::unreachable(node, "concurrency limiter closed")),
                );
            };

            let outcome =
                match tokio::time::timeout(node_timeout, client.get_status(&node, &job_id)).await {
                    Ok(Ok(report)) => QueryOutcome::Report(report),
                    Ok(Err(error)) => QueryOutcome::Error(error),
                    Err(_) => QueryOutcome::Expired,
                };
            (index, outcome)
        })
    }

    fn apply_outcome(
        &self,
        tracker: &mut NodeJobTracker,
        outcome: QueryOutcome,
        round: &mut PollRound,
    ) {
        let transition = match outcome {
            QueryOutcome::Report(report) => tracker.apply(&report),
            QueryOutcome::Error(error) if error.is_timeout() => {
                tracker.mark_timed_out(error.to_string())
            }
            QueryOutcome::Error(error) => tracker.mark_failed(error.to_string()),
            QueryOutcome::Expired => {
                let error = NodeError::timeout(tracker.node(), self.node_timeout);
                tracker.mark_timed_out(error.to_string())
            }
        };

        if let Some(t) = transition {
            if is_failure_transition(&t) {
                warn!(
                    node = %tracker.node(),
                    to = %t.to,
                    error = tracker.job().error.as_deref().unwrap_or("-"),
                    "Node job did not succeed"
                );
            } else {
                debug!(node = %tracker.node(), from = %t.from, to = %t.to, "Node job advanced");
            }
            round.transitions.push((tracker.node().to_string(), t));
        }
    }
}

impl std::fmt::Debug for StatusPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusPoller")
            .field("node_timeout", &self.node_timeout)
            .field("poll_interval", &self.poll_interval)
            .field("available_permits", &self.limiter.available_permits())
            .finish_non_exhaustive()
    }
}

fn interrupt_reason(cancel: &CancellationToken) -> String {
    match cancel.reason() {
        Some(reason) => format!("cancelled: {reason}"),
        None if cancel.is_cancelled() => "cancelled".to_string(),
        None => "overall deadline elapsed".to_string(),
    }
}

fn expire_remaining(trackers: &mut [NodeJobTracker], reason: &str, round: &mut PollRound) {
    for tracker in trackers.iter_mut() {
        if let Some(t) = tracker.mark_timed_out(reason) {
            round.transitions.push((tracker.node().to_string(), t));
        }
    }
}

/// Returns true if the transition ended in a failed or timed out phase.
#[must_use]
pub fn is_failure_transition(transition: &PhaseTransition) -> bool {
    matches!(transition.to, NodePhase::Failed | NodePhase::TimedOut)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::NodeJob;
    use crate::testing::{NodeScript, ScriptedNodeClient};

    fn poller(client: Arc<ScriptedNodeClient>, node_timeout_ms: u64) -> StatusPoller {
        let config = CoordinatorConfig::new()
            .with_max_concurrency(4)
            .with_node_timeout(Duration::from_millis(node_timeout_ms))
            .with_poll_interval(Duration::from_millis(10));
        StatusPoller::new(client, Arc::new(Semaphore::new(4)), &config)
    }

    async fn started(client: &ScriptedNodeClient, nodes: &[&str]) -> Vec<NodeJobTracker> {
        let mut trackers = Vec::new();
        for node in nodes {
            let job = client.start_collection(node).await.unwrap();
            trackers.push(NodeJobTracker::new(NodeJob::running(*node, job)));
        }
        trackers
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(30)
    }

    #[tokio::test]
    async fn test_terminal_set_is_noop() {
        let client = Arc::new(ScriptedNodeClient::new());
        let poller = poller(client.clone(), 100);
        let mut trackers = vec![NodeJobTracker::new(NodeJob::rejected("n1", "refused"))];

        let round = poller
            .poll_once(&mut trackers, far_deadline(), &CancellationToken::new())
            .await;

        assert_eq!(round.queried, 0);
        assert_eq!(client.status_calls(), 0);
    }

    #[tokio::test]
    async fn test_single_round_applies_reports() {
        let client = Arc::new(
            ScriptedNodeClient::new()
                .with_node("n1", NodeScript::succeeds_after(0))
                .with_node("n2", NodeScript::fails_after(0, "disk full")),
        );
        let poller = poller(client.clone(), 100);
        let mut trackers = started(&client, &["n1", "n2"]).await;

        let round = poller
            .poll_once(&mut trackers, far_deadline(), &CancellationToken::new())
            .await;

        assert_eq!(round.queried, 2);
        assert_eq!(round.transitions.len(), 2);
        assert_eq!(trackers[0].job().phase, NodePhase::Succeeded);
        assert_eq!(trackers[1].job().phase, NodePhase::Failed);
        assert_eq!(trackers[1].job().error.as_deref(), Some("disk full"));
    }

    #[tokio::test]
    async fn test_slow_node_times_out_without_blocking_others() {
        let client = Arc::new(
            ScriptedNodeClient::new()
                .with_node("fast", NodeScript::succeeds_after(0))
                .with_node("slow", NodeScript::hangs()),
        );
        let poller = poller(client.clone(), 50);
        let mut trackers = started(&client, &["fast", "slow"]).await;

        let started = std::time::Instant::now();
        let round = poller
            .poll_once(&mut trackers, far_deadline(), &CancellationToken::new())
            .await;

        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!round.interrupted);
        assert_eq!(trackers[0].job().phase, NodePhase::Succeeded);
        assert_eq!(trackers[1].job().phase, NodePhase::TimedOut);
    }

    #[tokio::test]
    async fn test_deadline_abandons_in_flight_queries() {
        let client = Arc::new(ScriptedNodeClient::new().with_node("slow", NodeScript::hangs()));
        let poller = poller(client.clone(), 10_000);
        let mut trackers = started(&client, &["slow"]).await;

        let deadline = Instant::now() + Duration::from_millis(50);
        let started = std::time::Instant::now();
        let round = poller
            .poll_once(&mut trackers, deadline, &CancellationToken::new())
            .await;

        assert!(round.interrupted);
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(trackers[0].job().phase, NodePhase::TimedOut);
    }

    #[tokio::test]
    async fn test_poll_until_terminal_completes() {
        let client = Arc::new(
            ScriptedNodeClient::new()
                .with_node("n1", NodeScript::succeeds_after(2))
                .with_node("n2", NodeScript::succeeds_after(1)),
        );
        let poller = poller(client.clone(), 100);
        let mut trackers = started(&client, &["n1", "n2"]).await;
        let mut observed = 0;

        let outcome = poller
            .poll_until_terminal(&mut trackers, far_deadline(), &CancellationToken::new(), |_, _| {
                observed += 1;
            })
            .await;

        assert_eq!(outcome, PollOutcome::Completed { rounds: 3 });
        assert_eq!(observed, 3);
        assert!(all_terminal(&trackers));
    }

    #[tokio::test]
    async fn test_poll_until_terminal_respects_deadline() {
        let client = Arc::new(ScriptedNodeClient::new().with_node("n1", NodeScript::runs_forever()));
        let poller = poller(client.clone(), 100);
        let mut trackers = started(&client, &["n1"]).await;

        let deadline = Instant::now() + Duration::from_millis(80);
        let outcome = poller
            .poll_until_terminal(&mut trackers, deadline, &CancellationToken::new(), |_, _| {})
            .await;

        assert!(matches!(outcome, PollOutcome::DeadlineElapsed { .. }));
        assert_eq!(trackers[0].job().phase, NodePhase::TimedOut);
    }

    #[tokio::test]
    async fn test_cancellation_stops_polling() {
        let client = Arc::new(ScriptedNodeClient::new().with_node("n1", NodeScript::hangs()));
        let poller = poller(client.clone(), 10_000);
        let mut trackers = started(&client, &["n1"]).await;
        let cancel = Arc::new(CancellationToken::new());

        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                cancel.cancel("bundle deleted");
            })
        };

        let outcome = poller
            .poll_until_terminal(&mut trackers, far_deadline(), &cancel, |_, _| {})
            .await;
        canceller.await.unwrap();

        assert!(matches!(outcome, PollOutcome::Cancelled { .. }));
        assert_eq!(trackers[0].job().phase, NodePhase::TimedOut);
        assert!(trackers[0]
            .job()
            .error
            .as_deref()
            .unwrap()
            .contains("bundle deleted"));
    }

    #[tokio::test]
    async fn test_unreachable_node_fails_without_retry() {
        let client = Arc::new(ScriptedNodeClient::new().with_node("n1", NodeScript::unreachable()));
        let poller = poller(client.clone(), 100);
        let mut trackers = started(&client, &["n1"]).await;

        poller
            .poll_until_terminal(&mut trackers, far_deadline(), &CancellationToken::new(), |_, _| {})
            .await;

        assert_eq!(trackers[0].job().phase, NodePhase::Failed);
        assert_eq!(client.status_calls(), 1);
    }

    #[tokio::test]
    async fn test_concurrency_cap_is_respected() {
        let client = Arc::new(ScriptedNodeClient::new().with_default(NodeScript::slow_success(20)));
        let config = CoordinatorConfig::new().with_node_timeout(Duration::from_secs(5));
        let poller = StatusPoller::new(client.clone(), Arc::new(Semaphore::new(2)), &config);
        let names: Vec<String> = (0..8).map(|i| format!("n{i}")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let mut trackers = started(&client, &refs).await;

        poller
            .poll_once(&mut trackers, far_deadline(), &CancellationToken::new())
            .await;

        assert!(all_terminal(&trackers));
        assert!(client.max_in_flight() <= 2);
    }

    #[test]
    fn test_interrupt_reason_names_cancellation() {
        let token = CancellationToken::new();
        assert_eq!(interrupt_reason(&token), "overall deadline elapsed");

        token.cancel("bundle deleted");
        assert_eq!(interrupt_reason(&token), "cancelled: bundle deleted");
    }

    #[test]
    fn test_is_failure_transition() {
        let t = PhaseTransition {
            from: NodePhase::Running,
            to: NodePhase::TimedOut,
        };
        assert!(is_failure_transition(&t));
    }
}
