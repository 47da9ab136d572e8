//! Per-node job reconciliation.
//!
//! [`reconcile`] is a pure function from the current job state and a fresh
//! status report to the next job state. [`NodeJobTracker`] wraps one job and
//! applies reports to it, reporting the transitions that actually happened.

use crate::core::{NodeJob, NodePhase};
use crate::node::NodeStatusReport;
use tracing::debug;

/// A phase change applied to a node job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseTransition {
    /// Phase before the change.
    pub from: NodePhase,
    /// Phase after the change.
    pub to: NodePhase,
}

/// Returns the next state of `current` after observing `report`.
///
/// Only forward transitions are applied. A report that would leave the phase
/// unchanged or move it backwards is treated as stale and leaves the phase
/// alone. An error carried by a non-success report fails the job. A success
/// report without an artifact location fails the job as well, since nothing
/// could be downloaded from it. The first error message seen is kept.
#[must_use]
pub fn reconcile(current: &NodeJob, report: &NodeStatusReport) -> NodeJob {
    let mut next = current.clone();
    if current.is_terminal() {
        return next;
    }

    let (phase, error) = match (report.phase, &report.error, &report.artifact) {
        (NodePhase::Succeeded, _, None) => (
            NodePhase::Failed,
            Some("node reported success without an artifact".to_string()),
        ),
        (NodePhase::Succeeded, error, Some(_)) => (NodePhase::Succeeded, error.clone()),
        (_, Some(error), _) => (NodePhase::Failed, Some(error.clone())),
        (NodePhase::Failed, None, _) => (
            NodePhase::Failed,
            Some("node reported failure without detail".to_string()),
        ),
        (phase, None, _) => (phase, None),
    };

    if !current.phase.can_advance_to(phase) {
        return next;
    }

    next.phase = phase;
    if next.error.is_none() {
        next.error = error;
    }
    if phase == NodePhase::Succeeded {
        next.artifact.clone_from(&report.artifact);
    }
    next
}

/// Tracks the known state of one node's collection job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeJobTracker {
    job: NodeJob,
}

impl NodeJobTracker {
    /// Starts tracking a job.
    #[must_use]
    pub const fn new(job: NodeJob) -> Self {
        Self { job }
    }

    /// Returns the tracked job.
    #[must_use]
    pub const fn job(&self) -> &NodeJob {
        &self.job
    }

    /// Consumes the tracker and returns the job.
    #[must_use]
    pub fn into_job(self) -> NodeJob {
        self.job
    }

    /// Returns the node address.
    #[must_use]
    pub fn node(&self) -> &str {
        &self.job.node
    }

    /// Returns true if the job reached a terminal phase.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.job.is_terminal()
    }

    /// Applies a status report. Returns the transition if the phase moved.
    pub fn apply(&mut self, report: &NodeStatusReport) -> Option<PhaseTransition> {
        let next = reconcile(&self.job, report);
        self.replace(next)
    }

    /// Marks the job as timed out unless it is already terminal.
    pub fn mark_timed_out(&mut self, reason: impl Into<String>) -> Option<PhaseTransition> {
        self.force(NodePhase::TimedOut, reason.into())
    }

    /// Marks the job as failed unless it is already terminal.
    pub fn mark_failed(&mut self, reason: impl Into<String>) -> Option<PhaseTransition> {
        self.force(NodePhase::Failed, reason.into())
    }

    /// Folds a newer observation of the same job into this one.
    ///
    /// Used when writing poll results back into shared state: the incoming
    /// job only wins if it is strictly further along.
    pub fn merge(&mut self, observed: &NodeJob) -> Option<PhaseTransition> {
        if observed.node != self.job.node || !self.job.phase.can_advance_to(observed.phase) {
            return None;
        }
        let mut next = observed.clone();
        if self.job.error.is_some() {
            next.error.clone_from(&self.job.error);
        }
        self.replace(next)
    }

    fn force(&mut self, phase: NodePhase, reason: String) -> Option<PhaseTransition> {
        if !self.job.phase.can_advance_to(phase) {
            return None;
        }
        let mut next = self.job.clone();
        next.phase = phase;
        if next.error.is_none() {
            next.error = Some(reason);
        }
        self.replace(next)
    }

    fn replace(&mut self, next: NodeJob) -> Option<PhaseTransition> {
        let from = self.job.phase;
        let to = next.phase;
        self.job = next;
        if from == to {
            return None;
        }
        debug!(node = %self.job.node, from = %from, to = %to, "Node job transition");
        Some(PhaseTransition { from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ArtifactRef, RemoteJobId};

    fn running(node: &str) -> NodeJob {
        NodeJob::running(node, RemoteJobId(format!("job-{node}")))
    }

    #[test]
    fn test_running_to_succeeded() {
        let next = reconcile(&running("n1"), &NodeStatusReport::succeeded("a.zip"));
        assert_eq!(next.phase, NodePhase::Succeeded);
        assert_eq!(next.artifact, Some(ArtifactRef("a.zip".into())));
        assert!(next.error.is_none());
    }

    #[test]
    fn test_error_mid_collection_fails_job() {
        let report = NodeStatusReport {
            phase: NodePhase::Running,
            error: Some("journal unreadable".into()),
            artifact: None,
        };
        let next = reconcile(&running("n1"), &report);
        assert_eq!(next.phase, NodePhase::Failed);
        assert_eq!(next.error.as_deref(), Some("journal unreadable"));
    }

    #[test]
    fn test_success_without_artifact_fails() {
        let report = NodeStatusReport {
            phase: NodePhase::Succeeded,
            error: None,
            artifact: None,
        };
        let next = reconcile(&running("n1"), &report);
        assert_eq!(next.phase, NodePhase::Failed);
        assert!(next.error.is_some());
    }

    #[test]
    fn test_stale_report_ignored() {
        let job = running("n1");
        let report = NodeStatusReport {
            phase: NodePhase::Pending,
            error: None,
            artifact: None,
        };
        assert_eq!(reconcile(&job, &report), job);
        assert_eq!(reconcile(&job, &NodeStatusReport::running()), job);
    }

    #[test]
    fn test_terminal_job_never_changes() {
        let done = reconcile(&running("n1"), &NodeStatusReport::succeeded("a.zip"));
        assert_eq!(reconcile(&done, &NodeStatusReport::failed("late")), done);
        assert_eq!(reconcile(&done, &NodeStatusReport::running()), done);
    }

    #[test]
    fn test_phase_never_regresses_over_sequences() {
        let reports = [
            NodeStatusReport::running(),
            NodeStatusReport {
                phase: NodePhase::Pending,
                error: None,
                artifact: None,
            },
            NodeStatusReport::succeeded("a.zip"),
            NodeStatusReport::failed("late failure"),
            NodeStatusReport::running(),
            NodeStatusReport {
                phase: NodePhase::TimedOut,
                error: None,
                artifact: None,
            },
        ];

        // Every ordering of a prefix of the sequence must be monotonic.
        for start in 0..reports.len() {
            let mut job = NodeJob::pending("n1");
            for report in reports.iter().cycle().skip(start).take(reports.len()) {
                let next = reconcile(&job, report);
                assert!(next.phase.rank() >= job.phase.rank());
                if job.is_terminal() {
                    assert_eq!(next, job);
                }
                job = next;
            }
        }
    }

    #[test]
    fn test_tracker_reports_transitions() {
        let mut tracker = NodeJobTracker::new(running("n1"));
        assert_eq!(tracker.apply(&NodeStatusReport::running()), None);

        let transition = tracker.apply(&NodeStatusReport::failed("oom"));
        assert_eq!(
            transition,
            Some(PhaseTransition {
                from: NodePhase::Running,
                to: NodePhase::Failed
            })
        );
        assert!(tracker.is_terminal());
        assert_eq!(tracker.apply(&NodeStatusReport::succeeded("a.zip")), None);
    }

    #[test]
    fn test_mark_timed_out_keeps_first_error() {
        let mut tracker = NodeJobTracker::new(running("n1"));
        assert!(tracker.mark_timed_out("no answer within 10000ms").is_some());
        assert!(tracker.mark_failed("second").is_none());
        assert_eq!(tracker.job().phase, NodePhase::TimedOut);
        assert_eq!(tracker.job().error.as_deref(), Some("no answer within 10000ms"));
    }

    #[test]
    fn test_merge_only_moves_forward() {
        let mut tracker = NodeJobTracker::new(running("n1"));
        let stale = NodeJob::pending("n1");
        assert!(tracker.merge(&stale).is_none());

        let done = reconcile(&running("n1"), &NodeStatusReport::succeeded("a.zip"));
        assert!(tracker.merge(&done).is_some());
        assert_eq!(tracker.job(), &done);

        let other_node = NodeJob::rejected("n2", "refused");
        assert!(tracker.merge(&other_node).is_none());
    }
}
