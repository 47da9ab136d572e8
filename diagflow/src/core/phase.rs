//! Node job and bundle phase enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The phase of a single node's collection job.
///
/// Phases are ordered: a job only ever moves to a phase with a higher rank,
/// and never leaves a terminal phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodePhase {
    /// Collection has not been started on the node yet.
    Pending,
    /// The node accepted the start request and is collecting.
    Running,
    /// The node finished collecting and holds an artifact.
    Succeeded,
    /// The node rejected the request or reported an error.
    Failed,
    /// The node did not answer within the per-node timeout or the deadline.
    TimedOut,
}

impl Default for NodePhase {
    fn default() -> Self {
        Self::Pending
    }
}

impl fmt::Display for NodePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::TimedOut => write!(f, "timed_out"),
        }
    }
}

impl NodePhase {
    /// Returns true if no further transition can happen.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::TimedOut)
    }

    /// Returns true if the job produced an artifact.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    /// Returns true if the job ended without an artifact.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::TimedOut)
    }

    /// Position in the forward-only phase order.
    ///
    /// All terminal phases share the highest rank, so one terminal phase
    /// can never replace another.
    #[must_use]
    pub const fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Running => 1,
            Self::Succeeded | Self::Failed | Self::TimedOut => 2,
        }
    }

    /// Returns true if moving from `self` to `next` is a forward transition.
    #[must_use]
    pub fn can_advance_to(&self, next: Self) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

/// The aggregate phase of a cluster-wide bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BundlePhase {
    /// The bundle has no node jobs yet.
    Pending,
    /// At least one node job is still running.
    InProgress,
    /// Every node job succeeded.
    Done,
    /// All node jobs finished, some succeeded and some did not.
    PartialFailure,
    /// Every node job failed or timed out.
    Failed,
    /// The bundle was removed from the registry.
    Deleted,
}

impl Default for BundlePhase {
    fn default() -> Self {
        Self::Pending
    }
}

impl fmt::Display for BundlePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Done => write!(f, "done"),
            Self::PartialFailure => write!(f, "partial_failure"),
            Self::Failed => write!(f, "failed"),
            Self::Deleted => write!(f, "deleted"),
        }
    }
}

impl BundlePhase {
    /// Returns true if the bundle will not change phase any more.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Done | Self::PartialFailure | Self::Failed | Self::Deleted
        )
    }

    /// Returns true if an archive can be assembled for this phase.
    #[must_use]
    pub fn is_downloadable(&self) -> bool {
        matches!(self, Self::Done | Self::PartialFailure)
    }
}
