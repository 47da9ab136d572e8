//! Bundle and node job records.

use super::{aggregate_phase, BundlePhase, NodePhase, PhaseCounts};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Cluster-unique identifier of a diagnostics bundle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BundleId(String);

impl BundleId {
    /// Wraps an existing identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BundleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BundleId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Job identifier assigned by a node when it accepts a start request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteJobId(pub String);

impl fmt::Display for RemoteJobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Location of a finished artifact on the node that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactRef(pub String);

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One node's share of a bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeJob {
    /// Address of the node.
    pub node: String,
    /// Job id returned by the node, absent if the start was never accepted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_job_id: Option<RemoteJobId>,
    /// Current phase.
    pub phase: NodePhase,
    /// First error observed for this job.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Artifact location on the node once the job succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ArtifactRef>,
}

impl NodeJob {
    /// Creates a job that has not been started yet.
    #[must_use]
    pub fn pending(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            remote_job_id: None,
            phase: NodePhase::Pending,
            error: None,
            artifact: None,
        }
    }

    /// Creates a job the node accepted.
    #[must_use]
    pub fn running(node: impl Into<String>, remote_job_id: RemoteJobId) -> Self {
        Self {
            remote_job_id: Some(remote_job_id),
            phase: NodePhase::Running,
            ..Self::pending(node)
        }
    }

    /// Creates a job that failed before it started.
    #[must_use]
    pub fn rejected(node: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            phase: NodePhase::Failed,
            error: Some(error.into()),
            ..Self::pending(node)
        }
    }

    /// Creates a job whose start call did not answer in time.
    #[must_use]
    pub fn timed_out(node: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            phase: NodePhase::TimedOut,
            error: Some(error.into()),
            ..Self::pending(node)
        }
    }

    /// Returns true if the job is in a terminal phase.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }
}

/// A cluster-wide diagnostics bundle and its node jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bundle {
    /// The bundle identifier.
    pub id: BundleId,
    /// When the bundle was created.
    pub created_at: DateTime<Utc>,
    /// When the bundle first reached a terminal phase.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Cached aggregate phase.
    pub phase: BundlePhase,
    /// Node jobs, in the order the nodes were requested.
    pub jobs: Vec<NodeJob>,
    /// Name of the assembled archive once the bundle is downloadable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
    /// Size of the assembled archive in bytes, once assembled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_size: Option<u64>,
}

impl Bundle {
    /// Creates a bundle and computes its initial phase.
    #[must_use]
    pub fn new(id: BundleId, jobs: Vec<NodeJob>) -> Self {
        let mut bundle = Self {
            id,
            created_at: Utc::now(),
            finished_at: None,
            phase: BundlePhase::Pending,
            jobs,
            artifact: None,
            archive_size: None,
        };
        bundle.recompute_phase();
        bundle
    }

    /// Recomputes the cached aggregate phase from the node jobs.
    ///
    /// Returns the previous phase when it changed.
    pub fn recompute_phase(&mut self) -> Option<BundlePhase> {
        if self.phase == BundlePhase::Deleted {
            return None;
        }

        let next = aggregate_phase(self.jobs.iter().map(|job| job.phase));
        if next == self.phase {
            return None;
        }

        let previous = std::mem::replace(&mut self.phase, next);
        if next.is_terminal() && self.finished_at.is_none() {
            self.finished_at = Some(Utc::now());
        }
        if next.is_downloadable() {
            self.artifact = Some(format!("{}.bundle", self.id));
        }
        Some(previous)
    }

    /// Returns the job for a node address.
    #[must_use]
    pub fn job(&self, node: &str) -> Option<&NodeJob> {
        self.jobs.iter().find(|job| job.node == node)
    }

    /// Returns the per-phase counts of the node jobs.
    #[must_use]
    pub fn counts(&self) -> PhaseCounts {
        PhaseCounts::tally(self.jobs.iter().map(|job| job.phase))
    }

    /// Returns `node: error` lines for every job that recorded an error.
    #[must_use]
    pub fn errors(&self) -> Vec<String> {
        self.jobs
            .iter()
            .filter_map(|job| {
                job.error
                    .as_ref()
                    .map(|error| format!("{}: {}", job.node, error))
            })
            .collect()
    }

    /// Returns a summary suitable for listings.
    #[must_use]
    pub fn summary(&self) -> BundleSummary {
        let counts = self.counts();
        BundleSummary {
            id: self.id.clone(),
            created_at: self.created_at,
            finished_at: self.finished_at,
            phase: self.phase,
            nodes: counts.total(),
            succeeded: counts.succeeded,
            failed: counts.failed,
            archive_size: self.archive_size,
            errors: self.errors(),
        }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("id".to_string(), serde_json::json!(self.id));
        map.insert("phase".to_string(), serde_json::json!(self.phase));
        map.insert(
            "created_at".to_string(),
            serde_json::json!(self.created_at.to_rfc3339()),
        );
        map.insert("jobs".to_string(), serde_json::json!(self.jobs));
        if let Some(finished_at) = self.finished_at {
            map.insert(
                "finished_at".to_string(),
                serde_json::json!(finished_at.to_rfc3339()),
            );
        }
        if let Some(ref artifact) = self.artifact {
            map.insert("artifact".to_string(), serde_json::json!(artifact));
        }
        map
    }
}

/// A listing entry for a bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleSummary {
    /// The bundle identifier.
    pub id: BundleId,
    /// When the bundle was created.
    pub created_at: DateTime<Utc>,
    /// When the bundle reached a terminal phase.
    pub finished_at: Option<DateTime<Utc>>,
    /// Aggregate phase.
    pub phase: BundlePhase,
    /// Number of nodes in the bundle.
    pub nodes: usize,
    /// Nodes that succeeded.
    pub succeeded: usize,
    /// Nodes that failed or timed out.
    pub failed: usize,
    /// Archive size in bytes, once assembled.
    pub archive_size: Option<u64>,
    /// Per-node error lines.
    pub errors: Vec<String>,
}
