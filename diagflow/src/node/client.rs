//! Node client trait and status report type.

use crate::core::{ArtifactRef, NodePhase, RemoteJobId};
use crate::errors::NodeError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A node's answer to a status query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatusReport {
    /// The phase the node reports for the job.
    pub phase: NodePhase,
    /// Error reported by the node, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Artifact location, present once the job succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ArtifactRef>,
}

impl NodeStatusReport {
    /// A report for a job that is still collecting.
    #[must_use]
    pub const fn running() -> Self {
        Self {
            phase: NodePhase::Running,
            error: None,
            artifact: None,
        }
    }

    /// A report for a finished job.
    #[must_use]
    pub fn succeeded(artifact: impl Into<String>) -> Self {
        Self {
            phase: NodePhase::Succeeded,
            error: None,
            artifact: Some(ArtifactRef(artifact.into())),
        }
    }

    /// A report for a job that failed on the node.
    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            phase: NodePhase::Failed,
            error: Some(error.into()),
            artifact: None,
        }
    }
}

/// RPC surface of one node's local diagnostics endpoint.
///
/// Implementations must be safe to share between concurrent callers and
/// every call must be idempotent. Calls are expected to return within the
/// implementation's own timeout; the engine wraps them in its per-node
/// timeout as well.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Asks the node to start collecting and returns its job id.
    async fn start_collection(&self, node: &str) -> Result<RemoteJobId, NodeError>;

    /// Queries the status of a collection job.
    async fn get_status(
        &self,
        node: &str,
        job: &RemoteJobId,
    ) -> Result<NodeStatusReport, NodeError>;

    /// Downloads a finished artifact from the node.
    async fn fetch_artifact(
        &self,
        node: &str,
        artifact: &ArtifactRef,
    ) -> Result<Vec<u8>, NodeError>;

    /// Cancels a job and removes whatever it left on the node.
    async fn cancel(&self, node: &str, job: &RemoteJobId) -> Result<(), NodeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_constructors() {
        assert_eq!(NodeStatusReport::running().phase, NodePhase::Running);

        let done = NodeStatusReport::succeeded("/var/lib/diag/n1.zip");
        assert_eq!(done.phase, NodePhase::Succeeded);
        assert_eq!(done.artifact, Some(ArtifactRef("/var/lib/diag/n1.zip".into())));

        let failed = NodeStatusReport::failed("disk full");
        assert_eq!(failed.phase, NodePhase::Failed);
        assert_eq!(failed.error.as_deref(), Some("disk full"));
    }

    #[test]
    fn test_report_serialize() {
        let json = serde_json::to_value(NodeStatusReport::running()).unwrap();
        assert_eq!(json, serde_json::json!({"phase": "running"}));
    }

    #[tokio::test]
    async fn test_mock_client() {
        let mut client = MockNodeClient::new();
        client
            .expect_start_collection()
            .returning(|node| Ok(RemoteJobId(format!("job-{node}"))));

        let job = client.start_collection("n1").await.unwrap();
        assert_eq!(job, RemoteJobId("job-n1".into()));
    }
}
