//! Error types for the bundle coordination engine.
//!
//! Two layers exist. [`BundleError`] is what callers of the coordinator see;
//! it only covers request validation and lookup failures. [`NodeError`] is
//! what a [`NodeClient`](crate::node::NodeClient) reports for a single node;
//! it is absorbed into node job state and never returned to the caller.

use crate::core::{BundleId, BundlePhase};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Errors returned by the bundle coordinator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BundleError {
    /// The request was malformed (e.g. an empty node list).
    #[error("Invalid request: {reason}")]
    InvalidRequest {
        /// Why the request was rejected.
        reason: String,
    },

    /// The bundle is unknown or was deleted.
    #[error("Bundle not found: {id}")]
    NotFound {
        /// The requested identifier.
        id: BundleId,
    },

    /// The bundle has no archive to download in its current phase.
    #[error("Bundle {id} is not ready for download (phase: {phase})")]
    NotReady {
        /// The bundle identifier.
        id: BundleId,
        /// The phase the bundle was in.
        phase: BundlePhase,
    },

    /// An internal invariant was violated.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BundleError {
    /// Creates an invalid request error.
    #[must_use]
    pub fn invalid_request(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }

    /// Creates a not found error.
    #[must_use]
    pub fn not_found(id: &BundleId) -> Self {
        Self::NotFound { id: id.clone() }
    }

    /// Creates a not ready error.
    #[must_use]
    pub fn not_ready(id: &BundleId, phase: BundlePhase) -> Self {
        Self::NotReady {
            id: id.clone(),
            phase,
        }
    }

    /// Returns a stable machine-readable code for the error kind.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest { .. } => "INVALID_REQUEST",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::NotReady { .. } => "NOT_READY",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("code".to_string(), serde_json::json!(self.code()));

        match self {
            Self::InvalidRequest { reason } => {
                map.insert("reason".to_string(), serde_json::json!(reason));
            }
            Self::NotFound { id } => {
                map.insert("bundle_id".to_string(), serde_json::json!(id));
            }
            Self::NotReady { id, phase } => {
                map.insert("bundle_id".to_string(), serde_json::json!(id));
                map.insert("phase".to_string(), serde_json::json!(phase));
            }
            Self::Internal(_) => {}
        }

        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        map
    }
}

/// Errors reported for a single node.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NodeError {
    /// The node could not be reached.
    #[error("Node {node} unreachable: {reason}")]
    Unreachable {
        /// The node address.
        node: String,
        /// Transport-level detail.
        reason: String,
    },

    /// The node refused the request.
    #[error("Node {node} rejected request: {reason}")]
    Rejected {
        /// The node address.
        node: String,
        /// The reason given by the node.
        reason: String,
    },

    /// The node does not know the job or artifact.
    #[error("Node {node} has no record of {what}")]
    UnknownJob {
        /// The node address.
        node: String,
        /// The job id or artifact reference asked for.
        what: String,
    },

    /// The call did not complete within the per-node timeout.
    #[error("Node {node} did not respond within {}ms", timeout.as_millis())]
    Timeout {
        /// The node address.
        node: String,
        /// The timeout that expired.
        timeout: Duration,
    },
}

impl NodeError {
    /// Creates an unreachable error.
    #[must_use]
    pub fn unreachable(node: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unreachable {
            node: node.into(),
            reason: reason.into(),
        }
    }

    /// Creates a rejected error.
    #[must_use]
    pub fn rejected(node: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Rejected {
            node: node.into(),
            reason: reason.into(),
        }
    }

    /// Creates an unknown job error.
    #[must_use]
    pub fn unknown_job(node: impl Into<String>, what: impl Into<String>) -> Self {
        Self::UnknownJob {
            node: node.into(),
            what: what.into(),
        }
    }

    /// Creates a timeout error.
    #[must_use]
    pub fn timeout(node: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            node: node.into(),
            timeout,
        }
    }

    /// Returns true if this error means the node did not answer in time.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
