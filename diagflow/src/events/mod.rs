//! Lifecycle events for bundles.
//!
//! The coordinator reports bundle lifecycle changes to an [`EventSink`].
//! Sinks never fail the operation that emitted the event.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

use crate::core::{BundleId, BundlePhase, NodePhase};
use serde::Serialize;

/// A bundle was created.
pub const BUNDLE_CREATED: &str = "bundle.created";
/// A node job moved to a new phase.
pub const BUNDLE_NODE_TRANSITION: &str = "bundle.node_transition";
/// A bundle reached a terminal phase.
pub const BUNDLE_COMPLETED: &str = "bundle.completed";
/// An archive was assembled for download.
pub const BUNDLE_ARCHIVE_ASSEMBLED: &str = "bundle.archive_assembled";
/// A bundle was deleted.
pub const BUNDLE_DELETED: &str = "bundle.deleted";

/// Payload of a bundle lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BundleEvent {
    /// See [`BUNDLE_CREATED`].
    Created {
        /// Bundle identifier.
        bundle_id: BundleId,
        /// Number of nodes requested.
        nodes: usize,
        /// Initial aggregate phase.
        phase: BundlePhase,
    },
    /// See [`BUNDLE_NODE_TRANSITION`].
    NodeTransition {
        /// Bundle identifier.
        bundle_id: BundleId,
        /// Node address.
        node: String,
        /// Phase before.
        from: NodePhase,
        /// Phase after.
        to: NodePhase,
    },
    /// See [`BUNDLE_COMPLETED`].
    Completed {
        /// Bundle identifier.
        bundle_id: BundleId,
        /// Terminal phase.
        phase: BundlePhase,
        /// Nodes that succeeded.
        succeeded: usize,
        /// Nodes that failed or timed out.
        failed: usize,
    },
    /// See [`BUNDLE_ARCHIVE_ASSEMBLED`].
    ArchiveAssembled {
        /// Bundle identifier.
        bundle_id: BundleId,
        /// Archive size in bytes.
        size: u64,
        /// Succeeded nodes whose payload is absent.
        missing: usize,
    },
    /// See [`BUNDLE_DELETED`].
    Deleted {
        /// Bundle identifier.
        bundle_id: BundleId,
        /// Phase at the time of deletion.
        phase: BundlePhase,
    },
}

impl BundleEvent {
    /// Returns the event type string.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::Created { .. } => BUNDLE_CREATED,
            Self::NodeTransition { .. } => BUNDLE_NODE_TRANSITION,
            Self::Completed { .. } => BUNDLE_COMPLETED,
            Self::ArchiveAssembled { .. } => BUNDLE_ARCHIVE_ASSEMBLED,
            Self::Deleted { .. } => BUNDLE_DELETED,
        }
    }

    /// Sends the event to `sink` without blocking.
    pub fn emit_to(&self, sink: &dyn EventSink) {
        sink.try_emit(self.event_type(), serde_json::to_value(self).ok());
    }
}
