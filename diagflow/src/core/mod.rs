//! Core domain model types for diagflow.
//!
//! This module contains the fundamental types used throughout the engine:
//! - Node job and bundle phase enums
//! - The aggregation table from node phases to a bundle phase
//! - Bundle and node job records

mod aggregate;
mod bundle;
mod phase;

pub use aggregate::{aggregate_phase, PhaseCounts};
pub use bundle::{ArtifactRef, Bundle, BundleId, BundleSummary, NodeJob, RemoteJobId};
pub use phase::{BundlePhase, NodePhase};
