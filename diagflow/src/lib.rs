//! # Diagflow
//!
//! A coordination engine for cluster-wide diagnostics bundles.
//!
//! A bundle is one diagnostics collection spread over many nodes. Diagflow
//! fans the request out to every node, tracks each node's collection job,
//! folds the per-node state into one bundle phase and assembles the
//! finished artifacts into a single downloadable archive.
//!
//! - **Bounded fan-out**: every node call shares one concurrency cap
//! - **Partial failure tolerance**: node errors are recorded, never raised
//! - **Idempotent status**: a status call runs one polling pass and a
//!   finished bundle is never polled again
//! - **Forward-only state**: stale node reports cannot move a job backwards
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use diagflow::prelude::*;
//!
//! let coordinator = BundleCoordinator::new(client, CoordinatorConfig::default())?;
//!
//! let id = coordinator.create(&["10.0.0.1", "10.0.0.2"]).await?;
//! let bundle = coordinator.wait(&id).await?;
//!
//! if bundle.phase.is_downloadable() {
//!     let archive = coordinator.download(&id).await?;
//!     archive.write_to_path(archive.name())?;
//! }
//! coordinator.delete(&id).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod archive;
pub mod cancellation;
pub mod config;
pub mod coordinator;
pub mod core;
pub mod errors;
pub mod events;
pub mod node;
pub mod observability;
pub mod poller;
pub mod registry;
pub mod testing;
pub mod tracker;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::archive::{ArchiveManifest, BundleArchive};
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::CoordinatorConfig;
    pub use crate::coordinator::BundleCoordinator;
    pub use crate::core::{
        ArtifactRef, Bundle, BundleId, BundlePhase, BundleSummary, NodeJob, NodePhase,
        RemoteJobId,
    };
    pub use crate::errors::{BundleError, NodeError};
    pub use crate::events::{BundleEvent, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::node::{NodeClient, NodeStatusReport};
    pub use crate::observability::{init_logging, LogFormat};
    pub use crate::poller::{PollOutcome, StatusPoller};
    pub use crate::registry::BundleRegistry;
    pub use crate::tracker::{reconcile, NodeJobTracker};
    pub use crate::utils::generate_bundle_id;
}
