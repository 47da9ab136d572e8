//! Testing utilities for diagflow.
//!
//! This module provides:
//! - A scripted in-memory node client
//! - Assertions for bundle and node job state

mod assertions;
mod mocks;

pub use assertions::{
    assert_bundle_phase, assert_node_error_contains, assert_node_phase, assert_phase_counts,
};
pub use mocks::{FinishBehavior, NodeScript, ScriptedNodeClient, StartBehavior};
