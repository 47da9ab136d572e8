//! Test assertions for bundle snapshots.

use crate::core::{Bundle, BundlePhase, NodePhase};

/// Asserts that the bundle has the expected aggregate phase.
pub fn assert_bundle_phase(bundle: &Bundle, expected: BundlePhase) {
    assert_eq!(
        bundle.phase, expected,
        "Expected bundle {} to be {:?}, got {:?}. Jobs: {:?}",
        bundle.id, expected, bundle.phase, bundle.jobs
    );
}

/// Asserts that the job for `node` has the expected phase.
pub fn assert_node_phase(bundle: &Bundle, node: &str, expected: NodePhase) {
    let Some(job) = bundle.job(node) else {
        panic!(
            "Bundle {} has no job for node '{}'. Nodes: {:?}",
            bundle.id,
            node,
            bundle.jobs.iter().map(|j| j.node.as_str()).collect::<Vec<_>>()
        );
    };
    assert_eq!(
        job.phase, expected,
        "Expected node '{}' to be {:?}, got {:?} (error: {:?})",
        node, expected, job.phase, job.error
    );
}

/// Asserts that the job for `node` recorded an error containing `needle`.
pub fn assert_node_error_contains(bundle: &Bundle, node: &str, needle: &str) {
    let error = bundle.job(node).and_then(|job| job.error.as_deref());
    assert!(
        error.is_some_and(|e| e.contains(needle)),
        "Expected node '{}' error to contain '{}', got {:?}",
        node,
        needle,
        error
    );
}

/// Asserts the succeeded/failed/active split of a bundle's jobs.
pub fn assert_phase_counts(bundle: &Bundle, succeeded: usize, failed: usize, active: usize) {
    let counts = bundle.counts();
    assert_eq!(
        (counts.succeeded, counts.failed, counts.active),
        (succeeded, failed, active),
        "Unexpected (succeeded, failed, active) counts for bundle {}",
        bundle.id
    );
}
