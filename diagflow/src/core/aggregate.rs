//! Aggregation of node job phases into one bundle phase.

use super::{BundlePhase, NodePhase};

/// Counts of node jobs per phase class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseCounts {
    /// Jobs still pending or running.
    pub active: usize,
    /// Jobs that succeeded.
    pub succeeded: usize,
    /// Jobs that failed or timed out.
    pub failed: usize,
}

impl PhaseCounts {
    /// Tallies a sequence of node phases.
    pub fn tally<I>(phases: I) -> Self
    where
        I: IntoIterator<Item = NodePhase>,
    {
        phases.into_iter().fold(Self::default(), |mut counts, phase| {
            match phase {
                NodePhase::Pending | NodePhase::Running => counts.active += 1,
                NodePhase::Succeeded => counts.succeeded += 1,
                NodePhase::Failed | NodePhase::TimedOut => counts.failed += 1,
            }
            counts
        })
    }

    /// Total number of jobs counted.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.active + self.succeeded + self.failed
    }

    /// Resolves the counts to a bundle phase.
    ///
    /// | active | succeeded | failed | phase          |
    /// |--------|-----------|--------|----------------|
    /// | 0      | 0         | 0      | Pending        |
    /// | >0     | any       | any    | InProgress     |
    /// | 0      | >0        | 0      | Done           |
    /// | 0      | 0         | >0     | Failed         |
    /// | 0      | >0        | >0     | PartialFailure |
    #[must_use]
    pub const fn phase(&self) -> BundlePhase {
        match (self.active, self.succeeded, self.failed) {
            (0, 0, 0) => BundlePhase::Pending,
            (0, _, 0) => BundlePhase::Done,
            (0, 0, _) => BundlePhase::Failed,
            (0, _, _) => BundlePhase::PartialFailure,
            _ => BundlePhase::InProgress,
        }
    }
}

/// Computes the aggregate bundle phase for a set of node phases.
///
/// Order is irrelevant; only the multiset of phases matters.
pub fn aggregate_phase<I>(phases: I) -> BundlePhase
where
    I: IntoIterator<Item = NodePhase>,
{
    PhaseCounts::tally(phases).phase()
}
