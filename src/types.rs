//! Core type definitions for the device graph engine.

use serde::{Deserialize, Serialize};

/// Execution rank that a device is assigned to.
///
/// Ranks partition the graph across execution units; rank projection
/// (`DeviceGraph::follow_links`) produces a graph sized for one rank.
pub type Rank = u32;

/// Thread index within a rank.
pub type Thread = u32;

/// Partition assignment for a device: which execution unit owns it.
///
/// Unset until explicitly assigned; `DeviceGraph::check_partition` requires
/// every registered device to carry one before dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Partition {
    /// Execution rank
    pub rank: Rank,
    /// Thread within the rank
    pub thread: Thread,
}

impl Partition {
    /// Creates a partition assignment with an explicit rank and thread.
    pub fn new(rank: Rank, thread: Thread) -> Self {
        Self { rank, thread }
    }
}

impl std::fmt::Display for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.rank, self.thread)
    }
}
