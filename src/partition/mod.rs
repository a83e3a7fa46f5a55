//! Splitting reclaimed work across alive nodes.
//!
//! A [`PartitionWeigher`] may supply per-node shares for a resource group or a
//! schedule kind. When it has no data, or its shares do not cover every item,
//! the rest is split evenly: with `N` items over `K` nodes every node gets
//! `N / K` items and the first `N % K` nodes in address order get one more.

mod weigher;

pub use weigher::{CapacityWeigher, NoWeighting};

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;

use crate::error::Result;
use crate::membership::NodeAddress;
use crate::store::ScheduleKind;

/// Per-node item counts. `None` means no weighting data is available.
pub type NodeShares = Option<HashMap<NodeAddress, usize>>;

#[async_trait]
pub trait PartitionWeigher: Send + Sync {
    async fn weight_for_resource_group(&self, group: Option<&str>, total: usize)
        -> Result<NodeShares>;

    async fn weight_for_schedule_kind(&self, kind: ScheduleKind, total: usize)
        -> Result<NodeShares>;
}

/// Result of splitting items across destination nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Distribution<T> {
    pub assignments: BTreeMap<NodeAddress, Vec<T>>,
    /// Items that could not be placed because there was no destination.
    pub unassigned: Vec<T>,
}

impl<T> Distribution<T> {
    pub fn assigned_count(&self) -> usize {
        self.assignments.values().map(Vec::len).sum()
    }
}

/// Even shares of `total` over `nodes`, in the order given.
pub fn even_shares(nodes: &[NodeAddress], total: usize) -> Vec<(NodeAddress, usize)> {
    if nodes.is_empty() {
        return Vec::new();
    }
    let base = total / nodes.len();
    let extra = total % nodes.len();
    nodes
        .iter()
        .enumerate()
        .map(|(i, node)| (node.clone(), if i < extra { base + 1 } else { base }))
        .collect()
}

/// Assigns `items` to `destinations` in iteration order.
///
/// Weighted shares are honoured first, restricted to `destinations`; items the
/// weights leave over are split evenly. Each item lands on exactly one node.
pub fn distribute<T>(
    items: Vec<T>,
    weights: NodeShares,
    destinations: &[NodeAddress],
) -> Distribution<T> {
    let mut nodes: Vec<NodeAddress> = destinations.to_vec();
    nodes.sort();
    nodes.dedup();

    if nodes.is_empty() {
        return Distribution {
            assignments: BTreeMap::new(),
            unassigned: items,
        };
    }

    let mut assignments: BTreeMap<NodeAddress, Vec<T>> = BTreeMap::new();
    let mut iter = items.into_iter();

    if let Some(weights) = weights {
        let weighted: BTreeMap<NodeAddress, usize> = weights
            .into_iter()
            .filter(|(node, _)| nodes.binary_search(node).is_ok())
            .collect();
        for (node, share) in weighted {
            let taken: Vec<T> = iter.by_ref().take(share).collect();
            if !taken.is_empty() {
                assignments.entry(node).or_default().extend(taken);
            }
        }
    }

    let remaining: Vec<T> = iter.collect();
    if !remaining.is_empty() {
        let mut rest = remaining.into_iter();
        for (node, share) in even_shares(&nodes, rest.len()) {
            let taken: Vec<T> = rest.by_ref().take(share).collect();
            if !taken.is_empty() {
                assignments.entry(node).or_default().extend(taken);
            }
        }
    }

    Distribution {
        assignments,
        unassigned: Vec::new(),
    }
}
