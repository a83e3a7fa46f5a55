use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;

use super::{NodeShares, PartitionWeigher};
use crate::error::Result;
use crate::membership::NodeAddress;
use crate::store::ScheduleKind;

/// Weigher with no data; every split falls back to even shares.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoWeighting;

#[async_trait]
impl PartitionWeigher for NoWeighting {
    async fn weight_for_resource_group(
        &self,
        _group: Option<&str>,
        _total: usize,
    ) -> Result<NodeShares> {
        Ok(None)
    }

    async fn weight_for_schedule_kind(
        &self,
        _kind: ScheduleKind,
        _total: usize,
    ) -> Result<NodeShares> {
        Ok(None)
    }
}

/// Static capacity weights per node, optionally overridden per resource group.
///
/// Shares are apportioned by largest remainder so they always sum to the
/// requested total.
#[derive(Debug, Clone, Default)]
pub struct CapacityWeigher {
    default_capacity: BTreeMap<NodeAddress, u32>,
    group_capacity: HashMap<String, BTreeMap<NodeAddress, u32>>,
}

impl CapacityWeigher {
    pub fn new<I, A>(capacities: I) -> Self
    where
        I: IntoIterator<Item = (A, u32)>,
        A: Into<NodeAddress>,
    {
        Self {
            default_capacity: capacities.into_iter().map(|(n, c)| (n.into(), c)).collect(),
            group_capacity: HashMap::new(),
        }
    }

    pub fn with_group<I, A>(mut self, group: impl Into<String>, capacities: I) -> Self
    where
        I: IntoIterator<Item = (A, u32)>,
        A: Into<NodeAddress>,
    {
        self.group_capacity.insert(
            group.into(),
            capacities.into_iter().map(|(n, c)| (n.into(), c)).collect(),
        );
        self
    }

    fn capacities_for(&self, group: Option<&str>) -> &BTreeMap<NodeAddress, u32> {
        group
            .and_then(|g| self.group_capacity.get(g))
            .unwrap_or(&self.default_capacity)
    }
}

#[async_trait]
impl PartitionWeigher for CapacityWeigher {
    async fn weight_for_resource_group(
        &self,
        group: Option<&str>,
        total: usize,
    ) -> Result<NodeShares> {
        Ok(apportion(self.capacities_for(group), total))
    }

    async fn weight_for_schedule_kind(
        &self,
        _kind: ScheduleKind,
        total: usize,
    ) -> Result<NodeShares> {
        Ok(apportion(&self.default_capacity, total))
    }
}

/// Largest-remainder apportionment of `total` by `weights`. Ties go to the
/// lower address.
fn apportion(weights: &BTreeMap<NodeAddress, u32>, total: usize) -> NodeShares {
    let sum: u64 = weights.values().map(|w| u64::from(*w)).sum();
    if sum == 0 {
        return None;
    }

    let total = total as u64;
    let mut shares: Vec<(NodeAddress, u64, u64)> = weights
        .iter()
        .map(|(node, w)| {
            let exact = total * u64::from(*w);
            (node.clone(), exact / sum, exact % sum)
        })
        .collect();

    let assigned: u64 = shares.iter().map(|(_, s, _)| *s).sum();
    let mut leftover = total - assigned;

    let mut order: Vec<usize> = (0..shares.len()).collect();
    // Stable sort keeps address order among equal remainders.
    order.sort_by(|&a, &b| shares[b].2.cmp(&shares[a].2));
    for idx in order {
        if leftover == 0 {
            break;
        }
        shares[idx].1 += 1;
        leftover -= 1;
    }

    Some(
        shares
            .into_iter()
            .map(|(node, share, _)| (node, share as usize))
            .collect(),
    )
}
