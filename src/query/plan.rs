//! Tiered request planner
//!
//! Splits a source list into the slice the current node queries directly
//! and the slices it delegates. With `N` sources and `max_fanout = k`, at
//! most `k` servers are contacted directly; when `N > k` the first `k`
//! become leaders and the remaining `N - k` are partitioned across them in
//! contiguous groups differing in size by at most one. A leader runs the
//! same planner over its delegated group, so the recursion covers every
//! source exactly once.
//!
//! Planning is pure and deterministic: identical input order yields an
//! identical plan, and earlier sources always win leadership ties.

use crate::error::{Error, Result};
use crate::types::ServerInfo;

/// One directly-contacted server plus the sources delegated to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderSlice {
    /// Server contacted directly at this tier
    pub leader: ServerInfo,

    /// Sources the leader covers on this node's behalf; never contains the
    /// leader itself
    pub delegated: Vec<ServerInfo>,
}

/// Plan one fan-out tier
///
/// Returns one [`LeaderSlice`] per directly-contacted server, in input
/// order. The union of every slice's leader and delegated sources is
/// exactly the input list.
pub fn plan_fanout(sources: &[ServerInfo], max_fanout: u32) -> Result<Vec<LeaderSlice>> {
    if max_fanout == 0 {
        return Err(Error::InvalidArgument(
            "max_fanout must be greater than zero".to_string(),
        ));
    }

    let k = (max_fanout as usize).min(sources.len());
    let mut slices: Vec<LeaderSlice> = sources[..k]
        .iter()
        .map(|leader| LeaderSlice {
            leader: leader.clone(),
            delegated: Vec::new(),
        })
        .collect();

    let remainder = &sources[k..];
    if !remainder.is_empty() {
        // Contiguous groups; the first (remainder % k) leaders take the
        // larger size.
        let base = remainder.len() / k;
        let extra = remainder.len() % k;
        let mut offset = 0;
        for (index, slice) in slices.iter_mut().enumerate() {
            let size = base + usize::from(index < extra);
            slice.delegated = remainder[offset..offset + size].to_vec();
            offset += size;
        }
    }

    Ok(slices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn sources(n: usize) -> Vec<ServerInfo> {
        (0..n)
            .map(|i| ServerInfo::new(format!("server-{i:02}"), 8080))
            .collect()
    }

    #[test]
    fn test_zero_fanout_rejected() {
        assert!(plan_fanout(&sources(3), 0).is_err());
    }

    #[test]
    fn test_small_list_queried_directly() {
        let list = sources(3);
        let slices = plan_fanout(&list, 5).unwrap();
        assert_eq!(slices.len(), 3);
        assert!(slices.iter().all(|s| s.delegated.is_empty()));
    }

    #[test]
    fn test_leaders_are_earliest_sources() {
        let list = sources(10);
        let slices = plan_fanout(&list, 2).unwrap();
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].leader, list[0]);
        assert_eq!(slices[1].leader, list[1]);
    }

    #[test]
    fn test_group_sizes_differ_by_at_most_one() {
        let list = sources(10);
        let slices = plan_fanout(&list, 3).unwrap();
        // 7 delegated across 3 leaders: 3, 2, 2.
        let sizes: Vec<_> = slices.iter().map(|s| s.delegated.len()).collect();
        assert_eq!(sizes, vec![3, 2, 2]);
    }

    #[test]
    fn test_each_source_exactly_once_single_tier() {
        let list = sources(10);
        let slices = plan_fanout(&list, 4).unwrap();

        let mut seen = HashSet::new();
        for slice in &slices {
            assert!(seen.insert(slice.leader.clone()));
            for source in &slice.delegated {
                assert!(seen.insert(source.clone()));
            }
        }
        assert_eq!(seen.len(), list.len());
    }

    #[test]
    fn test_each_source_exactly_once_recursive() {
        // Simulate full recursion for many shapes.
        fn contacted(sources: &[ServerInfo], max_fanout: u32) -> Vec<ServerInfo> {
            let mut all = Vec::new();
            for slice in plan_fanout(sources, max_fanout).unwrap() {
                all.push(slice.leader.clone());
                all.extend(contacted(&slice.delegated, max_fanout));
            }
            all
        }

        for n in 0..40 {
            for k in 1..8 {
                let list = sources(n);
                let all = contacted(&list, k);
                assert_eq!(all.len(), n, "n={n} k={k}");
                let distinct: HashSet<_> = all.iter().cloned().collect();
                assert_eq!(distinct.len(), n, "n={n} k={k}");
            }
        }
    }

    #[test]
    fn test_plan_is_deterministic() {
        let list = sources(17);
        assert_eq!(
            plan_fanout(&list, 4).unwrap(),
            plan_fanout(&list, 4).unwrap()
        );
    }
}
