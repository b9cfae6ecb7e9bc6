//! Topology operations
//!
//! Pure functions over display topologies (validity, equivalence, device
//! sets) plus the resolver that turns a device-prep request into a target
//! topology. Nothing in this module mutates platform state.

use crate::types::{DeviceId, Topology};
use std::collections::BTreeSet;

mod resolve;

pub use resolve::{resolve, ResolveError, ResolvedTopology, Result};

pub(crate) use resolve::{determine_target, duplicate_group, find_requested_device};

/// Check whether a topology is structurally valid.
///
/// A valid topology is non-empty, every group is non-empty and at most
/// `max_group_size` large, and no device ID appears in more than one group.
pub fn is_valid(topology: &Topology, max_group_size: usize) -> bool {
    if topology.is_empty() {
        return false;
    }

    let mut seen = BTreeSet::new();
    for group in topology {
        if group.is_empty() || group.len() > max_group_size {
            return false;
        }
        for device_id in group {
            if !seen.insert(device_id.as_str()) {
                return false;
            }
        }
    }

    true
}

/// Sort group members and then the groups themselves.
///
/// Two topologies describe the same configuration iff their normalized forms
/// are equal; neither group order nor member order carries meaning.
pub fn normalize(topology: &Topology) -> Topology {
    let mut groups: Topology = topology
        .iter()
        .map(|group| {
            let mut group = group.clone();
            group.sort();
            group
        })
        .collect();
    groups.sort();
    groups
}

/// Order-insensitive topology equality.
pub fn is_equivalent(lhs: &Topology, rhs: &Topology) -> bool {
    normalize(lhs) == normalize(rhs)
}

/// Every device ID in the topology, deduplicated.
pub fn device_set(topology: &Topology) -> BTreeSet<DeviceId> {
    topology.iter().flatten().cloned().collect()
}

/// Every device ID in the topology, in group order.
pub fn device_list(topology: &Topology) -> Vec<DeviceId> {
    topology.iter().flatten().cloned().collect()
}

/// Whether the topology contains the given device.
pub fn contains_device(topology: &Topology, device_id: &str) -> bool {
    topology
        .iter()
        .any(|group| group.iter().any(|id| id == device_id))
}

/// Devices active in `after` that were not active in `before`.
pub fn newly_enabled(before: &Topology, after: &Topology) -> BTreeSet<DeviceId> {
    let previous = device_set(before);
    device_set(after)
        .into_iter()
        .filter(|id| !previous.contains(id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn topo(groups: &[&[&str]]) -> Topology {
        groups
            .iter()
            .map(|group| group.iter().map(|id| id.to_string()).collect())
            .collect()
    }

    #[test]
    fn test_empty_topology_is_invalid() {
        assert!(!is_valid(&topo(&[]), 2));
    }

    #[test]
    fn test_empty_group_is_invalid() {
        assert!(!is_valid(&topo(&[&["a"], &[]]), 2));
    }

    #[test]
    fn test_oversized_group_is_invalid() {
        assert!(!is_valid(&topo(&[&["a", "b", "c"]]), 2));
        // A backend with a higher ceiling accepts the same group.
        assert!(is_valid(&topo(&[&["a", "b", "c"]]), 3));
    }

    #[test]
    fn test_duplicate_device_is_invalid() {
        assert!(!is_valid(&topo(&[&["a"], &["a"]]), 2));
        assert!(!is_valid(&topo(&[&["a", "a"]]), 2));
    }

    #[test]
    fn test_valid_topologies() {
        assert!(is_valid(&topo(&[&["a"]]), 2));
        assert!(is_valid(&topo(&[&["a", "b"], &["c"]]), 2));
    }

    #[test]
    fn test_equivalence_ignores_ordering() {
        let lhs = topo(&[&["a", "b"], &["c"]]);
        let rhs = topo(&[&["c"], &["b", "a"]]);

        assert!(is_equivalent(&lhs, &rhs));
        assert!(is_equivalent(&rhs, &lhs));
        assert!(is_equivalent(&lhs, &lhs));
    }

    #[test]
    fn test_equivalence_detects_differences() {
        assert!(!is_equivalent(&topo(&[&["a", "b"]]), &topo(&[&["a"], &["b"]])));
        assert!(!is_equivalent(&topo(&[&["a"]]), &topo(&[&["a"], &["b"]])));
    }

    #[test]
    fn test_newly_enabled_diff() {
        let before = topo(&[&["a"], &["b"]]);
        let after = topo(&[&["a", "c"], &["d"]]);

        let enabled = newly_enabled(&before, &after);
        assert_eq!(
            enabled.into_iter().collect::<Vec<_>>(),
            vec!["c".to_string(), "d".to_string()]
        );
        assert!(newly_enabled(&after, &after).is_empty());
    }

    #[test]
    fn test_device_membership() {
        let topology = topo(&[&["a", "b"], &["c"]]);
        assert!(contains_device(&topology, "b"));
        assert!(!contains_device(&topology, "d"));
        assert_eq!(device_list(&topology).len(), 3);
    }

    fn arb_topology() -> impl Strategy<Value = Topology> {
        // Up to four singleton/duplicate groups over distinct IDs.
        prop::collection::btree_set("[a-f]", 1..5).prop_map(|ids| {
            let ids: Vec<String> = ids.into_iter().collect();
            ids.chunks(2).map(<[String]>::to_vec).collect()
        })
    }

    proptest! {
        #[test]
        fn prop_equivalence_survives_shuffling(topology in arb_topology(), seed in 0u64..64) {
            let mut shuffled: Topology = topology
                .iter()
                .map(|group| {
                    let mut group = group.clone();
                    if seed % 2 == 1 {
                        group.reverse();
                    }
                    group
                })
                .collect();
            let shift = seed as usize % shuffled.len().max(1);
            shuffled.rotate_left(shift);

            prop_assert!(is_equivalent(&topology, &shuffled));
            prop_assert!(is_equivalent(&shuffled, &topology));
        }

        #[test]
        fn prop_normalize_is_idempotent(topology in arb_topology()) {
            let once = normalize(&topology);
            prop_assert_eq!(normalize(&once), once.clone());
        }
    }
}
