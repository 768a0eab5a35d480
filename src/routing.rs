//! # Key-space routing: slice assignments over the 64-bit key space.
//!
//! Clients route a method call by hashing its routing key into `[0, 2^64)`
//! and looking up the owning replica in the component's [`Assignment`].
//! [`routing_algo`] is the pure function that produces assignments:
//!
//! - split the key space into the smallest power-of-two number of slices
//!   that covers all replicas, by repeated bisection;
//! - hand the slices out round-robin across the (sorted) replicas.
//!
//! Properties:
//! - Total: slices cover `[0, 2^64)` contiguously, first slice starts at 0.
//! - Deterministic: candidates are sorted before assignment, so the same
//!   replica set always yields the same slices, minimising churn.
//! - Balanced: every replica owns either `⌊n/r⌋` or `⌈n/r⌉` slices.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One past the largest routing key, as a `u128`.
///
/// Slice boundaries are bisected over the exclusive-end range
/// `[0, 2^64)`; only slice starts are stored, so every boundary fits in a
/// `u64`.
const KEY_SPACE_END: u128 = 1 << 64;

/// A contiguous half-open sub-range of the key space.
///
/// A slice covers `[start, next_start)`; the last slice of an assignment
/// runs to the end of the key space.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slice {
    /// First key owned by this slice.
    pub start: u64,
    /// Replicas serving this slice.
    pub replicas: Vec<String>,
}

/// The mapping of the 64-bit key space to replicas for one component.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    /// Application this assignment belongs to.
    pub app: String,
    /// Deployment this assignment belongs to.
    pub deployment_id: Uuid,
    /// Fully-qualified component name.
    pub component: String,
    /// Monotonic per-component version, bumped on every recomputation.
    pub version: u64,
    /// Slices ordered by strictly increasing `start`; empty when no
    /// replica has registered yet.
    pub slices: Vec<Slice>,
}

impl Assignment {
    /// A fresh, versionless assignment for `component` with no slices.
    pub fn new(app: impl Into<String>, deployment_id: Uuid, component: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            deployment_id,
            component: component.into(),
            version: 0,
            slices: Vec::new(),
        }
    }
}

/// Replica addresses and per-component assignments for one group.
///
/// The `version` field is meaningful only on the wire: the group's cell
/// stamps its own version into the clone it hands to a long-polling
/// worker.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingInfo {
    /// Cell version at snapshot time.
    pub version: u64,
    /// Dialable addresses of the group's registered replicas, in
    /// registration order. Unique.
    pub replicas: Vec<String>,
    /// One assignment per routed component started in the group.
    pub assignments: Vec<Assignment>,
}

/// Distributes the entire key space approximately equally across all
/// candidate replicas.
///
/// Returns a new [`Assignment`] carrying `curr`'s identity fields,
/// `version = curr.version + 1`, and freshly computed slices. The function
/// is pure: it depends only on its arguments.
///
/// Candidates are sorted (byte-lexicographic) before slices are handed
/// out, so the result is independent of registration order.
pub fn routing_algo(curr: &Assignment, candidates: &[String]) -> Assignment {
    let mut next = curr.clone();
    next.version += 1;

    let mut candidates = candidates.to_vec();
    candidates.sort();

    if candidates.is_empty() {
        next.slices = Vec::new();
        return next;
    }
    if candidates.len() == 1 {
        next.slices = vec![Slice {
            start: 0,
            replicas: candidates,
        }];
        return next;
    }

    // Bisect [0, 2^64) until there is one slice per power-of-two bucket.
    // The range and midpoints live in u128 so `low + (high - low) / 2`
    // cannot overflow; with a power-of-two span every split is exact.
    let num_slices = candidates.len().next_power_of_two();
    let mut splits: VecDeque<(u128, u128)> = VecDeque::from([(0, KEY_SPACE_END)]);
    while splits.len() != num_slices {
        if let Some((low, high)) = splits.pop_front() {
            let mid = low + (high - low) / 2;
            splits.push_back((low, mid));
            splits.push_back((mid, high));
        }
    }

    // Sort by start key and hand slices out round-robin, so equal inputs
    // yield identical assignments across invocations.
    let mut splits: Vec<(u128, u128)> = splits.into();
    splits.sort_by_key(|s| s.0);

    next.slices = splits
        .iter()
        .enumerate()
        .map(|(i, &(start, _))| Slice {
            start: start as u64,
            replicas: vec![candidates[i % candidates.len()].clone()],
        })
        .collect();
    next
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assignment() -> Assignment {
        Assignment::new("app", Uuid::new_v4(), "pkg.Cache")
    }

    fn addrs(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_candidates_no_slices() {
        let a = routing_algo(&assignment(), &[]);
        assert_eq!(a.version, 1);
        assert!(a.slices.is_empty());
    }

    #[test]
    fn single_candidate_owns_key_space() {
        let a = routing_algo(&assignment(), &addrs(&["10.0.0.1:1"]));
        assert_eq!(a.slices.len(), 1);
        assert_eq!(a.slices[0].start, 0);
        assert_eq!(a.slices[0].replicas, addrs(&["10.0.0.1:1"]));
    }

    #[test]
    fn two_candidates_split_at_half() {
        let a = routing_algo(&assignment(), &addrs(&["a", "b"]));
        assert_eq!(a.slices.len(), 2);
        assert_eq!(a.slices[0].start, 0);
        assert_eq!(a.slices[0].replicas, addrs(&["a"]));
        assert_eq!(a.slices[1].start, 0x8000_0000_0000_0000);
        assert_eq!(a.slices[1].replicas, addrs(&["b"]));
    }

    #[test]
    fn version_increments_per_call() {
        let a1 = routing_algo(&assignment(), &addrs(&["a"]));
        let a2 = routing_algo(&a1, &addrs(&["a", "b"]));
        assert_eq!(a1.version, 1);
        assert_eq!(a2.version, 2);
    }

    #[test]
    fn covers_key_space_contiguously() {
        for n in 1..=9usize {
            let candidates: Vec<String> = (0..n).map(|i| format!("replica-{i}")).collect();
            let a = routing_algo(&assignment(), &candidates);
            assert_eq!(a.slices.len(), n.next_power_of_two());
            assert_eq!(a.slices[0].start, 0);
            for w in a.slices.windows(2) {
                assert!(w[0].start < w[1].start, "starts must strictly increase");
            }
        }
    }

    #[test]
    fn deterministic_under_shuffle() {
        let sorted = addrs(&["a", "b", "c"]);
        let shuffled = addrs(&["b", "c", "a"]);
        let a1 = routing_algo(&assignment(), &sorted);
        let a2 = routing_algo(&assignment(), &shuffled);
        assert_eq!(a1.slices, a2.slices);
    }

    #[test]
    fn slices_sorted_ascending_replicas() {
        // Registration order "b", "a", "c": slice 0 must still go to "a".
        let a = routing_algo(&assignment(), &addrs(&["b", "a", "c"]));
        assert_eq!(a.slices[0].replicas, addrs(&["a"]));
    }

    #[test]
    fn round_robin_balances_slices() {
        for n in 2..=9usize {
            let candidates: Vec<String> = (0..n).map(|i| format!("replica-{i}")).collect();
            let a = routing_algo(&assignment(), &candidates);
            let num_slices = a.slices.len();
            for c in &candidates {
                let owned = a
                    .slices
                    .iter()
                    .filter(|s| s.replicas.contains(c))
                    .count();
                assert!(
                    owned == num_slices / n || owned == num_slices.div_ceil(n),
                    "replica {c} owns {owned} of {num_slices} slices"
                );
            }
        }
    }

    #[test]
    fn boundaries_are_exact_power_of_two_multiples() {
        let a = routing_algo(&assignment(), &addrs(&["a", "b", "c", "d"]));
        let starts: Vec<u64> = a.slices.iter().map(|s| s.start).collect();
        assert_eq!(
            starts,
            vec![
                0,
                0x4000_0000_0000_0000,
                0x8000_0000_0000_0000,
                0xC000_0000_0000_0000
            ]
        );
    }
}
