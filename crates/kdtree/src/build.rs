//! Parallel median-split tree construction.
//!
//! Construction is a partial in-place permutation of the particle slot
//! array: each internal node selects the axis of greatest bounding-box
//! extent and partitions its slot range around the median along that axis
//! with `select_nth_unstable_by` (a selection, not a sort). Because the
//! node-count formula pins the size of every subtree up front, each
//! recursive call receives a disjoint `&mut` slice of both the slot array
//! and the node array, and the two halves of a split can run on separate
//! threads with no synchronization beyond the scope join.

use core::cmp::Ordering;
use std::thread;

use crate::bounds::Bounds;
use crate::node::{node_count, TreeNode, NIL};
use crate::particle::Particle;
use crate::real::Real;

/// Ranges at or below this size are always built on the current thread;
/// spawning costs more than the partition work saved.
const PARALLEL_MIN: usize = 4096;

/// Build the tree over `slots`, filling `nodes` completely.
///
/// `nodes` must have exactly `node_count(slots.len(), bucket)` entries;
/// the caller validates this before handing the array over.
pub(crate) fn build_tree<T: Real>(
    positions: &[[T; 3]],
    slots: &mut [Particle],
    nodes: &mut [TreeNode<T>],
    bucket: usize,
    threads: usize,
) {
    debug_assert_eq!(nodes.len(), node_count(slots.len(), bucket));
    build_node(positions, slots, 0, nodes, 0, bucket, threads.max(1));
}

#[allow(clippy::too_many_arguments)]
fn build_node<T: Real>(
    positions: &[[T; 3]],
    slots: &mut [Particle],
    slot_offset: usize,
    nodes: &mut [TreeNode<T>],
    node_offset: usize,
    bucket: usize,
    threads: usize,
) {
    let n = slots.len();
    let bounds = Bounds::of_points(slots.iter().map(|p| &positions[p.orig]));

    if n <= bucket {
        nodes[0] = TreeNode {
            bounds,
            split_dim: 0,
            left: NIL,
            right: NIL,
            first: slot_offset,
            end: slot_offset + n,
        };
        return;
    }

    let axis = bounds.longest_axis();
    // The lower half takes the extra slot for odd ranges, matching the
    // node-count recursion exactly.
    let mid = n - n / 2;
    slots.select_nth_unstable_by(mid, |a, b| {
        positions[a.orig][axis]
            .partial_cmp(&positions[b.orig][axis])
            .unwrap_or(Ordering::Equal)
    });

    let lower_nodes = node_count(mid, bucket);
    nodes[0] = TreeNode {
        bounds,
        split_dim: axis,
        left: node_offset + 1,
        right: node_offset + 1 + lower_nodes,
        first: slot_offset,
        end: slot_offset + n,
    };

    let (lower_slots, upper_slots) = slots.split_at_mut(mid);
    let (lower_tree, upper_tree) = nodes[1..].split_at_mut(lower_nodes);

    if threads > 1 && n >= PARALLEL_MIN {
        // Split the thread budget across the two halves; each recursive
        // call owns a disjoint slice of the slot and node arrays.
        let lower_threads = threads / 2;
        let upper_threads = threads - lower_threads;
        thread::scope(|s| {
            s.spawn(move || {
                build_node(
                    positions,
                    lower_slots,
                    slot_offset,
                    lower_tree,
                    node_offset + 1,
                    bucket,
                    lower_threads,
                );
            });
            build_node(
                positions,
                upper_slots,
                slot_offset + mid,
                upper_tree,
                node_offset + 1 + lower_nodes,
                bucket,
                upper_threads,
            );
        });
    } else {
        build_node(
            positions,
            lower_slots,
            slot_offset,
            lower_tree,
            node_offset + 1,
            bucket,
            1,
        );
        build_node(
            positions,
            upper_slots,
            slot_offset + mid,
            upper_tree,
            node_offset + 1 + lower_nodes,
            bucket,
            1,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particle::make_store;

    fn build(positions: &[[f64; 3]], bucket: usize) -> (Vec<Particle>, Vec<TreeNode<f64>>) {
        let mut slots = make_store(positions.len()).unwrap();
        let mut nodes = vec![TreeNode::default(); node_count(positions.len(), bucket)];
        build_tree(positions, &mut slots, &mut nodes, bucket, 1);
        (slots, nodes)
    }

    #[test]
    fn two_particles_split_along_spread_axis() {
        let positions = [[0.0, 0.0, 0.0], [10.0, 1.0, 1.0]];
        let (slots, nodes) = build(&positions, 1);
        assert_eq!(nodes.len(), 3);
        assert_eq!(nodes[0].split_dim, 0);
        assert!(!nodes[0].is_leaf());
        assert!(nodes[1].is_leaf());
        assert!(nodes[2].is_leaf());
        // Lower child holds the particle below the median.
        assert_eq!(slots[nodes[1].first].orig, 0);
        assert_eq!(slots[nodes[2].first].orig, 1);
    }

    #[test]
    fn leaf_bounds_are_tight() {
        let positions = [[1.0, 2.0, 3.0], [1.5, 2.5, 3.5]];
        let (_, nodes) = build(&positions, 4);
        assert_eq!(nodes[0].bounds.min, [1.0, 2.0, 3.0]);
        assert_eq!(nodes[0].bounds.max, [1.5, 2.5, 3.5]);
    }

    #[test]
    fn empty_cloud_builds_one_empty_leaf() {
        let (slots, nodes) = build(&[], 16);
        assert!(slots.is_empty());
        assert_eq!(nodes.len(), 1);
        assert!(nodes[0].is_leaf());
        assert!(nodes[0].is_empty());
    }
}
