//! Ball-gather traversal and k-nearest-neighbor search over the tree.
//!
//! Traversal prunes any subtree whose (periodically wrapped) bounding box
//! cannot intersect the query sphere and tests leaf particles by squared
//! periodic distance. Matches are reported in traversal order, not
//! proximity order.

use core::cmp::Ordering;
use std::collections::BinaryHeap;

use kdtree::bounds::{dist2_to_bounds, periodic_dist2};
use kdtree::{Real, SpatialIndex};

/// Destination for gathered particles.
///
/// `push` returns `false` to stop the traversal early (fixed-capacity
/// buffers use this on overflow).
pub(crate) trait GatherSink<T> {
    fn push(&mut self, slot: usize, dist2: T) -> bool;
}

/// Growable sink used by sphere queries.
#[derive(Debug)]
pub(crate) struct CollectAll<T> {
    pub slots: Vec<usize>,
    pub dist2: Vec<T>,
}

impl<T> Default for CollectAll<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            dist2: Vec::new(),
        }
    }
}

impl<T: Real> GatherSink<T> for CollectAll<T> {
    fn push(&mut self, slot: usize, dist2: T) -> bool {
        self.slots.push(slot);
        self.dist2.push(dist2);
        true
    }
}

/// Fixed-capacity candidate buffer owned by one worker.
///
/// A gather that would exceed the capacity stops, flags the overflow, and
/// leaves the buffer truncated; it never writes past the end.
#[derive(Debug, Clone)]
pub struct CandidateList<T> {
    slots: Vec<usize>,
    dist2: Vec<T>,
    capacity: usize,
    overflowed: bool,
}

impl<T: Real> CandidateList<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            dist2: Vec::with_capacity(capacity),
            capacity,
            overflowed: false,
        }
    }

    /// Number of gathered candidates.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the buffer holds no candidates.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Fixed capacity of the buffer.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether the most recent gather hit the capacity limit.
    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    pub(crate) fn clear(&mut self) {
        self.slots.clear();
        self.dist2.clear();
        self.overflowed = false;
    }

    pub(crate) fn entries(&self) -> impl Iterator<Item = (usize, T)> + '_ {
        self.slots
            .iter()
            .copied()
            .zip(self.dist2.iter().copied())
    }
}

impl<T: Real> GatherSink<T> for CandidateList<T> {
    fn push(&mut self, slot: usize, dist2: T) -> bool {
        debug_assert!(self.slots.len() <= self.capacity);
        if self.slots.len() == self.capacity {
            self.overflowed = true;
            return false;
        }
        self.slots.push(slot);
        self.dist2.push(dist2);
        true
    }
}

/// Gather every particle within squared distance `r2` of `center`.
pub(crate) fn ball_gather<T: Real, S: GatherSink<T>>(
    index: &SpatialIndex<T>,
    center: &[T; 3],
    r2: T,
    period: &[T; 3],
    sink: &mut S,
) {
    if index.nodes().is_empty() {
        return;
    }
    visit(index, 0, center, r2, period, sink);
}

fn visit<T: Real, S: GatherSink<T>>(
    index: &SpatialIndex<T>,
    node: usize,
    center: &[T; 3],
    r2: T,
    period: &[T; 3],
    sink: &mut S,
) -> bool {
    let nodes = index.nodes();
    let nd = &nodes[node];
    if dist2_to_bounds(center, &nd.bounds, period) > r2 {
        return true;
    }

    if nd.is_leaf() {
        let particles = index.particles();
        let positions = index.positions();
        for slot in nd.first..nd.end {
            let d2 = periodic_dist2(&positions[particles[slot].orig], center, period);
            if d2 <= r2 && !sink.push(slot, d2) {
                return false;
            }
        }
        true
    } else {
        visit(index, nd.left, center, r2, period, sink)
            && visit(index, nd.right, center, r2, period, sink)
    }
}

/// Max-heap entry for the k-nearest-neighbor search.
#[derive(Debug, Clone, Copy)]
pub(crate) struct HeapEntry<T> {
    pub dist2: T,
    pub slot: usize,
}

impl<T: Real> PartialEq for HeapEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.dist2 == other.dist2
    }
}

impl<T: Real> Eq for HeapEntry<T> {}

impl<T: Real> PartialOrd for HeapEntry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: Real> Ord for HeapEntry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.dist2
            .partial_cmp(&other.dist2)
            .unwrap_or(Ordering::Equal)
    }
}

/// Reusable per-worker scratch: the candidate buffer plus the k-NN heap.
#[derive(Debug)]
pub(crate) struct WorkerScratch<T: Real> {
    pub candidates: CandidateList<T>,
    pub heap: BinaryHeap<HeapEntry<T>>,
}

impl<T: Real> WorkerScratch<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            candidates: CandidateList::new(capacity),
            heap: BinaryHeap::with_capacity(capacity),
        }
    }
}

/// Find the `k` nearest particles to `center`, filling `scratch.candidates`
/// (in no particular order) and returning the squared distance to the
/// farthest of them.
///
/// `k` is validated against the particle count at context creation, so the
/// candidate buffer (sized past `k`) cannot overflow here.
pub(crate) fn nearest_neighbors<T: Real>(
    index: &SpatialIndex<T>,
    center: &[T; 3],
    k: usize,
    period: &[T; 3],
    scratch: &mut WorkerScratch<T>,
) -> T {
    scratch.heap.clear();
    if !index.nodes().is_empty() {
        knn_visit(index, 0, center, k, period, &mut scratch.heap);
    }

    scratch.candidates.clear();
    let mut max_d2 = T::zero();
    for entry in scratch.heap.drain() {
        if entry.dist2 > max_d2 {
            max_d2 = entry.dist2;
        }
        scratch.candidates.push(entry.slot, entry.dist2);
    }
    max_d2
}

fn knn_visit<T: Real>(
    index: &SpatialIndex<T>,
    node: usize,
    center: &[T; 3],
    k: usize,
    period: &[T; 3],
    heap: &mut BinaryHeap<HeapEntry<T>>,
) {
    let nodes = index.nodes();
    let nd = &nodes[node];

    let bound = match heap.peek() {
        Some(top) if heap.len() >= k => top.dist2,
        _ => T::infinity(),
    };
    if dist2_to_bounds(center, &nd.bounds, period) > bound {
        return;
    }

    if nd.is_leaf() {
        let particles = index.particles();
        let positions = index.positions();
        for slot in nd.first..nd.end {
            let d2 = periodic_dist2(&positions[particles[slot].orig], center, period);
            if heap.len() < k {
                heap.push(HeapEntry { dist2: d2, slot });
            } else if let Some(top) = heap.peek() {
                if d2 < top.dist2 {
                    heap.pop();
                    heap.push(HeapEntry { dist2: d2, slot });
                }
            }
        }
    } else {
        // Descend the nearer child first so the bound tightens early.
        let d_left = dist2_to_bounds(center, &nodes[nd.left].bounds, period);
        let d_right = dist2_to_bounds(center, &nodes[nd.right].bounds, period);
        if d_left <= d_right {
            knn_visit(index, nd.left, center, k, period, heap);
            knn_visit(index, nd.right, center, k, period, heap);
        } else {
            knn_visit(index, nd.right, center, k, period, heap);
            knn_visit(index, nd.left, center, k, period, heap);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kdtree::TreeNode;

    const OPEN: [f64; 3] = [f64::INFINITY; 3];

    fn line_index(n: usize) -> SpatialIndex<f64> {
        let positions: Vec<[f64; 3]> = (0..n).map(|i| [i as f64, 0.0, 0.0]).collect();
        let masses = vec![1.0; n];
        let mut index = SpatialIndex::new(positions, masses, 2).unwrap();
        let nodes = vec![TreeNode::default(); index.node_count()];
        index.build(nodes, 1).unwrap();
        index
    }

    fn gathered_origs(index: &SpatialIndex<f64>, center: [f64; 3], r: f64) -> Vec<usize> {
        let mut sink = CollectAll::default();
        ball_gather(index, &center, r * r, &OPEN, &mut sink);
        let mut origs: Vec<usize> = sink
            .slots
            .iter()
            .map(|&slot| index.particles()[slot].orig)
            .collect();
        origs.sort_unstable();
        origs
    }

    #[test]
    fn gather_on_a_line() {
        let index = line_index(10);
        assert_eq!(gathered_origs(&index, [3.0, 0.0, 0.0], 1.5), vec![2, 3, 4]);
        assert_eq!(gathered_origs(&index, [-5.0, 0.0, 0.0], 1.0), Vec::<usize>::new());
    }

    #[test]
    fn gather_radius_is_inclusive() {
        let index = line_index(4);
        assert_eq!(gathered_origs(&index, [0.0, 0.0, 0.0], 1.0), vec![0, 1]);
    }

    #[test]
    fn candidate_list_stops_at_capacity() {
        let index = line_index(10);
        let mut list = CandidateList::new(3);
        ball_gather(&index, &[5.0, 0.0, 0.0], 100.0, &OPEN, &mut list);
        assert_eq!(list.len(), 3);
        assert!(list.overflowed());
        list.clear();
        assert!(!list.overflowed());
        assert!(list.is_empty());
    }

    #[test]
    fn nearest_neighbors_on_a_line() {
        let index = line_index(10);
        let mut scratch = WorkerScratch::new(8);
        let max_d2 = nearest_neighbors(&index, &[4.2, 0.0, 0.0], 3, &OPEN, &mut scratch);
        let mut origs: Vec<usize> = scratch
            .candidates
            .entries()
            .map(|(slot, _)| index.particles()[slot].orig)
            .collect();
        origs.sort_unstable();
        assert_eq!(origs, vec![3, 4, 5]);
        // Farthest of the three is the particle at x=3.
        assert!((max_d2 - 1.2 * 1.2).abs() < 1e-12);
    }
}
