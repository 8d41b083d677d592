//! Spatial domain decomposition for parallel workloads.
//!
//! Recursively bisects the active particle set along the axis of greatest
//! extent, splitting the group budget (and the particle count in
//! proportion) at each level. The result is one spatial group id per
//! particle; the tree permutation is left untouched, so a decomposition
//! can run before or after the tree is built.

use core::cmp::Ordering;

use crate::bounds::Bounds;
use crate::particle::Particle;
use crate::real::Real;

/// Assign a group in `0..n_groups` to every active particle.
///
/// `n_groups == 0` clears all assignments back to group zero.
pub(crate) fn assign_groups<T: Real>(
    positions: &[[T; 3]],
    particles: &mut [Particle],
    n_groups: usize,
) {
    if n_groups == 0 {
        for p in particles.iter_mut() {
            p.group = 0;
        }
        return;
    }

    let orig_of: Vec<usize> = particles.iter().map(|p| p.orig).collect();
    let mut active: Vec<usize> = particles
        .iter()
        .enumerate()
        .filter_map(|(slot, p)| p.active.then_some(slot))
        .collect();
    let mut groups = vec![0u32; particles.len()];

    split_groups(positions, &orig_of, &mut active, 0, n_groups as u32, &mut groups);

    for (slot, p) in particles.iter_mut().enumerate() {
        p.group = groups[slot];
    }
}

fn split_groups<T: Real>(
    positions: &[[T; 3]],
    orig_of: &[usize],
    slot_ids: &mut [usize],
    first_group: u32,
    n_groups: u32,
    out: &mut [u32],
) {
    if slot_ids.is_empty() {
        return;
    }
    if n_groups == 1 {
        for &slot in slot_ids.iter() {
            out[slot] = first_group;
        }
        return;
    }

    let bounds = Bounds::of_points(slot_ids.iter().map(|&slot| &positions[orig_of[slot]]));
    let axis = bounds.longest_axis();

    let lower_groups = n_groups / 2;
    let upper_groups = n_groups - lower_groups;
    // Split particles in proportion to the group budget so every group
    // ends up with a near-equal share.
    let pivot = slot_ids.len() * lower_groups as usize / n_groups as usize;

    if pivot > 0 && pivot < slot_ids.len() {
        slot_ids.select_nth_unstable_by(pivot, |&a, &b| {
            positions[orig_of[a]][axis]
                .partial_cmp(&positions[orig_of[b]][axis])
                .unwrap_or(Ordering::Equal)
        });
    }

    let (lower, upper) = slot_ids.split_at_mut(pivot);
    split_groups(positions, orig_of, lower, first_group, lower_groups, out);
    split_groups(
        positions,
        orig_of,
        upper,
        first_group + lower_groups,
        upper_groups,
        out,
    );
}
