//! Per-particle bookkeeping decoupled from caller array order.

use crate::error::IndexError;

/// One slot of the particle store.
///
/// The tree builder permutes slots in place for spatial locality; `orig`
/// is the index into the caller's arrays (positions, masses, bound fields)
/// and survives every permutation. Field data is never moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Particle {
    /// Index into the caller-supplied arrays.
    pub orig: usize,
    /// Whether this particle participates in smoothing iteration and
    /// domain decomposition.
    pub active: bool,
    /// Domain decomposition group, zero until a decomposition runs.
    pub group: u32,
}

/// Allocate the slot array for `n` particles in caller order.
pub(crate) fn make_store(n: usize) -> Result<Vec<Particle>, IndexError> {
    let mut slots = Vec::new();
    slots
        .try_reserve_exact(n)
        .map_err(|_| IndexError::StoreAllocation { particles: n })?;
    slots.extend((0..n).map(|orig| Particle {
        orig,
        active: true,
        group: 0,
    }));
    Ok(slots)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_starts_identity_ordered_and_active() {
        let slots = make_store(4).unwrap();
        assert_eq!(slots.len(), 4);
        for (i, p) in slots.iter().enumerate() {
            assert_eq!(p.orig, i);
            assert!(p.active);
            assert_eq!(p.group, 0);
        }
    }
}
