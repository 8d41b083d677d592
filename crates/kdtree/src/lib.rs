//! Bucketed kd-tree spatial index over a particle point cloud.
//!
//! This crate owns the geometry side of the smoothing engine:
//!
//! - [`bounds`] -- bounding boxes and periodic distance computation.
//! - [`particle`] -- the slot store decoupling tree order from caller order.
//! - [`node`] -- fixed-layout tree nodes and the exact node-count formula.
//! - [`SpatialIndex`] -- owner of positions, masses, bound field arrays,
//!   the slot store, and the node array; builds the tree in place and
//!   records domain decompositions.
//!
//! The index is generic over [`Real`] (`f32` or `f64`); all bound arrays
//! share the index's precision by construction.

#![warn(missing_docs)]

pub mod bounds;
mod build;
mod decompose;
pub mod error;
pub mod node;
pub mod particle;
mod real;

pub use bounds::Bounds;
pub use error::IndexError;
pub use node::{node_count, TreeNode, NIL};
pub use particle::Particle;
pub use real::Real;

/// Scalar or three-component per-particle field storage.
///
/// Quantity arrays come in two shapes; operations validate the shape they
/// need before any work starts.
#[derive(Debug, Clone, PartialEq)]
pub enum Quantity<T> {
    /// One value per particle.
    Scalar(Vec<T>),
    /// One 3-vector per particle.
    Vector(Vec<[T; 3]>),
}

impl<T> Quantity<T> {
    /// Number of particles covered.
    pub fn len(&self) -> usize {
        match self {
            Quantity::Scalar(v) => v.len(),
            Quantity::Vector(v) => v.len(),
        }
    }

    /// Whether the field covers no particles.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Spatial index over one particle point cloud.
///
/// Created once per cloud with positions and masses; the tree is built
/// exactly once into a caller-sized node array. Field arrays (smoothing
/// lengths, densities, a quantity and its smoothed counterpart) may be
/// bound and rebound between smoothing passes without rebuilding the tree,
/// as long as their length still matches the particle count.
pub struct SpatialIndex<T: Real> {
    bucket_size: usize,
    n_particles: usize,
    node_total: usize,
    positions: Vec<[T; 3]>,
    masses: Vec<T>,
    smoothing: Option<Vec<T>>,
    density: Option<Vec<T>>,
    quantity: Option<Quantity<T>>,
    smoothed: Option<Quantity<T>>,
    particles: Vec<Particle>,
    nodes: Vec<TreeNode<T>>,
    n_groups: usize,
}

impl<T: Real> SpatialIndex<T> {
    /// Create an index over `positions` with per-particle `masses`.
    ///
    /// Validates that the arrays match and that `bucket_size >= 1`, and
    /// computes the exact node count up front so the caller can size the
    /// node array before calling [`SpatialIndex::build`].
    pub fn new(
        positions: Vec<[T; 3]>,
        masses: Vec<T>,
        bucket_size: usize,
    ) -> Result<Self, IndexError> {
        if bucket_size == 0 {
            return Err(IndexError::InvalidBucketSize);
        }
        if masses.len() != positions.len() {
            return Err(IndexError::LengthMismatch {
                name: "mass",
                expected: positions.len(),
                got: masses.len(),
            });
        }

        let n = positions.len();
        let particles = particle::make_store(n)?;
        let node_total = node_count(n, bucket_size);
        tracing::debug!(
            "spatial index created: {} particles, bucket {}, {} nodes",
            n,
            bucket_size,
            node_total
        );

        Ok(Self {
            bucket_size,
            n_particles: n,
            node_total,
            positions,
            masses,
            smoothing: None,
            density: None,
            quantity: None,
            smoothed: None,
            particles,
            nodes: Vec::new(),
            n_groups: 0,
        })
    }

    /// Exact length the node array passed to [`SpatialIndex::build`] must
    /// have.
    pub fn node_count(&self) -> usize {
        self.node_total
    }

    /// Configured bucket size (maximum particles per leaf).
    pub fn bucket_size(&self) -> usize {
        self.bucket_size
    }

    /// Total number of particles.
    pub fn particle_count(&self) -> usize {
        self.n_particles
    }

    /// Number of particles currently flagged active.
    pub fn active_count(&self) -> usize {
        self.particles.iter().filter(|p| p.active).count()
    }

    /// Precision of the index in bits (32 or 64).
    pub fn precision(&self) -> u32 {
        T::BITS
    }

    /// Whether the tree has been built.
    pub fn is_built(&self) -> bool {
        !self.nodes.is_empty()
    }

    /// Build the tree into `nodes`, permuting the particle slots in place.
    ///
    /// `nodes` must have exactly [`SpatialIndex::node_count`] entries and
    /// the tree must not already exist; either violation is rejected
    /// before any work starts. Construction parallelizes across `threads`
    /// worker threads for large slot ranges.
    pub fn build(&mut self, nodes: Vec<TreeNode<T>>, threads: usize) -> Result<(), IndexError> {
        if self.is_built() {
            return Err(IndexError::AlreadyBuilt);
        }
        if nodes.len() != self.node_total {
            return Err(IndexError::WrongNodeCount {
                expected: self.node_total,
                got: nodes.len(),
            });
        }

        self.nodes = nodes;
        build::build_tree(
            &self.positions,
            &mut self.particles,
            &mut self.nodes,
            self.bucket_size,
            threads,
        );
        tracing::info!(
            "tree built: {} particles in {} nodes ({} threads)",
            self.n_particles,
            self.node_total,
            threads
        );
        Ok(())
    }

    /// Root node of the built tree.
    pub fn root(&self) -> Result<&TreeNode<T>, IndexError> {
        self.nodes.first().ok_or(IndexError::NotBuilt)
    }

    /// The node array (empty until built).
    pub fn nodes(&self) -> &[TreeNode<T>] {
        &self.nodes
    }

    /// The particle slot array, in tree order once built.
    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    /// Particle positions, in caller order.
    pub fn positions(&self) -> &[[T; 3]] {
        &self.positions
    }

    /// Particle masses, in caller order.
    pub fn masses(&self) -> &[T] {
        &self.masses
    }

    /// Replace the mass array.
    pub fn rebind_masses(&mut self, masses: Vec<T>) -> Result<(), IndexError> {
        self.check_len("mass", masses.len())?;
        self.masses = masses;
        Ok(())
    }

    /// Bind (or replace) per-particle smoothing lengths.
    pub fn bind_smoothing_lengths(&mut self, smoothing: Vec<T>) -> Result<(), IndexError> {
        self.check_len("smooth", smoothing.len())?;
        self.smoothing = Some(smoothing);
        Ok(())
    }

    /// Bind (or replace) per-particle densities.
    pub fn bind_densities(&mut self, density: Vec<T>) -> Result<(), IndexError> {
        self.check_len("rho", density.len())?;
        self.density = Some(density);
        Ok(())
    }

    /// Bind (or replace) the quantity field a smoothing pass reads.
    pub fn bind_quantity(&mut self, quantity: Quantity<T>) -> Result<(), IndexError> {
        self.check_len("qty", quantity.len())?;
        self.quantity = Some(quantity);
        Ok(())
    }

    /// Bind (or replace) the output field smoothed quantities are written
    /// to.
    pub fn bind_smoothed(&mut self, smoothed: Quantity<T>) -> Result<(), IndexError> {
        self.check_len("qty_sm", smoothed.len())?;
        self.smoothed = Some(smoothed);
        Ok(())
    }

    /// Bound smoothing lengths, if any.
    pub fn smoothing_lengths(&self) -> Option<&[T]> {
        self.smoothing.as_deref()
    }

    /// Bound densities, if any.
    pub fn densities(&self) -> Option<&[T]> {
        self.density.as_deref()
    }

    /// Bound quantity field, if any.
    pub fn quantity(&self) -> Option<&Quantity<T>> {
        self.quantity.as_ref()
    }

    /// Bound smoothed-quantity field, if any.
    pub fn smoothed(&self) -> Option<&Quantity<T>> {
        self.smoothed.as_ref()
    }

    /// Remove and return the smoothing-length array.
    pub fn take_smoothing_lengths(&mut self) -> Option<Vec<T>> {
        self.smoothing.take()
    }

    /// Remove and return the density array.
    pub fn take_densities(&mut self) -> Option<Vec<T>> {
        self.density.take()
    }

    /// Remove and return the quantity field.
    pub fn take_quantity(&mut self) -> Option<Quantity<T>> {
        self.quantity.take()
    }

    /// Remove and return the smoothed-quantity field.
    pub fn take_smoothed(&mut self) -> Option<Quantity<T>> {
        self.smoothed.take()
    }

    /// Set the activity flag for every particle at once.
    ///
    /// `mask` is indexed by original (caller) order. Inactive particles
    /// are skipped by smoothing iteration and domain decomposition but
    /// remain part of the tree geometry.
    pub fn set_active_mask(&mut self, mask: &[bool]) -> Result<(), IndexError> {
        self.check_len("active", mask.len())?;
        for p in self.particles.iter_mut() {
            p.active = mask[p.orig];
        }
        Ok(())
    }

    /// Partition active particles into `n_groups` balanced spatial groups.
    ///
    /// Groups are formed by recursive bisection along the axis of greatest
    /// extent, splitting particle counts in proportion to the group budget.
    /// `n_groups == 0` clears all assignments.
    pub fn decompose(&mut self, n_groups: usize) {
        decompose::assign_groups(&self.positions, &mut self.particles, n_groups);
        self.n_groups = n_groups;
        tracing::info!(
            "domain decomposition: {} groups over {} active particles",
            n_groups,
            self.active_count()
        );
    }

    /// Number of groups of the most recent decomposition.
    pub fn group_count(&self) -> usize {
        self.n_groups
    }

    /// Group assignment per particle, in caller order.
    pub fn group_assignments(&self) -> Vec<u32> {
        let mut groups = vec![0u32; self.n_particles];
        for p in &self.particles {
            groups[p.orig] = p.group;
        }
        groups
    }

    fn check_len(&self, name: &'static str, got: usize) -> Result<(), IndexError> {
        if got != self.n_particles {
            return Err(IndexError::LengthMismatch {
                name,
                expected: self.n_particles,
                got,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_index() -> SpatialIndex<f64> {
        let positions = vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [2.0, 0.0, 0.0]];
        let masses = vec![1.0; 3];
        SpatialIndex::new(positions, masses, 2).unwrap()
    }

    #[test]
    fn rejects_zero_bucket() {
        let err = SpatialIndex::new(vec![[0.0; 3]], vec![1.0], 0).unwrap_err();
        assert!(matches!(err, IndexError::InvalidBucketSize));
    }

    #[test]
    fn rejects_mass_length_mismatch() {
        let err = SpatialIndex::<f64>::new(vec![[0.0; 3]], vec![], 4).unwrap_err();
        assert!(matches!(err, IndexError::LengthMismatch { name: "mass", .. }));
    }

    #[test]
    fn rejects_wrong_node_array_size() {
        let mut index = small_index();
        let err = index.build(vec![TreeNode::default(); 1], 1).unwrap_err();
        assert!(matches!(
            err,
            IndexError::WrongNodeCount { expected: 3, got: 1 }
        ));
        assert!(!index.is_built());
    }

    #[test]
    fn rejects_double_build() {
        let mut index = small_index();
        let nodes = vec![TreeNode::default(); index.node_count()];
        index.build(nodes, 1).unwrap();
        let err = index
            .build(vec![TreeNode::default(); index.node_count()], 1)
            .unwrap_err();
        assert!(matches!(err, IndexError::AlreadyBuilt));
    }

    #[test]
    fn rejects_field_length_mismatch() {
        let mut index = small_index();
        let err = index.bind_smoothing_lengths(vec![0.1; 2]).unwrap_err();
        assert!(matches!(
            err,
            IndexError::LengthMismatch { name: "smooth", .. }
        ));
    }

    #[test]
    fn fields_rebind_and_take() {
        let mut index = small_index();
        index.bind_densities(vec![1.0; 3]).unwrap();
        index.bind_densities(vec![2.0; 3]).unwrap();
        assert_eq!(index.densities().unwrap(), &[2.0; 3]);
        assert_eq!(index.take_densities().unwrap(), vec![2.0; 3]);
        assert!(index.densities().is_none());
    }

    #[test]
    fn quantity_shapes() {
        let mut index = small_index();
        index
            .bind_quantity(Quantity::Vector(vec![[0.0; 3]; 3]))
            .unwrap();
        assert_eq!(index.quantity().unwrap().len(), 3);
        let err = index
            .bind_quantity(Quantity::Scalar(vec![0.0; 2]))
            .unwrap_err();
        assert!(matches!(err, IndexError::LengthMismatch { name: "qty", .. }));
    }

    #[test]
    fn active_mask_applies_by_original_index() {
        let mut index = small_index();
        let nodes = vec![TreeNode::default(); index.node_count()];
        index.build(nodes, 1).unwrap();
        index.set_active_mask(&[true, false, true]).unwrap();
        assert_eq!(index.active_count(), 2);
        for p in index.particles() {
            assert_eq!(p.active, p.orig != 1);
        }
    }

    #[test]
    fn precision_reports_width() {
        assert_eq!(small_index().precision(), 64);
    }
}
