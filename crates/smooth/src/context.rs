//! Smoothing context: shared work cursor, per-worker scratch, and the
//! resumable iteration protocol.
//!
//! One context coordinates a generation of work over an index. Workers of
//! a parallel pass share nothing but the claim cursor; each owns a private
//! scratch clone, so the hot path needs no locking. The single-threaded
//! `step` interface drives the same claim protocol one particle at a time
//! and is what hosts use to stream neighbor lists out.

use std::sync::atomic::{AtomicUsize, Ordering};

use kdtree::{Particle, Real, SpatialIndex};

use crate::error::SmoothError;
use crate::gather::{ball_gather, CandidateList, CollectAll, WorkerScratch};
use crate::kernel::KernelShape;
use crate::ops::{self, Property};
use crate::pass;

/// Extra candidate capacity beyond the requested neighbor count; gathers
/// at `2h` routinely return a few more particles than the count `h` was
/// derived from.
pub(crate) const GATHER_SLACK: usize = 128;

/// Result of a single [`SmoothingContext::step`] call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepOutcome<T> {
    /// Every active particle of this generation has been claimed.
    Done,
    /// One particle was claimed and evaluated.
    Particle {
        /// Original (caller-order) index of the particle.
        index: usize,
        /// Smoothing length used for the evaluation; for the
        /// smoothing-length property this is the freshly computed value.
        smoothing_length: T,
        /// Number of neighbors gathered.
        neighbors: usize,
    },
}

/// Query engine over one built [`SpatialIndex`].
///
/// Holds the neighbor count, the periodic box, and the shared "next work
/// item" cursor for one iteration generation. Creation validates the
/// neighbor count against the particle count and, for a finite period,
/// that the particle cloud fits inside the box.
pub struct SmoothingContext<T: Real> {
    n_smooth: usize,
    period: [T; 3],
    capacity: usize,
    workers: usize,
    cursor: AtomicUsize,
    exhausted: bool,
    scratch: WorkerScratch<T>,
}

impl<T: Real> SmoothingContext<T> {
    /// Create a context for `index`.
    ///
    /// `period_edge` is one edge length applied to all three axes; a
    /// non-positive value disables periodic wrap. The context starts in
    /// stepping state with `workers` planned workers, as if
    /// [`SmoothingContext::init_step`] had been called.
    pub fn new(
        index: &SpatialIndex<T>,
        n_smooth: usize,
        workers: usize,
        period_edge: T,
    ) -> Result<Self, SmoothError> {
        let root = index.root()?;
        if n_smooth == 0 {
            return Err(SmoothError::InvalidNeighborCount);
        }
        if n_smooth > index.particle_count() {
            return Err(SmoothError::TooManyNeighbors {
                requested: n_smooth,
                available: index.particle_count(),
            });
        }

        let edge = if period_edge > T::zero() {
            period_edge
        } else {
            T::infinity()
        };
        let period = [edge; 3];
        if edge.is_finite() {
            for axis in 0..3 {
                let extent = root.bounds.extent(axis);
                if extent > edge {
                    return Err(SmoothError::BoxTooSmall {
                        axis,
                        extent: extent.as_f64(),
                        period: edge.as_f64(),
                    });
                }
            }
        }

        let capacity = n_smooth + GATHER_SLACK;
        Ok(Self {
            n_smooth,
            period,
            capacity,
            workers: workers.max(1),
            cursor: AtomicUsize::new(0),
            exhausted: false,
            scratch: WorkerScratch::new(capacity),
        })
    }

    /// Requested neighbor count.
    pub fn n_smooth(&self) -> usize {
        self.n_smooth
    }

    /// Per-axis period lengths (infinite where wrap is disabled).
    pub fn period(&self) -> [T; 3] {
        self.period
    }

    /// Worker count recorded by the last [`SmoothingContext::init_step`].
    pub fn workers(&self) -> usize {
        self.workers
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Start a new iteration generation over all active particles.
    pub fn init_step(&mut self, workers: usize) {
        self.workers = workers.max(1);
        self.cursor.store(0, Ordering::Relaxed);
        self.exhausted = false;
    }

    /// Restart single-worker iteration; equivalent to `init_step(1)`.
    pub fn rewind(&mut self) {
        self.init_step(1);
    }

    /// Claim the next unprocessed active particle slot.
    ///
    /// The counter only hands out each slot once, so coverage is
    /// exactly-once across however many workers share the context,
    /// regardless of their relative speeds.
    pub(crate) fn claim(&self, particles: &[Particle]) -> Option<usize> {
        loop {
            let slot = self.cursor.fetch_add(1, Ordering::Relaxed);
            if slot >= particles.len() {
                return None;
            }
            if particles[slot].active {
                return Some(slot);
            }
        }
    }

    pub(crate) fn mark_exhausted(&mut self) {
        self.exhausted = true;
    }

    /// Claim and evaluate the next active particle.
    ///
    /// Reads the particle's stored position (and, for kernel-weighted
    /// properties, its smoothing length), gathers its neighbors, applies
    /// `property`, and writes the result into the index's output field.
    /// Returns [`StepOutcome::Done`] once the generation is exhausted.
    ///
    /// A gather that overflows the candidate buffer writes the truncated
    /// result and reports [`SmoothError::CandidateOverflow`] immediately;
    /// the parallel [`SmoothingContext::run`] instead collects overflows
    /// and reports once at the end of the pass.
    pub fn step(
        &mut self,
        index: &mut SpatialIndex<T>,
        property: Property,
        kernel: KernelShape,
    ) -> Result<StepOutcome<T>, SmoothError> {
        if self.exhausted {
            return Ok(StepOutcome::Done);
        }
        // Validate before claiming so a rejected call loses no work item.
        ops::validate_inputs(index, property)?;
        let mut out = pass::take_output(index, property)?;
        let Some(slot) = self.claim(index.particles()) else {
            self.exhausted = true;
            pass::restore_output(index, out)?;
            return Ok(StepOutcome::Done);
        };

        let inputs = ops::resolve_inputs(index);
        let (value, neighbors, h) = ops::evaluate(
            index,
            &inputs,
            slot,
            property,
            kernel,
            self.n_smooth,
            &self.period,
            &mut self.scratch,
        );
        let orig = index.particles()[slot].orig;
        out.write(orig, value);
        pass::restore_output(index, out)?;

        if self.scratch.candidates.overflowed() {
            return Err(SmoothError::CandidateOverflow);
        }
        Ok(StepOutcome::Particle {
            index: orig,
            smoothing_length: h,
            neighbors,
        })
    }

    /// The context's private candidate buffer, holding the neighbors of
    /// the most recent [`SmoothingContext::step`].
    pub fn candidates(&self) -> &CandidateList<T> {
        &self.scratch.candidates
    }

    /// Neighbor list of the most recent [`SmoothingContext::step`], as
    /// (original index, squared distance) pairs in gather order.
    pub fn neighbors<'a>(
        &'a self,
        index: &'a SpatialIndex<T>,
    ) -> impl Iterator<Item = (usize, T)> + 'a {
        let particles = index.particles();
        self.scratch
            .candidates
            .entries()
            .map(move |(slot, d2)| (particles[slot].orig, d2))
    }

    /// All particles within `radius` of `center`, as original indices in
    /// traversal order.
    ///
    /// Unlike the property passes, the radius is used exactly as given.
    pub fn particles_in_sphere(
        &self,
        index: &SpatialIndex<T>,
        center: [T; 3],
        radius: T,
    ) -> Vec<usize> {
        let mut sink = CollectAll::default();
        ball_gather(index, &center, radius * radius, &self.period, &mut sink);
        let particles = index.particles();
        sink.slots
            .into_iter()
            .map(|slot| particles[slot].orig)
            .collect()
    }
}
