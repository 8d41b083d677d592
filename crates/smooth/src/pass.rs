//! Multi-worker smoothing pass driver.
//!
//! A pass takes the output field out of the index, shares the index
//! read-only with a scope of worker threads, and puts the field back once
//! every worker has joined. Workers claim particles through the context's
//! atomic cursor and write results to disjoint output slots, so the only
//! synchronization on the hot path is the claim itself. Overflow status is
//! returned per worker and merged at the join point into a single error.

use core::marker::PhantomData;
use std::thread;

use kdtree::{IndexError, Quantity, Real, SpatialIndex};

use crate::context::SmoothingContext;
use crate::error::SmoothError;
use crate::gather::WorkerScratch;
use crate::kernel::KernelShape;
use crate::ops::{self, Computed, PassInputs, Property};

/// Summary of a completed pass.
#[derive(Debug, Clone, Copy)]
pub struct PassSummary {
    /// Particles evaluated.
    pub particles: usize,
    /// Worker threads used.
    pub workers: usize,
}

/// The output field of a pass, moved out of the index for its duration.
pub(crate) enum OwnedOutput<T: Real> {
    Smoothing(Vec<T>),
    Density(Vec<T>),
    SmoothedScalar(Vec<T>),
    SmoothedVector(Vec<[T; 3]>),
}

impl<T: Real> OwnedOutput<T> {
    pub(crate) fn write(&mut self, i: usize, value: Computed<T>) {
        match (self, value) {
            (
                OwnedOutput::Smoothing(v)
                | OwnedOutput::Density(v)
                | OwnedOutput::SmoothedScalar(v),
                Computed::Scalar(x),
            ) => v[i] = x,
            (OwnedOutput::SmoothedVector(v), Computed::Vector(x)) => v[i] = x,
            _ => unreachable!("output shape is fixed by the property"),
        }
    }
}

/// Move the output field for `property` out of the index, validating that
/// it is bound with the shape the property writes.
pub(crate) fn take_output<T: Real>(
    index: &mut SpatialIndex<T>,
    property: Property,
) -> Result<OwnedOutput<T>, SmoothError> {
    match property {
        Property::SmoothingLength => index
            .take_smoothing_lengths()
            .map(OwnedOutput::Smoothing)
            .ok_or_else(|| IndexError::FieldMissing("smooth").into()),
        Property::Density => index
            .take_densities()
            .map(OwnedOutput::Density)
            .ok_or_else(|| IndexError::FieldMissing("rho").into()),
        Property::MeanVector | Property::Curl => match index.take_smoothed() {
            Some(Quantity::Vector(v)) => Ok(OwnedOutput::SmoothedVector(v)),
            Some(other) => {
                index.bind_smoothed(other)?;
                Err(IndexError::ShapeMismatch("qty_sm").into())
            }
            None => Err(IndexError::FieldMissing("qty_sm").into()),
        },
        Property::MeanScalar
        | Property::DispersionScalar
        | Property::DispersionVector
        | Property::Divergence => match index.take_smoothed() {
            Some(Quantity::Scalar(v)) => Ok(OwnedOutput::SmoothedScalar(v)),
            Some(other) => {
                index.bind_smoothed(other)?;
                Err(IndexError::ShapeMismatch("qty_sm").into())
            }
            None => Err(IndexError::FieldMissing("qty_sm").into()),
        },
    }
}

/// Return a pass output to its slot in the index.
pub(crate) fn restore_output<T: Real>(
    index: &mut SpatialIndex<T>,
    output: OwnedOutput<T>,
) -> Result<(), SmoothError> {
    match output {
        OwnedOutput::Smoothing(v) => index.bind_smoothing_lengths(v)?,
        OwnedOutput::Density(v) => index.bind_densities(v)?,
        OwnedOutput::SmoothedScalar(v) => index.bind_smoothed(Quantity::Scalar(v))?,
        OwnedOutput::SmoothedVector(v) => index.bind_smoothed(Quantity::Vector(v))?,
    }
    Ok(())
}

/// Shared writer over disjoint slots of the output field.
///
/// Workers write through a raw pointer; the claim protocol guarantees each
/// slot index is handed to exactly one worker, so no two threads ever
/// touch the same element.
struct SharedSlots<'a, V> {
    ptr: *mut V,
    len: usize,
    _owner: PhantomData<&'a mut [V]>,
}

// SAFETY: the pointer targets a unique, pass-local allocation and every
// element is written by at most one thread (disjoint claimed slots).
unsafe impl<V: Send> Send for SharedSlots<'_, V> {}
unsafe impl<V: Send> Sync for SharedSlots<'_, V> {}

impl<'a, V> SharedSlots<'a, V> {
    fn new(slice: &'a mut [V]) -> Self {
        Self {
            ptr: slice.as_mut_ptr(),
            len: slice.len(),
            _owner: PhantomData,
        }
    }

    /// # Safety
    ///
    /// `i` must be in bounds and claimed by the calling worker alone.
    unsafe fn write(&self, i: usize, value: V) {
        debug_assert!(i < self.len);
        // SAFETY: in bounds per the caller contract; exclusive per the
        // claim protocol.
        unsafe { self.ptr.add(i).write(value) };
    }
}

enum SharedOutput<'a, T: Real> {
    Scalar(SharedSlots<'a, T>),
    Vector(SharedSlots<'a, [T; 3]>),
}

impl<'a, T: Real> SharedOutput<'a, T> {
    fn of(output: &'a mut OwnedOutput<T>) -> Self {
        match output {
            OwnedOutput::Smoothing(v)
            | OwnedOutput::Density(v)
            | OwnedOutput::SmoothedScalar(v) => SharedOutput::Scalar(SharedSlots::new(v)),
            OwnedOutput::SmoothedVector(v) => SharedOutput::Vector(SharedSlots::new(v)),
        }
    }

    /// # Safety
    ///
    /// Same contract as [`SharedSlots::write`].
    unsafe fn write(&self, i: usize, value: Computed<T>) {
        match (self, value) {
            (SharedOutput::Scalar(s), Computed::Scalar(x)) => unsafe { s.write(i, x) },
            (SharedOutput::Vector(s), Computed::Vector(x)) => unsafe { s.write(i, x) },
            _ => unreachable!("output shape is fixed by the property"),
        }
    }
}

struct WorkerReport {
    processed: usize,
    overflowed: bool,
}

impl<T: Real> SmoothingContext<T> {
    /// Run a full smoothing pass for `property` over every active
    /// particle, using `workers` threads.
    ///
    /// Workers repeatedly claim a particle, gather its neighbors at
    /// radius squared `4 h^2` (the smoothing-length property runs a
    /// k-nearest-neighbor search instead), evaluate the kernel, and write
    /// the particle's output slot. Candidate-buffer overflows do not abort
    /// the pass; they are merged at the join and surfaced as one
    /// [`SmoothError::CandidateOverflow`] after every worker finishes.
    pub fn run(
        &mut self,
        index: &mut SpatialIndex<T>,
        property: Property,
        kernel: KernelShape,
        workers: usize,
    ) -> Result<PassSummary, SmoothError> {
        let workers = workers.max(1);
        index.root()?;
        ops::validate_inputs(index, property)?;
        let mut output = take_output(index, property)?;

        tracing::info!(
            "smoothing pass: {:?} over {} active particles with {} workers",
            property,
            index.active_count(),
            workers
        );

        self.init_step(workers);
        let (processed, overflowed) = {
            let ctx = &*self;
            let inputs = ops::resolve_inputs(index);
            let shared = SharedOutput::of(&mut output);
            let reports = run_workers(ctx, index, &inputs, &shared, property, kernel, workers);
            reports.iter().fold((0, false), |(n, o), r| {
                (n + r.processed, o || r.overflowed)
            })
        };
        self.mark_exhausted();

        restore_output(index, output)?;

        if overflowed {
            return Err(SmoothError::CandidateOverflow);
        }
        tracing::info!("smoothing pass complete: {} particles", processed);
        Ok(PassSummary {
            particles: processed,
            workers,
        })
    }
}

fn run_workers<T: Real>(
    ctx: &SmoothingContext<T>,
    index: &SpatialIndex<T>,
    inputs: &PassInputs<'_, T>,
    output: &SharedOutput<'_, T>,
    property: Property,
    kernel: KernelShape,
    workers: usize,
) -> Vec<WorkerReport> {
    thread::scope(|s| {
        let handles: Vec<_> = (0..workers)
            .map(|worker| {
                s.spawn(move || worker_loop(ctx, index, inputs, output, property, kernel, worker))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("smoothing worker panicked"))
            .collect()
    })
}

fn worker_loop<T: Real>(
    ctx: &SmoothingContext<T>,
    index: &SpatialIndex<T>,
    inputs: &PassInputs<'_, T>,
    output: &SharedOutput<'_, T>,
    property: Property,
    kernel: KernelShape,
    worker: usize,
) -> WorkerReport {
    let mut scratch = WorkerScratch::new(ctx.capacity());
    let particles = index.particles();
    let mut processed = 0usize;
    let mut overflowed = false;

    while let Some(slot) = ctx.claim(particles) {
        let (value, _neighbors, _h) = ops::evaluate(
            index,
            inputs,
            slot,
            property,
            kernel,
            ctx.n_smooth(),
            &ctx.period(),
            &mut scratch,
        );
        if scratch.candidates.overflowed() {
            overflowed = true;
        }
        // SAFETY: `slot` was claimed exactly once across all workers and
        // distinct slots carry distinct original indices, so this is the
        // only write to this output element during the pass.
        unsafe { output.write(particles[slot].orig, value) };
        processed += 1;
    }

    tracing::debug!("worker {} processed {} particles", worker, processed);
    WorkerReport {
        processed,
        overflowed,
    }
}
