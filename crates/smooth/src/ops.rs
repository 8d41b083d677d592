//! Per-property aggregation over a gathered neighbor list.
//!
//! Every property reads the worker's candidate buffer and produces exactly
//! one output value for the claimed particle. The gather radius for all
//! kernel-weighted properties is `4 h^2` (support `2h`); the
//! smoothing-length property instead runs a k-nearest-neighbor search and
//! derives `h` from the farthest of the `k` neighbors.

use kdtree::bounds::wrap_displacement;
use kdtree::{Quantity, Real, SpatialIndex};

use crate::error::SmoothError;
use crate::gather::{ball_gather, nearest_neighbors, WorkerScratch};
use crate::kernel::KernelShape;

/// Smoothed property a pass evaluates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Property {
    /// Recompute per-particle smoothing lengths from the k nearest
    /// neighbors (no kernel weighting).
    SmoothingLength,
    /// Mass-weighted SPH density.
    Density,
    /// Kernel-weighted mean of a scalar quantity.
    MeanScalar,
    /// Kernel-weighted mean of a vector quantity.
    MeanVector,
    /// Kernel-weighted dispersion of a scalar quantity.
    DispersionScalar,
    /// Kernel-weighted dispersion of a vector quantity (scalar result).
    DispersionVector,
    /// SPH divergence of a vector quantity.
    Divergence,
    /// SPH curl of a vector quantity.
    Curl,
}

/// Output value of one per-particle evaluation.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Computed<T> {
    Scalar(T),
    Vector([T; 3]),
}

/// Read-only field slices a pass needs, resolved once up front.
///
/// Slices a property never touches are left empty; the validation in
/// [`validate_inputs`] guarantees every slice a property reads has full
/// particle-count length.
pub(crate) struct PassInputs<'a, T: Real> {
    pub positions: &'a [[T; 3]],
    pub masses: &'a [T],
    pub smoothing: &'a [T],
    pub density: &'a [T],
    pub qty_scalar: &'a [T],
    pub qty_vector: &'a [[T; 3]],
}

/// Check that every field `property` reads is bound with the right shape.
///
/// The pass output field is not an input and is checked separately when it
/// is taken out of the index.
pub(crate) fn validate_inputs<T: Real>(
    index: &SpatialIndex<T>,
    property: Property,
) -> Result<(), SmoothError> {
    use kdtree::IndexError;

    let needs_gather = property != Property::SmoothingLength;
    if needs_gather && index.smoothing_lengths().is_none() {
        return Err(IndexError::FieldMissing("smooth").into());
    }

    let needs_density = !matches!(property, Property::SmoothingLength | Property::Density);
    if needs_density && index.densities().is_none() {
        return Err(IndexError::FieldMissing("rho").into());
    }

    let qty_shape = match property {
        Property::SmoothingLength | Property::Density => None,
        Property::MeanScalar | Property::DispersionScalar => Some(false),
        Property::MeanVector
        | Property::DispersionVector
        | Property::Divergence
        | Property::Curl => Some(true),
    };
    if let Some(vector) = qty_shape {
        match index.quantity() {
            None => return Err(IndexError::FieldMissing("qty").into()),
            Some(Quantity::Scalar(_)) if vector => {
                return Err(IndexError::ShapeMismatch("qty").into())
            }
            Some(Quantity::Vector(_)) if !vector => {
                return Err(IndexError::ShapeMismatch("qty").into())
            }
            Some(_) => {}
        }
    }
    Ok(())
}

/// Resolve the input slices of a pass.
///
/// Must run after [`validate_inputs`] (and after the output field has been
/// taken out); unbound fields resolve to empty slices.
pub(crate) fn resolve_inputs<T: Real>(index: &SpatialIndex<T>) -> PassInputs<'_, T> {
    let (qty_scalar, qty_vector): (&[T], &[[T; 3]]) = match index.quantity() {
        Some(Quantity::Scalar(v)) => (v.as_slice(), &[]),
        Some(Quantity::Vector(v)) => (&[], v.as_slice()),
        None => (&[], &[]),
    };
    PassInputs {
        positions: index.positions(),
        masses: index.masses(),
        smoothing: index.smoothing_lengths().unwrap_or(&[]),
        density: index.densities().unwrap_or(&[]),
        qty_scalar,
        qty_vector,
    }
}

/// Evaluate `property` for the particle in `slot`.
///
/// Returns the computed output, the neighbor count, and the smoothing
/// length used (the freshly derived one for the smoothing-length
/// property).
pub(crate) fn evaluate<T: Real>(
    index: &SpatialIndex<T>,
    inputs: &PassInputs<'_, T>,
    slot: usize,
    property: Property,
    kernel: KernelShape,
    n_smooth: usize,
    period: &[T; 3],
    scratch: &mut WorkerScratch<T>,
) -> (Computed<T>, usize, T) {
    let orig = index.particles()[slot].orig;
    let center = inputs.positions[orig];

    if property == Property::SmoothingLength {
        let max_d2 = nearest_neighbors(index, &center, n_smooth, period, scratch);
        let h = max_d2.sqrt() * T::of(0.5);
        return (Computed::Scalar(h), scratch.candidates.len(), h);
    }

    let h = inputs.smoothing[orig];
    let r2 = T::of(4.0) * h * h;
    scratch.candidates.clear();
    ball_gather(index, &center, r2, period, &mut scratch.candidates);

    let value = match property {
        Property::SmoothingLength => unreachable!("handled above"),
        Property::Density => Computed::Scalar(density(index, inputs, scratch, kernel, h)),
        Property::MeanScalar => Computed::Scalar(mean_scalar(index, inputs, scratch, kernel, h)),
        Property::MeanVector => Computed::Vector(mean_vector(index, inputs, scratch, kernel, h)),
        Property::DispersionScalar => {
            Computed::Scalar(dispersion_scalar(index, inputs, scratch, kernel, h))
        }
        Property::DispersionVector => {
            Computed::Scalar(dispersion_vector(index, inputs, scratch, kernel, h))
        }
        Property::Divergence => {
            Computed::Scalar(divergence(index, inputs, scratch, kernel, h, orig, period))
        }
        Property::Curl => Computed::Vector(curl(index, inputs, scratch, kernel, h, orig, period)),
    };
    (value, scratch.candidates.len(), h)
}

fn density<T: Real>(
    index: &SpatialIndex<T>,
    inputs: &PassInputs<'_, T>,
    scratch: &WorkerScratch<T>,
    kernel: KernelShape,
    h: T,
) -> T {
    let particles = index.particles();
    let mut rho = T::zero();
    for (slot, d2) in scratch.candidates.entries() {
        let j = particles[slot].orig;
        rho += inputs.masses[j] * kernel.weight(d2.sqrt(), h);
    }
    rho
}

/// Volume weight of neighbor `j`: `m_j / rho_j`.
fn volume<T: Real>(inputs: &PassInputs<'_, T>, j: usize) -> T {
    inputs.masses[j] / inputs.density[j]
}

fn mean_scalar<T: Real>(
    index: &SpatialIndex<T>,
    inputs: &PassInputs<'_, T>,
    scratch: &WorkerScratch<T>,
    kernel: KernelShape,
    h: T,
) -> T {
    let particles = index.particles();
    let mut mean = T::zero();
    for (slot, d2) in scratch.candidates.entries() {
        let j = particles[slot].orig;
        mean += volume(inputs, j) * kernel.weight(d2.sqrt(), h) * inputs.qty_scalar[j];
    }
    mean
}

fn mean_vector<T: Real>(
    index: &SpatialIndex<T>,
    inputs: &PassInputs<'_, T>,
    scratch: &WorkerScratch<T>,
    kernel: KernelShape,
    h: T,
) -> [T; 3] {
    let particles = index.particles();
    let mut mean = [T::zero(); 3];
    for (slot, d2) in scratch.candidates.entries() {
        let j = particles[slot].orig;
        let w = volume(inputs, j) * kernel.weight(d2.sqrt(), h);
        for axis in 0..3 {
            mean[axis] += w * inputs.qty_vector[j][axis];
        }
    }
    mean
}

fn dispersion_scalar<T: Real>(
    index: &SpatialIndex<T>,
    inputs: &PassInputs<'_, T>,
    scratch: &WorkerScratch<T>,
    kernel: KernelShape,
    h: T,
) -> T {
    let particles = index.particles();
    let mean = mean_scalar(index, inputs, scratch, kernel, h);
    let mut var = T::zero();
    for (slot, d2) in scratch.candidates.entries() {
        let j = particles[slot].orig;
        let dq = inputs.qty_scalar[j] - mean;
        var += volume(inputs, j) * kernel.weight(d2.sqrt(), h) * dq * dq;
    }
    var.max(T::zero()).sqrt()
}

fn dispersion_vector<T: Real>(
    index: &SpatialIndex<T>,
    inputs: &PassInputs<'_, T>,
    scratch: &WorkerScratch<T>,
    kernel: KernelShape,
    h: T,
) -> T {
    let particles = index.particles();
    let mean = mean_vector(index, inputs, scratch, kernel, h);
    let mut var = T::zero();
    for (slot, d2) in scratch.candidates.entries() {
        let j = particles[slot].orig;
        let mut dq2 = T::zero();
        for axis in 0..3 {
            let dq = inputs.qty_vector[j][axis] - mean[axis];
            dq2 += dq * dq;
        }
        var += volume(inputs, j) * kernel.weight(d2.sqrt(), h) * dq2;
    }
    var.max(T::zero()).sqrt()
}

/// Kernel gradient with respect to the center particle:
/// `(dW/dr) (x_i - x_j) / r`, with the displacement wrapped to its nearest
/// periodic image. Zero for coincident particles.
fn kernel_gradient<T: Real>(
    center: &[T; 3],
    neighbor: &[T; 3],
    r: T,
    h: T,
    kernel: KernelShape,
    period: &[T; 3],
) -> [T; 3] {
    if r <= T::epsilon() {
        return [T::zero(); 3];
    }
    let dw_dr = kernel.weight_derivative(r, h);
    let inv_r = T::one() / r;
    let mut grad = [T::zero(); 3];
    for axis in 0..3 {
        let dx = wrap_displacement(center[axis] - neighbor[axis], period[axis]);
        grad[axis] = dw_dr * dx * inv_r;
    }
    grad
}

fn divergence<T: Real>(
    index: &SpatialIndex<T>,
    inputs: &PassInputs<'_, T>,
    scratch: &WorkerScratch<T>,
    kernel: KernelShape,
    h: T,
    center_orig: usize,
    period: &[T; 3],
) -> T {
    let particles = index.particles();
    let center = inputs.positions[center_orig];
    let qi = inputs.qty_vector[center_orig];
    let mut div = T::zero();
    for (slot, d2) in scratch.candidates.entries() {
        let j = particles[slot].orig;
        let grad = kernel_gradient(&center, &inputs.positions[j], d2.sqrt(), h, kernel, period);
        let mut dot = T::zero();
        for axis in 0..3 {
            dot += (inputs.qty_vector[j][axis] - qi[axis]) * grad[axis];
        }
        div += volume(inputs, j) * dot;
    }
    div
}

fn curl<T: Real>(
    index: &SpatialIndex<T>,
    inputs: &PassInputs<'_, T>,
    scratch: &WorkerScratch<T>,
    kernel: KernelShape,
    h: T,
    center_orig: usize,
    period: &[T; 3],
) -> [T; 3] {
    let particles = index.particles();
    let center = inputs.positions[center_orig];
    let qi = inputs.qty_vector[center_orig];
    let mut out = [T::zero(); 3];
    for (slot, d2) in scratch.candidates.entries() {
        let j = particles[slot].orig;
        let grad = kernel_gradient(&center, &inputs.positions[j], d2.sqrt(), h, kernel, period);
        let dq = [
            inputs.qty_vector[j][0] - qi[0],
            inputs.qty_vector[j][1] - qi[1],
            inputs.qty_vector[j][2] - qi[2],
        ];
        let v = volume(inputs, j);
        out[0] += v * (grad[1] * dq[2] - grad[2] * dq[1]);
        out[1] += v * (grad[2] * dq[0] - grad[0] * dq[2]);
        out[2] += v * (grad[0] * dq[1] - grad[1] * dq[0]);
    }
    out
}
