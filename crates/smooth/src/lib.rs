//! Kernel-weighted neighbor smoothing over a [`kdtree`] spatial index.
//!
//! This crate is the query side of the engine:
//!
//! - [`kernel`] -- cubic-spline and Wendland C2 weight functions.
//! - [`CandidateList`] -- fixed-capacity per-worker neighbor scratch with
//!   graceful overflow.
//! - [`SmoothingContext`] -- ball gather, sphere queries, and the
//!   resumable claim-and-process iteration protocol.
//! - [`Property`] -- the closed set of smoothed quantities (smoothing
//!   lengths, density, mean, dispersion, divergence, curl).
//! - [`config`] -- JSON configuration and glue for building an index and
//!   context in one step.
//!
//! A typical full pass: bind smoothing lengths, run
//! [`Property::SmoothingLength`] to derive them, bind a density array, run
//! [`Property::Density`], then bind quantity fields and run whichever
//! smoothed property is needed. Worker counts only affect wall-clock time;
//! outputs are identical for any worker count.

#![warn(missing_docs)]

pub mod config;
mod context;
pub mod error;
mod gather;
pub mod kernel;
mod ops;
mod pass;

pub use config::{ConfigError, SmoothingConfig};
pub use context::{SmoothingContext, StepOutcome};
pub use error::SmoothError;
pub use gather::CandidateList;
pub use kernel::KernelShape;
pub use ops::Property;
pub use pass::PassSummary;

use kdtree::{Real, SpatialIndex, TreeNode};

/// Build a spatial index from a configuration, allocating the node array
/// internally.
pub fn build_index<T: Real>(
    config: &SmoothingConfig,
    positions: Vec<[T; 3]>,
    masses: Vec<T>,
) -> Result<SpatialIndex<T>, SmoothError> {
    let mut index = SpatialIndex::new(positions, masses, config.bucket_size)?;
    let nodes = vec![TreeNode::default(); index.node_count()];
    index.build(nodes, config.workers)?;
    Ok(index)
}

/// Create a smoothing context for `index` from a configuration.
pub fn smoothing_context<T: Real>(
    config: &SmoothingConfig,
    index: &SpatialIndex<T>,
) -> Result<SmoothingContext<T>, SmoothError> {
    SmoothingContext::new(index, config.n_smooth, config.workers, T::of(config.period))
}
