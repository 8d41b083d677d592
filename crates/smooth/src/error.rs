//! Error taxonomy for smoothing contexts and passes.

use kdtree::IndexError;
use thiserror::Error;

/// Errors from creating a smoothing context or running a pass.
#[derive(Debug, Error)]
pub enum SmoothError {
    /// A validation failure raised by the underlying index (unbound
    /// fields, wrong shapes, missing tree).
    #[error(transparent)]
    Index(#[from] IndexError),

    /// The requested neighbor count is zero.
    #[error("neighbor count must be at least 1")]
    InvalidNeighborCount,

    /// More neighbors were requested than the index holds particles.
    #[error("requested {requested} neighbors but the index holds {available} particles")]
    TooManyNeighbors {
        /// Requested neighbor count.
        requested: usize,
        /// Particles in the index.
        available: usize,
    },

    /// The particle cloud does not fit inside the periodic box.
    #[error("particles span {extent} along axis {axis}, larger than the periodic box {period}")]
    BoxTooSmall {
        /// Offending axis.
        axis: usize,
        /// Cloud extent along that axis.
        extent: f64,
        /// Configured period.
        period: f64,
    },

    /// At least one gather during a pass exceeded the candidate buffer.
    ///
    /// The pass ran to completion (affected particles saw a truncated
    /// neighbor list) but its results must not be trusted; raise the
    /// neighbor count headroom or lower the smoothing lengths.
    #[error(
        "candidate buffer overflow during smoothing; smoothing lengths are too \
         large for the configured neighbor count"
    )]
    CandidateOverflow,
}
