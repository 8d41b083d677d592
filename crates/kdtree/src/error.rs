//! Error taxonomy for index construction and field binding.
//!
//! Every variant is a validation or resource failure raised before the
//! operation touches any state; a caller seeing one of these can retry
//! with corrected inputs.

use thiserror::Error;

/// Errors from building or binding a [`crate::SpatialIndex`].
#[derive(Debug, Error)]
pub enum IndexError {
    /// A bound field array does not match the particle count.
    #[error("'{name}' array has {got} elements but the index holds {expected} particles")]
    LengthMismatch {
        /// Name of the offending field.
        name: &'static str,
        /// Particle count of the index.
        expected: usize,
        /// Length of the supplied array.
        got: usize,
    },

    /// Bucket size of zero was requested.
    #[error("bucket size must be at least 1")]
    InvalidBucketSize,

    /// The supplied node array is not sized to the exact node count.
    #[error("node array has {got} entries but this index requires exactly {expected}")]
    WrongNodeCount {
        /// Required node count, from [`crate::node_count`].
        expected: usize,
        /// Length of the supplied array.
        got: usize,
    },

    /// A second build was attempted on an index whose tree already exists.
    #[error("the tree for this index has already been built")]
    AlreadyBuilt,

    /// The operation needs a built tree.
    #[error("operation requires a built tree")]
    NotBuilt,

    /// A pass requires a field that was never bound.
    #[error("required field '{0}' has not been bound")]
    FieldMissing(&'static str),

    /// A bound field has the wrong scalar/vector shape for the operation.
    #[error("field '{0}' does not have the shape this operation requires")]
    ShapeMismatch(&'static str),

    /// The per-particle slot store could not be allocated.
    #[error("failed to allocate particle store for {particles} particles")]
    StoreAllocation {
        /// Requested particle count.
        particles: usize,
    },
}
