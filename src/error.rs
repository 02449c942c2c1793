//! Crate-wide error type.

use thiserror::Error;

/// Catch-all error for this crate.
///
/// Each variant corresponds to one of the error kinds named in the
/// simulation's error-handling design: parameter/dimensionality errors
/// fail setup, capacity and convergence errors are retried by the
/// caller up to a configured cap before becoming fatal, and tree
/// invariants are only checked when `verify_all` is set.
#[derive(Debug, Error)]
pub enum Error {
    /// A parameter value was missing, of the wrong type, or outside
    /// its valid range.
    #[error("invalid parameter `{0}`")]
    ParameterInvalid(String),

    /// A vector quantity was constructed or used with a dimensionality
    /// that does not match the simulation's runtime `dim`.
    #[error("dimensionality mismatch: expected {expected}, got {got}")]
    DimensionalityMismatch {
        /// The simulation's configured dimensionality.
        expected: usize,
        /// The dimensionality actually encountered.
        got: usize,
    },

    /// A fixed-size buffer (ghost array, neighbour list, cell array)
    /// overflowed even after growing to its configured cap.
    #[error("{resource} capacity exceeded (limit {limit})")]
    MemoryCapacityExceeded {
        /// Name of the resource that overflowed, e.g. `"ghost buffer"`.
        resource: &'static str,
        /// The configured cap that was hit.
        limit: usize,
    },

    /// An iterative solve (density/smoothing-length, for instance)
    /// failed to converge within its iteration cap.
    #[error("{what} failed to converge after {iterations} iterations")]
    ConvergenceFailure {
        /// Name of the quantity being solved for.
        what: &'static str,
        /// Number of iterations attempted.
        iterations: usize,
    },

    /// A computed timestep fell below the configured floor.
    #[error("timestep {dt} underflowed floor {floor}")]
    TimestepUnderflow {
        /// The offending timestep.
        dt: f64,
        /// The configured minimum timestep.
        floor: f64,
    },

    /// A snapshot could not be parsed or written in the expected
    /// column format.
    #[error("I/O format error: {0}")]
    IoFormat(String),

    /// A tree invariant check (only run when `verify_all` is set)
    /// failed; this indicates a programmer error, not bad input.
    #[error("tree invariant violated: {0}")]
    TreeInvariantViolated(String),

    /// An error that does not originate from this crate.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;
