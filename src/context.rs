//! Simulation-wide context: runtime dimensionality and shared config.
//!
//! Replaces the compile-time dimension switch of the original source
//! with a runtime `dim` carried on one explicit context object, per the
//! "no global state / singletons" design note: every subsystem that
//! needs dimension-dependent math or configuration is handed a
//! `&SimulationContext`, nothing is read from process-wide state.

use crate::config::Params;
use crate::error::{Error, Result};

/// Spatial dimensionality of a simulation.
///
/// Positions/velocities/accelerations are always stored as `[f64; 3]`;
/// `Dim` only controls how many of the leading components participate
/// in dot products, norms and kernel gradients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dim {
    /// One spatial dimension.
    One = 1,
    /// Two spatial dimensions.
    Two = 2,
    /// Three spatial dimensions.
    Three = 3,
}

impl Dim {
    /// Constructs a [`Dim`] from a raw integer, validating it once.
    pub fn new(d: usize) -> Result<Self> {
        match d {
            1 => Ok(Self::One),
            2 => Ok(Self::Two),
            3 => Ok(Self::Three),
            got => Err(Error::DimensionalityMismatch { expected: 3, got }),
        }
    }

    /// Returns the dimensionality as a `usize`.
    #[must_use]
    pub const fn get(self) -> usize {
        self as usize
    }

    /// Dot product of two vectors, restricted to the first `self.get()`
    /// components. Three specialised branches keep the hot loop tight
    /// instead of a generic loop over a runtime-length slice.
    #[must_use]
    pub fn dot(self, a: &[f64; 3], b: &[f64; 3]) -> f64 {
        match self {
            Self::One => a[0] * b[0],
            Self::Two => a[0] * b[0] + a[1] * b[1],
            Self::Three => a[0] * b[0] + a[1] * b[1] + a[2] * b[2],
        }
    }

    /// Squared Euclidean norm, restricted to `self.get()` components.
    #[must_use]
    pub fn norm2(self, a: &[f64; 3]) -> f64 {
        self.dot(a, a)
    }

    /// Euclidean norm, restricted to `self.get()` components.
    #[must_use]
    pub fn norm(self, a: &[f64; 3]) -> f64 {
        self.norm2(a).sqrt()
    }

    /// Difference `a - b`, zeroing components beyond `self.get()`.
    #[must_use]
    pub fn sub(self, a: &[f64; 3], b: &[f64; 3]) -> [f64; 3] {
        let mut r = [0.0; 3];
        for k in 0..self.get() {
            r[k] = a[k] - b[k];
        }
        r
    }
}

/// Shared, read-mostly context passed into every subsystem.
///
/// Carries the one piece of genuinely global, immutable configuration
/// (dimensionality) plus the active [`Params`]. There is no other
/// process-wide mutable state anywhere in the crate.
pub struct SimulationContext {
    dim: Dim,
    params: Params,
}

impl SimulationContext {
    /// Builds a context from validated parameters.
    pub fn new(params: Params) -> Result<Self> {
        params.validate()?;
        let dim = Dim::new(params.get_int_or("ndim", 3) as usize)?;
        Ok(Self { dim, params })
    }

    /// Returns the simulation's runtime dimensionality.
    #[must_use]
    pub const fn dim(&self) -> Dim {
        self.dim
    }

    /// Returns a reference to the active parameter set.
    #[must_use]
    pub const fn params(&self) -> &Params {
        &self.params
    }
}
