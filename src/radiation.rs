//! Radiative transfer seam.
//!
//! Full radiative transfer is out of scope for the physics core; this
//! module models only the interface the equation-of-state layer needs
//! ([`crate::eos::Ionising`] reads the `ionised` flag a
//! [`RadiationField`] implementation would set), plus a trivial
//! ionisation-front stub useful for testing that seam without pulling
//! in a real transport solver.

use enum_dispatch::enum_dispatch;

use crate::context::Dim;

/// Operations a radiation-field model must implement.
#[enum_dispatch]
pub trait RadiationField {
    /// Returns whether the given position currently sits in an
    /// ionised region.
    fn is_ionised(&self, dim: Dim, r: &[f64; 3]) -> bool;
}

/// No radiation field: nothing is ever ionised.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRadiation;

impl RadiationField for NoRadiation {
    fn is_ionised(&self, _dim: Dim, _r: &[f64; 3]) -> bool {
        false
    }
}

/// A static spherical ionisation front centred on a source, useful for
/// exercising [`crate::eos::Ionising`] without a real transport solve.
#[derive(Debug, Clone, Copy)]
pub struct StaticIonisationFront {
    /// Source position.
    pub source: [f64; 3],
    /// Radius of the ionised region.
    pub radius: f64,
}

impl RadiationField for StaticIonisationFront {
    fn is_ionised(&self, dim: Dim, r: &[f64; 3]) -> bool {
        dim.norm(&dim.sub(r, &self.source)) < self.radius
    }
}

/// Tagged union of all supported radiation-field flavours.
#[enum_dispatch(RadiationField)]
#[derive(Debug, Clone, Copy)]
pub enum RadiationKind {
    /// No radiation field.
    NoRadiation,
    /// Static spherical ionisation front.
    StaticIonisationFront,
}
