//! External gravitational potentials.
//!
//! A small, closed set of analytic background fields a simulation may
//! be embedded in, dispatched through the same tagged-variant recipe
//! as [`crate::kernel`] and [`crate::eos`].

use enum_dispatch::enum_dispatch;

use crate::context::Dim;

/// Operations an external potential must implement.
#[enum_dispatch]
pub trait ExternalPotential {
    /// Acceleration due to the external field at position `r`.
    fn acceleration(&self, dim: Dim, r: &[f64; 3]) -> [f64; 3];

    /// Potential energy per unit mass at position `r`.
    fn potential(&self, dim: Dim, r: &[f64; 3]) -> f64;
}

/// No external field.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPotential;

impl ExternalPotential for NoPotential {
    fn acceleration(&self, _dim: Dim, _r: &[f64; 3]) -> [f64; 3] {
        [0.0; 3]
    }

    fn potential(&self, _dim: Dim, _r: &[f64; 3]) -> f64 {
        0.0
    }
}

/// Plummer-sphere background potential, `phi(r) = -M / sqrt(r^2 + b^2)`.
#[derive(Debug, Clone, Copy)]
pub struct Plummer {
    /// Total mass of the background sphere.
    pub mass: f64,
    /// Plummer softening radius.
    pub b: f64,
}

impl ExternalPotential for Plummer {
    fn acceleration(&self, dim: Dim, r: &[f64; 3]) -> [f64; 3] {
        let r2 = dim.norm2(r);
        let denom = (r2 + self.b * self.b).powf(1.5);
        let mut a = [0.0; 3];
        for k in 0..dim.get() {
            a[k] = -self.mass * r[k] / denom;
        }
        a
    }

    fn potential(&self, dim: Dim, r: &[f64; 3]) -> f64 {
        let r2 = dim.norm2(r);
        -self.mass / (r2 + self.b * self.b).sqrt()
    }
}

/// One-dimensional vertical (disc) gravity, `a_z = -2 pi G sigma
/// tanh(z / z0)`, the standard isothermal-slab approximation to a
/// galactic or protoplanetary disc's vertical field.
#[derive(Debug, Clone, Copy)]
pub struct Vertical {
    /// Surface density of the disc.
    pub sigma: f64,
    /// Vertical scale height.
    pub z0: f64,
}

impl ExternalPotential for Vertical {
    fn acceleration(&self, _dim: Dim, r: &[f64; 3]) -> [f64; 3] {
        let two_pi_sigma = 2.0 * std::f64::consts::PI * self.sigma;
        [0.0, 0.0, -two_pi_sigma * (r[2] / self.z0).tanh()]
    }

    fn potential(&self, _dim: Dim, r: &[f64; 3]) -> f64 {
        let two_pi_sigma = 2.0 * std::f64::consts::PI * self.sigma;
        two_pi_sigma * self.z0 * (r[2] / self.z0).cosh().ln()
    }
}

/// Tagged union of all supported external-potential flavours.
#[enum_dispatch(ExternalPotential)]
#[derive(Debug, Clone, Copy)]
pub enum PotentialKind {
    /// No external field.
    NoPotential,
    /// Plummer-sphere background.
    Plummer,
    /// Vertical disc field.
    Vertical,
}
