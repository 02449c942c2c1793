//! SPH smoothing kernels.
//!
//! Two tabulated polynomial families (cubic spline M4, quintic),
//! dispatched through a narrow operations trait instead of a class
//! hierarchy, per the "deep class hierarchies -> tagged variant +
//! narrow trait" design note. Pure functions, no hidden state beyond
//! the per-dimension normalisation constants baked in at construction.

use enum_dispatch::enum_dispatch;

use crate::context::Dim;

/// Upper bound of the dimensionless kernel support `s = r / h`.
pub const KERNRANGE_M4: f64 = 2.0;
/// Upper bound of the dimensionless kernel support `s = r / h` for the quintic kernel.
pub const KERNRANGE_QUINTIC: f64 = 3.0;

/// Operations every SPH kernel must implement.
#[enum_dispatch]
pub trait KernelOps {
    /// Dimensionless support radius in units of `h` (`kernrange`).
    fn range(&self) -> f64;

    /// Kernel value `W(s, h)` for `s = r / h`.
    fn w(&self, s: f64, h: f64) -> f64;

    /// Partial derivative `dW/dh` at fixed `r`.
    fn dw_dh(&self, s: f64, h: f64) -> f64;

    /// Partial derivative `dW/dr` (the scalar factor multiplying the
    /// unit separation vector to give `grad W`).
    fn dw_dr(&self, s: f64, h: f64) -> f64;
}

/// Cubic-spline M4 kernel, tabulated per dimension.
#[derive(Debug, Clone, Copy)]
pub struct M4Cubic {
    dim: Dim,
}

impl M4Cubic {
    /// Constructs an M4 cubic-spline kernel for the given dimensionality.
    #[must_use]
    pub const fn new(dim: Dim) -> Self {
        Self { dim }
    }

    /// Normalisation constant `sigma_d` such that `integral W d^d r = 1`.
    fn sigma(self) -> f64 {
        match self.dim {
            Dim::One => 2.0 / 3.0,
            Dim::Two => 10.0 / (7.0 * std::f64::consts::PI),
            Dim::Three => 1.0 / std::f64::consts::PI,
        }
    }

    /// Unnormalised shape function and its derivative w.r.t. `s`.
    fn shape(s: f64) -> (f64, f64) {
        if s < 1.0 {
            (1.0 - 1.5 * s * s + 0.75 * s * s * s, -3.0 * s + 2.25 * s * s)
        } else if s < 2.0 {
            let t = 2.0 - s;
            (0.25 * t * t * t, -0.75 * t * t)
        } else {
            (0.0, 0.0)
        }
    }
}

impl KernelOps for M4Cubic {
    fn range(&self) -> f64 {
        KERNRANGE_M4
    }

    fn w(&self, s: f64, h: f64) -> f64 {
        let d = self.dim.get() as i32;
        let (shape, _) = Self::shape(s);
        self.sigma() * shape / h.powi(d)
    }

    fn dw_dh(&self, s: f64, h: f64) -> f64 {
        let d = self.dim.get() as i32;
        let (shape, dshape) = Self::shape(s);
        let hd1 = h.powi(d + 1);
        -self.sigma() * (f64::from(d) * shape + s * dshape) / hd1
    }

    fn dw_dr(&self, s: f64, h: f64) -> f64 {
        let d = self.dim.get() as i32;
        let (_, dshape) = Self::shape(s);
        self.sigma() * dshape / h.powi(d + 1)
    }
}

/// Quintic-spline kernel, tabulated per dimension.
#[derive(Debug, Clone, Copy)]
pub struct Quintic {
    dim: Dim,
}

impl Quintic {
    /// Constructs a quintic kernel for the given dimensionality.
    #[must_use]
    pub const fn new(dim: Dim) -> Self {
        Self { dim }
    }

    fn sigma(self) -> f64 {
        match self.dim {
            Dim::One => 1.0 / 120.0,
            Dim::Two => 7.0 / (478.0 * std::f64::consts::PI),
            Dim::Three => 3.0 / (359.0 * std::f64::consts::PI),
        }
    }

    fn shape(s: f64) -> (f64, f64) {
        let t3 = (3.0 - s).max(0.0).powi(5);
        let t2 = (2.0 - s).max(0.0).powi(5);
        let t1 = (1.0 - s).max(0.0).powi(5);
        let dt3 = if s < 3.0 { -5.0 * (3.0 - s).powi(4) } else { 0.0 };
        let dt2 = if s < 2.0 { -5.0 * (2.0 - s).powi(4) } else { 0.0 };
        let dt1 = if s < 1.0 { -5.0 * (1.0 - s).powi(4) } else { 0.0 };
        (t3 - 6.0 * t2 + 15.0 * t1, dt3 - 6.0 * dt2 + 15.0 * dt1)
    }
}

impl KernelOps for Quintic {
    fn range(&self) -> f64 {
        KERNRANGE_QUINTIC
    }

    fn w(&self, s: f64, h: f64) -> f64 {
        let d = self.dim.get() as i32;
        let (shape, _) = Self::shape(s);
        self.sigma() * shape / h.powi(d)
    }

    fn dw_dh(&self, s: f64, h: f64) -> f64 {
        let d = self.dim.get() as i32;
        let (shape, dshape) = Self::shape(s);
        -self.sigma() * (f64::from(d) * shape + s * dshape) / h.powi(d + 1)
    }

    fn dw_dr(&self, s: f64, h: f64) -> f64 {
        let d = self.dim.get() as i32;
        let (_, dshape) = Self::shape(s);
        self.sigma() * dshape / h.powi(d + 1)
    }
}

/// Tagged union of all supported kernel flavours.
///
/// WARNING: never change the order or content of this enum without
/// checking every `match` on [`KernelKind`] elsewhere in the crate.
#[enum_dispatch(KernelOps)]
#[derive(Debug, Clone, Copy)]
pub enum KernelKind {
    /// Cubic-spline M4 kernel.
    M4Cubic,
    /// Quintic-spline kernel.
    Quintic,
}

impl KernelKind {
    /// Constructs the requested kernel flavour for the given dimensionality.
    #[must_use]
    pub const fn new(quintic: bool, dim: Dim) -> Self {
        if quintic {
            Self::Quintic(Quintic::new(dim))
        } else {
            Self::M4Cubic(M4Cubic::new(dim))
        }
    }
}
