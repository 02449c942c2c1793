//! Equations of state.
//!
//! Four tabulated families, each a pure function of `(rho, u)` (or, for
//! the barotropic family, of `rho` alone). No kernel-integral or
//! polynomial re-derivation is attempted here (Non-goal): the formulae
//! below are the textbook forms, selected and dispatched through the
//! same tagged-variant + narrow-trait recipe as [`crate::kernel`].

use enum_dispatch::enum_dispatch;

/// Operations every equation of state must implement.
#[enum_dispatch]
pub trait EosOps {
    /// Pressure as a function of density and specific internal energy.
    fn pressure(&self, rho: f64, u: f64) -> f64;

    /// Sound speed as a function of density and specific internal energy.
    fn sound_speed(&self, rho: f64, u: f64) -> f64;

    /// Temperature as a function of density and specific internal energy.
    fn temperature(&self, rho: f64, u: f64) -> f64;
}

/// Isothermal equation of state: constant sound speed, `P = cs^2 rho`.
#[derive(Debug, Clone, Copy)]
pub struct Isothermal {
    /// Fixed isothermal sound speed.
    pub cs: f64,
    /// Mean molecular weight, used only to back out a temperature.
    pub mu_bar: f64,
}

impl EosOps for Isothermal {
    fn pressure(&self, rho: f64, _u: f64) -> f64 {
        self.cs * self.cs * rho
    }

    fn sound_speed(&self, _rho: f64, _u: f64) -> f64 {
        self.cs
    }

    fn temperature(&self, _rho: f64, _u: f64) -> f64 {
        self.cs * self.cs * self.mu_bar
    }
}

/// Adiabatic (ideal-gas) equation of state, `P = (gamma - 1) rho u`.
#[derive(Debug, Clone, Copy)]
pub struct Adiabatic {
    /// Adiabatic index.
    pub gamma: f64,
    /// Mean molecular weight.
    pub mu_bar: f64,
}

impl EosOps for Adiabatic {
    fn pressure(&self, rho: f64, u: f64) -> f64 {
        (self.gamma - 1.0) * rho * u
    }

    fn sound_speed(&self, rho: f64, u: f64) -> f64 {
        (self.gamma * self.pressure(rho, u) / rho).sqrt()
    }

    fn temperature(&self, _rho: f64, u: f64) -> f64 {
        (self.gamma - 1.0) * u * self.mu_bar
    }
}

/// Barotropic equation of state: pressure is a prescribed function of
/// density alone, transitioning from isothermal to adiabatic above a
/// critical density (the standard star-formation closure).
#[derive(Debug, Clone, Copy)]
pub struct Barotropic {
    /// Isothermal sound speed at low density.
    pub cs0: f64,
    /// Critical density above which the gas stiffens adiabatically.
    pub rho_crit: f64,
    /// Adiabatic index used above `rho_crit`.
    pub gamma: f64,
    /// Mean molecular weight.
    pub mu_bar: f64,
}

impl Barotropic {
    fn cs2(&self, rho: f64) -> f64 {
        if rho <= self.rho_crit {
            self.cs0 * self.cs0
        } else {
            self.cs0 * self.cs0 * (rho / self.rho_crit).powf(self.gamma - 1.0)
        }
    }
}

impl EosOps for Barotropic {
    fn pressure(&self, rho: f64, _u: f64) -> f64 {
        self.cs2(rho) * rho
    }

    fn sound_speed(&self, rho: f64, _u: f64) -> f64 {
        self.cs2(rho).sqrt()
    }

    fn temperature(&self, rho: f64, _u: f64) -> f64 {
        self.cs2(rho) * self.mu_bar
    }
}

/// Ionising equation of state: an adiabatic gas with a temperature
/// floor imposed once a region is flagged as ionised (by the external
/// [`crate::radiation::RadiationField`] collaborator).
#[derive(Debug, Clone, Copy)]
pub struct Ionising {
    /// Adiabatic index of the neutral gas.
    pub gamma: f64,
    /// Mean molecular weight of the neutral gas.
    pub mu_bar: f64,
    /// Temperature floor imposed in ionised regions.
    pub temp0: f64,
    /// Mean molecular weight of the ionised gas.
    pub mu_ion: f64,
    /// Whether this particle currently sits in an ionised region.
    pub ionised: bool,
}

impl EosOps for Ionising {
    fn pressure(&self, rho: f64, u: f64) -> f64 {
        if self.ionised {
            rho * self.temp0 / self.mu_ion
        } else {
            (self.gamma - 1.0) * rho * u
        }
    }

    fn sound_speed(&self, rho: f64, u: f64) -> f64 {
        (self.gamma * self.pressure(rho, u) / rho).sqrt()
    }

    fn temperature(&self, rho: f64, u: f64) -> f64 {
        if self.ionised {
            self.temp0
        } else {
            (self.gamma - 1.0) * u * self.mu_bar
        }
    }
}

/// Tagged union of all supported equation-of-state flavours.
#[enum_dispatch(EosOps)]
#[derive(Debug, Clone, Copy)]
pub enum EosKind {
    /// Isothermal gas.
    Isothermal,
    /// Adiabatic (ideal) gas.
    Adiabatic,
    /// Barotropic star-formation closure.
    Barotropic,
    /// Ionising radiation closure.
    Ionising,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn isothermal_pressure_scales_linearly_with_density() {
        use float_cmp::assert_approx_eq;

        let eos = Isothermal { cs: 2.0, mu_bar: 1.0 };
        assert_approx_eq!(f64, eos.pressure(1.0, 0.0), 4.0, ulps = 2);
        assert_approx_eq!(f64, eos.pressure(2.0, 0.0), 8.0, ulps = 2);
        assert_approx_eq!(f64, eos.sound_speed(5.0, 0.0), 2.0, ulps = 2);
    }

    #[test]
    fn adiabatic_sound_speed_matches_ideal_gas_formula() {
        use float_cmp::assert_approx_eq;

        let eos = Adiabatic { gamma: 5.0 / 3.0, mu_bar: 1.0 };
        let rho = 1.0;
        let u = 1.0;
        let p = eos.pressure(rho, u);
        let expected_cs = (eos.gamma * p / rho).sqrt();
        assert_approx_eq!(f64, eos.sound_speed(rho, u), expected_cs, ulps = 2);
    }

    #[test]
    fn barotropic_is_continuous_at_critical_density() {
        let eos = Barotropic {
            cs0: 1.0,
            rho_crit: 1.0,
            gamma: 5.0 / 3.0,
            mu_bar: 1.0,
        };
        let below = eos.sound_speed(0.999, 0.0);
        let above = eos.sound_speed(1.001, 0.0);
        assert!((below - above).abs() < 1e-2);
    }

    #[test]
    fn ionising_switches_closure_on_flag() {
        let mut eos = Ionising {
            gamma: 5.0 / 3.0,
            mu_bar: 1.0,
            temp0: 10000.0,
            mu_ion: 0.6,
            ionised: false,
        };
        let neutral_t = eos.temperature(1.0, 1.0);
        eos.ionised = true;
        assert!((eos.temperature(1.0, 1.0) - 10000.0).abs() < 1e-9);
        assert!(neutral_t < 10000.0);
    }
}
