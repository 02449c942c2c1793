//! Key/value parameter store mirroring the external CLI/parameter
//! loader's `intparams`/`floatparams`/`stringparams` tables.
//!
//! The actual parameter *loader* (parsing a parameter file, command
//! line flags, and so on) is out of scope for the physics core; this
//! module only models its output: a validated, typed key/value map the
//! rest of the crate consumes.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Recognised values for the `gas_eos` parameter.
pub const GAS_EOS_VALUES: &[&str] = &["energy_eqn", "isothermal", "barotropic", "barotropic2", "constant_temp"];
/// Recognised values for the `radiation` parameter.
pub const RADIATION_VALUES: &[&str] = &["none", "ionisation"];
/// Recognised values for boundary-mode parameters.
pub const BOUNDARY_VALUES: &[&str] = &["open", "periodic", "mirror", "wall"];
/// Recognised values for the `sink_radius_mode` parameter.
pub const SINK_RADIUS_MODE_VALUES: &[&str] = &["fixed", "hmult", "density"];
/// Recognised values for the `external_potential` parameter.
pub const EXTERNAL_POTENTIAL_VALUES: &[&str] = &["none", "plummer", "vertical"];
/// Recognised values for the `nbody` parameter.
pub const NBODY_VALUES: &[&str] = &["lfkdk", "lfdkd", "hermite4", "hermite4ts", "hermite6ts"];

/// Validated key/value parameter set.
///
/// Three maps, one per value type, matching the external parameter
/// loader's own split. Lookups return `None` rather than panicking;
/// callers that require a parameter use [`Params::get_int`] and friends
/// and propagate [`Error::ParameterInvalid`] on a missing key.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Params {
    intparams: FxHashMap<String, i64>,
    floatparams: FxHashMap<String, f64>,
    stringparams: FxHashMap<String, String>,
}

impl Params {
    /// Constructs an empty parameter set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets an integer parameter.
    pub fn set_int(&mut self, key: impl Into<String>, value: i64) {
        self.intparams.insert(key.into(), value);
    }

    /// Sets a float parameter.
    pub fn set_float(&mut self, key: impl Into<String>, value: f64) {
        self.floatparams.insert(key.into(), value);
    }

    /// Sets a string parameter.
    pub fn set_string(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.stringparams.insert(key.into(), value.into());
    }

    /// Returns an integer parameter, or `Err` if it is missing.
    pub fn get_int(&self, key: &str) -> Result<i64> {
        self.intparams
            .get(key)
            .copied()
            .ok_or_else(|| Error::ParameterInvalid(key.to_string()))
    }

    /// Returns an integer parameter, falling back to `default` if missing.
    #[must_use]
    pub fn get_int_or(&self, key: &str, default: i64) -> i64 {
        self.intparams.get(key).copied().unwrap_or(default)
    }

    /// Returns a float parameter, or `Err` if it is missing.
    pub fn get_float(&self, key: &str) -> Result<f64> {
        self.floatparams
            .get(key)
            .copied()
            .ok_or_else(|| Error::ParameterInvalid(key.to_string()))
    }

    /// Returns a float parameter, falling back to `default` if missing.
    #[must_use]
    pub fn get_float_or(&self, key: &str, default: f64) -> f64 {
        self.floatparams.get(key).copied().unwrap_or(default)
    }

    /// Returns a string parameter, or `Err` if it is missing.
    pub fn get_string(&self, key: &str) -> Result<&str> {
        self.stringparams
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| Error::ParameterInvalid(key.to_string()))
    }

    /// Returns a string parameter, falling back to `default` if missing.
    #[must_use]
    pub fn get_string_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.stringparams.get(key).map_or(default, String::as_str)
    }

    /// Validates recognised-but-malformed values.
    ///
    /// Unknown keys are never an error (the loader may carry keys this
    /// core does not consume); only *recognised* keys with values
    /// outside their documented set or range raise
    /// [`Error::ParameterInvalid`].
    pub fn validate(&self) -> Result<()> {
        self.validate_enum("gas_eos", GAS_EOS_VALUES)?;
        self.validate_enum("radiation", RADIATION_VALUES)?;
        self.validate_enum("sink_radius_mode", SINK_RADIUS_MODE_VALUES)?;
        self.validate_enum("external_potential", EXTERNAL_POTENTIAL_VALUES)?;
        self.validate_enum("nbody", NBODY_VALUES)?;
        for key in [
            "x_boundary_lhs",
            "x_boundary_rhs",
            "y_boundary_lhs",
            "y_boundary_rhs",
            "z_boundary_lhs",
            "z_boundary_rhs",
        ] {
            self.validate_enum(key, BOUNDARY_VALUES)?;
        }

        if let Some(&nsph) = self.intparams.get("Nsphmax") {
            if nsph < 0 {
                return Err(Error::ParameterInvalid("Nsphmax must be non-negative".to_string()));
            }
        }
        if let Some(&ndim) = self.intparams.get("ndim") {
            if !(1..=3).contains(&ndim) {
                return Err(Error::ParameterInvalid("ndim must be 1, 2 or 3".to_string()));
            }
        }
        Ok(())
    }

    fn validate_enum(&self, key: &str, allowed: &[&str]) -> Result<()> {
        if let Some(value) = self.stringparams.get(key) {
            if !allowed.contains(&value.as_str()) {
                return Err(Error::ParameterInvalid(format!(
                    "{key}=`{value}` is not one of {allowed:?}"
                )));
            }
        }
        Ok(())
    }
}
