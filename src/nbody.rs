//! Direct-summation N-body integrator.
//!
//! Fourth-order Hermite predictor-evaluator-corrector scheme with an
//! Aarseth individual-timestep criterion. Every star (or system node,
//! via [`crate::particle::NBodyRef`]) is force-summed directly against
//! every other active body; the population this module integrates is
//! always small enough that `O(N^2)` is the right trade, matching the
//! spec's explicit choice of direct summation over a tree for the
//! N-body half of the simulator.

use rayon::prelude::*;

use crate::context::SimulationContext;
use crate::error::{Error, Result};
use crate::particle::StarParticle;

/// Tunables for the Hermite integrator and its timestep criterion.
#[derive(Debug, Clone, Copy)]
pub struct NbodyParams {
    /// Aarseth timestep safety factor `eta`.
    pub eta: f64,
    /// Gravitational softening length.
    pub eps: f64,
    /// Floor below which a computed timestep is an error, not a retry.
    pub dt_min: f64,
    /// Number of predictor-evaluator-corrector iterations per step.
    pub npec: usize,
}

impl Default for NbodyParams {
    fn default() -> Self {
        Self { eta: 0.01, eps: 1.0e-4, dt_min: 1.0e-12, npec: 2 }
    }
}

/// Direct-summation force, jerk (and, for the predictor step, their
/// time derivatives are built from finite differences of two
/// evaluations rather than analytic snap/crackle).
fn direct_force_and_jerk(
    ctx: &SimulationContext,
    stars: &[StarParticle],
    i: usize,
    eps: f64,
) -> ([f64; 3], [f64; 3]) {
    let dim = ctx.dim();
    let mut a = [0.0; 3];
    let mut adot = [0.0; 3];
    let si = &stars[i];
    for (j, sj) in stars.iter().enumerate() {
        if j == i || !sj.active {
            continue;
        }
        let dr = dim.sub(&si.r, &sj.r);
        let dv = dim.sub(&si.v, &sj.v);
        let dist2 = dim.norm2(&dr) + eps * eps;
        let dist = dist2.sqrt();
        let inv_d3 = 1.0 / (dist2 * dist);
        let inv_d5 = inv_d3 / dist2;
        let rv = dim.dot(&dr, &dv);
        for k in 0..dim.get() {
            a[k] -= sj.m * dr[k] * inv_d3;
            adot[k] -= sj.m * (dv[k] * inv_d3 - 3.0 * rv * dr[k] * inv_d5);
        }
    }
    (a, adot)
}

/// Evaluates force and jerk on every active star, writing `a`/`adot`
/// in place. Run in parallel since each star's force sum is read-only
/// with respect to every other star's current state.
pub fn evaluate_forces(ctx: &SimulationContext, stars: &mut [StarParticle], eps: f64) {
    let snapshot: Vec<StarParticle> = stars.to_vec();
    let updates: Vec<(usize, [f64; 3], [f64; 3])> = (0..stars.len())
        .into_par_iter()
        .filter(|&i| snapshot[i].active)
        .map(|i| {
            let (a, adot) = direct_force_and_jerk(ctx, &snapshot, i, eps);
            (i, a, adot)
        })
        .collect();
    for (i, a, adot) in updates {
        stars[i].a = a;
        stars[i].adot = adot;
    }
}

/// Aarseth individual timestep: `dt = eta * sqrt(|a| |a2dot| + |adot|^2) / (|adot| |a3dot| + |a2dot|^2)`.
///
/// # Errors
///
/// Returns [`Error::TimestepUnderflow`] if the computed step falls
/// below `dt_min`.
pub fn aarseth_timestep(ctx: &SimulationContext, star: &StarParticle, dt_min: f64) -> Result<f64> {
    let dim = ctx.dim();
    let a2 = dim.norm2(&star.a);
    let adot2 = dim.norm2(&star.adot);
    let a2dot2 = dim.norm2(&star.a2dot);
    let a3dot2 = dim.norm2(&star.a3dot);

    let numerator = a2.sqrt() * a2dot2.sqrt() + adot2;
    let denominator = adot2.sqrt() * a3dot2.sqrt() + a2dot2;
    let dt = if denominator > 0.0 {
        (numerator / denominator).sqrt()
    } else {
        f64::INFINITY
    };
    if dt < dt_min {
        return Err(Error::TimestepUnderflow { dt, floor: dt_min });
    }
    Ok(dt)
}

/// Predictor stage: extrapolates position and velocity to `t + dt`
/// using the fourth-order Taylor series in `a`, `adot`.
pub fn predict(star: &mut StarParticle, dt: f64) {
    for k in 0..3 {
        star.r_pred[k] = star.r[k]
            + star.v[k] * dt
            + 0.5 * star.a[k] * dt * dt
            + star.adot[k] * dt * dt * dt / 6.0;
        star.v_pred[k] = star.v[k] + star.a[k] * dt + 0.5 * star.adot[k] * dt * dt;
    }
}

/// Corrector stage: given the freshly evaluated force/jerk at the
/// predicted state (`a_new`, `adot_new`), reconstructs the third and
/// fourth derivatives from the standard Hermite finite-difference
/// formulae and applies the corrected update. `a0`/`adot0` are the
/// force/jerk committed at the *start* of the step, passed explicitly
/// rather than read from `star` so that repeated predictor-evaluator-
/// corrector iterations keep differencing against the same start-of-step
/// state instead of the previous iteration's already-corrected one.
#[allow(clippy::too_many_arguments)]
pub fn correct(star: &mut StarParticle, dt: f64, a0: [f64; 3], adot0: [f64; 3], a_new: [f64; 3], adot_new: [f64; 3]) {
    for k in 0..3 {
        let a2dot = -6.0 * (a0[k] - a_new[k]) / (dt * dt) - 2.0 * (2.0 * adot0[k] + adot_new[k]) / dt;
        let a3dot = 12.0 * (a0[k] - a_new[k]) / (dt * dt * dt) + 6.0 * (adot0[k] + adot_new[k]) / (dt * dt);

        star.r[k] = star.r_pred[k] + a2dot * dt.powi(4) / 24.0 + a3dot * dt.powi(5) / 120.0;
        star.v[k] = star.v_pred[k] + a2dot * dt.powi(3) / 6.0 + a3dot * dt.powi(4) / 24.0;
        star.a2dot[k] = a2dot;
        star.a3dot[k] = a3dot;
    }
    star.a = a_new;
    star.adot = adot_new;
}

/// Runs `npec` predict-evaluate-correct iterations for every active
/// star sharing the same timestep `dt`: the predictor runs once from
/// the committed start-of-step state, then each iteration re-evaluates
/// force/jerk at the latest corrected position and refines `r`/`v`
/// against the same fixed `a0`/`adot0`, converging the implicit Hermite
/// correction rather than accepting the first predicted force. Runs at
/// least one iteration even if `npec == 0`. Perturbers and subsystem
/// delegation are handled by [`crate::nntree`]; this function only
/// advances a flat population of independent bodies.
pub fn advance(ctx: &SimulationContext, stars: &mut [StarParticle], active: &[usize], dt: f64, eps: f64, npec: usize) {
    let npec = npec.max(1);
    let mut a0 = vec![[0.0; 3]; stars.len()];
    let mut adot0 = vec![[0.0; 3]; stars.len()];
    for &i in active {
        a0[i] = stars[i].a;
        adot0[i] = stars[i].adot;
        predict(&mut stars[i], dt);
        stars[i].r = stars[i].r_pred;
        stars[i].v = stars[i].v_pred;
    }

    for _ in 0..npec {
        let snapshot: Vec<StarParticle> = stars.to_vec();
        let updates: Vec<(usize, [f64; 3], [f64; 3])> = active
            .par_iter()
            .map(|&i| {
                let (a, adot) = direct_force_and_jerk(ctx, &snapshot, i, eps);
                (i, a, adot)
            })
            .collect();

        for (i, a_new, adot_new) in updates {
            let dt_i = stars[i].dt.max(dt);
            correct(&mut stars[i], dt_i, a0[i], adot0[i], a_new, adot_new);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Params;

    fn ctx_3d() -> SimulationContext {
        let mut params = Params::new();
        params.set_int("ndim", 3);
        SimulationContext::new(params).unwrap()
    }

    fn two_body_circular() -> Vec<StarParticle> {
        let m = 1.0;
        let r = 1.0;
        let v = (m / (4.0 * r)).sqrt();
        vec![
            StarParticle::new([r, 0.0, 0.0], [0.0, v, 0.0], m, 0.0),
            StarParticle::new([-r, 0.0, 0.0], [0.0, -v, 0.0], m, 0.0),
        ]
    }

    #[test]
    fn evaluate_forces_gives_equal_opposite_accelerations_for_equal_masses() {
        let ctx = ctx_3d();
        let mut stars = two_body_circular();
        evaluate_forces(&ctx, &mut stars, 1.0e-6);
        for k in 0..3 {
            assert!((stars[0].a[k] + stars[1].a[k]).abs() < 1.0e-9);
        }
    }

    #[test]
    fn aarseth_timestep_is_positive_and_finite_for_bound_orbit() {
        let ctx = ctx_3d();
        let mut stars = two_body_circular();
        evaluate_forces(&ctx, &mut stars, 1.0e-6);
        stars[0].adot = [0.01, 0.02, 0.0];
        stars[0].a2dot = [0.001, 0.0, 0.0];
        stars[0].a3dot = [0.0001, 0.0, 0.0];
        let dt = aarseth_timestep(&ctx, &stars[0], 1.0e-12).unwrap();
        assert!(dt > 0.0 && dt.is_finite());
    }

    #[test]
    fn aarseth_timestep_errors_below_floor() {
        let ctx = ctx_3d();
        let mut star = StarParticle::new([0.0; 3], [0.0; 3], 1.0, 0.0);
        star.a = [1.0, 0.0, 0.0];
        star.adot = [1.0e6, 0.0, 0.0];
        star.a2dot = [1.0e6, 0.0, 0.0];
        star.a3dot = [1.0e12, 0.0, 0.0];
        let result = aarseth_timestep(&ctx, &star, 1.0);
        assert!(matches!(result, Err(Error::TimestepUnderflow { .. })));
    }

    #[test]
    fn predict_then_correct_round_trips_constant_acceleration() {
        let mut star = StarParticle::new([0.0, 0.0, 0.0], [1.0, 0.0, 0.0], 1.0, 0.0);
        star.a = [0.0, -1.0, 0.0];
        let dt = 0.01;
        let a0 = star.a;
        let adot0 = star.adot;
        predict(&mut star, dt);
        let a_new = star.a;
        let adot_new = star.adot;
        correct(&mut star, dt, a0, adot0, a_new, adot_new);
        let expected_y = 0.5 * -1.0 * dt * dt;
        assert!((star.r[1] - expected_y).abs() < 1.0e-6);
    }

    #[test]
    fn advance_conserves_total_momentum_for_isolated_pair() {
        let ctx = ctx_3d();
        let mut stars = two_body_circular();
        evaluate_forces(&ctx, &mut stars, 1.0e-6);
        let active = vec![0, 1];
        for _ in 0..20 {
            advance(&ctx, &mut stars, &active, 1.0e-3, 1.0e-6, 2);
        }
        let mut p = [0.0; 3];
        for s in &stars {
            for k in 0..3 {
                p[k] += s.m * s.v[k];
            }
        }
        assert!(p[0].abs() < 1.0e-6 && p[1].abs() < 1.0e-6 && p[2].abs() < 1.0e-6);
    }

    #[test]
    fn more_pec_iterations_do_not_break_momentum_conservation() {
        let ctx = ctx_3d();
        let mut stars = two_body_circular();
        evaluate_forces(&ctx, &mut stars, 1.0e-6);
        let active = vec![0, 1];
        for _ in 0..20 {
            advance(&ctx, &mut stars, &active, 1.0e-3, 1.0e-6, 4);
        }
        let mut p = [0.0; 3];
        for s in &stars {
            for k in 0..3 {
                p[k] += s.m * s.v[k];
            }
        }
        assert!(p[0].abs() < 1.0e-6 && p[1].abs() < 1.0e-6 && p[2].abs() < 1.0e-6);
    }
}
