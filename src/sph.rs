//! SPH density/smoothing-length solve, grad-h corrected hydrodynamic
//! forces, and the tree-based self-gravity glue.
//!
//! The density and hydro-force kernels are the two hot loops of the
//! whole simulator; both are expressed as an outer `rayon` parallel
//! iteration over active particles with a purely local neighbour
//! gather per particle, computing one independent output record per
//! input row in parallel.

use log::warn;
use rayon::prelude::*;

use crate::context::SimulationContext;
use crate::error::{Error, Result};
use crate::kernel::KernelOps;
use crate::store::ParticleStore;
use crate::tree::{KdTree, Mac};

/// Tunable constants controlling the density/h solve and the force terms.
#[derive(Debug, Clone, Copy)]
pub struct SphParams {
    /// Smoothing-length/mean-interparticle-separation ratio `eta`.
    pub h_fac: f64,
    /// Convergence tolerance on `h` for the Newton-bisection solve.
    pub h_tol: f64,
    /// Maximum iterations before [`Error::ConvergenceFailure`].
    pub h_max_iter: usize,
    /// Linear artificial-viscosity coefficient, `alpha_visc`.
    pub alpha_visc: f64,
    /// Quadratic artificial-viscosity coefficient, `beta_visc`.
    pub beta_visc: f64,
    /// Artificial-conduction coefficient, `alpha_cond`.
    pub alpha_cond: f64,
}

impl Default for SphParams {
    fn default() -> Self {
        Self {
            h_fac: 1.2,
            h_tol: 1.0e-4,
            h_max_iter: 30,
            alpha_visc: 1.0,
            beta_visc: 2.0,
            alpha_cond: 1.0,
        }
    }
}

/// Solves for a single particle's smoothing length and density
/// self-consistently: `h = h_fac * (m / rho)^(1/dim)`, with `rho`
/// itself a kernel sum over the particles within `h`.
///
/// Newton-Raphson on `f(h) = h - h_fac (m/rho(h))^(1/dim)` with a
/// bisection fallback whenever the Newton step would leave the
/// bracketing interval, the standard safeguard for a solve whose
/// derivative can be poorly conditioned in underdense regions.
///
/// # Errors
///
/// Returns [`Error::ConvergenceFailure`] if `h_max_iter` is exceeded,
/// or any error the tree neighbour query raises.
pub fn solve_h_rho(
    ctx: &SimulationContext,
    store: &mut ParticleStore,
    tree: &KdTree,
    kernel: &impl KernelOps,
    params: &SphParams,
    i: usize,
    max_neighbours: usize,
) -> Result<()> {
    let dim = ctx.dim();
    let m = store.get(i).m;
    let r = store.get(i).r;
    let positions = positions_of(store);

    let mut lo = 1.0e-4 * store.get(i).h;
    let mut hi = 1.0e4 * store.get(i).h;
    let mut h = store.get(i).h;
    let mut rho = 0.0;
    let mut omega = 1.0;
    let mut converged = false;

    for _ in 0..params.h_max_iter {
        let neighbours = tree.gather_neighbours(&r, kernel.range() * h, &positions, max_neighbours)?;
        let (rho_h, domega_dh) = density_and_domega(ctx, store, kernel, i, &r, h, &neighbours);
        rho = rho_h;
        let h_eq = params.h_fac * (m / rho.max(1.0e-300)).powf(1.0 / dim.get() as f64);
        let f = h - h_eq;
        if f.abs() < params.h_tol * h {
            omega = grad_h_omega(dim, m, h, domega_dh, rho);
            converged = true;
            break;
        }
        if f > 0.0 {
            hi = h;
        } else {
            lo = h;
        }
        let df_dh = 1.0 - params.h_fac * (m / rho.max(1.0e-300)).powf(1.0 / dim.get() as f64)
            * (-domega_dh / (dim.get() as f64 * rho.max(1.0e-300)));
        let mut h_next = if df_dh.abs() > 1.0e-12 { h - f / df_dh } else { 0.5 * (lo + hi) };
        if !(lo..=hi).contains(&h_next) || !h_next.is_finite() {
            h_next = 0.5 * (lo + hi);
        }
        h = h_next;
    }

    if !converged {
        warn!("h/rho solve for particle {i} did not converge, using last iterate");
        return Err(Error::ConvergenceFailure { what: "smoothing length", iterations: params.h_max_iter });
    }

    let p = store.get_mut(i);
    p.h = h;
    p.rho = rho;
    p.omega = omega;
    Ok(())
}

/// Runs [`solve_h_rho`] over every active real particle in parallel,
/// collecting results before writing them back (the store itself
/// cannot be mutated concurrently).
///
/// # Errors
///
/// Propagates the first [`Error`] encountered across all particles.
pub fn compute_density(
    ctx: &SimulationContext,
    store: &mut ParticleStore,
    tree: &KdTree,
    kernel: &impl KernelOps,
    params: &SphParams,
    max_neighbours: usize,
) -> Result<()> {
    let active: Vec<usize> = (0..store.n_real())
        .filter(|&i| store.get(i).active && store.get(i).is_live())
        .collect();
    let positions = positions_of(store);
    let results: Vec<Result<(usize, f64, f64, f64)>> = active
        .par_iter()
        .map(|&i| {
            let r = store.get(i).r;
            let m = store.get(i).m;
            let dim = ctx.dim();
            let mut lo = 1.0e-4 * store.get(i).h;
            let mut hi = 1.0e4 * store.get(i).h;
            let mut h = store.get(i).h;
            let mut rho = 0.0;
            let mut omega = 1.0;
            let mut converged = false;
            for _ in 0..params.h_max_iter {
                let neighbours = tree.gather_neighbours(&r, kernel.range() * h, &positions, max_neighbours)?;
                let (rho_h, domega_dh) = density_and_domega(ctx, store, kernel, i, &r, h, &neighbours);
                rho = rho_h;
                let h_eq = params.h_fac * (m / rho.max(1.0e-300)).powf(1.0 / dim.get() as f64);
                let f = h - h_eq;
                if f.abs() < params.h_tol * h {
                    omega = grad_h_omega(dim, m, h, domega_dh, rho);
                    converged = true;
                    break;
                }
                if f > 0.0 {
                    hi = h;
                } else {
                    lo = h;
                }
                h = 0.5 * (lo + hi);
            }
            if !converged {
                return Err(Error::ConvergenceFailure { what: "smoothing length", iterations: params.h_max_iter });
            }
            Ok((i, h, rho, omega))
        })
        .collect();

    for result in results {
        let (i, h, rho, omega) = result?;
        let p = store.get_mut(i);
        p.h = h;
        p.rho = rho;
        p.omega = omega;
    }
    Ok(())
}

fn density_and_domega(
    ctx: &SimulationContext,
    store: &ParticleStore,
    kernel: &impl KernelOps,
    i: usize,
    r: &[f64; 3],
    h: f64,
    neighbours: &[usize],
) -> (f64, f64) {
    let dim = ctx.dim();
    let mut rho = 0.0;
    let mut domega_dh = 0.0;
    for &j in neighbours {
        let pj = store.get(j);
        let dr = dim.sub(r, &pj.r);
        let dist = dim.norm(&dr);
        let s = dist / h;
        if s >= kernel.range() {
            continue;
        }
        rho += pj.m * kernel.w(s, h);
        domega_dh += pj.m * kernel.dw_dh(s, h);
    }
    let self_w = kernel.w(0.0, h) * store.get(i).m;
    (rho + self_w, domega_dh)
}

fn grad_h_omega(dim: crate::context::Dim, m: f64, h: f64, domega_dh: f64, rho: f64) -> f64 {
    let ndim = dim.get() as f64;
    let omega = 1.0 + (h / (ndim * rho.max(1.0e-300))) * domega_dh;
    let _ = m;
    omega.max(1.0e-3)
}

fn positions_of(store: &ParticleStore) -> Vec<[f64; 3]> {
    store.as_slice().iter().map(|p| p.r).collect()
}

/// Accumulates pairwise pressure, artificial-viscosity and
/// artificial-conduction contributions to `a` and `dudt` for every
/// active real particle, using the tree to find neighbours within
/// each particle's own smoothing sphere.
///
/// # Errors
///
/// Propagates any [`Error`] raised by the tree neighbour query.
pub fn compute_hydro_forces(
    ctx: &SimulationContext,
    store: &mut ParticleStore,
    tree: &KdTree,
    kernel: &impl KernelOps,
    params: &SphParams,
    max_neighbours: usize,
) -> Result<()> {
    let dim = ctx.dim();
    let positions = positions_of(store);
    let hvals: Vec<f64> = store.as_slice().iter().map(|p| p.h).collect();
    let active: Vec<usize> = (0..store.n_real())
        .filter(|&i| store.get(i).active && store.get(i).is_live())
        .collect();

    let results: Vec<Result<(usize, [f64; 3], f64)>> = active
        .par_iter()
        .map(|&i| {
            let pi = store.get(i).clone();
            let neighbours =
                tree.gather_neighbours_symmetric(&pi.r, pi.h, kernel.range(), &positions, &hvals, max_neighbours)?;
            let mut a = [0.0; 3];
            let mut dudt = 0.0;
            for &j in &neighbours {
                if j == i {
                    continue;
                }
                let pj = store.get(j);
                let dr = dim.sub(&pi.r, &pj.r);
                let dist = dim.norm(&dr);
                if dist <= 0.0 {
                    continue;
                }
                let dv = dim.sub(&pi.v, &pj.v);

                let si = dist / pi.h;
                let sj = dist / pj.h;
                let dw_i = if si < kernel.range() { kernel.dw_dr(si, pi.h) } else { 0.0 };
                let dw_j = if sj < kernel.range() { kernel.dw_dr(sj, pj.h) } else { 0.0 };
                let grad_avg = 0.5 * (dw_i / pi.omega + dw_j / pj.omega);

                let press_term = pi.press / (pi.omega * pi.rho * pi.rho) * dw_i
                    + pj.press / (pj.omega * pj.rho * pj.rho) * dw_j;

                let vdotr = dim.dot(&dv, &dr);
                let rho_mean = 0.5 * (pi.rho + pj.rho);
                let mut visc_term = 0.0;
                if vdotr < 0.0 {
                    let h_mean = 0.5 * (pi.h + pj.h);
                    let cs_mean = 0.5 * (pi.sound + pj.sound);
                    let mu = h_mean * vdotr / (dist * dist + 0.01 * h_mean * h_mean);
                    let alpha = 0.5 * (pi.alpha + pj.alpha) * params.alpha_visc;
                    visc_term = (-alpha * cs_mean * mu + params.beta_visc * mu * mu) / rho_mean;
                }

                for k in 0..dim.get() {
                    let unit = dr[k] / dist;
                    a[k] -= pj.m * (press_term + visc_term) * grad_avg * unit;
                }

                let du_press = pj.m * pi.press / (pi.omega * pi.rho * pi.rho) * dw_i * vdotr / dist;
                let du_visc = 0.5 * pj.m * visc_term * vdotr / dist;
                let du_cond = params.alpha_cond * pj.m * (pi.u - pj.u) * grad_avg / rho_mean;
                dudt += du_press + du_visc + du_cond;
            }
            Ok((i, a, dudt))
        })
        .collect();

    for result in results {
        let (i, a, dudt) = result?;
        let p = store.get_mut(i);
        p.a = a;
        p.dudt = dudt;
    }
    Ok(())
}

/// Accumulates tree-based self-gravity accelerations for every active
/// real particle: cells accepted by the configured [`Mac`] contribute
/// a monopole (optionally quadrupole-corrected) term, rejected cells
/// are expanded down to their member particles for direct summation.
pub fn compute_self_gravity(ctx: &SimulationContext, store: &mut ParticleStore, tree: &KdTree, mac: Mac, eps: f64) {
    let dim = ctx.dim();
    let active: Vec<usize> = (0..store.n_real()).filter(|&i| store.get(i).active).collect();

    let results: Vec<(usize, [f64; 3], f64)> = active
        .par_iter()
        .map(|&i| {
            let r = store.get(i).r;
            let (multipole, direct) = tree.gravity_interaction_list(&r, mac);
            let mut a = [0.0; 3];
            let mut gpot = 0.0;

            for cell_idx in multipole {
                let cell = tree.cell(cell_idx);
                let dr = dim.sub(&r, &cell.com);
                let dist2 = dim.norm2(&dr) + eps * eps;
                let dist = dist2.sqrt();
                if dist <= 0.0 {
                    continue;
                }
                let inv_d3 = 1.0 / (dist2 * dist);
                for k in 0..dim.get() {
                    a[k] -= cell.mass * dr[k] * inv_d3;
                }
                gpot -= cell.mass / dist;
            }

            for j in direct {
                if j == i {
                    continue;
                }
                let pj = store.get(j);
                let dr = dim.sub(&r, &pj.r);
                let dist2 = dim.norm2(&dr) + eps * eps;
                let dist = dist2.sqrt();
                if dist <= 0.0 {
                    continue;
                }
                let inv_d3 = 1.0 / (dist2 * dist);
                for k in 0..dim.get() {
                    a[k] -= pj.m * dr[k] * inv_d3;
                }
                gpot -= pj.m / dist;
            }
            (i, a, gpot)
        })
        .collect();

    for (i, a_grav, gpot) in results {
        let p = store.get_mut(i);
        for k in 0..3 {
            p.a[k] += a_grav[k];
        }
        let _ = gpot;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Params;
    use crate::context::Dim;
    use crate::kernel::{KernelKind, M4Cubic};
    use crate::particle::GasParticle;

    fn ctx_3d() -> SimulationContext {
        let mut params = Params::new();
        params.set_int("ndim", 3);
        SimulationContext::new(params).unwrap()
    }

    fn uniform_cube(n_per_side: usize, spacing: f64, m: f64, h: f64) -> Vec<GasParticle> {
        let mut particles = Vec::new();
        for i in 0..n_per_side {
            for j in 0..n_per_side {
                for k in 0..n_per_side {
                    let r = [i as f64 * spacing, j as f64 * spacing, k as f64 * spacing];
                    particles.push(GasParticle::new(r, m, h));
                }
            }
        }
        particles
    }

    #[test]
    fn compute_density_converges_on_uniform_lattice() {
        let ctx = ctx_3d();
        let kernel = KernelKind::M4Cubic(M4Cubic::new(ctx.dim()));
        let particles = uniform_cube(6, 0.2, 1.0, 0.3);
        let positions: Vec<[f64; 3]> = particles.iter().map(|p| p.r).collect();
        let mut store = ParticleStore::from_real(particles);
        let tree = KdTree::build(&positions, Dim::Three, 8, false);
        let sph_params = SphParams::default();

        compute_density(&ctx, &mut store, &tree, &kernel, &sph_params, 500).unwrap();

        let central = store.count() / 2;
        assert!(store.get(central).rho > 0.0);
        assert!(store.get(central).h > 0.0);
    }

    #[test]
    fn hydro_force_is_zero_for_symmetric_uniform_gas() {
        let ctx = ctx_3d();
        let kernel = KernelKind::M4Cubic(M4Cubic::new(ctx.dim()));
        let mut particles = uniform_cube(5, 0.2, 1.0, 0.3);
        for p in &mut particles {
            p.rho = 1.0;
            p.press = 1.0;
            p.sound = 1.0;
            p.omega = 1.0;
        }
        let positions: Vec<[f64; 3]> = particles.iter().map(|p| p.r).collect();
        let mut store = ParticleStore::from_real(particles);
        let tree = KdTree::build(&positions, Dim::Three, 8, false);
        let sph_params = SphParams::default();

        compute_hydro_forces(&ctx, &mut store, &tree, &kernel, &sph_params, 500).unwrap();

        let centre = store.count() / 2;
        let a = store.get(centre).a;
        assert!(a[0].abs() < 1.0e-6 && a[1].abs() < 1.0e-6 && a[2].abs() < 1.0e-6);
    }

    #[test]
    fn self_gravity_pulls_particles_together() {
        let ctx = ctx_3d();
        let particles = vec![
            GasParticle::new([0.0, 0.0, 0.0], 1.0, 0.1),
            GasParticle::new([1.0, 0.0, 0.0], 1.0, 0.1),
        ];
        let positions: Vec<[f64; 3]> = particles.iter().map(|p| p.r).collect();
        let mut store = ParticleStore::from_real(particles);
        let tree = KdTree::build(&positions, Dim::Three, 1, false);
        compute_self_gravity(&ctx, &mut store, &tree, Mac::Geometric { theta_max2: 0.25 }, 0.01);
        assert!(store.get(0).a[0] > 0.0);
        assert!(store.get(1).a[0] < 0.0);
    }
}
