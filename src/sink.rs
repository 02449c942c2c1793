//! Sink particles: creation of point masses from collapsing dense gas,
//! and the smoothed accretion of nearby gas onto existing sinks.

use log::info;

use crate::context::SimulationContext;
use crate::particle::{ParticleType, Sink, StarParticle};
use crate::store::ParticleStore;
use crate::tree::KdTree;

/// Tunables controlling sink creation and accretion.
#[derive(Debug, Clone, Copy)]
pub struct SinkParams {
    /// Density above which a gas particle is eligible to seed a sink.
    pub rho_sink: f64,
    /// Accretion radius assigned to newly created sinks.
    pub r_sink: f64,
    /// Fraction of eligible mass accreted per call to [`accrete`].
    pub smooth_accretion_fraction: f64,
    /// Cap on sinks created per call, a crude proxy for the original's
    /// "only one sink per collapsing clump per step" rule.
    pub max_new_sinks: usize,
}

impl Default for SinkParams {
    fn default() -> Self {
        Self {
            rho_sink: 1.0e3,
            r_sink: 0.01,
            smooth_accretion_fraction: 0.5,
            max_new_sinks: 16,
        }
    }
}

/// Scans for live gas particles above `rho_sink` that are not already
/// within another sink's accretion radius, and turns the densest such
/// particle in each disjoint cluster into a new sink (keeping the
/// corresponding [`StarParticle`] in `stars` and marking the seeding
/// gas particle `SinkAccreted`).
///
/// Candidate clustering uses the tree's neighbour gather rather than a
/// fresh spatial structure, since the tree was already rebuilt this
/// step for the density/force solve.
pub fn create_sinks(
    ctx: &SimulationContext,
    store: &mut ParticleStore,
    tree: &KdTree,
    stars: &mut Vec<StarParticle>,
    sinks: &mut Vec<Sink>,
    params: &SinkParams,
) {
    let positions: Vec<[f64; 3]> = store.as_slice().iter().map(|p| p.r).collect();
    let mut claimed = vec![false; store.count()];
    for sink in sinks.iter() {
        if let Ok(nearby) = tree.gather_neighbours(&stars[sink.star].r, sink.r_sink, &positions, usize::MAX) {
            for j in nearby {
                claimed[j] = true;
            }
        }
    }

    let mut candidates: Vec<usize> = (0..store.n_real())
        .filter(|&i| !claimed[i] && store.get(i).is_live() && store.get(i).rho > params.rho_sink)
        .collect();
    candidates.sort_by(|&a, &b| store.get(b).rho.partial_cmp(&store.get(a).rho).unwrap());

    let mut created = 0;
    for i in candidates {
        if created >= params.max_new_sinks || claimed[i] {
            continue;
        }
        let p = store.get(i).clone();
        let star = StarParticle::new(p.r, p.v, p.m, params.r_sink);
        stars.push(star);
        let star_idx = stars.len() - 1;
        sinks.push(Sink::new(star_idx, params.r_sink, params.smooth_accretion_fraction));
        store.get_mut(i).ptype = ParticleType::SinkAccreted;

        if let Ok(nearby) = tree.gather_neighbours(&p.r, params.r_sink, &positions, usize::MAX) {
            for j in nearby {
                claimed[j] = true;
            }
        }
        created += 1;
        info!("created sink {star_idx} from particle {i} at density {}", p.rho);
    }
}

/// Transfers a `smooth_accretion_fraction` share of the mass of every
/// live gas particle within each sink's `r_sink` onto the sink's star,
/// marking fully-consumed particles `SinkAccreted`. Momentum is
/// conserved by folding the accreted particle's momentum into the
/// sink's velocity.
pub fn accrete(store: &mut ParticleStore, tree: &KdTree, stars: &mut [StarParticle], sinks: &mut [Sink]) {
    let positions: Vec<[f64; 3]> = store.as_slice().iter().map(|p| p.r).collect();
    for sink in sinks.iter_mut() {
        let Ok(nearby) = tree.gather_neighbours(&stars[sink.star].r, sink.r_sink, &positions, usize::MAX) else {
            continue;
        };
        for j in nearby {
            if !store.get(j).is_live() {
                continue;
            }
            let gas = store.get(j).clone();
            let dm = gas.m * sink.smooth_accretion_fraction;
            let star = &mut stars[sink.star];
            let new_mass = star.m + dm;
            for k in 0..3 {
                star.v[k] = (star.m * star.v[k] + dm * gas.v[k]) / new_mass;
            }
            star.m = new_mass;
            sink.mass_flux += dm;

            let remaining = gas.m - dm;
            if remaining <= 1.0e-12 * gas.m {
                store.get_mut(j).ptype = ParticleType::SinkAccreted;
                sink.accreted.push(j);
            } else {
                store.get_mut(j).m = remaining;
            }
        }
    }
}
