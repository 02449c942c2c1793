//! Agglomerative nearest-neighbour system tree.
//!
//! Construction is unconditional: repeatedly merges whichever pair of
//! free nodes are each other's nearest neighbour into a new system
//! node, stopping only when a single free node remains (`2N-1` nodes
//! total for `N` starting bodies). A separate pass, [`build_subsystems`],
//! then decides which of those merged nodes are declared bound
//! subsystems worth tracking, and which should be flushed back into
//! their two component roots: a node survives only while its internal
//! binding energy dominates the energy it owes to the rest of the
//! population, and its component count stays within `ncompmax`.
//! [`collect_perturbers`] gathers the nearby bodies a declared
//! subsystem's internal integrator needs to account for tidally.

use std::collections::HashMap;

use crate::context::SimulationContext;
use crate::particle::{NBodyRef, StarKind, StarParticle};

/// Orbital elements recorded for a declared two-body subsystem at the
/// moment it is accepted (never recomputed for higher-`ncomp` nodes,
/// which have no single well-defined two-body orbit).
#[derive(Debug, Clone, Copy)]
pub struct Binary {
    /// The two components that were merged.
    pub components: [NBodyRef; 2],
    /// Semi-major axis of the relative orbit.
    pub semimajor_axis: f64,
    /// Orbital eccentricity.
    pub eccentricity: f64,
    /// Orbital period (infinite if the orbit is unbound).
    pub period: f64,
}

/// Combined star and system-node population. Every [`NBodyRef`] in
/// this crate indexes into exactly one of these two arrays.
#[derive(Debug, Clone, Default)]
pub struct NBodyPopulation {
    /// Single-star array.
    pub stars: Vec<StarParticle>,
    /// System (subsystem) node array; each entry's `children` names
    /// the two components it was built from.
    pub systems: Vec<StarParticle>,
}

impl NBodyPopulation {
    /// Returns the particle a reference points at.
    #[must_use]
    pub fn get(&self, r: NBodyRef) -> &StarParticle {
        match r {
            NBodyRef::Star(i) => &self.stars[i],
            NBodyRef::System(i) => &self.systems[i],
        }
    }

    /// Returns a mutable reference to the particle a reference points at.
    pub fn get_mut(&mut self, r: NBodyRef) -> &mut StarParticle {
        match r {
            NBodyRef::Star(i) => &mut self.stars[i],
            NBodyRef::System(i) => &mut self.systems[i],
        }
    }
}

/// Tunables for the `BuildSubSystems` acceptance test.
#[derive(Debug, Clone, Copy)]
pub struct SubsystemParams {
    /// Maximum fraction of a node's total binding energy that may come
    /// from outside the node for it still to be declared a subsystem.
    pub gpefrac: f64,
    /// Maximum component count a declared subsystem may hold; larger
    /// merges are flushed back to their two components.
    pub ncompmax: usize,
    /// Multiplier on a subsystem's characteristic radius defining the
    /// perturber search range.
    pub r_pert_factor: f64,
}

impl Default for SubsystemParams {
    fn default() -> Self {
        Self { gpefrac: 0.1, ncompmax: 4, r_pert_factor: 10.0 }
    }
}

/// Unconditionally merges mutually-nearest free nodes in `roots` until
/// one remains, mutating `roots`/`pop.systems` in place. Returns the
/// indices into `pop.systems` of every node created, in creation
/// (bottom-up) order.
pub fn construct_nn_tree(ctx: &SimulationContext, pop: &mut NBodyPopulation, roots: &mut Vec<NBodyRef>) -> Vec<usize> {
    let mut created = Vec::new();
    loop {
        let Some((i, j)) = find_mutual_pair(ctx, pop, roots) else {
            break;
        };
        let a = roots[i];
        let b = roots[j];
        let system = merge_pair(ctx, pop, a, b);
        pop.systems.push(system);
        let new_ref = NBodyRef::System(pop.systems.len() - 1);
        created.push(pop.systems.len() - 1);

        let (lo, hi) = if i < j { (i, j) } else { (j, i) };
        roots.remove(hi);
        roots.remove(lo);
        roots.push(new_ref);
    }
    created
}

/// Runs [`construct_nn_tree`] and then decides, bottom-up, which
/// merged nodes stand as declared subsystems. A node is accepted when
/// its component count is within `params.ncompmax` and the energy it
/// owes to bodies outside it is a small enough fraction
/// (`params.gpefrac`) of its total binding energy; rejected nodes are
/// flushed back into their two components, cascading through any
/// ancestor that was built on top of them. Returns the binary records
/// for every accepted two-component node, in creation order.
pub fn build_subsystems(
    ctx: &SimulationContext,
    pop: &mut NBodyPopulation,
    roots: &mut Vec<NBodyRef>,
    params: &SubsystemParams,
) -> Vec<Binary> {
    let created = construct_nn_tree(ctx, pop, roots);
    let mut binaries = Vec::new();
    let mut replacement: HashMap<NBodyRef, Vec<NBodyRef>> = HashMap::new();

    for sys_idx in created {
        let node_ref = NBodyRef::System(sys_idx);
        let children = pop.systems[sys_idx].children.clone();
        let ncomp = pop.systems[sys_idx].ncomp;
        let leaves = leaf_star_indices(pop, node_ref);
        let gpe_internal = pairwise_energy_among(ctx, pop, &leaves);
        let gpe_external = external_energy(ctx, pop, &leaves);
        let gpe_total = gpe_internal + gpe_external;

        let accepted = ncomp <= params.ncompmax && gpe_external.abs() <= params.gpefrac * gpe_total.abs().max(1.0e-12);

        if accepted {
            pop.systems[sys_idx].gpe = gpe_internal;
            if ncomp == 2 {
                binaries.push(binary_from(ctx, pop, &children));
            }
        } else {
            replacement.insert(node_ref, children);
        }
    }

    let resolved: Vec<NBodyRef> = roots.iter().flat_map(|&r| flatten_with_replacements(r, &replacement)).collect();
    *roots = resolved;
    binaries
}

fn flatten_with_replacements(r: NBodyRef, replacement: &HashMap<NBodyRef, Vec<NBodyRef>>) -> Vec<NBodyRef> {
    match replacement.get(&r) {
        Some(children) => children.iter().flat_map(|&c| flatten_with_replacements(c, replacement)).collect(),
        None => vec![r],
    }
}

/// Flattens a reference down to the star indices it ultimately
/// contains, recursing through nested system children.
fn leaf_star_indices(pop: &NBodyPopulation, r: NBodyRef) -> Vec<usize> {
    match r {
        NBodyRef::Star(i) => vec![i],
        NBodyRef::System(idx) => pop.systems[idx]
            .children
            .clone()
            .into_iter()
            .flat_map(|c| leaf_star_indices(pop, c))
            .collect(),
    }
}

/// Direct-summation gravitational potential energy among the given
/// star indices, each pair counted once.
fn pairwise_energy_among(ctx: &SimulationContext, pop: &NBodyPopulation, idxs: &[usize]) -> f64 {
    let dim = ctx.dim();
    let mut energy = 0.0;
    for a in 0..idxs.len() {
        for b in (a + 1)..idxs.len() {
            let pa = &pop.stars[idxs[a]];
            let pb = &pop.stars[idxs[b]];
            let dist = dim.norm(&dim.sub(&pa.r, &pb.r)).max(1.0e-300);
            energy -= pa.m * pb.m / dist;
        }
    }
    energy
}

/// Direct-summation potential energy between the given star indices
/// and every other star in the population, each pair counted once.
fn external_energy(ctx: &SimulationContext, pop: &NBodyPopulation, idxs: &[usize]) -> f64 {
    let dim = ctx.dim();
    let member: std::collections::HashSet<usize> = idxs.iter().copied().collect();
    let mut energy = 0.0;
    for &i in idxs {
        let pi = &pop.stars[i];
        for (j, pj) in pop.stars.iter().enumerate() {
            if member.contains(&j) {
                continue;
            }
            let dist = dim.norm(&dim.sub(&pi.r, &pj.r)).max(1.0e-300);
            energy -= pi.m * pj.m / dist;
        }
    }
    energy
}

/// Finds a pair `(i, j)` of indices into `roots` that are each other's
/// nearest neighbour. Returns `None` once a single root remains.
fn find_mutual_pair(ctx: &SimulationContext, pop: &NBodyPopulation, roots: &[NBodyRef]) -> Option<(usize, usize)> {
    let dim = ctx.dim();
    let nearest: Vec<Option<usize>> = (0..roots.len())
        .map(|i| {
            let ri = pop.get(roots[i]).r;
            let mut best: Option<(usize, f64)> = None;
            for (j, &rj_ref) in roots.iter().enumerate() {
                if j == i {
                    continue;
                }
                let d2 = dim.norm2(&dim.sub(&ri, &pop.get(rj_ref).r));
                let better = match best {
                    Some((_, bd)) => d2 < bd,
                    None => true,
                };
                if better {
                    best = Some((j, d2));
                }
            }
            best.map(|(j, _)| j)
        })
        .collect();

    for i in 0..roots.len() {
        if let Some(j) = nearest[i] {
            if nearest[j] == Some(i) && i < j {
                return Some((i, j));
            }
        }
    }
    None
}

/// Builds the merged system node for `a`/`b`. Orbital-element /
/// boundness bookkeeping happens separately in [`build_subsystems`];
/// this only computes mass, centre of mass and the `children` link.
fn merge_pair(ctx: &SimulationContext, pop: &NBodyPopulation, a: NBodyRef, b: NBodyRef) -> StarParticle {
    let dim = ctx.dim();
    let pa = pop.get(a).clone();
    let pb = pop.get(b).clone();
    let mass = pa.m + pb.m;

    let mut r = [0.0; 3];
    let mut v = [0.0; 3];
    for k in 0..3 {
        r[k] = (pa.m * pa.r[k] + pb.m * pb.r[k]) / mass;
        v[k] = (pa.m * pa.v[k] + pb.m * pb.v[k]) / mass;
    }
    let dist = dim.norm(&dim.sub(&pa.r, &pb.r));
    let h = pa.h.max(pb.h).max(dist);

    let mut system = StarParticle::new(r, v, mass, h);
    system.kind = StarKind::System;
    system.ncomp = pa.ncomp + pb.ncomp;
    system.children = vec![a, b];
    system.level = pa.level.min(pb.level);
    system
}

/// Recomputes the Keplerian orbital elements of a just-declared
/// two-body subsystem from its two (necessarily single-star) children.
fn binary_from(ctx: &SimulationContext, pop: &NBodyPopulation, children: &[NBodyRef]) -> Binary {
    let dim = ctx.dim();
    let pa = pop.get(children[0]);
    let pb = pop.get(children[1]);
    let mu = pa.m + pb.m;
    let dr = dim.sub(&pa.r, &pb.r);
    let dv = dim.sub(&pa.v, &pb.v);
    let dist = dim.norm(&dr).max(1.0e-300);
    let energy = 0.5 * dim.norm2(&dv) - mu / dist;
    let semimajor_axis = -mu / (2.0 * energy);

    let h_vec = [
        dr[1] * dv[2] - dr[2] * dv[1],
        dr[2] * dv[0] - dr[0] * dv[2],
        dr[0] * dv[1] - dr[1] * dv[0],
    ];
    let h2 = h_vec[0] * h_vec[0] + h_vec[1] * h_vec[1] + h_vec[2] * h_vec[2];
    let eccentricity = (1.0 + 2.0 * energy * h2 / (mu * mu)).max(0.0).sqrt();
    let period = if semimajor_axis > 0.0 {
        2.0 * std::f64::consts::PI * (semimajor_axis.powi(3) / mu).sqrt()
    } else {
        f64::INFINITY
    };

    Binary { components: [children[0], children[1]], semimajor_axis, eccentricity, period }
}

/// Largest distance from `target`'s centre of mass to any of its leaf
/// stars; used as a generic "orbit size" stand-in for nodes with more
/// than two components, which have no single semi-major axis.
#[must_use]
pub fn characteristic_radius(ctx: &SimulationContext, pop: &NBodyPopulation, target: NBodyRef) -> f64 {
    let dim = ctx.dim();
    let centre = pop.get(target).r;
    leaf_star_indices(pop, target)
        .into_iter()
        .map(|i| dim.norm(&dim.sub(&centre, &pop.stars[i].r)))
        .fold(0.0, f64::max)
}

/// Crossing-time estimate for a subsystem's internal timestep: largest
/// pairwise separation among its children divided by largest pairwise
/// relative speed.
#[must_use]
pub fn crossing_time(ctx: &SimulationContext, pop: &NBodyPopulation, children: &[NBodyRef]) -> f64 {
    let dim = ctx.dim();
    let mut size: f64 = 0.0;
    let mut vrel: f64 = 0.0;
    for i in 0..children.len() {
        for j in (i + 1)..children.len() {
            let pi = pop.get(children[i]);
            let pj = pop.get(children[j]);
            size = size.max(dim.norm(&dim.sub(&pi.r, &pj.r)));
            vrel = vrel.max(dim.norm(&dim.sub(&pi.v, &pj.v)));
        }
    }
    if vrel > 0.0 {
        size / vrel
    } else {
        f64::INFINITY
    }
}

/// Advances every component of a declared subsystem by one internal
/// step: sums gravity from its own members plus every perturber
/// (treated as fixed for the duration of the step) and applies a
/// single kick-drift-kick update. Perturbers are not themselves
/// advanced; they only source an external acceleration.
pub fn advance_subsystem(
    ctx: &SimulationContext,
    pop: &mut NBodyPopulation,
    children: &[NBodyRef],
    perturbers: &[NBodyRef],
    dt: f64,
    eps: f64,
) {
    let dim = ctx.dim();
    let mut accel = vec![[0.0; 3]; children.len()];
    for (idx, &ci) in children.iter().enumerate() {
        let pi = pop.get(ci).clone();
        let mut a = [0.0; 3];
        for &cj in children {
            if cj == ci {
                continue;
            }
            let pj = pop.get(cj);
            let dr = dim.sub(&pi.r, &pj.r);
            let dist2 = dim.norm2(&dr) + eps * eps;
            let inv_d3 = 1.0 / (dist2 * dist2.sqrt());
            for k in 0..dim.get() {
                a[k] -= pj.m * dr[k] * inv_d3;
            }
        }
        for &pj_ref in perturbers {
            let pj = pop.get(pj_ref);
            let dr = dim.sub(&pi.r, &pj.r);
            let dist2 = dim.norm2(&dr) + eps * eps;
            let inv_d3 = 1.0 / (dist2 * dist2.sqrt());
            for k in 0..dim.get() {
                a[k] -= pj.m * dr[k] * inv_d3;
            }
        }
        accel[idx] = a;
    }

    for (idx, &ci) in children.iter().enumerate() {
        let a = accel[idx];
        let p = pop.get_mut(ci);
        for k in 0..dim.get() {
            p.v[k] += 0.5 * a[k] * dt;
            p.r[k] += p.v[k] * dt;
            p.v[k] += 0.5 * a[k] * dt;
        }
        p.a = a;
    }
}

/// Collects every root not itself a component of `target`'s system,
/// within `r_pert_factor * reach` of `target`'s centre of mass. These
/// feed the subsystem's internal integrator as external perturbers.
#[must_use]
pub fn collect_perturbers(
    ctx: &SimulationContext,
    pop: &NBodyPopulation,
    roots: &[NBodyRef],
    target: NBodyRef,
    reach: f64,
    r_pert_factor: f64,
) -> Vec<NBodyRef> {
    let dim = ctx.dim();
    let centre = pop.get(target).r;
    let range = r_pert_factor * reach;
    let children = pop.get(target).children.clone();

    roots
        .iter()
        .copied()
        .filter(|&r| r != target && !children.contains(&r))
        .filter(|&r| dim.norm(&dim.sub(&centre, &pop.get(r).r)) < range)
        .collect()
}
