#![allow(missing_docs)]

use gandalf::config::Params;
use gandalf::context::SimulationContext;
use gandalf::nntree::{self, NBodyPopulation, SubsystemParams};
use gandalf::particle::{NBodyRef, StarKind, StarParticle};

fn ctx_3d() -> SimulationContext {
    let mut params = Params::new();
    params.set_int("ndim", 3);
    SimulationContext::new(params).unwrap()
}

// A tight bound binary plus one distant, fast field star: the tree
// should merge only the binary and leave the field star as its own
// root, with the merged system carrying both original stars as
// children.
#[test]
fn bound_binary_merges_while_distant_star_stays_single() {
    let ctx = ctx_3d();
    let m = 1.0;
    let r = 0.01;
    let v_bound = (m / (4.0 * r)).sqrt() * 0.5;

    let mut pop = NBodyPopulation {
        stars: vec![
            StarParticle::new([r, 0.0, 0.0], [0.0, v_bound, 0.0], m, 0.0),
            StarParticle::new([-r, 0.0, 0.0], [0.0, -v_bound, 0.0], m, 0.0),
            StarParticle::new([1.0e5, 0.0, 0.0], [500.0, 0.0, 0.0], m, 0.0),
        ],
        systems: Vec::new(),
    };
    let mut roots = vec![NBodyRef::Star(0), NBodyRef::Star(1), NBodyRef::Star(2)];

    // ncompmax=2: construction unconditionally folds the field star into
    // the pair's system too, so the cap is what flushes that outer merge
    // back to the accepted pair-system plus the lone field star.
    let params = SubsystemParams { gpefrac: 0.1, ncompmax: 2, r_pert_factor: 10.0 };
    let binaries = nntree::build_subsystems(&ctx, &mut pop, &mut roots, &params);

    assert_eq!(binaries.len(), 1);
    assert_eq!(roots.len(), 2, "expected one merged system plus the untouched field star");
    assert!(roots.contains(&NBodyRef::Star(2)));

    let system_ref = roots.iter().copied().find(|r| matches!(r, NBodyRef::System(_))).unwrap();
    let system = pop.get(system_ref);
    assert_eq!(system.kind, StarKind::System);
    assert_eq!(system.ncomp, 2);
    assert!(system.children.contains(&NBodyRef::Star(0)));
    assert!(system.children.contains(&NBodyRef::Star(1)));

    // Total mass and momentum of the merged node must equal the sum of
    // its two progenitors.
    assert!((system.m - 2.0 * m).abs() < 1.0e-12);
}

// Three equally-spaced bodies (0 and 1 are each other's nearest
// neighbour by the tie-break rule, 2 is left over): construction must
// still unconditionally collapse all three down to a single root, via
// exactly two merges, regardless of boundness.
#[test]
fn equidistant_triple_collapses_to_one_root_via_two_merges() {
    let ctx = ctx_3d();
    let m = 1.0;
    let d = 0.02;
    let v = (m / (4.0 * d)).sqrt() * 0.5;

    let mut pop = NBodyPopulation {
        stars: vec![
            StarParticle::new([0.0, 0.0, 0.0], [0.0, v, 0.0], m, 0.0),
            StarParticle::new([d, 0.0, 0.0], [0.0, -v, 0.0], m, 0.0),
            StarParticle::new([2.0 * d, 0.0, 0.0], [0.0, v, 0.0], m, 0.0),
        ],
        systems: Vec::new(),
    };
    let mut roots = vec![NBodyRef::Star(0), NBodyRef::Star(1), NBodyRef::Star(2)];

    let created = nntree::construct_nn_tree(&ctx, &mut pop, &mut roots);

    assert_eq!(created.len(), 2, "3 free nodes collapse via exactly N-1 merges");
    assert_eq!(roots.len(), 1);
    assert_eq!(pop.systems.len(), 2);
    assert_eq!(pop.systems.last().unwrap().ncomp, 3);
}

// Capping ncompmax at 2 must flush the outer 3-body merge, leaving the
// pair that construction happened to form first declared as a system
// and the third body as its own root.
#[test]
fn equidistant_triple_with_ncompmax_two_leaves_a_declared_pair_and_a_loner() {
    let ctx = ctx_3d();
    let m = 1.0;
    let d = 0.02;
    let v = (m / (4.0 * d)).sqrt() * 0.5;

    let mut pop = NBodyPopulation {
        stars: vec![
            StarParticle::new([0.0, 0.0, 0.0], [0.0, v, 0.0], m, 0.0),
            StarParticle::new([d, 0.0, 0.0], [0.0, -v, 0.0], m, 0.0),
            StarParticle::new([2.0 * d, 0.0, 0.0], [0.0, v, 0.0], m, 0.0),
        ],
        systems: Vec::new(),
    };
    let mut roots = vec![NBodyRef::Star(0), NBodyRef::Star(1), NBodyRef::Star(2)];
    let params = SubsystemParams { gpefrac: 0.1, ncompmax: 2, r_pert_factor: 10.0 };

    let binaries = nntree::build_subsystems(&ctx, &mut pop, &mut roots, &params);

    assert_eq!(binaries.len(), 1);
    assert_eq!(roots.len(), 2);
}

// Once a system exists, collect_perturbers must never report the
// system's own children, even when they are still present in the root
// list under their original references.
#[test]
fn perturber_collection_never_reintroduces_merged_children() {
    let ctx = ctx_3d();
    let m = 1.0;
    let r = 0.01;
    let v = (m / (4.0 * r)).sqrt() * 0.5;

    let mut pop = NBodyPopulation {
        stars: vec![
            StarParticle::new([r, 0.0, 0.0], [0.0, v, 0.0], m, 0.0),
            StarParticle::new([-r, 0.0, 0.0], [0.0, -v, 0.0], m, 0.0),
        ],
        systems: Vec::new(),
    };
    let mut roots = vec![NBodyRef::Star(0), NBodyRef::Star(1)];
    nntree::build_subsystems(&ctx, &mut pop, &mut roots, &SubsystemParams::default());
    let system_ref = roots[0];

    pop.stars.push(StarParticle::new([0.05, 0.0, 0.0], [0.0; 3], 1.0, 0.0));
    let nearby = NBodyRef::Star(2);
    let mut all_roots = roots.clone();
    all_roots.push(NBodyRef::Star(0));
    all_roots.push(NBodyRef::Star(1));
    all_roots.push(nearby);

    let perturbers = nntree::collect_perturbers(&ctx, &pop, &all_roots, system_ref, 0.02, 1.0e4);

    assert!(perturbers.contains(&nearby));
    assert!(!perturbers.contains(&NBodyRef::Star(0)));
    assert!(!perturbers.contains(&NBodyRef::Star(1)));
}
