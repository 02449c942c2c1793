#![allow(missing_docs)]

use gandalf::config::Params;
use gandalf::context::SimulationContext;
use gandalf::nbody::{self, NbodyParams};
use gandalf::particle::StarParticle;

fn ctx_3d() -> SimulationContext {
    let mut params = Params::new();
    params.set_int("ndim", 3);
    SimulationContext::new(params).unwrap()
}

fn total_energy(ctx: &SimulationContext, stars: &[StarParticle], eps: f64) -> f64 {
    let dim = ctx.dim();
    let mut kinetic = 0.0;
    let mut potential = 0.0;
    for (i, si) in stars.iter().enumerate() {
        kinetic += 0.5 * si.m * dim.norm2(&si.v);
        for sj in &stars[i + 1..] {
            let dist = dim.norm(&dim.sub(&si.r, &sj.r));
            potential -= si.m * sj.m / (dist * dist + eps * eps).sqrt();
        }
    }
    kinetic + potential
}

// A circular two-body orbit, integrated for many short Hermite steps,
// should conserve total energy and momentum to the scheme's order.
#[test]
fn hermite_integrator_conserves_energy_over_many_steps() {
    let ctx = ctx_3d();
    let params = NbodyParams::default();
    let m = 1.0;
    let r = 1.0;
    let v = (m / (4.0 * r)).sqrt();
    let mut stars = vec![
        StarParticle::new([r, 0.0, 0.0], [0.0, v, 0.0], m, 0.0),
        StarParticle::new([-r, 0.0, 0.0], [0.0, -v, 0.0], m, 0.0),
    ];
    nbody::evaluate_forces(&ctx, &mut stars, params.eps);
    let e0 = total_energy(&ctx, &stars, params.eps);

    let active = vec![0, 1];
    let dt = 1.0e-3;
    for _ in 0..500 {
        nbody::advance(&ctx, &mut stars, &active, dt, params.eps, params.npec);
    }

    let e1 = total_energy(&ctx, &stars, params.eps);
    let drift = ((e1 - e0) / e0).abs();
    assert!(drift < 1.0e-2, "relative energy drift {drift} too large");

    let mut p = [0.0; 3];
    for s in &stars {
        for k in 0..3 {
            p[k] += s.m * s.v[k];
        }
    }
    for k in 0..3 {
        assert!(p[k].abs() < 1.0e-6, "momentum component {k} did not stay near zero: {}", p[k]);
    }
}

// Aarseth timesteps for a tightly bound, fast pair should be much
// shorter than for a wide, slow one: the criterion has to be
// sensitive to the local dynamical time, not just plugged in as a
// constant.
#[test]
fn aarseth_timestep_shrinks_for_tighter_orbits() {
    let ctx = ctx_3d();
    let params = NbodyParams::default();

    let wide = {
        let m = 1.0;
        let r = 10.0;
        let v = (m / (4.0 * r)).sqrt();
        let mut stars = vec![
            StarParticle::new([r, 0.0, 0.0], [0.0, v, 0.0], m, 0.0),
            StarParticle::new([-r, 0.0, 0.0], [0.0, -v, 0.0], m, 0.0),
        ];
        nbody::evaluate_forces(&ctx, &mut stars, params.eps);
        // a2dot/a3dot only populate once the corrector has run once.
        nbody::advance(&ctx, &mut stars, &[0, 1], 1.0e-2, params.eps, params.npec);
        nbody::aarseth_timestep(&ctx, &stars[0], params.dt_min).unwrap()
    };

    let tight = {
        let m = 1.0;
        let r = 0.01;
        let v = (m / (4.0 * r)).sqrt();
        let mut stars = vec![
            StarParticle::new([r, 0.0, 0.0], [0.0, v, 0.0], m, 0.0),
            StarParticle::new([-r, 0.0, 0.0], [0.0, -v, 0.0], m, 0.0),
        ];
        nbody::evaluate_forces(&ctx, &mut stars, params.eps);
        nbody::advance(&ctx, &mut stars, &[0, 1], 1.0e-5, params.eps, params.npec);
        nbody::aarseth_timestep(&ctx, &stars[0], params.dt_min).unwrap()
    };

    assert!(tight < wide, "tight orbit timestep {tight} should be shorter than wide orbit timestep {wide}");
}
