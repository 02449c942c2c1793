#![allow(missing_docs)]

use std::time::Duration;

use gandalf::config::Params;
use gandalf::context::SimulationContext;
use gandalf::domain::SingleRankDomain;
use gandalf::eos::Adiabatic;
use gandalf::ghost::{BoundaryMode, SimulationBox};
use gandalf::kernel::M4Cubic;
use gandalf::nbody::NbodyParams;
use gandalf::nntree::SubsystemParams;
use gandalf::particle::{GasParticle, StarParticle};
use gandalf::potential::NoPotential;
use gandalf::snapshot::NullSink;
use gandalf::sph::SphParams;
use gandalf::store::ParticleStore;
use gandalf::tree::Mac;
use gandalf::driver::{DriverParams, MainLoop};

fn ctx_3d() -> SimulationContext {
    let mut params = Params::new();
    params.set_int("ndim", 3);
    SimulationContext::new(params).unwrap()
}

fn open_box() -> SimulationBox {
    SimulationBox {
        boxmin: [-5.0; 3],
        boxmax: [5.0; 3],
        lhs: [BoundaryMode::Open; 3],
        rhs: [BoundaryMode::Open; 3],
    }
}

fn scattered_gas(n_per_side: usize, spacing: f64, m: f64, h: f64) -> Vec<GasParticle> {
    let mut particles = Vec::new();
    for i in 0..n_per_side {
        for j in 0..n_per_side {
            for k in 0..n_per_side {
                let r = [
                    (i as f64 - n_per_side as f64 / 2.0) * spacing,
                    (j as f64 - n_per_side as f64 / 2.0) * spacing,
                    (k as f64 - n_per_side as f64 / 2.0) * spacing,
                ];
                particles.push(GasParticle::new(r, m, h));
            }
        }
    }
    particles
}

fn driver_params() -> DriverParams {
    DriverParams {
        dt_max: 1.0e-3,
        courant_mult: 0.3,
        ntreebuildstep: 2,
        ntreestockstep: 1,
        nsystembuildstep: 4,
        nsnapstep: 1000,
        ghost_range: 1.0,
        nghostmax: 500,
        max_neighbours: 200,
        mac: Mac::Geometric { theta_max2: 0.5 },
        grav_eps: 1.0e-3,
        gravity_on: true,
        sinks_on: false,
    }
}

// Running the full driver for several ticks with both gas and stars
// present should advance time monotonically, keep the particle counts
// sane and never panic across the tree-rebuild/re-stock boundary.
#[test]
fn main_loop_advances_several_ticks_with_gas_and_stars() {
    let ctx = ctx_3d();
    let kernel = M4Cubic::new(ctx.dim());
    let particles = scattered_gas(4, 0.3, 1.0, 0.3);
    let store = ParticleStore::from_real(particles);

    let stars = vec![
        StarParticle::new([2.0, 0.0, 0.0], [0.0, 0.3, 0.0], 2.0, 0.05),
        StarParticle::new([-2.0, 0.0, 0.0], [0.0, -0.3, 0.0], 2.0, 0.05),
    ];

    let mut driver = MainLoop::new(
        ctx,
        driver_params(),
        SphParams::default(),
        NbodyParams::default(),
        SubsystemParams::default(),
        kernel,
        Adiabatic { gamma: 5.0 / 3.0, mu_bar: 2.35 },
        NoPotential,
        SingleRankDomain,
        NullSink,
        open_box(),
        store,
        stars,
    );

    let mut last_t = driver.time();
    for _ in 0..10 {
        driver.step().unwrap();
        assert!(driver.time() > last_t, "time must strictly advance every tick");
        last_t = driver.time();
    }
}

// A short `run()` call bounded by a generous wall-clock limit must
// reach (or get close to) `t_end` without looping forever.
#[test]
fn main_loop_run_reaches_target_time() {
    let ctx = ctx_3d();
    let kernel = M4Cubic::new(ctx.dim());
    let particles = scattered_gas(3, 0.4, 1.0, 0.35);
    let store = ParticleStore::from_real(particles);

    let mut params = driver_params();
    params.gravity_on = false;
    let mut driver = MainLoop::new(
        ctx,
        params,
        SphParams::default(),
        NbodyParams::default(),
        SubsystemParams::default(),
        kernel,
        Adiabatic { gamma: 5.0 / 3.0, mu_bar: 2.35 },
        NoPotential,
        SingleRankDomain,
        NullSink,
        open_box(),
        store,
        Vec::new(),
    );

    let t_end = 5.0e-3;
    driver.run(t_end, Duration::from_secs(30)).unwrap();

    assert!(driver.time() >= t_end - 1.0e-9);
}
