//! Block-hierarchical timestep driver.
//!
//! Every particle (gas or star) lives on one of a small number of
//! power-of-two timestep levels; the driver advances the whole
//! simulation by the shortest active step, re-synchronising longer-step
//! particles only when their own level comes due. Level assignment,
//! resync, and the hysteresis that keeps levels from oscillating every
//! step are the three rules this module is responsible for; the
//! individual force/timestep kernels live in [`crate::sph`] and
//! [`crate::nbody`].

use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::context::SimulationContext;
use crate::domain::DomainDecomposition;
use crate::eos::EosOps;
use crate::error::Result;
use crate::ghost::{build_ghosts, copy_acceleration_from_ghosts, SimulationBox};
use crate::kernel::KernelOps;
use crate::nbody;
use crate::nntree::{self, NBodyPopulation, SubsystemParams};
use crate::particle::{NBodyRef, Sink};
use crate::potential::ExternalPotential;
use crate::sink;
use crate::snapshot::SnapshotSink;
use crate::sph::{self, SphParams};
use crate::store::ParticleStore;
use crate::tree::{KdTree, Mac};

/// Block-timestep bookkeeping shared by gas and star populations.
///
/// `level_max` is the finest (shortest-step) level currently in use;
/// level `l` advances every `2^(level_max - l)` of the integer ticks
/// counted by `n`. A particle is active on tick `n` exactly when
/// `n % nstep(level) == 0`.
#[derive(Debug, Clone, Copy)]
pub struct LevelState {
    /// Current integer tick counter.
    pub n: u64,
    /// Finest level currently assigned to any particle.
    pub level_max: i32,
    /// Coarsest level currently assigned to any particle.
    pub level_min: i32,
    /// Hard ceiling on `level_max`, beyond which a timestep underflow
    /// is reported instead of subdividing further.
    pub level_max_cap: i32,
    /// Number of ticks since `level_max` last changed; levels are only
    /// allowed to coarsen after `hysteresis_ticks` consecutive ticks at
    /// a lower required level, to avoid oscillating every step.
    pub ticks_since_change: u64,
    /// Minimum ticks a lowered requirement must persist before
    /// `level_max` is actually allowed to decrease.
    pub hysteresis_ticks: u64,
}

impl LevelState {
    /// Starts a fresh run at level zero (the coarsest possible grading).
    #[must_use]
    pub fn new(level_max_cap: i32, hysteresis_ticks: u64) -> Self {
        Self {
            n: 0,
            level_max: 0,
            level_min: 0,
            level_max_cap,
            ticks_since_change: 0,
            hysteresis_ticks,
        }
    }

    /// Integer step size for a given level, `2^(level_max - level)`.
    #[must_use]
    pub fn nstep(&self, level: i32) -> u64 {
        1_u64 << (self.level_max - level).max(0)
    }

    /// Whether the particle at `level` is active on the current tick.
    #[must_use]
    pub fn is_active(&self, level: i32, nlast: u64) -> bool {
        (self.n - nlast) % self.nstep(level) == 0
    }

    /// Converts a desired physical timestep into a level, the finest
    /// level whose step size does not exceed `dt_want`, capped at
    /// `level_max_cap`.
    #[must_use]
    pub fn level_for_dt(&self, dt_want: f64, dt_max: f64) -> i32 {
        if dt_want <= 0.0 || !dt_want.is_finite() {
            return self.level_max_cap;
        }
        let mut level = 0;
        let mut dt = dt_max;
        while dt > dt_want && level < self.level_max_cap {
            dt *= 0.5;
            level += 1;
        }
        level
    }

    /// Applies the hysteresis rule to a newly requested `level_max`:
    /// raising `level_max` (shortening the finest step) takes effect
    /// immediately, but lowering it only takes effect once the lower
    /// requirement has persisted for `hysteresis_ticks` consecutive
    /// calls.
    pub fn update_level_max(&mut self, requested: i32) {
        let requested = requested.min(self.level_max_cap).max(0);
        if requested > self.level_max {
            self.level_max = requested;
            self.ticks_since_change = 0;
        } else if requested < self.level_max {
            self.ticks_since_change += 1;
            if self.ticks_since_change >= self.hysteresis_ticks {
                self.level_max = requested;
                self.ticks_since_change = 0;
            }
        } else {
            self.ticks_since_change = 0;
        }
    }
}

/// Configuration for one [`MainLoop`] run.
#[derive(Debug, Clone, Copy)]
pub struct DriverParams {
    /// Physical time per tick at `level_max`, `dt_max / 2^level_max`.
    pub dt_max: f64,
    /// Courant number used to turn `h`/sound speed into a desired `dt`.
    pub courant_mult: f64,
    /// Rebuild the tree (rather than just re-stock it) every this many ticks.
    pub ntreebuildstep: u64,
    /// Re-stock tree moments every this many ticks.
    pub ntreestockstep: u64,
    /// Re-detect bound subsystems every this many ticks.
    pub nsystembuildstep: u64,
    /// Emit a snapshot every this many ticks.
    pub nsnapstep: u64,
    /// Ghost-region multiplier passed to [`build_ghosts`].
    pub ghost_range: f64,
    /// Maximum ghost-buffer occupancy.
    pub nghostmax: usize,
    /// Maximum neighbours returned by a single tree query.
    pub max_neighbours: usize,
    /// Self-gravity opening criterion.
    pub mac: Mac,
    /// Gravitational softening for direct summation.
    pub grav_eps: f64,
    /// Whether self-gravity is enabled at all.
    pub gravity_on: bool,
    /// Whether sink creation/accretion is enabled.
    pub sinks_on: bool,
}

/// The block-timestep main loop. Owns every particle population and
/// the pluggable collaborators (kernel, equation of state, potential,
/// domain decomposition, snapshot sink) the step needs; those
/// collaborators are supplied generically so the loop is agnostic to
/// which concrete flavour of each is in use.
pub struct MainLoop<K, E, P, D, S> {
    ctx: SimulationContext,
    params: DriverParams,
    sph_params: SphParams,
    nbody_params: nbody::NbodyParams,
    subsystem_params: SubsystemParams,
    kernel: K,
    eos: E,
    potential: P,
    domain: D,
    snapshot: S,
    box_: SimulationBox,
    level: LevelState,
    store: ParticleStore,
    stars: Vec<crate::particle::StarParticle>,
    sinks: Vec<Sink>,
    tree: Option<KdTree>,
    /// System nodes from the last subsystem (re)detection, persisted
    /// across ticks so declared subsystems keep being integrated
    /// between `nsystembuildstep` rebuilds.
    nn_systems: Vec<crate::particle::StarParticle>,
    /// Roots from the last subsystem (re)detection.
    nn_roots: Vec<NBodyRef>,
    t: f64,
}

impl<K, E, P, D, S> MainLoop<K, E, P, D, S>
where
    K: KernelOps,
    E: EosOps,
    P: ExternalPotential,
    D: DomainDecomposition,
    S: SnapshotSink,
{
    /// Builds a new driver around an already-constructed particle population.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ctx: SimulationContext,
        params: DriverParams,
        sph_params: SphParams,
        nbody_params: nbody::NbodyParams,
        subsystem_params: SubsystemParams,
        kernel: K,
        eos: E,
        potential: P,
        domain: D,
        snapshot: S,
        box_: SimulationBox,
        store: ParticleStore,
        stars: Vec<crate::particle::StarParticle>,
    ) -> Self {
        Self {
            ctx,
            params,
            sph_params,
            nbody_params,
            subsystem_params,
            kernel,
            eos,
            potential,
            domain,
            snapshot,
            box_,
            level: LevelState::new(30, 4),
            store,
            stars,
            sinks: Vec::new(),
            tree: None,
            nn_systems: Vec::new(),
            nn_roots: Vec::new(),
            t: 0.0,
        }
    }

    /// Current simulation time.
    #[must_use]
    pub fn time(&self) -> f64 {
        self.t
    }

    /// Runs the main loop until `t_end` is reached or `wall_clock_limit`
    /// elapses, whichever comes first.
    ///
    /// Per tick, in order: tree rebuild/restock, ghost construction,
    /// density/`h` solve, pressure/sound-speed evaluation, hydro
    /// forces, self-gravity, ghost force folding, sink creation and
    /// accretion, subsystem (re)detection, N-body advance, level
    /// reassignment, and snapshot output.
    ///
    /// # Errors
    ///
    /// Propagates the first [`crate::error::Error`] raised by any
    /// phase.
    pub fn run(&mut self, t_end: f64, wall_clock_limit: Duration) -> Result<()> {
        let start = Instant::now();
        while self.t < t_end {
            if start.elapsed() > wall_clock_limit {
                warn!("wall-clock limit reached at t={}, stopping early", self.t);
                break;
            }
            self.step()?;
        }
        Ok(())
    }

    /// Advances the simulation by exactly one tick of the finest
    /// currently active level.
    ///
    /// # Errors
    ///
    /// Propagates the first [`crate::error::Error`] raised by any phase.
    pub fn step(&mut self) -> Result<()> {
        let n = self.level.n;

        self.update_active_flags();
        self.domain.rebalance(&mut self.store)?;

        // Ghosts and the tree's structure are rebuilt together, on the
        // `ntreebuildstep` cadence; re-stocking moments on intervening
        // ticks is a strictly cheaper, independent cadence.
        if n % self.params.ntreebuildstep == 0 || self.tree.is_none() {
            build_ghosts(&self.ctx, &mut self.store, &self.box_, &self.kernel, self.params.ghost_range, self.params.nghostmax)?;
            let positions: Vec<[f64; 3]> = self.store.as_slice().iter().map(|p| p.r).collect();
            self.tree = Some(KdTree::build(&positions, self.ctx.dim(), 8, self.params.gravity_on));
        } else if n % self.params.ntreestockstep == 0 {
            let positions: Vec<[f64; 3]> = self.store.as_slice().iter().map(|p| p.r).collect();
            let velocities: Vec<[f64; 3]> = self.store.as_slice().iter().map(|p| p.v).collect();
            let masses: Vec<f64> = self.store.as_slice().iter().map(|p| p.m).collect();
            let hvals: Vec<f64> = self.store.as_slice().iter().map(|p| p.h).collect();
            let accels: Vec<[f64; 3]> = self.store.as_slice().iter().map(|p| p.a).collect();
            if let Some(tree) = self.tree.as_mut() {
                tree.stock(&positions, &velocities, &masses, &hvals, &accels, self.params.mac);
            }
        }
        // Taken out of `self` for the duration of this phase so the
        // borrow checker does not see an immutable borrow of the tree
        // alive across the `&mut self` helper calls below; put back
        // once every phase that needs it has run.
        let tree = self.tree.take().expect("tree built above on first tick");

        sph::compute_density(&self.ctx, &mut self.store, &tree, &self.kernel, &self.sph_params, self.params.max_neighbours)?;
        self.evaluate_eos();
        sph::compute_hydro_forces(&self.ctx, &mut self.store, &tree, &self.kernel, &self.sph_params, self.params.max_neighbours)?;

        if self.params.gravity_on {
            sph::compute_self_gravity(&self.ctx, &mut self.store, &tree, self.params.mac, self.params.grav_eps);
        }
        self.apply_external_potential();
        copy_acceleration_from_ghosts(&mut self.store);

        if self.params.sinks_on {
            let sink_params = sink::SinkParams::default();
            sink::create_sinks(&self.ctx, &mut self.store, &tree, &mut self.stars, &mut self.sinks, &sink_params);
            sink::accrete(&mut self.store, &tree, &mut self.stars, &mut self.sinks);
        }
        self.tree = Some(tree);

        if !self.stars.is_empty() {
            if n % self.params.nsystembuildstep == 0 {
                self.rebuild_subsystems();
            }
            let system_members = self.advance_subsystems_one_tick();

            nbody::evaluate_forces(&self.ctx, &mut self.stars, self.nbody_params.eps);

            let mut by_level: std::collections::BTreeMap<i32, Vec<usize>> = std::collections::BTreeMap::new();
            for i in 0..self.stars.len() {
                if self.stars[i].active && !system_members.contains(&i) {
                    by_level.entry(self.stars[i].level).or_default().push(i);
                }
            }
            for (level, indices) in by_level {
                let dt = self.params.dt_max / (1_u64 << level.max(0)) as f64;
                nbody::advance(&self.ctx, &mut self.stars, &indices, dt, self.nbody_params.eps, self.nbody_params.npec);
            }
        }

        self.reassign_levels();
        self.advance_gas_positions();

        if n % self.params.nsnapstep == 0 {
            self.snapshot.write_snapshot(self.t, self.store.real_slice(), &self.stars)?;
        }

        self.store.delete_dead();
        self.level.n += 1;
        self.t += self.params.dt_max / (1_u64 << self.level.level_max) as f64;
        Ok(())
    }

    /// Marks every live particle active or inactive for this tick per
    /// the block-timestep hierarchy: a particle is active exactly when
    /// its own level comes due, `(n - nlast) % nstep(level) == 0`.
    fn update_active_flags(&mut self) {
        let level = self.level;
        for p in self.store.as_mut_slice() {
            if p.is_live() {
                p.active = level.is_active(p.level, p.nlast);
            }
        }
        for s in &mut self.stars {
            s.active = level.is_active(s.level, s.nlast);
        }
    }

    /// Re-detects bound subsystems from the current star population and
    /// replaces the persisted `nn_systems`/`nn_roots` used by
    /// [`Self::advance_subsystems_one_tick`] on every tick until the
    /// next rebuild.
    fn rebuild_subsystems(&mut self) {
        let mut pop = NBodyPopulation { stars: self.stars.clone(), systems: Vec::new() };
        let mut roots: Vec<NBodyRef> = (0..self.stars.len()).map(NBodyRef::Star).collect();
        let binaries = nntree::build_subsystems(&self.ctx, &mut pop, &mut roots, &self.subsystem_params);
        if !binaries.is_empty() {
            debug!("detected {} bound subsystem(s) at tick {}", binaries.len(), self.level.n);
        }
        self.nn_systems = pop.systems;
        self.nn_roots = roots;
    }

    /// Advances every flat (non-nested) declared subsystem by one
    /// global tick using its own perturber-aware internal integrator,
    /// sub-stepped against its crossing time. Nested systems (whose
    /// direct children are themselves system nodes) are left for the
    /// ordinary global integrator; returns the star indices that were
    /// advanced here so the caller can exclude them from that pass.
    fn advance_subsystems_one_tick(&mut self) -> Vec<usize> {
        if self.nn_roots.is_empty() {
            return Vec::new();
        }
        let dt = self.params.dt_max / (1_u64 << self.level.level_max) as f64;
        let mut pop = NBodyPopulation { stars: self.stars.clone(), systems: self.nn_systems.clone() };
        let mut members = Vec::new();

        for &root in &self.nn_roots {
            let NBodyRef::System(_) = root else { continue };
            let children = pop.get(root).children.clone();
            if !children.iter().all(|c| matches!(c, NBodyRef::Star(_))) {
                continue;
            }
            for &c in &children {
                if let NBodyRef::Star(i) = c {
                    members.push(i);
                }
            }
            let reach = nntree::characteristic_radius(&self.ctx, &pop, root);
            let perturbers =
                nntree::collect_perturbers(&self.ctx, &pop, &self.nn_roots, root, reach, self.subsystem_params.r_pert_factor);
            let tcross = nntree::crossing_time(&self.ctx, &pop, &children);
            let dt_internal = (0.1 * tcross).min(dt).max(self.nbody_params.dt_min);
            let nsub = (dt / dt_internal).ceil().max(1.0) as usize;
            let dt_sub = dt / nsub as f64;
            for _ in 0..nsub {
                nntree::advance_subsystem(&self.ctx, &mut pop, &children, &perturbers, dt_sub, self.nbody_params.eps);
            }
        }

        for (i, leaf) in pop.stars.iter().enumerate() {
            self.stars[i].r = leaf.r;
            self.stars[i].v = leaf.v;
            self.stars[i].a = leaf.a;
        }
        self.nn_systems = pop.systems;
        members
    }

    /// When `level_max` rises, every level-vs-tick ratio in the
    /// hierarchy is still consistent only if the tick counter and every
    /// particle's `nlast` are rescaled into the new, finer unit too:
    /// multiplying both by the exact power-of-two factor keeps
    /// `is_active` returning the same answers it would have without the
    /// refinement. Coarsening (`level_max` falling) is left alone: it
    /// only happens after hysteresis confirms the coarser requirement
    /// persists, and rescaling down is not guaranteed to divide evenly,
    /// so particles simply resync somewhat more often than ideal until
    /// `level_max` next rises.
    fn rescale_for_level_increase(&mut self, old_level_max: i32, new_level_max: i32) {
        if new_level_max <= old_level_max {
            return;
        }
        let factor = 1_u64 << (new_level_max - old_level_max);
        self.level.n *= factor;
        for p in self.store.as_mut_slice() {
            p.nlast *= factor;
        }
        for s in &mut self.stars {
            s.nlast *= factor;
        }
    }

    fn evaluate_eos(&mut self) {
        for p in self.store.as_mut_slice() {
            p.press = self.eos.pressure(p.rho, p.u);
            p.sound = self.eos.sound_speed(p.rho, p.u);
        }
    }

    fn apply_external_potential(&mut self) {
        let dim = self.ctx.dim();
        for p in self.store.as_mut_slice() {
            let a_ext = self.potential.acceleration(dim, &p.r);
            for k in 0..3 {
                p.a[k] += a_ext[k];
            }
        }
    }

    /// Recomputes each *active* particle's own level from its freshly
    /// evaluated forces (§4.I: levels are only reassigned for particles
    /// that just completed a step), commits that level's `nstep`/`nlast`
    /// once the new global `level_max` is known, and folds in the
    /// hysteresis and level-churn rescaling that keep the hierarchy
    /// self-consistent as `level_max` moves.
    fn reassign_levels(&mut self) {
        let n = self.level.n;
        let mut requested_max = 0;
        let mut requested_min = self.level.level_max_cap;

        for p in self.store.as_slice() {
            if !p.is_live() {
                continue;
            }
            let level = if p.active {
                let accel_mag = self.ctx.dim().norm(&p.a).max(1.0e-300);
                let dt_want = self.params.courant_mult * p.h / (p.sound + (p.h * accel_mag).sqrt()).max(1.0e-300);
                self.level.level_for_dt(dt_want, self.params.dt_max)
            } else {
                p.level
            };
            requested_max = requested_max.max(level);
            requested_min = requested_min.min(level);
        }
        for s in &self.stars {
            let level = if s.active {
                match nbody::aarseth_timestep(&self.ctx, s, self.nbody_params.dt_min) {
                    Ok(dt_want) => self.level.level_for_dt(dt_want, self.params.dt_max),
                    Err(_) => s.level,
                }
            } else {
                s.level
            };
            requested_max = requested_max.max(level);
            requested_min = requested_min.min(level);
        }

        let old_level_max = self.level.level_max;
        self.level.update_level_max(requested_max);
        self.level.level_min = requested_min.min(self.level.level_max);
        self.rescale_for_level_increase(old_level_max, self.level.level_max);

        for p in self.store.as_mut_slice() {
            if !p.is_live() || !p.active {
                continue;
            }
            let accel_mag = self.ctx.dim().norm(&p.a).max(1.0e-300);
            let dt_want = self.params.courant_mult * p.h / (p.sound + (p.h * accel_mag).sqrt()).max(1.0e-300);
            p.level = self.level.level_for_dt(dt_want, self.params.dt_max);
            p.nstep = self.level.nstep(p.level);
            p.nlast = n;
        }
        for s in &mut self.stars {
            if !s.active {
                continue;
            }
            if let Ok(dt_want) = nbody::aarseth_timestep(&self.ctx, s, self.nbody_params.dt_min) {
                s.level = self.level.level_for_dt(dt_want, self.params.dt_max);
            }
            s.nstep = self.level.nstep(s.level);
            s.nlast = n;
        }
    }

    /// Advances only active gas particles, each by its own level's step
    /// size `dt_max / 2^level`; particles on a coarser level simply sit
    /// out intervening ticks rather than moving on the finest shared
    /// step.
    fn advance_gas_positions(&mut self) {
        for p in self.store.as_mut_slice() {
            if !p.is_live() || !p.active {
                continue;
            }
            let dt = self.params.dt_max / (1_u64 << p.level.max(0)) as f64;
            for k in 0..3 {
                p.v[k] += 0.5 * p.a[k] * dt;
                p.r[k] += p.v[k] * dt;
                p.v[k] += 0.5 * p.a[k] * dt;
            }
            p.u += p.dudt * dt;
        }
    }
}

impl<K, E, P, D, S> std::fmt::Debug for MainLoop<K, E, P, D, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MainLoop")
            .field("t", &self.t)
            .field("n", &self.level.n)
            .field("level_max", &self.level.level_max)
            .field("n_gas", &self.store.count())
            .field("n_stars", &self.stars.len())
            .finish()
    }
}
