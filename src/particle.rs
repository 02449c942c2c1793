//! Data model: gas/star particle records, sinks, and the tagged
//! `NBodyRef` union the NN-system tree uses to refer to either a star
//! or a system particle with a single stable handle.

use serde::{Deserialize, Serialize};

/// Tag describing what a gas-array slot currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParticleType {
    /// A live SPH gas particle.
    Gas,
    /// A replica of a real particle created by the ghost manager.
    Ghost,
    /// A slot whose particle has been deleted (pending compaction).
    Dead,
    /// Gas that has been fully accreted onto a sink.
    SinkAccreted,
}

/// Tag distinguishing a single star from a multi-body system node in
/// the star/system array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StarKind {
    /// A single star.
    Star,
    /// A bound subsystem created by [`crate::nntree`].
    System,
}

/// Stable handle into either the star array or the system array.
///
/// Realises the "NBodyRef = {star i} | {system s}" tagged union from
/// the design notes: the NN-system tree replaces star children with
/// system particles mid-traversal, so every reference into the N-body
/// population must carry which array it indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NBodyRef {
    /// Index into the single-star array.
    Star(usize),
    /// Index into the system (subsystem) array.
    System(usize),
}

/// One SPH gas point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GasParticle {
    /// Current position.
    pub r: [f64; 3],
    /// Current velocity.
    pub v: [f64; 3],
    /// Current acceleration.
    pub a: [f64; 3],
    /// Position at the start of the current step (for prediction).
    pub r0: [f64; 3],
    /// Velocity at the start of the current step.
    pub v0: [f64; 3],
    /// Acceleration at the start of the current step.
    pub a0: [f64; 3],
    /// Particle mass.
    pub m: f64,
    /// Smoothing length.
    pub h: f64,
    /// Density.
    pub rho: f64,
    /// Specific internal energy.
    pub u: f64,
    /// Pressure.
    pub press: f64,
    /// Sound speed.
    pub sound: f64,
    /// Rate of change of specific internal energy, `du/dt`.
    pub dudt: f64,
    /// Individual artificial-viscosity coefficient.
    pub alpha: f64,
    /// Grad-h correction factor `Omega`.
    pub omega: f64,
    /// Cap on the block-timestep level a neighbour search may assign.
    pub levelneib: i32,
    /// Current block-timestep level.
    pub level: i32,
    /// Integer step size `nstep = 2^(level_step - level)`.
    pub nstep: u64,
    /// Last tick at which this particle's state was synchronised.
    pub nlast: u64,
    /// This particle's own timestep.
    pub dt: f64,
    /// Index of the real particle this is a ghost of, if any.
    pub iorig: Option<usize>,
    /// What kind of slot this is.
    pub ptype: ParticleType,
    /// Whether this particle participates in the current active set.
    pub active: bool,
}

impl GasParticle {
    /// Constructs a live gas particle at rest with the given mass and
    /// smoothing length; all other fields start at their neutral
    /// value and are filled in by the density/force solve.
    #[must_use]
    pub fn new(r: [f64; 3], m: f64, h: f64) -> Self {
        Self {
            r,
            v: [0.0; 3],
            a: [0.0; 3],
            r0: r,
            v0: [0.0; 3],
            a0: [0.0; 3],
            m,
            h,
            rho: 0.0,
            u: 0.0,
            press: 0.0,
            sound: 0.0,
            dudt: 0.0,
            alpha: 1.0,
            omega: 1.0,
            levelneib: 0,
            level: 0,
            nstep: 1,
            nlast: 0,
            dt: 0.0,
            iorig: None,
            ptype: ParticleType::Gas,
            active: true,
        }
    }

    /// Returns true for slots that still participate in physics
    /// (i.e. not `Dead` and not `SinkAccreted`).
    #[must_use]
    pub fn is_live(&self) -> bool {
        !matches!(self.ptype, ParticleType::Dead | ParticleType::SinkAccreted)
    }
}

/// One star or system particle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StarParticle {
    /// Current position.
    pub r: [f64; 3],
    /// Current velocity.
    pub v: [f64; 3],
    /// Current acceleration.
    pub a: [f64; 3],
    /// First time derivative of the acceleration (jerk).
    pub adot: [f64; 3],
    /// Second time derivative of the acceleration (snap).
    pub a2dot: [f64; 3],
    /// Third time derivative of the acceleration (crackle).
    pub a3dot: [f64; 3],
    /// Predicted position (Hermite predictor stage).
    pub r_pred: [f64; 3],
    /// Predicted velocity.
    pub v_pred: [f64; 3],
    /// Mass.
    pub m: f64,
    /// Gravitational softening length.
    pub h: f64,
    /// Gravitational potential due to all other bodies.
    pub gpot: f64,
    /// Self-potential energy (internal, for subsystem detection).
    pub gpe: f64,
    /// Children of this node (empty for a single star).
    pub children: Vec<NBodyRef>,
    /// Perturbers collected for subsystem integration.
    pub perturbers: Vec<NBodyRef>,
    /// Number of stellar components contained.
    pub ncomp: usize,
    /// Internal timestep used when integrated as part of a subsystem.
    pub dt_internal: f64,
    /// Node id in the NN-system tree that produced this particle, if any.
    pub nntree_node: Option<usize>,
    /// What kind of N-body entity this is.
    pub kind: StarKind,
    /// Current block-timestep level.
    pub level: i32,
    /// Integer step size.
    pub nstep: u64,
    /// Last synchronisation tick.
    pub nlast: u64,
    /// Own timestep.
    pub dt: f64,
    /// Whether this particle is part of the currently active set.
    pub active: bool,
}

impl StarParticle {
    /// Constructs a single star at rest.
    #[must_use]
    pub fn new(r: [f64; 3], v: [f64; 3], m: f64, h: f64) -> Self {
        Self {
            r,
            v,
            a: [0.0; 3],
            adot: [0.0; 3],
            a2dot: [0.0; 3],
            a3dot: [0.0; 3],
            r_pred: r,
            v_pred: v,
            m,
            h,
            gpot: 0.0,
            gpe: 0.0,
            children: Vec::new(),
            perturbers: Vec::new(),
            ncomp: 1,
            dt_internal: 0.0,
            nntree_node: None,
            kind: StarKind::Star,
            level: 0,
            nstep: 1,
            nlast: 0,
            dt: 0.0,
            active: true,
        }
    }
}

/// A sink particle: a star that accretes nearby dense gas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sink {
    /// Index into the star array of the star this sink owns.
    pub star: usize,
    /// Accretion radius.
    pub r_sink: f64,
    /// Accumulated mass flux pending smoothed accretion.
    pub mass_flux: f64,
    /// Indices of gas particles fully or partially accreted.
    pub accreted: Vec<usize>,
    /// Fraction of eligible mass accreted per `smooth_accrete_dt` interval.
    pub smooth_accretion_fraction: f64,
}

impl Sink {
    /// Constructs a new sink owning the given star.
    #[must_use]
    pub fn new(star: usize, r_sink: f64, smooth_accretion_fraction: f64) -> Self {
        Self {
            star,
            r_sink,
            mass_flux: 0.0,
            accreted: Vec::new(),
            smooth_accretion_fraction,
        }
    }
}
