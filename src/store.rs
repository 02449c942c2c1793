//! Dense, stable-index particle store.
//!
//! A plain `Vec<T>` plus a small amount of bookkeeping for ghosts and
//! dead-particle compaction. No concurrent append is ever performed
//! during a neighbour-query phase: the store is only mutated between
//! parallel phases, enforced simply by requiring `&mut self` for any
//! mutating method.

use crate::particle::{GasParticle, ParticleType};

/// Dense array-of-records store with stable indices, specialised here
/// for [`GasParticle`] (the one type that needs ghost bookkeeping and
/// dead-particle compaction; the star array is a plain `Vec` managed
/// directly by [`crate::nbody`] and [`crate::nntree`]).
#[derive(Debug, Default)]
pub struct ParticleStore {
    particles: Vec<GasParticle>,
    /// Number of real (non-ghost) particles at the front of `particles`.
    n_real: usize,
}

impl ParticleStore {
    /// Constructs an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self { particles: Vec::new(), n_real: 0 }
    }

    /// Constructs a store from a set of real (non-ghost) particles.
    #[must_use]
    pub fn from_real(particles: Vec<GasParticle>) -> Self {
        let n_real = particles.len();
        Self { particles, n_real }
    }

    /// Returns a reference to the particle at index `i`.
    #[must_use]
    pub fn get(&self, i: usize) -> &GasParticle {
        &self.particles[i]
    }

    /// Returns a mutable reference to the particle at index `i`.
    pub fn get_mut(&mut self, i: usize) -> &mut GasParticle {
        &mut self.particles[i]
    }

    /// Total number of slots, real particles plus ghosts.
    #[must_use]
    pub fn count(&self) -> usize {
        self.particles.len()
    }

    /// Number of real (non-ghost) particles.
    #[must_use]
    pub fn n_real(&self) -> usize {
        self.n_real
    }

    /// Slice over every slot (real particles followed by ghosts).
    #[must_use]
    pub fn as_slice(&self) -> &[GasParticle] {
        &self.particles
    }

    /// Mutable slice over every slot.
    pub fn as_mut_slice(&mut self) -> &mut [GasParticle] {
        &mut self.particles
    }

    /// Slice over the real particles only.
    #[must_use]
    pub fn real_slice(&self) -> &[GasParticle] {
        &self.particles[..self.n_real]
    }

    /// Appends a ghost replica of the particle at `src`, recording
    /// `iorig = src` so forces can be copied back at the end of the
    /// force step. Returns the new ghost's index.
    pub fn append_ghost(&mut self, src: usize, r: [f64; 3], v: [f64; 3]) -> usize {
        let mut ghost = self.particles[src].clone();
        ghost.r = r;
        ghost.v = v;
        ghost.r0 = r;
        ghost.v0 = v;
        ghost.iorig = Some(src);
        ghost.ptype = ParticleType::Ghost;
        self.particles.push(ghost);
        self.particles.len() - 1
    }

    /// Drops every ghost slot, restoring the store to real particles
    /// only. Called before each ghost-construction pass (ghosts are
    /// always recreated from scratch on a tree-rebuild step).
    pub fn clear_ghosts(&mut self) {
        self.particles.truncate(self.n_real);
    }

    /// Removes every `Dead`/`SinkAccreted` real particle, compacting
    /// the array in place and preserving relative order. Ghosts are
    /// expected to have been cleared first; calling this with ghosts
    /// still present only compacts within the real prefix.
    ///
    /// Returns the number of particles removed.
    pub fn delete_dead(&mut self) -> usize {
        let before = self.n_real;
        let mut ghosts: Vec<GasParticle> = self.particles.split_off(self.n_real);
        self.particles.retain(GasParticle::is_live);
        self.n_real = self.particles.len();
        self.particles.append(&mut ghosts);
        before - self.n_real
    }
}
