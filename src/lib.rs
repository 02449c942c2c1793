#![warn(clippy::all, clippy::cargo, clippy::nursery, clippy::pedantic)]
#![warn(missing_docs)]

//! GANDALF physics core: SPH gas coupled to a direct-summation N-body
//! integrator, advanced by a block-hierarchical timestep driver.
//!
//! This crate is the numerical core only. Snapshot I/O, the parameter
//! loader, Python bindings, and MPI domain decomposition are either
//! out of scope entirely or modelled as a pluggable seam
//! ([`snapshot::SnapshotSink`], [`config::Params`],
//! [`domain::DomainDecomposition`]) with no concrete heavyweight
//! implementation shipped here.

pub mod config;
pub mod context;
pub mod domain;
pub mod driver;
pub mod eos;
pub mod error;
pub mod ghost;
pub mod kernel;
pub mod nbody;
pub mod nntree;
pub mod particle;
pub mod potential;
pub mod radiation;
pub mod sink;
pub mod sph;
pub mod snapshot;
pub mod store;
pub mod tree;

pub use error::{Error, Result};
