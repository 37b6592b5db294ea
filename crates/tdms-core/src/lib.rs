//! Core of the time-domain Maxwell solver.
//!
//! Propagates the coupled electric and magnetic split fields of a Yee grid
//! forward in time with either finite-difference or pseudo-spectral spatial
//! derivatives, injects a prescribed incident field through a
//! total-field/scattered-field interface, and accumulates complex amplitudes
//! (phasors) at the requested analysis frequencies on volumes, surfaces,
//! vertex sets and detector planes.

pub mod bundle;
pub mod constants;
pub mod detector;
pub mod derivative;
pub mod domain;
pub mod export;
pub mod fields;
pub mod grid;
pub mod interpolation;
pub mod kernels;
pub mod mesh;
pub mod params;
pub mod phasors;
pub mod simulation;
pub mod source;

pub use domain::{TdmsError, TdmsErrorCategory, TdmsResult};
pub use params::{Dimension, RunMode, SimulationParameters, SolverMethod, SourceMode};
pub use simulation::Simulation;
