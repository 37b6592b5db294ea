//! Command line front end for the time-domain Maxwell solver.

pub mod cli;
