//! Drone Ensembles - adaptive ensemble materialization for a drone simulation

pub mod core;
pub mod ensemble;
pub mod scenario;
