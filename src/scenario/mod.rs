//! Drone, charger, field and bird scenario
//!
//! Embeds the ensemble engine in a small world: drones protect fields
//! from birds and go to chargers before their battery runs out.

pub mod agents;
pub mod ensembles;
pub mod output;
pub mod runner;
pub mod world;

pub use agents::{Agent, AgentKind, DroneState};
pub use ensembles::{ChargerAssignment, FieldProtection};
pub use output::{RunOutput, StepStats};
pub use runner::Simulation;
pub use world::DroneWorld;
