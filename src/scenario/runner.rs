//! Main simulation loop
//!
//! Each step:
//! 1. Release last step's field protectors and rebuild field ensembles
//! 2. Run the materialization driver (chargers first, then fields)
//! 3. Advance world physics
//! 4. Periodically refit the wait-time estimator on collected data

use std::time::Instant;

use crate::core::config::ScenarioConfig;
use crate::core::context::SimulationContext;
use crate::core::error::Result;
use crate::ensemble::collector::TrainingDataset;
use crate::ensemble::driver::MaterializationDriver;
use crate::ensemble::ensemble::{EnsembleKind, EnsembleSet};
use crate::ensemble::estimate::Estimate;
use crate::ensemble::estimator::{ConstantEstimator, LinearEstimator};
use crate::scenario::agents::DroneState;
use crate::scenario::ensembles::{
    charger_assignments, field_protection, threatened_fields, ChargerAssignment, FieldProtection, CHARGER_ROLE,
};
use crate::scenario::output::{ModelSnapshot, RunOutput, RunStats, StepStats};
use crate::scenario::world::DroneWorld;

pub struct Simulation {
    config: ScenarioConfig,
    world: DroneWorld,
    chargers: EnsembleKind<ChargerAssignment, DroneWorld>,
    fields: EnsembleKind<FieldProtection, DroneWorld>,
    estimate: Estimate,
    model: LinearEstimator,
    /// Every row drained from the estimate so far
    training: TrainingDataset,
    driver: MaterializationDriver,
    ctx: SimulationContext,
    retrains: usize,
    drones_at_start: usize,
}

impl Simulation {
    pub fn new(config: ScenarioConfig) -> Result<Self> {
        config.validate()?;

        let world = DroneWorld::generate(&config);
        // Untrained: assume no wait until the first refit
        let estimate = Estimate::new("charging_wait", ConstantEstimator(0.0));
        let chargers = charger_assignments(&world, &config, &estimate)?;
        let fields = field_protection(&config)?;
        let width = estimate.input_schema().map_or(0, |s| s.width());
        let drones_at_start = world.drones_alive();

        tracing::info!(
            drones = drones_at_start,
            chargers = chargers.len(),
            seed = config.world.seed,
            "simulation initialized"
        );

        Ok(Self {
            config,
            world,
            chargers,
            fields,
            estimate,
            model: LinearEstimator::new(width),
            training: TrainingDataset::new(),
            driver: MaterializationDriver::new(),
            ctx: SimulationContext::new(),
            retrains: 0,
            drones_at_start,
        })
    }

    pub fn world(&self) -> &DroneWorld {
        &self.world
    }

    pub fn context(&self) -> &SimulationContext {
        &self.ctx
    }

    pub fn estimate(&self) -> &Estimate {
        &self.estimate
    }

    pub fn chargers(&self) -> &EnsembleKind<ChargerAssignment, DroneWorld> {
        &self.chargers
    }

    /// Rows collected so far, drained or not
    pub fn training_rows(&self) -> usize {
        self.training.len() + self.estimate.dataset_len()
    }

    pub fn step(&mut self) -> Result<StepStats> {
        self.world.release_protectors();
        let threatened = threatened_fields(&self.world, self.config.birds.field_radius);
        self.fields.rebuild(threatened);

        let materialized = {
            let sets: &mut [&mut dyn EnsembleSet<DroneWorld>] = &mut [&mut self.chargers, &mut self.fields];
            self.driver.run_step(&mut self.world, sets, &self.ctx)?
        };

        let physics = self.world.step_physics(&self.ctx);

        if (self.ctx.step + 1) % self.config.estimator.retrain_interval == 0 {
            self.retrain();
        }

        let stats = StepStats {
            step: self.ctx.step,
            materialized: materialized.len(),
            sent_to_charge: materialized
                .of_kind::<ChargerAssignment>()
                .map(|m| m.members(CHARGER_ROLE).len())
                .sum(),
            fields_protected: materialized.of_kind::<FieldProtection>().count(),
            protecting: self.world.drones_in(DroneState::Protecting),
            waiting: self.world.drones_in(DroneState::Waiting),
            charging: self.world.drones_in(DroneState::Charging),
            drones_alive: self.world.drones_alive(),
            mean_crops: self.world.mean_crops(),
            training_rows: self.training_rows(),
            physics,
        };

        tracing::debug!(
            step = stats.step,
            materialized = stats.materialized,
            sent_to_charge = stats.sent_to_charge,
            drones_alive = stats.drones_alive,
            "step complete"
        );

        self.ctx.advance();
        Ok(stats)
    }

    /// Refit the wait-time model on every row collected so far
    fn retrain(&mut self) {
        self.training.extend(self.estimate.drain_dataset());
        if self.training.is_empty() {
            return;
        }

        let epochs = self.config.estimator.epochs;
        let learning_rate = self.config.estimator.learning_rate;
        self.model.fit(&self.training, epochs, learning_rate);
        self.estimate.set_estimator(self.model.clone());
        self.retrains += 1;

        tracing::info!(
            step = self.ctx.step,
            rows = self.training.len(),
            mse = self.model.mse(&self.training),
            "wait-time estimator refitted"
        );
    }

    pub fn run(&mut self, steps: u64) -> Result<RunOutput> {
        let start = Instant::now();
        let mut history = Vec::new();

        for _ in 0..steps {
            history.push(self.step()?);
        }

        let elapsed = start.elapsed();
        let model = (self.retrains > 0)
            .then(|| ModelSnapshot::new(&self.model, self.model.mse(&self.training), self.training.len()));

        let statistics = RunStats {
            steps_run: steps,
            simulation_time_ms: elapsed.as_millis() as u64,
            drones_at_start: self.drones_at_start,
            drones_alive: self.world.drones_alive(),
            drones_terminated: self.world.terminated(),
            mean_crops: self.world.mean_crops(),
            total_sent_to_charge: history.iter().map(|s| s.sent_to_charge).sum(),
            retrains: self.retrains,
            driver: self.driver.stats(),
        };

        Ok(RunOutput::new(history, statistics, model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = ScenarioConfig::default();
        config.drones.low_battery = -1.0;
        assert!(Simulation::new(config).is_err());
    }

    #[test]
    fn test_step_advances_clock() {
        let mut sim = Simulation::new(ScenarioConfig::default()).unwrap();
        let first = sim.step().unwrap();
        let second = sim.step().unwrap();
        assert_eq!(first.step, 0);
        assert_eq!(second.step, 1);
        assert_eq!(sim.context().step, 2);
    }

    #[test]
    fn test_charger_instances_persist_across_steps() {
        let mut sim = Simulation::new(ScenarioConfig::default()).unwrap();
        let before: Vec<_> = sim.chargers().instances().map(|(id, _)| id).collect();
        sim.run(5).unwrap();
        let after: Vec<_> = sim.chargers().instances().map(|(id, _)| id).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_run_records_one_entry_per_step() {
        let mut sim = Simulation::new(ScenarioConfig::default()).unwrap();
        assert!(sim.run(0).unwrap().steps.is_empty());

        let out = sim.run(3).unwrap();
        assert_eq!(out.steps.iter().map(|s| s.step).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(out.statistics.steps_run, 3);
    }
}
