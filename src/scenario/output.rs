//! Run output and serialization

use serde::Serialize;
use std::time::Duration;

use crate::ensemble::driver::DriverStats;
use crate::ensemble::estimator::LinearEstimator;
use crate::scenario::world::PhysicsReport;

/// What one step produced
#[derive(Debug, Clone, Default, Serialize)]
pub struct StepStats {
    pub step: u64,
    /// Ensembles materialized this step, all kinds
    pub materialized: usize,
    /// Drones sent to a charger this step
    pub sent_to_charge: usize,
    pub fields_protected: usize,
    pub protecting: usize,
    pub waiting: usize,
    pub charging: usize,
    pub drones_alive: usize,
    pub mean_crops: f64,
    /// Training rows collected so far
    pub training_rows: usize,
    pub physics: PhysicsReport,
}

/// Fitted wait-time model at the end of the run
#[derive(Debug, Clone, Serialize)]
pub struct ModelSnapshot {
    pub weights: Vec<f64>,
    pub bias: f64,
    pub mse: f64,
    pub trained_on: usize,
}

impl ModelSnapshot {
    pub fn new(model: &LinearEstimator, mse: f64, trained_on: usize) -> Self {
        Self {
            weights: model.weights.clone(),
            bias: model.bias,
            mse,
            trained_on,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunStats {
    pub steps_run: u64,
    pub simulation_time_ms: u64,
    pub drones_at_start: usize,
    pub drones_alive: usize,
    pub drones_terminated: usize,
    pub mean_crops: f64,
    pub total_sent_to_charge: usize,
    pub retrains: usize,
    pub driver: DriverStats,
}

/// Complete run output
#[derive(Debug, Clone, Serialize)]
pub struct RunOutput {
    pub steps: Vec<StepStats>,
    pub statistics: RunStats,
    pub model: Option<ModelSnapshot>,
}

impl RunOutput {
    pub fn new(steps: Vec<StepStats>, statistics: RunStats, model: Option<ModelSnapshot>) -> Self {
        Self {
            steps,
            statistics,
            model,
        }
    }

    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.statistics.simulation_time_ms)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(&self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn summary(&self) -> String {
        let s = &self.statistics;
        let mut text = format!(
            "Simulated {} steps in {}ms\n{} of {} drones alive ({} terminated), mean crops {:.2}\n{} ensembles materialized of {} attempted, {} drones sent to charge",
            s.steps_run,
            s.simulation_time_ms,
            s.drones_alive,
            s.drones_at_start,
            s.drones_terminated,
            s.mean_crops,
            s.driver.materialized,
            s.driver.attempted,
            s.total_sent_to_charge,
        );
        if let Some(model) = &self.model {
            text.push_str(&format!(
                "\nWait-time model: {} retrains on {} rows, mse {:.3}",
                s.retrains, model.trained_on, model.mse
            ));
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output() -> RunOutput {
        RunOutput::new(
            vec![StepStats {
                step: 0,
                drones_alive: 3,
                ..StepStats::default()
            }],
            RunStats {
                steps_run: 1,
                simulation_time_ms: 5,
                drones_at_start: 3,
                drones_alive: 3,
                drones_terminated: 0,
                mean_crops: 1.0,
                total_sent_to_charge: 0,
                retrains: 0,
                driver: DriverStats::default(),
            },
            None,
        )
    }

    #[test]
    fn test_json_contains_steps() {
        let json: serde_json::Value = serde_json::from_str(&output().to_json()).unwrap();
        assert_eq!(json["steps"][0]["drones_alive"], 3);
        assert_eq!(json["statistics"]["steps_run"], 1);
        assert!(json["model"].is_null());
    }

    #[test]
    fn test_summary_mentions_model_only_when_trained() {
        let mut out = output();
        assert!(!out.summary().contains("Wait-time model"));

        out.model = Some(ModelSnapshot::new(&LinearEstimator::new(3), 0.5, 10));
        assert!(out.summary().contains("Wait-time model"));
        assert!(out.summary().starts_with("Simulated 1 steps"));
    }
}
