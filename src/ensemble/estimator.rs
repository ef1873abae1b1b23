//! Estimator interface and reference implementations
//!
//! The engine treats an estimator as a black box. The two implementations
//! here exist so the scenario can close the collect, fit, predict loop
//! without an external trainer.

use crate::ensemble::collector::TrainingDataset;

/// Encoded input row
pub type FeatureVector = Vec<f64>;

/// Trained predictor consumed by estimate-bound roles
pub trait Estimator {
    fn predict(&self, features: &[f64]) -> f64;

    /// Batched prediction; one call per ensemble instance per step
    fn predict_batch(&self, batch: &[FeatureVector]) -> Vec<f64> {
        batch.iter().map(|row| self.predict(row)).collect()
    }
}

/// Predicts the same value for every input
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstantEstimator(pub f64);

impl Estimator for ConstantEstimator {
    fn predict(&self, _features: &[f64]) -> f64 {
        self.0
    }
}

/// Linear regression fitted by batch gradient descent
#[derive(Debug, Clone, PartialEq)]
pub struct LinearEstimator {
    pub weights: Vec<f64>,
    pub bias: f64,
}

impl LinearEstimator {
    pub fn new(width: usize) -> Self {
        Self {
            weights: vec![0.0; width],
            bias: 0.0,
        }
    }

    /// Fit on `dataset`, starting from the current parameters
    ///
    /// Rows whose width differs from the model are skipped.
    pub fn fit(&mut self, dataset: &TrainingDataset, epochs: usize, learning_rate: f64) {
        let rows: Vec<(&[f64], f64)> = dataset
            .iter()
            .filter(|(x, _)| x.len() == self.weights.len())
            .collect();
        if rows.is_empty() {
            return;
        }

        let n = rows.len() as f64;
        for _ in 0..epochs {
            let mut grad_w = vec![0.0; self.weights.len()];
            let mut grad_b = 0.0;

            for (x, y) in &rows {
                let error = self.predict(x) - y;
                for (g, xi) in grad_w.iter_mut().zip(x.iter()) {
                    *g += error * xi;
                }
                grad_b += error;
            }

            for (w, g) in self.weights.iter_mut().zip(grad_w) {
                *w -= learning_rate * g / n;
            }
            self.bias -= learning_rate * grad_b / n;
        }
    }

    /// Mean squared error over `dataset`
    pub fn mse(&self, dataset: &TrainingDataset) -> f64 {
        if dataset.is_empty() {
            return 0.0;
        }
        let total: f64 = dataset
            .iter()
            .map(|(x, y)| {
                let e = self.predict(x) - y;
                e * e
            })
            .sum();
        total / dataset.len() as f64
    }
}

impl Estimator for LinearEstimator {
    fn predict(&self, features: &[f64]) -> f64 {
        self.bias
            + self
                .weights
                .iter()
                .zip(features)
                .map(|(w, x)| w * x)
                .sum::<f64>()
    }
}
