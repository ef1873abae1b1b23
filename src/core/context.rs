//! Explicit simulation clock passed to every callback that needs the step

use crate::core::types::Step;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimulationContext {
    pub step: Step,
}

impl SimulationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(step: Step) -> Self {
        Self { step }
    }

    pub fn advance(&mut self) {
        self.step += 1;
    }

    /// Steps elapsed since `earlier`, zero if `earlier` is in the future
    pub fn elapsed_since(&self, earlier: Step) -> Step {
        self.step.saturating_sub(earlier)
    }
}
