//! Ensemble materialization engine
//!
//! Ensembles are groups of components filling named roles. Each step the
//! driver attempts every ensemble instance in priority order; an instance
//! materializes only when all of its roles meet their minimum cardinality,
//! and a materialized instance acts on the world before the next one is
//! evaluated.

pub mod cardinality;
pub mod collector;
pub mod component;
pub mod driver;
pub mod ensemble;
pub mod estimate;
pub mod estimator;
pub mod features;
pub mod materialized;
pub mod role;

#[cfg(test)]
mod testing;

pub use cardinality::Cardinality;
pub use collector::{CollectionMode, DataCollector, TrainingDataset, UnmatchedPolicy};
pub use component::{Component, ComponentOf, KindOf, World};
pub use driver::{materialize_step, DriverStats, MaterializationDriver};
pub use ensemble::{Ensemble, EnsembleKind, EnsembleSet, Members};
pub use estimate::{Estimate, EstimateBinding, TargetKind};
pub use estimator::{ConstantEstimator, Estimator, FeatureVector, LinearEstimator};
pub use features::{Feature, FeatureSchema, FeatureValue};
pub use materialized::{Materialized, MaterializedEnsemble, RoleSelection};
pub use role::{Multiplicity, RoleBuilder, RoleDescriptor, SelectionView};
