//! Estimate-bound roles
//!
//! An [`Estimate`] is a named, shared handle to one estimator plus the
//! training dataset it learns from. An [`EstimateBinding`] attaches that
//! estimate to a single role: before the role selects, every candidate of
//! the role's component kind is encoded and predicted in one batch, and
//! the predictions are cached per ensemble instance for the current step.
//!
//! Bindings with a target also record training data. The rows encoded for
//! prediction are kept with the cache; when a role succeeds, its members'
//! rows are staged, and after the materialization pass the staged rows of
//! materialized instances become pending inputs. When the target
//! condition later holds for a member, the pending inputs are completed
//! and appended to the estimate's dataset.

use crate::core::context::SimulationContext;
use crate::core::error::{EnsembleError, Result};
use crate::core::types::{ComponentId, EnsembleId, Step};
use crate::ensemble::collector::{CollectionMode, DataCollector, TrainingDataset, UnmatchedPolicy};
use crate::ensemble::component::{Component, ComponentOf, KindOf, World};
use crate::ensemble::estimator::{Estimator, FeatureVector};
use crate::ensemble::features::{Feature, FeatureSchema, FeatureValue};
use ahash::AHashMap;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// What a binding's training target measures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    /// Steps elapsed between input and the target condition
    TimeToEvent,
    /// A value read from the component when the target condition holds
    Value,
}

struct EstimateState {
    name: String,
    estimator: Box<dyn Estimator>,
    inputs: Option<FeatureSchema>,
    target: Option<TargetKind>,
    dataset: TrainingDataset,
}

/// Shared handle to an estimator, its schema and its training data
#[derive(Clone)]
pub struct Estimate {
    inner: Rc<RefCell<EstimateState>>,
}

impl Estimate {
    pub fn new(name: impl Into<String>, estimator: impl Estimator + 'static) -> Self {
        Self {
            inner: Rc::new(RefCell::new(EstimateState {
                name: name.into(),
                estimator: Box::new(estimator),
                inputs: None,
                target: None,
                dataset: TrainingDataset::new(),
            })),
        }
    }

    pub fn name(&self) -> String {
        self.inner.borrow().name.clone()
    }

    /// Swap in a newly trained estimator
    pub fn set_estimator(&self, estimator: impl Estimator + 'static) {
        self.inner.borrow_mut().estimator = Box::new(estimator);
    }

    pub fn predict(&self, features: &[f64]) -> f64 {
        self.inner.borrow().estimator.predict(features)
    }

    pub fn predict_batch(&self, batch: &[FeatureVector]) -> Vec<f64> {
        self.inner.borrow().estimator.predict_batch(batch)
    }

    /// Input schema shared by every binding of this estimate
    pub fn input_schema(&self) -> Option<FeatureSchema> {
        self.inner.borrow().inputs.clone()
    }

    pub fn target_kind(&self) -> Option<TargetKind> {
        self.inner.borrow().target
    }

    /// Register a binding's schema; all bindings must agree
    fn register(&self, inputs: &FeatureSchema, target: Option<TargetKind>) -> Result<()> {
        let mut state = self.inner.borrow_mut();

        if let Some(existing) = &state.inputs {
            if existing != inputs {
                return Err(EnsembleError::SchemaMismatch {
                    estimator: state.name.clone(),
                    detail: format!(
                        "inputs [{}] differ from registered [{}]",
                        inputs.names().collect::<Vec<_>>().join(", "),
                        existing.names().collect::<Vec<_>>().join(", "),
                    ),
                });
            }
        }

        match (state.target, target) {
            (Some(existing), Some(new)) if existing != new => {
                return Err(EnsembleError::SchemaMismatch {
                    estimator: state.name.clone(),
                    detail: format!("target {:?} differs from registered {:?}", new, existing),
                });
            }
            (None, Some(new)) => state.target = Some(new),
            _ => {}
        }

        state.inputs = Some(inputs.clone());
        Ok(())
    }

    fn with_dataset<R>(&self, f: impl FnOnce(&mut TrainingDataset) -> R) -> R {
        f(&mut self.inner.borrow_mut().dataset)
    }

    pub fn dataset_len(&self) -> usize {
        self.inner.borrow().dataset.len()
    }

    /// Take every collected row for offline training
    pub fn drain_dataset(&self) -> TrainingDataset {
        self.inner.borrow_mut().dataset.drain()
    }
}

impl fmt::Debug for Estimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.borrow();
        f.debug_struct("Estimate")
            .field("name", &state.name)
            .field("target", &state.target)
            .field("dataset_len", &state.dataset.len())
            .finish()
    }
}

/// Predictions for one ensemble instance, valid for a single step
#[derive(Debug, Clone, Default)]
pub struct EstimateCache {
    step: Step,
    values: AHashMap<ComponentId, f64>,
    /// Encoded inputs behind each prediction; kept only for bindings with a target
    rows: AHashMap<ComponentId, Vec<f64>>,
}

impl EstimateCache {
    pub fn step(&self) -> Step {
        self.step
    }

    pub fn get(&self, component: ComponentId) -> Option<f64> {
        self.values.get(&component).copied()
    }

    /// Encoded input row the prediction for `component` was made from
    pub fn row(&self, component: ComponentId) -> Option<&[f64]> {
        self.rows.get(&component).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// When a pending input is written with its step and ensemble
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputStamp {
    pub step: Step,
    pub ensemble: EnsembleId,
}

pub type InputFn<E, W> = Box<dyn Fn(&E, &ComponentOf<W>, &W) -> FeatureValue>;
pub type ConditionFn<W> = Box<dyn Fn(&ComponentOf<W>, &W) -> bool>;
pub type ValueFn<W> = Box<dyn Fn(&ComponentOf<W>, &W) -> f64>;

pub enum Target<W: World> {
    TimeToEvent { condition: ConditionFn<W> },
    Value { condition: ConditionFn<W>, value: ValueFn<W> },
}

impl<W: World> Target<W> {
    pub fn kind(&self) -> TargetKind {
        match self {
            Target::TimeToEvent { .. } => TargetKind::TimeToEvent,
            Target::Value { .. } => TargetKind::Value,
        }
    }
}

/// An estimate attached to one role
pub struct EstimateBinding<E, W: World> {
    name: &'static str,
    estimate: Estimate,
    schema: FeatureSchema,
    inputs: Vec<InputFn<E, W>>,
    target: Option<Target<W>>,
    collector: DataCollector<ComponentId, InputStamp>,
    max_age: Option<Step>,
    caches: AHashMap<EnsembleId, EstimateCache>,
    /// Rows of members picked this step, awaiting the post-pass hook
    staged: AHashMap<EnsembleId, StagedInputs>,
}

#[derive(Debug, Clone)]
struct StagedInputs {
    step: Step,
    rows: Vec<(ComponentId, Vec<f64>)>,
}

impl<E, W: World> EstimateBinding<E, W> {
    pub fn builder(name: &'static str, estimate: &Estimate) -> EstimateBindingBuilder<E, W> {
        EstimateBindingBuilder {
            name,
            estimate: estimate.clone(),
            schema: FeatureSchema::new(),
            inputs: Vec::new(),
            target: None,
            mode: CollectionMode::default(),
            policy: UnmatchedPolicy::default(),
            max_age: None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn estimate(&self) -> &Estimate {
        &self.estimate
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn collector(&self) -> &DataCollector<ComponentId, InputStamp> {
        &self.collector
    }

    /// Encode the declared inputs for one candidate
    pub fn features(&self, instance: &E, component: &ComponentOf<W>, world: &W) -> Result<Vec<f64>> {
        let raw: Vec<FeatureValue> = self
            .inputs
            .iter()
            .map(|input| input(instance, component, world))
            .collect();
        self.schema.encode(&raw)
    }

    /// Batch-predict every candidate of `kind` for this instance
    ///
    /// Runs at most once per (instance, step); later calls in the same
    /// step reuse the cache.
    pub fn refresh(&mut self, id: EnsembleId, instance: &E, world: &W, kind: KindOf<W>, ctx: &SimulationContext) {
        if self.caches.get(&id).is_some_and(|cache| cache.step == ctx.step) {
            return;
        }

        let mut ids = Vec::new();
        let mut batch = Vec::new();
        for component in world.components().iter().filter(|c| c.kind() == kind) {
            match self.features(instance, component, world) {
                Ok(row) => {
                    ids.push(component.id());
                    batch.push(row);
                }
                Err(err) => {
                    tracing::warn!(estimate = self.name, component = %component.id(), "skipping candidate: {}", err);
                }
            }
        }

        let predictions = if batch.is_empty() {
            Vec::new()
        } else {
            self.estimate.predict_batch(&batch)
        };

        let values = ids.iter().copied().zip(predictions).collect();
        let rows = if self.target.is_some() {
            ids.into_iter().zip(batch).collect()
        } else {
            AHashMap::new()
        };
        self.caches.insert(
            id,
            EstimateCache {
                step: ctx.step,
                values,
                rows,
            },
        );
    }

    pub fn cache(&self, id: EnsembleId) -> Option<&EstimateCache> {
        self.caches.get(&id)
    }

    pub fn forget(&mut self, id: EnsembleId) {
        self.caches.remove(&id);
        self.staged.remove(&id);
    }

    pub fn clear_caches(&mut self) {
        self.caches.clear();
        self.staged.clear();
    }

    /// Stage the selection-time rows of `members` picked by instance `id`
    ///
    /// Rows come from this step's cache, so they are exactly what the
    /// estimator saw when the members were chosen. Replaces anything
    /// staged earlier for the instance.
    pub fn stage_inputs(&mut self, id: EnsembleId, members: &[ComponentId], ctx: &SimulationContext) {
        if self.target.is_none() {
            return;
        }
        let Some(cache) = self.caches.get(&id).filter(|c| c.step == ctx.step) else {
            tracing::warn!(estimate = self.name, ensemble = %id, "no cache for this step, inputs not staged");
            return;
        };

        let mut rows = Vec::with_capacity(members.len());
        for &member in members {
            match cache.row(member) {
                Some(row) => rows.push((member, row.to_vec())),
                None => tracing::warn!(estimate = self.name, component = %member, "no encoded input for member"),
            }
        }
        self.staged.insert(id, StagedInputs { step: ctx.step, rows });
    }

    /// Drop rows staged for `id` without recording them
    pub fn discard_staged(&mut self, id: EnsembleId) {
        self.staged.remove(&id);
    }

    pub fn clear_staged(&mut self) {
        self.staged.clear();
    }

    pub fn staged_len(&self, id: EnsembleId) -> usize {
        self.staged.get(&id).map_or(0, |s| s.rows.len())
    }

    /// Move the rows staged for instance `id` into the collector
    ///
    /// Returns the number of inputs recorded.
    pub fn record_inputs(&mut self, id: EnsembleId) -> usize {
        let Some(staged) = self.staged.remove(&id) else {
            return 0;
        };
        let count = staged.rows.len();
        for (member, row) in staged.rows {
            self.collector.collect_inputs(
                member,
                row,
                InputStamp {
                    step: staged.step,
                    ensemble: id,
                },
            );
        }
        count
    }

    /// Complete pending inputs whose target condition now holds
    ///
    /// Inputs for components no longer in the world, or older than the
    /// configured maximum age, are evicted. Returns rows appended.
    pub fn collect_targets(&mut self, world: &W, ctx: &SimulationContext) -> Result<usize> {
        let Self {
            name,
            estimate,
            target,
            collector,
            max_age,
            ..
        } = self;
        let Some(target) = target.as_ref() else {
            return Ok(0);
        };

        let pending: Vec<ComponentId> = collector.pending_ids().copied().collect();
        let mut appended = 0;

        for id in pending {
            let Some(component) = world.component(id) else {
                collector.evict(&id);
                continue;
            };

            match target {
                Target::TimeToEvent { condition } => {
                    if condition(component, world) {
                        appended += estimate.with_dataset(|sink| {
                            collector.collect_targets_with(&id, sink, |stamp| ctx.elapsed_since(stamp.step) as f64)
                        })?;
                    }
                }
                Target::Value { condition, value } => {
                    if condition(component, world) {
                        let y = value(component, world);
                        appended += estimate.with_dataset(|sink| collector.collect_targets(&id, y, sink))?;
                    }
                }
            }
        }

        if let Some(age) = *max_age {
            let evicted = collector.evict_where(|_, stamp| ctx.elapsed_since(stamp.step) > age);
            if evicted > 0 {
                tracing::debug!(estimate = *name, evicted, "evicted stale training inputs");
            }
        }

        Ok(appended)
    }
}

pub struct EstimateBindingBuilder<E, W: World> {
    name: &'static str,
    estimate: Estimate,
    schema: FeatureSchema,
    inputs: Vec<InputFn<E, W>>,
    target: Option<Target<W>>,
    mode: CollectionMode,
    policy: UnmatchedPolicy,
    max_age: Option<Step>,
}

impl<E, W: World> EstimateBindingBuilder<E, W> {
    /// Declare an input feature computed from (instance, candidate, world)
    pub fn input<F>(mut self, name: impl Into<String>, feature: Feature, f: F) -> Self
    where
        F: Fn(&E, &ComponentOf<W>, &W) -> FeatureValue + 'static,
    {
        self.schema.push(name, feature);
        self.inputs.push(Box::new(f));
        self
    }

    /// Target is the number of steps until `condition` holds
    pub fn time_to_event<F>(mut self, condition: F) -> Self
    where
        F: Fn(&ComponentOf<W>, &W) -> bool + 'static,
    {
        self.target = Some(Target::TimeToEvent {
            condition: Box::new(condition),
        });
        self
    }

    /// Target is `value` read when `condition` holds
    pub fn value_target<C, V>(mut self, condition: C, value: V) -> Self
    where
        C: Fn(&ComponentOf<W>, &W) -> bool + 'static,
        V: Fn(&ComponentOf<W>, &W) -> f64 + 'static,
    {
        self.target = Some(Target::Value {
            condition: Box::new(condition),
            value: Box::new(value),
        });
        self
    }

    pub fn mode(mut self, mode: CollectionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn unmatched(mut self, policy: UnmatchedPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Evict pending inputs older than `steps`
    pub fn max_age(mut self, steps: Step) -> Self {
        self.max_age = Some(steps);
        self
    }

    pub fn build(self) -> Result<EstimateBinding<E, W>> {
        if self.inputs.is_empty() {
            return Err(EnsembleError::InvalidConfig(format!(
                "estimate binding '{}' declares no inputs",
                self.name
            )));
        }

        self.estimate
            .register(&self.schema, self.target.as_ref().map(Target::kind))?;

        Ok(EstimateBinding {
            name: self.name,
            estimate: self.estimate,
            schema: self.schema,
            inputs: self.inputs,
            target: self.target,
            collector: DataCollector::new(self.mode).with_policy(self.policy),
            max_age: self.max_age,
            caches: AHashMap::new(),
            staged: AHashMap::new(),
        })
    }
}
