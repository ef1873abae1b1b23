//! Role descriptors and greedy member selection
//!
//! A role describes which components may fill it (kind, predicate),
//! how many are needed (cardinality) and which are preferred (utility).
//! Selection state is not stored on ensemble instances; each descriptor
//! owns a side table keyed by [`EnsembleId`] holding the current
//! selection of every instance it has evaluated this step.

use crate::core::context::SimulationContext;
use crate::core::error::{EnsembleError, Result};
use crate::core::types::{ComponentId, EnsembleId};
use crate::ensemble::cardinality::Cardinality;
use crate::ensemble::component::{Component, ComponentOf, KindOf, World};
use crate::ensemble::estimate::{EstimateBinding, EstimateCache};
use crate::ensemble::materialized::{Materialized, RoleSelection};
use ahash::AHashMap;
use ordered_float::OrderedFloat;
use std::sync::atomic::{AtomicU64, Ordering};

static DECLARATION_COUNTER: AtomicU64 = AtomicU64::new(0);

pub type CardinalityFn<E, W> = Box<dyn Fn(&E, &W) -> Cardinality>;
pub type SelectFn<E, W> = Box<dyn Fn(&E, &ComponentOf<W>, &SelectionView<'_, W>) -> bool>;
pub type UtilityFn<E, W> = Box<dyn Fn(&E, &ComponentOf<W>, &SelectionView<'_, W>) -> f64>;

/// Whether a role exposes a single member or a list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Multiplicity {
    One,
    Many,
}

/// Everything a predicate or utility may look at besides the candidate
pub struct SelectionView<'a, W: World> {
    pub world: &'a W,
    pub ctx: &'a SimulationContext,
    /// Ensembles materialized earlier this step
    pub others: &'a Materialized,
    /// Members this role already picked in the current attempt
    pub selected: &'a [ComponentId],
    /// Selections of roles declared earlier on the same instance
    pub siblings: &'a [RoleSelection],
    role: &'static str,
    estimates: Option<&'a EstimateCache>,
}

impl<'a, W: World> SelectionView<'a, W> {
    /// Cached prediction for `component`, computed this step for this instance
    pub fn estimate(&self, component: ComponentId) -> Option<f64> {
        let Some(cache) = self.estimates else {
            tracing::warn!(role = self.role, "estimate queried on a role without an estimate binding");
            return None;
        };
        let value = cache.get(component);
        if value.is_none() {
            tracing::warn!(role = self.role, component = %component, "no cached estimate for component");
        }
        value
    }

    /// Members of an earlier sibling role
    pub fn sibling(&self, role: &str) -> &[ComponentId] {
        self.siblings
            .iter()
            .find(|s| s.role == role)
            .map(|s| s.members.as_slice())
            .unwrap_or(&[])
    }

    pub fn selected_by_sibling(&self, component: ComponentId) -> bool {
        self.siblings.iter().any(|s| s.members.contains(&component))
    }
}

pub struct RoleDescriptor<E, W: World> {
    name: &'static str,
    component_kind: KindOf<W>,
    multiplicity: Multiplicity,
    declaration_order: u64,
    cardinality: CardinalityFn<E, W>,
    select: SelectFn<E, W>,
    utility: Option<UtilityFn<E, W>>,
    disjoint_from_siblings: bool,
    estimate: Option<EstimateBinding<E, W>>,
    selections: AHashMap<EnsembleId, Option<Vec<ComponentId>>>,
}

impl<E, W: World> RoleDescriptor<E, W> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn component_kind(&self) -> KindOf<W> {
        self.component_kind
    }

    pub fn multiplicity(&self) -> Multiplicity {
        self.multiplicity
    }

    pub fn declaration_order(&self) -> u64 {
        self.declaration_order
    }

    pub fn estimate(&self) -> Option<&EstimateBinding<E, W>> {
        self.estimate.as_ref()
    }

    pub fn estimate_mut(&mut self) -> Option<&mut EstimateBinding<E, W>> {
        self.estimate.as_mut()
    }

    /// Current selection for `instance`; `None` if not attempted or reset
    pub fn get(&self, instance: EnsembleId) -> Option<&[ComponentId]> {
        self.selections
            .get(&instance)
            .and_then(|s| s.as_deref())
    }

    /// Mark `instance` as not evaluated
    pub fn reset(&mut self, instance: EnsembleId) {
        self.selections.insert(instance, None);
        if let Some(estimate) = self.estimate.as_mut() {
            estimate.discard_staged(instance);
        }
    }

    /// Reset every instance, keeping the table's allocation
    pub fn reset_all(&mut self) {
        for selection in self.selections.values_mut() {
            *selection = None;
        }
        if let Some(estimate) = self.estimate.as_mut() {
            estimate.clear_staged();
        }
    }

    /// Drop all state held for `instance`
    pub fn forget(&mut self, instance: EnsembleId) {
        self.selections.remove(&instance);
        if let Some(estimate) = self.estimate.as_mut() {
            estimate.forget(instance);
        }
    }

    pub fn forget_all(&mut self) {
        self.selections.clear();
        if let Some(estimate) = self.estimate.as_mut() {
            estimate.clear_caches();
        }
    }

    fn utility_of(&self, instance: &E, candidate: &ComponentOf<W>, view: &SelectionView<'_, W>) -> OrderedFloat<f64> {
        let value = match &self.utility {
            Some(utility) => utility(instance, candidate, view),
            None => 0.0,
        };
        // NaN never wins
        OrderedFloat(if value.is_nan() { f64::NEG_INFINITY } else { value })
    }

    /// Greedily select members for `instance`
    ///
    /// Each iteration rebuilds the candidate pool (kind matches, not yet
    /// picked, predicate holds) and takes the highest utility, breaking
    /// ties on the lowest component id. Stops at `max` or when the pool
    /// is empty. Returns false if fewer than `min` were picked; the
    /// partial selection stays in the side table until the caller resets.
    pub fn execute(
        &mut self,
        instance_id: EnsembleId,
        instance: &E,
        world: &W,
        others: &Materialized,
        siblings: &[RoleSelection],
        ctx: &SimulationContext,
    ) -> bool {
        let cardinality = (self.cardinality)(instance, world);
        if !cardinality.is_satisfiable() {
            tracing::warn!(role = self.name, ?cardinality, "cardinality min exceeds max");
            self.selections.insert(instance_id, Some(Vec::new()));
            return false;
        }
        let (min, max) = cardinality.bounds();

        if let Some(estimate) = self.estimate.as_mut() {
            estimate.refresh(instance_id, instance, world, self.component_kind, ctx);
        }

        let mut selected: Vec<ComponentId> = Vec::with_capacity(max.min(world.components().len()));

        while selected.len() < max {
            let best = {
                let view = SelectionView {
                    world,
                    ctx,
                    others,
                    selected: &selected,
                    siblings,
                    role: self.name,
                    estimates: self.estimate.as_ref().and_then(|e| e.cache(instance_id)),
                };

                world
                    .components()
                    .iter()
                    .filter(|c| c.kind() == self.component_kind)
                    .filter(|c| !selected.contains(&c.id()))
                    .filter(|c| !(self.disjoint_from_siblings && view.selected_by_sibling(c.id())))
                    .filter(|c| (self.select)(instance, c, &view))
                    .map(|c| (self.utility_of(instance, c, &view), c.id()))
                    .max_by(|(ua, ida), (ub, idb)| ua.cmp(ub).then_with(|| idb.cmp(ida)))
            };

            match best {
                Some((utility, id)) => {
                    tracing::trace!(role = self.name, ensemble = %instance_id, component = %id, utility = utility.0, "picked");
                    selected.push(id);
                }
                None => break,
            }
        }

        let satisfied = selected.len() >= min;
        if satisfied {
            if let Some(estimate) = self.estimate.as_mut() {
                estimate.stage_inputs(instance_id, &selected, ctx);
            }
        }
        tracing::trace!(
            role = self.name,
            ensemble = %instance_id,
            picked = selected.len(),
            min,
            max,
            satisfied,
            "role executed"
        );
        self.selections.insert(instance_id, Some(selected));
        satisfied
    }

    /// Record the inputs staged when this role selected for `instance_id`
    pub fn record_estimate_inputs(&mut self, instance_id: EnsembleId) -> usize {
        match self.estimate.as_mut() {
            Some(estimate) if self.selections.get(&instance_id).is_some_and(Option::is_some) => {
                estimate.record_inputs(instance_id)
            }
            _ => 0,
        }
    }

    /// Complete estimate training targets; no-op for roles without a binding
    pub fn collect_estimate_targets(&mut self, world: &W, ctx: &SimulationContext) -> Result<usize> {
        match self.estimate.as_mut() {
            Some(estimate) => estimate.collect_targets(world, ctx),
            None => Ok(0),
        }
    }
}

/// Declares a role
///
/// ```ignore
/// let role = RoleBuilder::some_of("drones", Kind::Drone)
///     .with_cardinality(|e: &Patrol, _| (1, e.places).into())
///     .with_select(|e, c, view| !view.others.claims(c.id()))
///     .with_utility(|e, c, _| -distance(e, c))
///     .build()?;
/// ```
pub struct RoleBuilder<E, W: World> {
    name: &'static str,
    component_kind: KindOf<W>,
    multiplicity: Multiplicity,
    declaration_order: u64,
    cardinality: Option<CardinalityFn<E, W>>,
    select: Option<SelectFn<E, W>>,
    utility: Option<UtilityFn<E, W>>,
    disjoint_from_siblings: bool,
    estimate: Option<EstimateBinding<E, W>>,
}

impl<E: 'static, W: World + 'static> RoleBuilder<E, W> {
    fn declare(name: &'static str, component_kind: KindOf<W>, multiplicity: Multiplicity) -> Self {
        Self {
            name,
            component_kind,
            multiplicity,
            declaration_order: DECLARATION_COUNTER.fetch_add(1, Ordering::Relaxed),
            cardinality: None,
            select: None,
            utility: None,
            disjoint_from_siblings: false,
            estimate: None,
        }
    }

    /// Role holding a list of members; needs a cardinality
    pub fn some_of(name: &'static str, component_kind: KindOf<W>) -> Self {
        Self::declare(name, component_kind, Multiplicity::Many)
    }

    /// Role holding exactly one member
    pub fn one_of(name: &'static str, component_kind: KindOf<W>) -> Self {
        Self::declare(name, component_kind, Multiplicity::One).with_fixed_cardinality(1)
    }

    pub fn some_of_with_estimate(name: &'static str, component_kind: KindOf<W>, estimate: EstimateBinding<E, W>) -> Self {
        Self::some_of(name, component_kind).with_estimate(estimate)
    }

    pub fn one_of_with_estimate(name: &'static str, component_kind: KindOf<W>, estimate: EstimateBinding<E, W>) -> Self {
        Self::one_of(name, component_kind).with_estimate(estimate)
    }

    pub fn declaration_order(&self) -> u64 {
        self.declaration_order
    }

    /// Cardinality computed from the instance each attempt
    pub fn with_cardinality<F>(mut self, f: F) -> Self
    where
        F: Fn(&E, &W) -> Cardinality + 'static,
    {
        self.cardinality = Some(Box::new(f));
        self
    }

    pub fn with_fixed_cardinality(self, cardinality: impl Into<Cardinality>) -> Self {
        let cardinality = cardinality.into();
        self.with_cardinality(move |_, _| cardinality)
    }

    pub fn with_select<F>(mut self, f: F) -> Self
    where
        F: Fn(&E, &ComponentOf<W>, &SelectionView<'_, W>) -> bool + 'static,
    {
        self.select = Some(Box::new(f));
        self
    }

    /// Higher utility is picked first; defaults to 0 for every candidate
    pub fn with_utility<F>(mut self, f: F) -> Self
    where
        F: Fn(&E, &ComponentOf<W>, &SelectionView<'_, W>) -> f64 + 'static,
    {
        self.utility = Some(Box::new(f));
        self
    }

    /// Exclude components already picked by earlier roles on the same instance
    pub fn disjoint_from_siblings(mut self) -> Self {
        self.disjoint_from_siblings = true;
        self
    }

    pub fn with_estimate(mut self, estimate: EstimateBinding<E, W>) -> Self {
        self.estimate = Some(estimate);
        self
    }

    pub fn build(self) -> Result<RoleDescriptor<E, W>> {
        let select = self
            .select
            .ok_or_else(|| EnsembleError::MissingSelect(self.name.to_string()))?;
        let cardinality = self
            .cardinality
            .ok_or_else(|| EnsembleError::MissingCardinality(self.name.to_string()))?;

        Ok(RoleDescriptor {
            name: self.name,
            component_kind: self.component_kind,
            multiplicity: self.multiplicity,
            declaration_order: self.declaration_order,
            cardinality,
            select,
            utility: self.utility,
            disjoint_from_siblings: self.disjoint_from_siblings,
            estimate: self.estimate,
            selections: AHashMap::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ensemble::testing::{probe_world, Probe, ProbeKind, ProbeWorld};

    fn role(cardinality: (usize, usize)) -> RoleDescriptor<Probe, ProbeWorld> {
        RoleBuilder::<Probe, ProbeWorld>::some_of("workers", ProbeKind::Worker)
            .with_fixed_cardinality(cardinality)
            .with_select(|_, c, _| c.value >= 0.0)
            .with_utility(|_, c, _| c.value)
            .build()
            .unwrap()
    }

    fn run(role: &mut RoleDescriptor<Probe, ProbeWorld>, world: &ProbeWorld) -> (EnsembleId, bool) {
        let id = EnsembleId::next();
        let ok = role.execute(id, &Probe::default(), world, &Materialized::new(), &[], &SimulationContext::new());
        (id, ok)
    }

    #[test]
    fn test_missing_select_is_config_error() {
        let result = RoleBuilder::<Probe, ProbeWorld>::some_of("x", ProbeKind::Worker)
            .with_fixed_cardinality(1)
            .build();
        assert!(matches!(result, Err(EnsembleError::MissingSelect(_))));
    }

    #[test]
    fn test_missing_cardinality_is_config_error() {
        let result = RoleBuilder::<Probe, ProbeWorld>::some_of("x", ProbeKind::Worker)
            .with_select(|_, _, _| true)
            .build();
        assert!(matches!(result, Err(EnsembleError::MissingCardinality(_))));
    }

    #[test]
    fn test_one_of_has_implicit_cardinality() {
        let role = RoleBuilder::<Probe, ProbeWorld>::one_of("x", ProbeKind::Worker)
            .with_select(|_, _, _| true)
            .build()
            .unwrap();
        assert_eq!(role.multiplicity(), Multiplicity::One);
    }

    #[test]
    fn test_declaration_order_is_monotonic() {
        let a = RoleBuilder::<Probe, ProbeWorld>::some_of("a", ProbeKind::Worker);
        let b = RoleBuilder::<Probe, ProbeWorld>::some_of("b", ProbeKind::Worker);
        assert!(b.declaration_order() > a.declaration_order());
    }

    #[test]
    fn test_selects_highest_utility_first() {
        let world = probe_world(&[1.0, 5.0, 3.0]);
        let mut role = role((1, 2));
        let (id, ok) = run(&mut role, &world);
        assert!(ok);
        assert_eq!(role.get(id), Some(&[ComponentId(1), ComponentId(2)][..]));
    }

    #[test]
    fn test_range_with_fewer_candidates_succeeds() {
        let mut world = probe_world(&[1.0, 2.0, -1.0]);
        world.items[2].value = -1.0;
        let mut role = role((1, 3));
        let (id, ok) = run(&mut role, &world);
        assert!(ok);
        assert_eq!(role.get(id).map(|s| s.len()), Some(2));
    }

    #[test]
    fn test_below_minimum_fails() {
        let world = probe_world(&[1.0]);
        let mut role = role((2, 3));
        let (_, ok) = run(&mut role, &world);
        assert!(!ok);
    }

    #[test]
    fn test_ties_break_on_lowest_id() {
        let world = probe_world(&[2.0, 2.0, 2.0]);
        let mut role = role((2, 2));
        let (id, ok) = run(&mut role, &world);
        assert!(ok);
        assert_eq!(role.get(id), Some(&[ComponentId(0), ComponentId(1)][..]));
    }

    #[test]
    fn test_nan_utility_never_wins() {
        let world = probe_world(&[f64::NAN, 0.5]);
        let mut role = role((1, 1));
        let (id, _) = run(&mut role, &world);
        assert_eq!(role.get(id), Some(&[ComponentId(1)][..]));
    }

    #[test]
    fn test_other_kinds_are_never_candidates() {
        let mut world = probe_world(&[9.0, 1.0]);
        world.items[0].kind = ProbeKind::Other;
        let mut role = role((1, 2));
        let (id, _) = run(&mut role, &world);
        assert_eq!(role.get(id), Some(&[ComponentId(1)][..]));
    }

    #[test]
    fn test_predicate_sees_in_progress_selection() {
        // At most one pick with value above 2.0
        let world = probe_world(&[3.0, 4.0, 1.0]);
        let mut role: RoleDescriptor<Probe, ProbeWorld> = RoleBuilder::<Probe, ProbeWorld>::some_of("w", ProbeKind::Worker)
            .with_fixed_cardinality((1, 3))
            .with_select(|_, c, view| {
                let high_picked = view
                    .selected
                    .iter()
                    .any(|id| view.world.items[id.0 as usize].value > 2.0);
                !(high_picked && c.value > 2.0)
            })
            .with_utility(|_, c, _| c.value)
            .build()
            .unwrap();

        let (id, ok) = run(&mut role, &world);
        assert!(ok);
        assert_eq!(role.get(id), Some(&[ComponentId(1), ComponentId(2)][..]));
    }

    #[test]
    fn test_inverted_dynamic_cardinality_fails() {
        let world = probe_world(&[1.0, 2.0]);
        let mut role: RoleDescriptor<Probe, ProbeWorld> = RoleBuilder::<Probe, ProbeWorld>::some_of("w", ProbeKind::Worker)
            .with_cardinality(|_, _| Cardinality::range(2, 1))
            .with_select(|_, _, _| true)
            .build()
            .unwrap();
        let (_, ok) = run(&mut role, &world);
        assert!(!ok);
    }

    #[test]
    fn test_reset_distinguishes_not_attempted() {
        let world = probe_world(&[]);
        let mut role = role((0, 2));
        let (id, ok) = run(&mut role, &world);
        assert!(ok);
        assert_eq!(role.get(id), Some(&[][..]));

        role.reset(id);
        assert_eq!(role.get(id), None);
    }
}
