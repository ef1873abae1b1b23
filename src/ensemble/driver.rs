//! Materialization driver - the per-step ensemble loop
//!
//! Each step:
//! 1. Clear last step's role selections
//! 2. Order every candidate instance by descending priority (stable)
//! 3. Materialize in that order; actuate each success immediately so
//!    later ensembles observe its side effects
//! 4. Run data-collection hooks once the pass is complete
//!
//! Returns the ensembles that materialized, in materialization order.

use crate::core::context::SimulationContext;
use crate::core::error::Result;
use crate::ensemble::component::World;
use crate::ensemble::ensemble::EnsembleSet;
use crate::ensemble::materialized::Materialized;
use ordered_float::OrderedFloat;
use serde::Serialize;

/// Cumulative counters across steps
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DriverStats {
    pub steps: u64,
    pub attempted: u64,
    pub materialized: u64,
    pub training_rows: u64,
}

impl DriverStats {
    pub fn failed(&self) -> u64 {
        self.attempted - self.materialized
    }
}

#[derive(Debug, Clone)]
pub struct MaterializationDriver {
    collect_data: bool,
    stats: DriverStats,
}

impl Default for MaterializationDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MaterializationDriver {
    pub fn new() -> Self {
        Self {
            collect_data: true,
            stats: DriverStats::default(),
        }
    }

    /// Skip the data-collection hooks after each pass
    pub fn without_collection(mut self) -> Self {
        self.collect_data = false;
        self
    }

    pub fn stats(&self) -> DriverStats {
        self.stats
    }

    /// Run one materialization pass over every ensemble set
    pub fn run_step<W: World>(
        &mut self,
        world: &mut W,
        sets: &mut [&mut dyn EnsembleSet<W>],
        ctx: &SimulationContext,
    ) -> Result<Materialized> {
        for set in sets.iter_mut() {
            set.begin_step();
        }

        let order = attempt_order(world, sets, ctx);
        let mut materialized = Materialized::new();

        for &(set_index, instance_index) in &order {
            let set = &mut sets[set_index];
            if let Some(entry) = set.try_materialize(instance_index, world, &materialized, ctx) {
                tracing::trace!(kind = entry.kind_name, id = %entry.id, priority = entry.priority, "materialized");
                materialized.push(entry);
                set.actuate(instance_index, world, ctx);
            }
        }

        let mut rows = 0;
        if self.collect_data {
            for set in sets.iter_mut() {
                rows += set.collect(world, &materialized, ctx)?;
            }
        }

        self.stats.steps += 1;
        self.stats.attempted += order.len() as u64;
        self.stats.materialized += materialized.len() as u64;
        self.stats.training_rows += rows as u64;

        tracing::debug!(
            step = ctx.step,
            attempted = order.len(),
            materialized = materialized.len(),
            training_rows = rows,
            "materialization pass complete"
        );

        Ok(materialized)
    }
}

/// One pass with a throwaway driver
pub fn materialize_step<W: World>(
    world: &mut W,
    sets: &mut [&mut dyn EnsembleSet<W>],
    ctx: &SimulationContext,
) -> Result<Materialized> {
    MaterializationDriver::new().run_step(world, sets, ctx)
}

/// `(set, instance)` pairs in attempt order
///
/// Sorted by descending priority via a reversed comparison; the sort is
/// stable, so equal priorities keep set order, then instance order.
/// NaN priorities sort last.
pub fn attempt_order<W: World>(
    world: &W,
    sets: &[&mut dyn EnsembleSet<W>],
    ctx: &SimulationContext,
) -> Vec<(usize, usize)> {
    let mut candidates: Vec<(usize, usize, OrderedFloat<f64>)> = Vec::new();
    for (set_index, set) in sets.iter().enumerate() {
        for instance_index in 0..set.instance_count() {
            let priority = set.priority(instance_index, world, ctx);
            let priority = if priority.is_nan() { f64::NEG_INFINITY } else { priority };
            candidates.push((set_index, instance_index, OrderedFloat(priority)));
        }
    }

    candidates.sort_by(|a, b| b.2.cmp(&a.2));
    candidates.into_iter().map(|(s, i, _)| (s, i)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ComponentId;
    use crate::ensemble::ensemble::EnsembleKind;
    use crate::ensemble::role::RoleBuilder;
    use crate::ensemble::testing::{probe_world, Probe, ProbeKind, ProbeWorld};

    /// One-of worker role that skips workers already claimed this step
    fn probe_kind() -> EnsembleKind<Probe, ProbeWorld> {
        EnsembleKind::new("probe")
            .with_role(
                RoleBuilder::<Probe, ProbeWorld>::one_of("worker", ProbeKind::Worker)
                    .with_select(|_, c, view| !view.others.claims(c.id))
                    .with_utility(|_, c, _| c.value),
            )
            .unwrap()
    }

    #[test]
    fn test_priority_ordering() {
        let mut kind = probe_kind();
        for (label, priority) in [(3, 3.0), (1, 1.0), (2, 2.0)] {
            kind.insert(Probe::new(label, priority));
        }
        let mut world = probe_world(&[1.0, 1.0, 1.0]);
        let ctx = SimulationContext::new();

        let order = attempt_order(&world, &[&mut kind], &ctx);
        assert_eq!(order, vec![(0, 0), (0, 2), (0, 1)]);

        let materialized = materialize_step(&mut world, &mut [&mut kind], &ctx).unwrap();
        let priorities: Vec<f64> = materialized.iter().map(|m| m.priority).collect();
        assert_eq!(priorities, vec![3.0, 2.0, 1.0]);
    }

    #[test]
    fn test_equal_priorities_keep_input_order() {
        let mut a = probe_kind();
        let mut b = probe_kind();
        a.insert(Probe::new(1, 1.0));
        b.insert(Probe::new(2, 1.0));
        a.insert(Probe::new(3, 1.0));
        let world = probe_world(&[]);

        let order = attempt_order(&world, &[&mut a, &mut b], &SimulationContext::new());
        assert_eq!(order, vec![(0, 0), (0, 1), (1, 0)]);
    }

    #[test]
    fn test_higher_priority_consumes_component_first() {
        let mut kind = probe_kind();
        let low = kind.insert(Probe::new(1, 1.0));
        let high = kind.insert(Probe::new(2, 2.0));
        let mut world = probe_world(&[5.0]);

        let materialized = materialize_step(&mut world, &mut [&mut kind], &SimulationContext::new()).unwrap();

        assert_eq!(materialized.ids(), vec![high]);
        assert_eq!(kind.selection(high, "worker"), Some(&[ComponentId(0)][..]));
        assert_eq!(kind.selection(low, "worker"), None);
        assert_eq!(world.items[0].claimed_by, Some(2));
    }

    #[test]
    fn test_actuate_runs_once_per_success() {
        let mut kind = probe_kind();
        let winner = kind.insert(Probe::new(1, 2.0));
        let loser = kind.insert(Probe::new(2, 1.0));
        let mut world = probe_world(&[1.0]);
        let mut driver = MaterializationDriver::new();

        driver
            .run_step(&mut world, &mut [&mut kind], &SimulationContext::at(0))
            .unwrap();
        driver
            .run_step(&mut world, &mut [&mut kind], &SimulationContext::at(1))
            .unwrap();

        assert_eq!(kind.get(winner).map(|p| p.actuations), Some(2));
        assert_eq!(kind.get(loser).map(|p| p.actuations), Some(0));
        assert_eq!(driver.stats().steps, 2);
        assert_eq!(driver.stats().attempted, 4);
        assert_eq!(driver.stats().failed(), 2);
    }

    #[test]
    fn test_actuation_side_effects_visible_to_later_ensembles() {
        // The second ensemble only accepts workers the first has stamped
        let mut stamper = probe_kind();
        stamper.insert(Probe::new(7, 2.0));

        let mut follower: EnsembleKind<Probe, ProbeWorld> = EnsembleKind::new("follower")
            .with_role(
                RoleBuilder::<Probe, ProbeWorld>::one_of("worker", ProbeKind::Worker)
                    .with_select(|_, c, _| c.claimed_by == Some(7)),
            )
            .unwrap();
        let follower_id = follower.insert(Probe::new(8, 1.0));

        let mut world = probe_world(&[1.0, 1.0]);
        let materialized =
            materialize_step(&mut world, &mut [&mut follower, &mut stamper], &SimulationContext::new()).unwrap();

        assert_eq!(materialized.len(), 2);
        assert_eq!(follower.selection(follower_id, "worker"), Some(&[ComponentId(0)][..]));
    }

    #[test]
    fn test_selections_cleared_between_steps() {
        let mut kind = probe_kind();
        let id = kind.insert(Probe::new(1, 1.0));
        let mut world = probe_world(&[1.0]);
        let mut driver = MaterializationDriver::new();

        driver.run_step(&mut world, &mut [&mut kind], &SimulationContext::at(0)).unwrap();
        assert!(kind.selection(id, "worker").is_some());

        world.items.clear();
        driver.run_step(&mut world, &mut [&mut kind], &SimulationContext::at(1)).unwrap();
        assert_eq!(kind.selection(id, "worker"), None);
    }
}
