//! Ensembles: materialization units owning role descriptors
//!
//! An [`EnsembleKind`] groups all instances of one ensemble type with the
//! role descriptors declared for that type. Instances are plain values
//! implementing [`Ensemble`]; their role selections live in the
//! descriptors' side tables, keyed by the [`EnsembleId`] the kind assigns
//! on insertion.

use crate::core::context::SimulationContext;
use crate::core::error::{EnsembleError, Result};
use crate::core::types::{ComponentId, EnsembleId};
use crate::ensemble::component::World;
use crate::ensemble::materialized::{Materialized, MaterializedEnsemble, RoleSelection};
use crate::ensemble::role::{RoleBuilder, RoleDescriptor};
use std::any::TypeId;

/// Behavior of one ensemble instance
pub trait Ensemble<W: World>: 'static {
    /// Higher materializes earlier in the step
    fn priority(&self, _world: &W, _ctx: &SimulationContext) -> f64 {
        1.0
    }

    /// Apply the ensemble's effect; runs once per step after a successful
    /// materialization, before any later ensemble is evaluated
    fn actuate(&mut self, members: &Members<'_>, world: &mut W, ctx: &SimulationContext);
}

/// Selected members of a materialized instance, by role
#[derive(Debug, Clone, Copy)]
pub struct Members<'a> {
    roles: &'a [RoleSelection],
}

impl<'a> Members<'a> {
    pub fn new(roles: &'a [RoleSelection]) -> Self {
        Self { roles }
    }

    /// The member of a one-of role
    pub fn one(&self, role: &str) -> Option<ComponentId> {
        self.some(role).first().copied()
    }

    /// The members of a some-of role, in selection order
    pub fn some(&self, role: &str) -> &'a [ComponentId] {
        self.roles
            .iter()
            .find(|r| r.role == role)
            .map(|r| r.members.as_slice())
            .unwrap_or(&[])
    }

    /// Every member across all roles
    pub fn all(&self) -> impl Iterator<Item = ComponentId> + 'a {
        self.roles.iter().flat_map(|r| r.members.iter().copied())
    }

    pub fn roles(&self) -> &'a [RoleSelection] {
        self.roles
    }
}

/// All instances of ensemble type `E` and the roles declared for it
pub struct EnsembleKind<E, W: World> {
    name: &'static str,
    roles: Vec<RoleDescriptor<E, W>>,
    instances: Vec<(EnsembleId, E)>,
}

impl<E: Ensemble<W>, W: World + 'static> EnsembleKind<E, W> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            roles: Vec::new(),
            instances: Vec::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Declare a role; roles run in declaration order
    pub fn add_role(&mut self, role: RoleBuilder<E, W>) -> Result<()> {
        let role = role.build()?;

        if self.roles.iter().any(|r| r.name() == role.name()) {
            return Err(EnsembleError::DuplicateRole {
                ensemble: self.name.to_string(),
                role: role.name().to_string(),
            });
        }

        if let Some(estimate) = role.estimate() {
            let clash = self
                .roles
                .iter()
                .filter_map(|r| r.estimate())
                .any(|other| other.name() == estimate.name());
            if clash {
                return Err(EnsembleError::DuplicateEstimate {
                    ensemble: self.name.to_string(),
                    estimate: estimate.name().to_string(),
                });
            }
        }

        self.roles.push(role);
        self.roles.sort_by_key(|r| r.declaration_order());
        Ok(())
    }

    pub fn with_role(mut self, role: RoleBuilder<E, W>) -> Result<Self> {
        self.add_role(role)?;
        Ok(self)
    }

    pub fn roles(&self) -> &[RoleDescriptor<E, W>] {
        &self.roles
    }

    pub fn role(&self, name: &str) -> Option<&RoleDescriptor<E, W>> {
        self.roles.iter().find(|r| r.name() == name)
    }

    /// Add a persistent instance
    pub fn insert(&mut self, instance: E) -> EnsembleId {
        let id = EnsembleId::next();
        self.instances.push((id, instance));
        id
    }

    /// Replace every instance, dropping all per-instance state
    pub fn rebuild(&mut self, instances: impl IntoIterator<Item = E>) -> Vec<EnsembleId> {
        for role in &mut self.roles {
            role.forget_all();
        }
        self.instances.clear();
        instances.into_iter().map(|e| self.insert(e)).collect()
    }

    pub fn remove(&mut self, id: EnsembleId) -> Option<E> {
        let index = self.instances.iter().position(|(i, _)| *i == id)?;
        for role in &mut self.roles {
            role.forget(id);
        }
        Some(self.instances.remove(index).1)
    }

    /// Keep only instances for which `keep` returns true
    pub fn retain(&mut self, mut keep: impl FnMut(&E) -> bool) {
        let dropped: Vec<EnsembleId> = self
            .instances
            .iter()
            .filter(|(_, e)| !keep(e))
            .map(|(id, _)| *id)
            .collect();
        for id in dropped {
            self.remove(id);
        }
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn instances(&self) -> impl Iterator<Item = (EnsembleId, &E)> {
        self.instances.iter().map(|(id, e)| (*id, e))
    }

    pub fn get(&self, id: EnsembleId) -> Option<&E> {
        self.instances.iter().find(|(i, _)| *i == id).map(|(_, e)| e)
    }

    pub fn get_mut(&mut self, id: EnsembleId) -> Option<&mut E> {
        self.instances.iter_mut().find(|(i, _)| *i == id).map(|(_, e)| e)
    }

    /// Current selection of `role` for instance `id`
    pub fn selection(&self, id: EnsembleId, role: &str) -> Option<&[ComponentId]> {
        self.role(role).and_then(|r| r.get(id))
    }

    fn snapshot(&self, id: EnsembleId) -> Vec<RoleSelection> {
        self.roles
            .iter()
            .map(|r| RoleSelection {
                role: r.name(),
                members: r.get(id).map(<[ComponentId]>::to_vec).unwrap_or_default(),
            })
            .collect()
    }

    /// Run every role in declaration order for instance `id`
    ///
    /// All-or-nothing: if any role misses its minimum, every role on the
    /// instance is reset and false is returned.
    pub fn materialize(&mut self, id: EnsembleId, world: &W, others: &Materialized, ctx: &SimulationContext) -> bool {
        let name = self.name;
        let Self { roles, instances, .. } = self;
        let Some((_, instance)) = instances.iter().find(|(i, _)| *i == id) else {
            return false;
        };

        let mut done: Vec<RoleSelection> = Vec::with_capacity(roles.len());
        for index in 0..roles.len() {
            let ok = roles[index].execute(id, instance, world, others, &done, ctx);
            if !ok {
                tracing::debug!(
                    ensemble = name,
                    id = %id,
                    role = roles[index].name(),
                    "materialization failed"
                );
                for role in roles.iter_mut() {
                    role.reset(id);
                }
                return false;
            }
            done.push(RoleSelection {
                role: roles[index].name(),
                members: roles[index].get(id).map(<[ComponentId]>::to_vec).unwrap_or_default(),
            });
        }

        true
    }
}

/// Type-erased view of an [`EnsembleKind`] used by the driver
///
/// Instance indices are stable for the duration of one step.
pub trait EnsembleSet<W: World> {
    fn kind_name(&self) -> &'static str;

    fn instance_count(&self) -> usize;

    /// Clear last step's selections
    fn begin_step(&mut self);

    fn priority(&self, index: usize, world: &W, ctx: &SimulationContext) -> f64;

    /// Attempt materialization; on success returns the snapshot to publish
    fn try_materialize(
        &mut self,
        index: usize,
        world: &W,
        others: &Materialized,
        ctx: &SimulationContext,
    ) -> Option<MaterializedEnsemble>;

    fn actuate(&mut self, index: usize, world: &mut W, ctx: &SimulationContext);

    /// Data-collection hook run after the full materialization pass
    fn collect(&mut self, world: &W, materialized: &Materialized, ctx: &SimulationContext) -> Result<usize>;
}

impl<E: Ensemble<W>, W: World + 'static> EnsembleSet<W> for EnsembleKind<E, W> {
    fn kind_name(&self) -> &'static str {
        self.name
    }

    fn instance_count(&self) -> usize {
        self.instances.len()
    }

    fn begin_step(&mut self) {
        for role in &mut self.roles {
            role.reset_all();
        }
    }

    fn priority(&self, index: usize, world: &W, ctx: &SimulationContext) -> f64 {
        self.instances[index].1.priority(world, ctx)
    }

    fn try_materialize(
        &mut self,
        index: usize,
        world: &W,
        others: &Materialized,
        ctx: &SimulationContext,
    ) -> Option<MaterializedEnsemble> {
        let id = self.instances[index].0;
        if !self.materialize(id, world, others, ctx) {
            return None;
        }

        let priority = self.instances[index].1.priority(world, ctx);
        Some(MaterializedEnsemble {
            id,
            kind: TypeId::of::<E>(),
            kind_name: self.name,
            priority,
            roles: self.snapshot(id),
        })
    }

    fn actuate(&mut self, index: usize, world: &mut W, ctx: &SimulationContext) {
        let id = self.instances[index].0;
        let roles = self.snapshot(id);
        let members = Members::new(&roles);
        self.instances[index].1.actuate(&members, world, ctx);
    }

    fn collect(&mut self, world: &W, materialized: &Materialized, ctx: &SimulationContext) -> Result<usize> {
        let Self { roles, instances, .. } = self;

        for (id, _) in instances.iter() {
            if !materialized.contains_ensemble(*id) {
                continue;
            }
            for role in roles.iter_mut() {
                role.record_estimate_inputs(*id);
            }
        }

        let mut appended = 0;
        for role in roles.iter_mut() {
            appended += role.collect_estimate_targets(world, ctx)?;
        }
        Ok(appended)
    }
}
