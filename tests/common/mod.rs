//! Shared fixtures: a flat world of units and two ensemble types

#![allow(dead_code)]

use drone_ensembles::core::context::SimulationContext;
use drone_ensembles::core::types::ComponentId;
use drone_ensembles::ensemble::{Component, Ensemble, Members, World};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Drone,
    Charger,
}

#[derive(Debug, Clone)]
pub struct Unit {
    pub id: ComponentId,
    pub kind: Kind,
    pub score: f64,
    pub busy: bool,
    pub taken_by: Option<&'static str>,
}

impl Component for Unit {
    type Kind = Kind;

    fn id(&self) -> ComponentId {
        self.id
    }

    fn kind(&self) -> Kind {
        self.kind
    }
}

#[derive(Debug, Default)]
pub struct Units {
    pub units: Vec<Unit>,
}

impl World for Units {
    type Component = Unit;

    fn components(&self) -> &[Unit] {
        &self.units
    }
}

impl Units {
    pub fn unit_mut(&mut self, id: ComponentId) -> Option<&mut Unit> {
        self.units.iter_mut().find(|u| u.id == id)
    }
}

/// Drones with ids `0..scores.len()`
pub fn drones(scores: &[f64]) -> Units {
    Units {
        units: scores
            .iter()
            .enumerate()
            .map(|(i, &score)| Unit {
                id: ComponentId(i as u32),
                kind: Kind::Drone,
                score,
                busy: false,
                taken_by: None,
            })
            .collect(),
    }
}

/// Ensemble that tags its members with its name
#[derive(Debug, Clone)]
pub struct Squad {
    pub name: &'static str,
    pub priority: f64,
    pub actuated: usize,
}

impl Squad {
    pub fn new(name: &'static str, priority: f64) -> Self {
        Self {
            name,
            priority,
            actuated: 0,
        }
    }
}

impl Ensemble<Units> for Squad {
    fn priority(&self, _world: &Units, _ctx: &SimulationContext) -> f64 {
        self.priority
    }

    fn actuate(&mut self, members: &Members<'_>, world: &mut Units, _ctx: &SimulationContext) {
        self.actuated += 1;
        for id in members.all() {
            if let Some(unit) = world.unit_mut(id) {
                unit.taken_by = Some(self.name);
            }
        }
    }
}

/// A second ensemble type, default priority
#[derive(Debug, Clone, Default)]
pub struct Patrol {
    pub actuated: usize,
}

impl Ensemble<Units> for Patrol {
    fn actuate(&mut self, _members: &Members<'_>, _world: &mut Units, _ctx: &SimulationContext) {
        self.actuated += 1;
    }
}
