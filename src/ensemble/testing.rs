//! Minimal world and ensemble fixtures for unit tests

use crate::core::context::SimulationContext;
use crate::core::types::ComponentId;
use crate::ensemble::component::{Component, World};
use crate::ensemble::ensemble::{Ensemble, Members};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeKind {
    Worker,
    Other,
}

#[derive(Debug, Clone)]
pub struct Item {
    pub id: ComponentId,
    pub kind: ProbeKind,
    pub value: f64,
    pub flag: bool,
    pub claimed_by: Option<u32>,
}

impl Component for Item {
    type Kind = ProbeKind;

    fn id(&self) -> ComponentId {
        self.id
    }

    fn kind(&self) -> ProbeKind {
        self.kind
    }
}

#[derive(Debug, Default)]
pub struct ProbeWorld {
    pub items: Vec<Item>,
}

impl World for ProbeWorld {
    type Component = Item;

    fn components(&self) -> &[Item] {
        &self.items
    }
}

/// Workers with ids `0..values.len()` carrying the given values
pub fn probe_world(values: &[f64]) -> ProbeWorld {
    ProbeWorld {
        items: values
            .iter()
            .enumerate()
            .map(|(i, &value)| Item {
                id: ComponentId(i as u32),
                kind: ProbeKind::Worker,
                value,
                flag: false,
                claimed_by: None,
            })
            .collect(),
    }
}

/// Ensemble instance with a fixed priority that stamps its label on members
#[derive(Debug, Clone, Default)]
pub struct Probe {
    pub label: u32,
    pub priority: f64,
    pub actuations: u32,
}

impl Probe {
    pub fn new(label: u32, priority: f64) -> Self {
        Self {
            label,
            priority,
            actuations: 0,
        }
    }
}

impl Ensemble<ProbeWorld> for Probe {
    fn priority(&self, _world: &ProbeWorld, _ctx: &SimulationContext) -> f64 {
        self.priority
    }

    fn actuate(&mut self, members: &Members<'_>, world: &mut ProbeWorld, _ctx: &SimulationContext) {
        self.actuations += 1;
        for id in members.all() {
            if let Some(item) = world.items.iter_mut().find(|i| i.id == id) {
                item.claimed_by = Some(self.label);
            }
        }
    }
}
