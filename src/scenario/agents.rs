//! Agents of the drone scenario
//!
//! Every agent is one [`Agent`] value carrying a position and a
//! kind-specific body. Agents are the components ensembles select.

use crate::core::types::{ComponentId, Point};
use crate::ensemble::component::Component;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentKind {
    Drone,
    Charger,
    Field,
    Bird,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DroneState {
    Idle,
    Protecting,
    MovingToCharger,
    Waiting,
    Charging,
    Terminated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Drone {
    pub state: DroneState,
    /// 0.0 (empty) to 1.0 (full)
    pub battery: f64,
    /// Charger this drone is heading to, queued at or charging on
    pub charger: Option<ComponentId>,
    /// Field this drone protects this step
    pub field: Option<ComponentId>,
}

impl Drone {
    pub fn new(battery: f64) -> Self {
        Self {
            state: DroneState::Idle,
            battery,
            charger: None,
            field: None,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.state == DroneState::Idle
    }

    /// Flying or protecting drains at the movement rate
    pub fn is_moving(&self) -> bool {
        matches!(self.state, DroneState::Protecting | DroneState::MovingToCharger)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Charger {
    pub slots: usize,
    /// Drones currently charging, at most `slots`
    pub charging: Vec<ComponentId>,
    /// Drones at the charger waiting for a slot, in arrival order
    pub waiting: Vec<ComponentId>,
    /// Drones assigned and still flying here
    pub incoming: Vec<ComponentId>,
}

impl Charger {
    pub fn new(slots: usize) -> Self {
        Self {
            slots,
            charging: Vec::new(),
            waiting: Vec::new(),
            incoming: Vec::new(),
        }
    }

    /// Drones charging, waiting or incoming
    pub fn occupancy(&self) -> usize {
        self.charging.len() + self.waiting.len() + self.incoming.len()
    }

    /// Drones ahead of a newly assigned one
    pub fn queue_len(&self) -> usize {
        self.waiting.len() + self.incoming.len()
    }

    pub fn free_slots(&self) -> usize {
        self.slots.saturating_sub(self.charging.len())
    }

    /// Drop `drone` from every queue
    pub fn release(&mut self, drone: ComponentId) {
        self.charging.retain(|d| *d != drone);
        self.waiting.retain(|d| *d != drone);
        self.incoming.retain(|d| *d != drone);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Field {
    /// Remaining crops, 1.0 at start
    pub crops: f64,
    /// Maximum protecting drones
    pub places: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Bird {
    /// Current wander target
    pub target: Option<Point>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Body {
    Drone(Drone),
    Charger(Charger),
    Field(Field),
    Bird(Bird),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: ComponentId,
    pub position: Point,
    pub body: Body,
}

impl Agent {
    pub fn new(id: ComponentId, position: Point, body: Body) -> Self {
        Self { id, position, body }
    }

    pub fn as_drone(&self) -> Option<&Drone> {
        match &self.body {
            Body::Drone(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_drone_mut(&mut self) -> Option<&mut Drone> {
        match &mut self.body {
            Body::Drone(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_charger(&self) -> Option<&Charger> {
        match &self.body {
            Body::Charger(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_charger_mut(&mut self) -> Option<&mut Charger> {
        match &mut self.body {
            Body::Charger(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_field(&self) -> Option<&Field> {
        match &self.body {
            Body::Field(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_field_mut(&mut self) -> Option<&mut Field> {
        match &mut self.body {
            Body::Field(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_bird_mut(&mut self) -> Option<&mut Bird> {
        match &mut self.body {
            Body::Bird(b) => Some(b),
            _ => None,
        }
    }

    /// Drone state, `None` for other kinds
    pub fn drone_state(&self) -> Option<DroneState> {
        self.as_drone().map(|d| d.state)
    }

    pub fn battery(&self) -> Option<f64> {
        self.as_drone().map(|d| d.battery)
    }
}

impl Component for Agent {
    type Kind = AgentKind;

    fn id(&self) -> ComponentId {
        self.id
    }

    fn kind(&self) -> AgentKind {
        match self.body {
            Body::Drone(_) => AgentKind::Drone,
            Body::Charger(_) => AgentKind::Charger,
            Body::Field(_) => AgentKind::Field,
            Body::Bird(_) => AgentKind::Bird,
        }
    }
}
