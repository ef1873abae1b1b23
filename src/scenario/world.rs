//! DroneWorld - the scenario's component registry and physics

use ahash::AHashMap;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;

use crate::core::config::{BirdConfig, ChargerConfig, DroneConfig, ScenarioConfig};
use crate::core::context::SimulationContext;
use crate::core::types::{ComponentId, Point};
use crate::ensemble::component::{Component, World};
use crate::scenario::agents::{Agent, AgentKind, Bird, Body, Charger, Drone, DroneState, Field};

/// Everything that happened during one physics step
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PhysicsReport {
    pub arrived: usize,
    pub started_charging: usize,
    pub finished_charging: usize,
    pub terminated: usize,
    pub scared_birds: usize,
    pub crop_damage: f64,
}

/// All agents plus the randomness driving bird movement
pub struct DroneWorld {
    pub agents: Vec<Agent>,
    pub width: f64,
    pub height: f64,
    drones: DroneConfig,
    chargers: ChargerConfig,
    birds: BirdConfig,
    /// Random number generator (deterministic)
    rng: ChaCha8Rng,
    next_id: u32,
    terminated: usize,
}

impl World for DroneWorld {
    type Component = Agent;

    fn components(&self) -> &[Agent] {
        &self.agents
    }
}

impl DroneWorld {
    /// Empty world using the tunables of `config`
    pub fn new(config: &ScenarioConfig) -> Self {
        Self {
            agents: Vec::new(),
            width: config.world.width,
            height: config.world.height,
            drones: config.drones.clone(),
            chargers: config.chargers.clone(),
            birds: config.birds.clone(),
            rng: ChaCha8Rng::seed_from_u64(config.world.seed),
            next_id: 0,
            terminated: 0,
        }
    }

    /// World populated at random positions from `config`
    pub fn generate(config: &ScenarioConfig) -> Self {
        let mut world = Self::new(config);

        for _ in 0..config.chargers.count {
            let position = world.random_point();
            world.spawn(position, Body::Charger(Charger::new(config.chargers.slots)));
        }
        for _ in 0..config.fields.count {
            let position = world.random_point();
            world.spawn(
                position,
                Body::Field(Field {
                    crops: 1.0,
                    places: config.fields.places,
                }),
            );
        }
        for _ in 0..config.drones.count {
            let position = world.random_point();
            let battery = world.rng.gen_range(0.3..1.0);
            world.spawn(position, Body::Drone(Drone::new(battery)));
        }
        for _ in 0..config.birds.count {
            let position = world.random_point();
            world.spawn(position, Body::Bird(Bird::default()));
        }

        tracing::debug!(agents = world.agents.len(), "world generated");
        world
    }

    pub fn spawn(&mut self, position: Point, body: Body) -> ComponentId {
        let id = ComponentId(self.next_id);
        self.next_id += 1;
        self.agents.push(Agent::new(id, position, body));
        id
    }

    fn random_point(&mut self) -> Point {
        Point::new(self.rng.gen_range(0.0..self.width), self.rng.gen_range(0.0..self.height))
    }

    pub fn agent(&self, id: ComponentId) -> Option<&Agent> {
        self.component(id)
    }

    pub fn agent_mut(&mut self, id: ComponentId) -> Option<&mut Agent> {
        self.agents.iter_mut().find(|a| a.id == id)
    }

    pub fn position(&self, id: ComponentId) -> Option<Point> {
        self.agent(id).map(|a| a.position)
    }

    pub fn drone(&self, id: ComponentId) -> Option<&Drone> {
        self.agent(id).and_then(Agent::as_drone)
    }

    pub fn charger(&self, id: ComponentId) -> Option<&Charger> {
        self.agent(id).and_then(Agent::as_charger)
    }

    pub fn field(&self, id: ComponentId) -> Option<&Field> {
        self.agent(id).and_then(Agent::as_field)
    }

    pub fn ids_of(&self, kind: AgentKind) -> Vec<ComponentId> {
        self.agents.iter().filter(|a| a.kind() == kind).map(|a| a.id).collect()
    }

    pub fn drones(&self) -> impl Iterator<Item = &Drone> {
        self.agents.iter().filter_map(Agent::as_drone)
    }

    pub fn drones_alive(&self) -> usize {
        self.drones().count()
    }

    pub fn drones_in(&self, state: DroneState) -> usize {
        self.drones().filter(|d| d.state == state).count()
    }

    /// Drones removed after running out of battery
    pub fn terminated(&self) -> usize {
        self.terminated
    }

    pub fn mean_crops(&self) -> f64 {
        let crops: Vec<f64> = self.agents.iter().filter_map(Agent::as_field).map(|f| f.crops).collect();
        if crops.is_empty() {
            0.0
        } else {
            crops.iter().sum::<f64>() / crops.len() as f64
        }
    }

    /// Birds within `radius` of `point`
    pub fn birds_near(&self, point: Point, radius: f64) -> usize {
        self.agents
            .iter()
            .filter(|a| a.kind() == AgentKind::Bird && a.position.distance(&point) <= radius)
            .count()
    }

    /// Protection is decided afresh every step
    pub fn release_protectors(&mut self) {
        for drone in self.agents.iter_mut().filter_map(Agent::as_drone_mut) {
            if drone.state == DroneState::Protecting {
                drone.state = DroneState::Idle;
                drone.field = None;
            }
        }
    }

    /// Send `drone` to `charger` and reserve its place in the queue
    pub fn assign_to_charger(&mut self, drone: ComponentId, charger: ComponentId) {
        let Some(d) = self.agent_mut(drone).and_then(Agent::as_drone_mut) else {
            return;
        };
        d.state = DroneState::MovingToCharger;
        d.charger = Some(charger);
        d.field = None;

        if let Some(c) = self.agent_mut(charger).and_then(Agent::as_charger_mut) {
            if !c.incoming.contains(&drone) {
                c.incoming.push(drone);
            }
        }
    }

    pub fn assign_to_field(&mut self, drone: ComponentId, field: ComponentId) {
        if let Some(d) = self.agent_mut(drone).and_then(Agent::as_drone_mut) {
            d.state = DroneState::Protecting;
            d.field = Some(field);
        }
    }

    /// Advance drones, chargers and birds by one step
    ///
    /// Order: drone movement and battery, charger queues, birds, then
    /// removal of drones that ran out of battery.
    pub fn step_physics(&mut self, ctx: &SimulationContext) -> PhysicsReport {
        let mut report = PhysicsReport::default();
        let positions: AHashMap<ComponentId, Point> = self.agents.iter().map(|a| (a.id, a.position)).collect();

        // 1. Drones
        let mut arrivals = Vec::new();
        let mut finished = Vec::new();
        let mut dead = Vec::new();

        for agent in &mut self.agents {
            let Body::Drone(drone) = &mut agent.body else {
                continue;
            };

            match drone.state {
                DroneState::Protecting => {
                    if let Some(target) = drone.field.and_then(|f| positions.get(&f)) {
                        agent.position = agent.position.step_toward(*target, self.drones.speed);
                    }
                }
                DroneState::MovingToCharger => match drone.charger.and_then(|c| positions.get(&c).map(|p| (c, *p))) {
                    Some((charger, target)) => {
                        agent.position = agent.position.step_toward(target, self.drones.speed);
                        if agent.position.distance(&target) <= f64::EPSILON {
                            drone.state = DroneState::Waiting;
                            arrivals.push((agent.id, charger));
                        }
                    }
                    None => {
                        drone.state = DroneState::Idle;
                        drone.charger = None;
                    }
                },
                DroneState::Charging => {
                    drone.battery = (drone.battery + self.chargers.charge_rate).min(1.0);
                    if drone.battery >= 1.0 {
                        drone.state = DroneState::Idle;
                        finished.extend(drone.charger.take().map(|c| (agent.id, c)));
                    }
                }
                DroneState::Idle | DroneState::Waiting | DroneState::Terminated => {}
            }

            if drone.state != DroneState::Charging {
                let drain = if drone.is_moving() {
                    self.drones.move_drain
                } else {
                    self.drones.idle_drain
                };
                drone.battery -= drain;
                if drone.battery <= 0.0 {
                    drone.battery = 0.0;
                    drone.state = DroneState::Terminated;
                    dead.push((agent.id, drone.charger));
                }
            }
        }

        // 2. Charger queues
        for &(drone, charger) in &arrivals {
            if let Some(c) = self.agent_mut(charger).and_then(Agent::as_charger_mut) {
                c.incoming.retain(|d| *d != drone);
                c.waiting.push(drone);
            }
        }
        let released = finished
            .iter()
            .copied()
            .chain(dead.iter().filter_map(|&(d, c)| c.map(|c| (d, c))));
        for (drone, charger) in released {
            if let Some(c) = self.agent_mut(charger).and_then(Agent::as_charger_mut) {
                c.release(drone);
            }
        }

        let mut started = Vec::new();
        for charger in self.agents.iter_mut().filter_map(Agent::as_charger_mut) {
            while charger.free_slots() > 0 && !charger.waiting.is_empty() {
                let drone = charger.waiting.remove(0);
                charger.charging.push(drone);
                started.push(drone);
            }
        }
        for &drone in &started {
            if let Some(d) = self.agent_mut(drone).and_then(Agent::as_drone_mut) {
                d.state = DroneState::Charging;
            }
        }

        // 3. Birds
        report.scared_birds = self.step_birds(&mut report.crop_damage);

        // 4. Dead drones leave the world
        for &(drone, _) in &dead {
            tracing::debug!(step = ctx.step, drone = %drone, "drone ran out of battery");
        }
        self.agents.retain(|a| a.drone_state() != Some(DroneState::Terminated));
        self.terminated += dead.len();

        report.arrived = arrivals.len();
        report.started_charging = started.len();
        report.finished_charging = finished.len();
        report.terminated = dead.len();
        report
    }

    /// Move birds and apply crop damage; returns the number of scared birds
    fn step_birds(&mut self, crop_damage: &mut f64) -> usize {
        let guards: Vec<Point> = self
            .agents
            .iter()
            .filter(|a| a.drone_state() == Some(DroneState::Protecting))
            .map(|a| a.position)
            .collect();
        let fields: Vec<(ComponentId, Point)> = self
            .agents
            .iter()
            .filter(|a| a.as_field().is_some_and(|f| f.crops > 0.0))
            .map(|a| (a.id, a.position))
            .collect();

        let (width, height) = (self.width, self.height);
        let protect_radius = self.drones.protect_radius;
        let BirdConfig {
            speed,
            eat_rate,
            field_radius,
            ..
        } = self.birds;
        let Self { agents, rng, .. } = self;
        let random_point = |rng: &mut ChaCha8Rng| Point::new(rng.gen_range(0.0..width), rng.gen_range(0.0..height));

        let mut scared = 0;
        let mut eaten: Vec<ComponentId> = Vec::new();

        for agent in agents.iter_mut() {
            let Body::Bird(bird) = &mut agent.body else {
                continue;
            };

            let threatened = guards.iter().any(|g| g.distance(&agent.position) <= protect_radius);
            if threatened {
                scared += 1;
                bird.target = Some(random_point(rng));
            } else if bird.target.map_or(true, |t| t.distance(&agent.position) <= f64::EPSILON) {
                // Birds favour fields over open ground
                bird.target = Some(if !fields.is_empty() && rng.gen_bool(0.6) {
                    fields[rng.gen_range(0..fields.len())].1
                } else {
                    random_point(rng)
                });
            }

            if let Some(target) = bird.target {
                agent.position = agent.position.step_toward(target, speed).clamp_to(width, height);
            }

            if !threatened {
                eaten.extend(
                    fields
                        .iter()
                        .filter(|(_, p)| p.distance(&agent.position) <= field_radius)
                        .map(|(id, _)| *id),
                );
            }
        }

        for field in eaten {
            if let Some(f) = self.agent_mut(field).and_then(Agent::as_field_mut) {
                let before = f.crops;
                f.crops = (f.crops - eat_rate).max(0.0);
                *crop_damage += before - f.crops;
            }
        }

        scared
    }
}
