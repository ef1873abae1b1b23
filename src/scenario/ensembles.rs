//! Drone scenario ensembles
//!
//! - [`ChargerAssignment`]: one persistent instance per charger. Picks
//!   low-battery drones that are predicted to survive the trip and the
//!   wait, and sends them to the charger. Priority 2, so it runs before
//!   any field protection.
//! - [`FieldProtection`]: rebuilt every step for fields with birds
//!   nearby. Picks idle drones closest to the field. Priority grows
//!   with the number of birds.

use crate::core::config::ScenarioConfig;
use crate::core::context::SimulationContext;
use crate::core::error::Result;
use crate::core::types::ComponentId;
use crate::ensemble::cardinality::Cardinality;
use crate::ensemble::ensemble::{Ensemble, EnsembleKind, Members};
use crate::ensemble::estimate::{Estimate, EstimateBinding};
use crate::ensemble::features::{Feature, FeatureValue};
use crate::ensemble::role::RoleBuilder;
use crate::scenario::agents::{Agent, AgentKind, DroneState};
use crate::scenario::world::DroneWorld;

pub const CHARGER_ROLE: &str = "drones";
pub const PROTECTOR_ROLE: &str = "protectors";

/// Persistent ensemble sending drones to one charger
#[derive(Debug, Clone)]
pub struct ChargerAssignment {
    pub charger: ComponentId,
    /// Charging + waiting + incoming drones the charger accepts
    pub capacity: usize,
    /// Drones sent here over the whole run
    pub assigned_total: usize,
}

impl ChargerAssignment {
    pub fn new(charger: ComponentId, capacity: usize) -> Self {
        Self {
            charger,
            capacity,
            assigned_total: 0,
        }
    }

    /// Places left after counting drones already bound to the charger
    pub fn free_capacity(&self, world: &DroneWorld) -> usize {
        world
            .charger(self.charger)
            .map_or(0, |c| self.capacity.saturating_sub(c.occupancy()))
    }

    fn distance_to(&self, drone: &Agent, world: &DroneWorld) -> f64 {
        world
            .position(self.charger)
            .map_or(f64::INFINITY, |p| p.distance(&drone.position))
    }
}

impl Ensemble<DroneWorld> for ChargerAssignment {
    fn priority(&self, _world: &DroneWorld, _ctx: &SimulationContext) -> f64 {
        2.0
    }

    fn actuate(&mut self, members: &Members<'_>, world: &mut DroneWorld, ctx: &SimulationContext) {
        for &drone in members.some(CHARGER_ROLE) {
            world.assign_to_charger(drone, self.charger);
            self.assigned_total += 1;
            tracing::debug!(step = ctx.step, drone = %drone, charger = %self.charger, "drone sent to charger");
        }
    }
}

/// Tunables the charger role closures capture
#[derive(Debug, Clone, Copy)]
struct ChargingRules {
    low_battery: f64,
    speed: f64,
    move_drain: f64,
    idle_drain: f64,
    use_estimate: bool,
}

impl ChargingRules {
    /// Battery needed to fly `distance` and then wait `wait` steps
    fn battery_needed(&self, distance: f64, wait: f64) -> f64 {
        (distance / self.speed) * self.move_drain + wait.max(0.0) * self.idle_drain
    }
}

/// Build the charger ensemble kind with one instance per charger
///
/// The role carries the `estimate` binding: inputs are the drone's
/// battery, its distance to the charger and the charger's queue length;
/// the training target is the number of steps until the drone starts
/// charging.
pub fn charger_assignments(
    world: &DroneWorld,
    config: &ScenarioConfig,
    estimate: &Estimate,
) -> Result<EnsembleKind<ChargerAssignment, DroneWorld>> {
    let rules = ChargingRules {
        low_battery: config.drones.low_battery,
        speed: config.drones.speed,
        move_drain: config.drones.move_drain,
        idle_drain: config.drones.idle_drain,
        use_estimate: config.estimator.enabled,
    };
    let capacity = config.chargers.slots * config.chargers.queue_per_slot;
    let diagonal = (world.width * world.width + world.height * world.height).sqrt();

    let wait_time = EstimateBinding::<ChargerAssignment, DroneWorld>::builder("charging_wait", estimate)
        .input("battery", Feature::numeric(0.0, 1.0), |_, drone, _| {
            drone.battery().unwrap_or(0.0).into()
        })
        .input("distance", Feature::numeric(0.0, diagonal), |e, drone, world| {
            e.distance_to(drone, world).into()
        })
        .input("queue", Feature::numeric(0.0, capacity as f64), |e, _, world| {
            FeatureValue::Number(world.charger(e.charger).map_or(0.0, |c| c.queue_len() as f64))
        })
        .time_to_event(|drone, _| drone.drone_state() == Some(DroneState::Charging))
        .mode(config.estimator.collection_mode)
        .max_age(config.estimator.max_record_age)
        .build()?;

    let role = RoleBuilder::some_of_with_estimate(CHARGER_ROLE, AgentKind::Drone, wait_time)
        .with_cardinality(|e, world| Cardinality::range(0, e.free_capacity(world)))
        .with_select(move |e, drone, view| {
            let Some(d) = drone.as_drone() else {
                return false;
            };
            if !d.is_idle() || d.battery >= rules.low_battery {
                return false;
            }
            if view.others.claimed_by::<ChargerAssignment>(drone.id) {
                return false;
            }
            let wait = if rules.use_estimate {
                view.estimate(drone.id).unwrap_or(0.0)
            } else {
                0.0
            };
            d.battery > rules.battery_needed(e.distance_to(drone, view.world), wait)
        })
        .with_utility(|_, drone, _| 1.0 - drone.battery().unwrap_or(1.0));

    let mut kind = EnsembleKind::new("charger_assignment").with_role(role)?;
    for charger in world.ids_of(AgentKind::Charger) {
        kind.insert(ChargerAssignment::new(charger, capacity));
    }
    Ok(kind)
}

/// Per-step ensemble guarding one field
#[derive(Debug, Clone)]
pub struct FieldProtection {
    pub field: ComponentId,
    pub places: usize,
    /// Birds near the field when the instance was built
    pub threat: usize,
}

impl Ensemble<DroneWorld> for FieldProtection {
    /// 1 for an unthreatened field, approaching 2 as birds gather
    fn priority(&self, _world: &DroneWorld, _ctx: &SimulationContext) -> f64 {
        let birds = self.threat as f64;
        1.0 + birds / (birds + 1.0)
    }

    fn actuate(&mut self, members: &Members<'_>, world: &mut DroneWorld, _ctx: &SimulationContext) {
        for &drone in members.some(PROTECTOR_ROLE) {
            world.assign_to_field(drone, self.field);
        }
    }
}

/// Empty field protection kind; instances come from [`threatened_fields`]
pub fn field_protection(config: &ScenarioConfig) -> Result<EnsembleKind<FieldProtection, DroneWorld>> {
    let low_battery = config.drones.low_battery;

    let role = RoleBuilder::<FieldProtection, DroneWorld>::some_of(PROTECTOR_ROLE, AgentKind::Drone)
        .with_cardinality(|e, _| Cardinality::range(1, e.places))
        .with_select(move |_, drone, view| {
            drone
                .as_drone()
                .is_some_and(|d| d.is_idle() && d.battery > low_battery)
                && !view.others.claims(drone.id)
        })
        .with_utility(|e, drone, view| {
            view.world
                .position(e.field)
                .map_or(f64::NEG_INFINITY, |p| -p.distance(&drone.position))
        });

    EnsembleKind::new("field_protection").with_role(role)
}

/// One protection instance per field with crops left and birds within
/// `radius`
pub fn threatened_fields(world: &DroneWorld, radius: f64) -> Vec<FieldProtection> {
    world
        .agents
        .iter()
        .filter_map(|a| a.as_field().map(|f| (a, f)))
        .filter(|(_, f)| f.crops > 0.0 && f.places > 0)
        .filter_map(|(a, f)| {
            let threat = world.birds_near(a.position, radius);
            (threat > 0).then_some(FieldProtection {
                field: a.id,
                places: f.places,
                threat,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Point;
    use crate::ensemble::driver::materialize_step;
    use crate::ensemble::estimator::ConstantEstimator;
    use crate::scenario::agents::{Bird, Body, Charger, Drone, Field};

    fn config() -> ScenarioConfig {
        let mut config = ScenarioConfig::default();
        config.chargers.slots = 1;
        config.chargers.queue_per_slot = 2;
        config.fields.places = 2;
        config
    }

    fn field(world: &mut DroneWorld, at: Point) -> ComponentId {
        world.spawn(at, Body::Field(Field { crops: 1.0, places: 2 }))
    }

    #[test]
    fn test_charger_takes_lowest_battery_first() {
        let config = config();
        let mut world = DroneWorld::new(&config);
        let charger = world.spawn(Point::new(0.0, 0.0), Body::Charger(Charger::new(1)));
        let low = world.spawn(Point::new(1.0, 0.0), Body::Drone(Drone::new(0.1)));
        let lower = world.spawn(Point::new(1.0, 0.0), Body::Drone(Drone::new(0.05)));
        let lowish = world.spawn(Point::new(1.0, 0.0), Body::Drone(Drone::new(0.2)));
        world.spawn(Point::new(1.0, 0.0), Body::Drone(Drone::new(0.9)));

        let estimate = Estimate::new("wait", ConstantEstimator(0.0));
        let mut chargers = charger_assignments(&world, &config, &estimate).unwrap();
        let materialized =
            materialize_step(&mut world, &mut [&mut chargers], &SimulationContext::new()).unwrap();

        assert_eq!(materialized.len(), 1);
        assert_eq!(materialized.iter().next().map(|m| m.members(CHARGER_ROLE).to_vec()), Some(vec![lower, low]));
        assert_eq!(world.drone(lower).map(|d| d.state), Some(DroneState::MovingToCharger));
        assert_eq!(world.drone(lowish).map(|d| d.state), Some(DroneState::Idle));
        assert_eq!(world.charger(charger).map(|c| c.incoming.len()), Some(2));
    }

    #[test]
    fn test_estimate_rejects_drones_that_would_not_survive_the_wait() {
        let config = config();
        let mut world = DroneWorld::new(&config);
        world.spawn(Point::new(0.0, 0.0), Body::Charger(Charger::new(1)));
        let drone = world.spawn(Point::new(0.0, 0.0), Body::Drone(Drone::new(0.05)));

        // 100 steps of waiting at 0.001 per step needs 0.1 battery
        let estimate = Estimate::new("wait", ConstantEstimator(100.0));
        let mut chargers = charger_assignments(&world, &config, &estimate).unwrap();
        materialize_step(&mut world, &mut [&mut chargers], &SimulationContext::new()).unwrap();
        assert_eq!(world.drone(drone).map(|d| d.state), Some(DroneState::Idle));

        estimate.set_estimator(ConstantEstimator(10.0));
        materialize_step(&mut world, &mut [&mut chargers], &SimulationContext::at(1)).unwrap();
        assert_eq!(world.drone(drone).map(|d| d.state), Some(DroneState::MovingToCharger));
    }

    #[test]
    fn test_full_charger_selects_nobody() {
        let config = config();
        let mut world = DroneWorld::new(&config);
        let charger = world.spawn(Point::new(0.0, 0.0), Body::Charger(Charger::new(1)));
        let drone = world.spawn(Point::new(0.0, 0.0), Body::Drone(Drone::new(0.1)));

        let estimate = Estimate::new("wait", ConstantEstimator(0.0));
        let mut chargers = charger_assignments(&world, &config, &estimate).unwrap();
        if let Some(c) = world.agent_mut(charger).and_then(Agent::as_charger_mut) {
            c.waiting = vec![ComponentId(90), ComponentId(91)];
        }

        materialize_step(&mut world, &mut [&mut chargers], &SimulationContext::new()).unwrap();
        assert_eq!(world.drone(drone).map(|d| d.state), Some(DroneState::Idle));
    }

    #[test]
    fn test_field_priority_grows_with_birds() {
        let calm = FieldProtection {
            field: ComponentId(0),
            places: 1,
            threat: 1,
        };
        let swarmed = FieldProtection { threat: 9, ..calm.clone() };
        let world = DroneWorld::new(&config());
        let ctx = SimulationContext::new();
        assert_eq!(calm.priority(&world, &ctx), 1.5);
        assert!(swarmed.priority(&world, &ctx) > calm.priority(&world, &ctx));
        assert!(swarmed.priority(&world, &ctx) < 2.0);
    }

    #[test]
    fn test_threatened_fields_only() {
        let config = config();
        let mut world = DroneWorld::new(&config);
        let threatened = field(&mut world, Point::new(10.0, 10.0));
        field(&mut world, Point::new(90.0, 90.0));
        world.spawn(Point::new(12.0, 10.0), Body::Bird(Bird::default()));

        let fields = threatened_fields(&world, 8.0);
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].field, threatened);
        assert_eq!(fields[0].threat, 1);
    }

    #[test]
    fn test_closest_idle_drones_protect_field() {
        let config = config();
        let mut world = DroneWorld::new(&config);
        let f = field(&mut world, Point::new(50.0, 50.0));
        world.spawn(Point::new(51.0, 50.0), Body::Bird(Bird::default()));
        let near = world.spawn(Point::new(55.0, 50.0), Body::Drone(Drone::new(0.9)));
        let mid = world.spawn(Point::new(60.0, 50.0), Body::Drone(Drone::new(0.9)));
        let far = world.spawn(Point::new(90.0, 50.0), Body::Drone(Drone::new(0.9)));
        let weak = world.spawn(Point::new(50.0, 51.0), Body::Drone(Drone::new(0.1)));

        let mut fields = field_protection(&config).unwrap();
        fields.rebuild(threatened_fields(&world, config.birds.field_radius));
        materialize_step(&mut world, &mut [&mut fields], &SimulationContext::new()).unwrap();

        assert_eq!(world.drone(near).and_then(|d| d.field), Some(f));
        assert_eq!(world.drone(mid).and_then(|d| d.field), Some(f));
        assert_eq!(world.drone(far).map(|d| d.state), Some(DroneState::Idle));
        assert_eq!(world.drone(weak).map(|d| d.state), Some(DroneState::Idle));
    }

    #[test]
    fn test_low_battery_drone_goes_to_charger_not_field() {
        let mut config = config();
        config.drones.low_battery = 0.5;
        let mut world = DroneWorld::new(&config);
        world.spawn(Point::new(0.0, 0.0), Body::Charger(Charger::new(1)));
        field(&mut world, Point::new(5.0, 0.0));
        world.spawn(Point::new(6.0, 0.0), Body::Bird(Bird::default()));
        let drone = world.spawn(Point::new(3.0, 0.0), Body::Drone(Drone::new(0.4)));

        let estimate = Estimate::new("wait", ConstantEstimator(0.0));
        let mut chargers = charger_assignments(&world, &config, &estimate).unwrap();
        let mut fields = field_protection(&config).unwrap();
        fields.rebuild(threatened_fields(&world, config.birds.field_radius));

        let materialized =
            materialize_step(&mut world, &mut [&mut fields, &mut chargers], &SimulationContext::new()).unwrap();

        assert_eq!(world.drone(drone).map(|d| d.state), Some(DroneState::MovingToCharger));
        assert!(materialized.claimed_by::<ChargerAssignment>(drone));
        assert_eq!(materialized.of_kind::<FieldProtection>().count(), 0);
    }

    #[test]
    fn test_wait_inputs_recorded_as_seen_at_selection() {
        let config = config();
        let mut world = DroneWorld::new(&config);
        world.spawn(Point::new(0.0, 0.0), Body::Charger(Charger::new(1)));
        let a = world.spawn(Point::new(1.0, 0.0), Body::Drone(Drone::new(0.1)));
        let b = world.spawn(Point::new(1.0, 0.0), Body::Drone(Drone::new(0.1)));

        let estimate = Estimate::new("wait", ConstantEstimator(0.0));
        let mut chargers = charger_assignments(&world, &config, &estimate).unwrap();

        let before: Vec<Vec<f64>> = {
            let binding = chargers.role(CHARGER_ROLE).and_then(|r| r.estimate()).unwrap();
            let (_, instance) = chargers.instances().next().unwrap();
            [a, b]
                .iter()
                .map(|&d| binding.features(instance, world.agent(d).unwrap(), &world).unwrap())
                .collect()
        };
        // Empty queue when the drones were picked
        assert_eq!(before[0][2], 0.0);

        materialize_step(&mut world, &mut [&mut chargers], &SimulationContext::new()).unwrap();
        assert_eq!(world.charger(ComponentId(0)).map(|c| c.incoming.len()), Some(2));

        let collector = chargers.role(CHARGER_ROLE).and_then(|r| r.estimate()).unwrap().collector();
        for (drone, expected) in [a, b].iter().zip(&before) {
            let pending = collector.pending_inputs(drone);
            assert_eq!(pending.len(), 1);
            assert_eq!(&pending[0].features, expected);
        }
    }
}
