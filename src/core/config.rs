//! Scenario configuration with documented defaults
//!
//! All tunable numbers for the drone scenario live here. Every section
//! is optional in the TOML file; missing values fall back to defaults.

use crate::core::error::{EnsembleError, Result};
use crate::ensemble::collector::CollectionMode;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// World bounds and randomness
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Width of the world (world units)
    pub width: f64,
    /// Height of the world (world units)
    pub height: f64,
    /// Seed for placement and bird movement
    pub seed: u64,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            width: 100.0,
            height: 100.0,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DroneConfig {
    pub count: usize,
    /// Distance covered per step (world units)
    pub speed: f64,
    /// Battery drained per step while flying or protecting
    ///
    /// At 0.005 a full drone flies for 200 steps.
    pub move_drain: f64,
    /// Battery drained per step while idle
    pub idle_drain: f64,
    /// Below this level a drone is a candidate for charging
    pub low_battery: f64,
    /// A protecting drone scares birds within this radius of its field
    pub protect_radius: f64,
}

impl Default for DroneConfig {
    fn default() -> Self {
        Self {
            count: 8,
            speed: 2.0,
            move_drain: 0.005,
            idle_drain: 0.001,
            low_battery: 0.3,
            protect_radius: 10.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChargerConfig {
    pub count: usize,
    /// Drones charged simultaneously
    pub slots: usize,
    /// Battery restored per step while charging
    pub charge_rate: f64,
    /// Total drones a charger accepts (charging + waiting + incoming) per slot
    pub queue_per_slot: usize,
}

impl Default for ChargerConfig {
    fn default() -> Self {
        Self {
            count: 2,
            slots: 1,
            charge_rate: 0.04,
            queue_per_slot: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldConfig {
    pub count: usize,
    /// Maximum protecting drones per field
    pub places: usize,
}

impl Default for FieldConfig {
    fn default() -> Self {
        Self { count: 3, places: 2 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BirdConfig {
    pub count: usize,
    pub speed: f64,
    /// Crop damage per step for a bird standing in an unprotected field
    pub eat_rate: f64,
    /// A bird within this distance of a field is considered inside it
    pub field_radius: f64,
}

impl Default for BirdConfig {
    fn default() -> Self {
        Self {
            count: 6,
            speed: 3.0,
            eat_rate: 0.01,
            field_radius: 8.0,
        }
    }
}

/// Estimator training and data collection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Whether charger selection consults the wait-time estimate
    pub enabled: bool,
    /// Steps between refits of the wait-time estimator
    pub retrain_interval: u64,
    pub learning_rate: f64,
    pub epochs: usize,
    /// How repeated inputs for the same drone are folded
    pub collection_mode: CollectionMode,
    /// Pending inputs older than this many steps are evicted
    pub max_record_age: u64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retrain_interval: 50,
            learning_rate: 0.05,
            epochs: 200,
            collection_mode: CollectionMode::First,
            max_record_age: 200,
        }
    }
}

/// Complete scenario configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    pub world: WorldConfig,
    pub drones: DroneConfig,
    pub chargers: ChargerConfig,
    pub fields: FieldConfig,
    pub birds: BirdConfig,
    pub estimator: EstimatorConfig,
}

impl ScenarioConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load and validate configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: ScenarioConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration for internal consistency
    pub fn validate(&self) -> Result<()> {
        let floats = [
            ("world.width", self.world.width),
            ("world.height", self.world.height),
            ("drones.speed", self.drones.speed),
            ("drones.move_drain", self.drones.move_drain),
            ("drones.idle_drain", self.drones.idle_drain),
            ("drones.low_battery", self.drones.low_battery),
            ("drones.protect_radius", self.drones.protect_radius),
            ("chargers.charge_rate", self.chargers.charge_rate),
            ("birds.speed", self.birds.speed),
            ("birds.eat_rate", self.birds.eat_rate),
            ("birds.field_radius", self.birds.field_radius),
            ("estimator.learning_rate", self.estimator.learning_rate),
        ];
        if let Some((name, value)) = floats.iter().find(|(_, v)| !v.is_finite()) {
            return Err(EnsembleError::InvalidConfig(format!("{} must be finite, got {}", name, value)));
        }

        if self.world.width <= 0.0 || self.world.height <= 0.0 {
            return Err(EnsembleError::InvalidConfig(format!(
                "world size must be positive, got {}x{}",
                self.world.width, self.world.height
            )));
        }

        if !(0.0..=1.0).contains(&self.drones.low_battery) {
            return Err(EnsembleError::InvalidConfig(format!(
                "drones.low_battery ({}) must be within 0.0..=1.0",
                self.drones.low_battery
            )));
        }

        if self.drones.move_drain <= 0.0 || self.drones.idle_drain < 0.0 {
            return Err(EnsembleError::InvalidConfig(
                "drone drain rates must be positive".into(),
            ));
        }

        if self.drones.speed <= 0.0 || self.birds.speed < 0.0 {
            return Err(EnsembleError::InvalidConfig("speeds must be positive".into()));
        }

        if self.chargers.count > 0 && (self.chargers.slots == 0 || self.chargers.charge_rate <= 0.0) {
            return Err(EnsembleError::InvalidConfig(
                "chargers need at least one slot and a positive charge rate".into(),
            ));
        }

        if self.chargers.queue_per_slot == 0 {
            return Err(EnsembleError::InvalidConfig(
                "chargers.queue_per_slot must be at least 1".into(),
            ));
        }

        if self.estimator.retrain_interval == 0 {
            return Err(EnsembleError::InvalidConfig(
                "estimator.retrain_interval must be at least 1".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(ScenarioConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = ScenarioConfig::from_toml_str(
            r#"
            [drones]
            count = 3

            [estimator]
            collection_mode = "last"
            "#,
        )
        .unwrap();

        assert_eq!(config.drones.count, 3);
        assert_eq!(config.drones.speed, DroneConfig::default().speed);
        assert_eq!(config.estimator.collection_mode, CollectionMode::Last);
        assert_eq!(config.fields.places, 2);
    }

    #[test]
    fn test_invalid_low_battery_rejected() {
        let err = ScenarioConfig::from_toml_str("[drones]\nlow_battery = 1.5\n").unwrap_err();
        assert!(matches!(err, EnsembleError::InvalidConfig(_)));
    }

    #[test]
    fn test_malformed_toml_rejected() {
        let err = ScenarioConfig::from_toml_str("[drones\ncount = ").unwrap_err();
        assert!(matches!(err, EnsembleError::TomlError(_)));
    }

    #[test]
    fn test_non_finite_values_rejected() {
        for toml in [
            "[world]\nwidth = inf\n",
            "[world]\nheight = nan\n",
            "[drones]\nspeed = inf\n",
            "[drones]\nidle_drain = nan\n",
            "[birds]\nfield_radius = -inf\n",
            "[estimator]\nlearning_rate = nan\n",
        ] {
            let err = ScenarioConfig::from_toml_str(toml).unwrap_err();
            assert!(matches!(err, EnsembleError::InvalidConfig(_)), "accepted {:?}", toml);
        }

        let mut config = ScenarioConfig::default();
        config.chargers.charge_rate = f64::INFINITY;
        assert!(config.validate().is_err());
    }
}
