use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use validator::{Validate, ValidationError};

/// Top-level battery trading strategy
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BatteryStrategy {
    /// Charge from the grid when energy is cheap
    #[default]
    Buy,
    /// Recognised but not implemented
    Sell,
}

/// Operator settings: which controllers run and how they are tuned
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_current_bounds"))]
pub struct Settings {
    // general
    #[validate(range(min = 300, max = 1800))]
    pub refresh_interval_secs: u64,
    #[validate(range(min = 20, max = 90))]
    pub battery_upper_level: u8,

    // battery
    pub battery_enabled: bool,
    #[validate(range(min = 0.0, max = 200.0))]
    pub charge_threshold_eur: f64,
    #[validate(range(min = 0, max = 7))]
    pub max_charge_hours_key: usize,
    #[validate(range(min = 0.0, max = 100.0))]
    pub gradient_threshold: f64,
    #[validate(range(min = 0, max = 24))]
    pub local_extreme_hours_window: usize,
    pub battery_strategy: BatteryStrategy,

    // boiler
    pub boiler_enabled: bool,
    #[validate(range(min = 0, max = 10000))]
    pub boiler_consumption_w: u32,
    #[validate(range(min = 0, max = 100))]
    pub boiler_enable_battery_level: u8,
    #[validate(range(min = 0, max = 100))]
    pub boiler_almost_full_level: u8,

    // car
    pub car_enabled: bool,
    #[validate(range(min = 6, max = 40))]
    pub max_current_a: u32,
    #[validate(range(min = 6, max = 40))]
    pub min_current_a: u32,
    #[validate(range(min = 0, max = 100))]
    pub car_min_battery_level: u8,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 600,
            battery_upper_level: 80,
            battery_enabled: false,
            charge_threshold_eur: 20.0,
            max_charge_hours_key: 4,
            gradient_threshold: 10.0,
            local_extreme_hours_window: 3,
            battery_strategy: BatteryStrategy::Buy,
            boiler_enabled: true,
            boiler_consumption_w: 2000,
            boiler_enable_battery_level: 60,
            boiler_almost_full_level: 85,
            car_enabled: true,
            max_current_a: 16,
            min_current_a: 6,
            car_min_battery_level: 80,
        }
    }
}

fn validate_current_bounds(settings: &Settings) -> Result<(), ValidationError> {
    if settings.min_current_a > settings.max_current_a {
        let mut err = ValidationError::new("current_bounds");
        err.message = Some("min_current_a must not exceed max_current_a".into());
        return Err(err);
    }
    Ok(())
}
