//! Fleet safety policy and admission control.
//!
//! Every tool call passes through [`SafetyPolicy::validate_operation`]
//! before it is allowed to execute. The policy classifies operations by
//! risk, enforces hard operational limits (altitude, speed, battery),
//! checks geofence volumes, and decides whether an operation may proceed,
//! needs operator confirmation, or is denied outright.

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How aggressively confirmations are requested.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalMode {
    /// Never ask; every admitted operation runs immediately.
    Yolo,
    /// Ask for operations the policy flags.
    #[default]
    Normal,
    /// Ask for everything not explicitly always-allowed.
    Strict,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

/// Admission verdict for one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Admission {
    Allow,
    Confirm,
    Deny,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneType {
    NoFly,
    Restricted,
    Caution,
}

/// Axis-aligned geographic volume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeofenceZone {
    pub name: String,
    pub zone_type: ZoneType,
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
    #[serde(default)]
    pub min_alt: f64,
    #[serde(default = "default_max_alt")]
    pub max_alt: f64,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_max_alt() -> f64 {
    f64::INFINITY
}

fn default_true() -> bool {
    true
}

impl GeofenceZone {
    pub fn contains(&self, lat: f64, lon: f64, alt: f64) -> bool {
        self.active
            && (self.min_lat..=self.max_lat).contains(&lat)
            && (self.min_lon..=self.max_lon).contains(&lon)
            && (self.min_alt..=self.max_alt).contains(&alt)
    }
}

/// Hard operational limits. Units: meters, m/s, percent, seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationLimits {
    pub min_altitude: f64,
    pub max_altitude: f64,
    pub max_horizontal_speed: f64,
    pub max_vertical_speed: f64,
    pub max_distance_from_home: f64,
    pub min_distance_between_vehicles: f64,
    pub min_battery_level: f64,
    pub critical_battery_level: f64,
    pub max_wind_speed: f64,
    pub max_flight_time: f64,
}

impl Default for OperationLimits {
    fn default() -> Self {
        Self {
            min_altitude: 0.0,
            max_altitude: 120.0,
            max_horizontal_speed: 15.0,
            max_vertical_speed: 5.0,
            max_distance_from_home: 5000.0,
            min_distance_between_vehicles: 5.0,
            min_battery_level: 20.0,
            critical_battery_level: 10.0,
            max_wind_speed: 10.0,
            max_flight_time: 1800.0,
        }
    }
}

impl OperationLimits {
    pub fn validate_altitude(&self, altitude: f64) -> Result<(), String> {
        if altitude < self.min_altitude {
            return Err(format!(
                "altitude {altitude:.1}m is below the minimum of {:.1}m",
                self.min_altitude
            ));
        }
        if altitude > self.max_altitude {
            return Err(format!(
                "altitude {altitude:.1}m exceeds the maximum of {:.1}m",
                self.max_altitude
            ));
        }
        Ok(())
    }

    pub fn validate_speed(&self, horizontal: f64, vertical: f64) -> Result<(), String> {
        if horizontal.abs() > self.max_horizontal_speed {
            return Err(format!(
                "horizontal speed {horizontal:.1}m/s exceeds the maximum of {:.1}m/s",
                self.max_horizontal_speed
            ));
        }
        if vertical.abs() > self.max_vertical_speed {
            return Err(format!(
                "vertical speed {vertical:.1}m/s exceeds the maximum of {:.1}m/s",
                self.max_vertical_speed
            ));
        }
        Ok(())
    }

    pub fn validate_battery(&self, level: f64) -> Result<(), String> {
        if level <= self.critical_battery_level {
            return Err(format!(
                "battery at {level:.0}% is at or below the critical level of {:.0}%",
                self.critical_battery_level
            ));
        }
        if level < self.min_battery_level {
            return Err(format!(
                "battery at {level:.0}% is below the minimum of {:.0}% required for flight operations",
                self.min_battery_level
            ));
        }
        Ok(())
    }
}

/// Policy state. Mutated only through explicit configuration methods,
/// never from the scheduling path.
#[derive(Debug, Clone)]
pub struct SafetyPolicy {
    limits: OperationLimits,
    geofences: Vec<GeofenceZone>,
    risk_table: HashMap<String, RiskLevel>,
    confirmation_required: HashSet<String>,
    always_allowed: HashSet<String>,
    always_denied: HashSet<String>,
}

/// Built-in risk classification for the fleet operation vocabulary.
static DEFAULT_RISK_TABLE: Lazy<HashMap<String, RiskLevel>> = Lazy::new(|| {
    let mut table = HashMap::new();
    for op in ["vehicle.arm", "vehicle.takeoff", "fleet.assemble", "fleet.disperse"] {
        table.insert(op.to_string(), RiskLevel::High);
    }
    for op in [
        "vehicle.goto",
        "vehicle.set_velocity",
        "fleet.sync_maneuver",
        "fleet.follow_leader",
    ] {
        table.insert(op.to_string(), RiskLevel::Medium);
    }
    for op in ["vehicle.status", "vehicle.land", "vehicle.position"] {
        table.insert(op.to_string(), RiskLevel::Low);
    }
    table
});

impl Default for SafetyPolicy {
    fn default() -> Self {
        let risk_table = DEFAULT_RISK_TABLE.clone();

        let confirmation_required = risk_table
            .iter()
            .filter(|(_, risk)| **risk >= RiskLevel::High)
            .map(|(op, _)| op.clone())
            .collect();

        let always_allowed = ["vehicle.status", "vehicle.position", "vehicle.battery"]
            .into_iter()
            .map(str::to_string)
            .collect();

        Self {
            limits: OperationLimits::default(),
            geofences: Vec::new(),
            risk_table,
            confirmation_required,
            always_allowed,
            always_denied: HashSet::new(),
        }
    }
}

impl SafetyPolicy {
    pub fn with_limits(limits: OperationLimits) -> Self {
        Self {
            limits,
            ..Self::default()
        }
    }

    pub fn limits(&self) -> &OperationLimits {
        &self.limits
    }

    pub fn risk_level(&self, operation: &str) -> RiskLevel {
        self.risk_table.get(operation).copied().unwrap_or_default()
    }

    pub fn add_geofence(&mut self, zone: GeofenceZone) {
        self.geofences.push(zone);
    }

    pub fn deny_operation(&mut self, operation: impl Into<String>) {
        self.always_denied.insert(operation.into());
    }

    pub fn require_confirmation_for(&mut self, operation: impl Into<String>) {
        self.confirmation_required.insert(operation.into());
    }

    /// Whether this operation needs operator confirmation under `mode`.
    pub fn requires_confirmation(&self, operation: &str, mode: ApprovalMode) -> bool {
        match mode {
            ApprovalMode::Yolo => false,
            ApprovalMode::Strict => !self.always_allowed.contains(operation),
            ApprovalMode::Normal => {
                if self.always_allowed.contains(operation) {
                    return false;
                }
                self.confirmation_required.contains(operation)
                    || self.risk_level(operation) >= RiskLevel::Medium
            }
        }
    }

    fn check_geofence(&self, lat: f64, lon: f64, alt: f64) -> Result<(), String> {
        for zone in &self.geofences {
            if zone.contains(lat, lon, alt) {
                match zone.zone_type {
                    ZoneType::NoFly | ZoneType::Restricted => {
                        return Err(format!(
                            "target position is inside {} zone '{}'",
                            match zone.zone_type {
                                ZoneType::NoFly => "no-fly",
                                _ => "restricted",
                            },
                            zone.name
                        ));
                    }
                    ZoneType::Caution => continue,
                }
            }
        }
        Ok(())
    }

    /// Admission check for one operation with its argument map.
    ///
    /// Check order: deny-list, geofence, altitude, speed, battery,
    /// confirmation set. The first violated check wins.
    pub fn validate_operation(&self, operation: &str, params: &Value) -> (Admission, String) {
        if self.always_denied.contains(operation) {
            return (
                Admission::Deny,
                format!("operation '{operation}' is denied by policy"),
            );
        }

        let alt = param_f64(params, &["alt", "altitude"]);
        if let (Some(lat), Some(lon)) = (
            param_f64(params, &["lat", "latitude"]),
            param_f64(params, &["lon", "longitude"]),
        ) {
            if let Err(reason) = self.check_geofence(lat, lon, alt.unwrap_or(0.0)) {
                return (Admission::Deny, reason);
            }
        }

        if let Some(alt) = alt {
            if let Err(reason) = self.limits.validate_altitude(alt) {
                return (Admission::Deny, reason);
            }
        }

        let horizontal = param_f64(params, &["speed", "horizontal_speed", "vx"]);
        let vertical = param_f64(params, &["vertical_speed", "vz"]);
        if horizontal.is_some() || vertical.is_some() {
            if let Err(reason) = self
                .limits
                .validate_speed(horizontal.unwrap_or(0.0), vertical.unwrap_or(0.0))
            {
                return (Admission::Deny, reason);
            }
        }

        if let Some(battery) = param_f64(params, &["battery", "battery_level"]) {
            if let Err(reason) = self.limits.validate_battery(battery) {
                return (Admission::Deny, reason);
            }
        }

        if self.confirmation_required.contains(operation) {
            return (
                Admission::Confirm,
                format!(
                    "operation '{operation}' is rated {:?} risk and requires confirmation",
                    self.risk_level(operation)
                ),
            );
        }

        (Admission::Allow, String::new())
    }
}

fn param_f64(params: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|key| params.get(key)?.as_f64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn low_battery_is_denied_with_threshold() {
        let policy = SafetyPolicy::default();
        let (admission, reason) =
            policy.validate_operation("vehicle.takeoff", &json!({"battery": 15.0}));
        assert_eq!(admission, Admission::Deny);
        assert!(reason.contains("15%"));
        assert!(reason.contains("20%"));
    }

    #[test]
    fn critical_battery_beats_minimum_message() {
        let policy = SafetyPolicy::default();
        let (admission, reason) =
            policy.validate_operation("vehicle.takeoff", &json!({"battery": 8.0}));
        assert_eq!(admission, Admission::Deny);
        assert!(reason.contains("critical"));
    }

    #[test]
    fn no_fly_zone_denies_goto() {
        let mut policy = SafetyPolicy::default();
        policy.add_geofence(GeofenceZone {
            name: "airport".to_string(),
            zone_type: ZoneType::NoFly,
            min_lat: 37.0,
            max_lat: 38.0,
            min_lon: -123.0,
            max_lon: -122.0,
            min_alt: 0.0,
            max_alt: f64::INFINITY,
            active: true,
        });

        let (admission, reason) =
            policy.validate_operation("vehicle.goto", &json!({"lat": 37.5, "lon": -122.5}));
        assert_eq!(admission, Admission::Deny);
        assert!(reason.contains("airport"));

        let (admission, _) =
            policy.validate_operation("vehicle.goto", &json!({"lat": 40.0, "lon": -122.5}));
        assert_ne!(admission, Admission::Deny);
    }

    #[test]
    fn inactive_zone_is_ignored() {
        let mut policy = SafetyPolicy::default();
        policy.add_geofence(GeofenceZone {
            name: "temp".to_string(),
            zone_type: ZoneType::NoFly,
            min_lat: 0.0,
            max_lat: 1.0,
            min_lon: 0.0,
            max_lon: 1.0,
            min_alt: 0.0,
            max_alt: f64::INFINITY,
            active: false,
        });
        let (admission, _) =
            policy.validate_operation("vehicle.goto", &json!({"lat": 0.5, "lon": 0.5}));
        assert_ne!(admission, Admission::Deny);
    }

    #[test]
    fn altitude_and_speed_limits() {
        let policy = SafetyPolicy::default();
        let (admission, reason) =
            policy.validate_operation("vehicle.takeoff", &json!({"altitude": 150.0}));
        assert_eq!(admission, Admission::Deny);
        assert!(reason.contains("120.0m"));

        let (admission, _) =
            policy.validate_operation("vehicle.set_velocity", &json!({"speed": 25.0}));
        assert_eq!(admission, Admission::Deny);
    }

    #[test]
    fn high_risk_requires_confirmation() {
        let policy = SafetyPolicy::default();
        let (admission, _) = policy.validate_operation("vehicle.arm", &json!({}));
        assert_eq!(admission, Admission::Confirm);

        let (admission, _) = policy.validate_operation("vehicle.status", &json!({}));
        assert_eq!(admission, Admission::Allow);
    }

    #[test]
    fn deny_list_wins_over_everything() {
        let mut policy = SafetyPolicy::default();
        policy.deny_operation("fleet.disperse");
        let (admission, reason) = policy.validate_operation("fleet.disperse", &json!({}));
        assert_eq!(admission, Admission::Deny);
        assert!(reason.contains("denied by policy"));
    }

    #[test]
    fn approval_modes() {
        let policy = SafetyPolicy::default();
        assert!(!policy.requires_confirmation("vehicle.arm", ApprovalMode::Yolo));
        assert!(policy.requires_confirmation("vehicle.arm", ApprovalMode::Normal));
        assert!(policy.requires_confirmation("vehicle.goto", ApprovalMode::Normal));
        assert!(!policy.requires_confirmation("vehicle.land", ApprovalMode::Normal));
        assert!(policy.requires_confirmation("vehicle.land", ApprovalMode::Strict));
        assert!(!policy.requires_confirmation("vehicle.status", ApprovalMode::Strict));
    }

    #[test]
    fn unknown_operation_defaults_to_low_risk() {
        let policy = SafetyPolicy::default();
        assert_eq!(policy.risk_level("camera.snapshot"), RiskLevel::Low);
        let (admission, _) = policy.validate_operation("camera.snapshot", &json!({}));
        assert_eq!(admission, Admission::Allow);
    }
}
