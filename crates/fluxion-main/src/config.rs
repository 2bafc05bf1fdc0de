// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of FluxION.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

mod validation;

pub use validation::ValidationResult;

use anyhow::{Context, Result};
use fluxion_types::{DeviceMode, DispatchConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Planner, budget, thermal and scheduling parameters
    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub forecast: ForecastFileConfig,

    /// Simulated plant and devices used when no hardware is wired in
    #[serde(default)]
    pub simulation: SimulationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("data/decisions.db")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// CSV file with one forecast row per slot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastFileConfig {
    #[serde(default = "default_forecast_csv")]
    pub csv_path: PathBuf,
}

fn default_forecast_csv() -> PathBuf {
    PathBuf::from("data/forecast.csv")
}

impl Default for ForecastFileConfig {
    fn default() -> Self {
        Self {
            csv_path: default_forecast_csv(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// PV power reported as available for consumers (kW)
    #[serde(default = "default_available_pv_kw")]
    pub available_pv_kw: f64,
    /// Battery SOC reported by the simulated plant, fraction 0..1
    #[serde(default = "default_battery_soc")]
    pub battery_soc: f64,
    #[serde(default)]
    pub devices: Vec<SimulatedDeviceConfig>,
}

fn default_available_pv_kw() -> f64 {
    4.0
}

fn default_battery_soc() -> f64 {
    0.5
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            available_pv_kw: default_available_pv_kw(),
            battery_soc: default_battery_soc(),
            devices: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedDeviceConfig {
    pub id: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub mode: DeviceMode,
    /// Thermal proxy (%) reported in Standby; each mode step adds `heat_per_step`
    #[serde(default = "default_base_thermal")]
    pub base_thermal: f64,
    #[serde(default = "default_heat_per_step")]
    pub heat_per_step: f64,
}

fn default_base_thermal() -> f64 {
    25.0
}

fn default_heat_per_step() -> f64 {
    12.0
}

impl AppConfig {
    /// Load configuration from `path`, or from `config.toml` / `config.json`
    /// in the working directory, or from defaults with environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            let config = Self::from_file(path)?;
            info!("✅ Loaded configuration from {}", path.display());
            return Ok(config);
        }

        // Try config.toml for development
        if let Ok(config_str) = std::fs::read_to_string("config.toml") {
            let config: AppConfig =
                toml::from_str(&config_str).context("Failed to parse config.toml")?;
            info!("✅ Loaded configuration from config.toml");
            return Ok(config);
        }

        // Try config.json for development
        if let Ok(config_str) = std::fs::read_to_string("config.json") {
            let config: AppConfig =
                serde_json::from_str(&config_str).context("Failed to parse config.json")?;
            info!("✅ Loaded configuration from config.json");
            return Ok(config);
        }

        warn!("No configuration file found, using defaults with environment overrides");
        Ok(Self::from_env())
    }

    /// Parse a TOML or JSON file, chosen by extension
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))
        } else {
            toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
        }
    }

    /// Load from environment variables (development/testing)
    fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(debug_mode) = std::env::var("DEBUG_MODE")
            && let Ok(enabled) = debug_mode.parse::<bool>()
        {
            config.dispatch.scheduler.debug_mode = enabled;
        }

        if let Ok(limit) = std::env::var("CONFIGURED_LIMIT_KW")
            && let Ok(kw) = limit.parse::<f64>()
        {
            config.dispatch.budget.configured_limit_kw = kw;
        }

        if let Ok(path) = std::env::var("DATABASE_PATH") {
            config.storage.database_path = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("FORECAST_CSV") {
            config.forecast.csv_path = PathBuf::from(path);
        }

        config
    }

    /// Validate configuration with detailed error reporting
    pub fn validate_detailed(&self) -> ValidationResult {
        let mut result = ValidationResult::success();
        let d = &self.dispatch;

        // Battery
        let battery = &d.battery;
        if battery.capacity_kwh <= 0.0 {
            result.add_error("battery.capacity_kwh", "Must be positive");
        }
        if !(0.0..=1.0).contains(&battery.min_soc) {
            result.add_error("battery.min_soc", "Must be between 0.0 and 1.0");
        }
        if !(0.0..=1.0).contains(&battery.max_soc) {
            result.add_error("battery.max_soc", "Must be between 0.0 and 1.0");
        }
        if battery.min_soc >= battery.max_soc {
            result.add_error("battery.min_soc", "Must be less than max_soc");
        }
        if battery.max_charge_kw < 0.0 || battery.max_discharge_kw < 0.0 {
            result.add_error("battery.max_charge_kw", "Power limits must be non-negative");
        }
        for (field, value) in [
            ("battery.charge_efficiency", battery.charge_efficiency),
            ("battery.discharge_efficiency", battery.discharge_efficiency),
        ] {
            if value <= 0.0 || value > 1.0 {
                result.add_error(field, "Must be between 0.0 and 1.0");
            }
        }

        // Grid
        if d.grid.import_limit_kw < 0.0 {
            result.add_error("grid.import_limit_kw", "Must be non-negative");
        }
        if d.grid.export_limit_kw < 0.0 {
            result.add_error("grid.export_limit_kw", "Must be non-negative");
        } else if d.grid.export_limit_kw <= 0.0 {
            result.add_warning("grid.export_limit_kw", "No export will be planned");
        }

        // Planner
        let planner = &d.planner;
        if planner.horizon_slots == 0 {
            result.add_error("planner.horizon_slots", "Must be at least 1");
        }
        if planner.slot_minutes == 0 || 1440 % planner.slot_minutes != 0 {
            result.add_error("planner.slot_minutes", "Must divide a day evenly");
        }
        if planner.soc_quantum <= 0.0 || planner.soc_quantum > 0.5 {
            result.add_error("planner.soc_quantum", "Must be in (0.0, 0.5]");
        } else if planner.soc_quantum < 0.002 {
            result.add_warning(
                "planner.soc_quantum",
                format!(
                    "Very fine quantum ({}) makes planning slow",
                    planner.soc_quantum
                ),
            );
        }
        if planner.replan_interval_secs != d.scheduler.slow_interval_secs {
            result.add_warning(
                "planner.replan_interval_secs",
                "Differs from scheduler.slow_interval_secs, which drives re-planning",
            );
        }

        // Budget
        if d.budget.configured_limit_kw < 0.0 {
            result.add_error("budget.configured_limit_kw", "Must be non-negative");
        }
        if !d.budget.mode_power.is_monotonic() {
            result.add_error(
                "budget.mode_power",
                "Power draw must not decrease from Standby to Super",
            );
        }

        // Thermal
        if d.thermal.low_threshold >= d.thermal.high_threshold {
            result.add_error(
                "thermal.low_threshold",
                "Must be less than high_threshold",
            );
        }
        if d.thermal.window_samples == 0 {
            result.add_error("thermal.window_samples", "Must be at least 1");
        }

        // Price policy
        let policy = &d.price_policy;
        if policy.enabled && policy.wake_price_threshold >= policy.sleep_price_threshold {
            result.add_error(
                "price_policy.wake_price_threshold",
                "Must be less than sleep_price_threshold",
            );
        }
        if policy.wake_mode.is_standby() {
            result.add_error("price_policy.wake_mode", "Cannot wake into standby");
        }

        // Scheduler
        let scheduler = &d.scheduler;
        if scheduler.fast_interval_secs == 0 {
            result.add_error("scheduler.fast_interval_secs", "Must be at least 1 second");
        }
        if scheduler.slow_interval_secs < scheduler.fast_interval_secs {
            result.add_warning(
                "scheduler.slow_interval_secs",
                "Re-planning runs more often than the fast loop",
            );
        }
        if scheduler.max_concurrent_commands == 0 {
            result.add_error("scheduler.max_concurrent_commands", "Must be at least 1");
        }
        if scheduler.command_timeout_secs == 0 || scheduler.read_timeout_secs == 0 {
            result.add_error("scheduler.command_timeout_secs", "Timeouts must be positive");
        }

        // Simulation
        let mut seen = std::collections::HashSet::new();
        for (idx, device) in self.simulation.devices.iter().enumerate() {
            let prefix = format!("simulation.devices[{idx}]");
            if device.id.is_empty() {
                result.add_error(format!("{prefix}.id"), "Device ID cannot be empty");
            } else if !seen.insert(device.id.as_str()) {
                result.add_error(
                    format!("{prefix}.id"),
                    format!("Duplicate device ID '{}'", device.id),
                );
            }
        }
        if !(0.0..=1.0).contains(&self.simulation.battery_soc) {
            result.add_error("simulation.battery_soc", "Must be between 0.0 and 1.0");
        }

        result
    }

    /// Validate, logging warnings; fails on the first error set
    pub fn validate(&self) -> Result<()> {
        let result = self.validate_detailed();
        for issue in &result.warnings {
            warn!("⚠️  Config: {issue}");
        }
        if result.has_errors() {
            let errors: Vec<String> = result.errors.iter().map(ToString::to_string).collect();
            anyhow::bail!("Invalid configuration:\n  {}", errors.join("\n  "));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();

        assert!(config.dispatch.scheduler.debug_mode);
        assert_eq!(config.dispatch.planner.horizon_slots, 96);
        assert_eq!(config.storage.database_path, PathBuf::from("data/decisions.db"));
        assert!(config.simulation.devices.is_empty());

        // Validation should pass on default
        let result = config.validate_detailed();
        assert!(result.valid, "{:?}", result.errors);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_invalid_soc_range() {
        let mut config = AppConfig::default();
        config.dispatch.battery.min_soc = 0.9;
        config.dispatch.battery.max_soc = 0.5;

        let result = config.validate_detailed();
        assert!(!result.valid);
        assert!(result.mentions("battery.min_soc"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_price_thresholds() {
        let mut config = AppConfig::default();
        config.dispatch.price_policy.wake_price_threshold = 5.0;
        config.dispatch.price_policy.sleep_price_threshold = 4.0;
        assert!(
            config
                .validate_detailed()
                .mentions("price_policy.wake_price_threshold")
        );

        config.dispatch.price_policy.enabled = false;
        assert!(config.validate_detailed().valid);
    }

    #[test]
    fn test_validate_thermal_and_power_table() {
        let mut config = AppConfig::default();
        config.dispatch.thermal.low_threshold = 80.0;
        config.dispatch.budget.mode_power.eco_kw = 5.0;

        let result = config.validate_detailed();
        assert!(result.mentions("thermal.low_threshold"));
        assert!(result.mentions("budget.mode_power"));
    }

    #[test]
    fn test_validate_duplicate_devices() {
        let mut config = AppConfig::default();
        let device = SimulatedDeviceConfig {
            id: "miner-1".to_owned(),
            address: String::new(),
            mode: DeviceMode::Eco,
            base_thermal: default_base_thermal(),
            heat_per_step: default_heat_per_step(),
        };
        config.simulation.devices = vec![device.clone(), device];

        let result = config.validate_detailed();
        assert!(result.mentions("simulation.devices[1].id"));
    }

    #[test]
    fn test_quantum_warning_is_not_error() {
        let mut config = AppConfig::default();
        config.dispatch.planner.soc_quantum = 0.001;

        let result = config.validate_detailed();
        assert!(result.valid);
        assert!(result.mentions("planner.soc_quantum"));
    }

    #[test]
    fn test_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(
            file,
            r#"
[dispatch.budget]
configured_limit_kw = 6.5

[dispatch.scheduler]
debug_mode = false

[storage]
database_path = "/tmp/fluxion/decisions.db"

[[simulation.devices]]
id = "miner-1"
mode = "standard"

[[simulation.devices]]
id = "miner-2"
"#
        )
        .unwrap();

        let config = AppConfig::from_file(file.path()).unwrap();
        assert!((config.dispatch.budget.configured_limit_kw - 6.5).abs() < f64::EPSILON);
        assert!(!config.dispatch.scheduler.debug_mode);
        assert_eq!(config.simulation.devices.len(), 2);
        assert_eq!(config.simulation.devices[0].mode, DeviceMode::Standard);
        assert_eq!(config.simulation.devices[1].mode, DeviceMode::Standby);
        assert!((config.simulation.devices[1].heat_per_step - 12.0).abs() < f64::EPSILON);
        assert_eq!(config.forecast.csv_path, PathBuf::from("data/forecast.csv"));
    }

    #[test]
    fn test_json_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"dispatch": {{"thermal": {{"high_threshold": 80.0}}}}, "simulation": {{"available_pv_kw": 2.5}}}}"#
        )
        .unwrap();

        let config = AppConfig::from_file(file.path()).unwrap();
        assert!((config.dispatch.thermal.high_threshold - 80.0).abs() < f64::EPSILON);
        assert!((config.simulation.available_pv_kw - 2.5).abs() < f64::EPSILON);
        assert!((config.simulation.battery_soc - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_example_config_is_valid() {
        let config: AppConfig = toml::from_str(include_str!("../config.example.toml")).unwrap();
        assert_eq!(config.simulation.devices.len(), 2);
        let result = config.validate_detailed();
        assert!(result.valid, "{:?}", result.errors);
    }

    #[test]
    fn test_toml_serialization() {
        let config = AppConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.dispatch.planner.horizon_slots, config.dispatch.planner.horizon_slots);
        assert_eq!(parsed.storage.database_path, config.storage.database_path);
    }
}
