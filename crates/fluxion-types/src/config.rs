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

use serde::{Deserialize, Serialize};

use crate::device::{DeviceMode, ModePowerTable};

// ============= Dispatch Configuration =============

/// Central configuration for the dispatch core
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default)]
    pub battery: BatteryConfig,
    #[serde(default)]
    pub grid: GridConfig,
    #[serde(default)]
    pub preheat: PreheatConfig,
    #[serde(default)]
    pub planner: PlannerConfig,
    #[serde(default)]
    pub budget: BudgetConfig,
    #[serde(default)]
    pub thermal: ThermalConfig,
    #[serde(default)]
    pub price_policy: PricePolicyConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

// ============= Battery =============

/// Battery model parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatteryConfig {
    /// Usable capacity (kWh)
    #[serde(default = "default_capacity_kwh")]
    pub capacity_kwh: f64,
    /// Lower SOC bound, fraction 0..1
    #[serde(default = "default_min_soc")]
    pub min_soc: f64,
    /// Upper SOC bound, fraction 0..1
    #[serde(default = "default_max_soc")]
    pub max_soc: f64,
    #[serde(default = "default_max_charge_kw")]
    pub max_charge_kw: f64,
    #[serde(default = "default_max_discharge_kw")]
    pub max_discharge_kw: f64,
    #[serde(default = "default_efficiency")]
    pub charge_efficiency: f64,
    #[serde(default = "default_efficiency")]
    pub discharge_efficiency: f64,
}

fn default_capacity_kwh() -> f64 {
    10.0
}

fn default_min_soc() -> f64 {
    0.1
}

fn default_max_soc() -> f64 {
    1.0
}

fn default_max_charge_kw() -> f64 {
    5.0
}

fn default_max_discharge_kw() -> f64 {
    5.0
}

fn default_efficiency() -> f64 {
    0.95
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            capacity_kwh: default_capacity_kwh(),
            min_soc: default_min_soc(),
            max_soc: default_max_soc(),
            max_charge_kw: default_max_charge_kw(),
            max_discharge_kw: default_max_discharge_kw(),
            charge_efficiency: default_efficiency(),
            discharge_efficiency: default_efficiency(),
        }
    }
}

// ============= Grid =============

/// Grid connection limits (kW)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridConfig {
    #[serde(default = "default_import_limit_kw")]
    pub import_limit_kw: f64,
    #[serde(default = "default_export_limit_kw")]
    pub export_limit_kw: f64,
}

fn default_import_limit_kw() -> f64 {
    17.0
}

fn default_export_limit_kw() -> f64 {
    10.0
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            import_limit_kw: default_import_limit_kw(),
            export_limit_kw: default_export_limit_kw(),
        }
    }
}

// ============= Battery Preheat =============

/// How much it costs to warm a cold battery before charging
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PreheatCostModel {
    /// Flat energy per charging slot
    Fixed { energy_kwh: f64 },
    /// Energy proportional to the degrees below the threshold
    PerDegree { kwh_per_degree: f64 },
}

impl Default for PreheatCostModel {
    fn default() -> Self {
        Self::Fixed { energy_kwh: 0.5 }
    }
}

impl PreheatCostModel {
    /// Preheat energy (kWh) for a slot whose cells sit at `cell_temp`
    pub fn energy_kwh(&self, cell_temp: f64, threshold: f64) -> f64 {
        match *self {
            Self::Fixed { energy_kwh } => energy_kwh.max(0.0),
            Self::PerDegree { kwh_per_degree } => {
                (threshold - cell_temp).max(0.0) * kwh_per_degree.max(0.0)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreheatConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Cells below this temperature (°C) need heating before charging
    #[serde(default = "default_preheat_threshold_c")]
    pub threshold_c: f64,
    #[serde(default)]
    pub cost_model: PreheatCostModel,
}

fn default_true() -> bool {
    true
}

fn default_preheat_threshold_c() -> f64 {
    5.0
}

impl Default for PreheatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_c: default_preheat_threshold_c(),
            cost_model: PreheatCostModel::default(),
        }
    }
}

// ============= Planner =============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Number of slots planned ahead
    #[serde(default = "default_horizon_slots")]
    pub horizon_slots: usize,
    #[serde(default = "default_slot_minutes")]
    pub slot_minutes: u32,
    /// SOC lattice step as a fraction of capacity
    #[serde(default = "default_soc_quantum")]
    pub soc_quantum: f64,
    #[serde(default = "default_replan_interval_secs")]
    pub replan_interval_secs: u64,
    #[serde(default = "default_forecast_timeout_secs")]
    pub forecast_timeout_secs: u64,
    /// Past decisions older than this are pruned after each re-plan
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// When false, solar beyond load + charge + export makes a slot infeasible
    #[serde(default = "default_true")]
    pub allow_curtailment: bool,
    /// Price per kWh assigned to energy left in the battery at the end of the
    /// horizon, in the same currency as the slot prices
    #[serde(default)]
    pub terminal_value_per_kwh: f64,
}

fn default_horizon_slots() -> usize {
    96
}

fn default_slot_minutes() -> u32 {
    15
}

fn default_soc_quantum() -> f64 {
    0.005
}

fn default_replan_interval_secs() -> u64 {
    900
}

fn default_forecast_timeout_secs() -> u64 {
    30
}

fn default_retention_days() -> u32 {
    30
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            horizon_slots: default_horizon_slots(),
            slot_minutes: default_slot_minutes(),
            soc_quantum: default_soc_quantum(),
            replan_interval_secs: default_replan_interval_secs(),
            forecast_timeout_secs: default_forecast_timeout_secs(),
            retention_days: default_retention_days(),
            allow_curtailment: true,
            terminal_value_per_kwh: 0.0,
        }
    }
}

impl PlannerConfig {
    pub fn slot_seconds(&self) -> i64 {
        i64::from(self.slot_minutes) * 60
    }

    /// Slot width in hours
    pub fn slot_hours(&self) -> f64 {
        f64::from(self.slot_minutes) / 60.0
    }
}

// ============= Power Budget =============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Hard ceiling for device consumption regardless of PV (kW)
    #[serde(default = "default_configured_limit_kw")]
    pub configured_limit_kw: f64,
    #[serde(default)]
    pub mode_power: ModePowerTable,
}

fn default_configured_limit_kw() -> f64 {
    30.0
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            configured_limit_kw: default_configured_limit_kw(),
            mode_power: ModePowerTable::default(),
        }
    }
}

// ============= Thermal Guard =============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThermalConfig {
    /// Above this thermal proxy (%) a device is demoted immediately
    #[serde(default = "default_high_threshold")]
    pub high_threshold: f64,
    /// A full window at or below this proxy (%) allows an upgrade
    #[serde(default = "default_low_threshold")]
    pub low_threshold: f64,
    #[serde(default = "default_window_samples")]
    pub window_samples: usize,
    /// Thermal upgrades never go beyond this mode
    #[serde(default = "default_max_mode")]
    pub max_mode: DeviceMode,
}

fn default_high_threshold() -> f64 {
    70.0
}

fn default_low_threshold() -> f64 {
    50.0
}

fn default_window_samples() -> usize {
    5
}

fn default_max_mode() -> DeviceMode {
    DeviceMode::Super
}

impl Default for ThermalConfig {
    fn default() -> Self {
        Self {
            high_threshold: default_high_threshold(),
            low_threshold: default_low_threshold(),
            window_samples: default_window_samples(),
            max_mode: default_max_mode(),
        }
    }
}

// ============= Price Policy =============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePolicyConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Standby devices are woken when import is at or below this price
    #[serde(default = "default_wake_price_threshold")]
    pub wake_price_threshold: f64,
    /// Running devices are put to sleep when import is at or above this price
    #[serde(default = "default_sleep_price_threshold")]
    pub sleep_price_threshold: f64,
    #[serde(default = "default_wake_mode")]
    pub wake_mode: DeviceMode,
}

fn default_wake_price_threshold() -> f64 {
    1.0
}

fn default_sleep_price_threshold() -> f64 {
    4.0
}

fn default_wake_mode() -> DeviceMode {
    DeviceMode::Eco
}

impl Default for PricePolicyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            wake_price_threshold: default_wake_price_threshold(),
            sleep_price_threshold: default_sleep_price_threshold(),
            wake_mode: default_wake_mode(),
        }
    }
}

// ============= Scheduler =============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Fast enforcement loop period
    #[serde(default = "default_fast_interval_secs")]
    pub fast_interval_secs: u64,
    /// Slow re-plan loop period
    #[serde(default = "default_replan_interval_secs")]
    pub slow_interval_secs: u64,
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_max_concurrent_commands")]
    pub max_concurrent_commands: usize,
    /// Log and simulate commands instead of sending them (safe default)
    #[serde(default = "default_true")]
    pub debug_mode: bool,
}

fn default_fast_interval_secs() -> u64 {
    60
}

fn default_command_timeout_secs() -> u64 {
    10
}

fn default_read_timeout_secs() -> u64 {
    5
}

fn default_max_concurrent_commands() -> usize {
    4
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            fast_interval_secs: default_fast_interval_secs(),
            slow_interval_secs: default_replan_interval_secs(),
            command_timeout_secs: default_command_timeout_secs(),
            read_timeout_secs: default_read_timeout_secs(),
            max_concurrent_commands: default_max_concurrent_commands(),
            debug_mode: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config: DispatchConfig = toml::from_str("").unwrap();
        assert_eq!(config.planner.horizon_slots, 96);
        assert_eq!(config.planner.slot_seconds(), 900);
        assert!((config.planner.soc_quantum - 0.005).abs() < 1e-12);
        assert_eq!(config.planner.retention_days, 30);
        assert!(config.scheduler.debug_mode);
        assert_eq!(config.thermal.max_mode, DeviceMode::Super);
        assert!((config.budget.mode_power.standard_kw - 1.6).abs() < 1e-12);
    }

    #[test]
    fn test_partial_sections() {
        let config: DispatchConfig = toml::from_str(
            r#"
            [battery]
            capacity_kwh = 15.0

            [thermal]
            high_threshold = 80.0
            max_mode = "standard"

            [preheat.cost_model]
            type = "per_degree"
            kwh_per_degree = 0.1
            "#,
        )
        .unwrap();

        assert!((config.battery.capacity_kwh - 15.0).abs() < 1e-12);
        assert!((config.battery.min_soc - 0.1).abs() < 1e-12);
        assert!((config.thermal.high_threshold - 80.0).abs() < 1e-12);
        assert!((config.thermal.low_threshold - 50.0).abs() < 1e-12);
        assert_eq!(config.thermal.max_mode, DeviceMode::Standard);
        assert_eq!(
            config.preheat.cost_model,
            PreheatCostModel::PerDegree { kwh_per_degree: 0.1 }
        );
    }

    #[test]
    fn test_preheat_energy() {
        let fixed = PreheatCostModel::Fixed { energy_kwh: 0.5 };
        assert!((fixed.energy_kwh(-10.0, 5.0) - 0.5).abs() < 1e-12);

        let per_degree = PreheatCostModel::PerDegree { kwh_per_degree: 0.1 };
        assert!((per_degree.energy_kwh(0.0, 5.0) - 0.5).abs() < 1e-12);
        assert!(per_degree.energy_kwh(6.0, 5.0).abs() < 1e-12);
    }
}
