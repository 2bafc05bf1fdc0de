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

//! Shared data types for FluxION dispatch.
//!
//! Everything here is plain data: device modes and readings, per-slot
//! dispatch decisions, forecast slots and the configuration tree. The
//! behaviour lives in `fluxion-dispatch`.

pub mod config;
pub mod decision;
pub mod device;
pub mod forecast;

// Re-export common types for convenience
pub use config::{
    BatteryConfig, BudgetConfig, DispatchConfig, GridConfig, PlannerConfig, PreheatConfig,
    PreheatCostModel, PricePolicyConfig, SchedulerConfig, ThermalConfig,
};
pub use decision::{InverterDirective, TimeSlotDecision};
pub use device::{DeviceHandle, DeviceMode, DeviceReading, DeviceState, ModePowerTable};
pub use forecast::{ForecastSlot, PlantSnapshot, slot_start};
