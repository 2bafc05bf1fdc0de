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

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============= Inverter Directive =============

/// What the inverter should be told for a slot.
///
/// Derived from the PV/grid split of the planned charge: grid-sourced charge
/// needs an explicit command, PV-surplus charge happens on its own in
/// self-use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum InverterDirective {
    #[default]
    SelfUse,
    CommandCharge,
}

impl fmt::Display for InverterDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SelfUse => write!(f, "Self-Use"),
            Self::CommandCharge => write!(f, "Command-Charge"),
        }
    }
}

// ============= Time Slot Decision =============

/// Planned dispatch for one slot of the horizon.
///
/// Powers are average kW over the slot and always non-negative. Energy
/// prices are per kWh. `battery_soc` is the state of charge at the *start*
/// of the slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TimeSlotDecision {
    /// Slot start, epoch seconds
    pub timestamp: i64,
    /// Position within the horizon at computation time
    pub slot_index: u32,

    pub battery_charge_from_pv: f64,
    pub battery_charge_from_grid: f64,
    pub battery_discharge: f64,
    pub grid_import: f64,
    pub grid_export: f64,
    pub battery_soc: f64,

    /// Monetary result of the slot
    pub profit: f64,

    pub import_price: f64,
    pub export_price: f64,
    pub solar_forecast: f64,
    pub load_forecast: f64,
    /// Solar that could be neither used, stored nor exported
    #[serde(default)]
    pub solar_curtailed: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_coverage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weather_symbol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery_avg_cell_temp: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub air_temperature: Option<f64>,

    pub battery_preheat_active: bool,
    #[serde(default)]
    pub preheat_cost: f64,
}

impl TimeSlotDecision {
    /// Total planned charge (PV + grid), stored as the legacy `battery_charge` column
    pub fn battery_charge(&self) -> f64 {
        self.battery_charge_from_pv + self.battery_charge_from_grid
    }

    /// Inverter command implied by the charge split
    pub fn inverter_directive(&self) -> InverterDirective {
        if self.battery_charge_from_grid > 0.0 {
            InverterDirective::CommandCharge
        } else {
            InverterDirective::SelfUse
        }
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.timestamp, 0)
    }

    /// Whether `ts` falls inside this slot given the slot width
    pub fn contains(&self, ts: i64, slot_seconds: i64) -> bool {
        ts >= self.timestamp && ts < self.timestamp + slot_seconds
    }
}
