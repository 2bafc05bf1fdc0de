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

/// Forecast for one future slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ForecastSlot {
    /// Slot start, epoch seconds
    pub timestamp: i64,
    /// Price paid per imported kWh
    pub import_price: f64,
    /// Price received per exported kWh
    pub export_price: f64,
    /// Expected average solar generation (kW)
    pub solar_kw: f64,
    /// Expected average household load (kW)
    pub load_kw: f64,
    #[serde(default)]
    pub air_temperature: Option<f64>,
    #[serde(default)]
    pub battery_cell_temperature: Option<f64>,
    /// Cloud coverage 0-100 %
    #[serde(default)]
    pub cloud_coverage: Option<f64>,
    #[serde(default)]
    pub weather_symbol: Option<String>,
}

impl ForecastSlot {
    /// All numeric inputs the planner relies on are finite and non-negative
    /// where a negative value has no meaning. Prices may be negative.
    pub fn is_usable(&self) -> bool {
        self.import_price.is_finite()
            && self.export_price.is_finite()
            && self.solar_kw.is_finite()
            && self.solar_kw >= 0.0
            && self.load_kw.is_finite()
            && self.load_kw >= 0.0
    }
}

/// Instantaneous plant power reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlantSnapshot {
    pub solar_kw: f64,
    /// Positive = charging
    pub battery_kw: f64,
    /// Positive = importing
    pub grid_kw: f64,
    /// Battery state of charge, fraction 0..1
    pub battery_soc: f64,
    pub captured_at: DateTime<Utc>,
}

/// Align `ts` down to the start of its slot
pub fn slot_start(ts: i64, slot_seconds: i64) -> i64 {
    if slot_seconds <= 0 {
        return ts;
    }
    ts.div_euclid(slot_seconds) * slot_seconds
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_start_alignment() {
        assert_eq!(slot_start(3600, 900), 3600);
        assert_eq!(slot_start(3601, 900), 3600);
        assert_eq!(slot_start(4499, 900), 3600);
        assert_eq!(slot_start(-1, 900), -900);
        assert_eq!(slot_start(123, 0), 123);
    }

    #[test]
    fn test_usable_slot() {
        let slot = ForecastSlot {
            import_price: -0.5,
            solar_kw: 3.0,
            load_kw: 0.4,
            ..Default::default()
        };
        assert!(slot.is_usable());

        let nan = ForecastSlot {
            solar_kw: f64::NAN,
            ..slot.clone()
        };
        assert!(!nan.is_usable());

        let negative_load = ForecastSlot {
            load_kw: -1.0,
            ..slot
        };
        assert!(!negative_load.is_usable());
    }
}
