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

//! Battery and grid model of a single slot.

use fluxion_types::{BatteryConfig, DispatchConfig, ForecastSlot, GridConfig, PreheatConfig};

use crate::error::{DispatchError, Result};

/// Float tolerance for limit checks
pub(crate) const EPS: f64 = 1e-9;

/// Static parameters of one planning run
#[derive(Debug, Clone, PartialEq)]
pub struct PlanParams {
    pub battery: BatteryConfig,
    pub grid: GridConfig,
    pub preheat: PreheatConfig,
    pub horizon_slots: usize,
    pub slot_seconds: i64,
    pub soc_quantum: f64,
    pub allow_curtailment: bool,
    pub terminal_value_per_kwh: f64,
}

impl PlanParams {
    pub fn from_config(config: &DispatchConfig) -> Result<Self> {
        let params = Self {
            battery: config.battery.clone(),
            grid: config.grid.clone(),
            preheat: config.preheat.clone(),
            horizon_slots: config.planner.horizon_slots,
            slot_seconds: config.planner.slot_seconds(),
            soc_quantum: config.planner.soc_quantum,
            allow_curtailment: config.planner.allow_curtailment,
            terminal_value_per_kwh: config.planner.terminal_value_per_kwh,
        };
        params.check()?;
        Ok(params)
    }

    fn check(&self) -> Result<()> {
        let b = &self.battery;
        let invalid = |msg: &str| Err(DispatchError::Config(msg.to_owned()));

        if !(b.capacity_kwh.is_finite() && b.capacity_kwh > 0.0) {
            return invalid("battery capacity must be positive");
        }
        if !(0.0..=1.0).contains(&b.min_soc) || !(0.0..=1.0).contains(&b.max_soc) {
            return invalid("battery SOC bounds must lie within [0, 1]");
        }
        if b.min_soc > b.max_soc {
            return invalid("battery min_soc exceeds max_soc");
        }
        for eff in [b.charge_efficiency, b.discharge_efficiency] {
            if !(eff > 0.0 && eff <= 1.0) {
                return invalid("battery efficiencies must lie within (0, 1]");
            }
        }
        if b.max_charge_kw < 0.0 || b.max_discharge_kw < 0.0 {
            return invalid("battery power limits must not be negative");
        }
        if self.grid.import_limit_kw < 0.0 || self.grid.export_limit_kw < 0.0 {
            return invalid("grid limits must not be negative");
        }
        if !(self.soc_quantum > 0.0 && self.soc_quantum <= 1.0) {
            return invalid("soc_quantum must lie within (0, 1]");
        }
        if self.slot_seconds <= 0 {
            return invalid("slot width must be positive");
        }
        if self.horizon_slots == 0 {
            return invalid("horizon must contain at least one slot");
        }
        Ok(())
    }

    /// Slot width in hours
    #[expect(clippy::cast_precision_loss)]
    pub fn slot_hours(&self) -> f64 {
        self.slot_seconds as f64 / 3600.0
    }

    /// Stored energy change (kWh) represented by one lattice step
    pub fn quantum_kwh(&self) -> f64 {
        self.soc_quantum * self.battery.capacity_kwh
    }
}

/// Forecast values the solver needs for one slot
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlotInput {
    pub timestamp: i64,
    pub import_price: f64,
    pub export_price: f64,
    pub solar_kw: f64,
    pub load_kw: f64,
    pub cell_temp: Option<f64>,
}

impl From<&ForecastSlot> for SlotInput {
    fn from(slot: &ForecastSlot) -> Self {
        Self {
            timestamp: slot.timestamp,
            import_price: slot.import_price,
            export_price: slot.export_price,
            solar_kw: slot.solar_kw,
            load_kw: slot.load_kw,
            cell_temp: slot.battery_cell_temperature,
        }
    }
}

impl SlotInput {
    /// Same slot with no solar generation
    #[must_use]
    pub fn without_solar(self) -> Self {
        Self {
            solar_kw: 0.0,
            ..self
        }
    }
}

/// Power flows and money of one slot for a fixed battery energy change
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SlotFlows {
    pub charge_kw: f64,
    pub discharge_kw: f64,
    pub import_kw: f64,
    pub export_kw: f64,
    pub curtailed_kw: f64,
    pub preheat_active: bool,
    pub preheat_cost: f64,
    pub profit: f64,
}

/// Resolve one slot for a stored-energy change of `delta_kwh`.
///
/// Charge and discharge follow from the SOC recursion, grid flows from the
/// power balance `solar + import + discharge = load + export + charge`.
/// Returns `None` if a battery or grid limit would be violated.
pub fn evaluate_slot(params: &PlanParams, slot: &SlotInput, delta_kwh: f64) -> Option<SlotFlows> {
    let dt = params.slot_hours();
    let battery = &params.battery;

    let (charge_kw, discharge_kw) = if delta_kwh >= 0.0 {
        (delta_kwh / (dt * battery.charge_efficiency), 0.0)
    } else {
        (0.0, -delta_kwh * battery.discharge_efficiency / dt)
    };
    if charge_kw > battery.max_charge_kw + EPS || discharge_kw > battery.max_discharge_kw + EPS {
        return None;
    }

    let net_kw = slot.solar_kw + discharge_kw - slot.load_kw - charge_kw;
    let (import_kw, mut export_kw) = if net_kw >= 0.0 {
        (0.0, net_kw)
    } else {
        (-net_kw, 0.0)
    };
    if import_kw > params.grid.import_limit_kw + EPS {
        return None;
    }

    let mut curtailed_kw = 0.0;
    if export_kw > params.grid.export_limit_kw + EPS {
        if !params.allow_curtailment {
            return None;
        }
        // Curtailing only helps with solar that is actually there
        let excess = export_kw - params.grid.export_limit_kw;
        if excess > slot.solar_kw + EPS {
            return None;
        }
        curtailed_kw = excess;
        export_kw = params.grid.export_limit_kw;
    }

    let mut preheat_active = false;
    let mut preheat_cost = 0.0;
    if charge_kw > EPS
        && params.preheat.enabled
        && let Some(cell_temp) = slot.cell_temp
        && cell_temp < params.preheat.threshold_c
    {
        preheat_active = true;
        preheat_cost = params
            .preheat
            .cost_model
            .energy_kwh(cell_temp, params.preheat.threshold_c)
            * slot.import_price;
    }

    let profit = slot.export_price * export_kw - slot.import_price * import_kw - preheat_cost;

    Some(SlotFlows {
        charge_kw,
        discharge_kw,
        import_kw,
        export_kw,
        curtailed_kw,
        preheat_active,
        preheat_cost,
        profit,
    })
}

/// SOC at the start of the next slot
pub fn next_soc(battery: &BatteryConfig, soc: f64, charge_kw: f64, discharge_kw: f64, dt_hours: f64) -> f64 {
    soc + dt_hours
        * (battery.charge_efficiency * charge_kw - discharge_kw / battery.discharge_efficiency)
        / battery.capacity_kwh
}
