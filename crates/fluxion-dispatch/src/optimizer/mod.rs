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

//! Horizon optimizer.
//!
//! Turns the forecast into a per-slot battery/grid plan and persists it. Each
//! planning run solves twice, with the forecast solar and with no solar, to
//! tell PV-surplus charging apart from grid charging.

pub mod model;
pub mod solver;
pub mod split;

use chrono::{DateTime, TimeDelta, Utc};
use fluxion_types::{DispatchConfig, ForecastSlot, TimeSlotDecision, slot_start};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{DispatchError, Result};
use crate::store::DecisionStore;
use crate::traits::{ForecastSource, PlantDataSource};

pub use model::{PlanParams, SlotFlows, SlotInput, evaluate_slot, next_soc};
pub use solver::{PathStep, SolvedPath, solve};

/// Result of one planning run
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub decisions: Vec<TimeSlotDecision>,
    /// Slots asked for by the configured horizon
    pub requested_slots: usize,
    /// First slot left unplanned (missing forecast or infeasible)
    pub truncated_at: Option<i64>,
    pub total_profit: f64,
}

/// Summary of a re-plan
#[derive(Debug, Clone, PartialEq)]
pub struct ReplanOutcome {
    pub first_slot: i64,
    pub soc0: f64,
    pub slots_written: usize,
    pub requested_slots: usize,
    pub truncated_at: Option<i64>,
    pub pruned: usize,
    pub total_profit: f64,
}

/// Contiguous usable forecast slots starting at `t0`.
///
/// Stops at the first gap or unusable slot and reports where.
fn contiguous_slots(
    forecast: &[ForecastSlot],
    t0: i64,
    slot_seconds: i64,
    horizon: usize,
) -> (Vec<ForecastSlot>, Option<i64>) {
    let mut by_ts: BTreeMap<i64, &ForecastSlot> = BTreeMap::new();
    for slot in forecast {
        by_ts.entry(slot.timestamp).or_insert(slot);
    }

    let mut slots = Vec::with_capacity(horizon);
    let mut ts = t0;
    for _ in 0..horizon {
        match by_ts.get(&ts) {
            Some(slot) if slot.is_usable() => slots.push((*slot).clone()),
            _ => return (slots, Some(ts)),
        }
        ts += slot_seconds;
    }
    (slots, None)
}

/// Plan the horizon starting at the slot containing `now`.
///
/// Pure function of its inputs: no I/O, no shared state, deterministic.
pub fn plan_horizon(
    params: &PlanParams,
    now: DateTime<Utc>,
    soc0: f64,
    forecast: &[ForecastSlot],
) -> Result<Plan> {
    let t0 = slot_start(now.timestamp(), params.slot_seconds);
    let (slots, missing_at) =
        contiguous_slots(forecast, t0, params.slot_seconds, params.horizon_slots);
    if slots.is_empty() {
        return Err(DispatchError::Infeasible {
            slot_timestamp: t0,
            reason: "no usable forecast for the first slot".to_owned(),
        });
    }

    let inputs: Vec<SlotInput> = slots.iter().map(SlotInput::from).collect();
    let sunless: Vec<SlotInput> = inputs.iter().map(|s| s.without_solar()).collect();

    let real = solve(params, &inputs, soc0)?;
    let zero_solar = match solve(params, &sunless, soc0) {
        Ok(path) => Some(path),
        Err(e) => {
            warn!("⚠️  Sunless plan failed, grid charge capped by import only: {e}");
            None
        }
    };

    let decisions: Vec<TimeSlotDecision> = real
        .steps
        .iter()
        .zip(&slots)
        .enumerate()
        .map(|(t, (step, slot))| {
            let zero_charge = zero_solar
                .as_ref()
                .and_then(|p| p.steps.get(t))
                .map(|s| s.flows.charge_kw);
            let flows = &step.flows;
            let (from_pv, from_grid) =
                split::split_charge(flows.charge_kw, zero_charge, flows.import_kw);

            TimeSlotDecision {
                timestamp: slot.timestamp,
                slot_index: u32::try_from(t).unwrap_or(u32::MAX),
                battery_charge_from_pv: from_pv,
                battery_charge_from_grid: from_grid,
                battery_discharge: flows.discharge_kw,
                grid_import: flows.import_kw,
                grid_export: flows.export_kw,
                battery_soc: step.soc_start,
                profit: flows.profit,
                import_price: slot.import_price,
                export_price: slot.export_price,
                solar_forecast: slot.solar_kw,
                load_forecast: slot.load_kw,
                solar_curtailed: flows.curtailed_kw,
                cloud_coverage: slot.cloud_coverage,
                weather_symbol: slot.weather_symbol.clone(),
                battery_avg_cell_temp: slot.battery_cell_temperature,
                air_temperature: slot.air_temperature,
                battery_preheat_active: flows.preheat_active,
                preheat_cost: flows.preheat_cost,
            }
        })
        .collect();

    Ok(Plan {
        decisions,
        requested_slots: params.horizon_slots,
        truncated_at: real.truncated_at.or(missing_at),
        total_profit: real.total_profit,
    })
}

/// Slow-cadence planner bound to its collaborators and the decision store
pub struct HorizonOptimizer {
    params: Arc<PlanParams>,
    retention_days: u32,
    forecast_timeout: Duration,
    read_timeout: Duration,
    forecast: Arc<dyn ForecastSource>,
    plant: Arc<dyn PlantDataSource>,
    store: Arc<dyn DecisionStore>,
    replan_lock: Mutex<()>,
}

impl std::fmt::Debug for HorizonOptimizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HorizonOptimizer")
            .field("params", &self.params)
            .field("forecast", &self.forecast.name())
            .field("plant", &self.plant.name())
            .finish_non_exhaustive()
    }
}

impl HorizonOptimizer {
    pub fn new(
        config: &DispatchConfig,
        forecast: Arc<dyn ForecastSource>,
        plant: Arc<dyn PlantDataSource>,
        store: Arc<dyn DecisionStore>,
    ) -> Result<Self> {
        Ok(Self {
            params: Arc::new(PlanParams::from_config(config)?),
            retention_days: config.planner.retention_days,
            forecast_timeout: Duration::from_secs(config.planner.forecast_timeout_secs),
            read_timeout: Duration::from_secs(config.scheduler.read_timeout_secs),
            forecast,
            plant,
            store,
            replan_lock: Mutex::new(()),
        })
    }

    pub fn params(&self) -> &PlanParams {
        &self.params
    }

    /// Plan from explicit inputs without touching collaborators or the store
    pub fn plan(&self, now: DateTime<Utc>, soc0: f64, forecast: &[ForecastSlot]) -> Result<Plan> {
        plan_horizon(&self.params, now, soc0, forecast)
    }

    /// Fetch the forecast, plan from the measured SOC and replace the stored
    /// future. On any error nothing is written and the previous plan stays.
    pub async fn replan(&self, now: DateTime<Utc>) -> Result<ReplanOutcome> {
        let _guard = self.replan_lock.lock().await;

        let slot_seconds = self.params.slot_seconds;
        let t0 = slot_start(now.timestamp(), slot_seconds);
        let start = DateTime::from_timestamp(t0, 0)
            .ok_or_else(|| DispatchError::Config(format!("slot start {t0} out of range")))?;
        let horizon_secs = slot_seconds.saturating_mul(
            i64::try_from(self.params.horizon_slots).unwrap_or(i64::MAX),
        );
        let end = start + TimeDelta::seconds(horizon_secs);

        let forecast = self.fetch_forecast(start, end).await?;
        let soc0 = self.initial_soc(t0).await?;

        let params = Arc::clone(&self.params);
        let plan =
            tokio::task::spawn_blocking(move || plan_horizon(&params, now, soc0, &forecast))
                .await??;

        if let Some(ts) = plan.truncated_at {
            warn!(
                slot_timestamp = ts,
                planned = plan.decisions.len(),
                requested = plan.requested_slots,
                "⚠️  Horizon shortened to feasible prefix"
            );
        }

        let slots_written = self.store.upsert_range(&plan.decisions)?;

        let cutoff = t0 - i64::from(self.retention_days) * 86_400;
        let pruned = match self.store.prune_before(cutoff) {
            Ok(n) => n,
            Err(e) => {
                warn!("⚠️  Failed to prune old decisions: {e}");
                0
            }
        };

        info!(
            first_slot = t0,
            soc0,
            slots = slots_written,
            total_profit = plan.total_profit,
            pruned,
            "📅 Dispatch plan updated"
        );

        Ok(ReplanOutcome {
            first_slot: t0,
            soc0,
            slots_written,
            requested_slots: plan.requested_slots,
            truncated_at: plan.truncated_at,
            pruned,
            total_profit: plan.total_profit,
        })
    }

    async fn fetch_forecast(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ForecastSlot>> {
        let source_name = self.forecast.name().to_owned();
        match tokio::time::timeout(self.forecast_timeout, self.forecast.get_forecast(start, end))
            .await
        {
            Ok(Ok(slots)) => Ok(slots),
            Ok(Err(e)) => Err(DispatchError::ForecastUnavailable {
                source_name,
                reason: format!("{e:#}"),
            }),
            Err(_) => Err(DispatchError::ForecastUnavailable {
                source_name,
                reason: format!("timed out after {}s", self.forecast_timeout.as_secs()),
            }),
        }
    }

    /// Measured SOC, or the SOC the stored plan expected for this slot
    async fn initial_soc(&self, t0: i64) -> Result<f64> {
        let reason = match tokio::time::timeout(self.read_timeout, self.plant.read_plant_power())
            .await
        {
            Ok(Ok(snapshot)) if snapshot.battery_soc.is_finite() => {
                return Ok(snapshot.battery_soc.clamp(0.0, 1.0));
            }
            Ok(Ok(snapshot)) => format!("non-finite SOC {}", snapshot.battery_soc),
            Ok(Err(e)) => format!("{e:#}"),
            Err(_) => format!("timed out after {}s", self.read_timeout.as_secs()),
        };

        match self.store.decision_at(t0)? {
            Some(previous) => {
                warn!(
                    source = self.plant.name(),
                    slot_timestamp = t0,
                    soc = previous.battery_soc,
                    "⚠️  Plant read failed ({reason}), using planned SOC"
                );
                Ok(previous.battery_soc)
            }
            None => Err(DispatchError::PlantUnavailable(reason)),
        }
    }
}
