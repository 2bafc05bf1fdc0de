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

//! Backward dynamic program over a quantized SOC lattice.
//!
//! The lattice is anchored at the measured SOC, so the starting state is
//! exact and every other state is a whole number of quanta away from it.
//! Each transition fixes the stored-energy change of one slot; the slot model
//! turns it into power flows and money.

use tracing::debug;

use super::model::{EPS, PlanParams, SlotFlows, SlotInput, evaluate_slot};
use crate::error::{DispatchError, Result};

/// One slot of the optimal path
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathStep {
    /// SOC at the start of the slot
    pub soc_start: f64,
    pub flows: SlotFlows,
}

/// Optimal path over the feasible prefix of the input slots
#[derive(Debug, Clone, PartialEq)]
pub struct SolvedPath {
    pub steps: Vec<PathStep>,
    /// First slot that could not be planned, if the horizon was cut short
    pub truncated_at: Option<i64>,
    pub total_profit: f64,
}

#[derive(Debug)]
struct Lattice {
    soc0: f64,
    quantum: f64,
    min_soc: f64,
    max_soc: f64,
    k_min: i64,
    len: usize,
}

impl Lattice {
    #[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn new(soc0: f64, quantum: f64, min_soc: f64, max_soc: f64) -> Self {
        // A measured SOC outside the band widens the lattice up to it
        let lo = min_soc.min(soc0);
        let hi = max_soc.max(soc0);
        let below = ((soc0 - lo) / quantum + EPS).floor() as i64;
        let above = ((hi - soc0) / quantum + EPS).floor() as i64;
        Self {
            soc0,
            quantum,
            min_soc,
            max_soc,
            k_min: -below,
            len: (below + above + 1) as usize,
        }
    }

    #[expect(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    fn origin(&self) -> usize {
        (-self.k_min) as usize
    }

    #[expect(clippy::cast_possible_wrap, clippy::cast_precision_loss)]
    fn soc(&self, index: usize) -> f64 {
        self.soc0 + (index as i64 + self.k_min) as f64 * self.quantum
    }

    fn in_band(&self, soc: f64) -> bool {
        soc >= self.min_soc - EPS && soc <= self.max_soc + EPS
    }

    /// Inside the band a move must stay inside; outside it may only head back
    fn allows(&self, from: usize, to: usize) -> bool {
        let from_soc = self.soc(from);
        if self.in_band(from_soc) {
            return self.in_band(self.soc(to));
        }
        if from_soc < self.min_soc {
            to >= from
        } else {
            to <= from
        }
    }

    fn step(&self, from: usize, offset: isize) -> Option<usize> {
        from.checked_add_signed(offset).filter(|i| *i < self.len)
    }
}

/// Candidate lattice offsets in tie-break order: smaller movement first,
/// then the lower target index.
fn offsets(max_down: usize, max_up: usize) -> Vec<isize> {
    let reach = max_down.max(max_up);
    let mut out = vec![0isize];
    for step in 1..=reach {
        let Ok(step) = isize::try_from(step) else {
            break;
        };
        if step.unsigned_abs() <= max_down {
            out.push(-step);
        }
        if step.unsigned_abs() <= max_up {
            out.push(step);
        }
    }
    out
}

/// Solve the dispatch problem for `slots` starting at `soc0`.
///
/// Infeasible or exhausted slots cut the horizon to the reachable prefix.
/// Each call allocates its own tables; nothing is shared between calls.
#[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn solve(params: &PlanParams, slots: &[SlotInput], soc0: f64) -> Result<SolvedPath> {
    let first_ts = slots.first().map_or(0, |s| s.timestamp);
    if slots.is_empty() {
        return Err(DispatchError::Infeasible {
            slot_timestamp: first_ts,
            reason: "no forecast slots to plan".to_owned(),
        });
    }
    if !soc0.is_finite() {
        return Err(DispatchError::Infeasible {
            slot_timestamp: first_ts,
            reason: format!("initial SOC {soc0} is not a number"),
        });
    }
    let soc0 = soc0.clamp(0.0, 1.0);

    let battery = &params.battery;
    let dt = params.slot_hours();
    let quantum_kwh = params.quantum_kwh();
    let lattice = Lattice::new(soc0, params.soc_quantum, battery.min_soc, battery.max_soc);

    let max_up = ((battery.max_charge_kw * dt * battery.charge_efficiency) / quantum_kwh + EPS)
        .floor()
        .max(0.0) as usize;
    let max_down = ((battery.max_discharge_kw * dt / battery.discharge_efficiency) / quantum_kwh
        + EPS)
        .floor()
        .max(0.0) as usize;
    let moves = offsets(max_down, max_up);

    // flows[t][m] for the move moves[m]; None when the slot model rejects it
    let flows: Vec<Vec<Option<SlotFlows>>> = slots
        .iter()
        .map(|slot| {
            moves
                .iter()
                .map(|&offset| {
                    #[expect(clippy::cast_precision_loss)]
                    let delta_kwh = offset as f64 * quantum_kwh;
                    evaluate_slot(params, slot, delta_kwh)
                })
                .collect()
        })
        .collect();

    // Forward reachability decides the feasible prefix
    let mut reachable = vec![false; lattice.len];
    reachable[lattice.origin()] = true;
    let mut horizon = slots.len();
    for (t, slot_flows) in flows.iter().enumerate() {
        let mut next = vec![false; lattice.len];
        for from in (0..lattice.len).filter(|i| reachable[*i]) {
            for (m, &offset) in moves.iter().enumerate() {
                if slot_flows[m].is_none() {
                    continue;
                }
                if let Some(to) = lattice.step(from, offset)
                    && lattice.allows(from, to)
                {
                    next[to] = true;
                }
            }
        }
        if !next.contains(&true) {
            horizon = t;
            break;
        }
        reachable = next;
    }

    if horizon == 0 {
        return Err(DispatchError::Infeasible {
            slot_timestamp: first_ts,
            reason: "first slot cannot satisfy battery and grid limits".to_owned(),
        });
    }
    let truncated_at = slots.get(horizon).map(|s| s.timestamp);
    if let Some(ts) = truncated_at {
        debug!(slot_timestamp = ts, horizon, "Horizon truncated at infeasible slot");
    }

    // Backward value iteration. Slot profit is price times average power, so
    // stored energy is converted to the same per-hour scale.
    let mut value: Vec<f64> = (0..lattice.len)
        .map(|i| params.terminal_value_per_kwh * lattice.soc(i) * battery.capacity_kwh / dt)
        .collect();
    let mut choice: Vec<Vec<Option<usize>>> = vec![Vec::new(); horizon];

    for t in (0..horizon).rev() {
        let mut layer_value = vec![f64::NEG_INFINITY; lattice.len];
        let mut layer_choice = vec![None; lattice.len];

        for from in 0..lattice.len {
            let mut best = f64::NEG_INFINITY;
            for (m, &offset) in moves.iter().enumerate() {
                let Some(slot_flows) = flows[t][m] else {
                    continue;
                };
                let Some(to) = lattice.step(from, offset) else {
                    continue;
                };
                if !lattice.allows(from, to) || !value[to].is_finite() {
                    continue;
                }
                let candidate = slot_flows.profit + value[to];
                if candidate > best + EPS {
                    best = candidate;
                    layer_choice[from] = Some(m);
                }
            }
            layer_value[from] = best;
        }

        value = layer_value;
        choice[t] = layer_choice;
    }

    // Walk the optimal path from the measured SOC
    let mut steps = Vec::with_capacity(horizon);
    let mut at = lattice.origin();
    for (t, layer) in choice.iter().enumerate() {
        let m = layer[at].ok_or_else(|| DispatchError::Infeasible {
            slot_timestamp: slots[t].timestamp,
            reason: "no path through reachable states".to_owned(),
        })?;
        let slot_flows = flows[t][m].ok_or_else(|| DispatchError::Infeasible {
            slot_timestamp: slots[t].timestamp,
            reason: "chosen move has no flows".to_owned(),
        })?;
        steps.push(PathStep {
            soc_start: lattice.soc(at).clamp(0.0, 1.0),
            flows: slot_flows,
        });
        at = lattice.step(at, moves[m]).ok_or_else(|| DispatchError::Infeasible {
            slot_timestamp: slots[t].timestamp,
            reason: "chosen move leaves the lattice".to_owned(),
        })?;
    }

    let total_profit = steps.iter().map(|s| s.flows.profit).sum();
    Ok(SolvedPath {
        steps,
        truncated_at,
        total_profit,
    })
}
