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

//! PV/grid attribution of planned battery charge.
//!
//! The real plan alone cannot tell whether a charging slot draws from PV
//! surplus or from the grid. A second plan with the sun switched off shows
//! which part of the charge the battery would buy anyway.

use super::model::EPS;

/// Grid-sourced part of the real plan's charge for one slot.
///
/// `min(charge_real, charge_zero_solar, import_real)`: what the sunless plan
/// would also charge, never more than the real plan actually imports. Without
/// a sunless counterpart only the import cap applies. Solver round-off below
/// `EPS` counts as no grid charge at all.
pub fn grid_charge(charge_real: f64, charge_zero_solar: Option<f64>, import_real: f64) -> f64 {
    let capped = charge_real.min(import_real);
    let grid = match charge_zero_solar {
        Some(zero) => capped.min(zero),
        None => capped,
    };
    if grid < EPS { 0.0 } else { grid }
}

/// `(from_pv, from_grid)` for one slot
pub fn split_charge(charge_real: f64, charge_zero_solar: Option<f64>, import_real: f64) -> (f64, f64) {
    let from_grid = grid_charge(charge_real, charge_zero_solar, import_real);
    let from_pv = charge_real - from_grid;
    (if from_pv < EPS { 0.0 } else { from_pv }, from_grid)
}
