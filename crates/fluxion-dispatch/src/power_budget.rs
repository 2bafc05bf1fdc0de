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

//! Power budget enforcement.
//!
//! Device consumption is estimated from a fixed per-mode power table and kept
//! below `min(available PV, configured limit)`. Demotions always go through;
//! upgrades must fit into the remaining headroom as a whole.

use fluxion_types::{BudgetConfig, DeviceMode, ModePowerTable};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::traits::PlantDataSource;

/// Tolerance for float comparisons against the limit
const EPS: f64 = 1e-9;

/// Power ceiling for device consumption.
///
/// Non-finite or negative inputs count as zero so a broken reading can only
/// ever tighten the budget.
pub fn effective_limit(available_kw: f64, configured_limit_kw: f64) -> f64 {
    let sanitize = |v: f64| if v.is_finite() { v.max(0.0) } else { 0.0 };
    sanitize(available_kw).min(sanitize(configured_limit_kw))
}

/// Budget figures of one tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BudgetSnapshot {
    pub available_kw: f64,
    pub configured_limit_kw: f64,
    pub effective_limit_kw: f64,
    pub total_consumption_kw: f64,
}

impl BudgetSnapshot {
    pub fn headroom_kw(&self) -> f64 {
        self.effective_limit_kw - self.total_consumption_kw
    }
}

/// One step down imposed by budget enforcement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Demotion {
    pub device_id: String,
    pub from: DeviceMode,
    pub to: DeviceMode,
}

/// Planned device modes for one tick, checked against one effective limit.
///
/// Every approved change is recorded, so two proposals in the same tick
/// cannot both spend the same headroom.
#[derive(Debug, Clone)]
pub struct BudgetLedger {
    table: ModePowerTable,
    available_kw: f64,
    configured_limit_kw: f64,
    limit_kw: f64,
    modes: BTreeMap<String, DeviceMode>,
}

impl BudgetLedger {
    pub fn new<I, S>(
        table: ModePowerTable,
        available_kw: f64,
        configured_limit_kw: f64,
        devices: I,
    ) -> Self
    where
        I: IntoIterator<Item = (S, DeviceMode)>,
        S: Into<String>,
    {
        Self {
            table,
            available_kw,
            configured_limit_kw,
            limit_kw: effective_limit(available_kw, configured_limit_kw),
            modes: devices
                .into_iter()
                .map(|(id, mode)| (id.into(), mode))
                .collect(),
        }
    }

    pub fn effective_limit_kw(&self) -> f64 {
        self.limit_kw
    }

    pub fn total_consumption_kw(&self) -> f64 {
        self.modes.values().map(|m| self.table.power_kw(*m)).sum()
    }

    pub fn mode_of(&self, device_id: &str) -> DeviceMode {
        self.modes.get(device_id).copied().unwrap_or_default()
    }

    pub fn snapshot(&self) -> BudgetSnapshot {
        BudgetSnapshot {
            available_kw: self.available_kw,
            configured_limit_kw: self.configured_limit_kw,
            effective_limit_kw: self.limit_kw,
            total_consumption_kw: self.total_consumption_kw(),
        }
    }

    /// Record a mode change that does not need approval (demotions, applied commands)
    pub fn set_mode(&mut self, device_id: &str, mode: DeviceMode) {
        self.modes.insert(device_id.to_owned(), mode);
    }

    /// Demote the highest-draw device one step at a time until the total fits.
    ///
    /// Ties on draw go to the lowest identifier. Stops early when every device
    /// is already at Standby. Returns the demotions in the order applied.
    pub fn enforce(&mut self) -> Vec<Demotion> {
        let mut demotions = Vec::new();

        while self.total_consumption_kw() > self.limit_kw + EPS {
            let mut victim: Option<(&String, DeviceMode, f64)> = None;
            for (id, mode) in &self.modes {
                if mode.is_standby() {
                    continue;
                }
                let draw = self.table.power_kw(*mode);
                // BTreeMap iterates ids ascending, so strict > keeps the lowest id on ties
                if victim.is_none_or(|(_, _, best)| draw > best) {
                    victim = Some((id, *mode, draw));
                }
            }

            let Some((id, from, _)) = victim else {
                break;
            };
            let id = id.clone();
            let to = from.demoted();
            self.modes.insert(id.clone(), to);
            debug!(device_id = %id, %from, %to, "Budget demotion");
            demotions.push(Demotion {
                device_id: id,
                from,
                to,
            });
        }

        demotions
    }

    /// Whether moving `device_id` to `target` keeps the total within the limit
    pub fn may_apply(&self, device_id: &str, target: DeviceMode) -> bool {
        let current = self.table.power_kw(self.mode_of(device_id));
        let hypothetical = self.total_consumption_kw() - current + self.table.power_kw(target);
        hypothetical <= self.limit_kw + EPS
    }

    /// `may_apply` and, if approved, record the new mode in the ledger
    pub fn try_reserve(&mut self, device_id: &str, target: DeviceMode) -> bool {
        if self.may_apply(device_id, target) {
            self.set_mode(device_id, target);
            true
        } else {
            false
        }
    }
}

/// Reads available PV and builds per-tick ledgers
pub struct PowerBudgetGovernor {
    config: BudgetConfig,
    plant: Arc<dyn PlantDataSource>,
    read_timeout: Duration,
    last_available_kw: Mutex<f64>,
}

impl std::fmt::Debug for PowerBudgetGovernor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PowerBudgetGovernor")
            .field("config", &self.config)
            .field("plant", &self.plant.name())
            .field("last_available_kw", &*self.last_available_kw.lock())
            .finish()
    }
}

impl PowerBudgetGovernor {
    pub fn new(config: BudgetConfig, plant: Arc<dyn PlantDataSource>, read_timeout: Duration) -> Self {
        Self {
            config,
            plant,
            read_timeout,
            last_available_kw: Mutex::new(0.0),
        }
    }

    pub fn config(&self) -> &BudgetConfig {
        &self.config
    }

    /// Current available PV. Falls back to the last good reading (initially 0).
    pub async fn read_available_pv(&self) -> f64 {
        match tokio::time::timeout(self.read_timeout, self.plant.read_available_pv()).await {
            Ok(Ok(kw)) if kw.is_finite() => {
                *self.last_available_kw.lock() = kw;
                kw
            }
            Ok(Ok(kw)) => {
                warn!(source = self.plant.name(), value = kw, "⚠️  Non-finite PV reading ignored");
                *self.last_available_kw.lock()
            }
            Ok(Err(e)) => {
                warn!(source = self.plant.name(), "⚠️  Failed to read available PV: {e:#}");
                *self.last_available_kw.lock()
            }
            Err(_) => {
                warn!(
                    source = self.plant.name(),
                    timeout_secs = self.read_timeout.as_secs(),
                    "⚠️  Available PV read timed out"
                );
                *self.last_available_kw.lock()
            }
        }
    }

    /// Ledger for the given device modes against `available_kw`
    pub fn ledger<I, S>(&self, available_kw: f64, devices: I) -> BudgetLedger
    where
        I: IntoIterator<Item = (S, DeviceMode)>,
        S: Into<String>,
    {
        let ledger = BudgetLedger::new(
            self.config.mode_power,
            available_kw,
            self.config.configured_limit_kw,
            devices,
        );
        let snapshot = ledger.snapshot();
        info!(
            available_kw = snapshot.available_kw,
            configured_limit_kw = snapshot.configured_limit_kw,
            effective_limit_kw = snapshot.effective_limit_kw,
            total_consumption_kw = snapshot.total_consumption_kw,
            "⚡ Power budget"
        );
        ledger
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger(available: f64, limit: f64, devices: &[(&str, DeviceMode)]) -> BudgetLedger {
        BudgetLedger::new(
            ModePowerTable::default(),
            available,
            limit,
            devices.iter().map(|(id, m)| (*id, *m)),
        )
    }

    #[test]
    fn test_effective_limit_is_min() {
        assert!((effective_limit(4.0, 30.0) - 4.0).abs() < EPS);
        assert!((effective_limit(10.0, 5.0) - 5.0).abs() < EPS);
        assert!(effective_limit(0.0, 5.0).abs() < EPS);
        assert!(effective_limit(5.0, 0.0).abs() < EPS);
        assert!(effective_limit(f64::NAN, 5.0).abs() < EPS);
        assert!(effective_limit(-2.0, 5.0).abs() < EPS);
    }

    #[test]
    fn test_two_standard_fit_under_pv() {
        let mut ledger = ledger(
            4.0,
            30.0,
            &[("a", DeviceMode::Standard), ("b", DeviceMode::Standard)],
        );
        assert!((ledger.effective_limit_kw() - 4.0).abs() < EPS);
        assert!(ledger.enforce().is_empty());
    }

    #[test]
    fn test_three_standard_fit_under_configured_limit() {
        let mut ledger = ledger(
            10.0,
            5.0,
            &[
                ("a", DeviceMode::Standard),
                ("b", DeviceMode::Standard),
                ("c", DeviceMode::Standard),
            ],
        );
        assert!((ledger.effective_limit_kw() - 5.0).abs() < EPS);
        assert!((ledger.total_consumption_kw() - 4.8).abs() < 1e-9);
        assert!(ledger.enforce().is_empty());
    }

    #[test]
    fn test_third_eco_refused() {
        let mut ledger = ledger(
            2.0,
            30.0,
            &[
                ("a", DeviceMode::Eco),
                ("b", DeviceMode::Eco),
                ("c", DeviceMode::Standby),
            ],
        );
        assert!(!ledger.may_apply("c", DeviceMode::Eco));
        assert!(!ledger.try_reserve("c", DeviceMode::Eco));
        assert_eq!(ledger.mode_of("c"), DeviceMode::Standby);
    }

    #[test]
    fn test_enforce_demotes_highest_draw_then_lowest_id() {
        let mut ledger = ledger(
            3.0,
            30.0,
            &[
                ("b", DeviceMode::Standard),
                ("a", DeviceMode::Standard),
                ("c", DeviceMode::Eco),
            ],
        );
        // 4.0 kW against 3.0 kW
        let demotions = ledger.enforce();
        assert_eq!(
            demotions,
            vec![
                Demotion {
                    device_id: "a".to_owned(),
                    from: DeviceMode::Standard,
                    to: DeviceMode::Eco,
                },
                Demotion {
                    device_id: "b".to_owned(),
                    from: DeviceMode::Standard,
                    to: DeviceMode::Eco,
                },
            ]
        );
        assert!(ledger.total_consumption_kw() <= 3.0 + EPS);
    }

    #[test]
    fn test_enforce_stops_at_standby() {
        let mut ledger = ledger(0.0, 30.0, &[("a", DeviceMode::Super)]);
        let demotions = ledger.enforce();
        assert_eq!(demotions.len(), 3);
        assert_eq!(ledger.mode_of("a"), DeviceMode::Standby);
        assert!(ledger.enforce().is_empty());
    }

    #[test]
    fn test_reservation_consumes_headroom() {
        let mut ledger = ledger(
            2.0,
            30.0,
            &[("a", DeviceMode::Standby), ("b", DeviceMode::Standby)],
        );
        assert!(ledger.try_reserve("a", DeviceMode::Eco));
        assert!(ledger.try_reserve("b", DeviceMode::Eco));
        // 1.6 used, upgrading either to Standard would need 2.4
        assert!(!ledger.try_reserve("a", DeviceMode::Standard));
        assert!((ledger.snapshot().headroom_kw() - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_may_apply_at_zero_limit() {
        let ledger = ledger(0.0, 0.0, &[("a", DeviceMode::Standard)]);
        assert!(!ledger.may_apply("a", DeviceMode::Eco));
        assert!(ledger.may_apply("a", DeviceMode::Standby));
    }
}
