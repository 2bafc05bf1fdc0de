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

//! Price-driven device wake-up and sleep.
//!
//! Looks at the plan's decision for the current slot: cheap or surplus slots
//! wake Standby devices, expensive slots without export put running devices
//! to sleep.

use fluxion_types::{DeviceMode, DeviceState, PricePolicyConfig, TimeSlotDecision};

use crate::commands::{CommandOrigin, ModeCommand};

/// A proposal for one device. Wake-ups still need the budget gate.
pub type PriceProposal = ModeCommand;

#[derive(Debug, Clone)]
pub struct PricePolicy {
    config: PricePolicyConfig,
}

impl PricePolicy {
    pub fn new(config: PricePolicyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PricePolicyConfig {
        &self.config
    }

    /// Slot is cheap enough (or has surplus) to run devices
    pub fn should_wake(&self, decision: &TimeSlotDecision) -> bool {
        decision.grid_export > 0.0 || decision.import_price <= self.config.wake_price_threshold
    }

    /// Slot is expensive and has nothing to export
    pub fn should_sleep(&self, decision: &TimeSlotDecision) -> bool {
        decision.grid_export <= 0.0 && decision.import_price >= self.config.sleep_price_threshold
    }

    /// Proposals for `devices` under `decision`, ordered by device id
    pub fn evaluate(
        &self,
        decision: &TimeSlotDecision,
        devices: &[DeviceState],
    ) -> Vec<PriceProposal> {
        if !self.config.enabled {
            return Vec::new();
        }

        let mut proposals: Vec<PriceProposal> = if self.should_wake(decision) {
            devices
                .iter()
                .filter(|d| d.reachable && d.mode.is_standby())
                .map(|d| ModeCommand {
                    device: d.handle.clone(),
                    from: d.mode,
                    target: self.config.wake_mode,
                    origin: CommandOrigin::PriceWake,
                })
                .collect()
        } else if self.should_sleep(decision) {
            devices
                .iter()
                .filter(|d| !d.mode.is_standby())
                .map(|d| ModeCommand {
                    device: d.handle.clone(),
                    from: d.mode,
                    target: DeviceMode::Standby,
                    origin: CommandOrigin::PriceSleep,
                })
                .collect()
        } else {
            Vec::new()
        };

        proposals.sort_by(|a, b| a.device.id.cmp(&b.device.id));
        proposals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fluxion_types::DeviceHandle;

    fn device(id: &str, mode: DeviceMode) -> DeviceState {
        DeviceState {
            mode,
            reachable: true,
            ..DeviceState::discovered(DeviceHandle::new(id, ""), Utc::now())
        }
    }

    fn decision(import_price: f64, grid_export: f64) -> TimeSlotDecision {
        TimeSlotDecision {
            import_price,
            grid_export,
            ..Default::default()
        }
    }

    #[test]
    fn test_cheap_slot_wakes_standby() {
        let policy = PricePolicy::new(PricePolicyConfig::default());
        let devices = vec![
            device("b", DeviceMode::Standby),
            device("a", DeviceMode::Standby),
            device("c", DeviceMode::Standard),
        ];

        let proposals = policy.evaluate(&decision(0.5, 0.0), &devices);
        assert_eq!(proposals.len(), 2);
        assert_eq!(proposals[0].device.id, "a");
        assert!(proposals.iter().all(|p| p.target == DeviceMode::Eco));
        assert!(proposals.iter().all(|p| p.origin.is_gated()));
    }

    #[test]
    fn test_export_wakes_even_when_expensive() {
        let policy = PricePolicy::new(PricePolicyConfig::default());
        let devices = vec![device("a", DeviceMode::Standby)];
        let proposals = policy.evaluate(&decision(9.0, 2.0), &devices);
        assert_eq!(proposals.len(), 1);
        assert_eq!(proposals[0].origin, CommandOrigin::PriceWake);
    }

    #[test]
    fn test_expensive_slot_sleeps_running() {
        let policy = PricePolicy::new(PricePolicyConfig::default());
        let devices = vec![
            device("a", DeviceMode::Eco),
            device("b", DeviceMode::Standby),
        ];
        let proposals = policy.evaluate(&decision(5.0, 0.0), &devices);
        assert_eq!(proposals.len(), 1);
        assert_eq!(proposals[0].target, DeviceMode::Standby);
        assert!(!proposals[0].origin.is_gated());
    }

    #[test]
    fn test_between_thresholds_does_nothing() {
        let policy = PricePolicy::new(PricePolicyConfig::default());
        let devices = vec![
            device("a", DeviceMode::Eco),
            device("b", DeviceMode::Standby),
        ];
        assert!(policy.evaluate(&decision(2.0, 0.0), &devices).is_empty());
    }

    #[test]
    fn test_unreachable_not_woken() {
        let policy = PricePolicy::new(PricePolicyConfig::default());
        let mut offline = device("a", DeviceMode::Standby);
        offline.reachable = false;
        assert!(policy.evaluate(&decision(0.1, 0.0), &[offline]).is_empty());
    }
}
