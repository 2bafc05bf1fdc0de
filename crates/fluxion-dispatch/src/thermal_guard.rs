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

//! Thermal protection based on a per-device rolling window of the thermal
//! proxy (fan speed, chip temperature, ...).

use fluxion_types::{DeviceMode, ThermalConfig};
use ringbuffer::{AllocRingBuffer, RingBuffer};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Outcome of one thermal observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThermalAction {
    /// Overheated: step down now, regardless of the budget
    Demote { to: DeviceMode },
    /// Cool for a full window: step up if the budget allows it
    ProposeUpgrade { to: DeviceMode },
    Hold,
}

#[derive(Debug)]
struct DeviceWindow {
    mode: DeviceMode,
    samples: AllocRingBuffer<f64>,
}

/// Tracks recent thermal samples per device
#[derive(Debug)]
pub struct ThermalGuard {
    config: ThermalConfig,
    windows: HashMap<String, DeviceWindow>,
}

impl ThermalGuard {
    pub fn new(config: ThermalConfig) -> Self {
        Self {
            config,
            windows: HashMap::new(),
        }
    }

    pub fn config(&self) -> &ThermalConfig {
        &self.config
    }

    /// Record a sample for `device_id` currently in `mode` and decide.
    ///
    /// A mode different from the one seen last time counts as a transition and
    /// restarts the window before the sample is added.
    pub fn observe(
        &mut self,
        device_id: &str,
        mode: DeviceMode,
        thermal_proxy: Option<f64>,
    ) -> ThermalAction {
        let capacity = self.config.window_samples.max(1);
        let window = self
            .windows
            .entry(device_id.to_owned())
            .or_insert_with(|| DeviceWindow {
                mode,
                samples: AllocRingBuffer::new(capacity),
            });

        if window.mode != mode {
            window.samples.clear();
            window.mode = mode;
        }

        let Some(sample) = thermal_proxy.filter(|v| v.is_finite()) else {
            return ThermalAction::Hold;
        };
        window.samples.push(sample);

        if sample > self.config.high_threshold {
            if mode.is_standby() {
                return ThermalAction::Hold;
            }
            let to = mode.demoted();
            warn!(
                device_id,
                thermal_proxy = sample,
                high_threshold = self.config.high_threshold,
                %mode,
                %to,
                "🔥 Thermal limit exceeded, demoting"
            );
            return ThermalAction::Demote { to };
        }

        // Standby devices are only woken by the price policy
        if mode.is_standby() || mode >= self.config.max_mode {
            return ThermalAction::Hold;
        }

        let full = window.samples.len() == window.samples.capacity();
        let cool = window
            .samples
            .iter()
            .all(|v| *v <= self.config.low_threshold);
        if full && cool {
            let to = mode.upgraded().min(self.config.max_mode);
            debug!(device_id, %mode, %to, "❄️  Thermal headroom, proposing upgrade");
            return ThermalAction::ProposeUpgrade { to };
        }

        ThermalAction::Hold
    }

    /// Forget the samples of a device after its mode changed
    pub fn reset(&mut self, device_id: &str, new_mode: DeviceMode) {
        if let Some(window) = self.windows.get_mut(device_id) {
            window.samples.clear();
            window.mode = new_mode;
        }
    }

    /// Number of samples currently held for a device
    pub fn window_len(&self, device_id: &str) -> usize {
        self.windows.get(device_id).map_or(0, |w| w.samples.len())
    }

    /// Drop windows of devices that are no longer known
    pub fn retain_devices<'a>(&mut self, known: impl IntoIterator<Item = &'a str>) {
        let known: std::collections::HashSet<&str> = known.into_iter().collect();
        self.windows.retain(|id, _| known.contains(id.as_str()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> ThermalGuard {
        ThermalGuard::new(ThermalConfig {
            high_threshold: 70.0,
            low_threshold: 50.0,
            window_samples: 3,
            max_mode: DeviceMode::Super,
        })
    }

    #[test]
    fn test_overheat_demotes_immediately() {
        let mut guard = guard();
        let action = guard.observe("a", DeviceMode::Standard, Some(75.0));
        assert_eq!(
            action,
            ThermalAction::Demote {
                to: DeviceMode::Eco
            }
        );
    }

    #[test]
    fn test_upgrade_needs_full_cool_window() {
        let mut guard = guard();
        assert_eq!(
            guard.observe("a", DeviceMode::Eco, Some(40.0)),
            ThermalAction::Hold
        );
        assert_eq!(
            guard.observe("a", DeviceMode::Eco, Some(45.0)),
            ThermalAction::Hold
        );
        assert_eq!(
            guard.observe("a", DeviceMode::Eco, Some(50.0)),
            ThermalAction::ProposeUpgrade {
                to: DeviceMode::Standard
            }
        );
    }

    #[test]
    fn test_warm_sample_blocks_upgrade() {
        let mut guard = guard();
        guard.observe("a", DeviceMode::Eco, Some(40.0));
        guard.observe("a", DeviceMode::Eco, Some(60.0));
        assert_eq!(
            guard.observe("a", DeviceMode::Eco, Some(40.0)),
            ThermalAction::Hold
        );
    }

    #[test]
    fn test_mode_change_resets_window() {
        let mut guard = guard();
        guard.observe("a", DeviceMode::Eco, Some(40.0));
        guard.observe("a", DeviceMode::Eco, Some(40.0));
        assert_eq!(guard.window_len("a"), 2);

        assert_eq!(
            guard.observe("a", DeviceMode::Standard, Some(40.0)),
            ThermalAction::Hold
        );
        assert_eq!(guard.window_len("a"), 1);

        guard.reset("a", DeviceMode::Eco);
        assert_eq!(guard.window_len("a"), 0);
    }

    #[test]
    fn test_standby_and_max_mode_never_upgraded() {
        let mut guard = ThermalGuard::new(ThermalConfig {
            window_samples: 1,
            max_mode: DeviceMode::Standard,
            ..ThermalConfig::default()
        });
        assert_eq!(
            guard.observe("idle", DeviceMode::Standby, Some(10.0)),
            ThermalAction::Hold
        );
        assert_eq!(
            guard.observe("capped", DeviceMode::Standard, Some(10.0)),
            ThermalAction::Hold
        );
        assert_eq!(
            guard.observe("eco", DeviceMode::Eco, Some(10.0)),
            ThermalAction::ProposeUpgrade {
                to: DeviceMode::Standard
            }
        );
    }

    #[test]
    fn test_missing_sample_holds() {
        let mut guard = guard();
        assert_eq!(
            guard.observe("a", DeviceMode::Super, None),
            ThermalAction::Hold
        );
        assert_eq!(guard.window_len("a"), 0);
    }
}
