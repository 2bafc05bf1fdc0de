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

//! Last known device states.
//!
//! Refreshed from the registry each fast tick. A failed read keeps the
//! previous mode and thermal proxy and only marks the device unreachable.

use chrono::{DateTime, Utc};
use fluxion_types::{DeviceHandle, DeviceState};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::commands::{CommandReport, CommandState};
use crate::traits::DeviceRegistry;

/// Device states keyed by id (ordered, so iteration is deterministic)
#[derive(Debug, Default)]
pub struct DeviceTable {
    devices: RwLock<BTreeMap<String, DeviceState>>,
}

impl DeviceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of all known states, ordered by id
    pub fn snapshot(&self) -> Vec<DeviceState> {
        self.devices.read().values().cloned().collect()
    }

    pub fn get(&self, device_id: &str) -> Option<DeviceState> {
        self.devices.read().get(device_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }

    /// Rediscover devices and read every known one, each read bounded by `timeout`.
    ///
    /// Discovery failure keeps the current device set. Devices that disappear
    /// from discovery are dropped.
    pub async fn refresh(
        &self,
        registry: &Arc<dyn DeviceRegistry>,
        timeout: Duration,
        now: DateTime<Utc>,
    ) {
        let handles: Vec<DeviceHandle> =
            match tokio::time::timeout(timeout, registry.discover()).await {
                Ok(Ok(handles)) => {
                    let mut devices = self.devices.write();
                    devices.retain(|id, _| handles.iter().any(|h| &h.id == id));
                    for handle in &handles {
                        devices
                            .entry(handle.id.clone())
                            .or_insert_with(|| DeviceState::discovered(handle.clone(), now));
                    }
                    handles
                }
                Ok(Err(e)) => {
                    warn!(registry = registry.name(), "⚠️  Device discovery failed: {e:#}");
                    self.snapshot().into_iter().map(|s| s.handle).collect()
                }
                Err(_) => {
                    warn!(registry = registry.name(), "⚠️  Device discovery timed out");
                    self.snapshot().into_iter().map(|s| s.handle).collect()
                }
            };

        let mut reads = JoinSet::new();
        for handle in handles {
            let registry = Arc::clone(registry);
            reads.spawn(async move {
                let result = tokio::time::timeout(timeout, registry.read_state(&handle)).await;
                (handle, result)
            });
        }

        while let Some(joined) = reads.join_next().await {
            let Ok((handle, result)) = joined else {
                continue;
            };
            let mut devices = self.devices.write();
            let Some(state) = devices.get_mut(&handle.id) else {
                continue;
            };
            match result {
                Ok(Ok(reading)) => {
                    debug!(
                        device_id = %handle.id,
                        mode = %reading.mode,
                        thermal_proxy = ?reading.thermal_proxy,
                        "Device read"
                    );
                    state.apply_reading(&reading, now);
                }
                Ok(Err(e)) => {
                    warn!(device_id = %handle.id, "⚠️  Device read failed: {e:#}");
                    state.mark_failed(format!("{e:#}"), now);
                }
                Err(_) => {
                    warn!(device_id = %handle.id, "⚠️  Device read timed out");
                    state.mark_failed(format!("read timed out after {}s", timeout.as_secs()), now);
                }
            }
        }
    }

    /// Fold command outcomes back into the table.
    ///
    /// Applied commands set the new mode; failed ones keep the last known mode
    /// and record the error so the next tick retries.
    pub fn apply_reports(&self, reports: &[CommandReport], now: DateTime<Utc>) {
        let mut devices = self.devices.write();
        for report in reports {
            let Some(state) = devices.get_mut(&report.device_id) else {
                continue;
            };
            match report.state {
                CommandState::Applied => {
                    state.mode = report.target;
                    state.last_error = None;
                    state.updated_at = now;
                }
                CommandState::Failed => {
                    state.mark_failed(report.error.clone().unwrap_or_default(), now);
                }
                CommandState::Idle | CommandState::Requested | CommandState::Refused => {}
            }
        }
    }

    /// Insert or replace a state directly
    pub fn upsert(&self, state: DeviceState) {
        self.devices.write().insert(state.handle.id.clone(), state);
    }
}
