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

//! File-backed and simulated collaborators for running without hardware.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fluxion_dispatch::{DeviceRegistry, ForecastSource, PlantDataSource};
use fluxion_types::{DeviceHandle, DeviceMode, DeviceReading, ForecastSlot, PlantSnapshot};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::{SimulatedDeviceConfig, SimulationConfig};

// ============= CSV Forecast =============

/// Forecast read from a CSV file with a header row.
///
/// Columns: `timestamp` (epoch seconds), `import_price`, `export_price`,
/// `solar_kw`, `load_kw` and optionally `air_temperature`,
/// `battery_cell_temperature`, `cloud_coverage`, `weather_symbol`. The file
/// is re-read on every request so it can be replaced while running.
#[derive(Debug, Clone)]
pub struct CsvForecastSource {
    path: PathBuf,
}

impl CsvForecastSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

fn read_forecast_csv(path: &Path, start: i64, end: i64) -> Result<Vec<ForecastSlot>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open forecast CSV {}", path.display()))?;

    let mut slots = Vec::new();
    for (line, result) in reader.deserialize::<ForecastSlot>().enumerate() {
        let slot = result.with_context(|| format!("Failed to read forecast row {}", line + 1))?;
        if slot.timestamp >= start && slot.timestamp < end {
            slots.push(slot);
        }
    }
    slots.sort_by_key(|s| s.timestamp);
    Ok(slots)
}

#[async_trait]
impl ForecastSource for CsvForecastSource {
    async fn get_forecast(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ForecastSlot>> {
        let path = self.path.clone();
        let (from, to) = (start.timestamp(), end.timestamp());
        let slots = tokio::task::spawn_blocking(move || read_forecast_csv(&path, from, to))
            .await
            .context("Forecast reader task failed")??;
        debug!(
            "📈 [CsvForecast] {} slots between {} and {}",
            slots.len(),
            start,
            end
        );
        Ok(slots)
    }

    fn name(&self) -> &str {
        "CsvForecast"
    }
}

// ============= Simulated Devices =============

#[derive(Debug, Clone)]
struct SimulatedDevice {
    address: String,
    mode: DeviceMode,
    base_thermal: f64,
    heat_per_step: f64,
}

impl SimulatedDevice {
    /// Thermal proxy grows linearly with the mode index
    fn thermal_proxy(&self) -> f64 {
        let steps = DeviceMode::ALL
            .iter()
            .position(|m| *m == self.mode)
            .unwrap_or_default();
        self.base_thermal + self.heat_per_step * f64::from(u8::try_from(steps).unwrap_or(u8::MAX))
    }
}

impl From<&SimulatedDeviceConfig> for SimulatedDevice {
    fn from(config: &SimulatedDeviceConfig) -> Self {
        Self {
            address: if config.address.is_empty() {
                format!("sim://{}", config.id)
            } else {
                config.address.clone()
            },
            mode: config.mode,
            base_thermal: config.base_thermal,
            heat_per_step: config.heat_per_step,
        }
    }
}

/// In-process device registry that applies every mode change immediately
#[derive(Debug, Default)]
pub struct SimulatedRegistry {
    devices: Mutex<BTreeMap<String, SimulatedDevice>>,
}

impl SimulatedRegistry {
    pub fn new(devices: &[SimulatedDeviceConfig]) -> Self {
        let devices = devices
            .iter()
            .map(|d| (d.id.clone(), SimulatedDevice::from(d)))
            .collect();
        Self {
            devices: Mutex::new(devices),
        }
    }

    #[cfg(test)]
    pub fn mode_of(&self, device_id: &str) -> Option<DeviceMode> {
        self.devices.lock().get(device_id).map(|d| d.mode)
    }
}

#[async_trait]
impl DeviceRegistry for SimulatedRegistry {
    async fn discover(&self) -> Result<Vec<DeviceHandle>> {
        Ok(self
            .devices
            .lock()
            .iter()
            .map(|(id, d)| DeviceHandle::new(id.clone(), d.address.clone()))
            .collect())
    }

    async fn read_state(&self, handle: &DeviceHandle) -> Result<DeviceReading> {
        let devices = self.devices.lock();
        let device = devices
            .get(&handle.id)
            .with_context(|| format!("Unknown simulated device {}", handle.id))?;
        Ok(DeviceReading {
            mode: device.mode,
            thermal_proxy: Some(device.thermal_proxy()),
            reachable: true,
        })
    }

    async fn set_mode(&self, handle: &DeviceHandle, mode: DeviceMode) -> Result<()> {
        let mut devices = self.devices.lock();
        let device = devices
            .get_mut(&handle.id)
            .with_context(|| format!("Unknown simulated device {}", handle.id))?;
        info!("🖥️  [Simulated] {} {} -> {}", handle.id, device.mode, mode);
        device.mode = mode;
        Ok(())
    }

    fn name(&self) -> &str {
        "SimulatedRegistry"
    }
}

// ============= Simulated Plant =============

/// Plant reporting fixed available PV and battery SOC from configuration
#[derive(Debug)]
pub struct SimulatedPlant {
    available_pv_kw: f64,
    battery_soc: f64,
}

impl SimulatedPlant {
    pub fn new(config: &SimulationConfig) -> Self {
        Self {
            available_pv_kw: config.available_pv_kw,
            battery_soc: config.battery_soc,
        }
    }
}

#[async_trait]
impl PlantDataSource for SimulatedPlant {
    async fn read_available_pv(&self) -> Result<f64> {
        Ok(self.available_pv_kw)
    }

    async fn read_plant_power(&self) -> Result<PlantSnapshot> {
        Ok(PlantSnapshot {
            solar_kw: self.available_pv_kw,
            battery_kw: 0.0,
            grid_kw: 0.0,
            battery_soc: self.battery_soc,
            captured_at: Utc::now(),
        })
    }

    fn name(&self) -> &str {
        "SimulatedPlant"
    }
}
