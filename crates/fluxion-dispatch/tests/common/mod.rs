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

//! In-memory collaborators shared by the integration tests.

#![expect(dead_code, reason = "each test binary uses a different subset")]

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fluxion_dispatch::{DeviceRegistry, ForecastSource, PlantDataSource};
use fluxion_types::{
    DeviceHandle, DeviceMode, DeviceReading, DispatchConfig, ForecastSlot, PlantSnapshot,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct MockDevice {
    pub mode: DeviceMode,
    pub thermal_proxy: Option<f64>,
    pub fail_commands: bool,
}

#[derive(Debug, Default)]
pub struct MockRegistry {
    devices: Mutex<BTreeMap<String, MockDevice>>,
    calls: Mutex<Vec<(String, DeviceMode)>>,
}

impl MockRegistry {
    pub fn new(devices: &[(&str, DeviceMode, f64)]) -> Arc<Self> {
        let registry = Self::default();
        {
            let mut map = registry.devices.lock();
            for (id, mode, proxy) in devices {
                map.insert(
                    (*id).to_owned(),
                    MockDevice {
                        mode: *mode,
                        thermal_proxy: Some(*proxy),
                        fail_commands: false,
                    },
                );
            }
        }
        Arc::new(registry)
    }

    pub fn mode_of(&self, id: &str) -> DeviceMode {
        self.devices.lock()[id].mode
    }

    pub fn set_failing(&self, id: &str, failing: bool) {
        if let Some(device) = self.devices.lock().get_mut(id) {
            device.fail_commands = failing;
        }
    }

    pub fn set_thermal(&self, id: &str, proxy: f64) {
        if let Some(device) = self.devices.lock().get_mut(id) {
            device.thermal_proxy = Some(proxy);
        }
    }

    pub fn calls_for(&self, id: &str) -> Vec<DeviceMode> {
        self.calls
            .lock()
            .iter()
            .filter(|(device, _)| device == id)
            .map(|(_, mode)| *mode)
            .collect()
    }
}

#[async_trait]
impl DeviceRegistry for MockRegistry {
    async fn discover(&self) -> Result<Vec<DeviceHandle>> {
        Ok(self
            .devices
            .lock()
            .keys()
            .map(|id| DeviceHandle::new(id.clone(), format!("mock://{id}")))
            .collect())
    }

    async fn read_state(&self, handle: &DeviceHandle) -> Result<DeviceReading> {
        let devices = self.devices.lock();
        let device = devices
            .get(&handle.id)
            .ok_or_else(|| anyhow::anyhow!("unknown device {}", handle.id))?;
        Ok(DeviceReading {
            mode: device.mode,
            thermal_proxy: device.thermal_proxy,
            reachable: true,
        })
    }

    async fn set_mode(&self, handle: &DeviceHandle, mode: DeviceMode) -> Result<()> {
        self.calls.lock().push((handle.id.clone(), mode));
        let mut devices = self.devices.lock();
        let device = devices
            .get_mut(&handle.id)
            .ok_or_else(|| anyhow::anyhow!("unknown device {}", handle.id))?;
        if device.fail_commands {
            anyhow::bail!("device {} did not acknowledge", handle.id);
        }
        device.mode = mode;
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[derive(Debug)]
pub struct MockPlant {
    pub available_kw: Mutex<f64>,
    pub soc: Mutex<Option<f64>>,
}

impl MockPlant {
    pub fn new(available_kw: f64, soc: f64) -> Arc<Self> {
        Arc::new(Self {
            available_kw: Mutex::new(available_kw),
            soc: Mutex::new(Some(soc)),
        })
    }
}

#[async_trait]
impl PlantDataSource for MockPlant {
    async fn read_available_pv(&self) -> Result<f64> {
        Ok(*self.available_kw.lock())
    }

    async fn read_plant_power(&self) -> Result<PlantSnapshot> {
        let soc = (*self.soc.lock()).ok_or_else(|| anyhow::anyhow!("plant offline"))?;
        Ok(PlantSnapshot {
            solar_kw: 0.0,
            battery_kw: 0.0,
            grid_kw: 0.0,
            battery_soc: soc,
            captured_at: Utc::now(),
        })
    }

    fn name(&self) -> &str {
        "mock-plant"
    }
}

/// Flat forecast generated for any requested window
#[derive(Debug)]
pub struct FlatForecast {
    pub import_price: Mutex<f64>,
    pub export_price: f64,
    pub solar_kw: f64,
    pub load_kw: f64,
    pub slot_seconds: i64,
    pub fail: Mutex<bool>,
}

impl FlatForecast {
    pub fn new(import_price: f64, export_price: f64, solar_kw: f64, load_kw: f64) -> Arc<Self> {
        Arc::new(Self {
            import_price: Mutex::new(import_price),
            export_price,
            solar_kw,
            load_kw,
            slot_seconds: 900,
            fail: Mutex::new(false),
        })
    }
}

#[async_trait]
impl ForecastSource for FlatForecast {
    async fn get_forecast(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ForecastSlot>> {
        if *self.fail.lock() {
            anyhow::bail!("price service unreachable");
        }
        let import_price = *self.import_price.lock();
        let mut slots = Vec::new();
        let mut ts = start.timestamp();
        while ts < end.timestamp() {
            slots.push(ForecastSlot {
                timestamp: ts,
                import_price,
                export_price: self.export_price,
                solar_kw: self.solar_kw,
                load_kw: self.load_kw,
                air_temperature: Some(12.0),
                weather_symbol: Some("cloudy".to_owned()),
                ..Default::default()
            });
            ts += self.slot_seconds;
        }
        Ok(slots)
    }

    fn name(&self) -> &str {
        "flat"
    }
}

/// Small, fast configuration with real commands (debug mode off)
pub fn test_config() -> DispatchConfig {
    let mut config = DispatchConfig::default();
    config.planner.horizon_slots = 8;
    config.planner.soc_quantum = 0.05;
    config.scheduler.debug_mode = false;
    config.scheduler.command_timeout_secs = 2;
    config.scheduler.read_timeout_secs = 2;
    config
}

pub fn at(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).expect("valid timestamp")
}
