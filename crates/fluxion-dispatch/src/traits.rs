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

//! Collaborator boundaries.
//!
//! Wire protocols for devices, the plant and forecast providers live outside
//! this crate. Implementations only need to honour these traits; every call
//! is wrapped in a timeout by the caller.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fluxion_types::{DeviceHandle, DeviceMode, DeviceReading, ForecastSlot, PlantSnapshot};

/// Discovery, state reads and mode commands for controllable devices
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    /// Enumerate currently known devices
    async fn discover(&self) -> Result<Vec<DeviceHandle>>;

    /// Read the current mode and thermal proxy of one device
    async fn read_state(&self, handle: &DeviceHandle) -> Result<DeviceReading>;

    /// Command a device into `mode`
    async fn set_mode(&self, handle: &DeviceHandle, mode: DeviceMode) -> Result<()>;

    /// Get the registry name for logging
    fn name(&self) -> &str;
}

/// Real-time plant readings
#[async_trait]
pub trait PlantDataSource: Send + Sync {
    /// PV power currently available for device consumption (kW)
    async fn read_available_pv(&self) -> Result<f64>;

    /// Solar, battery and grid power plus battery SOC
    async fn read_plant_power(&self) -> Result<PlantSnapshot>;

    /// Get the data source name for logging
    fn name(&self) -> &str;
}

/// Price, solar, load and weather forecast per slot
#[async_trait]
pub trait ForecastSource: Send + Sync {
    /// Forecast slots with `start <= timestamp < end`, in any order
    async fn get_forecast(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ForecastSlot>>;

    /// Get the forecast source name for logging
    fn name(&self) -> &str;
}
