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

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============= Device Mode =============

/// Operating mode of a controllable device, ordered by power draw.
///
/// `Standby < Eco < Standard < Super`. Every mode has exactly one step down
/// and one step up; the ends saturate.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum DeviceMode {
    #[default]
    Standby,
    Eco,
    Standard,
    Super,
}

impl DeviceMode {
    /// All modes from lowest to highest draw
    pub const ALL: [DeviceMode; 4] = [Self::Standby, Self::Eco, Self::Standard, Self::Super];

    /// One step down, saturating at `Standby`
    #[must_use]
    pub fn demoted(self) -> Self {
        match self {
            Self::Standby | Self::Eco => Self::Standby,
            Self::Standard => Self::Eco,
            Self::Super => Self::Standard,
        }
    }

    /// One step up, saturating at `Super`
    #[must_use]
    pub fn upgraded(self) -> Self {
        match self {
            Self::Standby => Self::Eco,
            Self::Eco => Self::Standard,
            Self::Standard | Self::Super => Self::Super,
        }
    }

    pub fn is_standby(self) -> bool {
        self == Self::Standby
    }

    /// Config string value (lowercase)
    pub fn to_config_value(self) -> &'static str {
        match self {
            Self::Standby => "standby",
            Self::Eco => "eco",
            Self::Standard => "standard",
            Self::Super => "super",
        }
    }
}

impl fmt::Display for DeviceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Standby => write!(f, "Standby"),
            Self::Eco => write!(f, "Eco"),
            Self::Standard => write!(f, "Standard"),
            Self::Super => write!(f, "Super"),
        }
    }
}

impl FromStr for DeviceMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "standby" | "off" => Ok(Self::Standby),
            "eco" => Ok(Self::Eco),
            "standard" => Ok(Self::Standard),
            "super" => Ok(Self::Super),
            _ => Err(anyhow::anyhow!(
                "Unknown device mode: '{}'. Supported modes: {}",
                s,
                Self::ALL
                    .iter()
                    .map(|m| m.to_config_value())
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
        }
    }
}

// ============= Mode Power Table =============

/// Fixed power draw (kW) per device mode.
///
/// Used as the consumption proxy by the budget governor; devices do not
/// report their real draw.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModePowerTable {
    #[serde(default = "default_standby_kw")]
    pub standby_kw: f64,
    #[serde(default = "default_eco_kw")]
    pub eco_kw: f64,
    #[serde(default = "default_standard_kw")]
    pub standard_kw: f64,
    #[serde(default = "default_super_kw")]
    pub super_kw: f64,
}

fn default_standby_kw() -> f64 {
    0.0
}

fn default_eco_kw() -> f64 {
    0.8
}

fn default_standard_kw() -> f64 {
    1.6
}

fn default_super_kw() -> f64 {
    2.4
}

impl Default for ModePowerTable {
    fn default() -> Self {
        Self {
            standby_kw: default_standby_kw(),
            eco_kw: default_eco_kw(),
            standard_kw: default_standard_kw(),
            super_kw: default_super_kw(),
        }
    }
}

impl ModePowerTable {
    /// Power draw of a single device in `mode`
    pub fn power_kw(&self, mode: DeviceMode) -> f64 {
        match mode {
            DeviceMode::Standby => self.standby_kw,
            DeviceMode::Eco => self.eco_kw,
            DeviceMode::Standard => self.standard_kw,
            DeviceMode::Super => self.super_kw,
        }
    }

    /// True when draw is non-decreasing along the mode order
    pub fn is_monotonic(&self) -> bool {
        DeviceMode::ALL
            .windows(2)
            .all(|w| self.power_kw(w[0]) <= self.power_kw(w[1]))
    }
}

// ============= Device Identity & State =============

/// Identity of a discovered device as handed out by the registry
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceHandle {
    /// Stable identifier, also used for deterministic tie-breaking
    pub id: String,
    /// Collaborator-specific address (IP, serial, ...)
    #[serde(default)]
    pub address: String,
}

impl DeviceHandle {
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
        }
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// One read of a device as reported by the registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceReading {
    pub mode: DeviceMode,
    /// Thermal proxy in percent (e.g. fan speed); `None` when not reported
    pub thermal_proxy: Option<f64>,
    pub reachable: bool,
}

/// Last known state of a device, retained across transient failures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    pub handle: DeviceHandle,
    pub mode: DeviceMode,
    pub thermal_proxy: Option<f64>,
    pub reachable: bool,
    /// Most recent communication or command error, cleared on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl DeviceState {
    /// Fresh state for a newly discovered device (assumed Standby until read)
    pub fn discovered(handle: DeviceHandle, now: DateTime<Utc>) -> Self {
        Self {
            handle,
            mode: DeviceMode::Standby,
            thermal_proxy: None,
            reachable: false,
            last_error: None,
            updated_at: now,
        }
    }

    /// Apply a successful reading
    pub fn apply_reading(&mut self, reading: &DeviceReading, now: DateTime<Utc>) {
        self.mode = reading.mode;
        self.thermal_proxy = reading.thermal_proxy;
        self.reachable = reading.reachable;
        self.last_error = None;
        self.updated_at = now;
    }

    /// Record a failure while keeping the last known mode and thermal proxy
    pub fn mark_failed(&mut self, error: impl Into<String>, now: DateTime<Utc>) {
        self.reachable = false;
        self.last_error = Some(error.into());
        self.updated_at = now;
    }

    pub fn id(&self) -> &str {
        &self.handle.id
    }
}
