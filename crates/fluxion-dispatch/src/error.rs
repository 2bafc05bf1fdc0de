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

//! Error types for the dispatch crate

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("forecast unavailable from {source_name}: {reason}")]
    ForecastUnavailable { source_name: String, reason: String },

    #[error("no feasible plan from slot {slot_timestamp}: {reason}")]
    Infeasible { slot_timestamp: i64, reason: String },

    #[error("plant data unavailable: {0}")]
    PlantUnavailable(String),

    #[error("decision store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("duplicate decision for slot {0}")]
    DuplicateSlot(i64),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("device {device_id} timed out after {timeout_secs}s")]
    DeviceTimeout { device_id: String, timeout_secs: u64 },

    #[error("device {device_id} failed: {reason}")]
    Device { device_id: String, reason: String },

    #[error("config error: {0}")]
    Config(String),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, DispatchError>;
