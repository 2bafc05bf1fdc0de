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

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Dry-run configuration for device commands
///
/// When debug mode is enabled (default: ON), the executor will:
/// - Log every intended mode change instead of sending it
/// - Report the change as applied so the control loops keep running
///
/// This allows safe testing next to production hardware.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebugModeConfig {
    /// Whether debug mode is enabled
    pub enabled: bool,

    /// Whether to simulate successful execution
    pub simulate_success: bool,
}

impl Default for DebugModeConfig {
    fn default() -> Self {
        Self {
            enabled: true, // Safe default - debug mode ON
            simulate_success: true,
        }
    }
}

impl DebugModeConfig {
    /// Create with debug mode enabled
    pub fn enabled() -> Self {
        Self::default()
    }

    /// Create with debug mode disabled (production mode)
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            simulate_success: false,
        }
    }

    /// Build from the scheduler's `debug_mode` flag
    pub fn from_flag(enabled: bool) -> Self {
        if enabled {
            Self::enabled()
        } else {
            Self::disabled()
        }
    }

    /// Check if an action should be executed or just logged
    pub fn should_execute(&self) -> bool {
        !self.enabled
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Outcome reported for a command that was not sent
    pub fn dry_run_result(&self) -> DebugExecutionResult {
        if self.simulate_success {
            DebugExecutionResult::Simulated
        } else {
            DebugExecutionResult::LoggedOnly
        }
    }

    /// Log that an action would be executed in production
    pub fn log_would_execute(&self, action: &str, target: &str, reason: &str) {
        if self.enabled {
            info!(
                "🔍 DEBUG MODE: Would execute '{}' on '{}' (reason: {})",
                action, target, reason
            );
        }
    }

    /// Warn when debug mode is disabled (production mode)
    pub fn warn_production_mode() {
        warn!("⚠️  DEBUG MODE DISABLED - System will send REAL commands to devices!");
        warn!("⚠️  Ensure configuration is correct before proceeding.");
    }
}

/// Result type for debug mode operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebugExecutionResult {
    /// Action was executed in production mode
    Executed,

    /// Action was simulated in debug mode (reported as success)
    Simulated,

    /// Action was logged but not executed or simulated
    LoggedOnly,
}

impl DebugExecutionResult {
    /// Check if the action was successful (either executed or simulated)
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Executed | Self::Simulated)
    }

    pub fn is_simulation(&self) -> bool {
        matches!(self, Self::Simulated)
    }
}
