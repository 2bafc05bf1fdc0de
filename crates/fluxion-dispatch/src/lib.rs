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

//! FluxION dispatch core.
//!
//! Plans battery/grid dispatch over a rolling horizon, persists the plan per
//! slot and keeps controllable devices inside the available power budget and
//! thermal limits.

pub mod commands;
pub mod debug;
pub mod error;
pub mod optimizer;
pub mod orchestrator;
pub mod power_budget;
pub mod price_policy;
pub mod registry;
pub mod store;
pub mod thermal_guard;
pub mod traits;

pub use commands::{CommandExecutor, CommandOrigin, CommandReport, CommandState, ModeCommand};
pub use debug::{DebugExecutionResult, DebugModeConfig};
pub use error::{DispatchError, Result};
pub use optimizer::{HorizonOptimizer, Plan, ReplanOutcome, plan_horizon};
pub use orchestrator::{DispatchOrchestrator, FastTickReport, SlowTickReport};
pub use power_budget::{BudgetLedger, BudgetSnapshot, Demotion, PowerBudgetGovernor, effective_limit};
pub use price_policy::{PricePolicy, PriceProposal};
pub use registry::DeviceTable;
pub use store::{DecisionStore, SqliteDecisionStore};
pub use thermal_guard::{ThermalAction, ThermalGuard};
pub use traits::{DeviceRegistry, ForecastSource, PlantDataSource};
