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

//! Scheduler orchestrator.
//!
//! Two periodic loops share one budget gate:
//! - fast loop: refresh devices, thermal guard, budget enforcement, thermal upgrades
//! - slow loop: re-plan, then price-driven wake-up and sleep
//!
//! Inside the gate a tick builds one [`BudgetLedger`], so a price wake-up and
//! a thermal upgrade can never both spend the same headroom.

use chrono::{DateTime, Utc};
use fluxion_types::{
    DeviceState, DispatchConfig, InverterDirective, TimeSlotDecision, slot_start,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::commands::{CommandExecutor, CommandOrigin, CommandReport, CommandState, ModeCommand};
use crate::debug::DebugModeConfig;
use crate::error::Result;
use crate::optimizer::{HorizonOptimizer, ReplanOutcome};
use crate::power_budget::{BudgetLedger, BudgetSnapshot, PowerBudgetGovernor};
use crate::price_policy::PricePolicy;
use crate::registry::DeviceTable;
use crate::store::DecisionStore;
use crate::thermal_guard::{ThermalAction, ThermalGuard};
use crate::traits::{DeviceRegistry, ForecastSource, PlantDataSource};

/// What one fast tick did
#[derive(Debug, Clone)]
pub struct FastTickReport {
    /// Budget after the tick's planned changes
    pub budget: BudgetSnapshot,
    pub reports: Vec<CommandReport>,
}

/// What one slow tick did
#[derive(Debug, Clone, Default)]
pub struct SlowTickReport {
    pub replan: Option<ReplanOutcome>,
    pub replan_error: Option<String>,
    pub directive: Option<InverterDirective>,
    pub reports: Vec<CommandReport>,
}

pub struct DispatchOrchestrator {
    config: DispatchConfig,
    optimizer: HorizonOptimizer,
    store: Arc<dyn DecisionStore>,
    registry: Arc<dyn DeviceRegistry>,
    governor: PowerBudgetGovernor,
    thermal: Mutex<ThermalGuard>,
    price_policy: PricePolicy,
    table: DeviceTable,
    executor: CommandExecutor,
    budget_gate: AsyncMutex<()>,
}

impl std::fmt::Debug for DispatchOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchOrchestrator")
            .field("registry", &self.registry.name())
            .field("devices", &self.table.len())
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}

impl DispatchOrchestrator {
    pub fn new(
        config: DispatchConfig,
        forecast: Arc<dyn ForecastSource>,
        plant: Arc<dyn PlantDataSource>,
        registry: Arc<dyn DeviceRegistry>,
        store: Arc<dyn DecisionStore>,
    ) -> Result<Self> {
        let scheduler = &config.scheduler;
        let read_timeout = Duration::from_secs(scheduler.read_timeout_secs);

        let optimizer =
            HorizonOptimizer::new(&config, forecast, Arc::clone(&plant), Arc::clone(&store))?;
        let governor = PowerBudgetGovernor::new(config.budget.clone(), plant, read_timeout);
        let executor = CommandExecutor::new(
            Arc::clone(&registry),
            scheduler.max_concurrent_commands,
            Duration::from_secs(scheduler.command_timeout_secs),
            DebugModeConfig::from_flag(scheduler.debug_mode),
        );

        Ok(Self {
            thermal: Mutex::new(ThermalGuard::new(config.thermal.clone())),
            price_policy: PricePolicy::new(config.price_policy.clone()),
            optimizer,
            store,
            registry,
            governor,
            table: DeviceTable::new(),
            executor,
            budget_gate: AsyncMutex::new(()),
            config,
        })
    }

    pub fn device_table(&self) -> &DeviceTable {
        &self.table
    }

    pub fn executor(&self) -> &CommandExecutor {
        &self.executor
    }

    pub fn optimizer(&self) -> &HorizonOptimizer {
        &self.optimizer
    }

    fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.config.scheduler.read_timeout_secs)
    }

    fn ledger_for(&self, available_kw: f64, devices: &[DeviceState]) -> BudgetLedger {
        self.governor
            .ledger(available_kw, devices.iter().map(|d| (d.handle.id.clone(), d.mode)))
    }

    /// Stored decision for the slot containing `now`
    pub fn current_decision(&self, now: DateTime<Utc>) -> Result<Option<TimeSlotDecision>> {
        let slot = slot_start(now.timestamp(), self.config.planner.slot_seconds());
        self.store.decision_at(slot)
    }

    /// Run commands, fold results back into the device table and thermal windows
    async fn dispatch(&self, commands: Vec<ModeCommand>, now: DateTime<Utc>) -> Vec<CommandReport> {
        if commands.is_empty() {
            return Vec::new();
        }
        let reports = self.executor.execute(commands).await;
        self.table.apply_reports(&reports, now);

        let mut thermal = self.thermal.lock();
        for report in reports.iter().filter(|r| r.is_applied()) {
            thermal.reset(&report.device_id, report.target);
        }
        reports
    }

    /// Fast loop body: thermal guard and budget enforcement
    pub async fn fast_tick(&self, now: DateTime<Utc>) -> FastTickReport {
        self.table.refresh(&self.registry, self.read_timeout(), now).await;
        let available_kw = self.governor.read_available_pv().await;

        let _gate = self.budget_gate.lock().await;
        let devices = self.table.snapshot();
        let mut ledger = self.ledger_for(available_kw, &devices);

        let mut demoted: BTreeMap<String, CommandOrigin> = BTreeMap::new();
        let mut upgrades = Vec::new();
        {
            let mut thermal = self.thermal.lock();
            thermal.retain_devices(devices.iter().map(DeviceState::id));
            for device in &devices {
                // A stale proxy from an unreachable device is not a new sample
                let proxy = device.thermal_proxy.filter(|_| device.reachable);
                match thermal.observe(device.id(), device.mode, proxy) {
                    ThermalAction::Demote { to } => {
                        ledger.set_mode(device.id(), to);
                        demoted.insert(device.id().to_owned(), CommandOrigin::ThermalDemotion);
                    }
                    ThermalAction::ProposeUpgrade { to } if device.reachable => {
                        upgrades.push((device, to));
                    }
                    ThermalAction::ProposeUpgrade { .. } | ThermalAction::Hold => {}
                }
            }
        }

        for demotion in ledger.enforce() {
            demoted
                .entry(demotion.device_id)
                .or_insert(CommandOrigin::BudgetEnforcement);
        }

        let mut commands = Vec::new();
        for device in &devices {
            let Some(origin) = demoted.get(device.id()) else {
                continue;
            };
            let target = ledger.mode_of(device.id());
            if target < device.mode {
                commands.push(ModeCommand {
                    device: device.handle.clone(),
                    from: device.mode,
                    target,
                    origin: *origin,
                });
            }
        }

        let mut refused = Vec::new();
        for (device, to) in upgrades {
            if demoted.contains_key(device.id()) {
                continue;
            }
            let command = ModeCommand {
                device: device.handle.clone(),
                from: device.mode,
                target: to,
                origin: CommandOrigin::ThermalUpgrade,
            };
            if ledger.try_reserve(device.id(), to) {
                commands.push(command);
            } else {
                refused.push(
                    self.executor
                        .record_refused(&command, "insufficient power budget"),
                );
            }
        }

        let budget = ledger.snapshot();
        let mut reports = self.dispatch(commands, now).await;
        reports.extend(refused);

        log_reports("fast", &reports);
        FastTickReport { budget, reports }
    }

    /// Slow loop body: re-plan, then apply the price policy for the current slot
    pub async fn slow_tick(&self, now: DateTime<Utc>) -> SlowTickReport {
        let mut report = SlowTickReport::default();

        match self.optimizer.replan(now).await {
            Ok(outcome) => report.replan = Some(outcome),
            Err(e) => {
                warn!("⚠️  Re-plan failed, keeping previous plan: {e}");
                report.replan_error = Some(e.to_string());
            }
        }

        let decision = match self.current_decision(now) {
            Ok(Some(decision)) => decision,
            Ok(None) => {
                debug!("No decision stored for the current slot");
                return report;
            }
            Err(e) => {
                warn!("⚠️  Failed to load current decision: {e}");
                return report;
            }
        };

        let directive = decision.inverter_directive();
        info!(
            slot_timestamp = decision.timestamp,
            charge_from_grid = decision.battery_charge_from_grid,
            charge_from_pv = decision.battery_charge_from_pv,
            "🔋 Inverter directive: {directive}"
        );
        report.directive = Some(directive);

        if !self.price_policy.config().enabled {
            return report;
        }

        let available_kw = self.governor.read_available_pv().await;
        let _gate = self.budget_gate.lock().await;
        let devices = self.table.snapshot();
        let mut ledger = self.ledger_for(available_kw, &devices);

        let mut commands = Vec::new();
        let mut refused = Vec::new();
        for proposal in self.price_policy.evaluate(&decision, &devices) {
            let id = proposal.device.id.clone();
            if !proposal.origin.is_gated() {
                ledger.set_mode(&id, proposal.target);
                commands.push(proposal);
            } else if ledger.try_reserve(&id, proposal.target) {
                commands.push(proposal);
            } else {
                refused.push(
                    self.executor
                        .record_refused(&proposal, "insufficient power budget"),
                );
            }
        }

        let mut reports = self.dispatch(commands, now).await;
        reports.extend(refused);
        log_reports("slow", &reports);
        report.reports = reports;
        report
    }

    /// Run both loops until `shutdown` turns true (or its sender is dropped).
    ///
    /// A tick in progress always finishes, so in-flight commands complete
    /// (bounded by their timeouts) before this returns.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Result<()> {
        if self.executor.is_dry_run() {
            info!("🔍 DEBUG MODE: device commands are logged and simulated");
        } else {
            DebugModeConfig::warn_production_mode();
        }

        let fast_period = Duration::from_secs(self.config.scheduler.fast_interval_secs.max(1));
        let slow_period = Duration::from_secs(self.config.scheduler.slow_interval_secs.max(1));

        let fast = tokio::spawn(Arc::clone(&self).fast_loop(fast_period, shutdown.clone()));
        let slow = tokio::spawn(Arc::clone(&self).slow_loop(slow_period, shutdown));

        fast.await?;
        slow.await?;
        info!("🛑 Dispatch orchestrator stopped");
        Ok(())
    }

    async fn fast_loop(self: Arc<Self>, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        while !*shutdown.borrow() {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    self.fast_tick(Utc::now()).await;
                }
            }
        }
        debug!("Fast loop stopped");
    }

    async fn slow_loop(self: Arc<Self>, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        while !*shutdown.borrow() {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    self.slow_tick(Utc::now()).await;
                }
            }
        }
        debug!("Slow loop stopped");
    }
}

fn log_reports(tick: &str, reports: &[CommandReport]) {
    if reports.is_empty() {
        return;
    }
    let count = |state: CommandState| reports.iter().filter(|r| r.state == state).count();
    info!(
        tick,
        applied = count(CommandState::Applied),
        refused = count(CommandState::Refused),
        failed = count(CommandState::Failed),
        "🎛️  Device commands processed"
    );
}
