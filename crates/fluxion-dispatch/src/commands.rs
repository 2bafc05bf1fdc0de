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

//! Device mode commands.
//!
//! Every mode change goes through [`CommandExecutor`]: at most one command in
//! flight per device, a bounded number in flight overall, a timeout on each.

use fluxion_types::{DeviceHandle, DeviceMode};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::debug::{DebugExecutionResult, DebugModeConfig};
use crate::error::DispatchError;
use crate::traits::DeviceRegistry;

/// Why a mode change was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandOrigin {
    BudgetEnforcement,
    ThermalDemotion,
    ThermalUpgrade,
    PriceWake,
    PriceSleep,
}

impl CommandOrigin {
    /// Upgrades must pass the budget gate, demotions never wait for it
    pub fn is_gated(self) -> bool {
        matches!(self, Self::ThermalUpgrade | Self::PriceWake)
    }
}

impl fmt::Display for CommandOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BudgetEnforcement => write!(f, "budget"),
            Self::ThermalDemotion => write!(f, "thermal demotion"),
            Self::ThermalUpgrade => write!(f, "thermal upgrade"),
            Self::PriceWake => write!(f, "price wake"),
            Self::PriceSleep => write!(f, "price sleep"),
        }
    }
}

/// Request to move one device to `target`
#[derive(Debug, Clone, PartialEq)]
pub struct ModeCommand {
    pub device: DeviceHandle,
    pub from: DeviceMode,
    pub target: DeviceMode,
    pub origin: CommandOrigin,
}

/// Per-device command lifecycle: `Idle -> Requested -> Applied | Refused | Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommandState {
    #[default]
    Idle,
    Requested,
    Applied,
    Refused,
    Failed,
}

impl CommandState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Applied | Self::Refused | Self::Failed)
    }

    /// Whether `self -> next` is a legal step
    pub fn can_transition_to(self, next: CommandState) -> bool {
        match (self, next) {
            // A new command may start from idle or any finished one
            (Self::Idle, Self::Requested | Self::Refused) => true,
            (s, Self::Requested | Self::Refused) if s.is_terminal() => true,
            (Self::Requested, Self::Applied | Self::Failed | Self::Refused) => true,
            _ => false,
        }
    }
}

/// Outcome of one command
#[derive(Debug, Clone, PartialEq)]
pub struct CommandReport {
    pub device_id: String,
    pub from: DeviceMode,
    pub target: DeviceMode,
    pub origin: CommandOrigin,
    pub state: CommandState,
    /// Applied in dry-run mode only
    pub simulated: bool,
    pub error: Option<String>,
}

impl CommandReport {
    pub fn refused(command: &ModeCommand, reason: impl Into<String>) -> Self {
        Self {
            device_id: command.device.id.clone(),
            from: command.from,
            target: command.target,
            origin: command.origin,
            state: CommandState::Refused,
            simulated: false,
            error: Some(reason.into()),
        }
    }

    fn finished(command: &ModeCommand, state: CommandState, simulated: bool, error: Option<String>) -> Self {
        Self {
            device_id: command.device.id.clone(),
            from: command.from,
            target: command.target,
            origin: command.origin,
            state,
            simulated,
            error,
        }
    }

    /// Report for a command that was either sent or stood in for by a dry run
    fn settled(command: &ModeCommand, result: &DebugExecutionResult) -> Self {
        let state = if result.is_success() {
            CommandState::Applied
        } else {
            CommandState::Refused
        };
        Self::finished(command, state, result.is_simulation(), None)
    }

    pub fn is_applied(&self) -> bool {
        self.state == CommandState::Applied
    }
}

/// Runs mode commands against the registry on a bounded pool
pub struct CommandExecutor {
    registry: Arc<dyn DeviceRegistry>,
    permits: Arc<Semaphore>,
    timeout: Duration,
    debug: DebugModeConfig,
    device_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    states: Arc<Mutex<HashMap<String, CommandState>>>,
}

impl fmt::Debug for CommandExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandExecutor")
            .field("registry", &self.registry.name())
            .field("available_permits", &self.permits.available_permits())
            .field("timeout", &self.timeout)
            .field("debug", &self.debug)
            .finish_non_exhaustive()
    }
}

impl CommandExecutor {
    pub fn new(
        registry: Arc<dyn DeviceRegistry>,
        max_concurrent: usize,
        timeout: Duration,
        debug: DebugModeConfig,
    ) -> Self {
        Self {
            registry,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            timeout,
            debug,
            device_locks: Mutex::new(HashMap::new()),
            states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.debug.is_enabled()
    }

    /// Last lifecycle state of a device's command
    pub fn state_of(&self, device_id: &str) -> CommandState {
        self.states.lock().get(device_id).copied().unwrap_or_default()
    }

    fn device_lock(&self, device_id: &str) -> Arc<AsyncMutex<()>> {
        Arc::clone(
            self.device_locks
                .lock()
                .entry(device_id.to_owned())
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        )
    }

    /// Record a refusal decided before execution (e.g. by the budget gate)
    pub fn record_refused(&self, command: &ModeCommand, reason: &str) -> CommandReport {
        set_state(&self.states, &command.device.id, CommandState::Refused);
        info!(
            device_id = %command.device.id,
            from = %command.from,
            target_mode = %command.target,
            origin = %command.origin,
            "🚫 Mode change refused: {reason}"
        );
        CommandReport::refused(command, reason)
    }

    /// Run a batch concurrently and wait for all of them.
    ///
    /// Reports come back in input order. A device that already has a command
    /// in flight gets `Refused`; a failing device never affects the others.
    pub async fn execute(&self, commands: Vec<ModeCommand>) -> Vec<CommandReport> {
        let mut tasks = JoinSet::new();
        let mut slots: Vec<Option<CommandReport>> = vec![None; commands.len()];

        for (index, command) in commands.iter().enumerate() {
            let lock = self.device_lock(&command.device.id);
            let Ok(guard) = lock.try_lock_owned() else {
                // The in-flight command owns the state; only report the refusal
                info!(device_id = %command.device.id, "⏳ Command already in flight, refusing");
                slots[index] = Some(CommandReport::refused(command, "command already in flight"));
                continue;
            };
            set_state(&self.states, &command.device.id, CommandState::Requested);

            let registry = Arc::clone(&self.registry);
            let permits = Arc::clone(&self.permits);
            let states = Arc::clone(&self.states);
            let debug = self.debug.clone();
            let timeout = self.timeout;
            let command = command.clone();

            tasks.spawn(async move {
                let _guard = guard;
                let report = run_command(registry, permits, timeout, &debug, &command).await;
                set_state(&states, &command.device.id, report.state);
                (index, report)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, report)) => slots[index] = Some(report),
                Err(e) => error!("Command task failed: {}", DispatchError::from(e)),
            }
        }

        slots
            .into_iter()
            .zip(&commands)
            .map(|(report, command)| {
                report.unwrap_or_else(|| {
                    CommandReport::finished(
                        command,
                        CommandState::Failed,
                        false,
                        Some("command task aborted".to_owned()),
                    )
                })
            })
            .collect()
    }
}

fn set_state(states: &Mutex<HashMap<String, CommandState>>, device_id: &str, next: CommandState) {
    let mut states = states.lock();
    let current = states.get(device_id).copied().unwrap_or_default();
    if !current.can_transition_to(next) {
        warn!(device_id, ?current, ?next, "Unexpected command state transition");
    }
    states.insert(device_id.to_owned(), next);
}

async fn run_command(
    registry: Arc<dyn DeviceRegistry>,
    permits: Arc<Semaphore>,
    timeout: Duration,
    debug: &DebugModeConfig,
    command: &ModeCommand,
) -> CommandReport {
    let Ok(_permit) = permits.acquire_owned().await else {
        return CommandReport::finished(
            command,
            CommandState::Failed,
            false,
            Some("command pool closed".to_owned()),
        );
    };

    let device_id = command.device.id.as_str();

    if !debug.should_execute() {
        debug.log_would_execute(
            &format!("set_mode {}", command.target),
            device_id,
            &command.origin.to_string(),
        );
        return CommandReport::settled(command, &debug.dry_run_result());
    }

    let result = match tokio::time::timeout(timeout, registry.set_mode(&command.device, command.target)).await {
        Ok(Ok(())) => {
            info!(
                device_id,
                from = %command.from,
                target_mode = %command.target,
                origin = %command.origin,
                "✅ Device mode applied"
            );
            DebugExecutionResult::Executed
        }
        Ok(Err(e)) => {
            let err = DispatchError::Device {
                device_id: device_id.to_owned(),
                reason: format!("{e:#}"),
            };
            warn!(target_mode = %command.target, "❌ {err}");
            return CommandReport::finished(command, CommandState::Failed, false, Some(err.to_string()));
        }
        Err(_) => {
            let err = DispatchError::DeviceTimeout {
                device_id: device_id.to_owned(),
                timeout_secs: timeout.as_secs(),
            };
            warn!(target_mode = %command.target, "❌ {err}");
            return CommandReport::finished(command, CommandState::Failed, false, Some(err.to_string()));
        }
    };
    CommandReport::settled(command, &result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use fluxion_types::DeviceReading;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct SlowRegistry {
        delay: Duration,
        fail_id: Option<&'static str>,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl SlowRegistry {
        fn new(delay: Duration, fail_id: Option<&'static str>) -> Self {
            Self {
                delay,
                fail_id,
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl DeviceRegistry for SlowRegistry {
        async fn discover(&self) -> Result<Vec<DeviceHandle>> {
            Ok(Vec::new())
        }

        async fn read_state(&self, _handle: &DeviceHandle) -> Result<DeviceReading> {
            anyhow::bail!("not used")
        }

        async fn set_mode(&self, handle: &DeviceHandle, _mode: DeviceMode) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if self.fail_id == Some(handle.id.as_str()) {
                anyhow::bail!("connection reset");
            }
            Ok(())
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    fn command(id: &str, target: DeviceMode) -> ModeCommand {
        ModeCommand {
            device: DeviceHandle::new(id, ""),
            from: DeviceMode::Standby,
            target,
            origin: CommandOrigin::PriceWake,
        }
    }

    #[test]
    fn test_state_machine() {
        use CommandState::{Applied, Failed, Idle, Requested};
        assert!(Idle.can_transition_to(Requested));
        assert!(Requested.can_transition_to(Applied));
        assert!(Requested.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Requested));
        assert!(!Idle.can_transition_to(Applied));
        assert!(!Requested.can_transition_to(Requested));
        assert!(!Applied.can_transition_to(Idle));
    }

    #[test]
    fn test_gated_origins() {
        assert!(CommandOrigin::PriceWake.is_gated());
        assert!(CommandOrigin::ThermalUpgrade.is_gated());
        assert!(!CommandOrigin::ThermalDemotion.is_gated());
        assert!(!CommandOrigin::BudgetEnforcement.is_gated());
        assert!(!CommandOrigin::PriceSleep.is_gated());
    }

    #[tokio::test]
    async fn test_failure_is_isolated() {
        let registry = Arc::new(SlowRegistry::new(Duration::from_millis(5), Some("b")));
        let executor = CommandExecutor::new(
            registry.clone(),
            4,
            Duration::from_secs(1),
            DebugModeConfig::disabled(),
        );

        let reports = executor
            .execute(vec![
                command("a", DeviceMode::Eco),
                command("b", DeviceMode::Eco),
                command("c", DeviceMode::Eco),
            ])
            .await;

        let states: Vec<_> = reports.iter().map(|r| r.state).collect();
        assert_eq!(
            states,
            vec![
                CommandState::Applied,
                CommandState::Failed,
                CommandState::Applied
            ]
        );
        assert!(reports[1].error.as_deref().unwrap().contains("connection reset"));
        assert_eq!(executor.state_of("b"), CommandState::Failed);
    }

    #[tokio::test]
    async fn test_timeout_marks_failed() {
        let registry = Arc::new(SlowRegistry::new(Duration::from_millis(200), None));
        let executor = CommandExecutor::new(
            registry,
            1,
            Duration::from_millis(20),
            DebugModeConfig::disabled(),
        );

        let reports = executor.execute(vec![command("a", DeviceMode::Eco)]).await;
        assert_eq!(reports[0].state, CommandState::Failed);
        assert!(reports[0].error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_pool_bounds_concurrency() {
        let registry = Arc::new(SlowRegistry::new(Duration::from_millis(20), None));
        let executor = CommandExecutor::new(
            registry.clone(),
            2,
            Duration::from_secs(1),
            DebugModeConfig::disabled(),
        );

        let commands = (0..6)
            .map(|i| command(&format!("dev-{i}"), DeviceMode::Eco))
            .collect();
        let reports = executor.execute(commands).await;

        assert!(reports.iter().all(CommandReport::is_applied));
        assert_eq!(registry.calls.load(Ordering::SeqCst), 6);
        assert!(registry.max_in_flight.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_one_command_per_device() {
        let registry = Arc::new(SlowRegistry::new(Duration::from_millis(20), None));
        let executor = CommandExecutor::new(
            registry.clone(),
            4,
            Duration::from_secs(1),
            DebugModeConfig::disabled(),
        );

        let reports = executor
            .execute(vec![
                command("a", DeviceMode::Eco),
                command("a", DeviceMode::Standard),
            ])
            .await;

        assert_eq!(reports[0].state, CommandState::Applied);
        assert_eq!(reports[1].state, CommandState::Refused);
        assert_eq!(registry.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dry_run_never_calls_registry() {
        let registry = Arc::new(SlowRegistry::new(Duration::from_millis(1), None));
        let executor = CommandExecutor::new(
            registry.clone(),
            4,
            Duration::from_secs(1),
            DebugModeConfig::enabled(),
        );

        let reports = executor.execute(vec![command("a", DeviceMode::Eco)]).await;
        assert!(reports[0].is_applied());
        assert!(reports[0].simulated);
        assert_eq!(registry.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_logged_only_dry_run_is_refused() {
        let registry = Arc::new(SlowRegistry::new(Duration::from_millis(1), None));
        let debug = DebugModeConfig {
            enabled: true,
            simulate_success: false,
        };
        let executor = CommandExecutor::new(registry.clone(), 4, Duration::from_secs(1), debug);

        let reports = executor.execute(vec![command("a", DeviceMode::Eco)]).await;
        assert_eq!(reports[0].state, CommandState::Refused);
        assert!(!reports[0].simulated);
        assert_eq!(registry.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_production_command_is_sent_and_not_simulated() {
        let registry = Arc::new(SlowRegistry::new(Duration::from_millis(1), None));
        let debug = DebugModeConfig::from_flag(false);
        assert!(debug.should_execute());
        let executor = CommandExecutor::new(registry.clone(), 4, Duration::from_secs(1), debug);

        let reports = executor.execute(vec![command("a", DeviceMode::Standard)]).await;
        assert!(reports[0].is_applied());
        assert!(!reports[0].simulated);
        assert_eq!(registry.calls.load(Ordering::SeqCst), 1);
        assert_eq!(executor.state_of("a"), CommandState::Applied);
    }
}
