use std::fmt;

use crate::{config::ThermostatConfig, types::OperatingMode};

/// A relay transition the engine wants to make.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardRequest {
    pub now_ms: u64,
    /// Mode the relays currently realize.
    pub running: OperatingMode,
    /// Mode the transition would leave the relays in.
    pub target: OperatingMode,
    pub active_since_ms: Option<u64>,
    pub last_state_change_ms: Option<u64>,
    pub last_mode_change_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    Crossover {
        running: OperatingMode,
        requested: OperatingMode,
    },
    MinRunTime {
        remaining_ms: u64,
    },
    MinIdleTime {
        remaining_ms: u64,
    },
    ModeCooldown {
        remaining_ms: u64,
    },
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Crossover { running, requested } => write!(
                f,
                "equipment is running {running}; switching straight to {requested} may damage the compressor"
            ),
            Self::MinRunTime { remaining_ms } => write!(
                f,
                "minimum run time not reached ({} s remaining)",
                remaining_ms.div_ceil(1_000)
            ),
            Self::MinIdleTime { remaining_ms } => write!(
                f,
                "minimum idle time not reached ({} s remaining)",
                remaining_ms.div_ceil(1_000)
            ),
            Self::ModeCooldown { remaining_ms } => write!(
                f,
                "mode changed recently ({} s of cooldown remaining)",
                remaining_ms.div_ceil(1_000)
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Grant,
    Deny(DenyReason),
}

impl Verdict {
    pub fn is_granted(self) -> bool {
        self == Self::Grant
    }
}

/// Sole authority over relay transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtectionGuard {
    min_run_time_ms: u64,
    min_idle_time_ms: u64,
    min_mode_cooldown_ms: u64,
}

impl ProtectionGuard {
    pub fn new(min_run_time_ms: u64, min_idle_time_ms: u64, min_mode_cooldown_ms: u64) -> Self {
        Self {
            min_run_time_ms,
            min_idle_time_ms,
            min_mode_cooldown_ms,
        }
    }

    pub fn from_config(config: &ThermostatConfig) -> Self {
        Self::new(
            config.min_run_time_ms,
            config.min_idle_time_ms,
            config.min_mode_cooldown_ms,
        )
    }

    pub fn evaluate(&self, request: &GuardRequest) -> Verdict {
        let running = request.running;
        let target = request.target;

        if (running.is_heating() && target.is_cooling())
            || (running.is_cooling() && target.is_heating())
        {
            return Verdict::Deny(DenyReason::Crossover {
                running,
                requested: target,
            });
        }

        if running.is_active() && target != running {
            if let Some(remaining_ms) =
                remaining(request.now_ms, request.active_since_ms, self.min_run_time_ms)
            {
                return Verdict::Deny(DenyReason::MinRunTime { remaining_ms });
            }
        }

        if !running.is_active() && target.is_active() {
            if let Some(remaining_ms) = remaining(
                request.now_ms,
                request.last_state_change_ms,
                self.min_idle_time_ms,
            ) {
                return Verdict::Deny(DenyReason::MinIdleTime { remaining_ms });
            }
        }

        if let Some(remaining_ms) = remaining(
            request.now_ms,
            request.last_mode_change_ms,
            self.min_mode_cooldown_ms,
        ) {
            return Verdict::Deny(DenyReason::ModeCooldown { remaining_ms });
        }

        Verdict::Grant
    }
}

/// Time left before `minimum_ms` has elapsed since `since_ms`, or `None`
/// once it has (or if nothing has happened yet).
fn remaining(now_ms: u64, since_ms: Option<u64>, minimum_ms: u64) -> Option<u64> {
    let elapsed = now_ms.saturating_sub(since_ms?);
    (elapsed < minimum_ms).then(|| minimum_ms - elapsed)
}
