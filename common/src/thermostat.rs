use crate::{
    commands::{parse_fan_mode, parse_setpoint, Command, CommandAck, CommandRejection, SetpointKind},
    config::{ThermostatConfig, ThermostatSettings},
    guard::{DenyReason, GuardRequest, ProtectionGuard, Verdict},
    hysteresis::should_be_active,
    inference::{infer_mode, InferredMode},
    modes::{ModeTable, RelaySet},
    relay::{switch_relays, RelayBank, RelayError},
    sensor::{EnvironmentReading, SensorError},
    telemetry::{TelemetryInput, TelemetryPayload},
    types::{FanMode, OperatingMode, RelayId, RequestedMode, Setpoints},
};

/// Last hysteresis decision and the mode it was made for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Demand {
    mode: OperatingMode,
    active: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    RelayReadFailed(RelayError),
    /// Relays match no mode; nothing was written.
    Indeterminate(RelaySet),
    Steady(OperatingMode),
    Denied {
        running: OperatingMode,
        target: OperatingMode,
        reason: DenyReason,
    },
    Switched {
        from: OperatingMode,
        to: OperatingMode,
    },
    WriteFailed {
        from: OperatingMode,
        to: OperatingMode,
        error: RelayError,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    /// Set when the sensor could not be read; the hysteresis decision was
    /// carried over from the previous cycle.
    pub sensor_error: Option<SensorError>,
    pub outcome: CycleOutcome,
}

/// Heat-pump thermostat: converges the relays toward the desired mode, one
/// guarded transition per poll.
#[derive(Debug)]
pub struct ThermostatEngine<R> {
    config: ThermostatConfig,
    guard: ProtectionGuard,
    table: ModeTable,
    relays: R,

    desired_mode: OperatingMode,
    setpoints: Setpoints,
    fan_mode: FanMode,

    active_since_ms: Option<u64>,
    last_state_change_ms: Option<u64>,
    last_mode_change_ms: Option<u64>,

    demand: Option<Demand>,
    last_reading: Option<EnvironmentReading>,
}

impl<R: RelayBank> ThermostatEngine<R> {
    pub fn new(
        config: ThermostatConfig,
        settings: ThermostatSettings,
        table: ModeTable,
        relays: R,
    ) -> Self {
        Self {
            guard: ProtectionGuard::from_config(&config),
            config,
            table,
            relays,
            desired_mode: settings.mode,
            setpoints: Setpoints {
                heat: settings.heat_setpoint,
                cool: settings.cool_setpoint,
            },
            fan_mode: FanMode::Auto,
            active_since_ms: None,
            last_state_change_ms: None,
            last_mode_change_ms: None,
            demand: None,
            last_reading: None,
        }
    }

    pub fn config(&self) -> &ThermostatConfig {
        &self.config
    }

    pub fn desired_mode(&self) -> OperatingMode {
        self.desired_mode
    }

    pub fn setpoints(&self) -> Setpoints {
        self.setpoints
    }

    pub fn fan_mode(&self) -> FanMode {
        self.fan_mode
    }

    pub fn active_since_ms(&self) -> Option<u64> {
        self.active_since_ms
    }

    pub fn last_state_change_ms(&self) -> Option<u64> {
        self.last_state_change_ms
    }

    pub fn last_mode_change_ms(&self) -> Option<u64> {
        self.last_mode_change_ms
    }

    pub fn last_reading(&self) -> Option<EnvironmentReading> {
        self.last_reading
    }

    pub fn relays(&self) -> &R {
        &self.relays
    }

    pub fn relays_mut(&mut self) -> &mut R {
        &mut self.relays
    }

    pub fn inferred_mode(&self) -> Result<InferredMode, RelayError> {
        infer_mode(&self.relays, &self.table)
    }

    /// One decide-guard-act cycle.
    pub fn poll(
        &mut self,
        reading: Result<EnvironmentReading, SensorError>,
        now_ms: u64,
    ) -> CycleReport {
        let (reading, sensor_error) = match reading {
            Ok(reading) => {
                self.last_reading = Some(reading);
                (Some(reading), None)
            }
            Err(err) => (None, Some(err)),
        };

        CycleReport {
            sensor_error,
            outcome: self.run_cycle(reading, now_ms),
        }
    }

    pub fn apply_command(
        &mut self,
        command: &Command,
        now_ms: u64,
    ) -> Result<CommandAck, CommandRejection> {
        match command {
            Command::SetMode(raw) => self.set_mode(raw, now_ms),
            Command::SetSetpoint(raw) => self.set_setpoint(raw),
            Command::SetFan(raw) => {
                // Recorded for telemetry only; the fan relay follows the mode table.
                self.fan_mode = parse_fan_mode(raw)?;
                Ok(CommandAck::FanMode(self.fan_mode))
            }
        }
    }

    pub fn telemetry(&self, now_ms: u64) -> TelemetryPayload {
        let inferred = self.inferred_mode();
        TelemetryPayload::render(TelemetryInput {
            now_ms,
            desired: self.desired_mode,
            inferred: &inferred,
            active_since_ms: self.active_since_ms,
            setpoints: self.setpoints,
            reading: self.last_reading,
            fan: self.fan_mode,
        })
    }

    /// Release every relay, bypassing the guard. Only for process exit.
    /// Keeps going past failures and returns the first one.
    pub fn shutdown(&mut self, now_ms: u64) -> Result<(), RelayError> {
        let mut result = Ok(());
        for relay in RelayId::ALL.into_iter().rev() {
            if let Err(err) = self.relays.write(relay, false) {
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }
        self.active_since_ms = None;
        self.last_state_change_ms = Some(now_ms);
        result
    }

    fn run_cycle(&mut self, reading: Option<EnvironmentReading>, now_ms: u64) -> CycleOutcome {
        let running = match self.inferred_mode() {
            Ok(InferredMode::Known(mode)) => mode,
            Ok(InferredMode::Indeterminate(relays)) => return CycleOutcome::Indeterminate(relays),
            Err(err) => return CycleOutcome::RelayReadFailed(err),
        };

        self.track_activity(running, now_ms);
        let demand = self.update_demand(running, reading);
        let target = self.target_mode(running, demand);

        if target == running {
            return CycleOutcome::Steady(running);
        }

        let request = GuardRequest {
            now_ms,
            running,
            target,
            active_since_ms: self.active_since_ms,
            last_state_change_ms: self.last_state_change_ms,
            last_mode_change_ms: self.last_mode_change_ms,
        };
        if let Verdict::Deny(reason) = self.guard.evaluate(&request) {
            return CycleOutcome::Denied {
                running,
                target,
                reason,
            };
        }

        let from = self.table.relays_for(running);
        let to = self.table.relays_for(target);
        if let Err(error) = switch_relays(&mut self.relays, from, to) {
            return CycleOutcome::WriteFailed {
                from: running,
                to: target,
                error,
            };
        }

        self.last_state_change_ms = Some(now_ms);
        if !target.is_active() {
            self.active_since_ms = None;
        } else if !running.is_active() {
            self.active_since_ms = Some(now_ms);
        }

        CycleOutcome::Switched {
            from: running,
            to: target,
        }
    }

    /// Keep `active_since` in step with what the relays report, including
    /// equipment found running at startup.
    fn track_activity(&mut self, running: OperatingMode, now_ms: u64) {
        if !running.is_active() {
            self.active_since_ms = None;
        } else if self.active_since_ms.is_none() {
            self.active_since_ms = Some(now_ms);
        }
    }

    fn update_demand(&mut self, running: OperatingMode, reading: Option<EnvironmentReading>) -> bool {
        let mode = self.desired_mode;
        let previously_active = match self.demand {
            Some(demand) if demand.mode == mode => demand.active,
            Some(_) => false,
            None => running == mode && running.is_active(),
        };

        let active = match reading {
            Some(reading) => should_be_active(
                mode,
                reading.temperature,
                &self.setpoints,
                self.config.tolerance,
                previously_active,
            ),
            None => previously_active,
        };

        self.demand = Some(Demand { mode, active });
        active
    }

    fn target_mode(&self, running: OperatingMode, demand: bool) -> OperatingMode {
        match self.desired_mode {
            OperatingMode::Off => OperatingMode::Off,
            OperatingMode::Fan => OperatingMode::Fan,
            // Reversing the heat pump stops the compressor first; the new
            // direction starts on a later cycle once the idle time has passed.
            desired if running.is_active() && running.is_heating() != desired.is_heating() => {
                OperatingMode::Off
            }
            desired if demand => desired,
            _ => OperatingMode::Off,
        }
    }

    fn set_mode(&mut self, raw: &str, now_ms: u64) -> Result<CommandAck, CommandRejection> {
        let requested: RequestedMode = raw
            .parse()
            .map_err(|_| CommandRejection::UnknownMode(raw.to_string()))?;

        let mode = match requested {
            RequestedMode::Fixed(mode) => mode,
            RequestedMode::Auto => self
                .config
                .auto_mode
                .ok_or(CommandRejection::AutoUnresolved)?,
        };

        if mode == self.desired_mode {
            return Ok(CommandAck::ModeUnchanged(mode));
        }

        let from = self.desired_mode;
        self.desired_mode = mode;
        self.last_mode_change_ms = Some(now_ms);
        Ok(CommandAck::ModeChanged { from, to: mode })
    }

    fn set_setpoint(&mut self, raw: &str) -> Result<CommandAck, CommandRejection> {
        let value = parse_setpoint(raw)?;
        if !self.config.setpoint_in_range(value) {
            return Err(CommandRejection::SetpointOutOfRange {
                value,
                min: self.config.setpoint_min,
                max: self.config.setpoint_max,
            });
        }

        let kind = SetpointKind::for_mode(self.desired_mode);
        match kind {
            SetpointKind::Heat => self.setpoints.heat = value,
            SetpointKind::Cool => self.setpoints.cool = value,
        }
        Ok(CommandAck::SetpointChanged { kind, value })
    }
}
