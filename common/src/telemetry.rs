use serde::Serialize;

use crate::{
    inference::InferredMode,
    relay::RelayError,
    sensor::EnvironmentReading,
    types::{FanMode, OperatingMode, Setpoints},
};

/// State document published to the base topic after every poll and every
/// accepted command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryPayload {
    pub mode: &'static str,
    pub hvac_state: &'static str,
    pub active: bool,
    pub active_time: u64,
    pub heat_setpoint: f32,
    pub cool_setpoint: f32,
    pub set_point: Option<f32>,
    pub current_temperature: Option<f32>,
    pub humidity: Option<f32>,
    pub pressure: Option<f32>,
    pub fan_state: &'static str,
}

pub struct TelemetryInput<'a> {
    pub now_ms: u64,
    pub desired: OperatingMode,
    pub inferred: &'a Result<InferredMode, RelayError>,
    pub active_since_ms: Option<u64>,
    pub setpoints: Setpoints,
    pub reading: Option<EnvironmentReading>,
    pub fan: FanMode,
}

impl TelemetryPayload {
    pub fn render(input: TelemetryInput<'_>) -> Self {
        let (hvac_state, active) = match input.inferred {
            Ok(inferred) => (
                inferred.as_str(),
                inferred.mode().is_some_and(OperatingMode::is_active),
            ),
            Err(_) => ("unknown", false),
        };

        Self {
            mode: input.desired.as_str(),
            hvac_state,
            active,
            active_time: if active {
                active_minutes(input.active_since_ms, input.now_ms)
            } else {
                0
            },
            heat_setpoint: input.setpoints.heat,
            cool_setpoint: input.setpoints.cool,
            set_point: input.setpoints.for_mode(input.desired),
            current_temperature: input.reading.map(|reading| reading.temperature),
            humidity: input.reading.map(|reading| reading.humidity),
            pressure: input.reading.map(|reading| reading.pressure),
            fan_state: input.fan.as_str(),
        }
    }
}

/// Whole minutes since `active_since_ms`, rounded down.
pub fn active_minutes(active_since_ms: Option<u64>, now_ms: u64) -> u64 {
    active_since_ms
        .map(|since| now_ms.saturating_sub(since) / 60_000)
        .unwrap_or(0)
}
