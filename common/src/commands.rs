use thiserror::Error;

use crate::{
    topics::Topics,
    types::{FanMode, OperatingMode},
};

/// A remote request, still in its raw textual form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SetMode(String),
    SetSetpoint(String),
    SetFan(String),
}

impl Command {
    /// Map an incoming message to a command, if `topic` is a command topic.
    pub fn from_topic(topics: &Topics, topic: &str, payload: &str) -> Option<Self> {
        let payload = payload.to_string();
        if topic == topics.mode_command {
            Some(Self::SetMode(payload))
        } else if topic == topics.setpoint_command {
            Some(Self::SetSetpoint(payload))
        } else if topic == topics.fan_command {
            Some(Self::SetFan(payload))
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetpointKind {
    Heat,
    Cool,
}

impl SetpointKind {
    /// Which setpoint a bare temperature command adjusts while in `mode`.
    pub fn for_mode(mode: OperatingMode) -> Self {
        if mode.is_heating() {
            Self::Heat
        } else {
            Self::Cool
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Heat => "heat",
            Self::Cool => "cool",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CommandAck {
    ModeChanged {
        from: OperatingMode,
        to: OperatingMode,
    },
    ModeUnchanged(OperatingMode),
    SetpointChanged {
        kind: SetpointKind,
        value: f32,
    },
    FanMode(FanMode),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommandRejection {
    #[error("{0:?} is not a valid HVAC mode")]
    UnknownMode(String),
    #[error("auto mode is not resolved to heat or cool on this thermostat")]
    AutoUnresolved,
    #[error("{0:?} is not a temperature")]
    MalformedSetpoint(String),
    #[error("setpoint {value} is outside {min} .. {max}")]
    SetpointOutOfRange { value: f32, min: f32, max: f32 },
    #[error("{0:?} is not a valid fan mode")]
    UnknownFanMode(String),
}

pub fn parse_setpoint(raw: &str) -> Result<f32, CommandRejection> {
    raw.trim()
        .parse::<f32>()
        .ok()
        .filter(|value| value.is_finite())
        .ok_or_else(|| CommandRejection::MalformedSetpoint(raw.to_string()))
}

pub fn parse_fan_mode(raw: &str) -> Result<FanMode, CommandRejection> {
    raw.parse()
        .map_err(|_| CommandRejection::UnknownFanMode(raw.to_string()))
}
