use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperatingMode {
    Off,
    Fan,
    Heat,
    Cool,
    Aux,
}

impl OperatingMode {
    pub const ALL: [OperatingMode; 5] = [
        Self::Off,
        Self::Fan,
        Self::Heat,
        Self::Cool,
        Self::Aux,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Fan => "fan",
            Self::Heat => "heat",
            Self::Cool => "cool",
            Self::Aux => "aux",
        }
    }

    /// Modes that run the compressor.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Heat | Self::Cool | Self::Aux)
    }

    /// Heat and aux both move heat into the house; cool moves it out.
    pub fn is_heating(self) -> bool {
        matches!(self, Self::Heat | Self::Aux)
    }

    pub fn is_cooling(self) -> bool {
        self == Self::Cool
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mode names accepted on the command surface. `Auto` has no relay
/// signature of its own and must be resolved before reaching the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestedMode {
    Auto,
    Fixed(OperatingMode),
}

impl FromStr for RequestedMode {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "off" => Ok(Self::Fixed(OperatingMode::Off)),
            "fan" => Ok(Self::Fixed(OperatingMode::Fan)),
            "heat" => Ok(Self::Fixed(OperatingMode::Heat)),
            "cool" => Ok(Self::Fixed(OperatingMode::Cool)),
            "aux" => Ok(Self::Fixed(OperatingMode::Aux)),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayId {
    Fan,
    Compressor,
    ReversingValve,
    AuxHeat,
}

impl RelayId {
    pub const ALL: [RelayId; 4] = [
        Self::Fan,
        Self::Compressor,
        Self::ReversingValve,
        Self::AuxHeat,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fan => "fan",
            Self::Compressor => "compressor",
            Self::ReversingValve => "reversing_valve",
            Self::AuxHeat => "aux_heat",
        }
    }

    pub(crate) fn bit(self) -> u8 {
        match self {
            Self::Fan => 0b0001,
            Self::Compressor => 0b0010,
            Self::ReversingValve => 0b0100,
            Self::AuxHeat => 0b1000,
        }
    }
}

impl fmt::Display for RelayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FanMode {
    Auto,
    On,
}

impl FanMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::On => "on",
        }
    }
}

impl FromStr for FanMode {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "on" => Ok(Self::On),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Setpoints {
    pub heat: f32,
    pub cool: f32,
}

impl Setpoints {
    /// The setpoint the hysteresis band is centred on for `mode`.
    pub fn for_mode(&self, mode: OperatingMode) -> Option<f32> {
        match mode {
            OperatingMode::Heat | OperatingMode::Aux => Some(self.heat),
            OperatingMode::Cool => Some(self.cool),
            OperatingMode::Off | OperatingMode::Fan => None,
        }
    }
}
