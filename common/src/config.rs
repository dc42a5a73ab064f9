use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{OperatingMode, RelayId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("tolerance must be a positive number, got {0}")]
    InvalidTolerance(String),
    #[error("setpoint limits are inverted or not finite ({min} .. {max})")]
    InvalidSetpointLimits { min: String, max: String },
    #[error("{which} setpoint {value} is outside {min} .. {max}")]
    SetpointOutOfRange {
        which: &'static str,
        value: String,
        min: String,
        max: String,
    },
    #[error("auto mode cannot resolve to {0}")]
    InvalidAutoMode(OperatingMode),
    #[error("relays {first} and {second} share gpio pin {pin}")]
    DuplicatePin {
        first: RelayId,
        second: RelayId,
        pin: u8,
    },
    #[error("poll interval must be greater than zero")]
    ZeroPollInterval,
    #[error("base topic cannot be empty")]
    EmptyBaseTopic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThermostatConfig {
    pub min_run_time_ms: u64,
    pub min_idle_time_ms: u64,
    pub min_mode_cooldown_ms: u64,
    pub tolerance: f32,
    pub setpoint_min: f32,
    pub setpoint_max: f32,
    /// Mode an `auto` command resolves to. `None` rejects `auto`.
    pub auto_mode: Option<OperatingMode>,
}

impl Default for ThermostatConfig {
    fn default() -> Self {
        Self {
            min_run_time_ms: 900_000,
            min_idle_time_ms: 900_000,
            min_mode_cooldown_ms: 900_000,
            tolerance: 1.0,
            setpoint_min: 50.0,
            setpoint_max: 90.0,
            auto_mode: None,
        }
    }
}

impl ThermostatConfig {
    pub fn setpoint_in_range(&self, value: f32) -> bool {
        value.is_finite() && (self.setpoint_min..=self.setpoint_max).contains(&value)
    }
}

/// Startup values for the state that commands later mutate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThermostatSettings {
    pub mode: OperatingMode,
    pub heat_setpoint: f32,
    pub cool_setpoint: f32,
}

impl Default for ThermostatSettings {
    fn default() -> Self {
        Self {
            mode: OperatingMode::Heat,
            heat_setpoint: 68.0,
            cool_setpoint: 76.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
    pub client_id: String,
    pub publish_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            mqtt_host: "127.0.0.1".to_string(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
            client_id: "heatpump-controller".to_string(),
            publish_retries: 3,
            retry_backoff_ms: 500,
        }
    }
}

impl NetworkConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.publish_retries.max(1),
            initial_backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }
}

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    const MAX_BACKOFF: Duration = Duration::from_secs(30);

    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32
            .checked_shl(retry.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.initial_backoff
            .saturating_mul(factor)
            .min(Self::MAX_BACKOFF)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayBackend {
    Simulated,
    Gpio,
}

/// BCM pin numbers per relay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RelayConfig {
    pub backend: RelayBackend,
    pub fan_pin: u8,
    pub compressor_pin: u8,
    pub reversing_valve_pin: u8,
    pub aux_heat_pin: u8,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            backend: RelayBackend::Simulated,
            fan_pin: 18,
            compressor_pin: 23,
            reversing_valve_pin: 12,
            aux_heat_pin: 16,
        }
    }
}

impl RelayConfig {
    pub fn pin(&self, relay: RelayId) -> u8 {
        match relay {
            RelayId::Fan => self.fan_pin,
            RelayId::Compressor => self.compressor_pin,
            RelayId::ReversingValve => self.reversing_valve_pin,
            RelayId::AuxHeat => self.aux_heat_pin,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SensorConfig {
    /// Readings generated locally; useful without hardware.
    Simulated {
        base_temperature: f32,
        humidity: f32,
        pressure: f32,
    },
    /// Readings received from a sensor node over MQTT.
    Mqtt { stale_after_ms: u64 },
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self::Mqtt {
            stale_after_ms: 300_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub name: String,
    pub base_topic: String,
    pub poll_interval_ms: u64,
    pub thermostat: ThermostatConfig,
    pub settings: ThermostatSettings,
    pub network: NetworkConfig,
    pub relays: RelayConfig,
    pub sensor: SensorConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            name: "hestiapi".to_string(),
            base_topic: crate::topics::DEFAULT_BASE_TOPIC.to_string(),
            poll_interval_ms: 60_000,
            thermostat: ThermostatConfig::default(),
            settings: ThermostatSettings::default(),
            network: NetworkConfig::default(),
            relays: RelayConfig::default(),
            sensor: SensorConfig::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let thermostat = &self.thermostat;

        if !thermostat.tolerance.is_finite() || thermostat.tolerance <= 0.0 {
            return Err(ConfigError::InvalidTolerance(
                thermostat.tolerance.to_string(),
            ));
        }

        if !thermostat.setpoint_min.is_finite()
            || !thermostat.setpoint_max.is_finite()
            || thermostat.setpoint_min > thermostat.setpoint_max
        {
            return Err(ConfigError::InvalidSetpointLimits {
                min: thermostat.setpoint_min.to_string(),
                max: thermostat.setpoint_max.to_string(),
            });
        }

        for (which, value) in [
            ("heat", self.settings.heat_setpoint),
            ("cool", self.settings.cool_setpoint),
        ] {
            if !thermostat.setpoint_in_range(value) {
                return Err(ConfigError::SetpointOutOfRange {
                    which,
                    value: value.to_string(),
                    min: thermostat.setpoint_min.to_string(),
                    max: thermostat.setpoint_max.to_string(),
                });
            }
        }

        if let Some(mode) = thermostat.auto_mode {
            if !mode.is_active() {
                return Err(ConfigError::InvalidAutoMode(mode));
            }
        }

        for (index, first) in RelayId::ALL.iter().enumerate() {
            for second in &RelayId::ALL[index + 1..] {
                let pin = self.relays.pin(*first);
                if pin == self.relays.pin(*second) {
                    return Err(ConfigError::DuplicatePin {
                        first: *first,
                        second: *second,
                        pin,
                    });
                }
            }
        }

        if self.poll_interval_ms == 0 {
            return Err(ConfigError::ZeroPollInterval);
        }

        if self.base_topic.trim().is_empty() {
            return Err(ConfigError::EmptyBaseTopic);
        }

        Ok(())
    }
}
