pub mod commands;
pub mod config;
pub mod discovery;
pub mod guard;
pub mod hysteresis;
pub mod inference;
pub mod modes;
pub mod relay;
pub mod sensor;
pub mod telemetry;
pub mod thermostat;
pub mod topics;
pub mod types;

pub use commands::{Command, CommandAck, CommandRejection};
pub use config::{RelayBackend, RelayConfig, RuntimeConfig, SensorConfig, ThermostatConfig};
pub use guard::{DenyReason, ProtectionGuard, Verdict};
pub use inference::InferredMode;
pub use modes::{ModeTable, RelaySet};
pub use relay::{MemoryRelayBank, RelayBank, RelayError};
pub use sensor::{EnvironmentReading, EnvironmentSensor, ReadingCache, SensorError};
pub use telemetry::TelemetryPayload;
pub use thermostat::{CycleOutcome, CycleReport, ThermostatEngine};
pub use topics::Topics;
pub use types::{FanMode, OperatingMode, RelayId, Setpoints};
