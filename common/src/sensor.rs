use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentReading {
    pub temperature: f32,
    pub humidity: f32,
    pub pressure: f32,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SensorError {
    #[error("no reading received yet")]
    NoData,
    #[error("last reading is {age_ms} ms old")]
    Stale { age_ms: u64 },
    #[error("sensor unavailable: {0}")]
    Unavailable(String),
}

/// Capability every sensor kind provides to the engine.
pub trait EnvironmentSensor {
    fn read_state(&mut self, now_ms: u64) -> Result<EnvironmentReading, SensorError>;
}

/// Latest values pushed by a remote sensor node, one field at a time.
#[derive(Debug, Clone, Default)]
pub struct ReadingCache {
    temperature: Option<f32>,
    humidity: Option<f32>,
    pressure: Option<f32>,
    updated_ms: Option<u64>,
}

impl ReadingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Temperature drives the control decision, so only it refreshes the
    /// staleness clock.
    pub fn update_temperature(&mut self, temperature: f32, now_ms: u64) -> bool {
        if !temperature.is_finite() || !(-40.0..=150.0).contains(&temperature) {
            return false;
        }
        self.temperature = Some(temperature);
        self.updated_ms = Some(now_ms);
        true
    }

    pub fn update_humidity(&mut self, humidity: f32) -> bool {
        if !humidity.is_finite() || !(0.0..=100.0).contains(&humidity) {
            return false;
        }
        self.humidity = Some(humidity);
        true
    }

    pub fn update_pressure(&mut self, pressure: f32) -> bool {
        if !pressure.is_finite() || pressure < 0.0 {
            return false;
        }
        self.pressure = Some(pressure);
        true
    }

    pub fn reading(
        &self,
        now_ms: u64,
        stale_after_ms: u64,
    ) -> Result<EnvironmentReading, SensorError> {
        let (Some(temperature), Some(updated_ms)) = (self.temperature, self.updated_ms) else {
            return Err(SensorError::NoData);
        };

        let age_ms = now_ms.saturating_sub(updated_ms);
        if age_ms >= stale_after_ms {
            return Err(SensorError::Stale { age_ms });
        }

        Ok(EnvironmentReading {
            temperature,
            humidity: self.humidity.unwrap_or(0.0),
            pressure: self.pressure.unwrap_or(0.0),
        })
    }
}
