use heatpump_common::{
    EnvironmentReading, EnvironmentSensor, ReadingCache, SensorConfig, SensorError, Topics,
};

/// Sensor kinds the controller can be configured with.
#[derive(Debug)]
pub enum SensorKind {
    Simulated(SimulatedSensor),
    Mqtt(MqttSensor),
}

impl SensorKind {
    pub fn from_config(config: &SensorConfig) -> Self {
        match *config {
            SensorConfig::Simulated {
                base_temperature,
                humidity,
                pressure,
            } => Self::Simulated(SimulatedSensor {
                base_temperature,
                humidity,
                pressure,
                tick: 0,
            }),
            SensorConfig::Mqtt { stale_after_ms } => Self::Mqtt(MqttSensor {
                cache: ReadingCache::new(),
                stale_after_ms,
            }),
        }
    }

    pub fn wants_mqtt(&self) -> bool {
        matches!(self, Self::Mqtt(_))
    }

    /// Feed a message from a sensor topic. Returns `None` when `topic` is not
    /// a sensor topic, otherwise whether the value was accepted.
    pub fn accept_message(
        &mut self,
        topics: &Topics,
        topic: &str,
        payload: &str,
        now_ms: u64,
    ) -> Option<bool> {
        if !topics.sensor_topics().contains(&topic) {
            return None;
        }
        let Self::Mqtt(sensor) = self else {
            return Some(false);
        };
        let Ok(value) = payload.trim().parse::<f32>() else {
            return Some(false);
        };

        Some(if topic == topics.sensor_temperature {
            sensor.cache.update_temperature(value, now_ms)
        } else if topic == topics.sensor_humidity {
            sensor.cache.update_humidity(value)
        } else {
            sensor.cache.update_pressure(value)
        })
    }
}

impl EnvironmentSensor for SensorKind {
    fn read_state(&mut self, now_ms: u64) -> Result<EnvironmentReading, SensorError> {
        match self {
            Self::Simulated(sensor) => sensor.read_state(now_ms),
            Self::Mqtt(sensor) => sensor.read_state(now_ms),
        }
    }
}

#[derive(Debug)]
pub struct SimulatedSensor {
    base_temperature: f32,
    humidity: f32,
    pressure: f32,
    tick: u64,
}

impl EnvironmentSensor for SimulatedSensor {
    fn read_state(&mut self, _now_ms: u64) -> Result<EnvironmentReading, SensorError> {
        self.tick = self.tick.wrapping_add(1);
        // Slow triangle wave of +/- 2 degrees so both band edges get crossed.
        let phase = (self.tick % 40) as f32;
        let ramp = if phase < 20.0 { phase } else { 40.0 - phase };
        Ok(EnvironmentReading {
            temperature: self.base_temperature + ramp * 0.2 - 2.0,
            humidity: self.humidity,
            pressure: self.pressure,
        })
    }
}

#[derive(Debug)]
pub struct MqttSensor {
    cache: ReadingCache,
    stale_after_ms: u64,
}

impl EnvironmentSensor for MqttSensor {
    fn read_state(&mut self, now_ms: u64) -> Result<EnvironmentReading, SensorError> {
        self.cache.reading(now_ms, self.stale_after_ms)
    }
}
