pub const DEFAULT_BASE_TOPIC: &str = "rpi2mqtt/hvac";
pub const DISCOVERY_PREFIX: &str = "homeassistant";

/// MQTT topics for one thermostat, all derived from its base topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub state: String,
    pub mode_command: String,
    pub setpoint_command: String,
    pub fan_command: String,
    pub sensor_temperature: String,
    pub sensor_humidity: String,
    pub sensor_pressure: String,
    pub sensor_status: String,
    pub discovery: String,
}

impl Topics {
    pub fn new(base: &str, name: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            state: base.to_string(),
            mode_command: format!("{base}/mode/set"),
            setpoint_command: format!("{base}/temperature/set"),
            fan_command: format!("{base}/fan/set"),
            sensor_temperature: format!("{base}/sensor/temperature"),
            sensor_humidity: format!("{base}/sensor/humidity"),
            sensor_pressure: format!("{base}/sensor/pressure"),
            sensor_status: format!("{base}/sensor/status"),
            discovery: format!("{DISCOVERY_PREFIX}/climate/{name}/config"),
        }
    }

    pub fn command_topics(&self) -> [&str; 3] {
        [&self.mode_command, &self.setpoint_command, &self.fan_command]
    }

    pub fn sensor_topics(&self) -> [&str; 3] {
        [
            &self.sensor_temperature,
            &self.sensor_humidity,
            &self.sensor_pressure,
        ]
    }
}
