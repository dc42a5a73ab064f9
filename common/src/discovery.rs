use serde::Serialize;

use crate::{config::ThermostatConfig, topics::Topics};

#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub identifiers: Vec<String>,
    pub name: String,
    pub model: &'static str,
    pub manufacturer: &'static str,
}

/// Home Assistant MQTT discovery document for a `climate` entity.
#[derive(Debug, Clone, Serialize)]
pub struct ClimateDiscovery {
    pub name: String,
    pub unique_id: String,
    pub device: DeviceInfo,
    pub json_attributes_topic: String,
    pub min_temp: f32,
    pub max_temp: f32,
    pub modes: [&'static str; 5],
    pub fan_modes: [&'static str; 2],
    pub action_topic: String,
    pub action_template: &'static str,
    pub current_temperature_topic: String,
    pub current_temperature_template: &'static str,
    pub mode_state_topic: String,
    pub mode_state_template: &'static str,
    pub mode_command_topic: String,
    pub temperature_state_topic: String,
    pub temperature_state_template: &'static str,
    pub temperature_command_topic: String,
    pub fan_mode_state_topic: String,
    pub fan_mode_state_template: &'static str,
    pub fan_mode_command_topic: String,
}

impl ClimateDiscovery {
    pub fn new(name: &str, topics: &Topics, config: &ThermostatConfig) -> Self {
        Self {
            name: format!("{name}_climate"),
            unique_id: format!("{name}_heatpump_climate"),
            device: DeviceInfo {
                identifiers: vec![format!("{name}_heatpump")],
                name: name.to_string(),
                model: "HestiaPi",
                manufacturer: "heatpump-controller",
            },
            json_attributes_topic: topics.state.clone(),
            min_temp: config.setpoint_min,
            max_temp: config.setpoint_max,
            modes: ["off", "auto", "heat", "cool", "aux"],
            fan_modes: ["auto", "on"],
            action_topic: topics.state.clone(),
            action_template: "{{ value_json.hvac_state }}",
            current_temperature_topic: topics.state.clone(),
            current_temperature_template: "{{ value_json.current_temperature | round(1) }}",
            mode_state_topic: topics.state.clone(),
            mode_state_template: "{{ value_json.mode }}",
            mode_command_topic: topics.mode_command.clone(),
            temperature_state_topic: topics.state.clone(),
            temperature_state_template: "{{ value_json.set_point }}",
            temperature_command_topic: topics.setpoint_command.clone(),
            fan_mode_state_topic: topics.state.clone(),
            fan_mode_state_template: "{{ value_json.fan_state }}",
            fan_mode_command_topic: topics.fan_command.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn points_command_topics_at_thermostat() {
        let topics = Topics::new("rpi2mqtt/hvac", "hestiapi");
        let doc = serde_json::to_value(ClimateDiscovery::new(
            "hestiapi",
            &topics,
            &ThermostatConfig::default(),
        ))
        .unwrap();

        assert_eq!(doc["mode_command_topic"], "rpi2mqtt/hvac/mode/set");
        assert_eq!(doc["temperature_command_topic"], "rpi2mqtt/hvac/temperature/set");
        assert_eq!(doc["fan_mode_command_topic"], "rpi2mqtt/hvac/fan/set");
        assert_eq!(doc["modes"][1], "auto");
        assert_eq!(doc["min_temp"], 50.0);
    }
}
