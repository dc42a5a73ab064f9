use std::time::Duration;

use anyhow::Context;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use tracing::{debug, info, warn};

use heatpump_common::{topics::DEFAULT_BASE_TOPIC, EnvironmentReading, Topics};

const PUBLISH_INTERVAL: Duration = Duration::from_secs(30);

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mqtt_host = std::env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let mqtt_port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(1883);
    let base_topic =
        std::env::var("HEATPUMP_BASE_TOPIC").unwrap_or_else(|_| DEFAULT_BASE_TOPIC.to_string());
    let topics = Topics::new(&base_topic, "sensor");

    let mut mqtt_options = MqttOptions::new("heatpump-sensor", mqtt_host, mqtt_port);
    mqtt_options.set_keep_alive(Duration::from_secs(60));
    if let Ok(user) = std::env::var("MQTT_USER") {
        let pass = std::env::var("MQTT_PASS").unwrap_or_default();
        mqtt_options.set_credentials(user, pass);
    }

    let (mqtt, mut eventloop) = AsyncClient::new(mqtt_options, 32);

    mqtt.publish(&topics.sensor_status, QoS::AtLeastOnce, true, "online")
        .await
        .context("failed to publish sensor online status")?;

    tokio::spawn(async move {
        loop {
            if let Err(err) = eventloop.poll().await {
                warn!("sensor mqtt poll error: {err}");
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    });

    info!("sensor publishing to {}/sensor/*", topics.state);

    let mut tick: u64 = 0;
    let mut interval = tokio::time::interval(PUBLISH_INTERVAL);

    loop {
        interval.tick().await;
        tick = tick.wrapping_add(1);

        let reading = simulated_reading(tick);
        debug!(
            "reading {:.1}F {:.1}% {:.1}hPa",
            reading.temperature, reading.humidity, reading.pressure
        );

        for (topic, value) in [
            (&topics.sensor_temperature, reading.temperature),
            (&topics.sensor_humidity, reading.humidity),
            (&topics.sensor_pressure, reading.pressure),
        ] {
            mqtt.publish(topic, QoS::AtLeastOnce, false, format!("{value:.1}"))
                .await
                .with_context(|| format!("failed to publish {topic}"))?;
        }
    }
}

// Stand-in for a BME280 on the sensor board.
fn simulated_reading(tick: u64) -> EnvironmentReading {
    EnvironmentReading {
        temperature: 68.0 + (tick % 8) as f32 * 0.2,
        humidity: 42.0 + (tick % 6) as f32 * 0.5,
        pressure: 1013.0 + (tick % 4) as f32 * 0.25,
    }
}
