use std::{
    collections::HashMap,
    io::ErrorKind,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::{Arc, OnceLock},
    time::{Duration, Instant},
};

use anyhow::Context;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, Outgoing, QoS};
use serde::Serialize;
use tokio::{net::TcpListener, sync::Mutex, task::JoinHandle};
use tracing::{debug, error, info, warn};

use heatpump_common::{
    discovery::ClimateDiscovery, Command, CommandAck, CommandRejection, CycleOutcome, CycleReport,
    EnvironmentSensor, ModeTable, RelayError, RuntimeConfig, TelemetryPayload, ThermostatEngine,
    Topics,
};

use crate::{mqtt::Publisher, relays::HostRelays, sensors::SensorKind};

type SharedEngine = Arc<Mutex<ThermostatEngine<HostRelays>>>;

#[derive(Clone)]
struct AppState {
    engine: SharedEngine,
    sensor: Arc<Mutex<SensorKind>>,
    topics: Arc<Topics>,
    discovery: Arc<ClimateDiscovery>,
    publisher: Publisher,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

const MAX_MQTT_PAYLOAD_BYTES: usize = 512;
const DEFAULT_CONFIG_PATH: &str = "./heatpump.json";

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config_path = std::env::var("HEATPUMP_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
    let mut runtime = load_config(&config_path).await?;
    apply_env_overrides(&mut runtime, |key| std::env::var(key).ok());
    runtime
        .validate()
        .with_context(|| format!("invalid configuration in {}", config_path.display()))?;

    let relays = HostRelays::from_config(&runtime.relays).context("relay backend unavailable")?;
    let engine = ThermostatEngine::new(
        runtime.thermostat.clone(),
        runtime.settings.clone(),
        ModeTable::heat_pump(),
        relays,
    );
    let sensor = SensorKind::from_config(&runtime.sensor);
    let topics = Topics::new(&runtime.base_topic, &runtime.name);
    let discovery = ClimateDiscovery::new(&runtime.name, &topics, &runtime.thermostat);

    let network = &runtime.network;
    let mut mqtt_options =
        MqttOptions::new(&network.client_id, &network.mqtt_host, network.mqtt_port);
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    if !network.mqtt_user.is_empty() {
        mqtt_options.set_credentials(&network.mqtt_user, &network.mqtt_pass);
    }
    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 64);

    let app_state = AppState {
        engine: Arc::new(Mutex::new(engine)),
        sensor: Arc::new(Mutex::new(sensor)),
        topics: Arc::new(topics),
        discovery: Arc::new(discovery),
        publisher: Publisher::new(mqtt, network.retry_policy()),
    };

    info!(
        "thermostat {} on {} (mqtt {}:{}, poll every {} ms)",
        runtime.name,
        app_state.topics.state,
        network.mqtt_host,
        network.mqtt_port,
        runtime.poll_interval_ms
    );

    let mqtt_task = spawn_mqtt_loop(app_state.clone(), eventloop);
    let poll_task = spawn_poll_loop(app_state.clone(), runtime.poll_interval_ms);

    let app = Router::new()
        .route("/api/status", get(handle_get_status))
        .route("/api/mode", post(handle_set_mode))
        .route("/api/setpoint", post(handle_set_setpoint))
        .route("/api/fan", post(handle_set_fan))
        .with_state(app_state.clone());

    let port = std::env::var("CONTROLLER_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!("controller listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    poll_task.abort();
    release_relays(&app_state).await;

    if let Err(err) = app_state.publisher.client().try_disconnect() {
        warn!("mqtt disconnect failed: {err}");
    }
    if tokio::time::timeout(Duration::from_secs(2), mqtt_task)
        .await
        .is_err()
    {
        warn!("mqtt loop did not finish flushing before exit");
    }
    Ok(())
}

async fn load_config(path: &Path) -> anyhow::Result<RuntimeConfig> {
    match tokio::fs::read(path).await {
        Ok(raw) => serde_json::from_slice::<RuntimeConfig>(&raw)
            .with_context(|| format!("failed to parse {}", path.display())),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            warn!("{} not found, using default configuration", path.display());
            Ok(RuntimeConfig::default())
        }
        Err(err) => Err(err).with_context(|| format!("failed to read {}", path.display())),
    }
}

fn apply_env_overrides(runtime: &mut RuntimeConfig, lookup: impl Fn(&str) -> Option<String>) {
    let network = &mut runtime.network;
    if let Some(host) = lookup("MQTT_HOST") {
        network.mqtt_host = host;
    }
    if let Some(port) = lookup("MQTT_PORT").and_then(|value| value.parse::<u16>().ok()) {
        network.mqtt_port = port;
    }
    if let Some(user) = lookup("MQTT_USER") {
        network.mqtt_user = user;
    }
    if let Some(pass) = lookup("MQTT_PASS") {
        network.mqtt_pass = pass;
    }
}

fn spawn_mqtt_loop(app_state: AppState, mut eventloop: rumqttc::EventLoop) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    if let Err(err) =
                        handle_mqtt_message(&app_state, message.topic, message.payload.to_vec())
                            .await
                    {
                        warn!("mqtt message handling error: {err:#}");
                    }
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                    subscribe_topics(&app_state).await;
                    tokio::spawn(publish_discovery(app_state.clone()));
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    debug!("mqtt disconnect sent");
                    break;
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    })
}

// Runs inside the event loop, so requests are queued without waiting on it.
async fn subscribe_topics(app_state: &AppState) {
    let topics = &app_state.topics;
    let mut wanted: Vec<&str> = topics.command_topics().to_vec();
    if app_state.sensor.lock().await.wants_mqtt() {
        wanted.extend(topics.sensor_topics());
        wanted.push(&topics.sensor_status);
    }

    for topic in wanted {
        if let Err(err) = app_state
            .publisher
            .client()
            .try_subscribe(topic, QoS::AtLeastOnce)
        {
            error!("failed to subscribe to {topic}: {err}");
        }
    }
}

async fn publish_discovery(app_state: AppState) {
    let topic = &app_state.topics.discovery;
    match app_state
        .publisher
        .publish_json(topic, app_state.discovery.as_ref())
        .await
    {
        Ok(()) => debug!("published discovery document to {topic}"),
        Err(err) => warn!("discovery publish failed: {err:#}"),
    }
}

fn spawn_poll_loop(app_state: AppState, poll_interval_ms: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(poll_interval_ms));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            let now_ms = monotonic_ms();

            let reading = app_state.sensor.lock().await.read_state(now_ms);
            let (report, telemetry) = {
                let mut engine = app_state.engine.lock().await;
                let report = engine.poll(reading, now_ms);
                (report, engine.telemetry(now_ms))
            };

            log_cycle(&report);
            spawn_telemetry_publish(&app_state, telemetry);
        }
    })
}

fn log_cycle(report: &CycleReport) {
    if let Some(err) = &report.sensor_error {
        warn!("sensor read failed, keeping previous demand: {err}");
    }

    match &report.outcome {
        CycleOutcome::RelayReadFailed(err) => error!("relay read failed, cycle skipped: {err}"),
        CycleOutcome::Indeterminate(relays) => {
            warn!("energized relays {relays} match no mode, leaving them alone")
        }
        CycleOutcome::Steady(mode) => debug!("steady in {mode}"),
        CycleOutcome::Denied {
            running,
            target,
            reason,
        } => info!("{running} -> {target} held back: {reason}"),
        CycleOutcome::Switched { from, to } => info!("switched {from} -> {to}"),
        CycleOutcome::WriteFailed {
            from,
            to,
            error: error @ RelayError::RollbackFailed { .. },
        } => error!("switching {from} -> {to} failed and relays could not be restored: {error}"),
        CycleOutcome::WriteFailed { from, to, error } => {
            error!("switching {from} -> {to} failed, will retry next cycle: {error}")
        }
    }
}

// Publishing never holds up the caller; a broker outage must not stall
// control or the API.
fn spawn_telemetry_publish(app_state: &AppState, telemetry: TelemetryPayload) {
    let app_state = app_state.clone();
    tokio::spawn(async move { publish_telemetry(&app_state, &telemetry).await });
}

async fn publish_telemetry(app_state: &AppState, telemetry: &TelemetryPayload) {
    if let Err(err) = app_state
        .publisher
        .publish_json(&app_state.topics.state, telemetry)
        .await
    {
        warn!("telemetry publish failed: {err:#}");
    }
}

async fn handle_mqtt_message(
    app_state: &AppState,
    topic: String,
    payload: Vec<u8>,
) -> anyhow::Result<()> {
    if payload.len() > MAX_MQTT_PAYLOAD_BYTES {
        warn!(
            "dropping oversized MQTT payload on topic {} ({} bytes)",
            topic,
            payload.len()
        );
        return Ok(());
    }

    let message = String::from_utf8(payload).context("non utf8 mqtt payload")?;
    let now_ms = monotonic_ms();
    let topics = &app_state.topics;

    let accepted =
        app_state
            .sensor
            .lock()
            .await
            .accept_message(topics, &topic, &message, now_ms);
    match accepted {
        Some(true) => return Ok(()),
        Some(false) => {
            warn!("ignoring sensor value {message:?} on {topic}");
            return Ok(());
        }
        None => {}
    }

    if topic == topics.sensor_status {
        info!("sensor node is {}", message.trim());
        return Ok(());
    }

    if let Some(command) = Command::from_topic(topics, &topic, &message) {
        if let Ok(telemetry) = apply_command(app_state, command).await {
            spawn_telemetry_publish(app_state, telemetry);
        }
    }
    Ok(())
}

async fn apply_command(
    app_state: &AppState,
    command: Command,
) -> Result<TelemetryPayload, CommandRejection> {
    let now_ms = monotonic_ms();
    let result = {
        let mut engine = app_state.engine.lock().await;
        engine
            .apply_command(&command, now_ms)
            .map(|ack| (ack, engine.telemetry(now_ms)))
    };

    match result {
        Ok((ack, telemetry)) => {
            log_ack(&ack);
            Ok(telemetry)
        }
        Err(rejection) => {
            warn!("rejected {command:?}: {rejection}");
            Err(rejection)
        }
    }
}

fn log_ack(ack: &CommandAck) {
    match ack {
        CommandAck::ModeChanged { from, to } => info!("mode changed {from} -> {to}"),
        CommandAck::ModeUnchanged(mode) => debug!("mode already {mode}"),
        CommandAck::SetpointChanged { kind, value } => {
            info!("{} setpoint set to {value}", kind.as_str())
        }
        CommandAck::FanMode(fan) => info!("fan mode set to {}", fan.as_str()),
    }
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    let now_ms = monotonic_ms();
    let telemetry = state.engine.lock().await.telemetry(now_ms);
    Json(telemetry)
}

async fn handle_set_mode(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    handle_command(state, params, Command::SetMode).await
}

async fn handle_set_setpoint(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    handle_command(state, params, Command::SetSetpoint).await
}

async fn handle_set_fan(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    handle_command(state, params, Command::SetFan).await
}

async fn handle_command(
    state: AppState,
    params: HashMap<String, String>,
    command: fn(String) -> Command,
) -> axum::response::Response {
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };

    match apply_command(&state, command(value.clone())).await {
        Ok(telemetry) => {
            spawn_telemetry_publish(&state, telemetry.clone());
            Json(telemetry).into_response()
        }
        Err(rejection) => error_response(StatusCode::BAD_REQUEST, &rejection.to_string()),
    }
}

async fn release_relays(app_state: &AppState) {
    let now_ms = monotonic_ms();
    let telemetry = {
        let mut engine = app_state.engine.lock().await;
        match engine.shutdown(now_ms) {
            Ok(()) => info!("all relays released"),
            Err(err) => error!("failed to release relays on shutdown: {err}"),
        }
        engine.telemetry(now_ms)
    };
    publish_telemetry(app_state, &telemetry).await;
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("failed to listen for ctrl-c: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use heatpump_common::{
        config::{RetryPolicy, ThermostatSettings},
        relay::read_energized, MemoryRelayBank, OperatingMode, RelayBank, RelayId, RelaySet,
        SensorConfig, ThermostatConfig,
    };

    use super::*;

    fn offline_state() -> (AppState, rumqttc::EventLoop) {
        let thermostat = ThermostatConfig {
            min_run_time_ms: 0,
            min_idle_time_ms: 0,
            min_mode_cooldown_ms: 0,
            ..ThermostatConfig::default()
        };
        let settings = ThermostatSettings {
            mode: OperatingMode::Off,
            ..ThermostatSettings::default()
        };
        let table = ModeTable::heat_pump();
        let relays = HostRelays::Simulated(MemoryRelayBank::new());
        let topics = Topics::new("hvac", "test");
        let discovery = ClimateDiscovery::new("test", &topics, &thermostat);

        // Tiny queue and nobody polling the event loop: the broker is down.
        let (client, eventloop) = AsyncClient::new(MqttOptions::new("test", "127.0.0.1", 1883), 1);
        let state = AppState {
            engine: Arc::new(Mutex::new(ThermostatEngine::new(
                thermostat, settings, table, relays,
            ))),
            sensor: Arc::new(Mutex::new(SensorKind::from_config(&SensorConfig::Simulated {
                base_temperature: 70.0,
                humidity: 40.0,
                pressure: 1013.0,
            }))),
            topics: Arc::new(topics),
            discovery: Arc::new(discovery),
            publisher: Publisher::new(
                client,
                RetryPolicy {
                    max_attempts: 2,
                    initial_backoff: Duration::from_millis(1),
                },
            ),
        };
        (state, eventloop)
    }

    #[tokio::test]
    async fn poll_loop_keeps_switching_while_broker_is_down() {
        let (state, _eventloop) = offline_state();
        let _ = state.publisher.publish("hvac", true, b"x".to_vec()).await;

        let poll_task = spawn_poll_loop(state.clone(), 5);
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Equipment comes on behind the engine's back after telemetry has
        // started failing; the next cycles must still release it.
        state
            .engine
            .lock()
            .await
            .relays_mut()
            .write(RelayId::Fan, true)
            .unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        poll_task.abort();

        let engine = state.engine.lock().await;
        assert_eq!(read_energized(engine.relays()), Ok(RelaySet::EMPTY));
    }

    #[tokio::test]
    async fn http_command_answers_while_broker_is_down() {
        let (state, _eventloop) = offline_state();
        let _ = state.publisher.publish("hvac", true, b"x".to_vec()).await;

        let params: HashMap<String, String> =
            [("value".to_string(), "cool".to_string())].into_iter().collect();
        let response = tokio::time::timeout(
            Duration::from_secs(5),
            handle_command(state.clone(), params, Command::SetMode),
        )
        .await
        .expect("command must not wait on the broker");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.engine.lock().await.desired_mode(), OperatingMode::Cool);
    }

    #[test]
    fn env_overrides_replace_network_settings() {
        let mut runtime = RuntimeConfig::default();
        let env: HashMap<&str, &str> = [
            ("MQTT_HOST", "broker.lan"),
            ("MQTT_PORT", "8883"),
            ("MQTT_USER", "hvac"),
        ]
        .into_iter()
        .collect();

        apply_env_overrides(&mut runtime, |key| env.get(key).map(|value| value.to_string()));

        assert_eq!(runtime.network.mqtt_host, "broker.lan");
        assert_eq!(runtime.network.mqtt_port, 8883);
        assert_eq!(runtime.network.mqtt_user, "hvac");
        assert_eq!(runtime.network.mqtt_pass, "");
    }

    #[test]
    fn unparsable_port_override_is_ignored() {
        let mut runtime = RuntimeConfig::default();
        apply_env_overrides(&mut runtime, |key| {
            (key == "MQTT_PORT").then(|| "not-a-port".to_string())
        });
        assert_eq!(runtime.network.mqtt_port, 1883);
    }

    #[tokio::test]
    async fn missing_config_file_falls_back_to_defaults() {
        let path = std::env::temp_dir().join("heatpump-controller-missing-config.json");
        let runtime = load_config(&path).await.unwrap();
        assert_eq!(runtime.poll_interval_ms, 60_000);
        assert_eq!(runtime.base_topic, "rpi2mqtt/hvac");
    }

    #[tokio::test]
    async fn partial_config_file_keeps_other_defaults() {
        let path = std::env::temp_dir().join(format!(
            "heatpump-controller-partial-{}.json",
            std::process::id()
        ));
        tokio::fs::write(
            &path,
            br#"{ "name": "upstairs", "thermostat": { "tolerance": 0.5 } }"#,
        )
        .await
        .unwrap();

        let runtime = load_config(&path).await.unwrap();
        let _ = tokio::fs::remove_file(&path).await;

        assert_eq!(runtime.name, "upstairs");
        assert_eq!(runtime.thermostat.tolerance, 0.5);
        assert_eq!(runtime.thermostat.min_idle_time_ms, 900_000);
        assert_eq!(runtime.settings.heat_setpoint, 68.0);
    }

    #[tokio::test]
    async fn malformed_config_file_is_an_error() {
        let path = std::env::temp_dir().join(format!(
            "heatpump-controller-malformed-{}.json",
            std::process::id()
        ));
        tokio::fs::write(&path, b"{ not json").await.unwrap();

        let result = load_config(&path).await;
        let _ = tokio::fs::remove_file(&path).await;

        assert!(result.is_err());
    }
}
