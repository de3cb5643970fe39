use std::{
    io::ErrorKind,
    net::SocketAddr,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, OnceLock,
    },
    time::{Duration, Instant},
};

use anyhow::Context;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, put},
    Json, Router,
};
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use tokio::{
    net::TcpListener,
    sync::{watch, Mutex},
};
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, warn};

use doorbell_common::{
    status::NOT_FOUND_BODY, BrokerSession, ChimeAction, ChimeEngine, ConnectivityState,
    ControlEvent, DeviceConfig, DisplayPresenter, EventQueue, Frame, LinkSupervisor,
    RenderRequest, StatusFrame, StatusReport,
};

use crate::render::MonoFramebuffer;

const LOOP_PACE_MS: u64 = 10;
const SIMULATED_HEAP_FREE: u32 = 204_800;

#[derive(Clone)]
struct AppState {
    config: DeviceConfig,
    events: Arc<Mutex<EventQueue>>,
}

#[derive(Clone)]
struct AppStore {
    config_path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = AppStore::new();
    let mut config = store.load_config().await.unwrap_or_else(|err| {
        warn!("failed to load config from store: {err:#}");
        DeviceConfig::default()
    });
    config.sanitize();

    info!(
        "broker config: host=`{}` port={} node=`{}` prefix=`{}` topic=`{}`",
        config.broker_host,
        config.broker_port,
        config.node_name,
        config.topic_prefix,
        config.ring_topic(),
    );

    let mqtt_host = std::env::var("MQTT_HOST").unwrap_or_else(|_| config.broker_host.clone());
    let mqtt_port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(config.broker_port);

    let mqtt_options = MqttOptions::new(config.node_name.clone(), mqtt_host, mqtt_port);
    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 32);
    let mqtt_connected = Arc::new(AtomicBool::new(false));
    spawn_mqtt_loop(eventloop, mqtt_connected.clone());

    let events = Arc::new(Mutex::new(EventQueue::new()));
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    spawn_control_loop(
        config.clone(),
        store,
        events.clone(),
        mqtt,
        mqtt_connected,
        shutdown_tx,
    );

    let app_state = AppState {
        config: config.clone(),
        events,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/status", get(handle_get_status))
        .route("/ring", put(handle_put_ring))
        .route("/reboot", put(handle_put_reboot))
        .route("/reset", put(handle_put_reset))
        .fallback(handle_not_found)
        .layer(cors)
        .with_state(app_state);

    let port = std::env::var("DOORBELL_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr: SocketAddr = format!("0.0.0.0:{port}").parse().unwrap();
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind doorbell server at {addr}"))?;

    info!("doorbell listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        })
        .await?;

    info!("restart requested; exiting so the supervisor can relaunch");
    Ok(())
}

fn spawn_mqtt_loop(mut eventloop: rumqttc::EventLoop, connected: Arc<AtomicBool>) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    connected.store(true, Ordering::Relaxed);
                    info!("mqtt connected");
                }
                Ok(_) => {}
                Err(err) => {
                    connected.store(false, Ordering::Relaxed);
                    warn!("mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}

fn spawn_control_loop(
    config: DeviceConfig,
    store: AppStore,
    events: Arc<Mutex<EventQueue>>,
    mqtt: AsyncClient,
    mqtt_connected: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
) {
    tokio::spawn(async move {
        let mut chime = ChimeEngine::new();
        let mut presenter = DisplayPresenter::new();
        let mut session = BrokerSession::new();
        // the simulator has no radio; the link is always associated
        let mut link = LinkSupervisor::new(ConnectivityState::Connected);
        let mut panel = MonoFramebuffer::panel_sized();
        let mut relay_on = false;

        let mut interval = tokio::time::interval(Duration::from_millis(LOOP_PACE_MS));

        loop {
            interval.tick().await;
            let now_ms = monotonic_ms();

            if mqtt_connected.load(Ordering::Relaxed) {
                session.note_connected();
            } else {
                session.note_disconnected();
            }

            if let Some(request) = presenter.poll(now_ms) {
                let frame = build_frame(request, &config, session.is_connected());
                panel.render(&frame);
                debug!("display render: {frame:?}");
            }

            link.poll(now_ms, true);

            let drained = { events.lock().await.drain() };
            for event in drained {
                match event {
                    ControlEvent::RemoteRing => {
                        presenter.note_chime(now_ms);
                        let actions = chime.trigger(now_ms);
                        apply_chime_actions(actions, &mut relay_on, &session, &mqtt, &config);
                    }
                    ControlEvent::StatusViewed => presenter.note_status_request(now_ms),
                    ControlEvent::Reboot => {
                        info!("reboot requested");
                        let _ = shutdown.send(true);
                        return;
                    }
                    ControlEvent::FactoryReset => {
                        info!("factory reset requested; clearing stored config");
                        if let Err(err) = store.clear().await {
                            warn!("failed to clear stored config: {err:#}");
                        }
                        let _ = shutdown.send(true);
                        return;
                    }
                }
            }

            let actions = chime.tick(now_ms);
            apply_chime_actions(actions, &mut relay_on, &session, &mqtt, &config);
        }
    });
}

fn apply_chime_actions(
    actions: Vec<ChimeAction>,
    relay_on: &mut bool,
    session: &BrokerSession,
    mqtt: &AsyncClient,
    config: &DeviceConfig,
) {
    for action in actions {
        match action {
            ChimeAction::RelayOn => {
                *relay_on = true;
                info!("relay energized");
            }
            ChimeAction::RelayOff => {
                *relay_on = false;
                info!("relay released");
            }
            ChimeAction::PublishRing => {
                if session.is_connected() {
                    let topic = config.ring_topic();
                    if let Err(err) = mqtt.try_publish(&topic, QoS::AtMostOnce, false, "pressed") {
                        warn!("ring publish failed: {err}");
                    } else {
                        info!("ring published to `{topic}`");
                    }
                } else {
                    info!("broker offline; ring event dropped");
                }
            }
        }
    }
}

fn build_frame(request: RenderRequest, config: &DeviceConfig, broker_connected: bool) -> Frame {
    match request {
        RenderRequest::Chime => Frame::Chime,
        RenderRequest::PowerSave => Frame::PowerSave,
        RenderRequest::Status { spinner } => Frame::Status(StatusFrame {
            ssid: "simulated".to_string(),
            rssi_dbm: None,
            ip_address: "127.0.0.1".to_string(),
            broker_endpoint: config.broker_endpoint(),
            broker_connected,
            spinner,
        }),
    }
}

async fn push_event(state: &AppState, event: ControlEvent) {
    let mut events = state.events.lock().await;
    if let Err(err) = events.push(event) {
        warn!("dropping control event {event:?}: {err}");
    }
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    push_event(&state, ControlEvent::StatusViewed).await;
    Json(StatusReport::new(
        &state.config,
        monotonic_ms(),
        SIMULATED_HEAP_FREE,
    ))
}

async fn handle_put_ring(State(state): State<AppState>) -> impl IntoResponse {
    push_event(&state, ControlEvent::RemoteRing).await;
    StatusCode::ACCEPTED
}

async fn handle_put_reboot(State(state): State<AppState>) -> impl IntoResponse {
    push_event(&state, ControlEvent::Reboot).await;
    StatusCode::ACCEPTED
}

async fn handle_put_reset(State(state): State<AppState>) -> impl IntoResponse {
    push_event(&state, ControlEvent::FactoryReset).await;
    StatusCode::ACCEPTED
}

async fn handle_not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        [(header::CONTENT_TYPE, "application/json")],
        NOT_FOUND_BODY,
    )
}

impl AppStore {
    fn new() -> Self {
        let data_dir = std::env::var("DOORBELL_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.doorbell"));

        Self {
            config_path: Arc::new(data_dir.join("config.json")),
            lock: Arc::new(Mutex::new(())),
        }
    }

    async fn load_config(&self) -> anyhow::Result<DeviceConfig> {
        let _guard = self.lock.lock().await;
        match tokio::fs::read(self.config_path.as_ref()).await {
            Ok(raw) => Ok(serde_json::from_slice::<DeviceConfig>(&raw)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(DeviceConfig::default()),
            Err(err) => Err(err.into()),
        }
    }

    async fn clear(&self) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        match tokio::fs::remove_file(self.config_path.as_ref()).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
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
