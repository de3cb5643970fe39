use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, OnceLock,
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use embedded_svc::{
    http::{Headers, Method},
    io::{Read, Write},
    mqtt::client::{EventPayload, QoS},
    wifi::{AccessPointConfiguration, AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_hal::{
    delay::BLOCK,
    gpio::{AnyIOPin, AnyOutputPin, IOPin, Output, OutputPin, PinDriver, Pull},
    i2c::{I2cConfig, I2cDriver, I2C0},
    units::FromValueType,
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{modem::Modem, prelude::Peripherals},
    http::server::{Configuration as HttpConfiguration, EspHttpServer},
    log::EspLogger,
    mqtt::client::{EspMqttClient, MqttClientConfiguration},
    nvs::{EspDefaultNvsPartition, EspNvs},
    wifi::{BlockingWifi, EspWifi},
};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use doorbell_common::{
    config::{self, parse_port},
    status::NOT_FOUND_BODY,
    BrokerSession, ChimeAction, ChimeEngine, ConfigDraft, ConnectivityState, ControlEvent,
    DeviceConfig, DisplayPresenter, EventQueue, Frame, LinkSupervisor, PendingConfigSave,
    RenderRequest, StatusFrame, StatusReport,
};

use crate::render::{MonoFramebuffer, DISPLAY_HEIGHT, DISPLAY_WIDTH};

const NVS_NAMESPACE: &str = "doorbell";
const MAX_HTTP_BODY: usize = 4096;
const PROVISIONING_AP_SSID: &str = "Doorbell-AP";
const PROVISIONING_AP_PASSWORD: &str = "DoorbellSetup";
const WATCHDOG_TIMEOUT_SEC: u32 = 5;
const WIFI_CONNECT_DEADLINE_MS: u64 = 60_000;
const WIFI_RETRY_DELAY_MS: u64 = 3_000;
const RESTART_GRACE_MS: u64 = 500;
const LOOP_PACE_MS: u64 = 10;

const OLED_ADDR: u8 = 0x3c;

const PORTAL_HTML: &str = r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>Doorbell Setup</title>
  <style>
    body{font-family:Arial,sans-serif;max-width:560px;margin:2rem auto;padding:0 1rem;color:#111}
    h1{margin:0 0 .5rem}.card{border:1px solid #ddd;border-radius:10px;padding:1rem;margin-bottom:1rem}
    label{display:block;margin:.5rem 0 .2rem}
    input[type=text],input[type=password]{width:100%;padding:.5rem;box-sizing:border-box}
    .muted{color:#555}.ok{color:#106010}.err{color:#a00000}
    button{padding:.55rem .9rem;margin-top:.8rem}
  </style>
</head>
<body>
  <h1>Doorbell Setup</h1>
  <p class="muted">Configure WiFi and MQTT. The doorbell restarts after saving.</p>
  <p class="muted">Provisioning AP password: <code>DoorbellSetup</code></p>

  <div class="card">
    <label>WiFi SSID</label><input id="ssid" type="text">
    <label>WiFi Password</label><input id="password" type="password">
    <label>mqtt server</label><input id="server" type="text">
    <label>mqtt port</label><input id="port" type="text">
    <label>mqtt node name</label><input id="nodename" type="text">
    <label>mqtt prefix</label><input id="prefix" type="text">
    <button id="save">Save</button>
  </div>

  <p id="status" class="muted"></p>

  <script>
    const q=(id)=>document.getElementById(id);
    async function api(path,opt){const r=await fetch(path,opt);let b={};try{b=await r.json();}catch(_){}if(!r.ok)throw new Error(b.error||('Request failed: '+r.status));return b;}

    async function load(){
      const s=await api('/status');
      q('server').value=s.mqtt_config.server||'';
      q('port').value=String(s.mqtt_config.port||1883);
      q('nodename').value=s.mqtt_config.node||'';
      q('prefix').value=s.mqtt_config.prefix||'';
    }

    q('save').addEventListener('click', async ()=>{
      q('status').className='muted'; q('status').textContent='Saving...';
      try{
        const payload={
          ssid:q('ssid').value.trim(),
          password:q('password').value,
          server:q('server').value.trim(),
          port:q('port').value.trim(),
          nodename:q('nodename').value.trim(),
          prefix:q('prefix').value.trim(),
        };
        await api('/save',{method:'POST',headers:{'content-type':'application/json'},body:JSON.stringify(payload)});
        q('status').className='ok'; q('status').textContent='Saved. The doorbell is restarting.';
      }catch(err){q('status').className='err'; q('status').textContent=err.message;}
    });

    load().catch((err)=>{q('status').className='err';q('status').textContent=err.message;});
  </script>
</body>
</html>
"#;

enum WifiStartup {
    Connected(EspWifi<'static>),
    Provisioning(EspWifi<'static>),
}

struct StationCredentials {
    ssid: String,
    password: String,
}

#[derive(Clone)]
struct SharedState {
    events: Arc<Mutex<EventQueue>>,
    pending_save: Arc<Mutex<PendingConfigSave>>,
    staged_credentials: Arc<Mutex<Option<StationCredentials>>>,
    config: Arc<DeviceConfig>,
    mqtt_connected: Arc<AtomicBool>,
}

#[derive(Clone)]
struct ConfigStore {
    partition: EspDefaultNvsPartition,
    lock: Arc<Mutex<()>>,
}

#[derive(Debug, Deserialize)]
struct PortalSubmission {
    ssid: String,
    #[serde(default)]
    password: String,
    server: String,
    port: String,
    #[serde(rename = "nodename")]
    node: String,
    prefix: String,
}

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let config_store = ConfigStore {
        partition: nvs_partition.clone(),
        lock: Arc::new(Mutex::new(())),
    };

    let config = config_store.load().unwrap_or_else(|err| {
        warn!("failed to load config from NVS: {err:#}");
        DeviceConfig::default()
    });
    info!(
        "broker config: host=`{}` port={} node=`{}` prefix=`{}` topic=`{}`",
        config.broker_host,
        config.broker_port,
        config.node_name,
        config.topic_prefix,
        config.ring_topic(),
    );
    let config = Arc::new(config);

    let Peripherals {
        modem, pins, i2c0, ..
    } = Peripherals::take()?;

    let mut relay = PinDriver::output(pins.gpio16.downgrade_output())?;
    relay.set_low()?;
    let mut button = PinDriver::input(pins.gpio17.downgrade())?;
    button.set_pull(Pull::Down)?;

    let mut panel = match OledPanel::new(i2c0, pins.gpio21.downgrade(), pins.gpio22.downgrade()) {
        Ok(panel) => Some(panel),
        Err(err) => {
            warn!("status display unavailable: {err:#}");
            None
        }
    };

    let shared = SharedState {
        events: Arc::new(Mutex::new(EventQueue::new())),
        pending_save: Arc::new(Mutex::new(PendingConfigSave::new())),
        staged_credentials: Arc::new(Mutex::new(None)),
        config: config.clone(),
        mqtt_connected: Arc::new(AtomicBool::new(false)),
    };

    let (mut wifi, mut link, _server) =
        match connect_wifi(modem, sys_loop, nvs_partition).context("wifi startup failed")? {
            WifiStartup::Connected(wifi) => {
                info!("wifi connected");
                disable_wifi_power_save();
                let server = create_http_server(shared.clone())?;
                (wifi, LinkSupervisor::new(ConnectivityState::Connected), server)
            }
            WifiStartup::Provisioning(wifi) => {
                warn!(
                    "wifi station connection unavailable; serving provisioning portal on AP `{}`",
                    PROVISIONING_AP_SSID
                );
                let server = create_portal_http_server(shared.clone())?;
                (
                    wifi,
                    LinkSupervisor::new(ConnectivityState::ProvisioningPortalActive),
                    server,
                )
            }
        };

    init_watchdog(WATCHDOG_TIMEOUT_SEC)?;
    add_current_task_to_watchdog()?;

    let mut chime = ChimeEngine::new();
    let mut presenter = DisplayPresenter::new();
    let mut session = BrokerSession::new();
    let mut mqtt_client: Option<EspMqttClient<'static>> = None;
    let mut button_was_high = false;

    loop {
        feed_watchdog();
        let now_ms = monotonic_ms();

        if let Some(request) = presenter.poll(now_ms) {
            render_display(&mut panel, request, &wifi, &config, session.is_connected());
        }

        let staged = { shared.pending_save.lock().unwrap().take() };
        if let Some(draft) = staged {
            consume_config_save(&config_store, &mut wifi, &shared, draft);
        }

        if link.poll(now_ms, is_wifi_station_connected()) {
            info!("wifi disassociated; requesting reconnect");
            if let Err(err) = wifi.connect() {
                warn!("wifi reconnect request failed: {err:#}");
            }
        }

        if shared.mqtt_connected.load(Ordering::Relaxed) {
            session.note_connected();
        } else {
            session.note_disconnected();
        }
        if session.should_attempt(now_ms, link.is_associated()) {
            info!("attempting mqtt connection to {}", config.broker_endpoint());
            // a fresh client per gated attempt; dropping the stale one
            // lets its receiver thread exit
            mqtt_client = None;
            match create_mqtt_client(&config, shared.mqtt_connected.clone()) {
                Ok(client) => mqtt_client = Some(client),
                Err(err) => warn!("mqtt connect failed: {err:#}"),
            }
        }

        let drained = { shared.events.lock().unwrap().drain() };
        for event in drained {
            match event {
                ControlEvent::RemoteRing => {
                    info!("remote ring requested");
                    presenter.note_chime(now_ms);
                    let actions = chime.trigger(now_ms);
                    apply_chime_actions(actions, &mut relay, &mut mqtt_client, &session, &config);
                }
                ControlEvent::StatusViewed => presenter.note_status_request(now_ms),
                ControlEvent::Reboot => {
                    info!("reboot requested");
                    restart_after_grace();
                }
                ControlEvent::FactoryReset => {
                    info!("factory reset requested");
                    if let Err(err) = config_store.clear() {
                        warn!("failed to clear stored config: {err:#}");
                    }
                    erase_wifi_credentials();
                    restart_after_grace();
                }
            }
        }

        let actions = chime.tick(now_ms);
        apply_chime_actions(actions, &mut relay, &mut mqtt_client, &session, &config);

        let button_high = button.is_high();
        if button_high && !button_was_high {
            info!("doorbell button pressed");
            presenter.note_chime(now_ms);
            let actions = chime.trigger(now_ms);
            apply_chime_actions(actions, &mut relay, &mut mqtt_client, &session, &config);
        }
        button_was_high = button_high;

        thread::sleep(Duration::from_millis(LOOP_PACE_MS));
    }
}

fn apply_chime_actions(
    actions: Vec<ChimeAction>,
    relay: &mut PinDriver<'static, AnyOutputPin, Output>,
    mqtt: &mut Option<EspMqttClient<'static>>,
    session: &BrokerSession,
    config: &DeviceConfig,
) {
    for action in actions {
        match action {
            ChimeAction::RelayOn => {
                if let Err(err) = relay.set_high() {
                    warn!("failed to energize relay: {err}");
                }
            }
            ChimeAction::RelayOff => {
                if let Err(err) = relay.set_low() {
                    warn!("failed to release relay: {err}");
                }
            }
            ChimeAction::PublishRing => match mqtt.as_mut() {
                Some(client) if session.is_connected() => {
                    let topic = config.ring_topic();
                    if let Err(err) = client.publish(&topic, QoS::AtMostOnce, false, b"pressed") {
                        warn!("ring publish failed: {err:?}");
                    } else {
                        info!("ring published to `{topic}`");
                    }
                }
                _ => info!("broker offline; ring event dropped"),
            },
        }
    }
}

fn consume_config_save(
    config_store: &ConfigStore,
    wifi: &mut EspWifi<'static>,
    shared: &SharedState,
    draft: ConfigDraft,
) {
    info!("persisting portal configuration");
    let new_config = draft.apply();
    if let Err(err) = config_store.save(&new_config) {
        warn!("failed to persist config: {err:#}");
    }

    let credentials = { shared.staged_credentials.lock().unwrap().take() };
    if let Some(credentials) = credentials {
        if let Err(err) = store_station_credentials(wifi, &credentials) {
            warn!("failed to store wifi credentials: {err:#}");
        }
    }

    info!("configuration saved; restarting to apply");
    restart_after_grace();
}

fn store_station_credentials(
    wifi: &mut EspWifi<'static>,
    credentials: &StationCredentials,
) -> anyhow::Result<()> {
    let auth_method = if credentials.password.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPAWPA2Personal
    };

    // the wifi driver persists this to its own NVS storage
    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: credentials
            .ssid
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi ssid too long"))?,
        password: credentials
            .password
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi password too long"))?,
        auth_method,
        ..Default::default()
    }))?;
    Ok(())
}

fn create_http_server(state: SharedState) -> anyhow::Result<EspHttpServer<'static>> {
    let conf = HttpConfiguration {
        stack_size: 16 * 1024,
        uri_match_wildcard: true,
        ..Default::default()
    };

    let mut server = EspHttpServer::new(&conf)?;

    {
        let state = state.clone();
        server.fn_handler::<anyhow::Error, _>("/status", Method::Get, move |req| {
            push_event(&state, ControlEvent::StatusViewed);
            let report = StatusReport::new(&state.config, monotonic_ms(), free_heap_bytes());
            write_json(req, &report)
        })?;
    }

    {
        let state = state.clone();
        server.fn_handler::<anyhow::Error, _>("/ring", Method::Put, move |req| {
            push_event(&state, ControlEvent::RemoteRing);
            write_accepted(req)
        })?;
    }

    {
        let state = state.clone();
        server.fn_handler::<anyhow::Error, _>("/reboot", Method::Put, move |req| {
            push_event(&state, ControlEvent::Reboot);
            write_accepted(req)
        })?;
    }

    {
        let state = state.clone();
        server.fn_handler::<anyhow::Error, _>("/reset", Method::Put, move |req| {
            push_event(&state, ControlEvent::FactoryReset);
            write_accepted(req)
        })?;
    }

    // registered last so the specific routes above win
    for method in [Method::Get, Method::Put, Method::Post, Method::Delete] {
        server.fn_handler::<anyhow::Error, _>("/*", method, write_not_found)?;
    }

    Ok(server)
}

fn create_portal_http_server(state: SharedState) -> anyhow::Result<EspHttpServer<'static>> {
    let conf = HttpConfiguration {
        stack_size: 16 * 1024,
        uri_match_wildcard: true,
        ..Default::default()
    };

    let mut server = EspHttpServer::new(&conf)?;

    {
        let state = state.clone();
        server.fn_handler::<anyhow::Error, _>("/status", Method::Get, move |req| {
            let report = StatusReport::new(&state.config, monotonic_ms(), free_heap_bytes());
            write_json(req, &report)
        })?;
    }

    {
        let state = state.clone();
        server.fn_handler::<anyhow::Error, _>("/save", Method::Post, move |mut req| {
            let body = read_request_body(&mut req)?;
            let submission: PortalSubmission = match serde_json::from_slice(&body) {
                Ok(submission) => submission,
                Err(err) => return write_error(req, 400, &format!("invalid save payload: {err}")),
            };
            if submission.ssid.trim().is_empty() {
                return write_error(req, 400, "ssid cannot be empty");
            }

            {
                let mut staged = state.staged_credentials.lock().unwrap();
                *staged = Some(StationCredentials {
                    ssid: submission.ssid,
                    password: submission.password,
                });
            }
            {
                let mut pending = state.pending_save.lock().unwrap();
                pending.stage(ConfigDraft {
                    server: submission.server,
                    port: submission.port,
                    node: submission.node,
                    prefix: submission.prefix,
                });
            }

            let payload = serde_json::json!({ "saved": true, "restarting": true });
            write_json(req, &payload)
        })?;
    }

    // captive portal: OS connectivity probes and any other path get the page
    server.fn_handler::<anyhow::Error, _>("/*", Method::Get, |req| {
        req.into_response(
            200,
            Some("OK"),
            &[("Content-Type", "text/html; charset=utf-8")],
        )?
        .write_all(PORTAL_HTML.as_bytes())?;
        Ok(())
    })?;

    Ok(server)
}

fn push_event(state: &SharedState, event: ControlEvent) {
    let mut events = state.events.lock().unwrap();
    if let Err(err) = events.push(event) {
        warn!("dropping control event {event:?}: {err}");
    }
}

fn read_request_body(
    req: &mut esp_idf_svc::http::server::Request<
        &mut esp_idf_svc::http::server::EspHttpConnection<'_>,
    >,
) -> anyhow::Result<Vec<u8>> {
    let len = req.content_len().unwrap_or(0) as usize;
    if len > MAX_HTTP_BODY {
        return Err(anyhow!("request body too large"));
    }

    let mut body = vec![0_u8; len];
    if len > 0 {
        req.read_exact(&mut body)?;
    }
    Ok(body)
}

fn write_json<T: Serialize>(
    req: esp_idf_svc::http::server::Request<
        &mut esp_idf_svc::http::server::EspHttpConnection<'_>,
    >,
    payload: &T,
) -> anyhow::Result<()> {
    let body = serde_json::to_vec(payload)?;
    req.into_response(
        200,
        Some("OK"),
        &[
            ("Content-Type", "application/json"),
            ("Access-Control-Allow-Origin", "*"),
        ],
    )?
    .write_all(&body)?;
    Ok(())
}

fn write_accepted(
    req: esp_idf_svc::http::server::Request<
        &mut esp_idf_svc::http::server::EspHttpConnection<'_>,
    >,
) -> anyhow::Result<()> {
    req.into_response(
        202,
        Some("Accepted"),
        &[("Access-Control-Allow-Origin", "*")],
    )?;
    Ok(())
}

fn write_not_found(
    req: esp_idf_svc::http::server::Request<
        &mut esp_idf_svc::http::server::EspHttpConnection<'_>,
    >,
) -> anyhow::Result<()> {
    req.into_response(
        404,
        Some("Not Found"),
        &[
            ("Content-Type", "application/json"),
            ("Access-Control-Allow-Origin", "*"),
        ],
    )?
    .write_all(NOT_FOUND_BODY.as_bytes())?;
    Ok(())
}

fn write_error(
    req: esp_idf_svc::http::server::Request<
        &mut esp_idf_svc::http::server::EspHttpConnection<'_>,
    >,
    status_code: u16,
    message: &str,
) -> anyhow::Result<()> {
    let payload = serde_json::json!({ "error": message });
    let body = serde_json::to_vec(&payload)?;
    req.into_response(
        status_code,
        None,
        &[
            ("Content-Type", "application/json"),
            ("Access-Control-Allow-Origin", "*"),
        ],
    )?
    .write_all(&body)?;
    Ok(())
}

fn connect_wifi(
    modem: Modem,
    sys_loop: EspSystemEventLoop,
    nvs_partition: EspDefaultNvsPartition,
) -> anyhow::Result<WifiStartup> {
    // the wifi driver keeps station credentials in its own NVS storage
    let mut esp_wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs_partition))?;
    let mut wifi = BlockingWifi::wrap(&mut esp_wifi, sys_loop)?;

    let stored = wifi.get_configuration().unwrap_or(Configuration::None);
    let Some(client) = stored_station_config(&stored) else {
        warn!("no stored wifi credentials; entering provisioning mode");
        start_provisioning_ap(&mut wifi)?;
        return Ok(WifiStartup::Provisioning(esp_wifi));
    };

    wifi.set_configuration(&Configuration::Client(client.clone()))?;
    wifi.start()?;
    info!("wifi started, connecting to `{}`", client.ssid);

    let deadline = Instant::now() + Duration::from_millis(WIFI_CONNECT_DEADLINE_MS);
    let mut connected = false;
    while Instant::now() < deadline {
        match wifi.connect().and_then(|()| wifi.wait_netif_up()) {
            Ok(()) => {
                connected = true;
                break;
            }
            Err(err) => {
                warn!("wifi connect attempt failed: {err:#}");
                let _ = wifi.disconnect();
                thread::sleep(Duration::from_millis(WIFI_RETRY_DELAY_MS));
            }
        }
    }

    if connected {
        Ok(WifiStartup::Connected(esp_wifi))
    } else {
        warn!(
            "no wifi association within {}s; entering provisioning mode",
            WIFI_CONNECT_DEADLINE_MS / 1000
        );
        let _ = wifi.disconnect();
        let _ = wifi.stop();
        start_provisioning_ap(&mut wifi)?;
        Ok(WifiStartup::Provisioning(esp_wifi))
    }
}

fn stored_station_config(stored: &Configuration) -> Option<ClientConfiguration> {
    match stored {
        Configuration::Client(client) | Configuration::Mixed(client, _)
            if !client.ssid.is_empty() =>
        {
            Some(client.clone())
        }
        _ => None,
    }
}

fn start_provisioning_ap(wifi: &mut BlockingWifi<&mut EspWifi<'static>>) -> anyhow::Result<()> {
    wifi.set_configuration(&Configuration::AccessPoint(AccessPointConfiguration {
        ssid: PROVISIONING_AP_SSID
            .try_into()
            .map_err(|_| anyhow!("provisioning AP SSID too long"))?,
        password: PROVISIONING_AP_PASSWORD
            .try_into()
            .map_err(|_| anyhow!("provisioning AP password too long"))?,
        auth_method: AuthMethod::WPAWPA2Personal,
        channel: 1,
        ..Default::default()
    }))?;
    wifi.start()?;
    wifi.wait_netif_up()?;
    info!(
        "provisioning AP started on `{}` (password: `{}`)",
        PROVISIONING_AP_SSID, PROVISIONING_AP_PASSWORD
    );
    Ok(())
}

fn create_mqtt_client(
    config: &DeviceConfig,
    connected: Arc<AtomicBool>,
) -> anyhow::Result<EspMqttClient<'static>> {
    let url = format!("mqtt://{}:{}", config.broker_host, config.broker_port);
    let conf = MqttClientConfiguration {
        client_id: Some(config.node_name.as_str()),
        ..Default::default()
    };

    let (client, mut conn) = EspMqttClient::new(&url, &conf)?;

    thread::Builder::new()
        .name("mqtt-rx".into())
        .stack_size(8192)
        .spawn(move || {
            // exits once the owning client is dropped and the connection closes
            loop {
                match conn.next() {
                    Ok(event) => match event.payload() {
                        EventPayload::Connected(_) => {
                            connected.store(true, Ordering::Relaxed);
                            info!("mqtt connected");
                        }
                        EventPayload::Disconnected => {
                            connected.store(false, Ordering::Relaxed);
                            warn!("mqtt disconnected");
                        }
                        _ => {}
                    },
                    Err(_) => {
                        connected.store(false, Ordering::Relaxed);
                        break;
                    }
                }
            }
        })
        .context("failed to spawn mqtt receiver thread")?;

    Ok(client)
}

fn render_display(
    panel: &mut Option<OledPanel>,
    request: RenderRequest,
    wifi: &EspWifi<'static>,
    config: &DeviceConfig,
    broker_connected: bool,
) {
    let Some(panel) = panel.as_mut() else {
        return;
    };

    let frame = match request {
        RenderRequest::PowerSave => {
            if let Err(err) = panel.sleep() {
                warn!("display sleep failed: {err:#}");
            }
            return;
        }
        RenderRequest::Chime => Frame::Chime,
        RenderRequest::Status { spinner } => {
            Frame::Status(build_status_frame(spinner, wifi, config, broker_connected))
        }
    };

    if let Err(err) = panel.wake() {
        warn!("display wake failed: {err:#}");
    }
    panel.framebuffer.render(&frame);
    if let Err(err) = panel.flush() {
        warn!("display flush failed: {err:#}");
    }
}

fn build_status_frame(
    spinner: char,
    wifi: &EspWifi<'static>,
    config: &DeviceConfig,
    broker_connected: bool,
) -> StatusFrame {
    let (ssid, rssi_dbm) = station_info();
    let ip_address = wifi
        .sta_netif()
        .get_ip_info()
        .map(|ip_info| ip_info.ip.to_string())
        .unwrap_or_else(|_| "0.0.0.0".to_string());

    StatusFrame {
        ssid,
        rssi_dbm,
        ip_address,
        broker_endpoint: config.broker_endpoint(),
        broker_connected,
        spinner,
    }
}

struct OledPanel {
    i2c: I2cDriver<'static>,
    framebuffer: MonoFramebuffer,
    asleep: bool,
}

// SSD1306 bring-up for a 128x64 panel
const OLED_INIT: &[u8] = &[
    0xae, 0xd5, 0x80, 0xa8, 0x3f, 0xd3, 0x00, 0x40, 0x8d, 0x14, 0x20, 0x00, 0xa1, 0xc8, 0xda,
    0x12, 0x81, 0xcf, 0xd9, 0xf1, 0xdb, 0x40, 0xa4, 0xa6, 0xaf,
];

impl OledPanel {
    fn new(i2c: I2C0, sda: AnyIOPin, scl: AnyIOPin) -> anyhow::Result<Self> {
        let config = I2cConfig::new().baudrate(400.kHz().into());
        let i2c = I2cDriver::new(i2c, sda, scl, &config)?;

        let mut panel = Self {
            i2c,
            framebuffer: MonoFramebuffer::panel_sized(),
            asleep: false,
        };
        panel.send_commands(OLED_INIT)?;
        panel.flush()?;
        Ok(panel)
    }

    fn send_commands(&mut self, commands: &[u8]) -> anyhow::Result<()> {
        for &command in commands {
            self.i2c.write(OLED_ADDR, &[0x00, command], BLOCK)?;
        }
        Ok(())
    }

    fn flush(&mut self) -> anyhow::Result<()> {
        for page in 0..(DISPLAY_HEIGHT / 8) {
            self.send_commands(&[0xb0 | page as u8, 0x00, 0x10])?;

            let mut row = [0_u8; DISPLAY_WIDTH as usize + 1];
            row[0] = 0x40;
            for col in 0..DISPLAY_WIDTH {
                let mut byte = 0_u8;
                for bit in 0..8 {
                    if self.framebuffer.is_lit(col, page * 8 + bit) {
                        byte |= 1 << bit;
                    }
                }
                row[col as usize + 1] = byte;
            }
            self.i2c.write(OLED_ADDR, &row, BLOCK)?;
        }
        Ok(())
    }

    fn sleep(&mut self) -> anyhow::Result<()> {
        if !self.asleep {
            self.send_commands(&[0xae])?;
            self.asleep = true;
        }
        Ok(())
    }

    fn wake(&mut self) -> anyhow::Result<()> {
        if self.asleep {
            self.send_commands(&[0xaf])?;
            self.asleep = false;
        }
        Ok(())
    }
}

impl ConfigStore {
    fn load(&self) -> anyhow::Result<DeviceConfig> {
        let _guard = self.lock.lock().unwrap();
        let mut nvs = EspNvs::new(self.partition.clone(), NVS_NAMESPACE, true)?;

        let host = read_entry(&mut nvs, config::KEY_BROKER_HOST)?;
        let port = read_entry(&mut nvs, config::KEY_BROKER_PORT)?;
        let node = read_entry(&mut nvs, config::KEY_NODE_NAME)?;
        let prefix = read_entry(&mut nvs, config::KEY_TOPIC_PREFIX)?;

        let mut loaded = DeviceConfig {
            broker_host: host.unwrap_or_default(),
            broker_port: port.as_deref().map(parse_port).unwrap_or(0),
            node_name: node.unwrap_or_default(),
            topic_prefix: prefix.unwrap_or_default(),
        };
        loaded.sanitize();
        Ok(loaded)
    }

    fn save(&self, device_config: &DeviceConfig) -> anyhow::Result<()> {
        let _guard = self.lock.lock().unwrap();
        let mut nvs = EspNvs::new(self.partition.clone(), NVS_NAMESPACE, true)?;

        nvs.set_str(config::KEY_BROKER_HOST, &device_config.broker_host)?;
        nvs.set_str(config::KEY_BROKER_PORT, &device_config.broker_port.to_string())?;
        nvs.set_str(config::KEY_NODE_NAME, &device_config.node_name)?;
        nvs.set_str(config::KEY_TOPIC_PREFIX, &device_config.topic_prefix)?;
        Ok(())
    }

    fn clear(&self) -> anyhow::Result<()> {
        let _guard = self.lock.lock().unwrap();
        let mut nvs = EspNvs::new(self.partition.clone(), NVS_NAMESPACE, true)?;

        for key in [
            config::KEY_BROKER_HOST,
            config::KEY_BROKER_PORT,
            config::KEY_NODE_NAME,
            config::KEY_TOPIC_PREFIX,
        ] {
            nvs.remove(key)?;
        }
        Ok(())
    }
}

fn read_entry(
    nvs: &mut EspNvs<esp_idf_svc::nvs::NvsDefault>,
    key: &str,
) -> anyhow::Result<Option<String>> {
    let mut buffer = vec![0_u8; 128];
    Ok(nvs.get_str(key, &mut buffer)?.map(str::to_string))
}

fn init_watchdog(timeout_sec: u32) -> anyhow::Result<()> {
    let config = esp_idf_svc::sys::esp_task_wdt_config_t {
        timeout_ms: timeout_sec.saturating_mul(1000),
        idle_core_mask: 0,
        trigger_panic: true,
    };
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_init(&config) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_init failed with code {}", rc))
}

fn add_current_task_to_watchdog() -> anyhow::Result<()> {
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_add(core::ptr::null_mut()) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_add failed with code {}", rc))
}

fn feed_watchdog() {
    let _ = unsafe { esp_idf_svc::sys::esp_task_wdt_reset() };
}

fn disable_wifi_power_save() {
    let rc = unsafe { esp_idf_svc::sys::esp_wifi_set_ps(0) };
    if rc == esp_idf_svc::sys::ESP_OK {
        info!("wifi power save disabled");
    } else {
        warn!("failed to disable wifi power save: esp_err_t={rc}");
    }
}

fn is_wifi_station_connected() -> bool {
    let mut ap_info = esp_idf_svc::sys::wifi_ap_record_t::default();
    let rc = unsafe { esp_idf_svc::sys::esp_wifi_sta_get_ap_info(&mut ap_info) };
    rc == esp_idf_svc::sys::ESP_OK
}

fn station_info() -> (String, Option<i8>) {
    let mut ap_info = esp_idf_svc::sys::wifi_ap_record_t::default();
    let rc = unsafe { esp_idf_svc::sys::esp_wifi_sta_get_ap_info(&mut ap_info) };
    if rc != esp_idf_svc::sys::ESP_OK {
        return ("(no wifi)".to_string(), None);
    }

    let len = ap_info
        .ssid
        .iter()
        .position(|&byte| byte == 0)
        .unwrap_or(ap_info.ssid.len());
    let ssid = String::from_utf8_lossy(&ap_info.ssid[..len]).into_owned();
    (ssid, Some(ap_info.rssi))
}

fn erase_wifi_credentials() {
    let rc = unsafe { esp_idf_svc::sys::esp_wifi_restore() };
    if rc != esp_idf_svc::sys::ESP_OK {
        warn!("esp_wifi_restore failed: esp_err_t={rc}");
    }
}

fn free_heap_bytes() -> u32 {
    unsafe { esp_idf_svc::sys::esp_get_free_heap_size() }
}

fn restart_after_grace() {
    thread::sleep(Duration::from_millis(RESTART_GRACE_MS));
    unsafe { esp_idf_svc::sys::esp_restart() };
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
