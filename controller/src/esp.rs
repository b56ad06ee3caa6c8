use core::convert::TryInto;
use std::{
    net::Ipv4Addr,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, SyncSender, TryRecvError},
        Arc, OnceLock,
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use chrono::Utc;
use chrono_tz::Tz;
use embedded_svc::{
    http::{Headers, Method},
    io::{Read, Write},
    wifi::{AccessPointConfiguration, AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{gpio::AnyOutputPin, modem::Modem, prelude::Peripherals, rmt::RMT},
    http::server::{Configuration as HttpConfiguration, EspHttpServer},
    ipv4::{Configuration as IpConfiguration, Mask, RouterConfiguration, Subnet},
    log::EspLogger,
    netif::{EspNetif, NetifConfiguration},
    nvs::EspDefaultNvsPartition,
    sntp::{EspSntp, SntpConf, SyncStatus},
    wifi::{BlockingWifi, EspWifi},
};
use log::{info, warn};
use serde::Serialize;

use astro_common::{
    config::{IrHardwareConfig, NetworkConfig, TimeConfig},
    overview::format_local_time,
    Command, CommandReply, IrDiagnostics, NetworkMode, RuntimeConfig, Session, SessionSnapshot,
    SessionState, ShotAction, SircCode, StartRequest, SuccessBody, SystemOverview, TimeSync,
    MAX_REQUEST_BODY,
};

use crate::ir::IrTransmitter;

const WATCHDOG_TIMEOUT_SEC: u32 = 30;
const WIFI_RETRY_DELAY_MS: u64 = 1_000;
const SNTP_POLL_MS: u64 = 500;
const COMMAND_QUEUE_DEPTH: usize = 8;
const PLATFORM: &str = "ESP32 D32 Pro";

const INDEX_HTML: &str = include_str!("../web/index.html");

enum WifiStartup {
    Station(EspWifi<'static>),
    AccessPoint(EspWifi<'static>),
}

enum ControlRequest {
    Session {
        command: Command,
        reply: SyncSender<CommandReply>,
    },
    IrDiagnostics {
        reply: SyncSender<IrDiagnostics>,
    },
}

/// Facts about the running node that the `/system` page reports.
#[derive(Clone)]
struct NodeInfo {
    ip: Ipv4Addr,
    network: NetworkMode,
    time_synced: Arc<AtomicBool>,
    timezone: Tz,
    ir_protocol: String,
    http_port: u16,
}

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();
    // Uptime and session timestamps count from here.
    monotonic_ms();

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;

    let mut runtime = RuntimeConfig::default();
    ensure_wifi_defaults(&mut runtime);
    runtime.sanitize();

    info!(
        "AstroController starting: interval {}ms, max {} minutes, ssid=`{}`",
        runtime.session.interval_ms, runtime.session.max_session_minutes, runtime.network.wifi_ssid,
    );

    let code = SircCode::from_config(&runtime.camera).context("invalid camera remote code")?;

    let Peripherals { modem, rmt, .. } = Peripherals::take()?;
    let ir_sender = match init_ir_transmitter(rmt, &runtime.ir, code, runtime.camera.repeats) {
        Ok(transmitter) => {
            info!(
                "IR transmitter initialized on RMT channel{} / GPIO{} @ {}kHz",
                runtime.ir.rmt_channel, runtime.ir.tx_pin, runtime.ir.carrier_khz
            );
            transmitter
        }
        Err(err) => {
            warn!("failed to initialize IR transmitter, running disabled: {err:#}");
            IrTransmitter::disabled(code, runtime.camera.repeats, runtime.ir.carrier_khz)
        }
    };

    let startup = connect_wifi(modem, sys_loop, nvs_partition, &runtime.network)
        .context("wifi startup failed")?;

    let time_synced = Arc::new(AtomicBool::new(false));
    let (wifi, network, sntp) = match startup {
        WifiStartup::Station(wifi) => {
            disable_wifi_power_save();
            let sntp = start_sntp(&runtime.time, &time_synced);
            let network = NetworkMode::Station {
                ssid: runtime.network.wifi_ssid.clone(),
                rssi_dbm: None,
            };
            (wifi, network, sntp)
        }
        WifiStartup::AccessPoint(wifi) => {
            let network = NetworkMode::AccessPoint {
                ssid: runtime.network.ap_ssid.clone(),
            };
            (wifi, network, None)
        }
    };

    let ip = match &network {
        NetworkMode::Station { .. } => wifi.sta_netif().get_ip_info()?.ip,
        _ => wifi.ap_netif().get_ip_info()?.ip,
    };
    info!("web interface available at http://{ip}:{}/", runtime.network.http_port);

    let timezone = runtime.time.timezone.parse::<Tz>().unwrap_or_else(|_| {
        warn!("unknown timezone `{}`, using UTC", runtime.time.timezone);
        Tz::UTC
    });

    let node = NodeInfo {
        ip,
        network,
        time_synced,
        timezone,
        ir_protocol: format!("Sony SIRC {}-bit", code.bits()),
        http_port: runtime.network.http_port,
    };

    let (control, requests) = mpsc::sync_channel(COMMAND_QUEUE_DEPTH);
    let server = create_http_server(control, node, runtime.network.http_port)?;

    init_watchdog(WATCHDOG_TIMEOUT_SEC)?;
    if let Err(err) = add_current_task_to_watchdog() {
        warn!("failed to register control loop with watchdog: {err:#}");
    }

    // Keep services alive for the program lifetime.
    let _wifi = wifi;
    let _sntp = sntp;
    let _server = server;

    run_control_loop(Session::new(runtime.session), ir_sender, requests);
    Ok(())
}

fn ensure_wifi_defaults(runtime: &mut RuntimeConfig) {
    if runtime.network.wifi_ssid.is_empty() {
        if let Some(ssid) = option_env!("WIFI_SSID") {
            runtime.network.wifi_ssid = ssid.to_string();
        }
    }

    if runtime.network.wifi_pass.is_empty() {
        if let Some(pass) = option_env!("WIFI_PASS") {
            runtime.network.wifi_pass = pass.to_string();
        }
    }
}

/// Runs on the main task until every request sender is gone.
fn run_control_loop(
    mut session: Session,
    mut ir_sender: IrTransmitter,
    requests: Receiver<ControlRequest>,
) {
    let loop_interval = Duration::from_millis(session.config.loop_interval_ms);

    loop {
        feed_watchdog();

        loop {
            match requests.try_recv() {
                Ok(request) => handle_control_request(&mut session, &mut ir_sender, request),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    warn!("control channel closed, stopping control loop");
                    return;
                }
            }
        }

        let was_running = session.state() == SessionState::Running;
        let actions = session.tick(monotonic_ms());
        execute_shot_actions(&mut ir_sender, actions);

        if was_running && session.state() == SessionState::Completed {
            info!("session completed: {} shots", session.total_shots());
        }

        thread::sleep(loop_interval);
    }
}

fn handle_control_request(
    session: &mut Session,
    ir_sender: &mut IrTransmitter,
    request: ControlRequest,
) {
    match request {
        ControlRequest::Session { command, reply } => {
            let (outcome, actions) = session.handle_command(command, monotonic_ms());
            match (&command, &outcome) {
                (_, CommandReply::Rejected(err)) => warn!("{command:?} rejected: {err}"),
                (Command::Start { minutes }, _) => info!(
                    "session started: {minutes} minutes, {} shots",
                    session.total_shots()
                ),
                (Command::Stop, _) => info!("stop requested, session is {}", session.state().as_str()),
                _ => {}
            }
            execute_shot_actions(ir_sender, actions);
            let _ = reply.send(outcome);
        }
        ControlRequest::IrDiagnostics { reply } => {
            let _ = reply.send(ir_sender.diagnostics());
        }
    }
}

fn execute_shot_actions(ir_sender: &mut IrTransmitter, actions: Vec<ShotAction>) {
    for action in actions {
        feed_watchdog();
        match action {
            ShotAction::Delay(ms) => thread::sleep(Duration::from_millis(ms)),
            // Failures are counted and logged by the transmitter.
            ShotAction::Fire(kind) => {
                let _ = ir_sender.fire(kind);
            }
        }
    }
}

fn dispatch(control: &SyncSender<ControlRequest>, command: Command) -> anyhow::Result<CommandReply> {
    let (reply, response) = mpsc::sync_channel(1);
    control
        .send(ControlRequest::Session { command, reply })
        .map_err(|_| anyhow!("control loop is not running"))?;
    response
        .recv()
        .map_err(|_| anyhow!("control loop dropped the request"))
}

fn request_ir_diagnostics(control: &SyncSender<ControlRequest>) -> anyhow::Result<IrDiagnostics> {
    let (reply, response) = mpsc::sync_channel(1);
    control
        .send(ControlRequest::IrDiagnostics { reply })
        .map_err(|_| anyhow!("control loop is not running"))?;
    response
        .recv()
        .map_err(|_| anyhow!("control loop dropped the request"))
}

fn request_snapshot(control: &SyncSender<ControlRequest>) -> anyhow::Result<SessionSnapshot> {
    match dispatch(control, Command::Status)? {
        CommandReply::Status(snapshot) => Ok(snapshot),
        other => Err(anyhow!("unexpected reply to status request: {other:?}")),
    }
}

type HttpRequest<'r, 'c> =
    esp_idf_svc::http::server::Request<&'r mut esp_idf_svc::http::server::EspHttpConnection<'c>>;

fn create_http_server(
    control: SyncSender<ControlRequest>,
    node: NodeInfo,
    http_port: u16,
) -> anyhow::Result<EspHttpServer<'static>> {
    let conf = HttpConfiguration {
        http_port,
        stack_size: 10 * 1024,
        ..Default::default()
    };

    let mut server = EspHttpServer::new(&conf)?;

    server.fn_handler::<anyhow::Error, _>("/", Method::Get, move |req| {
        req.into_ok_response()?.write_all(INDEX_HTML.as_bytes())?;
        Ok(())
    })?;

    {
        let control = control.clone();
        server.fn_handler("/api/status", Method::Get, move |req| {
            let snapshot = request_snapshot(&control)?;
            write_json(req, &snapshot.status())
        })?;
    }

    {
        let control = control.clone();
        server.fn_handler("/start", Method::Post, move |mut req| {
            let body = match read_request_body(&mut req) {
                Ok(body) => body,
                Err(err) => return write_error(req, 400, &err.to_string()),
            };
            let Ok(request) = StartRequest::from_json(&body) else {
                return write_error(req, 400, "Invalid request body");
            };

            let reply = dispatch(
                &control,
                Command::Start {
                    minutes: request.minutes,
                },
            )?;
            write_command_reply(req, reply)
        })?;
    }

    {
        let control = control.clone();
        server.fn_handler("/stop", Method::Post, move |req| {
            let reply = dispatch(&control, Command::Stop)?;
            write_command_reply(req, reply)
        })?;
    }

    {
        let control = control.clone();
        server.fn_handler("/shot", Method::Post, move |req| {
            let reply = dispatch(&control, Command::SingleShot)?;
            write_command_reply(req, reply)
        })?;
    }

    {
        let control = control.clone();
        server.fn_handler("/burst", Method::Post, move |req| {
            let uri = req.uri().to_string();
            let count = match query_param(&uri, "count") {
                None => None,
                Some(value) => match value.parse::<u32>() {
                    Ok(count) => Some(count),
                    Err(_) => return write_error(req, 400, "Invalid burst count"),
                },
            };

            let reply = dispatch(&control, Command::Burst { count })?;
            write_command_reply(req, reply)
        })?;
    }

    {
        let control = control.clone();
        server.fn_handler("/api/ir/diagnostics", Method::Get, move |req| {
            let diagnostics = request_ir_diagnostics(&control)?;
            write_json(req, &diagnostics)
        })?;
    }

    server.fn_handler::<anyhow::Error, _>("/system", Method::Get, move |req| {
        let session = request_snapshot(&control)?;
        let ir_enabled = request_ir_diagnostics(&control)
            .map(|diagnostics| diagnostics.enabled)
            .unwrap_or(false);
        let html = build_overview(&node, session, ir_enabled).render_html();

        req.into_response(200, Some("OK"), &[("Content-Type", "text/html; charset=utf-8")])?
            .write_all(html.as_bytes())?;
        Ok(())
    })?;

    Ok(server)
}

fn build_overview(node: &NodeInfo, session: SessionSnapshot, ir_enabled: bool) -> SystemOverview {
    let network = match &node.network {
        NetworkMode::Station { ssid, .. } => NetworkMode::Station {
            ssid: ssid.clone(),
            rssi_dbm: station_rssi(),
        },
        other => other.clone(),
    };

    let time = match node.network {
        NetworkMode::AccessPoint { .. } => TimeSync::Offline,
        _ if node.time_synced.load(Ordering::Relaxed) => TimeSync::Synced {
            local_time: Some(format_local_time(&Utc::now().with_timezone(&node.timezone))),
        },
        _ => TimeSync::NotSynced,
    };

    let free_heap = unsafe { esp_idf_svc::sys::esp_get_free_heap_size() };

    SystemOverview {
        platform: PLATFORM.to_string(),
        ip: node.ip.to_string(),
        free_heap_kb: Some(free_heap / 1024),
        network,
        time,
        session,
        ir_protocol: node.ir_protocol.clone(),
        ir_enabled,
        http_port: node.http_port,
        uptime_s: monotonic_ms() / 1_000,
    }
}

fn write_command_reply(req: HttpRequest<'_, '_>, reply: CommandReply) -> anyhow::Result<()> {
    match reply {
        CommandReply::Done => write_json(req, &SuccessBody::ok()),
        CommandReply::Status(snapshot) => write_json(req, &snapshot.status()),
        CommandReply::Rejected(err) => write_error(req, 400, &err.to_string()),
    }
}

fn read_request_body(req: &mut HttpRequest<'_, '_>) -> anyhow::Result<Vec<u8>> {
    let len = req.content_len().unwrap_or(0) as usize;
    if len > MAX_REQUEST_BODY {
        return Err(anyhow!("Request body too large"));
    }

    let mut body = vec![0_u8; len];
    if len > 0 {
        req.read_exact(&mut body)
            .map_err(|_| anyhow!("Invalid request body"))?;
    }
    Ok(body)
}

fn write_json<T: Serialize>(req: HttpRequest<'_, '_>, payload: &T) -> anyhow::Result<()> {
    let body = serde_json::to_vec(payload)?;
    req.into_response(
        200,
        Some("OK"),
        &[("Content-Type", "application/json; charset=utf-8")],
    )?
    .write_all(&body)?;
    Ok(())
}

fn write_error(req: HttpRequest<'_, '_>, status_code: u16, message: &str) -> anyhow::Result<()> {
    let payload = serde_json::json!({ "error": message });
    let body = serde_json::to_vec(&payload)?;
    req.into_response(
        status_code,
        None,
        &[("Content-Type", "application/json; charset=utf-8")],
    )?
    .write_all(&body)?;
    Ok(())
}

fn query_param(uri: &str, key: &str) -> Option<String> {
    let query = uri.split_once('?')?.1;
    query.split('&').find_map(|pair| {
        let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
        (name == key).then(|| value.to_string())
    })
}

fn init_ir_transmitter(
    rmt: RMT,
    ir: &IrHardwareConfig,
    code: SircCode,
    repeats: u8,
) -> anyhow::Result<IrTransmitter> {
    if ir.tx_pin < 0 {
        return Err(anyhow!("invalid tx pin: {}", ir.tx_pin));
    }

    let pin = ir.tx_pin;
    let carrier_khz = ir.carrier_khz;

    match ir.rmt_channel {
        0 => unsafe {
            IrTransmitter::new(rmt.channel0, AnyOutputPin::new(pin), code, repeats, carrier_khz)
        },
        1 => unsafe {
            IrTransmitter::new(rmt.channel1, AnyOutputPin::new(pin), code, repeats, carrier_khz)
        },
        2 => unsafe {
            IrTransmitter::new(rmt.channel2, AnyOutputPin::new(pin), code, repeats, carrier_khz)
        },
        3 => unsafe {
            IrTransmitter::new(rmt.channel3, AnyOutputPin::new(pin), code, repeats, carrier_khz)
        },
        #[cfg(any(esp32, esp32s3))]
        4 => unsafe {
            IrTransmitter::new(rmt.channel4, AnyOutputPin::new(pin), code, repeats, carrier_khz)
        },
        #[cfg(any(esp32, esp32s3))]
        5 => unsafe {
            IrTransmitter::new(rmt.channel5, AnyOutputPin::new(pin), code, repeats, carrier_khz)
        },
        #[cfg(any(esp32, esp32s3))]
        6 => unsafe {
            IrTransmitter::new(rmt.channel6, AnyOutputPin::new(pin), code, repeats, carrier_khz)
        },
        #[cfg(any(esp32, esp32s3))]
        7 => unsafe {
            IrTransmitter::new(rmt.channel7, AnyOutputPin::new(pin), code, repeats, carrier_khz)
        },
        _ => Err(anyhow!("unsupported RMT channel: {}", ir.rmt_channel)),
    }
}

fn ipv4_from_octets(ip: [u8; 4]) -> Ipv4Addr {
    Ipv4Addr::new(ip[0], ip[1], ip[2], ip[3])
}

fn build_ap_netif(network: &NetworkConfig) -> anyhow::Result<EspNetif> {
    let conf = NetifConfiguration {
        ip_configuration: Some(IpConfiguration::Router(RouterConfiguration {
            subnet: Subnet {
                gateway: ipv4_from_octets(network.ap_ip),
                mask: Mask(network.ap_prefix_len),
            },
            dhcp_enabled: true,
            dns: None,
            secondary_dns: None,
        })),
        ..NetifConfiguration::wifi_default_router()
    };

    Ok(EspNetif::new_with_conf(&conf)?)
}

fn connect_wifi(
    modem: Modem,
    sys_loop: EspSystemEventLoop,
    nvs_partition: EspDefaultNvsPartition,
    network: &NetworkConfig,
) -> anyhow::Result<WifiStartup> {
    let mut esp_wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs_partition))?;
    esp_wifi
        .swap_netif_ap(build_ap_netif(network)?)
        .context("failed to apply access point netif configuration")?;

    let mut wifi = BlockingWifi::wrap(&mut esp_wifi, sys_loop)?;

    if !network.has_station_credentials() {
        warn!("wifi credentials missing; starting access point");
        start_access_point(&mut wifi, network)?;
        return Ok(WifiStartup::AccessPoint(esp_wifi));
    }

    let auth_method = if network.wifi_pass.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPAWPA2Personal
    };

    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: network
            .wifi_ssid
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi ssid too long"))?,
        password: network
            .wifi_pass
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi password too long"))?,
        auth_method,
        ..Default::default()
    }))?;

    wifi.start()?;
    info!("wifi started, connecting to `{}`", network.wifi_ssid);

    let deadline = Instant::now() + Duration::from_millis(network.connect_timeout_ms);
    let mut attempt = 0_u32;
    let connected = loop {
        attempt += 1;
        match wifi.connect().and_then(|()| wifi.wait_netif_up()) {
            Ok(()) => {
                info!("wifi connected and netif up on attempt {attempt}");
                break true;
            }
            Err(err) => warn!("wifi connect failed on attempt {attempt}: {err:#}"),
        }

        if Instant::now() >= deadline {
            break false;
        }
        let _ = wifi.disconnect();
        thread::sleep(Duration::from_millis(WIFI_RETRY_DELAY_MS));
    };

    if connected {
        return Ok(WifiStartup::Station(esp_wifi));
    }

    warn!(
        "no wifi connection within {}ms; falling back to access point",
        network.connect_timeout_ms
    );
    let _ = wifi.disconnect();
    let _ = wifi.stop();
    start_access_point(&mut wifi, network)?;
    Ok(WifiStartup::AccessPoint(esp_wifi))
}

fn start_access_point(
    wifi: &mut BlockingWifi<&mut EspWifi<'static>>,
    network: &NetworkConfig,
) -> anyhow::Result<()> {
    wifi.set_configuration(&Configuration::AccessPoint(AccessPointConfiguration {
        ssid: network
            .ap_ssid
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("access point SSID too long"))?,
        password: network
            .ap_pass
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("access point password too long"))?,
        auth_method: AuthMethod::WPA2Personal,
        channel: 1,
        ..Default::default()
    }))?;
    wifi.start()?;
    wifi.wait_netif_up()?;
    info!(
        "access point `{}` started at {}",
        network.ap_ssid,
        ipv4_from_octets(network.ap_ip)
    );
    Ok(())
}

/// Starts SNTP and waits up to the configured timeout for the first sync.
/// A sync that lands later still flips `time_synced` via the callback.
fn start_sntp(time: &TimeConfig, time_synced: &Arc<AtomicBool>) -> Option<EspSntp<'static>> {
    let mut conf = SntpConf::default();
    conf.servers[0] = time.ntp_server.as_str();

    let synced = Arc::clone(time_synced);
    let sntp = match EspSntp::new_with_callback(&conf, move |_| {
        synced.store(true, Ordering::Relaxed);
    }) {
        Ok(sntp) => sntp,
        Err(err) => {
            warn!("failed to start SNTP: {err:?}");
            return None;
        }
    };
    info!("SNTP started against `{}`", time.ntp_server);

    let deadline = Instant::now() + Duration::from_millis(time.sync_timeout_ms);
    while Instant::now() < deadline {
        if sntp.get_sync_status() == SyncStatus::Completed {
            time_synced.store(true, Ordering::Relaxed);
            break;
        }
        thread::sleep(Duration::from_millis(SNTP_POLL_MS));
    }

    if time_synced.load(Ordering::Relaxed) {
        info!("time synchronized");
    } else {
        warn!(
            "time not synchronized after {}ms; continuing without NTP",
            time.sync_timeout_ms
        );
    }

    Some(sntp)
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

fn station_rssi() -> Option<i8> {
    let mut ap_info = esp_idf_svc::sys::wifi_ap_record_t::default();
    let rc = unsafe { esp_idf_svc::sys::esp_wifi_sta_get_ap_info(&mut ap_info) };
    (rc == esp_idf_svc::sys::ESP_OK).then_some(ap_info.rssi)
}

pub(crate) fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
