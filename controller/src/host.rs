use std::{collections::HashMap, io::ErrorKind, net::SocketAddr, path::PathBuf, time::Duration};

use anyhow::Context;
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use chrono_tz::Tz;
use thiserror::Error;
use tokio::{
    net::TcpListener,
    sync::{
        mpsc::{self, error::TryRecvError},
        oneshot,
    },
    time::{Instant, MissedTickBehavior},
};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use astro_common::{
    overview::format_local_time, Command, CommandReply, ErrorBody, IrDiagnostics, NetworkMode,
    RuntimeConfig, Session, SessionState, ShotAction, SircCode, StartRequest, SuccessBody,
    SystemOverview, TimeSync, MAX_REQUEST_BODY,
};

const INDEX_HTML: &str = include_str!("../web/index.html");
const COMMAND_QUEUE_DEPTH: usize = 16;
const SHOT_SETTLE_MS: u64 = 100;
const DEFAULT_HTTP_PORT: u16 = 8080;

enum ControlRequest {
    Session {
        command: Command,
        reply: oneshot::Sender<CommandReply>,
    },
    IrDiagnostics {
        reply: oneshot::Sender<IrDiagnostics>,
    },
}

#[derive(Debug, Error)]
#[error("control loop is not running")]
struct ControlUnavailable;

#[derive(Clone)]
struct AppState {
    control: mpsc::Sender<ControlRequest>,
    booted: Instant,
    timezone: Tz,
    listen_addr: SocketAddr,
    ir_protocol: String,
}

/// Stands in for the RMT transmitter: logs each shot and blocks for as long
/// as the real pulse train would.
struct SimulatedEmitter {
    code: SircCode,
    frame_count: u8,
    clock: Instant,
    sent_shots: u64,
    last_send_ms: Option<u64>,
}

impl SimulatedEmitter {
    fn new(code: SircCode, repeats: u8, clock: Instant) -> Self {
        Self {
            code,
            frame_count: repeats.saturating_add(1),
            clock,
            sent_shots: 0,
            last_send_ms: None,
        }
    }

    async fn fire(&mut self) {
        let frame = Duration::from_micros(self.code.frame_duration_us());
        let gap = Duration::from_millis(self.code.repeat_gap_ms());

        for index in 0..self.frame_count {
            tokio::time::sleep(frame).await;
            if index + 1 < self.frame_count {
                tokio::time::sleep(gap).await;
            }
        }

        self.sent_shots = self.sent_shots.saturating_add(1);
        self.last_send_ms = Some(elapsed_ms(self.clock));
        info!(
            "simulated SIRC frame x{}: address={:#x} command={:#x} bits={}",
            self.frame_count,
            self.code.address(),
            self.code.command(),
            self.code.bits()
        );

        tokio::time::sleep(Duration::from_millis(SHOT_SETTLE_MS)).await;
    }

    fn diagnostics(&self) -> IrDiagnostics {
        IrDiagnostics {
            enabled: true,
            protocol: format!("Sony SIRC {}-bit (simulated)", self.code.bits()),
            carrier_khz: astro_common::sirc::SIRC_CARRIER_KHZ,
            frame_count: self.frame_count,
            repeat_gap_ms: self.code.repeat_gap_ms(),
            last_send_ms: self.last_send_ms,
            sent_shots: self.sent_shots,
            failed_shots: 0,
            last_error: None,
        }
    }
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let file_config = load_runtime_config().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config: {err:#}");
        None
    });
    let port = resolve_http_port(
        std::env::var("ASTRO_HTTP_PORT").ok().as_deref(),
        file_config.as_ref().map(|runtime| runtime.network.http_port),
    );
    let mut runtime = file_config.unwrap_or_default();
    runtime.sanitize();

    let code = SircCode::from_config(&runtime.camera).context("invalid camera remote code")?;
    let timezone = runtime.time.timezone.parse::<Tz>().unwrap_or_else(|_| {
        warn!("unknown timezone `{}`, using UTC", runtime.time.timezone);
        Tz::UTC
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    let state = spawn_controller(&runtime, code, timezone, addr);
    info!(
        "session config: interval {}ms, max {} minutes, SIRC {:#x}/{:#x}",
        runtime.session.interval_ms,
        runtime.session.max_session_minutes,
        code.address(),
        code.command()
    );

    info!("astro controller listening on http://{addr}");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutting down");
            }
        })
        .await?;
    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handle_index))
        .route("/api/status", get(handle_get_status))
        .route("/api/ir/diagnostics", get(handle_get_ir_diagnostics))
        .route("/start", post(handle_start))
        .route("/stop", post(handle_stop))
        .route("/shot", post(handle_shot))
        .route("/burst", post(handle_burst))
        .route("/system", get(handle_system))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn spawn_controller(
    runtime: &RuntimeConfig,
    code: SircCode,
    timezone: Tz,
    listen_addr: SocketAddr,
) -> AppState {
    let (control, requests) = mpsc::channel(COMMAND_QUEUE_DEPTH);
    let booted = Instant::now();

    let session = Session::new(runtime.session.clone());
    let emitter = SimulatedEmitter::new(code, runtime.camera.repeats, booted);
    spawn_control_loop(session, emitter, requests, booted);

    AppState {
        control,
        booted,
        timezone,
        listen_addr,
        ir_protocol: format!("Sony SIRC {}-bit", code.bits()),
    }
}

fn spawn_control_loop(
    mut session: Session,
    mut emitter: SimulatedEmitter,
    mut requests: mpsc::Receiver<ControlRequest>,
    clock: Instant,
) {
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(Duration::from_millis(session.config.loop_interval_ms));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            loop {
                match requests.try_recv() {
                    Ok(request) => {
                        handle_control_request(&mut session, &mut emitter, request, clock).await
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        info!("control channel closed, stopping control loop");
                        return;
                    }
                }
            }

            let was_running = session.state() == SessionState::Running;
            let actions = session.tick(elapsed_ms(clock));
            execute_shot_actions(&mut emitter, actions).await;

            if was_running && session.state() == SessionState::Completed {
                info!("session completed: {} shots", session.total_shots());
            }
        }
    });
}

async fn handle_control_request(
    session: &mut Session,
    emitter: &mut SimulatedEmitter,
    request: ControlRequest,
    clock: Instant,
) {
    match request {
        ControlRequest::Session { command, reply } => {
            let (outcome, actions) = session.handle_command(command, elapsed_ms(clock));
            log_command(session, command, &outcome);
            execute_shot_actions(emitter, actions).await;
            // The requester may have gone away while the shots were sent.
            let _ = reply.send(outcome);
        }
        ControlRequest::IrDiagnostics { reply } => {
            let _ = reply.send(emitter.diagnostics());
        }
    }
}

fn log_command(session: &Session, command: Command, outcome: &CommandReply) {
    match (command, outcome) {
        (_, CommandReply::Rejected(err)) => warn!("{command:?} rejected: {err}"),
        (Command::Start { minutes }, _) => info!(
            "session started: {minutes} minutes, {} shots",
            session.total_shots()
        ),
        (Command::Stop, _) => info!("stop requested, session is {}", session.state().as_str()),
        (Command::Burst { .. }, _) => info!("burst triggered"),
        _ => {}
    }
}

async fn execute_shot_actions(emitter: &mut SimulatedEmitter, actions: Vec<ShotAction>) {
    for action in actions {
        match action {
            ShotAction::Delay(ms) => tokio::time::sleep(Duration::from_millis(ms)).await,
            ShotAction::Fire(kind) => {
                info!("taking {kind}");
                emitter.fire().await;
            }
        }
    }
}

async fn dispatch(state: &AppState, command: Command) -> Result<CommandReply, ControlUnavailable> {
    let (reply, response) = oneshot::channel();
    state
        .control
        .send(ControlRequest::Session { command, reply })
        .await
        .map_err(|_| ControlUnavailable)?;
    response.await.map_err(|_| ControlUnavailable)
}

fn command_response(result: Result<CommandReply, ControlUnavailable>) -> Response {
    match result {
        Ok(CommandReply::Done) => Json(SuccessBody::ok()).into_response(),
        Ok(CommandReply::Status(snapshot)) => Json(snapshot.status()).into_response(),
        Ok(CommandReply::Rejected(err)) => error_response(StatusCode::BAD_REQUEST, &err.to_string()),
        Err(err) => {
            warn!("{err}");
            error_response(StatusCode::SERVICE_UNAVAILABLE, "Controller unavailable")
        }
    }
}

async fn handle_index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn handle_get_status(State(state): State<AppState>) -> Response {
    command_response(dispatch(&state, Command::Status).await)
}

async fn handle_start(State(state): State<AppState>, body: Bytes) -> Response {
    if body.len() > MAX_REQUEST_BODY {
        return error_response(StatusCode::BAD_REQUEST, "Request body too large");
    }
    let Ok(request) = StartRequest::from_json(&body) else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid request body");
    };

    command_response(
        dispatch(
            &state,
            Command::Start {
                minutes: request.minutes,
            },
        )
        .await,
    )
}

async fn handle_stop(State(state): State<AppState>) -> Response {
    command_response(dispatch(&state, Command::Stop).await)
}

async fn handle_shot(State(state): State<AppState>) -> Response {
    command_response(dispatch(&state, Command::SingleShot).await)
}

async fn handle_burst(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let count = match params.get("count") {
        None => None,
        Some(value) => match value.parse::<u32>() {
            Ok(count) => Some(count),
            Err(_) => return error_response(StatusCode::BAD_REQUEST, "Invalid burst count"),
        },
    };

    command_response(dispatch(&state, Command::Burst { count }).await)
}

async fn handle_get_ir_diagnostics(State(state): State<AppState>) -> Response {
    match ir_diagnostics(&state).await {
        Ok(diagnostics) => Json(diagnostics).into_response(),
        Err(err) => {
            warn!("{err}");
            error_response(StatusCode::SERVICE_UNAVAILABLE, "Controller unavailable")
        }
    }
}

async fn handle_system(State(state): State<AppState>) -> Response {
    let session = match dispatch(&state, Command::Status).await {
        Ok(CommandReply::Status(snapshot)) => snapshot,
        Ok(other) => {
            warn!("unexpected reply to status request: {other:?}");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Unexpected reply");
        }
        Err(err) => {
            warn!("{err}");
            return error_response(StatusCode::SERVICE_UNAVAILABLE, "Controller unavailable");
        }
    };
    let ir_enabled = ir_diagnostics(&state)
        .await
        .map(|diagnostics| diagnostics.enabled)
        .unwrap_or(false);

    let overview = SystemOverview {
        platform: "Host simulator".to_string(),
        ip: state.listen_addr.ip().to_string(),
        free_heap_kb: None,
        network: NetworkMode::Host,
        time: TimeSync::Synced {
            local_time: Some(format_local_time(&Utc::now().with_timezone(&state.timezone))),
        },
        session,
        ir_protocol: state.ir_protocol.clone(),
        ir_enabled,
        http_port: state.listen_addr.port(),
        uptime_s: state.booted.elapsed().as_secs(),
    };

    Html(overview.render_html()).into_response()
}

async fn ir_diagnostics(state: &AppState) -> Result<IrDiagnostics, ControlUnavailable> {
    let (reply, response) = oneshot::channel();
    state
        .control
        .send(ControlRequest::IrDiagnostics { reply })
        .await
        .map_err(|_| ControlUnavailable)?;
    response.await.map_err(|_| ControlUnavailable)
}

/// `None` when no config file is set or the file does not exist.
async fn load_runtime_config() -> anyhow::Result<Option<RuntimeConfig>> {
    let Ok(path) = std::env::var("ASTRO_CONFIG") else {
        return Ok(None);
    };
    let path = PathBuf::from(path);

    match tokio::fs::read(&path).await {
        Ok(raw) => serde_json::from_slice::<RuntimeConfig>(&raw)
            .map(Some)
            .with_context(|| format!("invalid runtime config in {}", path.display())),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            warn!("{} not found, using defaults", path.display());
            Ok(None)
        }
        Err(err) => Err(err).with_context(|| format!("failed to read {}", path.display())),
    }
}

/// `$ASTRO_HTTP_PORT` wins over the config file's port, which wins over the
/// host default. The stock config port (80) only applies on the device.
fn resolve_http_port(env_port: Option<&str>, file_port: Option<u16>) -> u16 {
    env_port
        .and_then(|value| value.trim().parse::<u16>().ok())
        .filter(|&port| port != 0)
        .or(file_port.filter(|&port| port != 0))
        .unwrap_or(DEFAULT_HTTP_PORT)
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

fn elapsed_ms(clock: Instant) -> u64 {
    clock
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use axum::body::to_bytes;
    use serde_json::Value;

    use super::*;

    fn test_state() -> AppState {
        let runtime = RuntimeConfig::default();
        let code = SircCode::from_config(&runtime.camera).unwrap();
        spawn_controller(&runtime, code, Tz::UTC, SocketAddr::from(([127, 0, 0, 1], 8080)))
    }

    async fn body_json(response: Response) -> Value {
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    async fn status(state: &AppState) -> Value {
        body_json(handle_get_status(State(state.clone())).await).await
    }

    async fn start(state: &AppState, body: &'static [u8]) -> Response {
        handle_start(State(state.clone()), Bytes::from_static(body)).await
    }

    fn burst_query(count: &str) -> Query<HashMap<String, String>> {
        Query(HashMap::from([("count".to_string(), count.to_string())]))
    }

    #[tokio::test(start_paused = true)]
    async fn start_rejects_second_session_until_stopped() {
        let state = test_state();

        let response = start(&state, br#"{"minutes":1}"#).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["success"], true);

        let snapshot = status(&state).await;
        assert_eq!(snapshot["state"], 1);
        assert_eq!(snapshot["total"], 6);
        assert_eq!(snapshot["current"], 0);

        let response = start(&state, br#"{"minutes":5}"#).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "Session already running");

        let response = handle_stop(State(state.clone())).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(status(&state).await["state"], 0);

        let response = start(&state, br#"{"minutes":5}"#).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(status(&state).await["total"], 30);
    }

    #[tokio::test(start_paused = true)]
    async fn start_validates_body_and_duration() {
        let state = test_state();

        for body in [&br#"{"minutes":0}"#[..], b"{}", br#"{"minutes":481}"#] {
            let response = handle_start(State(state.clone()), Bytes::from_static(body)).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            assert_eq!(body_json(response).await["error"], "Invalid duration");
        }

        let response = start(&state, b"minutes=10").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "Invalid request body");

        assert_eq!(status(&state).await["state"], 0);
    }

    #[tokio::test(start_paused = true)]
    async fn start_rejects_oversized_body() {
        let state = test_state();
        let mut body = br#"{"minutes":1}"#.to_vec();
        body.resize(MAX_REQUEST_BODY + 1, b' ');

        let response = handle_start(State(state.clone()), Bytes::from(body)).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "Request body too large");
        assert_eq!(status(&state).await["state"], 0);
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_session_runs_to_completion() {
        let state = test_state();
        start(&state, br#"{"minutes":1}"#).await;

        tokio::time::sleep(Duration::from_secs(30)).await;
        let midway = status(&state).await;
        assert_eq!(midway["state"], 1);
        assert_eq!(midway["current"], 3);

        tokio::time::sleep(Duration::from_secs(60)).await;
        let done = status(&state).await;
        assert_eq!(done["state"], 3);
        assert_eq!(done["current"], 6);
        assert_eq!(done["remaining"], 0);

        let diagnostics = body_json(handle_get_ir_diagnostics(State(state.clone())).await).await;
        assert_eq!(diagnostics["sentShots"], 6);
        assert_eq!(diagnostics["frameCount"], 4);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_shots_do_not_touch_session() {
        let state = test_state();

        let response = handle_shot(State(state.clone())).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = handle_burst(State(state.clone()), burst_query("3")).await;
        assert_eq!(response.status(), StatusCode::OK);

        let snapshot = status(&state).await;
        assert_eq!(snapshot["state"], 0);
        assert_eq!(snapshot["current"], 0);

        let diagnostics = body_json(handle_get_ir_diagnostics(State(state.clone())).await).await;
        assert_eq!(diagnostics["sentShots"], 4);
    }

    #[tokio::test(start_paused = true)]
    async fn burst_rejects_bad_counts() {
        let state = test_state();

        for count in ["0", "51", "ten"] {
            let response = handle_burst(State(state.clone()), burst_query(count)).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            assert_eq!(body_json(response).await["error"], "Invalid burst count");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn system_page_reports_session() {
        let state = test_state();
        start(&state, br#"{"minutes":2}"#).await;

        let response = handle_system(State(state.clone())).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let html = String::from_utf8(body.to_vec()).unwrap();
        assert!(html.contains("Host simulator"));
        assert!(html.contains("<span class=\"status-warn\">Running</span>"));
        assert!(html.contains("Photos Taken:</strong> 0 / 12"));
        assert!(html.contains("Sony SIRC 20-bit"));
    }

    #[test]
    fn http_port_prefers_env_then_config_file() {
        assert_eq!(resolve_http_port(Some("9090"), Some(8081)), 9090);
        assert_eq!(resolve_http_port(None, Some(8081)), 8081);
        assert_eq!(resolve_http_port(Some("not-a-port"), Some(8081)), 8081);
        assert_eq!(resolve_http_port(Some("0"), None), DEFAULT_HTTP_PORT);
        assert_eq!(resolve_http_port(None, None), DEFAULT_HTTP_PORT);
    }
}
