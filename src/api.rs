//! HTTP surface of the booking service: request parsing, basic auth, routes.
//!
//! Routes:
//!   GET  /health       no auth
//!   POST /api/book     start a booking job in the background
//!   GET  /api/status   current BookingStatus
//!   GET  /api/config   booking plan on disk
//!   POST /api/config   replace the booking plan

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use booking_core::{
    BookingError, BookingJob, BookingPlan, BookingRequest, BookingResult, BookingService, Credentials,
    EngineSettings, StartedJob,
};
use logger::{now_iso, send_ntfy_alert, BookingFinishedEvent, BookingStartedEvent, EventLogger};
use serde_json::{json, Value};
use tracing::{info, warn};

pub const MAX_REQUEST_BYTES: usize = 64 * 1024;

// ── Wire ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method:  String,
    pub path:    String,
    /// Lowercased names.
    pub headers: HashMap<String, String>,
    pub body:    Vec<u8>,
}

/// Head length (including the blank line) once the full head has arrived.
pub fn head_len(raw: &[u8]) -> Option<usize> {
    raw.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

/// Parses a complete request. `None` while the head or the announced body
/// is still incomplete, or when the request line is malformed.
pub fn parse_request(raw: &[u8]) -> Option<HttpRequest> {
    let head_end = head_len(raw)?;
    let head = String::from_utf8_lossy(&raw[..head_end]);
    let mut lines = head.split("\r\n");

    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let target = request_line.next()?;
    let path = target.split('?').next().unwrap_or(target).to_string();

    let headers: HashMap<String, String> = lines
        .filter_map(|l| l.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();

    let content_length = headers
        .get("content-length")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0);
    let body = raw.get(head_end..head_end + content_length)?.to_vec();

    Some(HttpRequest { method, path, headers, body })
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status:         u16,
    pub body:           Value,
    pub ask_basic_auth: bool,
}

impl HttpResponse {
    pub fn json(status: u16, body: Value) -> Self {
        Self { status, body, ask_basic_auth: false }
    }

    pub fn detail(status: u16, detail: impl Into<String>) -> Self {
        Self::json(status, json!({ "detail": detail.into() }))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let reason = match self.status {
            200 => "OK",
            400 => "Bad Request",
            401 => "Unauthorized",
            404 => "Not Found",
            409 => "Conflict",
            413 => "Payload Too Large",
            _ => "Internal Server Error",
        };
        let body = serde_json::to_string_pretty(&self.body).unwrap_or_else(|_| "{}".to_string());
        let auth = if self.ask_basic_auth { "WWW-Authenticate: Basic\r\n" } else { "" };
        format!(
            "HTTP/1.1 {} {reason}\r\nContent-Type: application/json; charset=utf-8\r\n{auth}Content-Length: {}\r\nConnection: close\r\n\r\n{}",
            self.status,
            body.len(),
            body
        )
        .into_bytes()
    }
}

// ── Auth ─────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct ApiAuth {
    pub username: String,
    pub password: String,
}

impl ApiAuth {
    /// `API_USERNAME` + `API_PASSWORD`; `None` unless both are set.
    pub fn from_env() -> Option<Self> {
        let username = std::env::var("API_USERNAME").ok().filter(|v| !v.is_empty())?;
        let password = std::env::var("API_PASSWORD").ok().filter(|v| !v.is_empty())?;
        Some(Self { username, password })
    }

    pub fn accepts(&self, header: Option<&String>) -> bool {
        let Some((user, pass)) = header.and_then(|h| decode_basic(h)) else {
            return false;
        };
        // both compared, no short circuit
        let user_ok = constant_time_eq(user.as_bytes(), self.username.as_bytes());
        let pass_ok = constant_time_eq(pass.as_bytes(), self.password.as_bytes());
        user_ok & pass_ok
    }
}

fn decode_basic(header: &str) -> Option<(String, String)> {
    let encoded = header.strip_prefix("Basic ").or_else(|| header.strip_prefix("basic "))?;
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let text = String::from_utf8(decoded).ok()?;
    let (user, pass) = text.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let len_diff = a.len() ^ b.len();
    let byte_diff = a
        .iter()
        .zip(b.iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y));
    len_diff == 0 && byte_diff == 0
}

// ── Routes ───────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub service:     BookingService,
    pub settings:    EngineSettings,
    pub config_path: PathBuf,
    pub api_auth:    Option<ApiAuth>,
    pub booker:      Option<Credentials>,
    pub logger:      Arc<EventLogger>,
    pub ntfy_topic:  Option<String>,
}

pub fn handle(state: &AppState, req: &HttpRequest) -> HttpResponse {
    if (req.method.as_str(), req.path.as_str()) == ("GET", "/health") {
        return HttpResponse::json(200, json!({ "status": "healthy", "service": "padel-booker" }));
    }

    let Some(auth) = &state.api_auth else {
        return HttpResponse::detail(
            500,
            "API authentication not configured - API_USERNAME and API_PASSWORD environment variables must be set",
        );
    };
    if !auth.accepts(req.headers.get("authorization")) {
        let mut resp = HttpResponse::detail(401, "Incorrect username or password");
        resp.ask_basic_auth = true;
        return resp;
    }

    match (req.method.as_str(), req.path.as_str()) {
        ("POST", "/api/book") => book(state, &req.body),
        ("GET", "/api/status") => match serde_json::to_value(state.service.status()) {
            Ok(v) => HttpResponse::json(200, v),
            Err(e) => HttpResponse::detail(500, e.to_string()),
        },
        ("GET", "/api/config") => get_config(state),
        ("POST", "/api/config") => put_config(state, &req.body),
        _ => HttpResponse::detail(404, "Not Found"),
    }
}

fn book(state: &AppState, body: &[u8]) -> HttpResponse {
    if state.service.is_running() {
        return HttpResponse::detail(409, "Booking already in progress");
    }

    let request: BookingRequest = match serde_json::from_slice(body) {
        Ok(r) => r,
        Err(e) => return HttpResponse::detail(400, format!("invalid booking request: {e}")),
    };
    if let Err(e) = request.validate() {
        return HttpResponse::detail(400, e.to_string());
    }

    let plan = match BookingPlan::load(&state.config_path).and_then(|p| p.validate().map(|_| p)) {
        Ok(p) => p,
        Err(e) => {
            warn!("No usable booking configuration: {}", e);
            return HttpResponse::detail(400, format!("No configuration found: {e}"));
        }
    };

    let Some(credentials) = state.booker.clone() else {
        return HttpResponse::detail(500, "BOOKER_USERNAME and BOOKER_PASSWORD environment variables must be set");
    };

    let started = BookingStartedEvent {
        ts:             now_iso(),
        event:          BookingStartedEvent::EVENT,
        trigger:        "api".into(),
        booking_date:   plan.booking_date.to_string(),
        start_time:     plan.start_time.format("%H:%M").to_string(),
        duration_hours: plan.duration_hours,
        device_mode:    state.settings.device_mode.to_string(),
        dry_run:        !state.settings.enable_booking,
        candidates:     request.candidates.len(),
    };

    let job = BookingJob {
        plan,
        credentials,
        request,
        settings: state.settings.clone(),
    };

    match state.service.start(job) {
        Ok(StartedJob { started_at, handle }) => {
            state.logger.log_or_warn(&started);
            info!("🎾 Booking started for {} at {}", started.booking_date, started.start_time);

            let logger = state.logger.clone();
            let topic = state.ntfy_topic.clone();
            tokio::spawn(async move {
                let result = match handle.await {
                    Ok(r) => r,
                    Err(e) => BookingError::Unexpected(e.to_string()).into(),
                };
                report_outcome(&logger, topic.as_deref(), &result, started_at).await;
            });

            HttpResponse::json(
                200,
                json!({
                    "status": "started",
                    "message": "Booking process started",
                    "started_at": started_at,
                }),
            )
        }
        Err(BookingError::AlreadyRunning) => HttpResponse::detail(409, "Booking already in progress"),
        Err(e) => HttpResponse::detail(500, e.to_string()),
    }
}

/// Journal entry + optional push for a finished job.
pub async fn report_outcome(
    logger: &EventLogger,
    topic: Option<&str>,
    result: &BookingResult,
    started_at: chrono::DateTime<chrono::Utc>,
) {
    let (players, booked_date) = match result {
        BookingResult::Success { players, booked_date, .. } => (players.clone(), Some(booked_date.to_string())),
        BookingResult::Failure { .. } => (Vec::new(), None),
    };
    logger.log_or_warn(&BookingFinishedEvent {
        ts: now_iso(),
        event: BookingFinishedEvent::EVENT,
        success: result.is_success(),
        message: result.message().to_string(),
        booked_date,
        players,
        elapsed_ms: (chrono::Utc::now() - started_at).num_milliseconds(),
    });

    if let Some(topic) = topic {
        let title = if result.is_success() { "🎾 Padel booked" } else { "❌ Padel booking failed" };
        send_ntfy_alert(topic, result.message(), title).await;
    }
}

fn get_config(state: &AppState) -> HttpResponse {
    if !state.config_path.exists() {
        return HttpResponse::json(200, json!({}));
    }
    match BookingPlan::load(&state.config_path).and_then(|p| {
        serde_json::to_value(p).map_err(|e| BookingError::Configuration(e.to_string()))
    }) {
        Ok(v) => HttpResponse::json(200, v),
        Err(e) => HttpResponse::detail(500, e.to_string()),
    }
}

fn put_config(state: &AppState, body: &[u8]) -> HttpResponse {
    let plan = match std::str::from_utf8(body)
        .map_err(|e| e.to_string())
        .and_then(|raw| BookingPlan::from_json(raw).map_err(|e| e.to_string()))
    {
        Ok(p) => p,
        Err(e) => return HttpResponse::detail(400, format!("invalid configuration: {e}")),
    };
    if let Err(e) = plan.validate() {
        return HttpResponse::detail(400, e.to_string());
    }
    match plan.save(&state.config_path) {
        Ok(()) => {
            info!("Booking plan updated: {} {}", plan.booking_date, plan.start_time.format("%H:%M"));
            HttpResponse::json(200, json!({ "status": "success", "message": "Configuration updated" }))
        }
        Err(e) => HttpResponse::detail(500, e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use booking_core::{BrowserError, BrowserSurface, DeviceMode, SessionLauncher};
    use std::sync::mpsc;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Blocks each launch until the gate opens (or closes), then fails.
    struct GatedLauncher {
        gate: Mutex<mpsc::Receiver<()>>,
    }

    impl SessionLauncher for GatedLauncher {
        fn launch(&self, _mode: DeviceMode) -> Result<Box<dyn BrowserSurface>, BrowserError> {
            let _ = self.gate.lock().unwrap().recv_timeout(Duration::from_secs(5));
            Err(BrowserError::Session("no chrome in tests".into()))
        }
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("padel-api-{}-{name}", std::process::id()));
        std::fs::remove_dir_all(&dir).ok();
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn state(name: &str) -> (AppState, mpsc::Sender<()>) {
        let (tx, rx) = mpsc::channel();
        let dir = scratch_dir(name);
        let state = AppState {
            service:     BookingService::new(Arc::new(GatedLauncher { gate: Mutex::new(rx) })),
            settings:    EngineSettings::default(),
            config_path: dir.join("data").join("config.json"),
            api_auth:    Some(ApiAuth { username: "admin".into(), password: "s3cret".into() }),
            booker:      Some(Credentials { username: "erik".into(), password: "geheim".into() }),
            logger:      Arc::new(EventLogger::new(dir.join("logs"))),
            ntfy_topic:  None,
        };
        (state, tx)
    }

    fn request(method: &str, path: &str, body: &str, auth: Option<(&str, &str)>) -> HttpRequest {
        let mut headers = HashMap::new();
        if let Some((u, p)) = auth {
            headers.insert("authorization".to_string(), format!("Basic {}", STANDARD.encode(format!("{u}:{p}"))));
        }
        HttpRequest {
            method:  method.into(),
            path:    path.into(),
            headers,
            body:    body.as_bytes().to_vec(),
        }
    }

    const ADMIN: Option<(&str, &str)> = Some(("admin", "s3cret"));
    const PLAN: &str = r#"{"login_url":"https://club.example/auth/login","booking_date":"2025-11-28","start_time":"21:00","duration_hours":1.5}"#;
    const BOOK: &str = r#"{"booker_first_name":"Erik","player_candidates":["Anna","Bram","Cas"]}"#;

    #[test]
    fn parses_request_with_body() {
        let raw = b"POST /api/book?x=1 HTTP/1.1\r\nHost: x\r\nContent-Length: 2\r\nAuthorization: Basic abc\r\n\r\n{}";
        let req = parse_request(raw).unwrap();
        assert_eq!(req.method, "POST");
        assert_eq!(req.path, "/api/book");
        assert_eq!(req.headers.get("authorization").map(String::as_str), Some("Basic abc"));
        assert_eq!(req.body, b"{}");
    }

    #[test]
    fn incomplete_request_is_not_parsed() {
        assert!(parse_request(b"GET /health HTTP/1.1\r\nHost: x\r\n").is_none());
        assert!(parse_request(b"POST /api/book HTTP/1.1\r\nContent-Length: 10\r\n\r\n{}").is_none());
    }

    #[test]
    fn response_carries_auth_challenge() {
        let mut resp = HttpResponse::detail(401, "Incorrect username or password");
        resp.ask_basic_auth = true;
        let text = String::from_utf8(resp.to_bytes()).unwrap();
        assert!(text.starts_with("HTTP/1.1 401 Unauthorized\r\n"));
        assert!(text.contains("WWW-Authenticate: Basic\r\n"));
    }

    #[test]
    fn basic_auth_checks_both_fields() {
        let auth = ApiAuth { username: "admin".into(), password: "s3cret".into() };
        let header = |u: &str, p: &str| format!("Basic {}", STANDARD.encode(format!("{u}:{p}")));

        assert!(auth.accepts(Some(&header("admin", "s3cret"))));
        assert!(!auth.accepts(Some(&header("admin", "s3cre"))));
        assert!(!auth.accepts(Some(&header("root", "s3cret"))));
        assert!(!auth.accepts(Some(&"Bearer xyz".to_string())));
        assert!(!auth.accepts(None));
    }

    #[tokio::test]
    async fn health_needs_no_auth() {
        let (state, _gate) = state("health");
        let resp = handle(&state, &request("GET", "/health", "", None));
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body["status"], "healthy");
    }

    #[tokio::test]
    async fn protected_routes_need_auth() {
        let (mut state, _gate) = state("auth");
        assert_eq!(handle(&state, &request("GET", "/api/status", "", None)).status, 401);
        assert_eq!(handle(&state, &request("GET", "/api/status", "", Some(("admin", "x")))).status, 401);

        state.api_auth = None;
        assert_eq!(handle(&state, &request("GET", "/api/status", "", ADMIN)).status, 500);
    }

    #[tokio::test]
    async fn config_round_trip() {
        let (state, _gate) = state("config");
        assert_eq!(handle(&state, &request("GET", "/api/config", "", ADMIN)).body, json!({}));

        let resp = handle(&state, &request("POST", "/api/config", PLAN, ADMIN));
        assert_eq!(resp.status, 200, "{:?}", resp.body);

        let resp = handle(&state, &request("GET", "/api/config", "", ADMIN));
        assert_eq!(resp.body["start_time"], "21:00");
        assert_eq!(resp.body["booking_date"], "2025-11-28");

        let bad = r#"{"login_url":"x","booking_date":"2025-11-28","start_time":"21:00","duration_hours":0}"#;
        assert_eq!(handle(&state, &request("POST", "/api/config", bad, ADMIN)).status, 400);
    }

    #[tokio::test]
    async fn book_rejects_bad_input() {
        let (mut state, _gate) = state("book-input");
        let empty = r#"{"booker_first_name":"","player_candidates":[]}"#;
        assert_eq!(handle(&state, &request("POST", "/api/book", empty, ADMIN)).status, 400);
        assert_eq!(handle(&state, &request("POST", "/api/book", "nope", ADMIN)).status, 400);

        // no config file yet
        assert_eq!(handle(&state, &request("POST", "/api/book", BOOK, ADMIN)).status, 400);

        handle(&state, &request("POST", "/api/config", PLAN, ADMIN));
        state.booker = None;
        assert_eq!(handle(&state, &request("POST", "/api/book", BOOK, ADMIN)).status, 500);
        assert!(!state.service.is_running());
    }

    #[tokio::test]
    async fn second_book_while_running_conflicts() {
        let (state, gate) = state("book-conflict");
        handle(&state, &request("POST", "/api/config", PLAN, ADMIN));

        let first = handle(&state, &request("POST", "/api/book", BOOK, ADMIN));
        assert_eq!(first.status, 200);
        assert_eq!(first.body["status"], "started");

        let second = handle(&state, &request("POST", "/api/book", BOOK, ADMIN));
        assert_eq!(second.status, 409);

        let status = handle(&state, &request("GET", "/api/status", "", ADMIN));
        assert_eq!(status.body["running"], true);

        gate.send(()).unwrap();
        for _ in 0..100 {
            if !state.service.is_running() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let status = handle(&state, &request("GET", "/api/status", "", ADMIN));
        assert_eq!(status.body["running"], false);
        assert_eq!(status.body["result"]["status"], "error");
    }
}
