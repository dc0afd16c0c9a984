use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::{HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;

pub const REMAINING_HEADER: &str = "x-ratelimit-remaining";
pub const RETRY_AFTER_HEADER: &str = "retry-after";
pub const SERVER_KEY_HEADER: &str = "server-key";

/// Behaviour of the emulated API.
#[derive(Clone, Debug)]
pub struct MockConfig {
    /// When set, requests whose `Server-Key` differs get 403.
    pub server_key: Option<String>,
    /// Calls allowed per endpoint per window.
    pub limit: u32,
    pub window: Duration,
    pub server_name: String,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            server_key: None,
            limit: 35,
            window: Duration::from_secs(1),
            server_name: "Test".to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ServerStatus {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "OwnerId")]
    pub owner_id: u64,
    #[serde(rename = "CurrentPlayers")]
    pub current_players: u32,
    #[serde(rename = "MaxPlayers")]
    pub max_players: u32,
    #[serde(rename = "JoinKey")]
    pub join_key: String,
}

#[derive(Deserialize)]
pub struct CommandInput {
    pub command: String,
}

/// One request as the server saw it.
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
    pub at: Instant,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug)]
struct Window {
    started: Instant,
    used: u32,
}

/// Outcome of charging one call against an endpoint's window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Charge {
    pub allowed: bool,
    pub remaining: u32,
    /// Whole seconds until the window resets, present once the budget is spent.
    pub retry_after: Option<u64>,
}

#[derive(Debug, Default)]
struct Inner {
    windows: HashMap<String, Window>,
    log: Vec<RecordedRequest>,
}

#[derive(Clone, Debug)]
pub struct MockState {
    config: Arc<MockConfig>,
    inner: Arc<Mutex<Inner>>,
}

impl MockState {
    pub fn new(config: MockConfig) -> Self {
        Self {
            config: Arc::new(config),
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    pub fn config(&self) -> &MockConfig {
        &self.config
    }

    /// Every request received so far, in arrival order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.inner.lock().log.clone()
    }

    /// Charge one call to `endpoint` at `now` under a fixed-window budget.
    pub fn charge(&self, endpoint: &str, now: Instant) -> Charge {
        let mut inner = self.inner.lock();
        let window = inner
            .windows
            .entry(endpoint.to_string())
            .or_insert(Window { started: now, used: 0 });
        if now.duration_since(window.started) >= self.config.window {
            window.started = now;
            window.used = 0;
        }

        let allowed = window.used < self.config.limit;
        if allowed {
            window.used += 1;
        }
        let remaining = self.config.limit.saturating_sub(window.used);
        let retry_after = (remaining == 0).then(|| {
            let left = self.config.window.saturating_sub(now.duration_since(window.started));
            left.as_millis().div_ceil(1000) as u64
        });

        Charge {
            allowed,
            remaining,
            retry_after,
        }
    }

    fn record(&self, request: RecordedRequest) {
        self.inner.lock().log.push(request);
    }
}

pub fn app(state: MockState) -> Router {
    let v1 = Router::new()
        .route("/server", get(server_status))
        .route("/server/players", get(players))
        .route("/server/command", post(command));

    Router::new()
        .nest("/v1", v1)
        .layer(middleware::from_fn_with_state(state.clone(), gate))
        .with_state(state)
}

pub async fn run(listener: TcpListener, state: MockState) -> Result<(), std::io::Error> {
    axum::serve(listener, app(state)).await
}

/// Records the request, applies the per-endpoint budget and the key check,
/// and stamps rate-limit headers on whatever goes back.
async fn gate(State(state): State<MockState>, request: Request, next: Next) -> Response {
    let now = Instant::now();
    let (parts, body) = request.into_parts();
    let bytes = match to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };

    let path = parts.uri.path().to_string();
    state.record(RecordedRequest {
        method: parts.method.to_string(),
        path: path.clone(),
        headers: parts
            .headers
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
            .collect(),
        body: String::from_utf8_lossy(&bytes).into_owned(),
        at: now,
    });

    let charge = state.charge(&path, now);
    let mut response = if !charge.allowed {
        tracing::info!(%path, "rate limited");
        (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({ "message": "You are being rate limited!", "retry_after": charge.retry_after })),
        )
            .into_response()
    } else if !key_matches(&state, &parts.headers) {
        (StatusCode::FORBIDDEN, Json("Invalid key")).into_response()
    } else {
        next.run(Request::from_parts(parts, Body::from(bytes))).await
    };

    let headers = response.headers_mut();
    headers.insert(REMAINING_HEADER, HeaderValue::from(charge.remaining));
    if let Some(seconds) = charge.retry_after {
        headers.insert(RETRY_AFTER_HEADER, HeaderValue::from(seconds));
    }
    response
}

fn key_matches(state: &MockState, headers: &axum::http::HeaderMap) -> bool {
    match &state.config.server_key {
        None => true,
        Some(expected) => headers
            .get(SERVER_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|got| got == expected),
    }
}

async fn server_status(State(state): State<MockState>) -> Json<ServerStatus> {
    Json(ServerStatus {
        name: state.config.server_name.clone(),
        owner_id: 1,
        current_players: 0,
        max_players: 40,
        join_key: "mock".to_string(),
    })
}

async fn players() -> Json<Vec<serde_json::Value>> {
    Json(vec![json!({ "Player": "Roblox:1", "Permission": "Server Owner", "Team": "Civilian" })])
}

async fn command(Json(input): Json<CommandInput>) -> Result<Json<serde_json::Value>, StatusCode> {
    if input.command.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    Ok(Json(json!({ "message": "Success" })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(limit: u32, window: Duration) -> MockState {
        MockState::new(MockConfig {
            limit,
            window,
            ..MockConfig::default()
        })
    }

    #[test]
    fn server_status_uses_api_field_names() {
        let status = ServerStatus {
            name: "Test".to_string(),
            owner_id: 1,
            current_players: 2,
            max_players: 40,
            join_key: "abc".to_string(),
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["Name"], "Test");
        assert_eq!(json["MaxPlayers"], 40);
    }

    #[test]
    fn budget_counts_down_then_denies() {
        let state = state(2, Duration::from_secs(10));
        let now = Instant::now();

        let first = state.charge("/v1/server", now);
        assert!(first.allowed);
        assert_eq!(first.remaining, 1);
        assert_eq!(first.retry_after, None);

        let second = state.charge("/v1/server", now);
        assert!(second.allowed);
        assert_eq!(second.remaining, 0);
        assert_eq!(second.retry_after, Some(10));

        let third = state.charge("/v1/server", now + Duration::from_millis(2500));
        assert!(!third.allowed);
        assert_eq!(third.retry_after, Some(8));
    }

    #[test]
    fn window_resets_after_elapsing() {
        let state = state(1, Duration::from_secs(1));
        let now = Instant::now();
        assert!(state.charge("/v1/server", now).allowed);
        assert!(!state.charge("/v1/server", now).allowed);
        assert!(state.charge("/v1/server", now + Duration::from_secs(1)).allowed);
    }

    #[test]
    fn endpoints_have_separate_budgets() {
        let state = state(1, Duration::from_secs(60));
        let now = Instant::now();
        assert!(state.charge("/v1/server", now).allowed);
        assert!(state.charge("/v1/server/players", now).allowed);
    }

    #[test]
    fn command_input_requires_command() {
        let result: Result<CommandInput, _> = serde_json::from_str(r#"{}"#);
        assert!(result.is_err());
    }
}
