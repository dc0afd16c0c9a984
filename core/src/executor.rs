//! Builds, executes and classifies a single outbound API call.
//!
//! # Design
//! Split the way a stateless client would be: `build_request` produces an
//! `HttpRequest`, `parse_response` classifies an `HttpResponse`, and
//! `execute` joins them around the transport and the rate-limit registry.
//! Credentials are read when a request is built, so a key change applies to
//! every dispatch after it.

use parking_lot::RwLock;

use crate::error::ApiError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse};
use crate::ratelimit::{parse_rate_limit_headers, RateLimitRegistry};
use crate::transport::Transport;

pub const SERVER_KEY_HEADER: &str = "Server-Key";
pub const AUTHORIZATION_HEADER: &str = "Authorization";

/// The two opaque keys attached to outbound calls. Empty strings count as unset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub global_key: Option<String>,
    pub server_key: Option<String>,
}

pub struct Executor {
    base_url: String,
    credentials: RwLock<Credentials>,
    transport: Box<dyn Transport>,
}

impl Executor {
    pub fn new(base_url: &str, transport: Box<dyn Transport>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials: RwLock::new(Credentials::default()),
            transport,
        }
    }

    pub fn set_global_key(&self, key: &str) {
        self.credentials.write().global_key = non_empty(key);
    }

    pub fn set_server_key(&self, key: &str) {
        self.credentials.write().server_key = non_empty(key);
    }

    pub fn credentials(&self) -> Credentials {
        self.credentials.read().clone()
    }

    pub fn build_request(&self, method: HttpMethod, endpoint: &str, body: Option<&str>) -> HttpRequest {
        let credentials = self.credentials.read();
        let mut headers = vec![("Content-Type".to_string(), "application/json".to_string())];
        if let Some(key) = &credentials.server_key {
            headers.push((SERVER_KEY_HEADER.to_string(), key.clone()));
        }
        if let Some(key) = &credentials.global_key {
            headers.push((AUTHORIZATION_HEADER.to_string(), key.clone()));
        }

        HttpRequest {
            method,
            path: format!("{}/{}", self.base_url, endpoint.trim_start_matches('/')),
            headers,
            body: body.map(str::to_string),
        }
    }

    /// 200 yields the raw body; anything else is an `Http` error.
    pub fn parse_response(&self, response: HttpResponse) -> Result<Vec<u8>, ApiError> {
        if response.status == 200 {
            return Ok(response.body);
        }
        Err(ApiError::Http {
            status: response.status,
            body: String::from_utf8_lossy(&response.body).into_owned(),
        })
    }

    /// Run one call and record its rate-limit headers under `endpoint`.
    ///
    /// The registry is updated for every response received, before the
    /// status is looked at. Transport failures leave it untouched.
    pub fn execute(
        &self,
        limits: &RateLimitRegistry,
        method: HttpMethod,
        endpoint: &str,
        body: Option<&str>,
    ) -> Result<Vec<u8>, ApiError> {
        let request = self.build_request(method, endpoint, body);
        let response = self.transport.execute(&request)?;

        let (remaining, retry_after) = parse_rate_limit_headers(&response);
        limits.record_limit(endpoint, remaining, retry_after);
        tracing::debug!(
            endpoint,
            status = response.status,
            remaining,
            retry_after_secs = retry_after.as_secs(),
            "response received"
        );

        self.parse_response(response)
    }
}

fn non_empty(key: &str) -> Option<String> {
    (!key.is_empty()).then(|| key.to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use parking_lot::Mutex;

    use super::*;

    fn executor() -> Executor {
        Executor::new("http://localhost:3000/v1/", Box::new(|_: &HttpRequest| -> Result<HttpResponse, ApiError> {
            Err(ApiError::Transport("offline".into()))
        }))
    }

    fn responding(status: u16, headers: &[(&str, &str)], body: &str) -> Executor {
        let response = HttpResponse {
            status,
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            body: body.as_bytes().to_vec(),
        };
        Executor::new(
            "http://localhost:3000/v1",
            Box::new(move |_: &HttpRequest| -> Result<HttpResponse, ApiError> { Ok(response.clone()) }),
        )
    }

    #[test]
    fn build_without_credentials() {
        let req = executor().build_request(HttpMethod::Get, "server", None);
        assert_eq!(req.method, HttpMethod::Get);
        assert_eq!(req.path, "http://localhost:3000/v1/server");
        assert_eq!(
            req.headers,
            vec![("Content-Type".to_string(), "application/json".to_string())]
        );
        assert!(req.body.is_none());
    }

    #[test]
    fn build_attaches_both_keys() {
        let exec = executor();
        exec.set_server_key("server-secret");
        exec.set_global_key("global-secret");

        let req = exec.build_request(HttpMethod::Post, "/server/command", Some(r#"{"command":":h hi"}"#));
        assert_eq!(req.path, "http://localhost:3000/v1/server/command");
        assert_eq!(req.header("server-key"), Some("server-secret"));
        assert_eq!(req.header("authorization"), Some("global-secret"));
        assert_eq!(req.body.as_deref(), Some(r#"{"command":":h hi"}"#));
    }

    #[test]
    fn empty_key_clears_header() {
        let exec = executor();
        exec.set_server_key("server-secret");
        exec.set_server_key("");
        let req = exec.build_request(HttpMethod::Get, "server", None);
        assert_eq!(req.header(SERVER_KEY_HEADER), None);
        assert_eq!(exec.credentials(), Credentials::default());
    }

    #[test]
    fn parse_success_returns_body() {
        let body = responding(200, &[], "").parse_response(HttpResponse {
            status: 200,
            headers: Vec::new(),
            body: br#"{"Name":"Test"}"#.to_vec(),
        });
        assert_eq!(body.unwrap(), br#"{"Name":"Test"}"#);
    }

    #[test]
    fn parse_non_200_is_http_error() {
        let err = executor()
            .parse_response(HttpResponse {
                status: 403,
                headers: Vec::new(),
                body: b"\"Invalid key\"".to_vec(),
            })
            .unwrap_err();
        match err {
            ApiError::Http { status, body } => {
                assert_eq!(status, 403);
                assert!(body.contains("Invalid key"));
            }
            other => panic!("expected Http error, got {other:?}"),
        }
    }

    #[test]
    fn execute_records_limits_even_on_error() {
        let limits = RateLimitRegistry::new();
        let exec = responding(429, &[("X-RateLimit-Remaining", "0"), ("Retry-After", "5")], "slow down");

        let err = exec.execute(&limits, HttpMethod::Get, "server", None).unwrap_err();
        assert_eq!(err.status(), Some(429));

        let state = limits.get("server").unwrap();
        assert_eq!(state.remaining, 0);
        assert!(limits.is_throttled("server", Instant::now()));
        assert!(state.reset_at >= Instant::now() + Duration::from_secs(4));
    }

    #[test]
    fn transport_failure_skips_registry() {
        let limits = RateLimitRegistry::new();
        let err = executor().execute(&limits, HttpMethod::Get, "server", None).unwrap_err();
        assert!(matches!(err, ApiError::Transport(_)));
        assert!(limits.get("server").is_none());
    }

    #[test]
    fn credentials_are_read_per_call() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let exec = {
            let seen = Arc::clone(&seen);
            Executor::new(
                "http://localhost:3000/v1",
                Box::new(move |req: &HttpRequest| -> Result<HttpResponse, ApiError> {
                    seen.lock().push(req.header(SERVER_KEY_HEADER).map(str::to_string));
                    Ok(HttpResponse {
                        status: 200,
                        headers: Vec::new(),
                        body: Vec::new(),
                    })
                }),
            )
        };
        let limits = RateLimitRegistry::new();

        exec.execute(&limits, HttpMethod::Get, "server", None).unwrap();
        exec.set_server_key("first");
        exec.execute(&limits, HttpMethod::Get, "server", None).unwrap();
        exec.set_server_key("second");
        exec.execute(&limits, HttpMethod::Get, "server", None).unwrap();

        assert_eq!(
            *seen.lock(),
            vec![None, Some("first".to_string()), Some("second".to_string())]
        );
    }
}
