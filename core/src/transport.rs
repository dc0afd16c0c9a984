//! The I/O seam: something that turns an `HttpRequest` into an `HttpResponse`.

use std::time::Duration;

use ureq::Agent;

use crate::error::ApiError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse};

/// Executes one HTTP round-trip.
///
/// Implementations return `Ok` for any response the server sent, whatever
/// its status; `Err` means no response was received.
pub trait Transport: Send + Sync {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, ApiError>;
}

impl<F> Transport for F
where
    F: Fn(&HttpRequest) -> Result<HttpResponse, ApiError> + Send + Sync,
{
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, ApiError> {
        self(request)
    }
}

/// Blocking transport backed by a shared `ureq` agent.
#[derive(Debug, Clone)]
pub struct UreqTransport {
    agent: Agent,
}

impl UreqTransport {
    pub fn new(timeout: Duration) -> Self {
        // Non-2xx responses are data here, not errors: the executor still
        // needs their rate-limit headers.
        let agent = Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(timeout))
            .build()
            .new_agent();
        Self { agent }
    }
}

impl Transport for UreqTransport {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, ApiError> {
        let mut builder = ureq::http::Request::builder()
            .method(request.method.as_str())
            .uri(request.path.as_str());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let sent = match &request.body {
            Some(body) => builder
                .body(body.clone().into_bytes())
                .map_err(|e| ApiError::Transport(e.to_string()))
                .and_then(|req| self.agent.run(req).map_err(transport_error)),
            None if request.method == HttpMethod::Get || request.method == HttpMethod::Delete => builder
                .body(())
                .map_err(|e| ApiError::Transport(e.to_string()))
                .and_then(|req| self.agent.run(req).map_err(transport_error)),
            None => builder
                .body(Vec::<u8>::new())
                .map_err(|e| ApiError::Transport(e.to_string()))
                .and_then(|req| self.agent.run(req).map_err(transport_error)),
        };
        let mut response = sent?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        let body = response.body_mut().read_to_vec().map_err(transport_error)?;

        Ok(HttpResponse { status, headers, body })
    }
}

fn transport_error(err: ureq::Error) -> ApiError {
    ApiError::Transport(err.to_string())
}
