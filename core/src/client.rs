//! Caller-facing handle to the ER:LC API.
//!
//! # Design
//! `Client` is a cheap, cloneable handle around shared state. Submitting
//! never performs I/O on the caller's thread: the request is queued under its
//! endpoint and the caller blocks on a private channel until the dispatcher
//! delivers exactly one result. [`Client::send`] splits the two halves for
//! callers that want to queue several requests before waiting.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::info;
use uuid::Uuid;

use crate::config::{ClientConfig, LogLevel};
use crate::dispatcher::{self, Shared};
use crate::error::ApiError;
use crate::executor::{Credentials, Executor};
use crate::http::HttpMethod;
use crate::queue::{Outcome, PendingRequest};
use crate::ratelimit::RateLimitState;
use crate::transport::{Transport, UreqTransport};

#[derive(Clone)]
pub struct Client {
    shared: Arc<Shared>,
}

/// A queued request whose result has not been collected yet.
#[derive(Debug)]
pub struct Ticket {
    id: Uuid,
    receiver: Receiver<Outcome>,
}

impl Ticket {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Block until the dispatcher delivers the result.
    pub fn wait(self) -> Result<Vec<u8>, ApiError> {
        self.receiver.recv().map_err(|_| ApiError::DispatcherGone)?
    }

    /// Like [`wait`](Self::wait), but give up after `timeout`. The request
    /// still executes; only its result is discarded.
    pub fn wait_timeout(self, timeout: Duration) -> Result<Vec<u8>, ApiError> {
        match self.receiver.recv_timeout(timeout) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => Err(ApiError::Timeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(ApiError::DispatcherGone),
        }
    }
}

impl Client {
    /// Client for the public API using the default `ureq` transport.
    pub fn new() -> Self {
        Self::with_config(ClientConfig::default())
    }

    pub fn with_config(config: ClientConfig) -> Self {
        let transport = UreqTransport::new(config.request_timeout);
        Self::with_transport(config, transport)
    }

    pub fn with_transport(config: ClientConfig, transport: impl Transport + 'static) -> Self {
        let executor = Executor::new(&config.base_url, Box::new(transport));
        Self {
            shared: Arc::new(Shared::new(config, executor)),
        }
    }

    /// Set the `Authorization` key for all later dispatches and make sure
    /// the dispatcher is running.
    pub fn set_global_key(&self, key: &str) {
        self.shared.executor.set_global_key(key);
        if self.log_enabled(LogLevel::Info) {
            info!("global key set [HIDDEN]");
        }
        self.ensure_dispatcher();
    }

    /// Set the `Server-Key` key for all later dispatches and make sure the
    /// dispatcher is running.
    pub fn set_server_key(&self, key: &str) {
        self.shared.executor.set_server_key(key);
        if self.log_enabled(LogLevel::Info) {
            info!("server key set [HIDDEN]");
        }
        self.ensure_dispatcher();
    }

    pub fn credentials(&self) -> Credentials {
        self.shared.executor.credentials()
    }

    /// Start the background dispatcher if it is not running. Idempotent.
    pub fn ensure_dispatcher(&self) -> bool {
        dispatcher::ensure_running(&self.shared)
    }

    pub fn dispatcher_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Latest rate-limit record for `endpoint`, if any response was seen.
    pub fn rate_limit(&self, endpoint: &str) -> Option<RateLimitState> {
        self.shared.limits.get(normalize(endpoint))
    }

    /// Requests still waiting for `endpoint`.
    pub fn pending(&self, endpoint: &str) -> usize {
        self.shared.queue.len(normalize(endpoint))
    }

    /// Queue a request with an already-encoded JSON body and return a ticket
    /// for its result.
    pub fn send_raw(&self, method: HttpMethod, endpoint: &str, body: Option<String>) -> Ticket {
        let (request, receiver) = PendingRequest::new(method, normalize(endpoint), body);
        let id = request.id;
        tracing::trace!(request_id = %id, %method, endpoint = %request.endpoint, "queued");
        self.shared.queue.enqueue(request);
        self.ensure_dispatcher();
        Ticket { id, receiver }
    }

    /// Queue a request, JSON-encoding `body`.
    pub fn send<B>(&self, method: HttpMethod, endpoint: &str, body: Option<&B>) -> Result<Ticket, ApiError>
    where
        B: Serialize + ?Sized,
    {
        let body = body.map(encode_body).transpose()?;
        Ok(self.send_raw(method, endpoint, body))
    }

    /// Queue a request and block until its raw response body arrives.
    pub fn submit<B>(&self, method: HttpMethod, endpoint: &str, body: Option<&B>) -> Result<Vec<u8>, ApiError>
    where
        B: Serialize + ?Sized,
    {
        self.send(method, endpoint, body)?.wait()
    }

    pub fn submit_raw(&self, method: HttpMethod, endpoint: &str, body: Option<String>) -> Result<Vec<u8>, ApiError> {
        self.send_raw(method, endpoint, body).wait()
    }

    /// [`submit`](Self::submit) with a caller-side wait limit.
    pub fn submit_timeout<B>(
        &self,
        method: HttpMethod,
        endpoint: &str,
        body: Option<&B>,
        timeout: Duration,
    ) -> Result<Vec<u8>, ApiError>
    where
        B: Serialize + ?Sized,
    {
        self.send(method, endpoint, body)?.wait_timeout(timeout)
    }

    /// Submit and decode the 200 body as `T`.
    pub fn submit_json<T, B>(&self, method: HttpMethod, endpoint: &str, body: Option<&B>) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let bytes = self.submit(method, endpoint, body)?;
        serde_json::from_slice(&bytes).map_err(|e| ApiError::Deserialization(e.to_string()))
    }

    pub fn get<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T, ApiError> {
        self.submit_json::<T, ()>(HttpMethod::Get, endpoint, None)
    }

    pub fn post<T, B>(&self, endpoint: &str, body: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.submit_json(HttpMethod::Post, endpoint, Some(body))
    }

    /// `GET server` decoded as a JSON object.
    pub fn server(&self) -> Result<Map<String, Value>, ApiError> {
        self.get("server")
    }

    /// `GET server/players`.
    pub fn players(&self) -> Result<Vec<Value>, ApiError> {
        self.get("server/players")
    }

    /// `POST server/command` with `{"command": command}`.
    pub fn command(&self, command: &str) -> Result<Value, ApiError> {
        self.post("server/command", &serde_json::json!({ "command": command }))
    }

    fn log_enabled(&self, level: LogLevel) -> bool {
        self.shared.config.log_level.allows(level)
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

/// Queue key for an endpoint: `/server` and `server` are the same endpoint.
fn normalize(endpoint: &str) -> &str {
    endpoint.trim_start_matches('/')
}

fn encode_body<B: Serialize + ?Sized>(body: &B) -> Result<String, ApiError> {
    serde_json::to_string(body).map_err(|e| ApiError::Serialization(e.to_string()))
}
