//! Rate-limited request dispatcher for the ER:LC HTTP API.
//!
//! # Overview
//! Callers submit `(method, endpoint, body)` and block until a result
//! arrives. A single background thread owns dispatch: it keeps one FIFO queue
//! per endpoint, skips endpoints whose server-reported budget is spent until
//! their `Retry-After` elapses, and hands every request exactly one result.
//!
//! # Design
//! - `Client` is a cloneable handle; the dispatcher starts on the first key
//!   change or submission and stops once the last handle is dropped.
//! - The executor speaks plain `HttpRequest` / `HttpResponse` data. A
//!   [`Transport`] does the I/O (`ureq` by default), so tests can script
//!   responses without a network.
//! - Requests to one endpoint run in submission order. Endpoints do not wait
//!   on each other.
//!
//! ```no_run
//! use erlc_core::Client;
//!
//! let client = Client::new();
//! client.set_server_key("my-server-key");
//! let server = client.server()?;
//! println!("{}", server["Name"]);
//! # Ok::<(), erlc_core::ApiError>(())
//! ```

pub mod client;
pub mod config;
mod dispatcher;
pub mod error;
pub mod executor;
pub mod http;
pub mod queue;
pub mod ratelimit;
pub mod transport;

pub use client::{Client, Ticket};
pub use config::{ClientConfig, LogLevel, DEFAULT_BASE_URL, DEFAULT_POLL_INTERVAL};
pub use dispatcher::DISPATCHER_THREAD_NAME;
pub use error::ApiError;
pub use executor::{Credentials, Executor};
pub use http::{HttpMethod, HttpRequest, HttpResponse};
pub use ratelimit::{RateLimitRegistry, RateLimitState};
pub use transport::{Transport, UreqTransport};
