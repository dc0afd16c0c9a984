//! The background loop that turns queued requests into API calls.
//!
//! # Design
//! One thread per client, started lazily and at most once. Each scan visits
//! every endpoint with waiting work, skips the throttled ones and executes
//! the head of each of the others. Locks are taken only to pop a request or
//! to record limits; the network call itself runs with nothing held.
//!
//! The thread owns a strong reference to the shared state and exits once
//! every `Client` handle is gone and the queues have drained, so requests
//! queued before the last handle was dropped still run.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use tracing::{debug, error, warn};

use crate::config::{ClientConfig, LogLevel};
use crate::error::ApiError;
use crate::executor::Executor;
use crate::queue::{PendingRequest, RequestQueue};
use crate::ratelimit::RateLimitRegistry;

pub const DISPATCHER_THREAD_NAME: &str = "erlc-dispatcher";

/// State shared between callers and the dispatcher thread.
pub(crate) struct Shared {
    pub(crate) config: ClientConfig,
    pub(crate) queue: RequestQueue,
    pub(crate) limits: RateLimitRegistry,
    pub(crate) executor: Executor,
    running: AtomicBool,
}

impl Shared {
    pub(crate) fn new(config: ClientConfig, executor: Executor) -> Self {
        Self {
            config,
            queue: RequestQueue::new(),
            limits: RateLimitRegistry::new(),
            executor,
            running: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Start the dispatcher unless one is already running. Returns true if this
/// call started it.
pub(crate) fn ensure_running(shared: &Arc<Shared>) -> bool {
    if shared
        .running
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        return false;
    }

    let owned = Arc::clone(shared);
    let spawned = thread::Builder::new()
        .name(DISPATCHER_THREAD_NAME.to_string())
        .spawn(move || run(owned));

    match spawned {
        Ok(_) => {
            debug!("dispatcher started");
            true
        }
        Err(err) => {
            shared.running.store(false, Ordering::Release);
            if shared.config.log_level.allows(LogLevel::Error) {
                error!(%err, "failed to spawn dispatcher thread");
            }
            false
        }
    }
}

/// Clears the running flag however the loop ends, so a later
/// `ensure_running` can start a fresh one.
struct RunningGuard(Arc<Shared>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.running.store(false, Ordering::Release);
    }
}

fn run(shared: Arc<Shared>) {
    let guard = RunningGuard(shared);
    let shared = &guard.0;
    // Only `Client` handles and this thread hold the state, and new requests
    // need a handle, so an empty queue with no handles left stays empty.
    while Arc::strong_count(shared) > 1 || !shared.queue.is_empty() {
        let seen = shared.queue.generation();
        if scan(shared) == 0 {
            idle(shared, seen);
        }
    }
    debug!("dispatcher stopped, client dropped");
}

/// One pass over every endpoint with waiting work. Returns how many
/// requests were dispatched.
fn scan(shared: &Shared) -> usize {
    let mut dispatched = 0;
    for endpoint in shared.queue.endpoints() {
        if shared.limits.is_throttled(&endpoint, Instant::now()) {
            continue;
        }
        if let Some(request) = shared.queue.dequeue_next(&endpoint) {
            dispatch(shared, request);
            dispatched += 1;
        }
    }
    dispatched
}

/// Wait for new work, for the poll interval, or for the next rate-limit
/// reset, whichever comes first.
fn idle(shared: &Shared, seen: u64) {
    let now = Instant::now();
    let mut timeout = shared.config.poll_interval;
    if let Some(reset_at) = shared.limits.next_reset(now) {
        timeout = timeout.min(reset_at.saturating_duration_since(now));
    }
    shared.queue.wait_for_enqueue(seen, timeout);
}

fn dispatch(shared: &Shared, request: PendingRequest) {
    let span = tracing::debug_span!(
        "dispatch",
        request_id = %request.id,
        method = %request.method,
        endpoint = %request.endpoint,
    );
    let _entered = span.enter();
    debug!(queued = ?request.enqueued_at.elapsed(), "executing");

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        shared.executor.execute(
            &shared.limits,
            request.method,
            &request.endpoint,
            request.body.as_deref(),
        )
    }))
    .unwrap_or_else(|payload| {
        let msg = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };
        Err(ApiError::Transport(format!("transport panicked: {msg}")))
    });

    let level = shared.config.log_level;
    match &outcome {
        Err(ApiError::Transport(err)) if level.allows(LogLevel::Error) => {
            error!(%err, "request failed before a response arrived");
        }
        Err(ApiError::Http { status, .. }) if level.allows(LogLevel::Warning) => {
            warn!(status, "API returned an error status");
        }
        _ => {}
    }

    if !request.deliver(outcome) {
        debug!("caller stopped waiting, result dropped");
    }
}
