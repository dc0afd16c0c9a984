//! Per-endpoint FIFO queues of requests waiting for dispatch.
//!
//! # Design
//! One mutex guards the whole endpoint map; every critical section is a
//! push, a pop or a snapshot. A generation counter bumped on every enqueue
//! lets the dispatcher sleep on the condvar without missing a wake-up that
//! happened between its last scan and the wait.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use uuid::Uuid;

use crate::error::ApiError;
use crate::http::HttpMethod;

/// Outcome delivered to a waiting caller.
pub type Outcome = Result<Vec<u8>, ApiError>;

/// A submitted request that has not been executed yet.
///
/// Owned by the queue until dequeued. `reply` is the caller's private
/// single-use channel.
#[derive(Debug)]
pub struct PendingRequest {
    pub id: Uuid,
    pub method: HttpMethod,
    pub endpoint: String,
    pub body: Option<String>,
    pub enqueued_at: Instant,
    reply: Sender<Outcome>,
}

impl PendingRequest {
    /// Create a request and the receiving end of its result channel.
    pub fn new(method: HttpMethod, endpoint: &str, body: Option<String>) -> (Self, Receiver<Outcome>) {
        let (reply, receiver) = crossbeam_channel::bounded(1);
        let request = Self {
            id: Uuid::new_v4(),
            method,
            endpoint: endpoint.to_string(),
            body,
            enqueued_at: Instant::now(),
            reply,
        };
        (request, receiver)
    }

    /// Hand the result to the caller. Consumes the request so a second
    /// delivery cannot be expressed. Returns false if the caller stopped
    /// waiting.
    pub fn deliver(self, outcome: Outcome) -> bool {
        self.reply.send(outcome).is_ok()
    }
}

#[derive(Debug, Default)]
struct Queues {
    by_endpoint: HashMap<String, VecDeque<PendingRequest>>,
    generation: u64,
}

#[derive(Debug, Default)]
pub struct RequestQueue {
    inner: Mutex<Queues>,
    enqueued: Condvar,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `request` to its endpoint's queue and wake the dispatcher.
    pub fn enqueue(&self, request: PendingRequest) {
        let mut queues = self.inner.lock();
        queues
            .by_endpoint
            .entry(request.endpoint.clone())
            .or_default()
            .push_back(request);
        queues.generation = queues.generation.wrapping_add(1);
        drop(queues);
        self.enqueued.notify_one();
    }

    /// Remove and return the oldest request for `endpoint`.
    /// Drained endpoints are forgotten.
    pub fn dequeue_next(&self, endpoint: &str) -> Option<PendingRequest> {
        let mut queues = self.inner.lock();
        let queue = queues.by_endpoint.get_mut(endpoint)?;
        let request = queue.pop_front();
        if queue.is_empty() {
            queues.by_endpoint.remove(endpoint);
        }
        request
    }

    pub fn len(&self, endpoint: &str) -> usize {
        self.inner
            .lock()
            .by_endpoint
            .get(endpoint)
            .map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().by_endpoint.values().all(VecDeque::is_empty)
    }

    /// Endpoints that currently have at least one request waiting.
    pub fn endpoints(&self) -> Vec<String> {
        self.inner
            .lock()
            .by_endpoint
            .iter()
            .filter(|(_, queue)| !queue.is_empty())
            .map(|(endpoint, _)| endpoint.clone())
            .collect()
    }

    /// Number of enqueues so far. Pair with [`wait_for_enqueue`](Self::wait_for_enqueue).
    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    /// Block until an enqueue newer than `seen` happens or `timeout` elapses.
    pub fn wait_for_enqueue(&self, seen: u64, timeout: Duration) {
        let mut queues = self.inner.lock();
        if queues.generation != seen {
            return;
        }
        self.enqueued.wait_for(&mut queues, timeout);
    }
}
