//! Isolated execution host.
//!
//! Each host owns a dedicated blocking thread running a boa_engine
//! [`Context`]. Loading an assembled document is destructive: a fresh
//! context replaces the previous one, so timers, listeners and in-flight
//! state from the superseded session are discarded rather than delivered
//! into the new one. The hosted script can only reach the application
//! through one channel: the wire messages the instrumentation shim leaves
//! in its outbox, which the host drains and forwards tagged with the
//! session id.
//!
//! Evaluation of a document: the shim is installed first, then every
//! `<script>` element is evaluated in document order under the shim's
//! error boundary. A failing element (syntax error, throw outside the
//! guard) produces exactly one error event and does not stop later
//! elements, and nothing thrown in the guest ever crosses into the host
//! application.

pub mod shim;

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::mpsc as std_mpsc;
use std::time::{Duration, Instant};

use boa_engine::{Context, Source};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::error::HostError;

/// Monotonically increasing identifier of one document load.
pub type SessionId = u64;

/// Execution host resource limits. These are hygiene against runaway
/// guests, not a security boundary.
#[derive(Clone, Debug)]
pub struct HostConfig {
    /// Max assembled document size (bytes).
    pub max_document_bytes: usize,

    /// Max `setTimeout` registrations honored per session.
    pub max_timers_per_session: usize,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            max_document_bytes: 2 * 1024 * 1024,
            max_timers_per_session: 256,
        }
    }
}

enum HostCommand {
    Load { document: String, session: SessionId },
    Shutdown,
}

/// Handle to a running execution host thread.
///
/// Cloneable; all clones feed the same guest thread. Commands are applied
/// in order, and queued loads coalesce so at most the newest pending one
/// is executed (a new load always fully supersedes an in-flight one).
#[derive(Clone)]
pub struct ExecutionHost {
    cmd_tx: std_mpsc::Sender<HostCommand>,
    config: HostConfig,
}

impl ExecutionHost {
    /// Spawn the host thread. Returns the command handle and the stream of
    /// raw wire messages leaving the isolation boundary (FIFO per session;
    /// validation is the relay's job).
    ///
    /// Must be called within a tokio runtime.
    pub fn spawn(config: HostConfig) -> (Self, mpsc::UnboundedReceiver<Value>) {
        let (cmd_tx, cmd_rx) = std_mpsc::channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let thread_config = config.clone();
        tokio::task::spawn_blocking(move || host_thread(thread_config, cmd_rx, event_tx));
        (Self { cmd_tx, config }, event_rx)
    }

    /// Queue a document load. Fully replaces the hosted content once the
    /// thread picks it up.
    pub fn load(&self, document: String, session: SessionId) -> Result<(), HostError> {
        if document.len() > self.config.max_document_bytes {
            return Err(HostError::DocumentTooLarge {
                max: self.config.max_document_bytes,
                actual: document.len(),
            });
        }
        self.cmd_tx
            .send(HostCommand::Load { document, session })
            .map_err(|_| HostError::HostClosed)
    }

    /// Stop the host thread. Idempotent; pending events already forwarded
    /// remain readable on the event stream.
    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(HostCommand::Shutdown);
    }
}

fn host_thread(
    config: HostConfig,
    cmd_rx: std_mpsc::Receiver<HostCommand>,
    event_tx: mpsc::UnboundedSender<Value>,
) {
    let mut guest: Option<GuestSession> = None;

    loop {
        if let Some(session) = guest.as_mut() {
            session.fire_due_timers(&event_tx);
        }

        let wait = guest
            .as_ref()
            .and_then(GuestSession::next_deadline)
            .map(|deadline| deadline.saturating_duration_since(Instant::now()));

        let received = match wait {
            Some(timeout) => match cmd_rx.recv_timeout(timeout) {
                Ok(cmd) => Some(cmd),
                Err(std_mpsc::RecvTimeoutError::Timeout) => None,
                Err(std_mpsc::RecvTimeoutError::Disconnected) => break,
            },
            None => match cmd_rx.recv() {
                Ok(cmd) => Some(cmd),
                Err(_) => break,
            },
        };

        let Some(mut cmd) = received else {
            // Timer deadline reached; fire at the top of the loop.
            continue;
        };

        // Collapse queued loads: only the newest pending document matters.
        // A shutdown, once dequeued, is never replaced by a load behind it.
        while !matches!(cmd, HostCommand::Shutdown) {
            match cmd_rx.try_recv() {
                Ok(next) => cmd = next,
                Err(_) => break,
            }
        }

        match cmd {
            HostCommand::Load { document, session } => {
                tracing::debug!(
                    session,
                    bytes = document.len(),
                    "loading document into execution host"
                );
                guest = Some(GuestSession::start(&config, &document, session, &event_tx));
            }
            HostCommand::Shutdown => break,
        }
    }

    tracing::debug!("execution host thread stopped");
}

struct TimerEntry {
    deadline: Instant,
    seq: u64,
    id: u64,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Equal deadlines fire in registration order.
        self.deadline
            .cmp(&other.deadline)
            .then(self.seq.cmp(&other.seq))
    }
}

/// One loaded document: a fresh engine context plus its timer queue.
struct GuestSession {
    context: Context,
    session: SessionId,
    timers: BinaryHeap<Reverse<TimerEntry>>,
    timer_seq: u64,
    timers_registered: usize,
    max_timers: usize,
}

impl GuestSession {
    fn start(
        config: &HostConfig,
        document: &str,
        session: SessionId,
        event_tx: &mpsc::UnboundedSender<Value>,
    ) -> Self {
        let mut guest = Self {
            context: Context::default(),
            session,
            timers: BinaryHeap::new(),
            timer_seq: 0,
            timers_registered: 0,
            max_timers: config.max_timers_per_session,
        };

        // Install the shim before anything runs, so inline markup scripts
        // ahead of the embedded shim element are instrumented too. The
        // embedded copy is an idempotent no-op.
        if let Err(err) = guest.context.eval(Source::from_bytes(shim::SHIM_SOURCE)) {
            guest.emit_uncaught(event_tx, &format!("instrumentation install failed: {err}"));
        }

        for script in extract_script_elements(document) {
            if let Err(err) = guest.context.eval(Source::from_bytes(script)) {
                guest.emit_uncaught(event_tx, &err.to_string());
            }
            guest.context.run_jobs();
            guest.drain(event_tx);
        }

        guest
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.timers.peek().map(|Reverse(timer)| timer.deadline)
    }

    fn fire_due_timers(&mut self, event_tx: &mpsc::UnboundedSender<Value>) {
        loop {
            let due = matches!(
                self.timers.peek(),
                Some(Reverse(timer)) if timer.deadline <= Instant::now()
            );
            if !due {
                break;
            }
            let Some(Reverse(entry)) = self.timers.pop() else {
                break;
            };
            if let Err(err) = self
                .context
                .eval(Source::from_bytes(&shim::fire_timer_source(entry.id)))
            {
                self.emit_uncaught(event_tx, &err.to_string());
            }
            self.context.run_jobs();
            self.drain(event_tx);
        }
    }

    /// Pull pending console messages and timer registrations out of the
    /// guest and forward/schedule them.
    fn drain(&mut self, event_tx: &mpsc::UnboundedSender<Value>) {
        let raw = match self.context.eval(Source::from_bytes(shim::HARVEST_SOURCE)) {
            Ok(value) => value.as_string().map(|s| s.to_std_string_escaped()),
            Err(err) => {
                tracing::warn!(session = self.session, error = %err, "outbox harvest failed");
                return;
            }
        };
        let Some(raw) = raw else { return };
        let state: Value = match serde_json::from_str(&raw) {
            Ok(state) => state,
            Err(err) => {
                tracing::warn!(session = self.session, error = %err, "outbox harvest was not valid JSON");
                return;
            }
        };

        if let Some(messages) = state.get("messages").and_then(Value::as_array) {
            for message in messages {
                self.forward(event_tx, message.clone());
            }
        }
        if let Some(timers) = state.get("timers").and_then(Value::as_array) {
            for request in timers {
                self.schedule_timer(request);
            }
        }
    }

    fn forward(&self, event_tx: &mpsc::UnboundedSender<Value>, mut message: Value) {
        if let Some(object) = message.as_object_mut() {
            object.insert("session".into(), json!(self.session));
        }
        // Console traffic stays visible in the host's own tooling.
        tracing::debug!(session = self.session, %message, "guest console event");
        let _ = event_tx.send(message);
    }

    /// One error event for an uncaught failure the in-guest guard could
    /// not see (script-element syntax errors, shim install failures).
    fn emit_uncaught(&self, event_tx: &mpsc::UnboundedSender<Value>, message: &str) {
        self.forward(
            event_tx,
            json!({
                "type": "console",
                "method": "error",
                "args": [format!("Uncaught {message}")],
                "at": chrono::Utc::now().timestamp_millis(),
            }),
        );
    }

    fn schedule_timer(&mut self, request: &Value) {
        let Some(id) = request.get("id").and_then(Value::as_u64) else {
            return;
        };
        if self.timers_registered >= self.max_timers {
            tracing::warn!(
                session = self.session,
                "timer limit reached; dropping setTimeout request"
            );
            return;
        }
        let delay = request
            .get("delay")
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
            .max(0.0);
        self.timers_registered += 1;
        self.timer_seq += 1;
        self.timers.push(Reverse(TimerEntry {
            deadline: Instant::now() + Duration::from_millis(delay as u64),
            seq: self.timer_seq,
            id,
        }));
    }
}

/// Extract the bodies of all `<script>` elements, in document order.
pub(crate) fn extract_script_elements(document: &str) -> Vec<&str> {
    let mut scripts = Vec::new();
    let mut cursor = 0;
    while let Some(open) = find_ascii_ci(document, "<script", cursor) {
        let Some(tag_end) = document[open..].find('>') else {
            break;
        };
        let body_start = open + tag_end + 1;
        let Some(close) = find_ascii_ci(document, "</script", body_start) else {
            break;
        };
        scripts.push(&document[body_start..close]);
        let Some(close_end) = document[close..].find('>') else {
            break;
        };
        cursor = close + close_end + 1;
    }
    scripts
}

fn find_ascii_ci(haystack: &str, needle: &str, from: usize) -> Option<usize> {
    let haystack = haystack.as_bytes();
    let needle = needle.as_bytes();
    if needle.is_empty() || haystack.len() < needle.len() || from > haystack.len() - needle.len() {
        return None;
    }
    (from..=haystack.len() - needle.len())
        .find(|&i| haystack[i..i + needle.len()].eq_ignore_ascii_case(needle))
}
