//! Message relay and log store.
//!
//! Everything that crosses the isolation boundary arrives here as an
//! untrusted [`serde_json::Value`]. The relay validates shape, drops
//! traffic from superseded sessions, and appends well-formed console
//! messages to an ordered in-memory log that the embedding application
//! reads and subscribes to.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::host::SessionId;

/// Severity of one console entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    Log,
    Info,
    Warn,
    Error,
}

impl LogKind {
    fn from_method(method: &str) -> Option<Self> {
        match method {
            "log" => Some(Self::Log),
            "info" => Some(Self::Info),
            "warn" => Some(Self::Warn),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// One accepted console message.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: Uuid,
    pub kind: LogKind,
    /// Pre-formatted arguments joined with single spaces.
    pub content: String,
    /// When the relay accepted the entry.
    pub received_at: DateTime<Utc>,
    /// Session the message originated from.
    pub session: SessionId,
    /// Guest-side timestamp (milliseconds), when the message carried one.
    pub origin_millis: Option<i64>,
}

/// Change notification delivered to log subscribers.
#[derive(Clone, Debug)]
pub enum LogEvent {
    Appended(LogEntry),
    Cleared,
}

/// Optional severity filter for [`LogStore::list`].
#[derive(Clone, Copy, Debug, Default)]
pub struct LogFilter {
    pub kind: Option<LogKind>,
}

#[derive(Default)]
struct Inner {
    entries: Vec<LogEntry>,
    current_session: SessionId,
    subscribers: Vec<mpsc::UnboundedSender<LogEvent>>,
    dropped_stale: u64,
    dropped_malformed: u64,
    dropped_foreign: u64,
}

/// Ordered console log with session-based staleness filtering.
///
/// Cheap to share; all handles observe the same log.
#[derive(Default)]
pub struct LogStore {
    inner: Mutex<Inner>,
}

impl LogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the accepted session. Messages tagged with an older session
    /// are dropped from now on, even if they were already in flight.
    pub fn begin_session(&self, session: SessionId) {
        let mut inner = self.inner.lock();
        if session > inner.current_session {
            inner.current_session = session;
        }
    }

    /// Validate and ingest one raw wire message. Returns the appended
    /// entry, or `None` when the message was dropped.
    ///
    /// Accepted shape: an object with `type == "console"`, a known
    /// `method`, an `args` array of strings, and a `session` matching the
    /// current one. Anything else is counted and discarded.
    pub fn receive(&self, message: &Value) -> Option<LogEntry> {
        let mut inner = self.inner.lock();

        let Some(object) = message.as_object() else {
            inner.dropped_malformed += 1;
            return None;
        };
        if object.get("type").and_then(Value::as_str) != Some("console") {
            inner.dropped_foreign += 1;
            tracing::trace!("ignoring non-console message from isolation boundary");
            return None;
        }
        let kind = match object
            .get("method")
            .and_then(Value::as_str)
            .and_then(LogKind::from_method)
        {
            Some(kind) => kind,
            None => {
                inner.dropped_malformed += 1;
                return None;
            }
        };
        let args = match object.get("args").and_then(Value::as_array) {
            Some(args) if args.iter().all(Value::is_string) => args,
            _ => {
                inner.dropped_malformed += 1;
                return None;
            }
        };
        let Some(session) = object.get("session").and_then(Value::as_u64) else {
            inner.dropped_malformed += 1;
            return None;
        };
        if session != inner.current_session {
            inner.dropped_stale += 1;
            tracing::debug!(
                session,
                current = inner.current_session,
                "dropping console message from superseded session"
            );
            return None;
        }

        let content = args
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(" ");
        let entry = LogEntry {
            id: Uuid::new_v4(),
            kind,
            content,
            received_at: Utc::now(),
            session,
            origin_millis: object.get("at").and_then(Value::as_i64),
        };
        inner.entries.push(entry.clone());
        notify(&mut inner, LogEvent::Appended(entry.clone()));
        Some(entry)
    }

    /// Remove every entry atomically. Messages arriving afterwards append
    /// to the emptied log.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        notify(&mut inner, LogEvent::Cleared);
    }

    /// Snapshot of the log in arrival order, optionally filtered by kind.
    pub fn list(&self, filter: LogFilter) -> Vec<LogEntry> {
        let inner = self.inner.lock();
        inner
            .entries
            .iter()
            .filter(|entry| filter.kind.map_or(true, |kind| entry.kind == kind))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Counters of discarded traffic: (stale, malformed, foreign).
    pub fn drop_counts(&self) -> (u64, u64, u64) {
        let inner = self.inner.lock();
        (
            inner.dropped_stale,
            inner.dropped_malformed,
            inner.dropped_foreign,
        )
    }

    /// Subscribe to appends and clears. Lagging or dropped subscribers
    /// never block ingestion.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<LogEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().subscribers.push(tx);
        rx
    }
}

fn notify(inner: &mut Inner, event: LogEvent) {
    inner
        .subscribers
        .retain(|subscriber| subscriber.send(event.clone()).is_ok());
}
