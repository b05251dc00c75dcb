//! Progress event bridge (ProgressBridge, component C12).
//!
//! Decouples progress-emitting worker code (which may start running
//! before any transport is attached) from the eventual transport that
//! delivers events to a caller over, e.g., a websocket. Workers never see
//! the transport directly: they are constructed with a bridge and call
//! `emit`/the `emit_*` helpers on it; the transport is injected once, at
//! request start, via `attach`.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::CoreError;

const MAX_BUFFERED_EVENTS: usize = 256;

/// The five canonical worker lifecycle events plus `error`, the only
/// `event_kind` values a bridge will carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Started,
    Thinking,
    ToolExecuting,
    ToolCompleted,
    Completed,
    Error,
}

impl EventKind {
    /// Whether this kind is expected to occur at most once per session:
    /// `thinking`/`tool_executing`/`tool_completed` may repeat freely, but
    /// a second `started`/`completed`/`error` is an anomaly worth logging.
    fn is_singleton(self) -> bool {
        matches!(self, EventKind::Started | EventKind::Completed | EventKind::Error)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    pub event_kind: EventKind,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: String,
    pub caller_id: String,
}

/// Receives emitted events. Implemented by whatever transport (websocket,
/// SSE, in-process channel) eventually attaches. `send` is expected to be
/// non-blocking; failures are isolated by the bridge and never propagate
/// to the worker.
pub trait EventTransport: Send + Sync {
    fn send(&self, event: EventEnvelope) -> Result<(), CoreError>;
}

struct PendingEvent {
    kind: EventKind,
    payload: serde_json::Value,
    timestamp: DateTime<Utc>,
}

enum Sink {
    Buffered(Vec<PendingEvent>),
    Attached {
        transport: Arc<dyn EventTransport>,
        correlation_id: String,
    },
}

/// A snapshot of the bridge's operational state, exposed so the embedding
/// application can surface it on a health/debug endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct BridgeHealth {
    pub attached: bool,
    pub sink_reachable: bool,
    pub last_emit_at: Option<DateTime<Utc>>,
}

/// Bridges progress events from a worker to a transport that may attach
/// after emission has already started. Constructed once per request
/// (bound to the caller whose work it reports on); the transport is
/// attached separately, once, before any event may safely leave the
/// buffer.
pub struct ProgressBridge {
    caller_id: String,
    sink: Mutex<Sink>,
    emitted_once: RwLock<HashSet<EventKind>>,
    last_emit_at: RwLock<Option<DateTime<Utc>>>,
    last_send_failed: AtomicBool,
}

impl ProgressBridge {
    pub fn new(caller_id: impl Into<String>) -> Self {
        Self {
            caller_id: caller_id.into(),
            sink: Mutex::new(Sink::Buffered(Vec::new())),
            emitted_once: RwLock::new(HashSet::new()),
            last_emit_at: RwLock::new(None),
            last_send_failed: AtomicBool::new(false),
        }
    }

    /// Attach a transport, binding the correlation id every subsequent
    /// (and every previously buffered) event will carry. Bound once per
    /// request; attaching again simply replaces the transport, since
    /// reconnects of the same logical request are the caller's business.
    pub fn attach(&self, transport: Arc<dyn EventTransport>, correlation_id: impl Into<String>) {
        let correlation_id = correlation_id.into();
        let mut sink = self.sink.lock();
        if let Sink::Buffered(buffered) = &mut *sink {
            debug!(count = buffered.len(), "flushing buffered progress events");
            for pending in buffered.drain(..) {
                self.dispatch(&transport, pending, &correlation_id);
            }
        }
        *sink = Sink::Attached {
            transport,
            correlation_id,
        };
    }

    pub fn is_attached(&self) -> bool {
        matches!(&*self.sink.lock(), Sink::Attached { .. })
    }

    pub fn health(&self) -> BridgeHealth {
        let attached = self.is_attached();
        BridgeHealth {
            attached,
            sink_reachable: attached && !self.last_send_failed.load(Ordering::SeqCst),
            last_emit_at: *self.last_emit_at.read(),
        }
    }

    fn dispatch(&self, transport: &Arc<dyn EventTransport>, pending: PendingEvent, correlation_id: &str) {
        let envelope = EventEnvelope {
            event_kind: pending.kind,
            payload: pending.payload,
            timestamp: pending.timestamp,
            correlation_id: correlation_id.to_string(),
            caller_id: self.caller_id.clone(),
        };
        if let Err(err) = transport.send(envelope) {
            self.last_send_failed.store(true, Ordering::SeqCst);
            warn!(%err, "progress event sink rejected an event, isolating failure");
        } else {
            self.last_send_failed.store(false, Ordering::SeqCst);
        }
    }

    /// Emit an event: sent directly if a transport is attached, otherwise
    /// buffered (dropping the oldest once the bound is hit, with a
    /// warning, since an unbounded buffer would leak for a task whose
    /// events are never observed).
    pub fn emit(&self, kind: EventKind, payload: serde_json::Value) {
        if kind.is_singleton() {
            let mut once = self.emitted_once.write();
            if !once.insert(kind) {
                warn!(?kind, "lifecycle event emitted more than once for this session");
            }
        }

        let now = Utc::now();
        *self.last_emit_at.write() = Some(now);

        let mut sink = self.sink.lock();
        match &mut *sink {
            Sink::Attached {
                transport,
                correlation_id,
            } => {
                let transport = transport.clone();
                let correlation_id = correlation_id.clone();
                drop(sink);
                self.dispatch(
                    &transport,
                    PendingEvent {
                        kind,
                        payload,
                        timestamp: now,
                    },
                    &correlation_id,
                );
            }
            Sink::Buffered(buffered) => {
                if buffered.len() >= MAX_BUFFERED_EVENTS {
                    warn!("progress event buffer full, dropping oldest event");
                    buffered.remove(0);
                }
                buffered.push(PendingEvent {
                    kind,
                    payload,
                    timestamp: now,
                });
            }
        }
    }

    pub fn emit_started(&self) {
        self.emit(EventKind::Started, serde_json::json!({}));
    }

    pub fn emit_thinking(&self, message: impl Into<String>) {
        self.emit(EventKind::Thinking, serde_json::json!({ "message": message.into() }));
    }

    pub fn emit_tool_executing(&self, tool_name: &str, input: serde_json::Value) {
        self.emit(
            EventKind::ToolExecuting,
            serde_json::json!({ "tool": tool_name, "input": input }),
        );
    }

    pub fn emit_tool_completed(&self, tool_name: &str, result: serde_json::Value) {
        self.emit(
            EventKind::ToolCompleted,
            serde_json::json!({ "tool": tool_name, "result": result }),
        );
    }

    pub fn emit_completed(&self, result: serde_json::Value) {
        self.emit(EventKind::Completed, result);
    }

    pub fn emit_error(&self, err: &CoreError) {
        self.emit(
            EventKind::Error,
            serde_json::json!({
                "kind": err.kind().to_string(),
                "message": err.caller_message().unwrap_or("an internal error occurred"),
            }),
        );
    }

    /// Whether a terminal event (`Completed`/`Error`) has already been
    /// emitted, useful for callers enforcing exactly-once-terminal-event
    /// semantics upstream.
    pub fn has_emitted_terminal(&self) -> bool {
        let once = self.emitted_once.read();
        once.contains(&EventKind::Completed) || once.contains(&EventKind::Error)
    }
}
