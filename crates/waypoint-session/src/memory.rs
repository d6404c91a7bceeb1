//! In-memory, scriptable debug session.
//!
//! Useful for development, tests and demos. Each command is answered by a
//! registered handler which may also schedule follow-up events.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, PoisonError, RwLock,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::{sync::broadcast, time::Instant};
use uuid::Uuid;
use waypoint_core::{DebugSession, SessionError, SessionId};

const TRAFFIC_CAPACITY: usize = 1024;

struct ScheduledEvent {
    delay: Duration,
    name: String,
    body: Value,
}

/// Scripted reply to one request.
pub struct Scripted {
    /// `None` never answers.
    response: Option<Result<Value, String>>,
    events: Vec<ScheduledEvent>,
}

impl Scripted {
    /// Successful response with the given body.
    #[must_use]
    pub const fn ok(body: Value) -> Self {
        Self {
            response: Some(Ok(body)),
            events: Vec::new(),
        }
    }

    /// Failed response (`success: false`) with the given message.
    #[must_use]
    pub fn reject(message: impl Into<String>) -> Self {
        Self {
            response: Some(Err(message.into())),
            events: Vec::new(),
        }
    }

    /// No response at all; `request` stays pending until dropped. Scheduled
    /// events are still emitted.
    #[must_use]
    pub const fn unanswered() -> Self {
        Self {
            response: None,
            events: Vec::new(),
        }
    }

    /// Emit an event right after the response, before `request` returns.
    #[must_use]
    pub fn then_event(self, name: impl Into<String>, body: Value) -> Self {
        self.then_event_after(Duration::ZERO, name, body)
    }

    /// Emit an event `delay` after the response.
    #[must_use]
    pub fn then_event_after(mut self, delay: Duration, name: impl Into<String>, body: Value) -> Self {
        self.events.push(ScheduledEvent {
            delay,
            name: name.into(),
            body,
        });
        self
    }
}

type Handler = Arc<dyn Fn(&Value) -> Scripted + Send + Sync>;

/// A request as seen by the session.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub command: String,
    pub arguments: Value,
}

/// In-memory session implementation.
pub struct MemorySession {
    id: SessionId,
    kind: String,
    traffic: broadcast::Sender<Value>,
    handlers: RwLock<HashMap<String, Handler>>,
    requests: Mutex<Vec<RecordedRequest>>,
    next_seq: Arc<AtomicU64>,
    closed: AtomicBool,
}

impl MemorySession {
    /// Create a session with no handlers.
    #[must_use]
    pub fn new(kind: impl Into<String>) -> Self {
        let (traffic, _) = broadcast::channel(TRAFFIC_CAPACITY);
        Self {
            id: Uuid::new_v4(),
            kind: kind.into(),
            traffic,
            handlers: RwLock::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            next_seq: Arc::new(AtomicU64::new(0)),
            closed: AtomicBool::new(false),
        }
    }

    /// Register the handler for a command, replacing any previous one.
    pub fn on<F>(&self, command: impl Into<String>, handler: F)
    where
        F: Fn(&Value) -> Scripted + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(command.into(), Arc::new(handler));
    }

    /// Emit an adapter event now.
    pub fn emit_event(&self, name: &str, body: Value) {
        emit(&self.traffic, &self.next_seq, event(name, body));
    }

    /// Emit an arbitrary raw message now.
    pub fn emit_raw(&self, mut raw: Value) {
        if let Some(obj) = raw.as_object_mut() {
            obj.entry("seq").or_insert_with(|| json!(next(&self.next_seq)));
        }
        let _ = self.traffic.send(raw);
    }

    /// Every request received so far, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Arguments of every request for one command, in order.
    #[must_use]
    pub fn requests_for(&self, command: &str) -> Vec<Value> {
        self.requests()
            .into_iter()
            .filter(|r| r.command == command)
            .map(|r| r.arguments)
            .collect()
    }

    /// Refuse further requests.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

fn next(seq: &AtomicU64) -> u64 {
    seq.fetch_add(1, Ordering::SeqCst) + 1
}

fn event(name: &str, body: Value) -> Value {
    json!({ "type": "event", "event": name, "body": body })
}

fn emit(traffic: &broadcast::Sender<Value>, seq: &AtomicU64, mut message: Value) {
    message["seq"] = json!(next(seq));
    // Nobody listening is fine.
    let _ = traffic.send(message);
}

#[async_trait]
impl DebugSession for MemorySession {
    fn id(&self) -> SessionId {
        self.id
    }

    fn kind(&self) -> &str {
        &self.kind
    }

    async fn request(&self, command: &str, arguments: Value) -> Result<Value, SessionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SessionError::Closed);
        }

        let seq = next(&self.next_seq);
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedRequest {
                command: command.to_string(),
                arguments: arguments.clone(),
            });
        let _ = self.traffic.send(json!({
            "seq": seq,
            "type": "request",
            "command": command,
            "arguments": arguments,
        }));

        let handler = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(command)
            .cloned();
        let scripted = match handler {
            Some(handler) => handler(&arguments),
            None => Scripted::reject(format!("Unsupported command '{command}'")),
        };

        let response = match &scripted.response {
            None => None,
            Some(Ok(body)) => Some(json!({
                "type": "response",
                "request_seq": seq,
                "command": command,
                "success": true,
                "body": body,
            })),
            Some(Err(message)) => Some(json!({
                "type": "response",
                "request_seq": seq,
                "command": command,
                "success": false,
                "message": message,
            })),
        };
        if let Some(response) = response {
            emit(&self.traffic, &self.next_seq, response);
        }

        let (immediate, mut delayed): (Vec<_>, Vec<_>) = scripted
            .events
            .into_iter()
            .partition(|e| e.delay.is_zero());
        for e in immediate {
            emit(&self.traffic, &self.next_seq, event(&e.name, e.body));
        }
        if !delayed.is_empty() {
            delayed.sort_by_key(|e| e.delay);
            let traffic = self.traffic.clone();
            let seq = Arc::clone(&self.next_seq);
            let start = Instant::now();
            tokio::spawn(async move {
                for e in delayed {
                    tokio::time::sleep_until(start + e.delay).await;
                    emit(&traffic, &seq, event(&e.name, e.body));
                }
            });
        }

        match scripted.response {
            Some(response) => response.map_err(|message| SessionError::Rejected {
                command: command.to_string(),
                message,
            }),
            None => std::future::pending().await,
        }
    }

    fn traffic(&self) -> broadcast::Receiver<Value> {
        self.traffic.subscribe()
    }
}
