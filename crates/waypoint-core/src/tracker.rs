//! Per-session message tracker: classification, fan-out and derived state.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, PoisonError, RwLock,
        atomic::{AtomicUsize, Ordering},
    },
};

use futures::{StreamExt, stream::BoxStream};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::{
    sync::broadcast::{self, error::RecvError},
    task::JoinHandle,
};
use tokio_stream::wrappers::{BroadcastStream, errors::BroadcastStreamRecvError};
use tracing::{Instrument, debug, error, info_span, warn};

use crate::{
    message::{ClassifiedMessage, EventKind},
    traits::{DebugSession, SessionId},
};

/// Default fan-out buffer per subscriber.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Tracker error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TrackerError {
    #[error("Malformed message: {0}")]
    Malformed(String),
}

/// Adapter breakpoint ID correlated with its requested source location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakpointMapping {
    pub line: u32,
    pub verified: bool,
    pub source_path: String,
}

/// Capabilities advertised by the adapter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capabilities(pub Map<String, Value>);

impl Capabilities {
    /// Whether a boolean capability flag is set.
    #[must_use]
    pub fn supports(&self, name: &str) -> bool {
        self.0.get(name).and_then(Value::as_bool).unwrap_or(false)
    }
}

struct PendingBreakpoints {
    source_path: String,
    lines: Vec<u32>,
}

#[derive(Default)]
struct Inner {
    capabilities: Option<Capabilities>,
    breakpoints: HashMap<i64, BreakpointMapping>,
    pending: HashMap<u64, PendingBreakpoints>,
}

/// Single point of observation for one session's traffic.
///
/// Every subscriber sees every message in arrival order; subscribing never
/// consumes a message from anyone else.
pub struct MessageTracker {
    session_id: SessionId,
    inner: RwLock<Inner>,
    sender: Mutex<Option<broadcast::Sender<ClassifiedMessage>>>,
    listeners: Arc<AtomicUsize>,
    forwarder: Mutex<Option<JoinHandle<()>>>,
}

impl MessageTracker {
    /// Create a tracker with the default buffer size.
    #[must_use]
    pub fn new(session_id: SessionId) -> Self {
        Self::with_capacity(session_id, DEFAULT_CAPACITY)
    }

    /// Create a tracker buffering up to `capacity` messages per subscriber.
    #[must_use]
    pub fn with_capacity(session_id: SessionId, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            session_id,
            inner: RwLock::new(Inner::default()),
            sender: Mutex::new(Some(sender)),
            listeners: Arc::new(AtomicUsize::new(0)),
            forwarder: Mutex::new(None),
        }
    }

    /// Session this tracker observes.
    #[must_use]
    pub const fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Start forwarding a session's traffic into this tracker.
    ///
    /// The traffic receiver is taken before this returns, so nothing the
    /// session emits afterwards is missed. Re-attaching replaces the
    /// previous forwarder.
    pub fn attach(self: &Arc<Self>, session: &dyn DebugSession) {
        let stream = BroadcastStream::new(session.traffic());
        let tracker = Arc::downgrade(self);
        let session_id = self.session_id;

        let handle = tokio::spawn(
            async move {
                tokio::pin!(stream);
                while let Some(next) = stream.next().await {
                    let Some(tracker) = tracker.upgrade() else {
                        break;
                    };
                    match next {
                        Ok(raw) => {
                            if let Err(e) = tracker.observe(&raw) {
                                error!(%session_id, "dropping message: {e}");
                            }
                        }
                        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                            warn!(%session_id, skipped, "tracker fell behind session traffic");
                        }
                    }
                }
                debug!(%session_id, "session traffic closed");
            }
            .instrument(info_span!("message_tracker", %session_id)),
        );

        let previous = self
            .forwarder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Classify a raw message, update derived state and fan it out.
    ///
    /// # Errors
    /// Returns error if the message shape is malformed; nothing is forwarded.
    pub fn observe(&self, raw: &Value) -> Result<ClassifiedMessage, TrackerError> {
        let msg = ClassifiedMessage::classify(raw)?;
        self.apply(&msg);

        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(sender) = sender.as_ref() {
            // No receivers is fine.
            let _ = sender.send(msg.clone());
        }
        Ok(msg)
    }

    /// Subscribe to classified messages from now on.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        let receiver = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(broadcast::Sender::subscribe);
        if receiver.is_some() {
            self.listeners.fetch_add(1, Ordering::SeqCst);
        }
        Subscription {
            receiver,
            listeners: Arc::clone(&self.listeners),
        }
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.load(Ordering::SeqCst)
    }

    /// Capabilities captured from `initialize` and `capabilities` traffic.
    #[must_use]
    pub fn capabilities(&self) -> Option<Capabilities> {
        self.read().capabilities.clone()
    }

    /// Look up one breakpoint by adapter ID.
    #[must_use]
    pub fn breakpoint(&self, id: i64) -> Option<BreakpointMapping> {
        self.read().breakpoints.get(&id).cloned()
    }

    /// Snapshot of the breakpoint table.
    #[must_use]
    pub fn breakpoints(&self) -> HashMap<i64, BreakpointMapping> {
        self.read().breakpoints.clone()
    }

    /// Whether the tracker has been shut down.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Stop forwarding, close all subscriptions and clear derived state.
    ///
    /// Safe to call more than once.
    pub fn shutdown(&self) {
        if let Some(handle) = self
            .forwarder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let mut inner = self.write();
        inner.breakpoints.clear();
        inner.pending.clear();
        inner.capabilities = None;
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn apply(&self, msg: &ClassifiedMessage) {
        match msg {
            ClassifiedMessage::Request {
                seq,
                command,
                arguments,
            } if command == "setBreakpoints" => {
                if let Some(pending) = pending_from_arguments(arguments) {
                    self.write().pending.insert(*seq, pending);
                }
            }
            ClassifiedMessage::Response {
                request_seq,
                command,
                success,
                body,
                ..
            } => match command.as_str() {
                "initialize" if *success => {
                    let caps = body.as_object().cloned().unwrap_or_default();
                    self.write().capabilities = Some(Capabilities(caps));
                }
                "setBreakpoints" => {
                    let mut inner = self.write();
                    let Some(pending) = inner.pending.remove(request_seq) else {
                        return;
                    };
                    if *success {
                        apply_set_breakpoints(&mut inner.breakpoints, &pending, body);
                    }
                }
                _ => {}
            },
            ClassifiedMessage::Event {
                kind: EventKind::Capabilities,
                body,
            } => {
                if let Some(changed) = body.get("capabilities").and_then(Value::as_object) {
                    let mut inner = self.write();
                    let caps = inner.capabilities.get_or_insert_with(Capabilities::default);
                    for (key, value) in changed {
                        caps.0.insert(key.clone(), value.clone());
                    }
                }
            }
            ClassifiedMessage::Event {
                kind: EventKind::Breakpoint,
                body,
            } => apply_breakpoint_event(&mut self.write().breakpoints, body),
            _ => {}
        }
    }
}

impl Drop for MessageTracker {
    fn drop(&mut self) {
        if let Some(handle) = self
            .forwarder
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

fn source_path(source: Option<&Value>) -> Option<String> {
    let source = source?;
    source
        .get("path")
        .or_else(|| source.get("name"))
        .and_then(Value::as_str)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
}

fn as_line(value: Option<&Value>) -> Option<u32> {
    value
        .and_then(Value::as_u64)
        .and_then(|l| u32::try_from(l).ok())
}

fn pending_from_arguments(arguments: &Value) -> Option<PendingBreakpoints> {
    let source_path = source_path(arguments.get("source"))?;
    let lines = arguments
        .get("breakpoints")
        .and_then(Value::as_array)
        .map(|bps| bps.iter().map(|bp| as_line(bp.get("line")).unwrap_or(0)).collect())
        .unwrap_or_default();
    Some(PendingBreakpoints { source_path, lines })
}

/// A `setBreakpoints` response replaces every mapping for its source.
fn apply_set_breakpoints(
    table: &mut HashMap<i64, BreakpointMapping>,
    pending: &PendingBreakpoints,
    body: &Value,
) {
    table.retain(|_, m| m.source_path != pending.source_path);

    let Some(returned) = body.get("breakpoints").and_then(Value::as_array) else {
        return;
    };
    for (index, bp) in returned.iter().enumerate() {
        let Some(id) = bp.get("id").and_then(Value::as_i64) else {
            continue;
        };
        let line = as_line(bp.get("line"))
            .or_else(|| pending.lines.get(index).copied())
            .unwrap_or(0);
        table.insert(
            id,
            BreakpointMapping {
                line,
                verified: bp.get("verified").and_then(Value::as_bool).unwrap_or(false),
                source_path: pending.source_path.clone(),
            },
        );
    }
}

fn apply_breakpoint_event(table: &mut HashMap<i64, BreakpointMapping>, body: &Value) {
    let Some(bp) = body.get("breakpoint") else {
        return;
    };
    let Some(id) = bp.get("id").and_then(Value::as_i64) else {
        return;
    };
    if body.get("reason").and_then(Value::as_str) == Some("removed") {
        table.remove(&id);
        return;
    }

    let verified = bp.get("verified").and_then(Value::as_bool);
    let line = as_line(bp.get("line"));
    let path = source_path(bp.get("source"));

    if let Some(existing) = table.get_mut(&id) {
        if let Some(verified) = verified {
            existing.verified = verified;
        }
        if let Some(line) = line {
            existing.line = line;
        }
        if let Some(path) = path {
            existing.source_path = path;
        }
    } else if let Some(source_path) = path {
        table.insert(
            id,
            BreakpointMapping {
                line: line.unwrap_or(0),
                verified: verified.unwrap_or(false),
                source_path,
            },
        );
    }
}

/// A live subscription to a tracker.
///
/// Dropping it unsubscribes. [`unsubscribe`](Self::unsubscribe) may be
/// called any number of times; only the first call has an effect.
#[derive(Debug)]
pub struct Subscription {
    receiver: Option<broadcast::Receiver<ClassifiedMessage>>,
    listeners: Arc<AtomicUsize>,
}

impl Subscription {
    /// Receive the next classified message.
    ///
    /// # Errors
    /// Returns [`RecvError::Closed`] once unsubscribed or after the tracker
    /// shut down, and [`RecvError::Lagged`] if this subscriber fell behind.
    pub async fn recv(&mut self) -> Result<ClassifiedMessage, RecvError> {
        match self.receiver.as_mut() {
            Some(receiver) => receiver.recv().await,
            None => Err(RecvError::Closed),
        }
    }

    /// Whether the subscription still holds its receiver.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.receiver.is_some()
    }

    /// Release the subscription.
    pub fn unsubscribe(&mut self) {
        if self.receiver.take().is_some() {
            self.listeners.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Stream of messages until the tracker shuts down; lag is skipped.
    #[must_use]
    pub fn into_stream(self) -> BoxStream<'static, ClassifiedMessage> {
        futures::stream::unfold(self, |mut sub| async move {
            loop {
                match sub.recv().await {
                    Ok(msg) => return Some((msg, sub)),
                    Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => return None,
                }
            }
        })
        .boxed()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
