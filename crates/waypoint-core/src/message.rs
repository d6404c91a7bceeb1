//! Typed view over raw protocol traffic.

use std::fmt;

use serde_json::Value;

use crate::tracker::TrackerError;

/// Event names the coordination layer recognises.
///
/// Anything else is carried as [`EventKind::Other`] and forwarded untouched.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    Stopped,
    Continued,
    Terminated,
    Exited,
    Initialized,
    Capabilities,
    Breakpoint,
    Output,
    Thread,
    Other(String),
}

impl EventKind {
    /// Map a wire event name to its kind.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name {
            "stopped" => Self::Stopped,
            "continued" => Self::Continued,
            "terminated" => Self::Terminated,
            "exited" => Self::Exited,
            "initialized" => Self::Initialized,
            "capabilities" => Self::Capabilities,
            "breakpoint" => Self::Breakpoint,
            "output" => Self::Output,
            "thread" => Self::Thread,
            other => Self::Other(other.to_string()),
        }
    }

    /// Wire name of the event.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Stopped => "stopped",
            Self::Continued => "continued",
            Self::Terminated => "terminated",
            Self::Exited => "exited",
            Self::Initialized => "initialized",
            Self::Capabilities => "capabilities",
            Self::Breakpoint => "breakpoint",
            Self::Output => "output",
            Self::Thread => "thread",
            Self::Other(name) => name,
        }
    }

    /// Whether the event ends the debuggee's run.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminated | Self::Exited)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One message of session traffic, classified.
#[derive(Debug, Clone, PartialEq)]
pub enum ClassifiedMessage {
    /// Echo of an outbound request.
    Request {
        seq: u64,
        command: String,
        arguments: Value,
    },
    /// Adapter response to a request.
    Response {
        request_seq: u64,
        command: String,
        success: bool,
        message: Option<String>,
        body: Value,
    },
    /// Adapter event.
    Event { kind: EventKind, body: Value },
    /// Object with an unrecognised `type`; never inspected.
    Unknown(Value),
}

impl ClassifiedMessage {
    /// Classify a raw protocol message.
    ///
    /// # Errors
    /// Returns [`TrackerError::Malformed`] if the message is not an object,
    /// has no `type`, or lacks the fields its type requires.
    pub fn classify(raw: &Value) -> Result<Self, TrackerError> {
        let obj = raw
            .as_object()
            .ok_or_else(|| TrackerError::Malformed("message is not an object".to_string()))?;
        let kind = obj
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| TrackerError::Malformed("missing 'type' field".to_string()))?;

        let body = || obj.get("body").cloned().unwrap_or(Value::Null);

        match kind {
            "request" => Ok(Self::Request {
                seq: obj.get("seq").and_then(Value::as_u64).unwrap_or(0),
                command: required_str(obj, "command")?,
                arguments: obj.get("arguments").cloned().unwrap_or(Value::Null),
            }),
            "response" => Ok(Self::Response {
                request_seq: obj
                    .get("request_seq")
                    .and_then(Value::as_u64)
                    .ok_or_else(|| {
                        TrackerError::Malformed("response without 'request_seq'".to_string())
                    })?,
                command: required_str(obj, "command")?,
                success: obj.get("success").and_then(Value::as_bool).unwrap_or(true),
                message: obj.get("message").and_then(Value::as_str).map(str::to_string),
                body: body(),
            }),
            "event" => Ok(Self::Event {
                kind: EventKind::from_name(&required_str(obj, "event")?),
                body: body(),
            }),
            _ => Ok(Self::Unknown(raw.clone())),
        }
    }

    /// Event kind, if this is an event.
    #[must_use]
    pub const fn event_kind(&self) -> Option<&EventKind> {
        match self {
            Self::Event { kind, .. } => Some(kind),
            _ => None,
        }
    }

    /// Whether this is an event of the given kind.
    #[must_use]
    pub fn is_event(&self, kind: &EventKind) -> bool {
        self.event_kind() == Some(kind)
    }

    /// Message body, if any.
    #[must_use]
    pub const fn body(&self) -> Option<&Value> {
        match self {
            Self::Response { body, .. } | Self::Event { body, .. } => Some(body),
            Self::Request { arguments, .. } => Some(arguments),
            Self::Unknown(_) => None,
        }
    }
}

fn required_str(obj: &serde_json::Map<String, Value>, key: &str) -> Result<String, TrackerError> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| TrackerError::Malformed(format!("missing '{key}' field")))
}
