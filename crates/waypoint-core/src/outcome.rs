//! Canonical results handed back to script operations.

use serde::{Deserialize, Serialize};

/// Result of probing one thread's stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadSnapshot {
    pub thread_id: i64,
    pub name: String,
    pub has_source_frame: bool,
}

/// Source position of a stop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,
}

/// A stop, normalized regardless of which adapter reported it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoppedOutcome {
    pub thread_id: i64,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
    #[serde(default)]
    pub hit_breakpoint_ids: Vec<i64>,
    /// No thread had a source frame; the first thread was reported instead.
    #[serde(default)]
    pub ambiguous: bool,
}

/// Machine-readable error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// The adapter refused the command.
    AdapterRejected,
    /// The session went away while the command was in flight.
    SessionClosed,
    /// The command never reached the adapter.
    Transport,
    /// Waiting ran out of time and the caller treats that as a failure.
    TimedOut,
    /// A wait matched a message that carries no outcome.
    UnexpectedMessage,
}

/// Closed set of results for a coordinated wait.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Stopped(StoppedOutcome),
    Terminated,
    Error {
        code: ErrorCode,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        hint: Option<String>,
    },
    Timeout,
}

impl Outcome {
    /// Whether the debuggee is paused.
    #[must_use]
    pub const fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped(_))
    }

    /// The stop details, if stopped.
    #[must_use]
    pub const fn as_stopped(&self) -> Option<&StoppedOutcome> {
        match self {
            Self::Stopped(stopped) => Some(stopped),
            _ => None,
        }
    }

    /// Turn [`Outcome::Timeout`] into an [`Outcome::Error`] for callers
    /// that treat running out of time as a failure.
    #[must_use]
    pub fn timeout_as_error(self) -> Self {
        match self {
            Self::Timeout => Self::Error {
                code: ErrorCode::TimedOut,
                message: "Timed out waiting for the debugger".to_string(),
                hint: Some("Increase the timeout or check that the program reaches this point".to_string()),
            },
            other => other,
        }
    }
}

/// Closed set of results for a discovery wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DiscoveryOutcome {
    /// The feed settled with enough items.
    Ready { item_count: usize },
    /// A provider exists but tests are not configured.
    NotConfigured,
    /// No discovery provider is available.
    NoProvider,
    /// The feed did not settle in time; carries the best-known count.
    Timeout { item_count: usize },
}
