//! Collaborator traits for debug sessions and discovery feeds.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Session identifier.
pub type SessionId = Uuid;

/// Session error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// The adapter answered with `success: false`.
    #[error("Request '{command}' rejected by adapter: {message}")]
    Rejected { command: String, message: String },
    /// The session has ended; no further requests are accepted.
    #[error("Session closed")]
    Closed,
    /// The request never reached the adapter or its response was lost.
    #[error("Transport error: {0}")]
    Transport(String),
}

/// One external debug target.
///
/// `traffic` yields raw protocol JSON for both directions: every outbound
/// request is echoed before its response so that trackers can correlate
/// request arguments with the response by `seq` / `request_seq`.
#[async_trait]
pub trait DebugSession: Send + Sync {
    /// Unique session identifier.
    fn id(&self) -> SessionId;

    /// Adapter type tag (e.g. `"dart"`, `"lldb"`).
    fn kind(&self) -> &str;

    /// Send a request and return the response body.
    async fn request(&self, command: &str, arguments: Value) -> Result<Value, SessionError>;

    /// Subscribe to raw protocol traffic.
    fn traffic(&self) -> broadcast::Receiver<Value>;
}

/// A test item as reported by a discovery feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestItem {
    /// Stable item identifier.
    pub id: String,
    /// Whether the item is currently being resolved or refreshed.
    #[serde(default)]
    pub busy: bool,
}

impl TestItem {
    /// Create an idle item.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            busy: false,
        }
    }

    /// Create an item that is still being resolved.
    #[must_use]
    pub fn busy(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            busy: true,
        }
    }
}

/// Whether a discovery feed can produce items at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedReadiness {
    /// A provider is present and configured.
    Ready,
    /// No discovery provider is installed.
    NoProvider,
    /// A provider exists but the workspace has no test configuration.
    NotConfigured,
}

/// Discovery feed error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FeedError {
    #[error("Command not registered: {0}")]
    CommandNotFound(String),
    #[error("Command '{command}' failed: {message}")]
    CommandFailed { command: String, message: String },
}

/// Trait for bursty, append-only test discovery feeds.
#[async_trait]
pub trait DiscoveryFeed: Send + Sync {
    /// Whether the feed has a configured provider.
    fn readiness(&self) -> FeedReadiness;

    /// Snapshot of the items currently known to the feed.
    fn current_items(&self) -> Vec<TestItem>;

    /// Subscribe to change notifications.
    fn changes(&self) -> broadcast::Receiver<()>;

    /// Run a producer command that nudges discovery along.
    async fn run_command(&self, command: &str) -> Result<(), FeedError>;
}
