//! Process-wide registry of per-session message trackers.

use std::{collections::HashMap, sync::Arc};

use tokio::{
    sync::{RwLock, mpsc},
    task::JoinHandle,
};
use tracing::{Instrument, debug, info, info_span};
use waypoint_core::{
    CoordinationConfig, DebugSession, MessageTracker, SessionId, tracker::DEFAULT_CAPACITY,
};

/// Registry error.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Session not found: {0}")]
    NotFound(SessionId),
}

/// Session lifecycle notification.
pub enum SessionLifecycle {
    /// A session started; its tracker is created eagerly.
    Started(Arc<dyn DebugSession>),
    /// A session ended; its tracker is disposed.
    Ended(SessionId),
}

impl std::fmt::Debug for SessionLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Started(session) => f.debug_tuple("Started").field(&session.id()).finish(),
            Self::Ended(id) => f.debug_tuple("Ended").field(id).finish(),
        }
    }
}

/// Owner of every live [`MessageTracker`].
///
/// Trackers are created on first attach and disposed when their session
/// ends. This is the only state shared across concurrent waits.
pub struct TrackerRegistry {
    capacity: usize,
    trackers: RwLock<HashMap<SessionId, Arc<MessageTracker>>>,
}

impl Default for TrackerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a registry whose trackers buffer `capacity` messages per subscriber.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            trackers: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn from_config(config: &CoordinationConfig) -> Self {
        Self::with_capacity(config.wait.tracker_capacity)
    }

    /// Get the session's tracker, creating and attaching it on first use.
    pub async fn attach(&self, session: &dyn DebugSession) -> Arc<MessageTracker> {
        let session_id = session.id();
        if let Some(tracker) = self.trackers.read().await.get(&session_id) {
            return Arc::clone(tracker);
        }

        let mut trackers = self.trackers.write().await;
        let tracker = trackers.entry(session_id).or_insert_with(|| {
            info!(%session_id, kind = session.kind(), "attaching message tracker");
            let tracker = Arc::new(MessageTracker::with_capacity(session_id, self.capacity));
            tracker.attach(session);
            tracker
        });
        Arc::clone(tracker)
    }

    /// Look up an existing tracker.
    pub async fn get(&self, session_id: SessionId) -> Option<Arc<MessageTracker>> {
        self.trackers.read().await.get(&session_id).map(Arc::clone)
    }

    /// Look up an existing tracker, failing if the session is unknown.
    ///
    /// # Errors
    /// Returns error if no tracker is registered for the session.
    pub async fn tracker(&self, session_id: SessionId) -> Result<Arc<MessageTracker>, RegistryError> {
        self.get(session_id)
            .await
            .ok_or(RegistryError::NotFound(session_id))
    }

    /// Dispose of a session's tracker. Returns whether one existed.
    pub async fn detach(&self, session_id: SessionId) -> bool {
        let removed = self.trackers.write().await.remove(&session_id);
        match removed {
            Some(tracker) => {
                tracker.shutdown();
                info!(%session_id, "detached message tracker");
                true
            }
            None => false,
        }
    }

    /// Number of live trackers.
    pub async fn len(&self) -> usize {
        self.trackers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.trackers.read().await.is_empty()
    }

    /// Apply one lifecycle notification.
    pub async fn handle(&self, event: SessionLifecycle) {
        match event {
            SessionLifecycle::Started(session) => {
                self.attach(session.as_ref()).await;
            }
            SessionLifecycle::Ended(session_id) => {
                if !self.detach(session_id).await {
                    debug!(%session_id, "session ended without a tracker");
                }
            }
        }
    }

    /// Consume lifecycle notifications until the channel closes.
    pub fn spawn_lifecycle_listener(
        self: Arc<Self>,
        mut events: mpsc::Receiver<SessionLifecycle>,
    ) -> JoinHandle<()> {
        tokio::spawn(
            async move {
                while let Some(event) = events.recv().await {
                    self.handle(event).await;
                }
                debug!("lifecycle channel closed");
            }
            .instrument(info_span!("tracker_registry")),
        )
    }
}
