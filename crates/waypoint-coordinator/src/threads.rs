//! Picks the thread a stop should be reported against.
//!
//! Adapters that report several threads at a stop do not say which one the
//! user cares about. The first thread, in adapter order, whose top frame has
//! a source path is taken as the paused user thread.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};
use waypoint_core::{CoordinationConfig, DebugSession, SessionError, ThreadSnapshot};

use crate::requests::{StackTraceArguments, to_arguments};

/// Thread resolution error.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Adapter reported no threads")]
    NotFound,
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("Malformed {command} response: {reason}")]
    Malformed {
        command: &'static str,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Source {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
}

/// One stack frame as reported by the adapter.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StackFrame {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub source: Option<Source>,
    #[serde(default)]
    pub line: u32,
    #[serde(default)]
    pub column: u32,
}

impl StackFrame {
    /// Non-empty source path, if the frame has one.
    #[must_use]
    pub fn source_path(&self) -> Option<&str> {
        self.source
            .as_ref()
            .and_then(|s| s.path.as_deref())
            .filter(|p| !p.is_empty())
    }
}

#[derive(Debug, Deserialize)]
struct ThreadEntry {
    id: i64,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct ThreadsBody {
    #[serde(default)]
    threads: Vec<ThreadEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StackTraceBody {
    #[serde(default)]
    stack_frames: Vec<StackFrame>,
}

/// The thread chosen by [`ThreadResolver::resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedThread {
    pub snapshot: ThreadSnapshot,
    /// Frames fetched at full depth, top first. Empty when no thread had a
    /// source frame and the fallback thread could not be probed.
    pub frames: Vec<StackFrame>,
    /// No thread had a source frame; the first thread was chosen instead.
    pub ambiguous: bool,
}

impl ResolvedThread {
    #[must_use]
    pub const fn thread_id(&self) -> i64 {
        self.snapshot.thread_id
    }

    #[must_use]
    pub fn top_frame(&self) -> Option<&StackFrame> {
        self.frames.first()
    }
}

/// Sequential, short-circuiting thread prober.
#[derive(Debug, Clone, Copy)]
pub struct ThreadResolver {
    probe_depth: u32,
    full_depth: u32,
}

impl Default for ThreadResolver {
    fn default() -> Self {
        Self::new(1, 20)
    }
}

impl ThreadResolver {
    #[must_use]
    pub const fn new(probe_depth: u32, full_depth: u32) -> Self {
        Self {
            probe_depth,
            full_depth,
        }
    }

    #[must_use]
    pub const fn from_config(config: &CoordinationConfig) -> Self {
        Self::new(config.threads.probe_depth, config.threads.full_depth)
    }

    /// Find the paused user thread.
    ///
    /// # Errors
    /// Returns [`ResolveError::NotFound`] if the adapter lists no threads, or
    /// the session error if the `threads` request itself fails.
    pub async fn resolve(&self, session: &dyn DebugSession) -> Result<ResolvedThread, ResolveError> {
        let session_id = session.id();
        let body = session.request("threads", Value::Null).await?;
        let threads = serde_json::from_value::<ThreadsBody>(body)
            .map_err(|e| ResolveError::Malformed {
                command: "threads",
                reason: e.to_string(),
            })?
            .threads;

        let Some(first) = threads.first() else {
            return Err(ResolveError::NotFound);
        };

        for thread in &threads {
            match self.stack_trace(session, thread.id, self.probe_depth).await {
                Ok(frames) if frames.first().is_some_and(|f| f.source_path().is_some()) => {
                    debug!(%session_id, thread_id = thread.id, "thread has a source frame");
                    let frames = self.stack_trace(session, thread.id, self.full_depth).await?;
                    return Ok(ResolvedThread {
                        snapshot: snapshot(thread, true),
                        frames,
                        ambiguous: false,
                    });
                }
                Ok(_) => debug!(%session_id, thread_id = thread.id, "no source frame on thread"),
                Err(e) => debug!(%session_id, thread_id = thread.id, error = %e, "thread not paused"),
            }
        }

        warn!(
            %session_id,
            thread_id = first.id,
            thread_count = threads.len(),
            "no thread has a source frame; using first thread"
        );
        let frames = self
            .stack_trace(session, first.id, self.full_depth)
            .await
            .unwrap_or_default();
        Ok(ResolvedThread {
            snapshot: snapshot(first, false),
            frames,
            ambiguous: true,
        })
    }

    async fn stack_trace(
        &self,
        session: &dyn DebugSession,
        thread_id: i64,
        levels: u32,
    ) -> Result<Vec<StackFrame>, ResolveError> {
        let args = to_arguments(&StackTraceArguments::top(thread_id, levels));
        let body = session.request("stackTrace", args).await?;
        let mut frames = serde_json::from_value::<StackTraceBody>(body)
            .map_err(|e| ResolveError::Malformed {
                command: "stackTrace",
                reason: e.to_string(),
            })?
            .stack_frames;
        // Some adapters ignore `levels`.
        if levels > 0 {
            frames.truncate(levels as usize);
        }
        Ok(frames)
    }
}

fn snapshot(thread: &ThreadEntry, has_source_frame: bool) -> ThreadSnapshot {
    ThreadSnapshot {
        thread_id: thread.id,
        name: thread.name.clone(),
        has_source_frame,
    }
}
