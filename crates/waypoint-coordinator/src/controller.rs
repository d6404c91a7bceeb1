//! Script-level debug operations built on coordinated waits.

use std::{sync::Arc, time::Duration};

use serde::Deserialize;
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use waypoint_core::{
    ClassifiedMessage, CoordinationConfig, DebugSession, EventKind, MessageTracker, Outcome,
    SessionError,
};
use waypoint_session::TrackerRegistry;

use crate::{
    classify::OutcomeClassifier,
    requests::{
        DisconnectArguments, SetBreakpointsArguments, StepKind, ThreadArguments, to_arguments,
    },
    threads::ThreadResolver,
    wait::{WaitCoordinator, WaitError, WaitResult},
};

/// Per-call wait options.
#[derive(Debug, Clone, Default)]
pub struct WaitOptions {
    /// Overrides the configured default timeout.
    pub timeout: Option<Duration>,
    pub cancel: CancellationToken,
}

impl WaitOptions {
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Adapter verdict on one requested breakpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BreakpointStatus {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub line: Option<u32>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SetBreakpointsBody {
    #[serde(default)]
    breakpoints: Vec<BreakpointStatus>,
}

/// Entry point for scripted debugging.
///
/// Every operation that resumes the debuggee arms its wait before the
/// command is sent, so a stop reported while the command is still in flight
/// is never missed.
pub struct DebugController {
    registry: Arc<TrackerRegistry>,
    resolver: ThreadResolver,
    default_timeout: Duration,
}

impl DebugController {
    #[must_use]
    pub fn new(registry: Arc<TrackerRegistry>, config: &CoordinationConfig) -> Self {
        Self {
            registry,
            resolver: ThreadResolver::from_config(config),
            default_timeout: config.default_timeout(),
        }
    }

    #[must_use]
    pub const fn registry(&self) -> &Arc<TrackerRegistry> {
        &self.registry
    }

    /// Replace the breakpoints of one source file.
    ///
    /// The session's tracker is attached first so the response is recorded
    /// in its breakpoint table.
    ///
    /// # Errors
    /// Returns the session error if the adapter refuses the request.
    pub async fn set_breakpoints(
        &self,
        session: &dyn DebugSession,
        arguments: &SetBreakpointsArguments,
    ) -> Result<Vec<BreakpointStatus>, SessionError> {
        let session_id = session.id();
        self.registry.attach(session).await;
        let body = session
            .request("setBreakpoints", to_arguments(arguments))
            .await?;
        let statuses = serde_json::from_value::<SetBreakpointsBody>(body)
            .unwrap_or_else(|e| {
                warn!(%session_id, error = %e, "unreadable setBreakpoints response");
                SetBreakpointsBody::default()
            })
            .breakpoints;
        info!(
            %session_id,
            path = %arguments.source.path,
            requested = arguments.breakpoints.len(),
            verified = statuses.iter().filter(|b| b.verified).count(),
            "breakpoints set"
        );
        Ok(statuses)
    }

    /// Resume `thread_id` and wait for the next stop or termination.
    ///
    /// # Errors
    /// Returns error if the wait is cancelled or the tracker closes.
    pub async fn continue_until_stop(
        &self,
        session: &dyn DebugSession,
        thread_id: i64,
        options: WaitOptions,
    ) -> Result<Outcome, WaitError> {
        self.resume(session, "continue", thread_id, options).await
    }

    /// Step `thread_id` and wait for it to stop again.
    ///
    /// # Errors
    /// Returns error if the wait is cancelled or the tracker closes.
    pub async fn step(
        &self,
        session: &dyn DebugSession,
        thread_id: i64,
        kind: StepKind,
        options: WaitOptions,
    ) -> Result<Outcome, WaitError> {
        self.resume(session, kind.command(), thread_id, options).await
    }

    /// Wait for the next stop or termination without sending anything.
    ///
    /// # Errors
    /// Returns error if the wait is cancelled or the tracker closes.
    pub async fn wait_for_stop(
        &self,
        session: &dyn DebugSession,
        options: WaitOptions,
    ) -> Result<Outcome, WaitError> {
        let tracker = self.registry.attach(session).await;
        let waiter = WaitCoordinator::arm(&tracker, self.timeout(&options), options.cancel.clone())?;
        let deadline = waiter.deadline();
        let result = waiter.resolve(ends_wait).await?;
        self.settle(session, &tracker, &result, &options.cancel, deadline)
            .await
    }

    /// End the debuggee and wait for the adapter to confirm.
    ///
    /// Uses `terminate` when the adapter advertises it, otherwise
    /// `disconnect` with `terminateDebuggee`.
    ///
    /// # Errors
    /// Returns error if the wait is cancelled or the tracker closes.
    pub async fn terminate(
        &self,
        session: &dyn DebugSession,
        options: WaitOptions,
    ) -> Result<Outcome, WaitError> {
        let tracker = self.registry.attach(session).await;
        let supports_terminate = tracker
            .capabilities()
            .is_some_and(|c| c.supports("supportsTerminateRequest"));
        let (command, arguments) = if supports_terminate {
            ("terminate", Value::Object(serde_json::Map::new()))
        } else {
            (
                "disconnect",
                to_arguments(&DisconnectArguments {
                    terminate_debuggee: true,
                }),
            )
        };
        debug!(session_id = %session.id(), command, "terminating debuggee");

        let timeout = self.timeout(&options);
        let deadline = Instant::now() + timeout;
        let run = WaitCoordinator::run(
            &tracker,
            timeout,
            options.cancel.clone(),
            session.request(command, arguments),
            |msg: &ClassifiedMessage| msg.event_kind().is_some_and(EventKind::is_terminal),
        )
        .await;
        match run {
            Ok((_, result)) => {
                self.settle(session, &tracker, &result, &options.cancel, deadline)
                    .await
            }
            Err(WaitError::Session(e)) => Ok(OutcomeClassifier::rejected(&e)),
            Err(e) => Err(e),
        }
    }

    async fn resume(
        &self,
        session: &dyn DebugSession,
        command: &str,
        thread_id: i64,
        options: WaitOptions,
    ) -> Result<Outcome, WaitError> {
        let tracker = self.registry.attach(session).await;
        debug!(session_id = %session.id(), command, thread_id, "resuming");

        let timeout = self.timeout(&options);
        let deadline = Instant::now() + timeout;
        let run = WaitCoordinator::run(
            &tracker,
            timeout,
            options.cancel.clone(),
            session.request(command, to_arguments(&ThreadArguments { thread_id })),
            ends_wait,
        )
        .await;
        match run {
            Ok((_, result)) => {
                self.settle(session, &tracker, &result, &options.cancel, deadline)
                    .await
            }
            Err(WaitError::Session(e)) => {
                warn!(session_id = %session.id(), command, error = %e, "command rejected");
                Ok(OutcomeClassifier::rejected(&e))
            }
            Err(e) => Err(e),
        }
    }

    /// Classify a finished wait, resolving the stopped thread first.
    ///
    /// Thread resolution shares the wait's cancellation and deadline. Past
    /// the deadline the stop is reported without a thread.
    async fn settle(
        &self,
        session: &dyn DebugSession,
        tracker: &MessageTracker,
        result: &WaitResult,
        cancel: &CancellationToken,
        deadline: Instant,
    ) -> Result<Outcome, WaitError> {
        let session_id = session.id();
        let thread = match result {
            WaitResult::Matched(msg) if msg.is_event(&EventKind::Stopped) => {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Err(WaitError::Cancelled),
                    resolved = self.resolver.resolve(session) => match resolved {
                        Ok(thread) => Some(thread),
                        Err(e) => {
                            warn!(%session_id, error = %e, "could not resolve stopped thread");
                            None
                        }
                    },
                    () = tokio::time::sleep_until(deadline) => {
                        warn!(%session_id, "thread resolution outlived the wait");
                        None
                    }
                }
            }
            _ => None,
        };
        let outcome = OutcomeClassifier::settle(result, thread.as_ref(), &tracker.breakpoints());
        info!(%session_id, outcome = ?outcome, "wait settled");
        Ok(outcome)
    }

    fn timeout(&self, options: &WaitOptions) -> Duration {
        options.timeout.unwrap_or(self.default_timeout)
    }
}

fn ends_wait(msg: &ClassifiedMessage) -> bool {
    msg.event_kind()
        .is_some_and(|kind| *kind == EventKind::Stopped || kind.is_terminal())
}
