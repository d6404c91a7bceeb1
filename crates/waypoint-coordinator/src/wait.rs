//! Single-resolution wait on a session's classified traffic.
//!
//! A [`WaitCoordinator`] subscribes when it is armed, so it must be armed
//! before the command that triggers the awaited event is sent. It resolves
//! exactly once: the first matching message, the deadline, or cancellation,
//! whichever is ready first, with cancellation taking precedence.

use std::{future::Future, time::Duration};

use thiserror::Error;
use tokio::{sync::broadcast::error::RecvError, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use waypoint_core::{ClassifiedMessage, MessageTracker, SessionError, SessionId, Subscription};

/// Wait error.
#[derive(Debug, Error)]
pub enum WaitError {
    #[error("Wait cancelled by caller")]
    Cancelled,
    #[error("Timeout must be greater than zero")]
    InvalidTimeout,
    #[error("Message tracker closed while waiting")]
    TrackerClosed,
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// How a wait ended, when it was not cancelled.
#[derive(Debug, Clone, PartialEq)]
pub enum WaitResult {
    /// First message accepted by the predicate.
    Matched(ClassifiedMessage),
    /// The deadline passed first.
    TimedOut,
}

impl WaitResult {
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut)
    }
}

/// Armed single-resolution wait.
#[derive(Debug)]
pub struct WaitCoordinator {
    session_id: SessionId,
    subscription: Subscription,
    deadline: Instant,
    cancel: CancellationToken,
}

impl WaitCoordinator {
    /// Subscribe to `tracker` and start the clock.
    ///
    /// # Errors
    /// Returns [`WaitError::InvalidTimeout`] for a zero timeout.
    pub fn arm(
        tracker: &MessageTracker,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<Self, WaitError> {
        if timeout.is_zero() {
            return Err(WaitError::InvalidTimeout);
        }
        Ok(Self {
            session_id: tracker.session_id(),
            subscription: tracker.subscribe(),
            deadline: Instant::now() + timeout,
            cancel,
        })
    }

    /// Arm, run the triggering action, then wait for a match.
    ///
    /// The action shares the wait's deadline and cancellation. If the
    /// deadline passes before the action completes, the action is dropped and
    /// the wait ends as [`WaitResult::TimedOut`] with no value. If the action
    /// fails, the subscription is released and the failure returned.
    ///
    /// # Errors
    /// Returns error on cancellation, a failed action, or a closed tracker.
    pub async fn run<A, T, P>(
        tracker: &MessageTracker,
        timeout: Duration,
        cancel: CancellationToken,
        action: A,
        predicate: P,
    ) -> Result<(Option<T>, WaitResult), WaitError>
    where
        A: Future<Output = Result<T, SessionError>>,
        P: Fn(&ClassifiedMessage) -> bool,
    {
        let mut waiter = Self::arm(tracker, timeout, cancel.clone())?;
        let value = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(WaitError::Cancelled),
            result = action => result?,
            () = tokio::time::sleep_until(waiter.deadline) => {
                waiter.teardown();
                debug!(session_id = %waiter.session_id, "action outlived the wait");
                return Ok((None, WaitResult::TimedOut));
            }
        };
        let result = waiter.resolve(predicate).await?;
        Ok((Some(value), result))
    }

    /// When an unresolved wait gives up.
    #[must_use]
    pub const fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Wait for the first message accepted by `predicate`.
    ///
    /// The predicate may see messages unrelated to the eventual winner and
    /// must not have side effects.
    ///
    /// # Errors
    /// Returns [`WaitError::Cancelled`] if the token fires first and
    /// [`WaitError::TrackerClosed`] if the session's tracker shuts down.
    pub async fn resolve<P>(mut self, predicate: P) -> Result<WaitResult, WaitError>
    where
        P: Fn(&ClassifiedMessage) -> bool,
    {
        let session_id = self.session_id;
        let deadline = tokio::time::sleep_until(self.deadline);
        tokio::pin!(deadline);

        let result = loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break Err(WaitError::Cancelled),
                received = self.subscription.recv() => match received {
                    Ok(msg) if predicate(&msg) => break Ok(WaitResult::Matched(msg)),
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(%session_id, skipped, "waiter fell behind; skipped messages");
                    }
                    Err(RecvError::Closed) => break Err(WaitError::TrackerClosed),
                },
                () = &mut deadline => break Ok(WaitResult::TimedOut),
            }
        };

        self.teardown();
        debug!(%session_id, ?result, "wait resolved");
        result
    }

    /// Release the subscription. Idempotent; also runs on drop.
    pub fn teardown(&mut self) {
        self.subscription.unsubscribe();
    }
}
