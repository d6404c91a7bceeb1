//! Settle detection for bursty, append-only discovery feeds.
//!
//! A feed is considered settled once nothing is busy, no change has been
//! seen for the quiet window and at least `min_items` items are known.
//! Readiness is only evaluated on poll ticks, and not before the nudge
//! commands have finished.

use std::time::Duration;

use thiserror::Error;
use tokio::{
    sync::broadcast::{self, error::RecvError},
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span};
use waypoint_core::{
    DiscoveryFeed, DiscoveryOutcome, FeedReadiness, TestItem, config::DiscoverySettings,
};

use crate::nudge::nudge;

/// Discovery error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DiscoveryError {
    #[error("Discovery wait cancelled by caller")]
    Cancelled,
    #[error("Invalid discovery options: {0} must be greater than zero")]
    InvalidOptions(&'static str),
}

/// Settings for one [`QuiescenceDetector::wait_for_quiet`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuiescenceOptions {
    pub timeout: Duration,
    pub quiet_window: Duration,
    pub min_items: usize,
    pub poll_interval: Duration,
    pub nudge_timeout: Duration,
    /// Producer commands tried in order until one succeeds.
    pub nudge_commands: Vec<String>,
}

impl Default for QuiescenceOptions {
    fn default() -> Self {
        Self::from(&DiscoverySettings::default())
    }
}

impl From<&DiscoverySettings> for QuiescenceOptions {
    fn from(settings: &DiscoverySettings) -> Self {
        Self {
            timeout: settings.timeout(),
            quiet_window: settings.quiet_window(),
            min_items: settings.min_items,
            poll_interval: settings.poll_interval(),
            nudge_timeout: settings.nudge_timeout(),
            nudge_commands: settings.nudge_commands.clone(),
        }
    }
}

impl QuiescenceOptions {
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_quiet_window(mut self, quiet_window: Duration) -> Self {
        self.quiet_window = quiet_window;
        self
    }

    #[must_use]
    pub fn with_min_items(mut self, min_items: usize) -> Self {
        self.min_items = min_items;
        self
    }

    #[must_use]
    pub fn with_nudge_commands(mut self, commands: Vec<String>) -> Self {
        self.nudge_commands = commands;
        self
    }

    /// Reject durations that cannot drive a wait.
    ///
    /// # Errors
    /// Returns [`DiscoveryError::InvalidOptions`] naming the first zero
    /// duration among `timeout`, `poll_interval` and `nudge_timeout`.
    pub fn validate(&self) -> Result<(), DiscoveryError> {
        if self.timeout.is_zero() {
            return Err(DiscoveryError::InvalidOptions("timeout"));
        }
        if self.poll_interval.is_zero() {
            return Err(DiscoveryError::InvalidOptions("poll_interval"));
        }
        if self.nudge_timeout.is_zero() && !self.nudge_commands.is_empty() {
            return Err(DiscoveryError::InvalidOptions("nudge_timeout"));
        }
        Ok(())
    }
}

/// What one wait knows about the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryState {
    pub items_seen: usize,
    pub last_change: Instant,
    pub busy: bool,
}

impl DiscoveryState {
    #[must_use]
    pub fn new(items: &[TestItem], now: Instant) -> Self {
        Self {
            items_seen: items.len(),
            last_change: now,
            busy: items.iter().any(|i| i.busy),
        }
    }

    /// Record a change notification.
    pub fn record_change(&mut self, items: &[TestItem], now: Instant) {
        *self = Self::new(items, now);
    }

    /// Whether the feed has settled as of `now`.
    #[must_use]
    pub fn is_ready(&self, now: Instant, options: &QuiescenceOptions) -> bool {
        !self.busy
            && now.saturating_duration_since(self.last_change) >= options.quiet_window
            && self.items_seen >= options.min_items
    }
}

/// Waits for a discovery feed to settle.
pub struct QuiescenceDetector;

impl QuiescenceDetector {
    /// Wait until `feed` settles, the timeout passes or `cancel` fires.
    ///
    /// Feeds without a provider, or without configuration, return
    /// immediately. Otherwise change notifications are subscribed to before
    /// the nudge commands run, so items produced by a nudge are counted.
    ///
    /// # Errors
    /// Returns [`DiscoveryError::InvalidOptions`] before touching the feed if
    /// `options` fails [`QuiescenceOptions::validate`], and
    /// [`DiscoveryError::Cancelled`] if `cancel` fires first.
    pub async fn wait_for_quiet(
        feed: &dyn DiscoveryFeed,
        options: &QuiescenceOptions,
        cancel: CancellationToken,
    ) -> Result<DiscoveryOutcome, DiscoveryError> {
        options.validate()?;
        match feed.readiness() {
            FeedReadiness::NoProvider => return Ok(DiscoveryOutcome::NoProvider),
            FeedReadiness::NotConfigured => return Ok(DiscoveryOutcome::NotConfigured),
            FeedReadiness::Ready => {}
        }

        let span = info_span!(
            "discovery_wait",
            min_items = options.min_items,
            quiet_window_ms = options.quiet_window.as_millis()
        );
        Self::settle(feed, options, cancel).instrument(span).await
    }

    async fn settle(
        feed: &dyn DiscoveryFeed,
        options: &QuiescenceOptions,
        cancel: CancellationToken,
    ) -> Result<DiscoveryOutcome, DiscoveryError> {
        let mut changes = Some(feed.changes());
        let started = Instant::now();
        let mut state = DiscoveryState::new(&feed.current_items(), started);

        let nudging = nudge(feed, &options.nudge_commands, options.nudge_timeout);
        tokio::pin!(nudging);
        let mut nudged = false;

        let deadline = tokio::time::sleep_until(started + options.timeout);
        tokio::pin!(deadline);

        let mut ticker = tokio::time::interval(options.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!(items = state.items_seen, "discovery wait cancelled");
                    return Err(DiscoveryError::Cancelled);
                }
                changed = next_change(&mut changes) => {
                    match changed {
                        Ok(()) | Err(RecvError::Lagged(_)) => {
                            state.record_change(&feed.current_items(), Instant::now());
                            debug!(items = state.items_seen, busy = state.busy, "discovery feed changed");
                        }
                        Err(RecvError::Closed) => {
                            debug!("discovery feed stopped publishing changes");
                            changes = None;
                        }
                    }
                }
                _ = &mut nudging, if !nudged => nudged = true,
                _ = ticker.tick() => {
                    // Nudges are bounded by nudge_timeout per command.
                    if nudged && state.is_ready(Instant::now(), options) {
                        info!(
                            items = state.items_seen,
                            elapsed_ms = started.elapsed().as_millis(),
                            "discovery settled"
                        );
                        return Ok(DiscoveryOutcome::Ready { item_count: state.items_seen });
                    }
                }
                () = &mut deadline => {
                    let item_count = feed.current_items().len().max(state.items_seen);
                    info!(items = item_count, "discovery did not settle in time");
                    return Ok(DiscoveryOutcome::Timeout { item_count });
                }
            }
        }
    }
}

async fn next_change(changes: &mut Option<broadcast::Receiver<()>>) -> Result<(), RecvError> {
    match changes {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
