//! Best-effort producer commands that kick discovery into action.

use std::time::Duration;

use tracing::{debug, warn};
use waypoint_core::DiscoveryFeed;

/// Run `commands` in order until one succeeds.
///
/// Each attempt is bounded by `per_attempt`. Failures and timeouts are
/// logged and skipped; running out of commands is not an error. Returns the
/// command that succeeded, if any.
pub async fn nudge(
    feed: &dyn DiscoveryFeed,
    commands: &[String],
    per_attempt: Duration,
) -> Option<String> {
    for command in commands {
        match tokio::time::timeout(per_attempt, feed.run_command(command)).await {
            Ok(Ok(())) => {
                debug!(command = %command, "discovery nudged");
                return Some(command.clone());
            }
            Ok(Err(e)) => warn!(command = %command, error = %e, "nudge command failed"),
            Err(_) => warn!(
                command = %command,
                timeout_ms = per_attempt.as_millis(),
                "nudge command timed out"
            ),
        }
    }
    if !commands.is_empty() {
        warn!(attempts = commands.len(), "no nudge command succeeded");
    }
    None
}
