//! In-memory discovery feed for development and tests.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError, RwLock},
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::broadcast;
use waypoint_core::{DiscoveryFeed, FeedError, FeedReadiness, TestItem};

const CHANGE_CAPACITY: usize = 256;

type CommandHandler = Arc<dyn Fn() -> Result<(), FeedError> + Send + Sync>;

struct Command {
    delay: Duration,
    handler: CommandHandler,
}

/// Scriptable [`DiscoveryFeed`].
///
/// Every mutation notifies subscribers of [`DiscoveryFeed::changes`].
pub struct MemoryFeed {
    readiness: RwLock<FeedReadiness>,
    items: Mutex<Vec<TestItem>>,
    changes: broadcast::Sender<()>,
    commands: RwLock<HashMap<String, Command>>,
    commands_run: Mutex<Vec<String>>,
}

impl Default for MemoryFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFeed {
    /// Empty, ready feed with no commands.
    #[must_use]
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            readiness: RwLock::new(FeedReadiness::Ready),
            items: Mutex::new(Vec::new()),
            changes,
            commands: RwLock::new(HashMap::new()),
            commands_run: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn with_readiness(self, readiness: FeedReadiness) -> Self {
        self.set_readiness(readiness);
        self
    }

    pub fn set_readiness(&self, readiness: FeedReadiness) {
        *self
            .readiness
            .write()
            .unwrap_or_else(PoisonError::into_inner) = readiness;
    }

    /// Append an item.
    pub fn push(&self, item: TestItem) {
        self.mutate(|items| items.push(item));
    }

    /// Mark an item busy or idle. Unknown IDs are ignored.
    pub fn set_busy(&self, id: &str, busy: bool) {
        self.mutate(|items| {
            if let Some(item) = items.iter_mut().find(|i| i.id == id) {
                item.busy = busy;
            }
        });
    }

    /// Drop every item.
    pub fn clear(&self) {
        self.mutate(Vec::clear);
    }

    /// Register a producer command.
    pub fn on_command<F>(&self, command: impl Into<String>, handler: F)
    where
        F: Fn() -> Result<(), FeedError> + Send + Sync + 'static,
    {
        self.on_command_after(command, Duration::ZERO, handler);
    }

    /// Register a producer command that takes `delay` to complete.
    pub fn on_command_after<F>(&self, command: impl Into<String>, delay: Duration, handler: F)
    where
        F: Fn() -> Result<(), FeedError> + Send + Sync + 'static,
    {
        self.commands
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                command.into(),
                Command {
                    delay,
                    handler: Arc::new(handler),
                },
            );
    }

    /// Every command attempted so far, in order.
    #[must_use]
    pub fn commands_run(&self) -> Vec<String> {
        self.commands_run
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn mutate(&self, f: impl FnOnce(&mut Vec<TestItem>)) {
        {
            let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut *items);
        }
        // No subscribers is fine.
        let _ = self.changes.send(());
    }
}

#[async_trait]
impl DiscoveryFeed for MemoryFeed {
    fn readiness(&self) -> FeedReadiness {
        *self.readiness.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn current_items(&self) -> Vec<TestItem> {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn changes(&self) -> broadcast::Receiver<()> {
        self.changes.subscribe()
    }

    async fn run_command(&self, command: &str) -> Result<(), FeedError> {
        self.commands_run
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(command.to_string());

        let registered = self
            .commands
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(command)
            .map(|c| (c.delay, Arc::clone(&c.handler)));
        let Some((delay, handler)) = registered else {
            return Err(FeedError::CommandNotFound(command.to_string()));
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        handler()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mutations_notify_subscribers() {
        let feed = MemoryFeed::new();
        let mut changes = feed.changes();

        feed.push(TestItem::busy("suite"));
        feed.set_busy("suite", false);
        changes.recv().await.unwrap();
        changes.recv().await.unwrap();

        assert_eq!(feed.current_items(), vec![TestItem::new("suite")]);
    }

    #[tokio::test]
    async fn unknown_commands_are_recorded_and_rejected() {
        let feed = MemoryFeed::new().with_readiness(FeedReadiness::NotConfigured);

        assert_eq!(
            feed.run_command("testing.refreshTests").await,
            Err(FeedError::CommandNotFound("testing.refreshTests".to_string()))
        );
        assert_eq!(feed.commands_run(), vec!["testing.refreshTests".to_string()]);
        assert_eq!(feed.readiness(), FeedReadiness::NotConfigured);
    }
}
