//! Discovery settle timing against an in-memory feed.

use std::{sync::Arc, time::Duration};

use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use waypoint_core::{DiscoveryOutcome, FeedReadiness, TestItem};
use waypoint_discovery::{DiscoveryError, MemoryFeed, QuiescenceDetector, QuiescenceOptions};

fn options(timeout_ms: u64) -> QuiescenceOptions {
    QuiescenceOptions::default()
        .with_timeout(Duration::from_millis(timeout_ms))
        .with_quiet_window(Duration::from_millis(500))
        .with_min_items(1)
        .with_nudge_commands(Vec::new())
}

fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}

#[tokio::test(start_paused = true)]
async fn burst_then_silence_settles_after_quiet_window() {
    let feed = Arc::new(MemoryFeed::new());
    let started = Instant::now();

    let producer = Arc::clone(&feed);
    tokio::spawn(async move {
        for (i, at) in [0, 10, 20].into_iter().enumerate() {
            tokio::time::sleep_until(started + ms(at)).await;
            producer.push(TestItem::new(format!("test {i}")));
        }
    });

    let outcome =
        QuiescenceDetector::wait_for_quiet(&*feed, &options(5_000), CancellationToken::new())
            .await
            .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(outcome, DiscoveryOutcome::Ready { item_count: 3 });
    assert!(elapsed >= ms(520), "settled early at {elapsed:?}");
    assert!(elapsed <= ms(570), "settled late at {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn empty_feed_times_out() {
    let feed = MemoryFeed::new();
    let started = Instant::now();

    let outcome =
        QuiescenceDetector::wait_for_quiet(&feed, &options(1_000), CancellationToken::new())
            .await
            .unwrap();

    assert_eq!(outcome, DiscoveryOutcome::Timeout { item_count: 0 });
    assert_eq!(started.elapsed(), ms(1_000));
}

#[tokio::test(start_paused = true)]
async fn busy_items_hold_off_readiness() {
    let feed = Arc::new(MemoryFeed::new());
    feed.push(TestItem::busy("suite"));
    let started = Instant::now();

    let producer = Arc::clone(&feed);
    tokio::spawn(async move {
        sleep(ms(800)).await;
        producer.set_busy("suite", false);
    });

    let outcome =
        QuiescenceDetector::wait_for_quiet(&*feed, &options(5_000), CancellationToken::new())
            .await
            .unwrap();

    assert_eq!(outcome, DiscoveryOutcome::Ready { item_count: 1 });
    assert!(started.elapsed() >= ms(1_300), "settled at {:?}", started.elapsed());
}

#[tokio::test(start_paused = true)]
async fn late_change_restarts_the_quiet_window() {
    let feed = Arc::new(MemoryFeed::new());
    feed.push(TestItem::new("a"));
    let started = Instant::now();

    let producer = Arc::clone(&feed);
    tokio::spawn(async move {
        sleep(ms(400)).await;
        producer.push(TestItem::new("b"));
    });

    let outcome =
        QuiescenceDetector::wait_for_quiet(&*feed, &options(5_000), CancellationToken::new())
            .await
            .unwrap();

    assert_eq!(outcome, DiscoveryOutcome::Ready { item_count: 2 });
    assert!(started.elapsed() >= ms(900), "settled at {:?}", started.elapsed());
}

#[tokio::test(start_paused = true)]
async fn busy_until_timeout_reports_best_known_count() {
    let feed = MemoryFeed::new();
    feed.push(TestItem::new("a"));
    feed.push(TestItem::busy("b"));

    let outcome =
        QuiescenceDetector::wait_for_quiet(&feed, &options(2_000), CancellationToken::new())
            .await
            .unwrap();

    assert_eq!(outcome, DiscoveryOutcome::Timeout { item_count: 2 });
}

#[tokio::test(start_paused = true)]
async fn missing_provider_and_configuration_return_immediately() {
    let started = Instant::now();

    let feed = MemoryFeed::new().with_readiness(FeedReadiness::NoProvider);
    let outcome = QuiescenceDetector::wait_for_quiet(&feed, &options(5_000), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome, DiscoveryOutcome::NoProvider);

    let feed = MemoryFeed::new().with_readiness(FeedReadiness::NotConfigured);
    let outcome = QuiescenceDetector::wait_for_quiet(&feed, &options(5_000), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome, DiscoveryOutcome::NotConfigured);

    assert_eq!(started.elapsed(), Duration::ZERO);
    assert!(feed.commands_run().is_empty());
}

#[tokio::test(start_paused = true)]
async fn items_produced_by_a_nudge_are_counted() {
    let feed = Arc::new(MemoryFeed::new());
    let weak = Arc::downgrade(&feed);
    feed.on_command("testing.reloadTests", move || {
        if let Some(feed) = weak.upgrade() {
            feed.push(TestItem::new("discovered"));
        }
        Ok(())
    });

    let options = options(5_000).with_nudge_commands(vec![
        "testing.refreshTests".to_string(),
        "testing.reloadTests".to_string(),
    ]);
    let outcome = QuiescenceDetector::wait_for_quiet(&*feed, &options, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome, DiscoveryOutcome::Ready { item_count: 1 });
    assert_eq!(
        feed.commands_run(),
        vec!["testing.refreshTests".to_string(), "testing.reloadTests".to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn cancellation_ends_the_wait() {
    let feed = MemoryFeed::new();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        sleep(ms(50)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let result = QuiescenceDetector::wait_for_quiet(&feed, &options(5_000), cancel).await;

    assert_eq!(result, Err(DiscoveryError::Cancelled));
    assert_eq!(started.elapsed(), ms(50));
}

#[tokio::test(start_paused = true)]
async fn readiness_waits_for_a_slow_nudge() {
    let feed = Arc::new(MemoryFeed::new());
    feed.push(TestItem::new("cached"));
    let weak = Arc::downgrade(&feed);
    feed.on_command_after("testing.refreshTests", ms(1_200), move || {
        if let Some(feed) = weak.upgrade() {
            feed.push(TestItem::new("refreshed"));
        }
        Ok(())
    });
    let started = Instant::now();

    let options = options(5_000).with_nudge_commands(vec!["testing.refreshTests".to_string()]);
    let outcome = QuiescenceDetector::wait_for_quiet(&*feed, &options, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome, DiscoveryOutcome::Ready { item_count: 2 });
    assert!(started.elapsed() >= ms(1_700), "settled at {:?}", started.elapsed());
}

#[tokio::test(start_paused = true)]
async fn zero_durations_fail_before_touching_the_feed() {
    let feed = MemoryFeed::new();
    feed.push(TestItem::new("a"));
    feed.on_command("testing.refreshTests", || Ok(()));
    let started = Instant::now();

    let mut polling = options(5_000).with_nudge_commands(vec!["testing.refreshTests".to_string()]);
    polling.poll_interval = Duration::ZERO;
    let result = QuiescenceDetector::wait_for_quiet(&feed, &polling, CancellationToken::new()).await;
    assert_eq!(result, Err(DiscoveryError::InvalidOptions("poll_interval")));

    let result = QuiescenceDetector::wait_for_quiet(&feed, &options(0), CancellationToken::new()).await;
    assert_eq!(result, Err(DiscoveryError::InvalidOptions("timeout")));

    assert_eq!(started.elapsed(), Duration::ZERO);
    assert!(feed.commands_run().is_empty());
}
