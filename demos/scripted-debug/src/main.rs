//! Scripted debugging and test discovery against in-memory collaborators.
//!
//! Run with: cargo run -p scripted-debug-demo [config.toml]
//!
//! Set `RUST_LOG=debug` to follow each message through the tracker.

use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use anyhow::Context;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use waypoint_coordinator::{DebugController, SetBreakpointsArguments, StepKind, WaitOptions};
use waypoint_core::{CoordinationConfig, DebugSession, Outcome, TestItem};
use waypoint_discovery::{MemoryFeed, QuiescenceDetector, QuiescenceOptions};
use waypoint_session::{MemorySession, Scripted, SessionLifecycle, TrackerRegistry};

const MAIN: &str = "/workspace/lib/main.dart";
const BREAK_LINE: u32 = 12;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = match std::env::args().nth(1).map(PathBuf::from) {
        Some(path) => CoordinationConfig::load(&path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => CoordinationConfig::default(),
    };

    let registry = Arc::new(TrackerRegistry::from_config(&config));
    let (lifecycle, events) = mpsc::channel(8);
    let listener = Arc::clone(&registry).spawn_lifecycle_listener(events);
    let controller = DebugController::new(Arc::clone(&registry), &config);

    let session = Arc::new(scripted_adapter());
    lifecycle
        .send(SessionLifecycle::Started(Arc::clone(&session) as Arc<dyn DebugSession>))
        .await?;
    // The listener attaches asynchronously; attach here so the initialize
    // response is tracked.
    registry.attach(session.as_ref()).await;
    session
        .request("initialize", json!({ "adapterID": "dart" }))
        .await?;

    let statuses = controller
        .set_breakpoints(
            session.as_ref(),
            &SetBreakpointsArguments::new(MAIN).line(BREAK_LINE),
        )
        .await?;
    tracing::info!(?statuses, "breakpoints");

    let options = || WaitOptions::default().with_timeout(Duration::from_secs(2));
    let stop = controller
        .continue_until_stop(session.as_ref(), 1, options())
        .await?;
    report("continue", &stop)?;

    let thread_id = stop.as_stopped().map_or(1, |s| s.thread_id);
    let step = controller
        .step(session.as_ref(), thread_id, StepKind::Over, options())
        .await?;
    report("step over", &step)?;

    let end = controller.terminate(session.as_ref(), options()).await?;
    report("terminate", &end)?;

    lifecycle.send(SessionLifecycle::Ended(session.id())).await?;
    drop(lifecycle);
    listener.await?;

    discover(&config).await
}

/// A Dart-like adapter paused in `main()` of a small program.
fn scripted_adapter() -> MemorySession {
    let session = MemorySession::new("dart");
    let line = Arc::new(AtomicU32::new(1));

    session.on("initialize", |_| {
        Scripted::ok(json!({ "supportsTerminateRequest": true })).then_event("initialized", json!({}))
    });
    session.on("setBreakpoints", |args| {
        let breakpoints: Vec<Value> = args["breakpoints"]
            .as_array()
            .into_iter()
            .flatten()
            .enumerate()
            .map(|(i, bp)| json!({ "id": i + 1, "verified": true, "line": bp["line"] }))
            .collect();
        Scripted::ok(json!({ "breakpoints": breakpoints }))
    });

    let at = Arc::clone(&line);
    session.on("continue", move |_| {
        at.store(BREAK_LINE, Ordering::SeqCst);
        Scripted::ok(json!({ "allThreadsContinued": true })).then_event_after(
            Duration::from_millis(25),
            "stopped",
            json!({ "threadId": 1, "reason": "breakpoint", "hitBreakpointIds": [1] }),
        )
    });
    let at = Arc::clone(&line);
    session.on("next", move |_| {
        at.fetch_add(1, Ordering::SeqCst);
        Scripted::ok(json!({})).then_event("stopped", json!({ "threadId": 1, "reason": "step" }))
    });
    session.on("terminate", |_| {
        Scripted::ok(json!({}))
            .then_event("terminated", json!({}))
            .then_event("exited", json!({ "exitCode": 0 }))
    });

    session.on("threads", |_| {
        Scripted::ok(json!({
            "threads": [
                { "id": 2, "name": "vm-service" },
                { "id": 1, "name": "main" },
            ],
        }))
    });
    let at = Arc::clone(&line);
    session.on("stackTrace", move |args| {
        if args["threadId"] == 1 {
            Scripted::ok(json!({
                "stackFrames": [{
                    "id": 1000,
                    "name": "main",
                    "source": { "name": "main.dart", "path": MAIN },
                    "line": at.load(Ordering::SeqCst),
                    "column": 3,
                }],
            }))
        } else {
            Scripted::reject("Isolate is not paused")
        }
    });
    session
}

async fn discover(config: &CoordinationConfig) -> anyhow::Result<()> {
    let feed = Arc::new(MemoryFeed::new());
    let producer = Arc::downgrade(&feed);
    feed.on_command("testing.refreshTests", move || {
        let Some(feed) = producer.upgrade() else {
            return Ok(());
        };
        tokio::spawn(async move {
            for name in ["parses empty input", "rejects bad header", "round trips"] {
                feed.push(TestItem::new(name));
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        });
        Ok(())
    });

    let options = QuiescenceOptions::from(&config.discovery).with_timeout(Duration::from_secs(5));
    let outcome =
        QuiescenceDetector::wait_for_quiet(feed.as_ref(), &options, CancellationToken::new())
            .await?;
    println!("discovery: {}", serde_json::to_string(&outcome)?);
    Ok(())
}

fn report(step: &str, outcome: &Outcome) -> anyhow::Result<()> {
    println!("{step}: {}", serde_json::to_string_pretty(outcome)?);
    Ok(())
}
