//! End-to-end debug flows against an in-memory session.

use std::{sync::Arc, time::Duration};

use serde_json::{Value, json};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use waypoint_coordinator::{
    DebugController, SetBreakpointsArguments, StepKind, WaitCoordinator, WaitError, WaitOptions,
    WaitResult,
};
use waypoint_core::{
    ClassifiedMessage, CoordinationConfig, DebugSession, ErrorCode, EventKind, Outcome,
};
use waypoint_session::{MemorySession, Scripted, TrackerRegistry};

const MAIN: &str = "/app/lib/main.dart";

fn controller() -> DebugController {
    DebugController::new(
        Arc::new(TrackerRegistry::new()),
        &CoordinationConfig::default(),
    )
}

/// Session with one paused thread whose top frame is `MAIN:12`.
fn paused_session() -> MemorySession {
    let session = MemorySession::new("dart");
    session.on("threads", |_| {
        Scripted::ok(json!({ "threads": [{ "id": 1, "name": "main" }] }))
    });
    session.on("stackTrace", |_| {
        Scripted::ok(json!({
            "stackFrames": [{
                "id": 100,
                "name": "main",
                "source": { "name": "main.dart", "path": MAIN },
                "line": 12,
                "column": 3,
            }],
        }))
    });
    session.on("setBreakpoints", |args| {
        let breakpoints: Vec<Value> = args["breakpoints"]
            .as_array()
            .into_iter()
            .flatten()
            .enumerate()
            .map(|(i, bp)| json!({ "id": 7 + i, "verified": true, "line": bp["line"] }))
            .collect();
        Scripted::ok(json!({ "breakpoints": breakpoints }))
    });
    session
}

fn stopped_at_breakpoint() -> Value {
    json!({ "threadId": 1, "reason": "breakpoint", "hitBreakpointIds": [7] })
}

#[tokio::test(start_paused = true)]
async fn continue_reports_stop_from_breakpoint_table() {
    let controller = controller();
    let session = paused_session();
    session.on("continue", |_| {
        Scripted::ok(json!({ "allThreadsContinued": true })).then_event_after(
            Duration::from_millis(10),
            "stopped",
            stopped_at_breakpoint(),
        )
    });

    let statuses = controller
        .set_breakpoints(&session, &SetBreakpointsArguments::new(MAIN).line(12))
        .await
        .unwrap();
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].id, Some(7));

    let started = Instant::now();
    let outcome = controller
        .continue_until_stop(
            &session,
            1,
            WaitOptions::default().with_timeout(Duration::from_secs(5)),
        )
        .await
        .unwrap();
    let elapsed = started.elapsed();

    let stopped = outcome.as_stopped().expect("stopped outcome");
    assert_eq!(stopped.thread_id, 1);
    assert_eq!(stopped.hit_breakpoint_ids, vec![7]);
    let location = stopped.location.as_ref().unwrap();
    assert_eq!(location.file, MAIN);
    assert_eq!(location.line, 12);
    assert_eq!(location.column, Some(3));
    assert!(!stopped.ambiguous);
    assert!(elapsed < Duration::from_millis(100), "took {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn silent_session_times_out_and_tears_down() {
    let controller = controller();
    let session = paused_session();
    session.on("continue", |_| Scripted::ok(json!({})));

    let started = Instant::now();
    let outcome = controller
        .continue_until_stop(
            &session,
            1,
            WaitOptions::default().with_timeout(Duration::from_millis(200)),
        )
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(outcome, Outcome::Timeout);
    assert!(elapsed >= Duration::from_millis(200));
    assert!(elapsed < Duration::from_millis(250), "took {elapsed:?}");

    let tracker = controller.registry().tracker(session.id()).await.unwrap();
    assert_eq!(tracker.listener_count(), 0);

    // A late stop is forwarded to nobody.
    session.emit_event("stopped", stopped_at_breakpoint());
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(tracker.listener_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn cancellation_interrupts_a_long_wait() {
    let controller = controller();
    let session = paused_session();
    session.on("continue", |_| Scripted::ok(json!({})));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let result = controller
        .continue_until_stop(
            &session,
            1,
            WaitOptions::default()
                .with_timeout(Duration::from_secs(5))
                .with_cancel(cancel),
        )
        .await;

    assert!(matches!(result, Err(WaitError::Cancelled)));
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(50));
    assert!(elapsed < Duration::from_millis(100), "took {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn stop_emitted_during_the_command_is_not_lost() {
    let controller = controller();
    let session = paused_session();
    session.on("next", |_| {
        Scripted::ok(json!({})).then_event("stopped", json!({ "threadId": 1, "reason": "step" }))
    });

    let outcome = controller
        .step(
            &session,
            1,
            StepKind::Over,
            WaitOptions::default().with_timeout(Duration::from_secs(1)),
        )
        .await
        .unwrap();

    let stopped = outcome.as_stopped().expect("stopped outcome");
    assert_eq!(stopped.reason, "step");
    assert_eq!(stopped.location.as_ref().unwrap().line, 12);
}

#[tokio::test(start_paused = true)]
async fn arming_before_the_request_sees_synchronous_events() {
    let registry = TrackerRegistry::new();
    let session = paused_session();
    session.on("continue", |_| Scripted::ok(json!({})).then_event("exited", json!({ "exitCode": 0 })));
    let tracker = registry.attach(&session).await;

    let (_, result) = WaitCoordinator::run(
        &tracker,
        Duration::from_secs(1),
        CancellationToken::new(),
        session.request("continue", json!({ "threadId": 1 })),
        |msg: &ClassifiedMessage| msg.event_kind().is_some_and(EventKind::is_terminal),
    )
    .await
    .unwrap();

    assert!(matches!(result, WaitResult::Matched(ClassifiedMessage::Event { kind: EventKind::Exited, .. })));
}

#[tokio::test(start_paused = true)]
async fn rejected_step_becomes_an_error_outcome() {
    let controller = controller();
    let session = paused_session();
    session.on("stepIn", |_| Scripted::reject("Thread 1 is not paused"));

    let outcome = controller
        .step(&session, 1, StepKind::In, WaitOptions::default())
        .await
        .unwrap();

    match outcome {
        Outcome::Error { code, hint, .. } => {
            assert_eq!(code, ErrorCode::AdapterRejected);
            assert!(hint.is_some());
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    let tracker = controller.registry().tracker(session.id()).await.unwrap();
    assert_eq!(tracker.listener_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn closed_session_is_reported_as_error() {
    let controller = controller();
    let session = paused_session();
    session.close();

    let outcome = controller
        .continue_until_stop(&session, 1, WaitOptions::default())
        .await
        .unwrap();
    assert!(matches!(outcome, Outcome::Error { code: ErrorCode::SessionClosed, .. }));
}

#[tokio::test(start_paused = true)]
async fn terminate_prefers_terminate_request_when_supported() {
    let controller = controller();
    let session = paused_session();
    session.on("initialize", |_| Scripted::ok(json!({ "supportsTerminateRequest": true })));
    session.on("terminate", |_| Scripted::ok(json!({})).then_event("terminated", json!({})));

    let tracker = controller.registry().attach(&session).await;
    let mut sub = tracker.subscribe();
    session.request("initialize", json!({ "adapterID": "dart" })).await.unwrap();
    // Let the forwarder record the capabilities.
    while !matches!(sub.recv().await.unwrap(), ClassifiedMessage::Response { .. }) {}
    drop(sub);

    let outcome = controller
        .terminate(&session, WaitOptions::default())
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Terminated);
    assert_eq!(session.requests_for("terminate").len(), 1);
    assert!(session.requests_for("disconnect").is_empty());
}

#[tokio::test(start_paused = true)]
async fn terminate_falls_back_to_disconnect() {
    let controller = controller();
    let session = paused_session();
    session.on("disconnect", |_| Scripted::ok(json!({})).then_event("exited", json!({ "exitCode": 0 })));

    let outcome = controller
        .terminate(&session, WaitOptions::default())
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Terminated);
    assert_eq!(
        session.requests_for("disconnect"),
        vec![json!({ "terminateDebuggee": true })]
    );
}

#[tokio::test(start_paused = true)]
async fn wait_for_stop_observes_an_unsolicited_stop() {
    let controller = controller();
    let session = Arc::new(paused_session());

    let emitter = Arc::clone(&session);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        emitter.emit_event("stopped", json!({ "threadId": 1, "reason": "pause" }));
    });

    let outcome = controller
        .wait_for_stop(&*session, WaitOptions::default())
        .await
        .unwrap();
    assert_eq!(outcome.as_stopped().unwrap().reason, "pause");
}

#[tokio::test(start_paused = true)]
async fn unanswered_continue_times_out_at_the_deadline() {
    let controller = controller();
    let session = paused_session();
    session.on("continue", |_| Scripted::unanswered());

    let started = Instant::now();
    let outcome = controller
        .continue_until_stop(
            &session,
            1,
            WaitOptions::default().with_timeout(Duration::from_millis(300)),
        )
        .await
        .unwrap();

    assert_eq!(outcome, Outcome::Timeout);
    assert_eq!(started.elapsed(), Duration::from_millis(300));
    let tracker = controller.registry().tracker(session.id()).await.unwrap();
    assert_eq!(tracker.listener_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn cancellation_interrupts_thread_resolution() {
    let controller = controller();
    let session = paused_session();
    session.on("continue", |_| Scripted::ok(json!({})).then_event("stopped", stopped_at_breakpoint()));
    session.on("stackTrace", |_| Scripted::unanswered());

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let result = controller
        .continue_until_stop(
            &session,
            1,
            WaitOptions::default()
                .with_timeout(Duration::from_secs(30))
                .with_cancel(cancel),
        )
        .await;

    assert!(matches!(result, Err(WaitError::Cancelled)));
    assert_eq!(started.elapsed(), Duration::from_millis(100));
}

#[tokio::test(start_paused = true)]
async fn hung_thread_resolution_still_reports_the_stop_by_the_deadline() {
    let controller = controller();
    let session = paused_session();
    controller
        .set_breakpoints(&session, &SetBreakpointsArguments::new(MAIN).line(12))
        .await
        .unwrap();
    session.on("continue", |_| Scripted::ok(json!({})).then_event("stopped", stopped_at_breakpoint()));
    session.on("stackTrace", |_| Scripted::unanswered());

    let started = Instant::now();
    let outcome = controller
        .continue_until_stop(
            &session,
            1,
            WaitOptions::default().with_timeout(Duration::from_millis(500)),
        )
        .await
        .unwrap();

    assert_eq!(started.elapsed(), Duration::from_millis(500));
    let stopped = outcome.as_stopped().expect("stop is still reported");
    assert_eq!(stopped.thread_id, 1);
    assert_eq!(stopped.hit_breakpoint_ids, vec![7]);
    // Location falls back to the breakpoint table.
    let location = stopped.location.as_ref().unwrap();
    assert_eq!(location.file, MAIN);
    assert_eq!(location.line, 12);
}
