//! Thread probing order against adapters with several threads.

use serde_json::{Value, json};
use waypoint_coordinator::ThreadResolver;
use waypoint_session::{MemorySession, Scripted};

/// Five threads; only `with_source` has a source frame, the rest refuse
/// to produce a stack trace.
fn five_threads(with_source: i64) -> MemorySession {
    let session = MemorySession::new("dart");
    session.on("threads", |_| {
        let threads: Vec<Value> = (1..=5)
            .map(|id| json!({ "id": id, "name": format!("isolate {id}") }))
            .collect();
        Scripted::ok(json!({ "threads": threads }))
    });
    session.on("stackTrace", move |args| {
        if args["threadId"].as_i64() == Some(with_source) {
            Scripted::ok(json!({
                "stackFrames": [{
                    "id": 1,
                    "name": "build",
                    "source": { "path": "/app/lib/widget.dart" },
                    "line": 40,
                    "column": 7,
                }],
            }))
        } else {
            Scripted::reject("Isolate is not paused")
        }
    });
    session
}

fn probe_order(session: &MemorySession) -> Vec<i64> {
    session
        .requests_for("stackTrace")
        .iter()
        .filter(|args| args["levels"] == 1)
        .map(|args| args["threadId"].as_i64().unwrap())
        .collect()
}

#[tokio::test]
async fn resolves_fourth_thread_after_probing_in_order() {
    let session = five_threads(4);

    let resolved = ThreadResolver::default().resolve(&session).await.unwrap();

    assert_eq!(resolved.thread_id(), 4);
    assert_eq!(resolved.snapshot.name, "isolate 4");
    assert!(!resolved.ambiguous);
    assert_eq!(probe_order(&session), vec![1, 2, 3, 4]);
    assert_eq!(resolved.top_frame().unwrap().source_path(), Some("/app/lib/widget.dart"));
}

#[tokio::test]
async fn never_probes_past_the_winner() {
    let session = five_threads(3);

    let resolved = ThreadResolver::default().resolve(&session).await.unwrap();

    assert_eq!(resolved.thread_id(), 3);
    assert_eq!(probe_order(&session), vec![1, 2, 3]);
    // One extra full-depth fetch for the winner only.
    assert_eq!(session.requests_for("stackTrace").len(), 4);
}

#[tokio::test]
async fn no_source_frame_anywhere_is_ambiguous() {
    let session = five_threads(0);

    let resolved = ThreadResolver::default().resolve(&session).await.unwrap();

    assert_eq!(resolved.thread_id(), 1);
    assert!(resolved.ambiguous);
    assert_eq!(probe_order(&session), vec![1, 2, 3, 4, 5]);
}
