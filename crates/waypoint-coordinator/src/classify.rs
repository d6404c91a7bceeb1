//! Maps classified traffic to [`Outcome`]s.
//!
//! Everything here is pure; the caller supplies the resolved thread and a
//! snapshot of the session's breakpoint table.

use std::collections::HashMap;

use serde_json::Value;
use waypoint_core::{
    BreakpointMapping, ClassifiedMessage, ErrorCode, EventKind, Outcome, SessionError,
    SourceLocation, StoppedOutcome,
};

use crate::{threads::ResolvedThread, wait::WaitResult};

/// Stateless outcome classifier.
pub struct OutcomeClassifier;

impl OutcomeClassifier {
    /// Classify one message; `None` means it does not end a wait.
    #[must_use]
    pub fn classify(
        message: &ClassifiedMessage,
        thread: Option<&ResolvedThread>,
        breakpoints: &HashMap<i64, BreakpointMapping>,
    ) -> Option<Outcome> {
        match message {
            ClassifiedMessage::Event {
                kind: EventKind::Stopped,
                body,
            } => Some(Outcome::Stopped(stopped(body, thread, breakpoints))),
            ClassifiedMessage::Event { kind, .. } if kind.is_terminal() => {
                Some(Outcome::Terminated)
            }
            ClassifiedMessage::Response {
                success: false,
                command,
                message,
                ..
            } => {
                let message = message
                    .clone()
                    .unwrap_or_else(|| format!("Request '{command}' failed"));
                Some(Outcome::Error {
                    code: ErrorCode::AdapterRejected,
                    hint: hint_for(&message),
                    message,
                })
            }
            _ => None,
        }
    }

    /// Turn a finished wait into its outcome.
    ///
    /// A match that [`classify`](Self::classify) does not recognise is
    /// reported as [`ErrorCode::UnexpectedMessage`].
    #[must_use]
    pub fn settle(
        result: &WaitResult,
        thread: Option<&ResolvedThread>,
        breakpoints: &HashMap<i64, BreakpointMapping>,
    ) -> Outcome {
        match result {
            WaitResult::TimedOut => Outcome::Timeout,
            WaitResult::Matched(message) => Self::classify(message, thread, breakpoints)
                .unwrap_or_else(|| Outcome::Error {
                    code: ErrorCode::UnexpectedMessage,
                    message: format!("Wait matched a message with no outcome: {message:?}"),
                    hint: None,
                }),
        }
    }

    /// Outcome for a command the session refused to carry out.
    #[must_use]
    pub fn rejected(error: &SessionError) -> Outcome {
        let (code, hint) = match error {
            SessionError::Rejected { message, .. } => (ErrorCode::AdapterRejected, hint_for(message)),
            SessionError::Closed => (
                ErrorCode::SessionClosed,
                Some("The debug session has ended; start a new one".to_string()),
            ),
            SessionError::Transport(_) => (ErrorCode::Transport, None),
        };
        Outcome::Error {
            code,
            message: error.to_string(),
            hint,
        }
    }
}

fn stopped(
    body: &Value,
    thread: Option<&ResolvedThread>,
    breakpoints: &HashMap<i64, BreakpointMapping>,
) -> StoppedOutcome {
    let thread_id = body
        .get("threadId")
        .and_then(Value::as_i64)
        .or_else(|| thread.map(ResolvedThread::thread_id))
        .unwrap_or_default();
    let reason = body
        .get("reason")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();
    let hit_breakpoint_ids: Vec<i64> = body
        .get("hitBreakpointIds")
        .and_then(Value::as_array)
        .map(|ids| ids.iter().filter_map(Value::as_i64).collect())
        .unwrap_or_default();

    let frame_location = thread.and_then(|t| t.top_frame()).and_then(|frame| {
        frame.source_path().map(|path| SourceLocation {
            file: path.to_string(),
            line: frame.line,
            column: (frame.column > 0).then_some(frame.column),
            function_name: (!frame.name.is_empty()).then(|| frame.name.clone()),
        })
    });
    let table_location = hit_breakpoint_ids
        .iter()
        .find_map(|id| breakpoints.get(id))
        .map(|mapping| match &frame_location {
            Some(frame) if frame.file == mapping.source_path && frame.line == mapping.line => {
                frame.clone()
            }
            _ => SourceLocation {
                file: mapping.source_path.clone(),
                line: mapping.line,
                column: None,
                function_name: None,
            },
        });

    StoppedOutcome {
        thread_id,
        reason,
        location: table_location.or(frame_location),
        hit_breakpoint_ids,
        ambiguous: thread.is_some_and(|t| t.ambiguous),
    }
}

fn hint_for(message: &str) -> Option<String> {
    let lower = message.to_lowercase();
    let hint = if lower.contains("not paused") || lower.contains("not stopped") {
        "The program is running; wait for a stop before stepping or continuing"
    } else if lower.contains("unsupported command") || lower.contains("not supported") {
        "This debug adapter does not support the command"
    } else if lower.contains("no such thread") || lower.contains("invalid thread") {
        "The thread is gone; wait for a stop and use its thread ID"
    } else {
        return None;
    };
    Some(hint.to_string())
}
