//! Typed arguments for the protocol requests the coordinator issues.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Stepping granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Over,
    In,
    Out,
}

impl StepKind {
    /// Protocol command for this step.
    #[must_use]
    pub const fn command(self) -> &'static str {
        match self {
            Self::Over => "next",
            Self::In => "stepIn",
            Self::Out => "stepOut",
        }
    }
}

/// Arguments for `continue`, `next`, `stepIn` and `stepOut`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadArguments {
    pub thread_id: i64,
}

/// Arguments for `stackTrace`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StackTraceArguments {
    pub thread_id: i64,
    pub start_frame: u32,
    /// Maximum frames to return; 0 asks for all.
    pub levels: u32,
}

impl StackTraceArguments {
    #[must_use]
    pub const fn top(thread_id: i64, levels: u32) -> Self {
        Self {
            thread_id,
            start_frame: 0,
            levels,
        }
    }
}

/// One requested source breakpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceBreakpoint {
    pub line: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hit_condition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_message: Option<String>,
}

impl SourceBreakpoint {
    #[must_use]
    pub const fn at(line: u32) -> Self {
        Self {
            line,
            column: None,
            condition: None,
            hit_condition: None,
            log_message: None,
        }
    }

    /// Only break when `condition` evaluates to true.
    #[must_use]
    pub fn when(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceArgument {
    pub path: String,
}

/// Builder for `setBreakpoints` arguments.
///
/// The request replaces every breakpoint previously set in the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetBreakpointsArguments {
    pub source: SourceArgument,
    pub breakpoints: Vec<SourceBreakpoint>,
}

impl SetBreakpointsArguments {
    /// Start with no breakpoints (clears the source).
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            source: SourceArgument { path: path.into() },
            breakpoints: Vec::new(),
        }
    }

    /// Add an unconditional breakpoint.
    #[must_use]
    pub fn line(self, line: u32) -> Self {
        self.breakpoint(SourceBreakpoint::at(line))
    }

    /// Add a breakpoint.
    #[must_use]
    pub fn breakpoint(mut self, breakpoint: SourceBreakpoint) -> Self {
        self.breakpoints.push(breakpoint);
        self
    }

    /// Add several unconditional breakpoints.
    #[must_use]
    pub fn lines<I>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = u32>,
    {
        self.breakpoints
            .extend(lines.into_iter().map(SourceBreakpoint::at));
        self
    }
}

/// Arguments for `disconnect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectArguments {
    pub terminate_debuggee: bool,
}

/// Serialize request arguments.
///
/// Argument types here only hold strings and integers, so serialization
/// cannot fail; `Value::Null` is returned if it ever does.
pub(crate) fn to_arguments<T: Serialize>(arguments: &T) -> Value {
    serde_json::to_value(arguments).unwrap_or(Value::Null)
}
