//! Coordinated waits for debug sessions.
//!
//! Provides:
//! - `WaitCoordinator` - Single-resolution race of match, timeout and cancellation
//! - `ThreadResolver` - Picks the paused user thread
//! - `OutcomeClassifier` - Maps traffic to `Outcome`s
//! - `DebugController` - Step, continue and breakpoint operations

pub mod classify;
pub mod controller;
pub mod requests;
pub mod threads;
pub mod wait;

pub use classify::OutcomeClassifier;
pub use controller::{BreakpointStatus, DebugController, WaitOptions};
pub use requests::{SetBreakpointsArguments, SourceBreakpoint, StepKind};
pub use threads::{ResolveError, ResolvedThread, StackFrame, ThreadResolver};
pub use wait::{WaitCoordinator, WaitError, WaitResult};
