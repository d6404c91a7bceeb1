//! Core abstractions for coordinating waits on external sessions.
//!
//! This crate provides the fundamental building blocks:
//! - `MessageTracker` - Classification and fan-out of one session's traffic
//! - `ClassifiedMessage` - Typed message enum
//! - `Outcome` / `DiscoveryOutcome` - Canonical wait results
//! - `DebugSession` and `DiscoveryFeed` collaborator traits
//! - `CoordinationConfig` - Timeouts and probing settings

pub mod config;
pub mod message;
pub mod outcome;
pub mod tracker;
pub mod traits;

pub use config::CoordinationConfig;
pub use message::{ClassifiedMessage, EventKind};
pub use outcome::{
    DiscoveryOutcome, ErrorCode, Outcome, SourceLocation, StoppedOutcome, ThreadSnapshot,
};
pub use tracker::{BreakpointMapping, Capabilities, MessageTracker, Subscription, TrackerError};
pub use traits::{
    DebugSession, DiscoveryFeed, FeedError, FeedReadiness, SessionError, SessionId, TestItem,
};
