//! Session registry and in-memory sessions.
//!
//! Provides:
//! - `TrackerRegistry` - Own one `MessageTracker` per live session
//! - `MemorySession` - Scriptable session for development and tests

#[cfg(feature = "memory")]
pub mod memory;
pub mod registry;

#[cfg(feature = "memory")]
pub use memory::{MemorySession, RecordedRequest, Scripted};
pub use registry::{RegistryError, SessionLifecycle, TrackerRegistry};
