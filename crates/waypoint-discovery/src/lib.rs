//! Quiescence detection for test discovery feeds.
//!
//! Provides:
//! - `QuiescenceDetector` - Waits until a bursty feed stops changing
//! - `nudge` - Ordered, best-effort producer commands
//! - `MemoryFeed` - Scriptable feed for development and tests

#[cfg(feature = "memory")]
pub mod memory;
pub mod nudge;
pub mod quiescence;

#[cfg(feature = "memory")]
pub use memory::MemoryFeed;
pub use nudge::nudge;
pub use quiescence::{DiscoveryError, DiscoveryState, QuiescenceDetector, QuiescenceOptions};
