//! # trailhead-history
//!
//! Session history abstraction consumed by `trailhead-router`.
//!
//! The router never talks to a browser or a process-global stack directly.
//! It is handed something implementing [`History`] at construction time and
//! drives navigation through it.
//!
//! ## Features
//!
//! - **`History` trait**: current location, push/replace/go and a change feed
//! - **`MemoryHistory`**: in-memory stack for tests, SSR and native hosts
//! - **Href parsing**: split an href into pathname, search and hash
//!
//! ## Example
//!
//! ```rust,no_run
//! use trailhead_history::{History, MemoryHistory, HistoryState};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let history = MemoryHistory::new(vec!["/".to_string()]);
//! history.push("/posts?page=2", HistoryState::new()).await?;
//! assert_eq!(history.location().await.pathname, "/posts");
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Module Declarations
// ============================================================================

pub mod location;
pub mod memory;

// ============================================================================
// Re-exports
// ============================================================================

pub use location::{parse_href, HistoryAction, HistoryEvent, HistoryLocation, HistoryState};
pub use memory::MemoryHistory;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::broadcast;

// ============================================================================
// Core Trait
// ============================================================================

/// A session history backend.
///
/// Implementations own the entry stack. Every mutation is announced on the
/// channel returned by [`History::subscribe`], so a router can react to
/// entries changed from the outside (back/forward buttons, devtools).
#[async_trait]
pub trait History: Send + Sync {
    /// Current entry
    async fn location(&self) -> HistoryLocation;

    /// Push a new entry, discarding any forward entries
    async fn push(&self, href: &str, state: HistoryState) -> Result<()>;

    /// Replace the current entry
    async fn replace(&self, href: &str, state: HistoryState) -> Result<()>;

    /// Move `delta` entries through the stack
    async fn go(&self, delta: isize) -> Result<()>;

    async fn back(&self) -> Result<()> {
        self.go(-1).await
    }

    async fn forward(&self) -> Result<()> {
        self.go(1).await
    }

    /// Subscribe to entry changes
    fn subscribe(&self) -> broadcast::Receiver<HistoryEvent>;

    /// Turn a router href into the href this backend exposes publicly
    ///
    /// Hash-based backends prefix `#`; the default is the identity.
    fn create_href(&self, href: &str) -> String {
        href.to_string()
    }

    /// Backend name, for logs
    fn name(&self) -> &'static str;
}
