//! Paged feed synchronization.
//!
//! - [`RequestSlot`] keeps one fetch in flight per channel and invalidates
//!   the results of superseded ones
//! - [`PagedFeedCache`] stores page snapshots with a time-to-live
//! - [`NavigationIntentTracker`] tells history traversal from explicit
//!   navigation
//! - [`ScrollAnchorStore`] keeps per-page scroll offsets for backward
//!   navigation
//! - [`FeedController`] combines them into "what to show for page N"
//!
//! # Example
//!
//! ```ignore
//! let (tx, mut rx) = tokio::sync::mpsc::channel(32);
//! let mut feed = FeedController::new(source, session, clock, FeedOptions::default(), tx);
//!
//! feed.navigate(1, NavigationSource::Initial);
//! while let Some(event) = rx.recv().await {
//!     if let Some(update) = feed.handle_event(event) {
//!         // render feed.view()
//!     }
//! }
//! ```

mod cache;
mod controller;
mod navigation;
mod scroll;
mod slot;

pub use cache::{FeedItem, FeedPageSnapshot, PagedFeedCache, DEFAULT_TTL};
pub use controller::{
    DisplayStrategy, FeedController, FeedEvent, FeedOptions, FeedUpdate, FeedView, FetchPurpose,
    NavigationSource, PageDecision, DEFAULT_PAGE_SIZE,
};
pub use navigation::{NavigationIntent, NavigationIntentTracker};
pub use scroll::{ScrollAnchor, ScrollAnchorStore};
pub use slot::{RequestSlot, SlotTicket};
