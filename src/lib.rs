//! Client-side feed synchronization for a card-game trading board.
//!
//! Paginated feed pages are cached per session with a TTL, superseded
//! requests are aborted, backward navigation restores scroll position and
//! like/favorite reactions update optimistically with rollback.

pub mod app;
pub mod clock;
pub mod config;
pub mod feed;
pub mod reaction;
pub mod remote;
pub mod session;
pub mod util;
