//! Optimistic like/favorite reactions.
//!
//! [`ReactionGate`] decides whether an actor may react at all;
//! [`ReactionToggle`] applies the change locally, confirms it with the
//! [`ReactionService`](crate::remote::ReactionService), reconciles the
//! count and rolls back on failure.

mod gate;
mod toggle;

pub use gate::ReactionGate;
pub use toggle::{
    ReactionAction, ReactionEvent, ReactionKey, ReactionPhase, ReactionState, ReactionToggle,
    ReactionUpdate, ToggleOutcome, DEFAULT_RECONCILE_DELAY,
};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Server identifier of a reactable entity (a trade post or deck).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub i64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for EntityId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactionKind {
    Like,
    Favorite,
}

impl ReactionKind {
    pub const ALL: [ReactionKind; 2] = [ReactionKind::Like, ReactionKind::Favorite];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReactionKind::Like => "like",
            ReactionKind::Favorite => "favorite",
        }
    }

    /// Collection name in the backend's routes.
    pub fn path_segment(&self) -> &'static str {
        match self {
            ReactionKind::Like => "likes",
            ReactionKind::Favorite => "favorites",
        }
    }
}

impl fmt::Display for ReactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("Unknown reaction kind: {0} (expected 'like' or 'favorite')")]
pub struct UnknownReactionKind(String);

impl FromStr for ReactionKind {
    type Err = UnknownReactionKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "like" | "likes" => Ok(ReactionKind::Like),
            "favorite" | "favorites" | "fav" => Ok(ReactionKind::Favorite),
            _ => Err(UnknownReactionKind(s.to_string())),
        }
    }
}
