//! Collaborator interfaces: the feed data source and the reaction service.
//!
//! The engine never talks to the network directly. Feed pages come from a
//! [`FeedSource`] and reaction mutations go through a [`ReactionService`];
//! [`HttpBackend`] implements both over the platform's JSON API.

mod http;

pub use http::{build_client, HttpBackend, HttpOptions};

use crate::feed::FeedItem;
use crate::reaction::{EntityId, ReactionKind};
use serde::{Deserialize, Serialize};
use std::future::Future;
use thiserror::Error;

/// One page of feed entries as returned by the source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageData<T> {
    pub items: Vec<T>,
    /// Authoritative number of entries across all pages at fetch time.
    #[serde(rename = "total")]
    pub total_count: u64,
}

/// Errors reported by a feed source or reaction service.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Response body exceeded the size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response body was not the expected JSON shape
    #[error("Invalid response: {0}")]
    Decode(String),
    /// Failure reported by a non-HTTP collaborator
    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

/// Fetches pages of feed entries.
///
/// Calls must be idempotent: a cancelled fetch may still complete on the
/// server, and the same page may be requested more than once.
pub trait FeedSource: Send + Sync + 'static {
    type Item: FeedItem;

    fn fetch_page(
        &self,
        limit: u32,
        offset: u64,
    ) -> impl Future<Output = Result<PageData<Self::Item>, SourceError>> + Send;
}

/// Applies, reverses and reads a user's reaction to an entity.
///
/// Every call returns the aggregate count the server reports afterwards.
pub trait ReactionService: Send + Sync + 'static {
    fn apply(
        &self,
        entity: EntityId,
        kind: ReactionKind,
    ) -> impl Future<Output = Result<u64, SourceError>> + Send;

    fn reverse(
        &self,
        entity: EntityId,
        kind: ReactionKind,
    ) -> impl Future<Output = Result<u64, SourceError>> + Send;

    fn read_count(
        &self,
        entity: EntityId,
        kind: ReactionKind,
    ) -> impl Future<Output = Result<u64, SourceError>> + Send;
}
