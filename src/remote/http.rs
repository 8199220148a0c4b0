use super::{FeedSource, PageData, ReactionService, SourceError};
use crate::feed::FeedItem;
use crate::reaction::{EntityId, ReactionKind};
use crate::util::{validate_base_url, UrlValidationError};
use futures::StreamExt;
use reqwest::redirect::Policy;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::marker::PhantomData;
use std::time::Duration;
use url::Url;

const MAX_RESPONSE_SIZE: usize = 5 * 1024 * 1024; // 5MB

/// Request settings shared by every call the backend makes.
#[derive(Debug, Clone)]
pub struct HttpOptions {
    /// Upper bound for one request, body included.
    pub timeout: Duration,
    /// Sent as a bearer token when present.
    pub api_token: Option<SecretString>,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            api_token: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CountResponse {
    count: u64,
}

/// JSON-over-HTTP implementation of both collaborator interfaces.
///
/// Routes, relative to the base URL:
///
/// - `GET    api/posts?limit=L&offset=O` returns `{ "items": [...], "total": N }`
/// - `POST   api/posts/{id}/{likes|favorites}` returns `{ "count": N }`
/// - `DELETE api/posts/{id}/{likes|favorites}` returns `{ "count": N }`
/// - `GET    api/posts/{id}/{likes|favorites}/count` returns `{ "count": N }`
pub struct HttpBackend<T> {
    client: reqwest::Client,
    base: Url,
    options: HttpOptions,
    _items: PhantomData<fn() -> T>,
}

impl<T> HttpBackend<T> {
    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        options: HttpOptions,
    ) -> Result<Self, UrlValidationError> {
        let base = validate_base_url(base_url)?;
        if base.scheme() == "http" {
            tracing::warn!(base_url = %base, "Using non-HTTPS backend URL (loopback only)");
        }
        Ok(Self {
            client,
            base,
            options,
            _items: PhantomData,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        // validate_base_url rejects URLs that cannot carry a path
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(["api", "posts"]).extend(segments);
        }
        url
    }

    fn reaction_endpoint(&self, entity: EntityId, kind: ReactionKind, count: bool) -> Url {
        let id = entity.to_string();
        if count {
            self.endpoint(&[&id, kind.path_segment(), "count"])
        } else {
            self.endpoint(&[&id, kind.path_segment()])
        }
    }

    async fn execute(&self, request: reqwest::RequestBuilder) -> Result<Vec<u8>, SourceError> {
        let request = match &self.options.api_token {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        };

        tokio::time::timeout(self.options.timeout, async {
            let response = request.send().await.map_err(SourceError::Network)?;
            if !response.status().is_success() {
                return Err(SourceError::HttpStatus(response.status().as_u16()));
            }
            read_limited_bytes(response, MAX_RESPONSE_SIZE).await
        })
        .await
        .map_err(|_| SourceError::Timeout)?
    }

    async fn count_request(&self, request: reqwest::RequestBuilder) -> Result<u64, SourceError> {
        let bytes = self.execute(request).await?;
        let body: CountResponse =
            serde_json::from_slice(&bytes).map_err(|e| SourceError::Decode(e.to_string()))?;
        Ok(body.count)
    }
}

impl<T: FeedItem> FeedSource for HttpBackend<T> {
    type Item = T;

    async fn fetch_page(&self, limit: u32, offset: u64) -> Result<PageData<T>, SourceError> {
        let mut url = self.endpoint(&[]);
        url.query_pairs_mut()
            .append_pair("limit", &limit.to_string())
            .append_pair("offset", &offset.to_string());

        tracing::debug!(url = %url, limit, offset, "Fetching feed page");
        let bytes = self.execute(self.client.get(url)).await?;
        serde_json::from_slice(&bytes).map_err(|e| SourceError::Decode(e.to_string()))
    }
}

impl<T: FeedItem> ReactionService for HttpBackend<T> {
    async fn apply(&self, entity: EntityId, kind: ReactionKind) -> Result<u64, SourceError> {
        let url = self.reaction_endpoint(entity, kind, false);
        tracing::debug!(%entity, %kind, "Applying reaction");
        self.count_request(self.client.post(url)).await
    }

    async fn reverse(&self, entity: EntityId, kind: ReactionKind) -> Result<u64, SourceError> {
        let url = self.reaction_endpoint(entity, kind, false);
        tracing::debug!(%entity, %kind, "Reversing reaction");
        self.count_request(self.client.delete(url)).await
    }

    async fn read_count(&self, entity: EntityId, kind: ReactionKind) -> Result<u64, SourceError> {
        let url = self.reaction_endpoint(entity, kind, true);
        self.count_request(self.client.get(url)).await
    }
}

/// Build the HTTP client the backend expects.
///
/// Redirects are limited to 3 hops on the same host so the bearer token
/// never follows a redirect elsewhere.
pub fn build_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .redirect(redirect_policy())
        .pool_max_idle_per_host(4)
        .pool_idle_timeout(Duration::from_secs(30))
        .tcp_keepalive(Duration::from_secs(60))
        .build()
}

fn redirect_policy() -> Policy {
    Policy::custom(|attempt| {
        if attempt.previous().len() >= 3 {
            return attempt.error("Too many redirects (max 3)");
        }

        let url = attempt.url();
        let origin = attempt.previous().first().and_then(|u| u.host_str());
        if origin.is_some() && origin != url.host_str() {
            return attempt.error("Cross-host redirect refused");
        }
        for prev in attempt.previous() {
            if prev.as_str() == url.as_str() {
                return attempt.error("Redirect loop detected");
            }
        }

        tracing::debug!(
            to = %url,
            hop = attempt.previous().len() + 1,
            "Following redirect"
        );
        attempt.follow()
    })
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, SourceError> {
    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if usize::try_from(len).map_or(true, |len| len > limit) {
            return Err(SourceError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(SourceError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(SourceError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}
