use std::net::IpAddr;
use thiserror::Error;
use url::Url;

/// Errors that can occur while validating a backend base URL.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// Plain HTTP to a non-loopback host would expose the API token.
    #[error("Insecure base URL: HTTPS required (except loopback for testing)")]
    InsecureScheme,
    /// Credentials belong in the config's `api_token`, not the URL.
    #[error("Base URL must not embed credentials")]
    EmbeddedCredentials,
    /// The URL cannot be extended with API paths.
    #[error("Base URL must not carry a query or fragment")]
    UnexpectedComponent,
}

/// Validates the base URL of the platform backend.
///
/// Accepts `https` URLs, and `http` only for loopback hosts
/// (`localhost`, `127.0.0.1`, `::1`). Rejects embedded credentials and
/// URLs with a query or fragment, since API paths are appended to the base.
///
/// # Examples
///
/// ```
/// use deckfeed::util::validate_base_url;
///
/// assert!(validate_base_url("https://decks.example.com").is_ok());
/// assert!(validate_base_url("http://127.0.0.1:8080").is_ok());
/// assert!(validate_base_url("http://decks.example.com").is_err());
/// assert!(validate_base_url("ftp://decks.example.com").is_err());
/// ```
pub fn validate_base_url(url_str: &str) -> Result<Url, UrlValidationError> {
    let url = Url::parse(url_str)?;

    match url.scheme() {
        "https" => {}
        "http" if is_loopback_host(&url) => {}
        "http" => return Err(UrlValidationError::InsecureScheme),
        scheme => return Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }

    if !url.username().is_empty() || url.password().is_some() {
        return Err(UrlValidationError::EmbeddedCredentials);
    }

    if url.query().is_some() || url.fragment().is_some() || url.cannot_be_a_base() {
        return Err(UrlValidationError::UnexpectedComponent);
    }

    Ok(url)
}

fn is_loopback_host(url: &Url) -> bool {
    let Some(host) = url.host_str() else {
        return false;
    };
    if host == "localhost" {
        return true;
    }

    // Strip brackets from IPv6 addresses for parsing
    let host_for_parse = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);

    host_for_parse
        .parse::<IpAddr>()
        .map(|ip| ip.is_loopback())
        .unwrap_or(false)
}
