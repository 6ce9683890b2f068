/// Retrying HTTP client for the `<base>/<identity>.keys` listing convention
use crate::error::{KeygateError, KeygateResult};
use crate::keys;
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Base URL for the key-listing endpoint
pub const DEFAULT_BASE_URL: &str = "https://github.com";
/// Per-request timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Maximum additional attempts after the first failed one
const MAX_RETRIES: u32 = 3;
/// Base delay unit for linear backoff between attempts
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Classified outcome of a failed fetch
#[derive(Error, Debug)]
pub enum FetchError {
    /// HTTP 404: the identity does not exist. Never retried.
    #[error("identity {0:?} not found")]
    NotFound(String),

    /// HTTP 5xx: the listing service is unhealthy. Retried.
    #[error("server error (HTTP {0})")]
    Server(u16),

    /// Any other non-200 status. Never retried.
    #[error("client error (HTTP {0})")]
    Client(u16),

    /// Transport failure or timeout. Retried.
    #[error("request failed: {0}")]
    Transient(String),

    /// The response body held lines but none of them were usable keys
    #[error("response contained no usable keys ({0} lines dropped)")]
    EmptyKeyList(usize),
}

impl FetchError {
    /// Whether another attempt could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Server(_) | FetchError::Transient(_))
    }
}

/// HTTP key fetcher with bounded, linearly backed-off retry
#[derive(Debug, Clone)]
pub struct KeyFetcher {
    client: reqwest::Client,
    base_url: String,
    retry_delay: Duration,
}

impl KeyFetcher {
    pub fn new() -> KeygateResult<Self> {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Point the fetcher at a different listing host (tests use this)
    pub fn with_base_url(base_url: impl Into<String>) -> KeygateResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("keygate/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| {
                KeygateError::Internal(format!("failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            retry_delay: RETRY_DELAY,
        })
    }

    /// Shrink the backoff unit so retry tests don't sleep for real
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Fetch the key listing for an external identity.
    ///
    /// Server errors and transport failures are retried up to [`MAX_RETRIES`]
    /// extra times, sleeping `retry_delay * attempt` before each retry so the
    /// delay grows linearly. Not-found and other client errors return
    /// immediately. The sleep is async and never stalls other identities
    /// being resolved concurrently.
    pub async fn fetch(&self, identity: &str) -> Result<Vec<String>, FetchError> {
        let url = format!("{}/{}.keys", self.base_url, identity);

        let mut last_err = None;
        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                debug!(identity, attempt, "retrying key fetch");
                tokio::time::sleep(self.retry_delay * attempt).await;
            }

            match self.fetch_once(identity, &url).await {
                Ok(keys) => {
                    debug!(identity, count = keys.len(), "fetched keys");
                    return Ok(keys);
                }
                Err(err) if err.is_retryable() => {
                    warn!(identity, attempt, error = %err, "key fetch failed, will retry");
                    last_err = Some(err);
                }
                Err(err) => {
                    warn!(identity, error = %err, "key fetch failed");
                    return Err(err);
                }
            }
        }

        let err = last_err
            .unwrap_or_else(|| FetchError::Transient("no attempts were made".to_string()));
        warn!(identity, attempts = MAX_RETRIES + 1, error = %err, "key fetch exhausted retries");
        Err(err)
    }

    /// One request, one classified outcome
    async fn fetch_once(&self, identity: &str, url: &str) -> Result<Vec<String>, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Transient(e.to_string()))?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => return Err(FetchError::NotFound(identity.to_string())),
            status if status.is_server_error() => {
                return Err(FetchError::Server(status.as_u16()))
            }
            status => return Err(FetchError::Client(status.as_u16())),
        }

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Transient(e.to_string()))?;

        parse_key_listing(&body)
    }
}

/// Parse a newline-separated key listing.
///
/// Lines whose leading token is not a supported algorithm are dropped as
/// comments or noise. A non-empty response with zero usable keys is a parse
/// failure; an entirely blank body is an empty (valid) listing.
fn parse_key_listing(body: &str) -> Result<Vec<String>, FetchError> {
    let mut keys = Vec::new();
    let mut dropped = 0_usize;

    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if keys::is_supported_key(line) {
            keys.push(line.to_string());
        } else {
            dropped += 1;
        }
    }

    if keys.is_empty() && dropped > 0 {
        return Err(FetchError::EmptyKeyList(dropped));
    }
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_fetcher(server: &MockServer) -> KeyFetcher {
        KeyFetcher::with_base_url(server.uri())
            .unwrap()
            .with_retry_delay(Duration::from_millis(5))
    }

    #[test]
    fn test_parse_key_listing() {
        let body = "ssh-ed25519 AAAA user@host\n\n# comment\nssh-rsa BBBB\n";
        let keys = parse_key_listing(body).unwrap();
        assert_eq!(
            keys,
            vec![
                "ssh-ed25519 AAAA user@host".to_string(),
                "ssh-rsa BBBB".to_string()
            ]
        );
    }

    #[test]
    fn test_parse_blank_body_is_empty_listing() {
        assert!(parse_key_listing("").unwrap().is_empty());
        assert!(parse_key_listing("\n\n").unwrap().is_empty());
    }

    #[test]
    fn test_parse_all_noise_is_a_failure() {
        let err = parse_key_listing("# nothing here\nnot-a-key\n").unwrap_err();
        assert!(matches!(err, FetchError::EmptyKeyList(2)));
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/octocat.keys"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ssh-ed25519 AAAA\n"))
            .expect(1)
            .mount(&server)
            .await;

        let keys = fast_fetcher(&server).fetch("octocat").await.unwrap();
        assert_eq!(keys, vec!["ssh-ed25519 AAAA".to_string()]);
    }

    #[tokio::test]
    async fn test_not_found_makes_exactly_one_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ghost.keys"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let err = fast_fetcher(&server).fetch("ghost").await.unwrap_err();
        assert!(matches!(err, FetchError::NotFound(identity) if identity == "ghost"));
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/blocked.keys"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&server)
            .await;

        let err = fast_fetcher(&server).fetch("blocked").await.unwrap_err();
        assert!(matches!(err, FetchError::Client(403)));
    }

    #[tokio::test]
    async fn test_server_errors_retry_then_succeed() {
        let server = MockServer::start().await;
        // First two attempts hit the flaky mock, the third falls through to
        // the healthy one.
        Mock::given(method("GET"))
            .and(path("/flaky.keys"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky.keys"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ssh-rsa CCCC\n"))
            .expect(1)
            .mount(&server)
            .await;

        let keys = fast_fetcher(&server).fetch("flaky").await.unwrap();
        assert_eq!(keys, vec!["ssh-rsa CCCC".to_string()]);
    }

    #[tokio::test]
    async fn test_connection_error_is_transient_and_retried() {
        // Bind then drop to get a port nothing listens on.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let fetcher = KeyFetcher::with_base_url(format!("http://127.0.0.1:{}", port))
            .unwrap()
            .with_retry_delay(Duration::from_millis(5));

        let started = std::time::Instant::now();
        let err = fetcher.fetch("unreachable").await.unwrap_err();
        assert!(matches!(err, FetchError::Transient(_)));
        // Backoff before retries 1..=3 sums to 5+10+15ms of sleep, so all
        // four attempts demonstrably ran.
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_retries_exhausted_returns_last_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/down.keys"))
            .respond_with(ResponseTemplate::new(503))
            .expect(u64::from(MAX_RETRIES) + 1)
            .mount(&server)
            .await;

        let err = fast_fetcher(&server).fetch("down").await.unwrap_err();
        assert!(matches!(err, FetchError::Server(503)));
    }
}
