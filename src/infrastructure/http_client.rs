//! HTTP document source
//!
//! The fetch engine only sees [`DocumentSource`]: one capability, "fetch bytes
//! at URL", answering with a status code and body. `HttpDocumentSource` is the
//! reqwest-backed implementation with an optional request-rate limiter.

use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::sync_error::{SyncError, SyncResult, TransportError};
use crate::domain::failure::ResponseClass;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpClientConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    /// 0 disables the limiter
    pub max_requests_per_second: u32,
    pub follow_redirects: bool,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("rcp-mirror/{}", env!("CARGO_PKG_VERSION")),
            timeout_seconds: 60,
            max_requests_per_second: 0,
            follow_redirects: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    /// Empty unless the status is 2xx
    pub body: Vec<u8>,
}

impl FetchResponse {
    #[must_use]
    pub const fn class(&self) -> ResponseClass {
        ResponseClass::from_status(self.status)
    }
}

#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchResponse, TransportError>;
}

pub struct HttpDocumentSource {
    client: Client,
    rate_limiter: Option<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl HttpDocumentSource {
    pub fn new(config: &HttpClientConfig) -> SyncResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .map_err(|e| SyncError::TransportInit(format!("invalid user agent: {e}")))?,
        );

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .default_headers(headers)
            .redirect(if config.follow_redirects {
                reqwest::redirect::Policy::limited(10)
            } else {
                reqwest::redirect::Policy::none()
            })
            .build()
            .map_err(|e| SyncError::TransportInit(e.to_string()))?;

        let rate_limiter = NonZeroU32::new(config.max_requests_per_second)
            .map(|rps| RateLimiter::direct(Quota::per_second(rps)));

        Ok(Self { client, rate_limiter })
    }
}

#[async_trait]
impl DocumentSource for HttpDocumentSource {
    async fn fetch(&self, url: &str) -> Result<FetchResponse, TransportError> {
        if let Some(limiter) = &self.rate_limiter {
            limiter.until_ready().await;
        }

        tracing::debug!("Fetching {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| classify_reqwest_error(url, &e))?;

        let status = response.status();
        if !status.is_success() {
            tracing::debug!("{} answered {}", url, status);
            return Ok(FetchResponse {
                status: status.as_u16(),
                body: Vec::new(),
            });
        }

        let body = response.bytes().await.map_err(|e| TransportError::Body {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        Ok(FetchResponse {
            status: status.as_u16(),
            body: body.to_vec(),
        })
    }
}

fn classify_reqwest_error(url: &str, err: &reqwest::Error) -> TransportError {
    let url = url.to_string();
    if err.is_timeout() {
        TransportError::Timeout { url }
    } else if err.is_connect() {
        TransportError::Connection {
            url,
            message: err.to_string(),
        }
    } else {
        TransportError::Other {
            url,
            message: err.to_string(),
        }
    }
}
