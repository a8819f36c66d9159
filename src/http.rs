//! HTTP fetch capability used for resource retrieval and the timestamp authority.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, COOKIE};

use crate::constants::ARCHIVAL_USER_AGENT;

/// A fully buffered HTTP response.
#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl FetchedResponse {
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[async_trait]
pub trait FetchClient: Send + Sync {
    /// GET `url`, sending `cookie` as the `Cookie` header when non-empty.
    async fn get(&self, url: &str, cookie: Option<&str>) -> Result<FetchedResponse>;

    /// POST `body` to `url` with the given content type.
    async fn post(&self, url: &str, content_type: &str, body: Vec<u8>) -> Result<FetchedResponse>;
}

/// `reqwest`-backed [`FetchClient`].
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
}

impl HttpClient {
    /// Build a client with the archival user agent and the given request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialised.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(ARCHIVAL_USER_AGENT)
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }

    async fn buffer(response: reqwest::Response) -> Result<FetchedResponse> {
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .await
            .context("Failed to read response body")?
            .to_vec();
        Ok(FetchedResponse {
            status,
            content_type,
            body,
        })
    }
}

#[async_trait]
impl FetchClient for HttpClient {
    async fn get(&self, url: &str, cookie: Option<&str>) -> Result<FetchedResponse> {
        let mut request = self.client.get(url);
        if let Some(cookie) = cookie.filter(|c| !c.is_empty()) {
            request = request.header(COOKIE, cookie);
        }
        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to fetch {url}"))?;
        Self::buffer(response).await
    }

    async fn post(&self, url: &str, content_type: &str, body: Vec<u8>) -> Result<FetchedResponse> {
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await
            .with_context(|| format!("Failed to POST to {url}"))?;
        Self::buffer(response).await
    }
}
