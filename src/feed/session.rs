use std::time::Duration;

use anyhow::Context;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, COOKIE, REFERER, USER_AGENT};
use reqwest::Client;

use super::error::FeedError;

/// Civitai only requires a same-site referer; the rest mirrors a browser tab.
const REFERER_URL: &str = "https://civitai.com/generate";

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/138.0.0.0 Safari/537.36";

/// Name of the browser cookie that carries the session token.
const SESSION_COOKIE: &str = "__Secure-civitai-token";

/// Opaque token identifying the account. Never logged.
#[derive(Clone)]
pub enum Credential {
    /// API key sent as `Authorization: Bearer`.
    Bearer(String),
    /// Browser session token sent as a cookie.
    SessionCookie(String),
}

impl Credential {
    fn header(&self) -> (reqwest::header::HeaderName, String) {
        match self {
            Credential::Bearer(token) => (AUTHORIZATION, format!("Bearer {}", token)),
            Credential::SessionCookie(token) => (COOKIE, format!("{}={}", SESSION_COOKIE, token)),
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::Bearer(_) => f.write_str("Credential::Bearer(<redacted>)"),
            Credential::SessionCookie(_) => f.write_str("Credential::SessionCookie(<redacted>)"),
        }
    }
}

/// Status and body of a feed request, before any JSON decoding.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

/// Minimal async transport used by the feed client.
#[async_trait::async_trait]
pub trait FeedSession: Send + Sync {
    async fn get(&self, url: &str) -> Result<RawResponse, FeedError>;
}

/// reqwest-backed session carrying the account credential.
pub struct HttpSession {
    client: Client,
    credential: Credential,
}

impl HttpSession {
    pub fn new(credential: Credential, timeout_secs: u64) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(REFERER, HeaderValue::from_static(REFERER_URL));
        headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client, credential })
    }

    /// Client for image downloads. Images are public; no credential attached.
    pub fn download_client(&self) -> Client {
        self.client.clone()
    }
}

impl std::fmt::Debug for HttpSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSession")
            .field("credential", &self.credential)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl FeedSession for HttpSession {
    async fn get(&self, url: &str) -> Result<RawResponse, FeedError> {
        let (name, value) = self.credential.header();
        let resp = self
            .client
            .get(url)
            .header(ACCEPT, "*/*")
            .header(name, value)
            .send()
            .await?;
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        Ok(RawResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_header() {
        let (name, value) = Credential::Bearer("abc".into()).header();
        assert_eq!(name, AUTHORIZATION);
        assert_eq!(value, "Bearer abc");
    }

    #[test]
    fn test_cookie_header() {
        let (name, value) = Credential::SessionCookie("xyz".into()).header();
        assert_eq!(name, COOKIE);
        assert_eq!(value, "__Secure-civitai-token=xyz");
    }

    #[test]
    fn test_debug_redacts_token() {
        let printed = format!("{:?}", Credential::Bearer("super-secret".into()));
        assert!(!printed.contains("super-secret"));
    }
}
