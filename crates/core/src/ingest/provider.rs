use crate::config::Settings;
use crate::ingest::types::FeedPage;
use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};

/// Paginated source of rating events. An empty `next_page` ends the stream.
#[async_trait::async_trait]
pub trait FeedClient: Send + Sync {
    fn provider_name(&self) -> &'static str;

    /// Fetches the page following `cursor` (empty for the first page).
    async fn fetch_page(&self, token: &str, cursor: &str) -> Result<FeedPage>;
}

#[derive(Debug, Clone)]
pub struct HttpFeedClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpFeedClient {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let base_url = settings.require_feed_base_url()?.to_string();

        let http = reqwest::Client::builder()
            .timeout(settings.feed_timeout())
            .build()
            .context("failed to build feed http client")?;

        Ok(Self { http, base_url })
    }

    fn headers(&self, token: &str) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if !token.is_empty() {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {token}"))
                    .context("feed token is not a valid header value")?,
            );
        }
        Ok(headers)
    }
}

#[async_trait::async_trait]
impl FeedClient for HttpFeedClient {
    fn provider_name(&self) -> &'static str {
        "http_json_feed"
    }

    async fn fetch_page(&self, token: &str, cursor: &str) -> Result<FeedPage> {
        let mut req = self.http.get(&self.base_url).headers(self.headers(token)?);
        if !cursor.is_empty() {
            req = req.query(&[("next_page", cursor)]);
        }

        let res = req
            .send()
            .await
            .with_context(|| format!("feed request failed (cursor={cursor:?})"))?;

        let status = res.status();
        if !status.is_success() {
            anyhow::bail!("feed returned HTTP {status} (cursor={cursor:?})");
        }

        let text = res
            .text()
            .await
            .context("failed to read feed response")?;
        parse_page(&text)
    }
}

fn parse_page(text: &str) -> Result<FeedPage> {
    serde_json::from_str::<FeedPage>(text).context("failed to decode feed page")
}
