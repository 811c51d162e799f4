//! Page rendering capability.
//!
//! A [`PageRenderer`] is a long-lived session (an HTTP client pool or a
//! headless browser) owned by one engine. Each crawl or exploit call opens
//! its own [`Page`] against it and closes that page when done, so concurrent
//! jobs never share tab state.

use crate::error::{Result, ScanError};
use crate::links::{extract_anchor_links, extract_title};
use crate::result::Navigation;
use async_trait::async_trait;
use reqwest::Client;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};
use url::Url;

pub const DEFAULT_USER_AGENT: &str = "Warden/0.1 (security scanner)";

#[async_trait]
pub trait PageRenderer: Send + Sync {
    /// Open a fresh page scoped to one call.
    async fn new_page(&self) -> Result<Box<dyn Page>>;

    /// Release the underlying session. Pages opened afterwards fail.
    async fn close(&self) -> Result<()>;

    fn name(&self) -> &str;
}

#[async_trait]
pub trait Page: Send + Sync {
    /// Navigate, failing if the page does not load within `timeout`.
    async fn goto(&mut self, url: &str, timeout: Duration) -> Result<Navigation>;

    async fn title(&self) -> Result<String>;

    /// Full rendered document.
    async fn content(&self) -> Result<String>;

    /// Absolute http(s) anchor targets in document order.
    async fn anchor_links(&self) -> Result<Vec<String>>;

    async fn close(&mut self) -> Result<()>;
}

/// Renderer backed by a pooled `reqwest` client. A page is a single GET.
pub struct HttpRenderer {
    client: Client,
    closed: AtomicBool,
}

impl HttpRenderer {
    pub fn new() -> Result<Self> {
        Self::with_user_agent(DEFAULT_USER_AGENT)
    }

    pub fn with_user_agent(user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(50)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;

        Ok(Self {
            client,
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl PageRenderer for HttpRenderer {
    async fn new_page(&self) -> Result<Box<dyn Page>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ScanError::BrowserError("renderer has been closed".to_string()));
        }
        Ok(Box::new(HttpPage {
            client: self.client.clone(),
            loaded: None,
        }))
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!("HTTP renderer closed");
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "http"
    }
}

struct LoadedDocument {
    final_url: String,
    body: String,
}

pub struct HttpPage {
    client: Client,
    loaded: Option<LoadedDocument>,
}

impl HttpPage {
    fn document(&self) -> Result<&LoadedDocument> {
        self.loaded.as_ref().ok_or(ScanError::NotNavigated)
    }
}

#[async_trait]
impl Page for HttpPage {
    async fn goto(&mut self, url: &str, timeout: Duration) -> Result<Navigation> {
        Url::parse(url).map_err(|e| ScanError::InvalidUrl(format!("{url}: {e}")))?;
        debug!("Fetching {}", url);

        let start = Instant::now();
        let client = self.client.clone();
        let fetch = async move {
            let response = client.get(url).send().await?;
            let status_code = response.status().as_u16();
            let final_url = response.url().to_string();
            let content_type = response
                .headers()
                .get("content-type")
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string());
            let body = response.text().await?;
            Ok::<_, ScanError>((status_code, final_url, content_type, body))
        };

        let (status_code, final_url, content_type, body) = tokio::time::timeout(timeout, fetch)
            .await
            .map_err(|_| ScanError::NavigationTimeout {
                url: url.to_string(),
                secs: timeout.as_secs(),
            })??;

        let mut navigation = Navigation::new(url.to_string());
        navigation.final_url = final_url.clone();
        navigation.status_code = Some(status_code);
        navigation.content_type = content_type;
        navigation.response_time = start.elapsed();

        self.loaded = Some(LoadedDocument { final_url, body });
        Ok(navigation)
    }

    async fn title(&self) -> Result<String> {
        extract_title(&self.document()?.body)
    }

    async fn content(&self) -> Result<String> {
        Ok(self.document()?.body.clone())
    }

    async fn anchor_links(&self) -> Result<Vec<String>> {
        let document = self.document()?;
        extract_anchor_links(&document.body, &document.final_url)
    }

    async fn close(&mut self) -> Result<()> {
        self.loaded = None;
        Ok(())
    }
}
