//! Headless Chromium renderer. Only available with the `browser` feature.

use crate::error::{Result, ScanError};
use crate::render::{Page, PageRenderer};
use crate::result::Navigation;
use async_trait::async_trait;
use chromiumoxide::{Browser, BrowserConfig};
use futures::StreamExt;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const ANCHOR_LINKS_JS: &str = r#"
    Array.from(document.querySelectorAll('a'))
        .map(a => a.href)
        .filter(href => /^https?:/i.test(href))
"#;

fn browser_error(e: impl std::fmt::Display) -> ScanError {
    ScanError::BrowserError(e.to_string())
}

/// One headless browser process; every page is a new tab.
pub struct ChromeRenderer {
    browser: Mutex<Option<Browser>>,
    handler: Mutex<Option<JoinHandle<()>>>,
}

impl ChromeRenderer {
    pub async fn launch() -> Result<Self> {
        let config = BrowserConfig::builder()
            .no_sandbox()
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .build()
            .map_err(ScanError::BrowserError)?;

        let (browser, mut handler) = Browser::launch(config).await.map_err(browser_error)?;

        // The CDP connection only makes progress while the handler is polled
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        info!("Headless browser launched");
        Ok(Self {
            browser: Mutex::new(Some(browser)),
            handler: Mutex::new(Some(handler_task)),
        })
    }
}

#[async_trait]
impl PageRenderer for ChromeRenderer {
    async fn new_page(&self) -> Result<Box<dyn Page>> {
        let guard = self.browser.lock().await;
        let browser = guard
            .as_ref()
            .ok_or_else(|| ScanError::BrowserError("browser has been closed".to_string()))?;
        let tab = browser.new_page("about:blank").await.map_err(browser_error)?;
        Ok(Box::new(ChromePage { tab: Some(tab) }))
    }

    async fn close(&self) -> Result<()> {
        if let Some(mut browser) = self.browser.lock().await.take() {
            browser.close().await.map_err(browser_error)?;
            if let Err(e) = browser.wait().await {
                warn!("Browser process did not exit cleanly: {}", e);
            }
            info!("Headless browser closed");
        }
        if let Some(handler) = self.handler.lock().await.take() {
            handler.abort();
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "chrome"
    }
}

pub struct ChromePage {
    tab: Option<chromiumoxide::Page>,
}

impl ChromePage {
    fn tab(&self) -> Result<&chromiumoxide::Page> {
        self.tab
            .as_ref()
            .ok_or_else(|| ScanError::BrowserError("tab has been closed".to_string()))
    }
}

#[async_trait]
impl Page for ChromePage {
    async fn goto(&mut self, url: &str, timeout: Duration) -> Result<Navigation> {
        let tab = self.tab()?;
        let start = Instant::now();

        tokio::time::timeout(timeout, tab.goto(url))
            .await
            .map_err(|_| ScanError::NavigationTimeout {
                url: url.to_string(),
                secs: timeout.as_secs(),
            })?
            .map_err(browser_error)?;

        let mut navigation = Navigation::new(url.to_string());
        if let Ok(Some(final_url)) = tab.url().await {
            navigation.final_url = final_url;
        }
        navigation.response_time = start.elapsed();
        debug!("Rendered {} in {:?}", url, navigation.response_time);
        Ok(navigation)
    }

    async fn title(&self) -> Result<String> {
        Ok(self
            .tab()?
            .get_title()
            .await
            .map_err(browser_error)?
            .unwrap_or_default())
    }

    async fn content(&self) -> Result<String> {
        self.tab()?.content().await.map_err(browser_error)
    }

    async fn anchor_links(&self) -> Result<Vec<String>> {
        self.tab()?
            .evaluate(ANCHOR_LINKS_JS)
            .await
            .map_err(browser_error)?
            .into_value::<Vec<String>>()
            .map_err(|e| ScanError::ParseError(e.to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(tab) = self.tab.take() {
            tab.close().await.map_err(browser_error)?;
        }
        Ok(())
    }
}
