//! Single-payload replay against a target URL.

use crate::error::{Result, ScanError};
use crate::render::PageRenderer;
use crate::result::ExploitOutcome;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Query parameter the payload is injected into.
pub const EXPLOIT_PARAM: &str = "q";

pub const EXPLOIT_TIMEOUT: Duration = Duration::from_secs(15);

pub struct ExploitExecutor {
    renderer: Arc<dyn PageRenderer>,
    timeout: Duration,
}

impl ExploitExecutor {
    pub fn new(renderer: Arc<dyn PageRenderer>) -> Self {
        Self {
            renderer,
            timeout: EXPLOIT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Replay `payload` against `url`. Never fails: navigation and renderer
    /// errors come back as [`ExploitOutcome::Failed`].
    pub async fn execute_payload(&self, url: &str, payload: &str, attack_type: &str) -> ExploitOutcome {
        match self.try_execute(url, payload, attack_type).await {
            Ok(confirmed) => {
                if confirmed {
                    info!("{} payload reflected at {}", attack_type, url);
                }
                ExploitOutcome::Executed {
                    confirmed,
                    payload: payload.to_string(),
                }
            }
            Err(e) => {
                warn!("Exploit against {} failed: {}", url, e);
                ExploitOutcome::Failed { error: e.to_string() }
            }
        }
    }

    async fn try_execute(&self, url: &str, payload: &str, attack_type: &str) -> Result<bool> {
        let target = build_exploit_url(url, payload)?;
        let mut page = self.renderer.new_page().await?;

        let result = async {
            page.goto(&target, self.timeout).await?;
            if !attack_type.eq_ignore_ascii_case("xss") {
                return Ok(false);
            }
            let content = page.content().await?;
            Ok(content.contains(payload))
        }
        .await;

        if let Err(e) = page.close().await {
            warn!("Failed to close exploit page: {}", e);
        }
        result
    }

    /// Release the renderer session.
    pub async fn shutdown(&self) -> Result<()> {
        self.renderer.close().await
    }
}

/// Append the payload as the `q` parameter, keeping any existing query.
pub fn build_exploit_url(url: &str, payload: &str) -> Result<String> {
    let mut target = Url::parse(url).map_err(|e| ScanError::InvalidUrl(format!("{url}: {e}")))?;
    target.query_pairs_mut().append_pair(EXPLOIT_PARAM, payload);
    debug!("Exploit target: {}", target);
    Ok(target.to_string())
}
