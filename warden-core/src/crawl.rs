//! Crawl engine: fetch one page, persist it and its outbound links, then run
//! every configured template through analysis.

use crate::analysis::{AnalysisProvider, Candidate, CompletionRequest, parse_candidate};
use crate::error::{AnalysisError, Result};
use crate::graph::GraphStore;
use crate::model::{CrawlJob, CrawlSummary, Finding, ScanConfig};
use crate::templates::{fill_template, get_template};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;
use warden_scanner::{Page, PageRenderer};

pub const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Characters of page content handed to analysis.
pub const CONTEXT_LIMIT: usize = 2000;

/// Outcome of one template's analysis: a candidate, nothing, or a contained
/// failure.
pub type TemplateResult = std::result::Result<Option<Candidate>, AnalysisError>;

pub struct CrawlEngine {
    renderer: Arc<dyn PageRenderer>,
    graph: Arc<dyn GraphStore>,
    analysis: Arc<dyn AnalysisProvider>,
    navigation_timeout: Duration,
}

impl CrawlEngine {
    pub fn new(
        renderer: Arc<dyn PageRenderer>,
        graph: Arc<dyn GraphStore>,
        analysis: Arc<dyn AnalysisProvider>,
    ) -> Self {
        Self {
            renderer,
            graph,
            analysis,
            navigation_timeout: NAVIGATION_TIMEOUT,
        }
    }

    pub fn with_navigation_timeout(mut self, timeout: Duration) -> Self {
        self.navigation_timeout = timeout;
        self
    }

    /// Crawl `config.url` for `scan_id`.
    ///
    /// Navigation failures and graph write failures propagate. Analysis
    /// failures are contained per template. The page is closed on every path.
    pub async fn process_url(&self, config: &ScanConfig, scan_id: &str) -> Result<CrawlSummary> {
        info!(scan_id = %scan_id, "Crawling {}", config.url);
        let mut page = self.renderer.new_page().await?;

        let result = self.crawl_page(page.as_mut(), config, scan_id).await;

        if let Err(e) = page.close().await {
            warn!("Failed to close page for {}: {}", config.url, e);
        }

        if let Err(e) = &result {
            warn!(scan_id = %scan_id, "Error crawling {}: {}", config.url, e);
        }
        result
    }

    async fn crawl_page(&self, page: &mut dyn Page, config: &ScanConfig, scan_id: &str) -> Result<CrawlSummary> {
        page.goto(&config.url, self.navigation_timeout).await?;
        let title = page.title().await?;
        let content = page.content().await?;

        let mut links = page.anchor_links().await?;
        links.truncate(config.max_pages);

        self.graph
            .merge_page_visit(scan_id, &config.url, &title, &links)
            .await?;

        let results = self.analyze(config, &content).await;

        let mut summary = CrawlSummary {
            url: config.url.clone(),
            title,
            links_count: links.len(),
            links,
            ..Default::default()
        };

        for (template, result) in config.templates.iter().zip(results) {
            match result {
                Ok(Some(candidate)) => {
                    let finding = Finding {
                        id: Uuid::new_v4(),
                        scan_id: scan_id.to_string(),
                        page_url: config.url.clone(),
                        finding_type: template.clone(),
                        severity: candidate.severity,
                        description: candidate.description,
                        data: candidate.data,
                        created_at: Utc::now(),
                    };
                    self.graph.create_finding(&finding).await?;
                    summary.findings_count += 1;
                }
                Ok(None) => debug!("No finding from {} on {}", template, config.url),
                Err(e) => {
                    warn!(scan_id = %scan_id, "Analysis failed for {} on {}: {}", template, config.url, e);
                    summary.failed_templates.push(template.clone());
                }
            }
        }

        Ok(summary)
    }

    /// Run every configured template in order. One result per template.
    pub async fn analyze(&self, config: &ScanConfig, content: &str) -> Vec<TemplateResult> {
        let context = truncate_chars(content, CONTEXT_LIMIT);
        let mut results = Vec::with_capacity(config.templates.len());

        for template_name in &config.templates {
            results.push(self.analyze_template(template_name, &config.url, context).await);
        }
        results
    }

    async fn analyze_template(&self, template_name: &str, url: &str, context: &str) -> TemplateResult {
        let template = get_template(template_name);
        let mut data = HashMap::new();
        data.insert("url", url.to_string());
        data.insert("context", context.to_string());
        let user_prompt = fill_template(template.user_template, &data);

        debug!("Analyzing {} with template {}", url, template_name);
        let response = self
            .analysis
            .complete(CompletionRequest::json(template.system, user_prompt))
            .await?;

        parse_candidate(&response.content)
    }

    /// Releases the rendering session.
    pub async fn shutdown(&self) -> Result<()> {
        self.renderer.close().await?;
        Ok(())
    }
}

/// Crawl jobs for the links of a finished page, one level deeper. Empty once
/// the next level would exceed `max_depth`.
pub fn plan_follow_ups(job: &CrawlJob, config: &ScanConfig, links: &[String]) -> Vec<CrawlJob> {
    let next_depth = job.depth + 1;
    if next_depth > config.max_depth {
        return Vec::new();
    }

    links
        .iter()
        .map(|link| CrawlJob::new(job.scan_id.clone(), config.for_url(link)).at_depth(next_depth))
        .collect()
}

/// Prefix of at most `limit` characters, never splitting a code point.
pub fn truncate_chars(s: &str, limit: usize) -> &str {
    match s.char_indices().nth(limit) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
