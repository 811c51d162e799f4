use crate::error::{CoreError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Depth budget given to jobs that arrive with only a URL.
pub const LEGACY_MAX_DEPTH: u32 = 2;
/// Page budget given to jobs that arrive with only a URL.
pub const LEGACY_MAX_PAGES: usize = 10;

/// What to crawl and which templates to analyze each page with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanConfig {
    pub url: String,
    pub max_depth: u32,
    pub max_pages: usize,
    #[serde(default)]
    pub templates: Vec<String>,
}

impl ScanConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self::from_url(url)
    }

    /// Config synthesized for a legacy job that only carries a URL.
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_depth: LEGACY_MAX_DEPTH,
            max_pages: LEGACY_MAX_PAGES,
            templates: Vec::new(),
        }
    }

    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages;
        self
    }

    pub fn with_templates(mut self, templates: Vec<String>) -> Self {
        self.templates = templates;
        self
    }

    /// Same budgets and templates, different target.
    pub fn for_url(&self, url: &str) -> Self {
        Self {
            url: url.to_string(),
            ..self.clone()
        }
    }
}

/// Payload of a `crawler-queue` job. Either `config` or the legacy `url` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlJob {
    pub scan_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ScanConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub depth: u32,
}

impl CrawlJob {
    pub fn new(scan_id: impl Into<String>, config: ScanConfig) -> Self {
        Self {
            scan_id: scan_id.into(),
            url: Some(config.url.clone()),
            config: Some(config),
            depth: 0,
        }
    }

    pub fn at_depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    /// The job's own config, or the legacy default built from its URL.
    pub fn effective_config(&self) -> Result<ScanConfig> {
        match (&self.config, &self.url) {
            (Some(config), _) => Ok(config.clone()),
            (None, Some(url)) => Ok(ScanConfig::from_url(url.as_str())),
            (None, None) => Err(CoreError::InvalidJob(format!(
                "crawl job for scan {} has neither config nor url",
                self.scan_id
            ))),
        }
    }
}

/// Payload of an `exploit-queue` job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExploitJob {
    pub scan_id: String,
    pub url: String,
    pub payload: String,
    pub attack_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueueName {
    #[serde(rename = "crawler-queue")]
    Crawler,
    #[serde(rename = "exploit-queue")]
    Exploit,
}

impl QueueName {
    pub const ALL: [QueueName; 2] = [QueueName::Crawler, QueueName::Exploit];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::Crawler => "crawler-queue",
            QueueName::Exploit => "exploit-queue",
        }
    }

    /// Job name recorded on the envelope.
    pub fn job_name(&self) -> &'static str {
        match self {
            QueueName::Crawler => "crawl-job",
            QueueName::Exploit => "exploit-job",
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A job as it sits on the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEnvelope {
    pub id: String,
    pub name: String,
    pub queue: QueueName,
    pub payload: serde_json::Value,
    pub attempts: u32,
    pub max_attempts: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl JobEnvelope {
    pub fn new(queue: QueueName, name: &str, payload: serde_json::Value, max_attempts: u32) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            queue,
            payload,
            attempts: 0,
            max_attempts: max_attempts.max(1),
            enqueued_at: Utc::now(),
        }
    }

    /// Scan id carried in the payload, if any.
    pub fn scan_id(&self) -> Option<&str> {
        self.payload.get("scanId").and_then(|v| v.as_str())
    }

    pub fn has_attempts_left(&self) -> bool {
        self.attempts + 1 < self.max_attempts
    }
}

/// Returned to the caller once the broker has accepted a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    pub id: String,
    pub queue: QueueName,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

/// Terminal record of one job, stored by the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobReport {
    pub job_id: String,
    pub queue: QueueName,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub finished_at: DateTime<Utc>,
}

impl JobReport {
    pub fn finished(job: &JobEnvelope, status: JobStatus, result: serde_json::Value) -> Self {
        Self {
            job_id: job.id.clone(),
            queue: job.queue,
            status,
            result: Some(result),
            error: None,
            finished_at: Utc::now(),
        }
    }

    pub fn failed(job: &JobEnvelope, error: String) -> Self {
        Self {
            job_id: job.id.clone(),
            queue: job.queue,
            status: JobStatus::Failed,
            result: None,
            error: Some(error),
            finished_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Critical,
    #[default]
    High,
    Medium,
    Low,
    Info,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "CRITICAL",
            Severity::High => "HIGH",
            Severity::Medium => "MEDIUM",
            Severity::Low => "LOW",
            Severity::Info => "INFO",
        }
    }

    /// Case-insensitive parse of a severity label.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_uppercase().as_str() {
            "CRITICAL" => Some(Severity::Critical),
            "HIGH" => Some(Severity::High),
            "MEDIUM" => Some(Severity::Medium),
            "LOW" => Some(Severity::Low),
            "INFO" => Some(Severity::Info),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A candidate vulnerability accepted from analysis. Never merged with others.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    pub id: Uuid,
    pub scan_id: String,
    pub page_url: String,
    #[serde(rename = "type")]
    pub finding_type: String,
    pub severity: Severity,
    pub description: String,
    /// Raw analysis JSON.
    pub data: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanState {
    Pending,
    Running,
    StopRequested,
    Stopped,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanEvent {
    Start,
    RequestStop,
    AcknowledgeStop,
    Finish,
    Fail,
}

impl ScanState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanState::Pending => "PENDING",
            ScanState::Running => "RUNNING",
            ScanState::StopRequested => "STOP_REQUESTED",
            ScanState::Stopped => "STOPPED",
            ScanState::Completed => "COMPLETED",
            ScanState::Failed => "FAILED",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "PENDING" => Some(ScanState::Pending),
            "RUNNING" => Some(ScanState::Running),
            "STOP_REQUESTED" => Some(ScanState::StopRequested),
            "STOPPED" => Some(ScanState::Stopped),
            "COMPLETED" => Some(ScanState::Completed),
            "FAILED" => Some(ScanState::Failed),
            _ => None,
        }
    }

    /// Next state after `event`.
    ///
    /// A scan spans many jobs, so `Start` is accepted again after a job
    /// finishes or fails. Once a stop is requested no job may start, and jobs
    /// already in flight finishing do not clear the stop.
    pub fn apply(self, event: ScanEvent) -> Result<ScanState> {
        use ScanEvent::*;
        use ScanState::*;

        let next = match (self, event) {
            (Pending | Running | Completed | Failed, Start) => Running,
            (Pending | Running | Completed | Failed, Finish) => Completed,
            (Pending | Running | Completed | Failed, Fail) => Failed,
            (Pending | Running | Completed | Failed | StopRequested, RequestStop) => StopRequested,
            (StopRequested, Finish | Fail) => StopRequested,
            (_, AcknowledgeStop) => Stopped,
            (Stopped, RequestStop | Finish | Fail) => Stopped,
            (from @ (StopRequested | Stopped), Start) => {
                return Err(CoreError::InvalidTransition { from, event: Start });
            }
        };
        Ok(next)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ScanState::Stopped)
    }
}

impl fmt::Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for ScanEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScanEvent::Start => "start",
            ScanEvent::RequestStop => "stop request",
            ScanEvent::AcknowledgeStop => "stop acknowledgement",
            ScanEvent::Finish => "finish",
            ScanEvent::Fail => "failure",
        };
        f.write_str(name)
    }
}

/// What one crawl of one page produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlSummary {
    pub url: String,
    pub title: String,
    pub links_count: usize,
    pub findings_count: usize,
    /// Templates whose analysis failed and yielded nothing.
    #[serde(default)]
    pub failed_templates: Vec<String>,
    #[serde(default)]
    pub follow_ups: usize,
    #[serde(skip)]
    pub links: Vec<String>,
}

/// Result of a crawl job: `{"status":"success",..}` or `{"status":"cancelled"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum CrawlJobResult {
    Success(CrawlSummary),
    Cancelled,
}

impl CrawlJobResult {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CrawlJobResult::Cancelled)
    }
}
