use crate::analysis::{DEFAULT_BASE_URL, DEFAULT_MODEL};
use crate::queue::DEFAULT_MAX_ATTEMPTS;
use crate::worker::WorkerSettings;
use std::env;
use std::time::Duration;

/// Process configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Settings {
    pub redis_url: String,
    pub neo4j_uri: String,
    pub neo4j_user: String,
    pub neo4j_password: String,
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub analysis_model: String,
    pub analysis_temperature: Option<f32>,
    pub analysis_timeout: Duration,
    pub worker_concurrency: usize,
    pub worker_poll_interval: Duration,
    pub worker_follow_links: bool,
    pub job_max_attempts: u32,
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build settings from any key lookup. Unset or unparsable values fall
    /// back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let string = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        Self {
            redis_url: string("REDIS_URL", "redis://localhost:6379"),
            neo4j_uri: string("NEO4J_URI", "bolt://localhost:7687"),
            neo4j_user: string("NEO4J_USER", "neo4j"),
            neo4j_password: string("NEO4J_PASSWORD", "password"),
            openai_api_key: string("OPENAI_API_KEY", ""),
            openai_base_url: string("OPENAI_BASE_URL", DEFAULT_BASE_URL),
            analysis_model: string("ANALYSIS_MODEL", DEFAULT_MODEL),
            analysis_temperature: lookup("ANALYSIS_TEMPERATURE").and_then(|v| v.parse().ok()),
            analysis_timeout: Duration::from_secs(
                lookup("ANALYSIS_TIMEOUT_SECS")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(120),
            ),
            worker_concurrency: lookup("WORKER_CONCURRENCY")
                .and_then(|v| v.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(2),
            worker_poll_interval: Duration::from_secs(
                lookup("WORKER_POLL_SECS")
                    .and_then(|v| v.parse().ok())
                    .filter(|n| *n > 0)
                    .unwrap_or(2),
            ),
            worker_follow_links: lookup("WORKER_FOLLOW_LINKS")
                .map(|v| parse_flag(&v))
                .unwrap_or(true),
            job_max_attempts: lookup("JOB_MAX_ATTEMPTS")
                .and_then(|v| v.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_MAX_ATTEMPTS),
        }
    }

    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            concurrency: self.worker_concurrency,
            poll_interval: self.worker_poll_interval,
            follow_links: self.worker_follow_links,
        }
    }
}

fn parse_flag(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "0" | "false" | "no" | "off"
    )
}
