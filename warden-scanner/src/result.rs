use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Outcome of navigating a page to a URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Navigation {
    pub requested_url: String,
    pub final_url: String,
    pub status_code: Option<u16>,
    pub content_type: Option<String>,
    pub response_time: Duration,
}

impl Navigation {
    pub fn new(requested_url: String) -> Self {
        Self {
            final_url: requested_url.clone(),
            requested_url,
            status_code: None,
            content_type: None,
            response_time: Duration::from_secs(0),
        }
    }
}

/// Outcome of replaying one payload against a target.
///
/// Serializes as `{"status":"executed","confirmed":..,"payload":..}` or
/// `{"status":"failed","error":..}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ExploitOutcome {
    Executed { confirmed: bool, payload: String },
    Failed { error: String },
}

impl ExploitOutcome {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, ExploitOutcome::Executed { confirmed: true, .. })
    }
}
