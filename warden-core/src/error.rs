use crate::model::{ScanEvent, ScanState};
use thiserror::Error;
use warden_scanner::ScanError;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Graph store error: {0}")]
    Graph(#[from] neo4rs::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid job: {0}")]
    InvalidJob(String),

    #[error("Scan cannot go from {from} on {event}")]
    InvalidTransition { from: ScanState, event: ScanEvent },

    #[error("Graph store error: {0}")]
    Store(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;

/// A per-template analysis failure. Contained by the crawl engine, never
/// propagated as a job failure.
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Completion request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Completion provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Completion provider returned no content")]
    Empty,

    #[error("Completion content is not valid JSON: {0}")]
    MalformedJson(#[from] serde_json::Error),

    #[error("Completion content is not a JSON object")]
    NotAnObject,
}
