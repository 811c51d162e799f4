// Tests for job payloads, severities and the scan state machine

use serde_json::json;
use warden_core::CoreError;
use warden_core::model::{
    CrawlJob, CrawlJobResult, CrawlSummary, JobEnvelope, QueueName, ScanConfig, ScanEvent, ScanState, Severity,
};

// ============================================================================
// Crawl Job Payload Tests
// ============================================================================

#[test]
fn test_legacy_payload_gets_default_config() {
    let job: CrawlJob = serde_json::from_value(json!({
        "scanId": "scan-1",
        "url": "https://a.test"
    }))
    .unwrap();

    assert_eq!(job.depth, 0);
    assert_eq!(
        job.effective_config().unwrap(),
        ScanConfig {
            url: "https://a.test".to_string(),
            max_depth: 2,
            max_pages: 10,
            templates: vec![],
        }
    );
}

#[test]
fn test_full_payload_uses_its_config() {
    let job: CrawlJob = serde_json::from_value(json!({
        "scanId": "scan-1",
        "url": "https://ignored.test",
        "config": {
            "url": "https://a.test",
            "maxDepth": 1,
            "maxPages": 2,
            "templates": ["XSS"]
        }
    }))
    .unwrap();

    let config = job.effective_config().unwrap();
    assert_eq!(config.url, "https://a.test");
    assert_eq!(config.max_depth, 1);
    assert_eq!(config.max_pages, 2);
    assert_eq!(config.templates, vec!["XSS".to_string()]);
}

#[test]
fn test_payload_without_config_or_url_is_invalid() {
    let job: CrawlJob = serde_json::from_value(json!({ "scanId": "scan-1" })).unwrap();
    assert!(matches!(
        job.effective_config(),
        Err(CoreError::InvalidJob(_))
    ));
}

#[test]
fn test_crawl_job_serializes_camel_case() {
    let job = CrawlJob::new("scan-1", ScanConfig::new("https://a.test")).at_depth(1);
    let value = serde_json::to_value(&job).unwrap();

    assert_eq!(value["scanId"], "scan-1");
    assert_eq!(value["url"], "https://a.test");
    assert_eq!(value["depth"], 1);
    assert_eq!(value["config"]["maxPages"], 10);
}

#[test]
fn test_config_templates_default_to_empty() {
    let config: ScanConfig = serde_json::from_value(json!({
        "url": "https://a.test",
        "maxDepth": 0,
        "maxPages": 5
    }))
    .unwrap();
    assert!(config.templates.is_empty());
}

#[test]
fn test_for_url_keeps_budgets() {
    let config = ScanConfig::new("https://a.test")
        .with_max_depth(3)
        .with_max_pages(4)
        .with_templates(vec!["SQLi".to_string()]);
    let child = config.for_url("https://a.test/child");

    assert_eq!(child.url, "https://a.test/child");
    assert_eq!(child.max_depth, 3);
    assert_eq!(child.max_pages, 4);
    assert_eq!(child.templates, config.templates);
}

// ============================================================================
// Queue and Envelope Tests
// ============================================================================

#[test]
fn test_queue_names() {
    assert_eq!(QueueName::Crawler.as_str(), "crawler-queue");
    assert_eq!(QueueName::Exploit.as_str(), "exploit-queue");
    assert_eq!(
        serde_json::to_value(QueueName::Exploit).unwrap(),
        json!("exploit-queue")
    );
}

#[test]
fn test_envelope_attempt_budget() {
    let mut envelope = JobEnvelope::new(QueueName::Crawler, "crawl-job", json!({"scanId": "s"}), 3);
    assert_eq!(envelope.scan_id(), Some("s"));

    assert!(envelope.has_attempts_left());
    envelope.attempts = 1;
    assert!(envelope.has_attempts_left());
    envelope.attempts = 2;
    assert!(!envelope.has_attempts_left());
}

#[test]
fn test_envelope_needs_at_least_one_attempt() {
    let envelope = JobEnvelope::new(QueueName::Crawler, "crawl-job", json!({}), 0);
    assert_eq!(envelope.max_attempts, 1);
    assert!(!envelope.has_attempts_left());
}

// ============================================================================
// Severity Tests
// ============================================================================

#[test]
fn test_severity_defaults_to_high() {
    assert_eq!(Severity::default(), Severity::High);
}

#[test]
fn test_severity_from_label_is_case_insensitive() {
    assert_eq!(Severity::from_label("critical"), Some(Severity::Critical));
    assert_eq!(Severity::from_label(" Low "), Some(Severity::Low));
    assert_eq!(Severity::from_label("severe"), None);
}

#[test]
fn test_severity_serializes_uppercase() {
    assert_eq!(serde_json::to_value(Severity::Medium).unwrap(), json!("MEDIUM"));
}

// ============================================================================
// Scan State Machine Tests
// ============================================================================

#[test]
fn test_normal_scan_lifecycle() {
    let state = ScanState::Pending;
    let state = state.apply(ScanEvent::Start).unwrap();
    assert_eq!(state, ScanState::Running);
    let state = state.apply(ScanEvent::Finish).unwrap();
    assert_eq!(state, ScanState::Completed);

    // Follow-up jobs for the same scan start it again
    assert_eq!(state.apply(ScanEvent::Start).unwrap(), ScanState::Running);
}

#[test]
fn test_stop_lifecycle() {
    let state = ScanState::Running.apply(ScanEvent::RequestStop).unwrap();
    assert_eq!(state, ScanState::StopRequested);

    // An in-flight job finishing does not clear the stop
    assert_eq!(state.apply(ScanEvent::Finish).unwrap(), ScanState::StopRequested);

    let state = state.apply(ScanEvent::AcknowledgeStop).unwrap();
    assert_eq!(state, ScanState::Stopped);
    assert!(state.is_terminal());
}

#[test]
fn test_no_start_after_stop() {
    for from in [ScanState::StopRequested, ScanState::Stopped] {
        let err = from.apply(ScanEvent::Start).unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));
    }
}

#[test]
fn test_stopped_absorbs_late_events() {
    for event in [ScanEvent::RequestStop, ScanEvent::Finish, ScanEvent::Fail, ScanEvent::AcknowledgeStop] {
        assert_eq!(ScanState::Stopped.apply(event).unwrap(), ScanState::Stopped);
    }
}

#[test]
fn test_failure_then_retry() {
    let state = ScanState::Running.apply(ScanEvent::Fail).unwrap();
    assert_eq!(state, ScanState::Failed);
    assert_eq!(state.apply(ScanEvent::Start).unwrap(), ScanState::Running);
}

#[test]
fn test_scan_state_labels_round_trip() {
    for state in [
        ScanState::Pending,
        ScanState::Running,
        ScanState::StopRequested,
        ScanState::Stopped,
        ScanState::Completed,
        ScanState::Failed,
    ] {
        assert_eq!(ScanState::from_label(state.as_str()), Some(state));
    }
}

// ============================================================================
// Job Result Shape Tests
// ============================================================================

#[test]
fn test_cancelled_result_shape() {
    assert_eq!(
        serde_json::to_value(CrawlJobResult::Cancelled).unwrap(),
        json!({ "status": "cancelled" })
    );
}

#[test]
fn test_success_result_shape() {
    let result = CrawlJobResult::Success(CrawlSummary {
        url: "https://a.test".to_string(),
        title: "Home".to_string(),
        links_count: 2,
        links: vec!["https://a.test/1".to_string(), "https://a.test/2".to_string()],
        ..Default::default()
    });
    let value = serde_json::to_value(&result).unwrap();

    assert_eq!(value["status"], "success");
    assert_eq!(value["title"], "Home");
    assert_eq!(value["linksCount"], 2);
    assert!(value.get("links").is_none());
}
