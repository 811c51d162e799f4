// Tests for stop flags, scan state and visited-set bookkeeping

use std::time::Duration;
use warden_core::model::{ScanEvent, ScanState};
use warden_core::signals::{
    MemorySignals, STOP_TTL, SignalStore, is_truthy, state_key, stop_key, transition, visited_key,
};

// ============================================================================
// Key Layout Tests
// ============================================================================

#[test]
fn test_key_layout() {
    assert_eq!(stop_key("abc"), "scan:stop:abc");
    assert_eq!(state_key("abc"), "scan:state:abc");
    assert_eq!(visited_key("abc"), "scan:visited:abc");
    assert_eq!(STOP_TTL, Duration::from_secs(3600));
}

#[test]
fn test_flag_values() {
    assert!(is_truthy("true"));
    assert!(is_truthy("1"));
    assert!(is_truthy("yes please"));
    assert!(is_truthy("0"));
    assert!(is_truthy("false"));
    assert!(!is_truthy(""));
}

// ============================================================================
// Stop Flag Tests
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_stop_flag_expires_after_ttl() {
    let signals = MemorySignals::new();
    assert!(!signals.is_stop_requested("scan-1").await.unwrap());

    signals
        .request_stop("scan-1", Duration::from_secs(60))
        .await
        .unwrap();
    assert!(signals.is_stop_requested("scan-1").await.unwrap());
    assert!(!signals.is_stop_requested("scan-2").await.unwrap());

    tokio::time::advance(Duration::from_secs(61)).await;
    assert!(!signals.is_stop_requested("scan-1").await.unwrap());
}

#[tokio::test]
async fn test_any_raw_flag_value_stops() {
    let signals = MemorySignals::new();
    signals.set_raw_flag("scan-1", "0", STOP_TTL).await;
    assert!(signals.is_stop_requested("scan-1").await.unwrap());

    signals.set_raw_flag("scan-2", "false", STOP_TTL).await;
    assert!(signals.is_stop_requested("scan-2").await.unwrap());

    signals.set_raw_flag("scan-3", "", STOP_TTL).await;
    assert!(!signals.is_stop_requested("scan-3").await.unwrap());
}

// ============================================================================
// Scan State Tests
// ============================================================================

#[tokio::test]
async fn test_transition_starts_from_pending() {
    let signals = MemorySignals::new();
    assert_eq!(signals.state("scan-1").await.unwrap(), None);

    let state = transition(&signals, "scan-1", ScanEvent::Start).await.unwrap();
    assert_eq!(state, ScanState::Running);
    assert_eq!(signals.state("scan-1").await.unwrap(), Some(ScanState::Running));

    transition(&signals, "scan-1", ScanEvent::Finish).await.unwrap();
    assert_eq!(signals.state("scan-1").await.unwrap(), Some(ScanState::Completed));
}

#[tokio::test]
async fn test_invalid_transition_leaves_state() {
    let signals = MemorySignals::new();
    signals.set_state("scan-1", ScanState::Stopped).await.unwrap();

    assert!(transition(&signals, "scan-1", ScanEvent::Start).await.is_err());
    assert_eq!(signals.state("scan-1").await.unwrap(), Some(ScanState::Stopped));
}

// ============================================================================
// Visited Set Tests
// ============================================================================

#[tokio::test]
async fn test_claim_url_once_per_scan() {
    let signals = MemorySignals::new();

    assert!(signals.claim_url("scan-1", "https://a.test/x").await.unwrap());
    assert!(!signals.claim_url("scan-1", "https://a.test/x").await.unwrap());
    assert!(signals.claim_url("scan-1", "https://a.test/y").await.unwrap());
    assert!(signals.claim_url("scan-2", "https://a.test/x").await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_visited_set_expires() {
    let signals = MemorySignals::new();
    assert!(signals.claim_url("scan-1", "https://a.test/x").await.unwrap());

    tokio::time::advance(Duration::from_secs(86_401)).await;
    assert!(signals.claim_url("scan-1", "https://a.test/x").await.unwrap());
}
