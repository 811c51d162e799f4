use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use url::Url;
use warden::commands::command_argument_builder;
use warden::handlers::*;
use warden_core::analysis::OpenAiProvider;
use warden_core::graph::{GraphStore, MemoryGraph};
use warden_core::model::{QueueName, ScanConfig, ScanState, Severity};
use warden_core::queue::{Dispatcher, JobBroker, MemoryBroker};
use warden_core::signals::MemorySignals;
use warden_scanner::HttpRenderer;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

// ============================================================================
// URL Source Tests
// ============================================================================

#[test]
fn test_parse_url_line_with_scheme() {
    let result = parse_url_line("https://example.com");
    assert_eq!(result, Some("https://example.com".to_string()));
}

#[test]
fn test_parse_url_line_without_scheme() {
    let result = parse_url_line("example.com");
    assert_eq!(result, Some("http://example.com".to_string()));
}

#[test]
fn test_parse_url_line_invalid() {
    let result = parse_url_line("not a valid url!!!");
    assert_eq!(result, None);
}

#[test]
fn test_load_urls_from_file() -> Result<(), Box<dyn std::error::Error>> {
    let mut temp_file = NamedTempFile::new()?;
    writeln!(temp_file, "https://example.com")?;
    writeln!(temp_file, "httpbin.org")?;
    writeln!(temp_file)?; // Empty line
    writeln!(temp_file, "# staging hosts")?;
    writeln!(temp_file, "https://api.example.com")?;

    let path = PathBuf::from(temp_file.path());
    let urls = load_urls_from_file(&path)?;

    assert_eq!(urls.len(), 3);
    assert_eq!(urls[0], "https://example.com");
    assert_eq!(urls[1], "http://httpbin.org");
    assert_eq!(urls[2], "https://api.example.com");

    Ok(())
}

#[test]
fn test_load_urls_from_file_empty() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file).unwrap();
    writeln!(temp_file, "   ").unwrap();

    let path = PathBuf::from(temp_file.path());
    let result = load_urls_from_file(&path);

    assert!(result.is_err());
    assert!(result.unwrap_err().contains("No valid URLs"));
}

#[test]
fn test_load_urls_from_missing_file() {
    let result = load_urls_from_file(&PathBuf::from("/nonexistent/warden/hosts.txt"));
    assert!(result.unwrap_err().contains("Failed to read hosts file"));
}

#[test]
fn test_load_urls_from_source_single_url() {
    let url = Url::parse("https://example.com").unwrap();
    let result = load_urls_from_source(Some(&url), None).unwrap();

    assert_eq!(result.len(), 1);
    assert_eq!(result[0], "https://example.com/");
}

#[test]
fn test_load_urls_from_source_no_input() {
    let result = load_urls_from_source(None, None);
    assert!(result.is_err());
    assert!(result.unwrap_err().contains("--url or --hosts-file"));
}

// ============================================================================
// Argument Tests
// ============================================================================

#[test]
fn test_crawl_arguments_build_scan_config() {
    let matches = command_argument_builder()
        .try_get_matches_from([
            "warden",
            "crawl",
            "-u",
            "https://a.test",
            "--max-depth",
            "3",
            "-T",
            "XSS",
            "-T",
            "SQLi",
        ])
        .unwrap();
    let (name, args) = matches.subcommand().unwrap();
    assert_eq!(name, "crawl");

    let config = scan_config_from_args("https://a.test/", args);
    assert_eq!(config.url, "https://a.test/");
    assert_eq!(config.max_depth, 3);
    assert_eq!(config.max_pages, 10);
    assert_eq!(config.templates, vec!["XSS".to_string(), "SQLi".to_string()]);
}

#[test]
fn test_crawl_url_conflicts_with_hosts_file() {
    let result = command_argument_builder().try_get_matches_from([
        "warden",
        "crawl",
        "-u",
        "https://a.test",
        "-H",
        "hosts.txt",
    ]);
    assert!(result.is_err());
}

#[test]
fn test_exploit_requires_scan_id() {
    let result = command_argument_builder().try_get_matches_from([
        "warden",
        "exploit",
        "-u",
        "https://a.test/search",
        "--payload",
        "<svg>",
    ]);
    assert!(result.is_err());
}

#[test]
fn test_unknown_renderer_is_rejected() {
    let result = command_argument_builder().try_get_matches_from(["warden", "worker", "--renderer", "lynx"]);
    assert!(result.is_err());
}

// ============================================================================
// Operation Tests
// ============================================================================

#[tokio::test]
async fn test_enqueue_seeds_shares_scan_and_budgets() {
    let broker = Arc::new(MemoryBroker::new());
    let dispatcher = Dispatcher::new(broker.clone());
    let seeds = vec!["https://a.test/".to_string(), "https://b.test/".to_string()];
    let seed_config = ScanConfig::new("https://a.test/").with_max_depth(1);

    let handles = enqueue_seeds(&dispatcher, &seeds, &seed_config, "scan-1").await.unwrap();
    assert_eq!(handles.len(), 2);

    let waiting = broker.waiting(QueueName::Crawler).await;
    assert_eq!(waiting.len(), 2);
    assert_eq!(waiting[1].payload["config"]["url"], "https://b.test/");
    assert_eq!(waiting[1].payload["config"]["maxDepth"], 1);
    assert!(waiting.iter().all(|job| job.scan_id() == Some("scan-1")));
}

#[tokio::test]
async fn test_stop_scan_sets_flag_and_state() {
    let signals = MemorySignals::new();

    let state = stop_scan(&signals, "scan-1", Duration::from_secs(60)).await.unwrap();
    assert_eq!(state, ScanState::StopRequested);

    let status = scan_status(&signals, "scan-1").await.unwrap();
    assert!(status.stop_requested);
    assert_eq!(status.state, Some(ScanState::StopRequested));
}

#[tokio::test]
async fn test_status_of_unknown_scan() {
    let signals = MemorySignals::new();
    let status = scan_status(&signals, "nope").await.unwrap();
    assert_eq!(status.state, None);
    assert!(!status.stop_requested);
}

#[tokio::test]
async fn test_collect_stats() {
    let graph = MemoryGraph::new();
    graph
        .merge_page_visit("scan-1", "https://a.test/", "A", &["https://a.test/b".to_string()])
        .await
        .unwrap();
    let broker = Arc::new(MemoryBroker::new());
    Dispatcher::new(broker.clone())
        .enqueue_exploit("https://a.test/", "<x>", "XSS", "scan-1")
        .await
        .unwrap();

    let stats = collect_stats(&graph, broker.as_ref()).await.unwrap();
    assert_eq!(stats.pages, 2);
    assert!(stats.findings.iter().all(|(_, count)| *count == 0));
    assert_eq!(stats.findings[0].0, Severity::Critical);

    let exploit = stats.queues.iter().find(|(q, _)| *q == QueueName::Exploit).unwrap();
    assert_eq!(exploit.1.waiting, 1);
}

#[tokio::test]
async fn test_recover_stalled_reports_per_queue() {
    let broker = Arc::new(MemoryBroker::new());
    let dispatcher = Dispatcher::new(broker.clone());
    dispatcher
        .enqueue_crawl(&ScanConfig::new("https://a.test/"), "scan-1")
        .await
        .unwrap();
    broker
        .reserve(QueueName::Crawler, Duration::from_millis(50))
        .await
        .unwrap()
        .unwrap();

    let recovered = recover_stalled(broker.as_ref()).await.unwrap();
    assert_eq!(recovered, vec![(QueueName::Crawler, 1), (QueueName::Exploit, 0)]);
}

// ============================================================================
// Local Scan Tests
// ============================================================================

async fn mount_page(server: &MockServer, route: &str, title: &str, links: &[&str]) {
    let base = server.uri();
    let anchors: String = links
        .iter()
        .map(|link| format!(r#"<a href="{base}{link}">{link}</a>"#))
        .collect();
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html")
                .set_body_string(format!(
                    "<html><head><title>{title}</title></head><body>{anchors}</body></html>"
                )),
        )
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_local_scan_crawls_each_page_once() {
    let server = MockServer::start().await;
    mount_page(&server, "/", "Home", &["/a", "/b"]).await;
    mount_page(&server, "/a", "A", &["/"]).await;
    mount_page(&server, "/b", "B", &[]).await;

    let seed = format!("{}/", server.uri());
    let report = run_local_scan(
        &[seed.clone()],
        &ScanConfig::new(seed.as_str()).with_max_depth(2),
        Arc::new(HttpRenderer::new().unwrap()),
        Arc::new(OpenAiProvider::new(String::new(), None).unwrap()),
        2,
        None,
    )
    .await
    .unwrap();

    assert_eq!(report.pages, 3);
    assert_eq!(report.failed_jobs, 0);
    assert!(report.findings.is_empty());
}

#[tokio::test]
async fn test_local_scan_parks_unreachable_seed() {
    let report = run_local_scan(
        &["http://127.0.0.1:1/".to_string()],
        &ScanConfig::new("http://127.0.0.1:1/"),
        Arc::new(HttpRenderer::new().unwrap()),
        Arc::new(OpenAiProvider::new(String::new(), None).unwrap()),
        1,
        None,
    )
    .await
    .unwrap();

    assert_eq!(report.pages, 0);
    assert_eq!(report.failed_jobs, 1);
}
