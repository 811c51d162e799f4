use anyhow::{Context, Result};
use clap::ArgMatches;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;
use warden_core::analysis::{AnalysisProvider, OpenAiProvider};
use warden_core::config::Settings;
use warden_core::crawl::CrawlEngine;
use warden_core::graph::{GraphStore, MemoryGraph, Neo4jGraph};
use warden_core::model::{
    Finding, JobHandle, LEGACY_MAX_DEPTH, LEGACY_MAX_PAGES, QueueName, ScanConfig, ScanEvent, ScanState,
    Severity,
};
use warden_core::queue::{Dispatcher, JobBroker, MemoryBroker, QueueDepth, RedisBroker};
use warden_core::signals::{MemorySignals, RedisSignals, STOP_TTL, SignalStore, transition};
use warden_core::worker::{Worker, WorkerSettings};
use warden_scanner::{ExploitExecutor, HttpRenderer, PageRenderer};

const SEVERITIES: [Severity; 5] = [
    Severity::Critical,
    Severity::High,
    Severity::Medium,
    Severity::Low,
    Severity::Info,
];

// URL sources

/// Load URLs from either a file or a single URL argument
pub fn load_urls_from_source(url: Option<&Url>, hosts_file: Option<&PathBuf>) -> Result<Vec<String>, String> {
    if let Some(hosts_file_path) = hosts_file {
        load_urls_from_file(hosts_file_path)
    } else if let Some(url) = url {
        Ok(vec![url.as_str().to_string()])
    } else {
        Err("Either --url or --hosts-file must be provided".to_string())
    }
}

/// Load and parse URLs from a file. `~` is expanded.
pub fn load_urls_from_file(path: &PathBuf) -> Result<Vec<String>, String> {
    let expanded = shellexpand::tilde(&path.to_string_lossy()).into_owned();
    let content = fs::read_to_string(Path::new(&expanded))
        .map_err(|e| format!("Failed to read hosts file {}: {}", path.display(), e))?;

    let urls: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(parse_url_line)
        .collect();

    if urls.is_empty() {
        return Err(format!("No valid URLs found in {}", path.display()));
    }

    Ok(urls)
}

/// Parse a single line as a URL, trying to add http:// if needed
pub fn parse_url_line(line: &str) -> Option<String> {
    if Url::parse(line).is_ok() {
        return Some(line.to_string());
    }

    let with_scheme = format!("http://{}", line);
    if Url::parse(&with_scheme).is_ok() {
        return Some(with_scheme);
    }

    eprintln!("⚠️  Skipping invalid URL '{}'", line);
    None
}

/// Budgets and templates from the `crawl`/`scan` arguments, applied to `url`.
pub fn scan_config_from_args(url: &str, args: &ArgMatches) -> ScanConfig {
    let max_depth = args.get_one::<u32>("max-depth").copied().unwrap_or(LEGACY_MAX_DEPTH);
    let max_pages = args.get_one::<usize>("max-pages").copied().unwrap_or(LEGACY_MAX_PAGES);
    let templates: Vec<String> = args
        .get_many::<String>("template")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();

    ScanConfig::new(url)
        .with_max_depth(max_depth)
        .with_max_pages(max_pages)
        .with_templates(templates)
}

fn print_divider() {
    println!("{}", "═".repeat(60).bright_blue().bold());
}

fn spinner(message: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
        spinner.set_style(style);
    }
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner.set_message(message.to_string());
    spinner
}

// Wiring

pub async fn build_renderer(kind: &str) -> Result<Arc<dyn PageRenderer>> {
    match kind {
        "chrome" => launch_chrome().await,
        _ => Ok(Arc::new(HttpRenderer::new()?)),
    }
}

#[cfg(feature = "browser")]
async fn launch_chrome() -> Result<Arc<dyn PageRenderer>> {
    let renderer = warden_scanner::ChromeRenderer::launch()
        .await
        .context("Failed to launch headless Chrome")?;
    Ok(Arc::new(renderer))
}

#[cfg(not(feature = "browser"))]
async fn launch_chrome() -> Result<Arc<dyn PageRenderer>> {
    anyhow::bail!("warden was built without the `browser` feature; use --renderer http or rebuild with --features browser")
}

pub fn build_analysis(settings: &Settings) -> Result<Arc<dyn AnalysisProvider>> {
    if settings.openai_api_key.is_empty() {
        warn!("OPENAI_API_KEY is not set, template analysis requests will be rejected");
    }
    let provider = OpenAiProvider::new(settings.openai_api_key.clone(), Some(settings.analysis_model.clone()))?
        .with_base_url(settings.openai_base_url.clone())
        .with_temperature(settings.analysis_temperature)
        .with_timeout(settings.analysis_timeout)?;
    Ok(Arc::new(provider))
}

pub fn build_worker(
    renderer: Arc<dyn PageRenderer>,
    graph: Arc<dyn GraphStore>,
    analysis: Arc<dyn AnalysisProvider>,
    signals: Arc<dyn SignalStore>,
    broker: Arc<dyn JobBroker>,
    max_attempts: u32,
    settings: WorkerSettings,
) -> Worker {
    let crawl_engine = Arc::new(CrawlEngine::new(renderer.clone(), graph, analysis));
    let exploit_executor = Arc::new(ExploitExecutor::new(renderer));
    let dispatcher = Dispatcher::new(broker).with_max_attempts(max_attempts);
    Worker::new(crawl_engine, exploit_executor, signals, dispatcher, settings)
}

async fn connect_broker(settings: &Settings) -> Result<RedisBroker> {
    RedisBroker::connect(&settings.redis_url)
        .await
        .with_context(|| format!("Failed to connect to Redis at {}", settings.redis_url))
}

async fn connect_graph(settings: &Settings) -> Result<Neo4jGraph> {
    Neo4jGraph::connect(&settings.neo4j_uri, &settings.neo4j_user, &settings.neo4j_password)
        .await
        .with_context(|| format!("Failed to connect to Neo4j at {}", settings.neo4j_uri))
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
                return;
            }
            Err(e) => warn!("Could not install SIGTERM handler: {}", e),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Could not listen for Ctrl+C, stop the worker with SIGKILL: {}", e);
        std::future::pending::<()>().await;
    }
}

// Operations shared by the CLI handlers and tests

/// Enqueue one crawl job per seed URL, all under `scan_id`.
pub async fn enqueue_seeds(
    dispatcher: &Dispatcher,
    seeds: &[String],
    seed_config: &ScanConfig,
    scan_id: &str,
) -> Result<Vec<JobHandle>> {
    let mut handles = Vec::with_capacity(seeds.len());
    for url in seeds {
        let handle = dispatcher
            .enqueue_crawl(&seed_config.for_url(url), scan_id)
            .await
            .with_context(|| format!("Failed to enqueue crawl of {}", url))?;
        handles.push(handle);
    }
    Ok(handles)
}

/// Set the stop flag and move the scan to `STOP_REQUESTED`.
pub async fn stop_scan(signals: &dyn SignalStore, scan_id: &str, ttl: Duration) -> Result<ScanState> {
    signals.request_stop(scan_id, ttl).await?;
    let state = transition(signals, scan_id, ScanEvent::RequestStop).await?;
    Ok(state)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanStatus {
    pub scan_id: String,
    pub state: Option<ScanState>,
    pub stop_requested: bool,
}

pub async fn scan_status(signals: &dyn SignalStore, scan_id: &str) -> Result<ScanStatus> {
    Ok(ScanStatus {
        scan_id: scan_id.to_string(),
        state: signals.state(scan_id).await?,
        stop_requested: signals.is_stop_requested(scan_id).await?,
    })
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub pages: u64,
    pub findings: Vec<(Severity, u64)>,
    pub queues: Vec<(QueueName, QueueDepth)>,
}

pub async fn collect_stats(graph: &dyn GraphStore, broker: &dyn JobBroker) -> Result<Stats> {
    let mut stats = Stats {
        pages: graph.count_pages().await?,
        ..Stats::default()
    };
    for severity in SEVERITIES {
        stats.findings.push((severity, graph.count_findings(severity).await?));
    }
    for queue in QueueName::ALL {
        stats.queues.push((queue, broker.depth(queue).await?));
    }
    Ok(stats)
}

pub async fn recover_stalled(broker: &dyn JobBroker) -> Result<Vec<(QueueName, usize)>> {
    let mut recovered = Vec::new();
    for queue in QueueName::ALL {
        recovered.push((queue, broker.requeue_stalled(queue).await?));
    }
    Ok(recovered)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalScanReport {
    pub scan_id: String,
    /// Page nodes in the graph, crawled or only linked to.
    pub pages: u64,
    pub failed_jobs: usize,
    pub findings: Vec<Finding>,
}

/// Crawl `seeds` in this process against in-memory stores until the crawler
/// queue drains. Failed jobs are not retried.
pub async fn run_local_scan(
    seeds: &[String],
    seed_config: &ScanConfig,
    renderer: Arc<dyn PageRenderer>,
    analysis: Arc<dyn AnalysisProvider>,
    concurrency: usize,
    progress: Option<&ProgressBar>,
) -> Result<LocalScanReport> {
    let scan_id = Uuid::new_v4().to_string();
    let graph = Arc::new(MemoryGraph::new());
    let broker = Arc::new(MemoryBroker::new());
    let settings = WorkerSettings {
        concurrency,
        poll_interval: Duration::from_millis(100),
        follow_links: true,
    };

    let worker = Arc::new(build_worker(
        renderer,
        graph.clone(),
        analysis,
        Arc::new(MemorySignals::new()),
        broker.clone(),
        1,
        settings,
    ));

    let dispatcher = Dispatcher::new(broker.clone()).with_max_attempts(1);
    enqueue_seeds(&dispatcher, seeds, seed_config, &scan_id).await?;

    let shutdown = worker.shutdown_handle();
    let running = tokio::spawn(worker.run());

    // Follow-ups are pushed before their parent job completes, so an empty
    // waiting list with nothing active means the crawl is done.
    loop {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let depth = broker.depth(QueueName::Crawler).await?;
        if let Some(progress) = progress {
            progress.set_message(format!("{} queued, {} in flight", depth.waiting, depth.active));
        }
        if depth.waiting == 0 && depth.active == 0 {
            break;
        }
    }

    shutdown.trigger();
    running.await.context("Worker task panicked")??;

    Ok(LocalScanReport {
        pages: graph.count_pages().await?,
        failed_jobs: broker.depth(QueueName::Crawler).await?.failed,
        findings: graph.findings().await,
        scan_id,
    })
}

// CLI handlers

pub async fn handle_worker(args: &ArgMatches, settings: &Settings) -> Result<()> {
    let mut worker_settings = settings.worker_settings();
    if let Some(concurrency) = args.get_one::<usize>("concurrency") {
        worker_settings.concurrency = (*concurrency).max(1);
    }
    if args.get_flag("no-follow") {
        worker_settings.follow_links = false;
    }
    let renderer_kind = args.get_one::<String>("renderer").map(String::as_str).unwrap_or("http");

    let broker = connect_broker(settings).await?;
    let signals = RedisSignals::from_connection(broker.connection());
    let graph = connect_graph(settings).await?;
    let renderer = build_renderer(renderer_kind).await?;
    info!("Using {} renderer", renderer.name());

    let worker = Arc::new(build_worker(
        renderer,
        Arc::new(graph),
        build_analysis(settings)?,
        Arc::new(signals),
        Arc::new(broker),
        settings.job_max_attempts,
        worker_settings,
    ));

    let shutdown = worker.shutdown_handle();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("Shutdown signal received, finishing in-flight jobs");
        shutdown.trigger();
    });

    worker.run().await?;
    Ok(())
}

pub async fn handle_crawl(args: &ArgMatches, settings: &Settings) -> Result<()> {
    let seeds = load_urls_from_source(args.get_one::<Url>("url"), args.get_one::<PathBuf>("hosts-file"))
        .map_err(anyhow::Error::msg)?;
    let scan_id = args
        .get_one::<String>("scan-id")
        .cloned()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let seed_config = scan_config_from_args(&seeds[0], args);

    let broker = connect_broker(settings).await?;
    let dispatcher = Dispatcher::new(Arc::new(broker)).with_max_attempts(settings.job_max_attempts);
    let handles = enqueue_seeds(&dispatcher, &seeds, &seed_config, &scan_id).await?;

    print_divider();
    println!("{} {}", "Scan:".bright_white().bold(), scan_id.bright_cyan());
    println!(
        "{} depth {}, {} links per page, templates: {}",
        "→".blue(),
        seed_config.max_depth,
        seed_config.max_pages,
        if seed_config.templates.is_empty() {
            "none".to_string()
        } else {
            seed_config.templates.join(", ")
        }
    );
    for (url, handle) in seeds.iter().zip(&handles) {
        println!("{} {} {}", "✓".green().bold(), handle.id.dimmed(), url);
    }
    print_divider();
    Ok(())
}

pub async fn handle_exploit(args: &ArgMatches, settings: &Settings) -> Result<()> {
    let url = args.get_one::<Url>("url").context("--url is required")?;
    let payload = args.get_one::<String>("payload").context("--payload is required")?;
    let attack_type = args.get_one::<String>("attack-type").map(String::as_str).unwrap_or("XSS");
    let scan_id = args.get_one::<String>("scan-id").context("--scan-id is required")?;

    let broker = connect_broker(settings).await?;
    let dispatcher = Dispatcher::new(Arc::new(broker)).with_max_attempts(settings.job_max_attempts);
    let handle = dispatcher
        .enqueue_exploit(url.as_str(), payload, attack_type, scan_id)
        .await?;

    println!("{} Exploit job {} queued for {}", "✓".green().bold(), handle.id, url);
    Ok(())
}

pub async fn handle_stop(args: &ArgMatches, settings: &Settings) -> Result<()> {
    let scan_id = args.get_one::<String>("SCAN_ID").context("SCAN_ID is required")?;
    let ttl = args
        .get_one::<u64>("ttl")
        .map(|secs| Duration::from_secs(*secs))
        .unwrap_or(STOP_TTL);

    let signals = RedisSignals::connect(&settings.redis_url)
        .await
        .with_context(|| format!("Failed to connect to Redis at {}", settings.redis_url))?;
    let state = stop_scan(&signals, scan_id, ttl).await?;

    println!(
        "{} Stop requested for {} (state {}, flag expires in {}s)",
        "✓".green().bold(),
        scan_id.bright_cyan(),
        state,
        ttl.as_secs()
    );
    Ok(())
}

pub async fn handle_status(args: &ArgMatches, settings: &Settings) -> Result<()> {
    let scan_id = args.get_one::<String>("SCAN_ID").context("SCAN_ID is required")?;

    let broker = connect_broker(settings).await?;
    let signals = RedisSignals::from_connection(broker.connection());
    let status = scan_status(&signals, scan_id).await?;

    print_divider();
    println!("{} {}", "Scan:".bright_white().bold(), status.scan_id.bright_cyan());
    println!(
        "  {} {}",
        "State:".bright_white(),
        status.state.map(|s| s.to_string()).unwrap_or_else(|| "unknown".to_string())
    );
    println!("  {} {}", "Stop requested:".bright_white(), status.stop_requested);

    if let Some(job_id) = args.get_one::<String>("job") {
        match broker.report(job_id).await? {
            Some(report) => println!("{}", serde_json::to_string_pretty(&report)?),
            None => println!("  {} no stored result for job {}", "•".yellow(), job_id),
        }
    }
    print_divider();
    Ok(())
}

pub async fn handle_stats(settings: &Settings) -> Result<()> {
    let broker = connect_broker(settings).await?;
    let graph = connect_graph(settings).await?;
    let stats = collect_stats(&graph, &broker).await?;

    print_divider();
    println!("{} {}", "Pages:".bright_white().bold(), stats.pages);
    println!("{}", "Findings:".bright_white().bold());
    for (severity, count) in &stats.findings {
        println!("  {:<10} {}", severity.as_str(), count);
    }
    println!("{}", "Queues:".bright_white().bold());
    for (queue, depth) in &stats.queues {
        println!(
            "  {:<14} waiting {}, active {}, failed {}",
            queue.as_str(),
            depth.waiting,
            depth.active,
            depth.failed
        );
    }
    print_divider();
    Ok(())
}

pub async fn handle_recover(settings: &Settings) -> Result<()> {
    let broker = connect_broker(settings).await?;
    for (queue, count) in recover_stalled(&broker).await? {
        println!("{} {} jobs returned to {}", "✓".green().bold(), count, queue);
    }
    Ok(())
}

pub async fn handle_scan(args: &ArgMatches, settings: &Settings, quiet: bool) -> Result<()> {
    let seeds = load_urls_from_source(args.get_one::<Url>("url"), args.get_one::<PathBuf>("hosts-file"))
        .map_err(anyhow::Error::msg)?;
    let seed_config = scan_config_from_args(&seeds[0], args);
    let concurrency = args.get_one::<usize>("concurrency").copied().unwrap_or(4).max(1);
    let renderer_kind = args.get_one::<String>("renderer").map(String::as_str).unwrap_or("http");

    let renderer = build_renderer(renderer_kind).await?;
    let analysis = build_analysis(settings)?;

    let progress = (!quiet).then(|| spinner("Starting local scan"));
    let report = run_local_scan(
        &seeds,
        &seed_config,
        renderer,
        analysis,
        concurrency,
        progress.as_ref(),
    )
    .await?;
    if let Some(progress) = progress {
        progress.finish_and_clear();
    }

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
