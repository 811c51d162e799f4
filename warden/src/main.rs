use clap::ArgMatches;
use colored::Colorize;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use warden::commands::command_argument_builder;
use warden::handlers;
use warden_core::{config::Settings, print_banner};

const DEFAULT_LOG_FILTER: &str = "warden=info,warden_core=info,warden_scanner=info";

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let registry = tracing_subscriber::registry().with(filter);

    // stdout is reserved for command output
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() {
    // A missing .env is fine; the environment may already be set
    let _ = dotenvy::dotenv();

    let cmd = command_argument_builder();
    let chosen_command = cmd.get_matches();
    let quiet = chosen_command.get_flag("quiet");

    init_tracing(chosen_command.get_flag("json-logs"));

    // Show banner unless --quiet flag is set
    if !quiet {
        print_banner();
    }

    if chosen_command.subcommand().is_none() {
        // No subcommand provided, just show the banner
        return;
    }

    let settings = Settings::from_env();
    if let Err(e) = dispatch(&chosen_command, &settings, quiet).await {
        eprintln!("{} {:#}", "✗".red().bold(), e);
        std::process::exit(1);
    }
}

async fn dispatch(matches: &ArgMatches, settings: &Settings, quiet: bool) -> anyhow::Result<()> {
    match matches.subcommand() {
        Some(("worker", args)) => handlers::handle_worker(args, settings).await,
        Some(("crawl", args)) => handlers::handle_crawl(args, settings).await,
        Some(("exploit", args)) => handlers::handle_exploit(args, settings).await,
        Some(("stop", args)) => handlers::handle_stop(args, settings).await,
        Some(("status", args)) => handlers::handle_status(args, settings).await,
        Some(("stats", _)) => handlers::handle_stats(settings).await,
        Some(("recover", _)) => handlers::handle_recover(settings).await,
        Some(("scan", args)) => handlers::handle_scan(args, settings, quiet).await,
        _ => unreachable!("clap should ensure we don't get here"),
    }
}
