use crate::CLAP_STYLING;
use clap::{arg, command};
use url::Url;

fn url_source_args(cmd: clap::Command) -> clap::Command {
    cmd.arg(
        arg!(-u --"url" <URL>)
            .required(false)
            .help("The URL to crawl")
            .value_parser(clap::value_parser!(Url))
            .conflicts_with("hosts-file"),
    )
    .arg(
        arg!(-H --"hosts-file" <PATH>)
            .required(false)
            .help("Path to a newline-delimited file of URLs to crawl")
            .value_parser(clap::value_parser!(std::path::PathBuf))
            .conflicts_with("url"),
    )
}

fn scan_budget_args(cmd: clap::Command) -> clap::Command {
    cmd.arg(
        arg!(-d --"max-depth" <DEPTH>)
            .required(false)
            .help("How many link hops to follow from each seed URL")
            .value_parser(clap::value_parser!(u32))
            .default_value("2"),
    )
    .arg(
        arg!(-p --"max-pages" <PAGES>)
            .required(false)
            .help("Maximum outbound links kept per crawled page")
            .value_parser(clap::value_parser!(usize))
            .default_value("10"),
    )
    .arg(
        arg!(-T --"template" <TEMPLATE>)
            .required(false)
            .help("Attack template to analyze each page with (XSS, SQLi, AuthBypass, SensitiveData). Repeatable.")
            .action(clap::ArgAction::Append),
    )
}

fn renderer_arg() -> clap::Arg {
    arg!(-r --"renderer" <RENDERER>)
        .required(false)
        .help("Page renderer: http, or chrome when built with the browser feature")
        .value_parser(["http", "chrome"])
        .default_value("http")
}

pub fn command_argument_builder() -> clap::Command {
    clap::Command::new("warden")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("warden")
        .styles(CLAP_STYLING)
        .arg(arg!(-q --"quiet" "Suppress banner and non-essential output").required(false))
        .arg(arg!(--"json-logs" "Emit logs as JSON lines").required(false))
        .subcommand_required(false)
        .subcommand(
            command!("worker")
                .about("Consume the crawler and exploit queues until interrupted")
                .arg(
                    arg!(-c --"concurrency" <NUM_CONSUMERS>)
                        .required(false)
                        .help("Consumers per queue (default: WORKER_CONCURRENCY or 2)")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(renderer_arg())
                .arg(
                    arg!(--"no-follow")
                        .required(false)
                        .help("Do not enqueue crawl jobs for discovered links")
                        .action(clap::ArgAction::SetTrue),
                ),
        )
        .subcommand(scan_budget_args(url_source_args(
            command!("crawl")
                .about("Enqueue crawl jobs for a host or collection of hosts")
                .arg(
                    arg!(-s --"scan-id" <SCAN_ID>)
                        .required(false)
                        .help("Scan identifier (default: a new UUID)"),
                ),
        )))
        .subcommand(
            command!("exploit")
                .about("Enqueue a single payload replay against a URL")
                .arg(
                    arg!(-u --"url" <URL>)
                        .required(true)
                        .help("The URL to replay the payload against")
                        .value_parser(clap::value_parser!(Url)),
                )
                .arg(
                    arg!(-P --"payload" <PAYLOAD>)
                        .required(true)
                        .help("The payload, sent as the q query parameter"),
                )
                .arg(
                    arg!(-a --"attack-type" <ATTACK_TYPE>)
                        .required(false)
                        .help("Attack type; only XSS is checked for reflection")
                        .default_value("XSS"),
                )
                .arg(
                    arg!(-s --"scan-id" <SCAN_ID>)
                        .required(true)
                        .help("Scan the exploit belongs to"),
                ),
        )
        .subcommand(
            command!("stop")
                .about("Ask workers to skip any further jobs for a scan")
                .arg(arg!(<SCAN_ID>).help("The scan to stop"))
                .arg(
                    arg!(--"ttl" <SECONDS>)
                        .required(false)
                        .help("How long the stop flag lives")
                        .value_parser(clap::value_parser!(u64))
                        .default_value("3600"),
                ),
        )
        .subcommand(
            command!("status")
                .about("Show a scan's state, or a job's result")
                .arg(arg!(<SCAN_ID>).help("The scan to inspect"))
                .arg(
                    arg!(-j --"job" <JOB_ID>)
                        .required(false)
                        .help("Also show the stored result of this job"),
                ),
        )
        .subcommand(command!("stats").about("Show graph totals and queue depths"))
        .subcommand(command!("recover").about("Return jobs stranded by a crashed worker to their queues"))
        .subcommand(
            scan_budget_args(url_source_args(
                command!("scan").about(
                    "Crawl and analyze in this process against an in-memory graph, printing a JSON \
                summary. Needs no Redis or Neo4j.",
                ),
            ))
            .arg(renderer_arg())
            .arg(
                arg!(-c --"concurrency" <NUM_CONSUMERS>)
                    .required(false)
                    .help("Concurrent page crawls")
                    .value_parser(clap::value_parser!(usize))
                    .default_value("4"),
            ),
        )
}
