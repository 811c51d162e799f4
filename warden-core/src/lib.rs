use colored::Colorize;

pub mod analysis;
pub mod config;
pub mod crawl;
pub mod error;
pub mod graph;
pub mod model;
pub mod queue;
pub mod signals;
pub mod templates;
pub mod worker;

pub use error::{AnalysisError, CoreError, Result};

pub fn print_banner() {
    let banner = r#"
    ╔═══════════════════════════════════════════════════════════╗
    ║  ██╗    ██╗ █████╗ ██████╗ ██████╗ ███████╗███╗   ██╗    ║
    ║  ██║    ██║██╔══██╗██╔══██╗██╔══██╗██╔════╝████╗  ██║    ║
    ║  ██║ █╗ ██║███████║██████╔╝██║  ██║█████╗  ██╔██╗ ██║    ║
    ║  ██║███╗██║██╔══██║██╔══██╗██║  ██║██╔══╝  ██║╚██╗██║    ║
    ║  ╚███╔███╔╝██║  ██║██║  ██║██████╔╝███████╗██║ ╚████║    ║
    ║   ╚══╝╚══╝ ╚═╝  ╚═╝╚═╝  ╚═╝╚═════╝ ╚══════╝╚═╝  ╚═══╝    ║
    ║                                                           ║
    ║          queued crawl-and-analyze security scans          ║
    ╚═══════════════════════════════════════════════════════════╝
    "#;
    println!("{}", banner.bright_cyan());
}
