use anyhow::Result;
use clap::Parser;
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use s3_zonerepo::commands::{run, Command, RepoArgs};
use s3_zonerepo::metrics::SharedMetrics;

#[derive(Parser)]
#[command(version)]
struct Cli {
    #[command(flatten)]
    repo: RepoArgs,

    #[arg(
        long,
        global = true,
        default_value = "info",
        help = "Log level (error, warn, info, debug, trace). Can also be set via RUST_LOG env var"
    )]
    log_level: String,

    #[arg(long, global = true, help = "Print Prometheus metrics to stderr when done")]
    metrics: bool,

    #[command(subcommand)]
    command: Command,
}

fn setup_tracing(log_level: &str) {
    // Try to use RUST_LOG env var first, fall back to CLI flag
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| {
            eprintln!("Invalid log level '{}', falling back to 'info'", log_level);
            EnvFilter::new("info")
        });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    setup_tracing(&cli.log_level);

    let metrics = SharedMetrics::new();
    let output = run(cli.repo, cli.command, metrics.clone())?;
    println!("{}", serde_json::to_string_pretty(&output)?);

    if cli.metrics {
        eprint!("{}", metrics.render()?);
    }

    // a batch rejected during validation did nothing at all
    if output.get("ok") == Some(&serde_json::Value::Bool(false)) {
        warn!("Operation was rejected, nothing was changed");
        std::process::exit(1);
    }
    Ok(())
}
