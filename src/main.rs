use anyhow::Result;
use clap::Parser;
use docagent_rs::cli::Args;
use docagent_rs::launch;
use tracing_subscriber::EnvFilter;

/// 日志输出到stderr；--verbose时为debug，否则读取RUST_LOG，默认info
fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);
    let config = args.build_config()?;

    launch(&config, &args.command, args.output.as_deref()).await
}
