use clap::Parser;
use mcp_fleet::cli::Cli;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging();
    mcp_fleet::cli::run(cli).await
}

/// Write to a file if `FLEET_LOG` is set, otherwise stderr filtered by `RUST_LOG`.
fn init_logging() {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::prelude::*;

    if let Ok(path) = std::env::var("FLEET_LOG") {
        let path = if path.is_empty() { "mcp-fleet.log".to_string() } else { path };
        match std::fs::File::create(&path) {
            Ok(file) => {
                let file_layer = tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_ansi(false);
                let filter = EnvFilter::new("mcp_fleet=debug");
                let _ = tracing_subscriber::registry()
                    .with(file_layer.with_filter(filter))
                    .try_init();
                return;
            }
            Err(err) => {
                eprintln!("Failed to create log file {path}: {err}");
            }
        }
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
